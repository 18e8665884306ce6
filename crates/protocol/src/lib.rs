//! Wire types for the cartwatch agent protocol.
//!
//! This crate contains the serde-serializable types exchanged between the
//! coordinator and its remote scrape agents. These types represent the
//! "protocol layer" - the shapes of data as they appear on the wire.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! - **Pure data**: No behavior beyond serialization/deserialization
//! - **Closed unions**: Every message decodes into a tagged enum once, at
//!   the boundary, before any business logic sees it
//! - **Stable**: Changes only when the wire protocol changes
//!
//! Higher-level call semantics (correlation, timeouts, liveness) live in
//! `cw-hub`.

pub mod items;
pub mod pairing;
pub mod rpc;

pub use items::*;
pub use pairing::*;
pub use rpc::*;
