//! Coordinator ⇄ agent RPC hub.
//!
//! The hub owns every persistent agent connection and exposes a single
//! call surface to the rest of the coordinator: invoke a method on a named
//! agent, stream its progress, get exactly one terminal result. The moving
//! parts:
//!
//! - [`registry`]: who is connected right now (one live connection per
//!   identity, newest wins)
//! - [`calls`]: in-flight call correlation (request ids, progress fan-in,
//!   at-most-once completion)
//! - [`hub`]: the connection-agnostic state machine tying the two together
//! - [`server`]: the axum WebSocket endpoint that feeds frames into it
//! - [`client`]: the agent-side connector and method dispatcher
//! - [`pairing`]: short-lived single-use codes that mint per-agent tokens

pub mod calls;
pub mod client;
pub mod error;
pub mod hub;
pub mod pairing;
pub mod registry;
pub mod server;

pub use client::{AgentClient, AgentCredential, ClientExit, MethodHandler, ProgressReporter};
pub use error::{HubError, Result};
pub use hub::{AgentInfo, CallOptions, Hub, HubConfig};
pub use pairing::PairingStore;
pub use server::hub_router;
