//! Cartwatch CLI internals.
//!
//! The `cw` binary runs in three roles: the coordinator daemon (hub +
//! scheduler + local execution), a remote scrape agent, and one-off
//! operator commands (pairing, status, ad-hoc scrapes). Everything
//! browser-shaped lives behind the capability traits of `cw-core`; the
//! WebDriver implementations are in [`browser`].

pub mod browser;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
