//! Core connection lifecycle and event dispatch for the WhatsApp bot.
//!
//! This crate is intentionally transport-agnostic. The messaging-library bridge
//! and the generative model live behind ports (traits) implemented in adapter
//! crates.

pub mod config;
pub mod credentials;
pub mod dispatcher;
pub mod domain;
pub mod errors;
pub mod handlers;
pub mod heartbeat;
pub mod logging;
pub mod model;
pub mod reconnect;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::{Error, Result};
