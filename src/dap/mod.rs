//! Debug adapter protocol plumbing: framing, message envelopes and the backend client.

pub mod client;
pub mod io;
pub mod pending;
pub mod protocol;
pub mod tracer;

pub use client::{ClientOptions, DapClient, EventHandler, Handshake};
