//! Relay layer: accept loop, per-connection lifecycle, legacy ping.
//!
//! This module provides:
//! - TCP listener for accepting client connections
//! - Connection handler driving handshake, login, and the relay loops
//! - The legacy (pre-framing) server-list ping

pub mod connection;
pub mod legacy;
pub mod listener;

pub use connection::ConnectionHandler;
pub use listener::GatewayListener;
