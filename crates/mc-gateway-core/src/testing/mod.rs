//! Test utilities for the relay gateway.
//!
//! This module provides infrastructure for integration testing:
//!
//! - [`MockUpstream`] - a lightweight upstream server speaking the real
//!   login protocol, recording relayed frames
//! - [`GatewayTestHarness`] / [`TestHarnessBuilder`] - a running gateway
//!   wired to a mock upstream

pub mod harness;
pub mod mock_upstream;

pub use harness::{GatewayTestHarness, TestHarnessBuilder};
pub use mock_upstream::MockUpstream;
