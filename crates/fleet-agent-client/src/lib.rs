//! Client library for fleet agents.
//!
//! Speaks the agent side of the control plane's HTTP protocol: asking for
//! work, reporting task progress, and shipping logs and results.

pub mod client;
pub mod error;

pub use client::AgentClient;
pub use error::ClientError;
