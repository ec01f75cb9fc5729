//! Fleet Control Plane Library
//!
//! This crate provides the control plane for a fleet of build hosts: the
//! agent-facing HTTP protocol, host lifecycle management across cloud
//! providers, and the in-memory store they share.

pub mod cloud;
pub mod config;
pub mod crypto;
pub mod events;
pub mod hostinit;
pub mod http;
pub mod lock;
pub mod metrics;
pub mod monitor;
pub mod notify;
pub mod seed;
pub mod state;

pub use cloud::{CloudError, CloudManager, CloudRegistry};
pub use config::{Args, Config};
pub use hostinit::HostInit;
pub use http::create_router;
pub use monitor::HostMonitor;
pub use notify::{LogNotifier, Notifier, WebhookNotifier};
pub use seed::Seed;
pub use state::AppState;
