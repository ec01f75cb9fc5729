//! Shared-secret utilities for agent authentication.

mod secret;

pub use secret::{generate_record_id, generate_secret, secrets_match};
