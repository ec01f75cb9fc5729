//! Core domain errors.

use thiserror::Error;

use crate::{HostStatus, TaskStatus};

/// Core domain errors for the fleet.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Illegal host lifecycle transition.
    #[error("Invalid host state transition: {from} -> {to}")]
    InvalidStateTransition { from: HostStatus, to: HostStatus },

    /// The task is not in a state that allows the requested operation.
    #[error("Task {task} is {actual}, expected {expected}")]
    UnexpectedTaskStatus {
        task: String,
        expected: TaskStatus,
        actual: TaskStatus,
    },

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
