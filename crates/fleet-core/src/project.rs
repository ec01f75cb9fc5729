//! Read-only project context handed to running agents.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A version: one revision of a project and the config it was built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub id: String,
    pub project: String,
    pub revision: String,
    /// Raw project configuration text.
    #[serde(default)]
    pub config: String,
}

/// Tracking information for a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRef {
    pub identifier: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub repo: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub enabled: bool,
}

/// Expansion variables for a project.
pub type ProjectVars = BTreeMap<String, String>;
