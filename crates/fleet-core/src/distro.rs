//! Distro descriptors.

use serde::{Deserialize, Serialize};

/// A named machine image/template: OS, login user, and provisioning steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Distro {
    pub id: String,

    #[serde(default)]
    pub arch: String,

    /// Login user for SSH.
    #[serde(default)]
    pub user: String,

    /// CloudManager used to create hosts of this distro.
    #[serde(default)]
    pub provider: String,

    /// Extra `-o` options passed to ssh.
    #[serde(default)]
    pub ssh_options: Vec<String>,

    /// Script run on the host after boot.
    #[serde(default)]
    pub setup: String,
}

impl Distro {
    pub fn new(id: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            provider: provider.into(),
            ..Self::default()
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn with_ssh_option(mut self, option: impl Into<String>) -> Self {
        self.ssh_options.push(option.into());
        self
    }
}
