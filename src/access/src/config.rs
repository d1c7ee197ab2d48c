//! Engine configuration loading and validation

use crate::error::{AccessError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Feature access configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccessConfig {
    /// Minutes between directory refreshes of one principal's membership
    #[serde(default = "default_sync_interval")]
    pub sync_interval_minutes: u64,

    /// Upper bound on a single directory call
    #[serde(default = "default_directory_timeout")]
    pub directory_timeout_secs: u64,

    /// Features that bypass rule checks entirely
    #[serde(default)]
    pub exempt_features: Vec<String>,

    /// Features created at bootstrap when missing from the store
    #[serde(default)]
    pub declared_features: Vec<String>,

    /// Role claim that marks a superuser
    #[serde(default = "default_superuser_role")]
    pub superuser_role: String,

    /// Role claim that marks an external identity
    #[serde(default = "default_external_role")]
    pub external_role: String,

    /// Grant every internal identity access to every feature
    #[serde(default)]
    pub global_internal_access: bool,
}

fn default_sync_interval() -> u64 {
    10
}

fn default_directory_timeout() -> u64 {
    30
}

fn default_superuser_role() -> String {
    "AccessMaster".to_string()
}

fn default_external_role() -> String {
    "ExternalUser".to_string()
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            sync_interval_minutes: default_sync_interval(),
            directory_timeout_secs: default_directory_timeout(),
            exempt_features: Vec::new(),
            declared_features: Vec::new(),
            superuser_role: default_superuser_role(),
            external_role: default_external_role(),
            global_internal_access: false,
        }
    }
}

impl AccessConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: AccessConfig = toml::from_str(content)
            .map_err(|e| AccessError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AccessError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.directory_timeout_secs == 0 {
            return Err(AccessError::Config(
                "directory_timeout_secs must be greater than zero".to_string(),
            ));
        }

        if let Some(name) = self
            .declared_features
            .iter()
            .chain(self.exempt_features.iter())
            .find(|name| name.trim().is_empty())
        {
            return Err(AccessError::Config(format!("Invalid feature name '{}'", name)));
        }

        if self.superuser_role.is_empty() {
            return Err(AccessError::Config("superuser_role must not be empty".to_string()));
        }

        Ok(())
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_minutes.saturating_mul(60))
    }

    pub fn directory_timeout(&self) -> Duration {
        Duration::from_secs(self.directory_timeout_secs)
    }

    pub fn is_exempt(&self, feature: &str) -> bool {
        self.exempt_features.iter().any(|f| f == feature)
    }
}
