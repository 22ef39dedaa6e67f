//! Application configuration

pub mod portal;

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use portal::{AssistantConfig, ConfigError, PortalConfig, RequestFormat, UploadsConfig};

/// Process-level settings read from the environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Optional TOML file describing the assistant catalog
    pub portal_config: Option<PathBuf>,
    /// Default base URL for assistants that don't set their own
    pub api_url: String,
    /// Base URL of the file service
    pub upload_url: String,
    /// Assistant selected when none is given on the command line
    pub assistant: String,
    pub connect_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            portal_config: env::var("PORTAL_CONFIG").ok().map(PathBuf::from),
            api_url: env::var("PORTAL_API_URL").unwrap_or_else(|_| "http://localhost:2024".into()),
            upload_url: env::var("PORTAL_UPLOAD_URL")
                .unwrap_or_else(|_| "http://localhost:5000".into()),
            assistant: env::var("PORTAL_ASSISTANT").unwrap_or_else(|_| "energy".into()),
            connect_timeout_secs: env::var("PORTAL_CONNECT_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
        })
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Load the assistant catalog: the configured TOML file, or the built-in one
    pub fn load_portal(&self) -> Result<PortalConfig, ConfigError> {
        let mut portal = match &self.portal_config {
            Some(path) => PortalConfig::from_file(path)?,
            None => PortalConfig::builtin(),
        };
        if portal.uploads.base_url.is_none() {
            portal.uploads.base_url = Some(self.upload_url.clone());
        }
        Ok(portal)
    }
}
