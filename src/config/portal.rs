//! Assistant catalog loaded from TOML files
//!
//! The portal fronts several assistant backends. Each entry names one
//! backend, where it lives and how it expects a turn to be posted.
//!
//! # Configuration
//!
//! ```toml
//! [uploads]
//! base_url = "http://localhost:5000"
//! allowed_extensions = ["pdf", "png", "jpg"]
//!
//! [[assistants]]
//! id = "energy"
//! name = "Energy Assistant"
//! base_url = "http://localhost:2024"
//! format = "json"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// How a turn is encoded in the run-stream request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RequestFormat {
    /// `message` field plus one `files` part per attachment
    #[default]
    Multipart,
    /// `{ "messages": [{ "type": "human", "content": ... }] }`, no attachments
    Json,
}

/// Root portal configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalConfig {
    #[serde(default)]
    pub uploads: UploadsConfig,

    pub assistants: Vec<AssistantConfig>,
}

/// One assistant backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Falls back to `PORTAL_API_URL` when absent
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub format: RequestFormat,
}

/// File upload settings. Checked client-side only as a courtesy; the
/// server makes the final call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadsConfig {
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_extensions")]
    pub allowed_extensions: Vec<String>,

    #[serde(default = "default_max_image_size")]
    pub max_image_size: u64,

    #[serde(default = "default_max_document_size")]
    pub max_document_size: u64,
}

fn default_extensions() -> Vec<String> {
    [
        "pdf", "docx", "csv", "txt", "html", "md", "jpg", "jpeg", "png", "gif", "webp",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_max_image_size() -> u64 {
    3_932_160 // 3.75 MiB
}

fn default_max_document_size() -> u64 {
    4_718_592 // 4.5 MiB
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            allowed_extensions: default_extensions(),
            max_image_size: default_max_image_size(),
            max_document_size: default_max_document_size(),
        }
    }
}

impl PortalConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: PortalConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// The five assistants the portal ships with
    pub fn builtin() -> Self {
        let entry = |id: &str, name: &str, description: &str, format| AssistantConfig {
            id: id.to_string(),
            name: name.to_string(),
            description: Some(description.to_string()),
            base_url: None,
            format,
        };

        Self {
            uploads: UploadsConfig::default(),
            assistants: vec![
                entry(
                    "energy",
                    "Energy Assistant",
                    "Bills, account info and new connections",
                    RequestFormat::Json,
                ),
                entry(
                    "internal",
                    "Internal Assistant",
                    "Questions about internal documents",
                    RequestFormat::Multipart,
                ),
                entry(
                    "external",
                    "External Assistant",
                    "Customer-facing questions",
                    RequestFormat::Multipart,
                ),
                entry(
                    "finance",
                    "Finance Assistant",
                    "Statements, invoices and mortgage questions",
                    RequestFormat::Multipart,
                ),
                entry(
                    "data-insights",
                    "Data Insights",
                    "Ask questions about uploaded data files",
                    RequestFormat::Multipart,
                ),
            ],
        }
    }

    pub fn assistant(&self, id: &str) -> Option<&AssistantConfig> {
        self.assistants.iter().find(|a| a.id == id)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.assistants.is_empty() {
            return Err(ConfigError::Validation(
                "at least one [[assistants]] entry is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for assistant in &self.assistants {
            if assistant.id.trim().is_empty() {
                return Err(ConfigError::Validation("assistant id must not be empty".to_string()));
            }
            if !seen.insert(assistant.id.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate assistant id: {}",
                    assistant.id
                )));
            }
        }

        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_CONFIG: &str = r#"
[uploads]
base_url = "http://files.internal:5000"
allowed_extensions = ["pdf", "csv"]

[[assistants]]
id = "energy"
name = "Energy Assistant"
base_url = "http://energy.internal:2024"
format = "json"

[[assistants]]
id = "finance"
name = "Finance"
description = "Mortgage and statements"
"#;

    #[test]
    fn test_parse_config() {
        let config = PortalConfig::from_str(SAMPLE_CONFIG).unwrap();

        assert_eq!(config.assistants.len(), 2);
        assert_eq!(
            config.uploads.base_url.as_deref(),
            Some("http://files.internal:5000")
        );
        assert_eq!(config.uploads.allowed_extensions, vec!["pdf", "csv"]);
        assert_eq!(config.uploads.max_image_size, 3_932_160);

        let energy = config.assistant("energy").unwrap();
        assert_eq!(energy.format, RequestFormat::Json);
        assert_eq!(energy.base_url.as_deref(), Some("http://energy.internal:2024"));

        let finance = config.assistant("finance").unwrap();
        assert_eq!(finance.format, RequestFormat::Multipart); // Default
        assert!(finance.base_url.is_none());
        assert!(config.assistant("missing").is_none());
    }

    #[test]
    fn test_rejects_duplicates_and_empty_catalog() {
        let dup = r#"
[[assistants]]
id = "a"
name = "A"

[[assistants]]
id = "a"
name = "Again"
"#;
        assert!(matches!(
            PortalConfig::from_str(dup),
            Err(ConfigError::Validation(_))
        ));
        assert!(matches!(
            PortalConfig::from_str("assistants = []"),
            Err(ConfigError::Validation(_))
        ));
        assert!(matches!(
            PortalConfig::from_str("[uploads]"),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn test_builtin_catalog() {
        let config = PortalConfig::builtin();
        assert!(config.validate().is_ok());
        let ids: Vec<&str> = config.assistants.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["energy", "internal", "external", "finance", "data-insights"]);
        assert_eq!(config.assistant("energy").unwrap().format, RequestFormat::Json);
    }
}
