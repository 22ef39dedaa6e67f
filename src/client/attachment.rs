//! Files staged for upload alongside a turn

use std::path::Path;

use reqwest::multipart::Part;
use tokio::fs;

use crate::config::UploadsConfig;

#[derive(Debug, thiserror::Error)]
pub enum AttachmentError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Path has no file name: {0}")]
    NoFileName(String),

    #[error("File type not accepted: {0}")]
    Extension(String),

    #[error("File too large: {name} is {size} bytes (max {max})")]
    TooLarge { name: String, size: u64, max: u64 },
}

/// An in-memory file ready to be sent as a multipart part
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub file_name: String,
    pub mime: String,
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn new(file_name: impl Into<String>, data: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let mime = mime_for(&file_name);
        Self {
            file_name,
            mime,
            data,
        }
    }

    /// Read a file from disk, rejecting it early if the upload policy says no
    pub async fn from_path(path: &Path, policy: &UploadsConfig) -> Result<Self, AttachmentError> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| AttachmentError::NoFileName(path.display().to_string()))?
            .to_string();

        check_extension(&file_name, policy)?;

        // Size check before reading the whole thing into memory
        let size = fs::metadata(path).await?.len();
        check_size(&file_name, size, policy)?;

        let data = fs::read(path).await?;
        Ok(Self::new(file_name, data))
    }

    pub fn is_image(&self) -> bool {
        self.mime.starts_with("image/")
    }

    pub(crate) fn to_part(&self) -> Result<Part, reqwest::Error> {
        Part::bytes(self.data.clone())
            .file_name(self.file_name.clone())
            .mime_str(&self.mime)
    }
}

fn extension(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn mime_for(file_name: &str) -> String {
    mime_guess::from_path(file_name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

fn check_extension(file_name: &str, policy: &UploadsConfig) -> Result<(), AttachmentError> {
    let allowed = extension(file_name).map_or(false, |ext| {
        policy
            .allowed_extensions
            .iter()
            .any(|a| a.trim_start_matches('.').eq_ignore_ascii_case(&ext))
    });

    if allowed {
        Ok(())
    } else {
        Err(AttachmentError::Extension(file_name.to_string()))
    }
}

fn check_size(file_name: &str, size: u64, policy: &UploadsConfig) -> Result<(), AttachmentError> {
    let max = if mime_for(file_name).starts_with("image/") {
        policy.max_image_size
    } else {
        policy.max_document_size
    };

    if size > max {
        return Err(AttachmentError::TooLarge {
            name: file_name.to_string(),
            size,
            max,
        });
    }
    Ok(())
}
