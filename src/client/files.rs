//! File service client
//!
//! Files are grouped by domain: an assistant name for the upload screen, or a
//! thread id for files sent along with a conversation.

use reqwest::{multipart::Form, Client, Url};
use serde::Deserialize;

use super::attachment::Attachment;
use super::{check_status, endpoint, ClientError};

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FilesClient {
    client: Client,
    base_url: Url,
}

impl FilesClient {
    pub fn new(client: Client, base_url: &str) -> Result<Self, ClientError> {
        let base_url =
            Url::parse(base_url).map_err(|e| ClientError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        Ok(Self { client, base_url })
    }

    pub async fn list(&self, domain: &str) -> Result<Vec<String>, ClientError> {
        let url = endpoint(&self.base_url, &["files", domain])?;
        let response = check_status(self.client.get(url).send().await?).await?;
        let list: FileList = response.json().await?;
        Ok(list.files)
    }

    pub async fn upload(&self, domain: &str, attachment: &Attachment) -> Result<(), ClientError> {
        let url = endpoint(&self.base_url, &["upload"])?;
        let form = Form::new()
            .part("file", attachment.to_part()?)
            .text("domain", domain.to_string());

        check_status(self.client.post(url).multipart(form).send().await?).await?;
        tracing::info!("Uploaded {} to {}", attachment.file_name, domain);
        Ok(())
    }

    pub async fn delete(&self, domain: &str, file_name: &str) -> Result<(), ClientError> {
        let url = endpoint(&self.base_url, &["files", domain, file_name])?;
        check_status(self.client.delete(url).send().await?).await?;
        Ok(())
    }

    /// Remove every file held for a domain
    pub async fn clear(&self, domain: &str) -> Result<(), ClientError> {
        let url = endpoint(&self.base_url, &["files", domain])?;
        check_status(self.client.delete(url).send().await?).await?;
        Ok(())
    }
}
