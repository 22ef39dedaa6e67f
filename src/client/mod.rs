//! HTTP clients for assistant backends and the file service

pub mod attachment;
pub mod files;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use reqwest::header::ACCEPT;
use reqwest::multipart::Form;
use reqwest::{Client, Response, Url};
use serde::Serialize;
use thiserror::Error;

use crate::config::{AssistantConfig, Config, PortalConfig, RequestFormat};
use crate::conversation::ThreadId;

pub use attachment::{Attachment, AttachmentError};
pub use files::FilesClient;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Body of a run, chunked as it arrives off the wire
pub type ChunkStream = BoxStream<'static, Result<Bytes, ClientError>>;

/// One user turn as sent to the backend
#[derive(Debug, Clone, Default)]
pub struct Turn {
    pub message: String,
    pub attachments: Vec<Attachment>,
}

/// The backend a conversation session talks to
#[async_trait]
pub trait AssistantBackend: Send + Sync {
    /// Post a turn and return the response body once headers arrive.
    /// Non-2xx statuses are errors.
    async fn open_run(&self, thread: &ThreadId, turn: &Turn) -> Result<ChunkStream, ClientError>;

    /// Drop whatever files the server holds for a thread
    async fn clear_thread_files(&self, thread: &ThreadId) -> Result<(), ClientError>;

    fn accepts_attachments(&self) -> bool {
        true
    }
}

#[derive(Debug, Serialize)]
struct RunRequest<'a> {
    messages: Vec<RunMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct RunMessage<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    content: &'a str,
}

/// reqwest-backed client for one assistant
#[derive(Debug, Clone)]
pub struct AssistantClient {
    client: Client,
    base_url: Url,
    format: RequestFormat,
    files: FilesClient,
}

impl AssistantClient {
    pub fn new(
        client: Client,
        base_url: &str,
        format: RequestFormat,
        files: FilesClient,
    ) -> Result<Self, ClientError> {
        let base_url =
            Url::parse(base_url).map_err(|e| ClientError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        Ok(Self {
            client,
            base_url,
            format,
            files,
        })
    }

    /// Build a client for a catalog entry, sharing one connection pool with
    /// the file service client
    pub fn from_config(
        config: &Config,
        portal: &PortalConfig,
        assistant: &AssistantConfig,
    ) -> Result<Self, ClientError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;

        let upload_url = portal
            .uploads
            .base_url
            .as_deref()
            .unwrap_or(&config.upload_url);
        let files = FilesClient::new(client.clone(), upload_url)?;

        let base_url = assistant.base_url.as_deref().unwrap_or(&config.api_url);
        Self::new(client, base_url, assistant.format, files)
    }

    pub fn files(&self) -> &FilesClient {
        &self.files
    }
}

#[async_trait]
impl AssistantBackend for AssistantClient {
    async fn open_run(&self, thread: &ThreadId, turn: &Turn) -> Result<ChunkStream, ClientError> {
        let url = endpoint(
            &self.base_url,
            &["threads", thread.as_str(), "runs", "stream"],
        )?;
        let request = self.client.post(url).header(ACCEPT, "text/event-stream");

        let request = match self.format {
            RequestFormat::Json => {
                if !turn.attachments.is_empty() {
                    return Err(ClientError::InvalidRequest(
                        "this assistant does not accept attachments".to_string(),
                    ));
                }
                request.json(&RunRequest {
                    messages: vec![RunMessage {
                        kind: "human",
                        content: &turn.message,
                    }],
                })
            }
            RequestFormat::Multipart => {
                let mut form = Form::new().text("message", turn.message.clone());
                for attachment in &turn.attachments {
                    form = form.part("files", attachment.to_part()?);
                }
                request.multipart(form)
            }
        };

        tracing::info!(
            "Starting run on {} ({} attachment(s))",
            thread,
            turn.attachments.len()
        );
        let response = check_status(request.send().await?).await?;

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ClientError::from))
            .boxed())
    }

    async fn clear_thread_files(&self, thread: &ThreadId) -> Result<(), ClientError> {
        self.files.clear(thread.as_str()).await
    }

    fn accepts_attachments(&self) -> bool {
        self.format == RequestFormat::Multipart
    }
}

/// Append percent-encoded path segments to a base URL
pub(crate) fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, ClientError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| ClientError::InvalidUrl(base.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

pub(crate) async fn check_status(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Status {
        status: status.as_u16(),
        body,
    })
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{MessageId, Update};
    use crate::stream;
    use test_support::spawn;

    use std::sync::Arc;

    use axum::{
        body::{Body, Bytes as AxumBytes},
        extract::{Path, State},
        http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
        response::{IntoResponse, Response as AxumResponse},
        routing::post,
        Router,
    };
    use parking_lot::Mutex;

    #[derive(Debug, Clone, Default)]
    struct Seen {
        thread: String,
        content_type: String,
        body: String,
    }

    type Recorder = Arc<Mutex<Vec<Seen>>>;

    const SSE_CHUNKS: [&str; 4] = [
        "data: {\"type\":\"assistant\",\"id\":5,\"con",
        "tent\":\"Your balance\"}\n\ndata: {\"type\":\"assistant\",\"id\":5,",
        "\"content\":\"Your balance is €42\"}\n\n",
        "data: [DONE]\n\n",
    ];

    async fn run_stream(
        State(seen): State<Recorder>,
        Path(thread): Path<String>,
        headers: HeaderMap,
        body: AxumBytes,
    ) -> AxumResponse {
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        seen.lock().push(Seen {
            thread: thread.clone(),
            content_type,
            body: String::from_utf8_lossy(&body).into_owned(),
        });

        if thread == "thread_broken" {
            return (StatusCode::INTERNAL_SERVER_ERROR, "agent unavailable").into_response();
        }

        let chunks = SSE_CHUNKS
            .into_iter()
            .map(|c| Ok::<_, std::io::Error>(AxumBytes::from_static(c.as_bytes())));
        (
            [(CONTENT_TYPE, "text/event-stream")],
            Body::from_stream(futures::stream::iter(chunks)),
        )
            .into_response()
    }

    async fn fixture(format: RequestFormat) -> (AssistantClient, Recorder) {
        let seen: Recorder = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route("/threads/:thread/runs/stream", post(run_stream))
            .with_state(seen.clone());
        let base = spawn(app).await;

        let client = Client::new();
        let files = FilesClient::new(client.clone(), &base).unwrap();
        (
            AssistantClient::new(client, &base, format, files).unwrap(),
            seen,
        )
    }

    async fn drain(chunks: ChunkStream) -> Vec<Update> {
        stream::updates(chunks)
            .map(|u| u.unwrap())
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_json_run_streams_updates() {
        let (client, seen) = fixture(RequestFormat::Json).await;
        let turn = Turn {
            message: "What is my balance?".to_string(),
            attachments: vec![],
        };

        let chunks = client.open_run(&ThreadId::from("thread_1"), &turn).await.unwrap();
        let updates = drain(chunks).await;

        assert_eq!(
            updates.last(),
            Some(&Update::Assistant {
                id: Some(MessageId(5)),
                content: "Your balance is €42".to_string(),
            })
        );

        let seen = seen.lock();
        assert_eq!(seen[0].thread, "thread_1");
        assert_eq!(seen[0].content_type, "application/json");
        let body: serde_json::Value = serde_json::from_str(&seen[0].body).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"messages": [{"type": "human", "content": "What is my balance?"}]})
        );
    }

    #[tokio::test]
    async fn test_multipart_run_sends_files() {
        let (client, seen) = fixture(RequestFormat::Multipart).await;
        let turn = Turn {
            message: "Summarise this".to_string(),
            attachments: vec![Attachment::new("bill.pdf", b"%PDF-1.4".to_vec())],
        };

        let chunks = client.open_run(&ThreadId::from("thread_2"), &turn).await.unwrap();
        assert_eq!(drain(chunks).await.len(), 2);

        let seen = seen.lock();
        assert!(seen[0].content_type.starts_with("multipart/form-data"));
        assert!(seen[0].body.contains("name=\"message\""));
        assert!(seen[0].body.contains("Summarise this"));
        assert!(seen[0].body.contains("filename=\"bill.pdf\""));
        assert!(seen[0].body.contains("application/pdf"));
    }

    #[tokio::test]
    async fn test_error_status() {
        let (client, _) = fixture(RequestFormat::Multipart).await;
        let result = client
            .open_run(&ThreadId::from("thread_broken"), &Turn::default())
            .await;

        match result {
            Err(ClientError::Status { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "agent unavailable");
            }
            other => panic!("expected status error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_json_assistant_refuses_attachments() {
        let (client, seen) = fixture(RequestFormat::Json).await;
        assert!(!client.accepts_attachments());

        let turn = Turn {
            message: "hi".to_string(),
            attachments: vec![Attachment::new("a.txt", vec![])],
        };
        let result = client.open_run(&ThreadId::from("thread_3"), &turn).await;
        assert!(matches!(result, Err(ClientError::InvalidRequest(_))));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_endpoint_encodes_segments() {
        let base = Url::parse("http://localhost:2024/api/").unwrap();
        let url = endpoint(&base, &["threads", "a b/c", "runs", "stream"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:2024/api/threads/a%20b%2Fc/runs/stream");
    }
}
