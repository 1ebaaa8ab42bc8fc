//! Execution backend seam
//!
//! The client hands an [`ExecutionRequest`] to an [`ExecutionBackend`] and
//! gets back a raw byte stream plus its encoding. [`HttpBackend`] is the
//! production implementation; tests plug in in-memory backends.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};

use super::frames::FrameEncoding;
use crate::error::StreamError;
use crate::variables::Criteria;

/// Path appended to the configured endpoint
pub const STREAM_PATH: &str = "/query/stream";

/// Request body sent to the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub query: String,
    pub criteria: Criteria,
    pub connection_id: String,
    pub session_id: String,
}

pub type ByteStream = BoxStream<'static, Result<Bytes, StreamError>>;

/// An opened response body and how to decode it
pub struct FrameSource {
    pub encoding: FrameEncoding,
    pub body: ByteStream,
}

impl std::fmt::Debug for FrameSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSource")
            .field("encoding", &self.encoding)
            .finish_non_exhaustive()
    }
}

/// Something that can run a query and stream its result back
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Submit the request and return the response body once headers arrive
    async fn open(&self, request: &ExecutionRequest) -> Result<FrameSource, StreamError>;
}

/// HTTP backend: POSTs JSON to `<endpoint>/query/stream`
pub struct HttpBackend {
    client: Client,
    url: String,
    request_timeout: Duration,
}

impl HttpBackend {
    pub fn new(endpoint: &str, request_timeout: Duration) -> Result<Self, StreamError> {
        let client = Client::builder().connect_timeout(request_timeout).build()?;
        Ok(Self::with_client(client, endpoint, request_timeout))
    }

    pub fn with_client(client: Client, endpoint: &str, request_timeout: Duration) -> Self {
        Self {
            client,
            url: format!("{}{}", endpoint.trim_end_matches('/'), STREAM_PATH),
            request_timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ExecutionBackend for HttpBackend {
    async fn open(&self, request: &ExecutionRequest) -> Result<FrameSource, StreamError> {
        tracing::debug!(url = %self.url, connection_id = %request.connection_id, "opening result stream");

        // Only the wait for response headers is bounded; the body may stream
        // for as long as the query runs.
        let response = tokio::time::timeout(
            self.request_timeout,
            self.client.post(&self.url).json(request).send(),
        )
        .await
        .map_err(|_| StreamError::Timeout(self.request_timeout))??;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let encoding = FrameEncoding::from_content_type(
            response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok()),
        );
        tracing::debug!(?encoding, "result stream opened");

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(StreamError::from))
            .boxed();
        Ok(FrameSource { encoding, body })
    }
}
