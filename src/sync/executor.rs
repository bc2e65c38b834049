//! Remote mutation executor boundary
//!
//! The engine never talks to the network directly; it hands each queued
//! action to a [`RemoteExecutor`], which performs the one network call that
//! action kind maps to and reports the outcome through [`RemoteError`]'s
//! transient/permanent classification. [`HttpRemoteExecutor`] is the bundled
//! implementation against the campus REST API.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

use crate::error::RemoteError;
use crate::models::ActionKind;

/// Remote executor boundary, implemented by the embedder or the bundled
/// HTTP executor
///
/// One call per action; the error carries its own transient/permanent
/// classification.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Perform the network call for one queued action
    async fn execute(&self, kind: ActionKind, payload: &[u8]) -> Result<(), RemoteError>;
}

/// HTTP implementation of the remote executor
///
/// Posts the opaque action payload to one endpoint per action kind and
/// classifies the response status per the failure taxonomy.
#[derive(Debug, Clone)]
pub struct HttpRemoteExecutor {
    client: Client,
    base_url: String,
}

impl HttpRemoteExecutor {
    /// Create a new executor against the given API base URL
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(request_timeout)
                .build()
                .expect("Failed to create HTTP client"),
            base_url: base_url.into(),
        }
    }

    /// Create an executor with a custom reqwest Client
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Endpoint path for an action kind
    ///
    /// Exhaustive on purpose: a new kind does not compile until it gets an
    /// endpoint.
    fn endpoint(kind: ActionKind) -> &'static str {
        match kind {
            ActionKind::MarkAttendance => "/api/v1/attendance",
            ActionKind::SubmitAssignment => "/api/v1/submissions",
            ActionKind::SendMessage => "/api/v1/messages",
        }
    }
}

#[async_trait]
impl RemoteExecutor for HttpRemoteExecutor {
    async fn execute(&self, kind: ActionKind, payload: &[u8]) -> Result<(), RemoteError> {
        let url = format!("{}{}", self.base_url, Self::endpoint(kind));
        debug!(kind = %kind, url = %url, "Executing remote action");

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload.to_vec())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RemoteError::Timeout
                } else if e.is_connect() {
                    RemoteError::ConnectionRefused
                } else {
                    RemoteError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        match status {
            s if s.is_success() => Ok(()),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(60);
                Err(RemoteError::RateLimited(retry_after))
            }
            s if s.is_server_error() => Err(RemoteError::ServerError(s.as_u16())),
            s => Err(RemoteError::Rejected(s.as_u16())),
        }
    }
}
