//! Edit backends: forward to an upstream HTTP service, or refuse.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{EditBackend, EditRequest, EditResponse};
use crate::error::{EditGateError, Result};
use crate::http::iso_timestamp;

/// Forwards edit requests as JSON to an upstream image-editing service.
#[derive(Debug, Clone)]
pub struct ForwardingBackend {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl ForwardingBackend {
    /// Create a backend posting to `url`, giving up after `timeout`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            timeout,
        })
    }

    /// Upstream endpoint edits are posted to.
    pub fn url(&self) -> &str {
        &self.url
    }

    fn upstream_error(&self, err: reqwest::Error) -> EditGateError {
        if err.is_timeout() {
            EditGateError::Timeout(self.timeout.as_millis() as u64)
        } else {
            EditGateError::from(err)
        }
    }
}

#[async_trait]
impl EditBackend for ForwardingBackend {
    async fn edit(&self, request: &EditRequest) -> Result<EditResponse> {
        debug!(
            url = %self.url,
            summary_len = request.change_summary.len(),
            "Forwarding edit request upstream"
        );

        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| self.upstream_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "Upstream edit service returned an error");
            return Err(EditGateError::Backend(format!(
                "upstream returned {}: {}",
                status, body
            )));
        }

        let mut edit: EditResponse = response
            .json()
            .await
            .map_err(|e| self.upstream_error(e))?;
        if edit.timestamp.is_empty() {
            edit.timestamp = iso_timestamp();
        }
        Ok(edit)
    }
}

/// Backend used when no upstream is configured. Every edit fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableBackend;

#[async_trait]
impl EditBackend for UnavailableBackend {
    async fn edit(&self, _request: &EditRequest) -> Result<EditResponse> {
        Err(EditGateError::Backend(
            "no upstream edit service is configured".to_string(),
        ))
    }
}
