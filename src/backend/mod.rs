//! The protected downstream edit operation.
//!
//! The admission gate only needs to know whether an edit succeeded; the
//! actual image model lives behind [`EditBackend`].

mod forwarding;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use forwarding::{ForwardingBackend, UnavailableBackend};

/// An image edit request as posted by the browser.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditRequest {
    /// Source image, either a URL or a `data:` URL
    #[serde(default)]
    pub image_url: String,
    /// Natural-language description of the change
    #[serde(default)]
    pub change_summary: String,
}

impl EditRequest {
    /// Check that both fields are present.
    pub fn validate(&self) -> std::result::Result<(), &'static str> {
        if self.image_url.trim().is_empty() || self.change_summary.trim().is_empty() {
            return Err("Image URL and change summary are required");
        }
        Ok(())
    }
}

/// Result of an edit, passed through to the browser.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditResponse {
    pub ok: bool,
    /// Primary edited image as a data URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited: Option<String>,
    /// How the result was produced
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub generated_images: Vec<String>,
    /// Text returned alongside the image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default)]
    pub timestamp: String,
}

/// The operation guarded by the admission controller.
#[async_trait]
pub trait EditBackend: Send + Sync {
    /// Perform one edit. Any error counts as a downstream failure.
    async fn edit(&self, request: &EditRequest) -> Result<EditResponse>;
}
