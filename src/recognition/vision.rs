//! Google Cloud Vision `images:annotate` wire format and HTTP transport

use super::VisionTransport;
use crate::error::FlyerError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const TEXT_DETECTION: &str = "TEXT_DETECTION";

#[derive(Debug, Serialize)]
pub struct AnnotateRequest {
    requests: Vec<ImageRequest>,
}

#[derive(Debug, Serialize)]
struct ImageRequest {
    image: ImageContent,
    features: Vec<Feature>,
}

#[derive(Debug, Serialize)]
struct ImageContent {
    content: String,
}

#[derive(Debug, Serialize)]
struct Feature {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(rename = "maxResults")]
    max_results: u32,
}

impl AnnotateRequest {
    /// Build a text-detection request for one base64-encoded image
    pub fn text_detection(content: String) -> Self {
        Self {
            requests: vec![ImageRequest {
                image: ImageContent { content },
                features: vec![Feature {
                    kind: TEXT_DETECTION,
                    max_results: 1,
                }],
            }],
        }
    }

    #[cfg(test)]
    pub fn image_content(&self) -> &str {
        self.requests
            .first()
            .map(|r| r.image.content.as_str())
            .unwrap_or_default()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<ImageResponse>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageResponse {
    #[serde(default)]
    text_annotations: Vec<TextAnnotation>,
    error: Option<Status>,
}

#[derive(Debug, Deserialize)]
struct TextAnnotation {
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct Status {
    #[serde(default)]
    message: String,
}

impl AnnotateResponse {
    /// The aggregate text of the first image.
    ///
    /// The first annotation holds the whole text block; the rest are per-word
    /// boxes and are ignored. `Ok(None)` means the call succeeded but returned
    /// no annotations; a blank description is still returned as-is.
    pub fn full_text(&self) -> Result<Option<String>, FlyerError> {
        let Some(first) = self.responses.first() else {
            return Ok(None);
        };
        if let Some(status) = &first.error {
            return Err(FlyerError::Transport(format!(
                "Vision API error: {}",
                status.message
            )));
        }
        Ok(first
            .text_annotations
            .first()
            .map(|annotation| annotation.description.clone()))
    }
}

/// Vision transport over HTTPS
pub struct HttpVisionTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpVisionTransport {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, FlyerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                FlyerError::Initialization(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }
}

#[async_trait]
impl VisionTransport for HttpVisionTransport {
    fn name(&self) -> &'static str {
        "google-vision"
    }

    async fn annotate(
        &self,
        api_key: &str,
        request: &AnnotateRequest,
    ) -> Result<AnnotateResponse, FlyerError> {
        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("key", api_key)])
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!("Vision API returned {}", status);
            return Err(FlyerError::Transport(format!("Vision API error: {}", body)));
        }

        response.json::<AnnotateResponse>().await.map_err(|e| {
            FlyerError::Transport(format!("Failed to decode Vision API response: {}", e))
        })
    }
}
