//! Text recognition adapter
//!
//! Sends flyer images to an external text-detection service and returns the
//! aggregate recognized text. The wire protocol lives in [`vision`]; the
//! [`VisionTransport`] trait is the seam between request shaping and the network.

pub mod vision;

use crate::config::Config;
use crate::error::FlyerError;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use vision::{AnnotateRequest, AnnotateResponse, HttpVisionTransport};

static DATA_URI_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^data:image/\w+;base64,").unwrap());

/// Full recognized text block for one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognizedText {
    pub text: String,
}

/// Trait that all text-detection backends must implement
#[async_trait]
pub trait VisionTransport: Send + Sync {
    /// Returns the transport identifier (e.g., "google-vision")
    fn name(&self) -> &'static str;

    /// Send one annotate request and return the decoded response
    async fn annotate(
        &self,
        api_key: &str,
        request: &AnnotateRequest,
    ) -> Result<AnnotateResponse, FlyerError>;
}

/// Turns image bytes into recognized text via a [`VisionTransport`].
///
/// Makes a single attempt per call. Retrying is left to the caller.
pub struct TextRecognizer {
    transport: Arc<dyn VisionTransport>,
    api_key: Option<String>,
}

impl TextRecognizer {
    /// Create a recognizer backed by the HTTP transport described by `config`
    pub fn new(config: &Config) -> Result<Self, FlyerError> {
        let transport = HttpVisionTransport::new(&config.vision_endpoint, config.request_timeout)?;
        tracing::info!(
            "Text recognition via {} ({})",
            transport.name(),
            config.vision_endpoint
        );
        Ok(Self::with_transport(
            Arc::new(transport),
            config.vision_api_key.clone(),
        ))
    }

    pub fn with_transport(transport: Arc<dyn VisionTransport>, api_key: Option<String>) -> Self {
        Self { transport, api_key }
    }

    /// Whether a credential is available
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Recognize the text in an image.
    ///
    /// A missing credential fails with [`FlyerError::Configuration`] before any
    /// request is built. A successful call without annotations fails with
    /// [`FlyerError::NoTextDetected`].
    pub async fn recognize_text(&self, image: &[u8]) -> Result<RecognizedText, FlyerError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            FlyerError::Configuration("Google Cloud Vision API key not configured".to_string())
        })?;

        let request = AnnotateRequest::text_detection(STANDARD.encode(image));
        let response = self.transport.annotate(api_key, &request).await?;

        let text = response.full_text()?.ok_or(FlyerError::NoTextDetected)?;
        tracing::debug!("Recognized {} chars of text", text.len());

        Ok(RecognizedText { text })
    }
}

/// Remove a `data:image/<fmt>;base64,` prefix, if any.
pub fn strip_data_uri_prefix(payload: &str) -> &str {
    match DATA_URI_PREFIX.find(payload) {
        Some(prefix) => &payload[prefix.end()..],
        None => payload,
    }
}

/// Decode a base64 image payload, with or without a data-URI prefix.
pub fn decode_image_payload(payload: &str) -> Result<Vec<u8>, FlyerError> {
    STANDARD
        .decode(strip_data_uri_prefix(payload.trim()))
        .map_err(|e| FlyerError::InvalidRequest(format!("Invalid base64 image: {}", e)))
}
