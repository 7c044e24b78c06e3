use crate::comparison::{normalize_image_url, ComparisonFetcher, ComparisonResult};
use crate::config::Config;
use crate::error::FlyerError;
use crate::extraction::{extract_products, CandidateProduct};
use crate::recognition::{decode_image_payload, RecognizedText, TextRecognizer};
use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, State},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub recognizer: Arc<TextRecognizer>,
    pub fetcher: Arc<ComparisonFetcher>,
    pub config: Arc<Config>,
}

/// Result of analyzing one flyer image
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub products: Option<Vec<CandidateProduct>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl AnalyzeResponse {
    fn failure(err: &FlyerError) -> Self {
        Self {
            success: false,
            full_text: None,
            products: None,
            error: Some(err.to_string()),
            code: Some(err.code().to_string()),
        }
    }
}

impl From<Result<RecognizedText, FlyerError>> for AnalyzeResponse {
    fn from(result: Result<RecognizedText, FlyerError>) -> Self {
        match result {
            Ok(recognized) => {
                let products = extract_products(&recognized.text);
                Self {
                    success: true,
                    full_text: Some(recognized.text),
                    products: Some(products),
                    error: None,
                    code: None,
                }
            }
            Err(err) => Self::failure(&err),
        }
    }
}

/// Result of a competitor price lookup
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompareResponse {
    pub success: bool,
    /// `null` when the page matched no price selector
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Option<u64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secure_image_url: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl From<Result<ComparisonResult, FlyerError>> for CompareResponse {
    fn from(result: Result<ComparisonResult, FlyerError>) -> Self {
        match result {
            Ok(found) => Self {
                success: true,
                price: Some(found.price),
                secure_image_url: Some(found.image_url.as_deref().map(normalize_image_url)),
                image_url: Some(found.image_url),
                error: None,
                code: None,
            },
            Err(err) => Self {
                success: false,
                price: None,
                image_url: None,
                secure_image_url: None,
                error: Some(err.to_string()),
                code: Some(err.code().to_string()),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeBase64Request {
    pub image: String,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ExtractRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct ExtractResponse {
    pub success: bool,
    pub products: Vec<CandidateProduct>,
}

#[derive(Debug, Deserialize)]
pub struct CompareRequest {
    pub url: String,
    pub timeout_ms: Option<u64>,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Server info response
#[derive(Serialize)]
pub struct InfoResponse {
    pub version: String,
    pub recognition_configured: bool,
    pub max_file_size_bytes: usize,
    pub endpoints: Vec<String>,
}

/// Run the HTTP server
pub async fn run(config: Config) -> anyhow::Result<()> {
    let recognizer = TextRecognizer::new(&config)?;
    let fetcher = ComparisonFetcher::new(config.request_timeout)?;
    let addr = format!("{}:{}", config.host, config.port);

    let state = AppState {
        recognizer: Arc::new(recognizer),
        fetcher: Arc::new(fetcher),
        config: Arc::new(config),
    };

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app(state)).await?;

    Ok(())
}

/// Room for multipart framing and JSON fields around an encoded image
const BODY_OVERHEAD: usize = 64 * 1024;

/// Body limit that still lets a `max_file_size` image through as base64.
///
/// Images within this limit but over `max_file_size` are refused by
/// `validate_image` with `ImageTooLarge`.
pub fn body_limit(max_file_size: usize) -> usize {
    (max_file_size / 3 * 4 + 4).saturating_add(BODY_OVERHEAD)
}

/// Build the router
pub fn app(state: AppState) -> Router {
    let body_limit = body_limit(state.config.max_file_size);

    Router::new()
        .route("/analyze", post(handle_analyze))
        .route("/analyze/base64", post(handle_analyze_base64))
        .route("/analyze/batch", post(handle_analyze_batch))
        .route("/extract", post(handle_extract))
        .route("/compare", post(handle_compare))
        .route("/health", get(handle_health))
        .route("/info", get(handle_info))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Handle a single-image multipart upload
async fn handle_analyze(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<AnalyzeResponse>, FlyerError> {
    let files = read_image_fields(&state, multipart).await?;
    let image = files.into_iter().next().ok_or(FlyerError::MissingFile)?;

    Ok(Json(analyze(&state, &image, None).await))
}

/// Handle a base64 (optionally data-URI) image payload
async fn handle_analyze_base64(
    State(state): State<AppState>,
    payload: Result<Json<AnalyzeBase64Request>, JsonRejection>,
) -> Result<Json<AnalyzeResponse>, FlyerError> {
    let Json(request) = json_body(&state, payload)?;
    let image = decode_image_payload(&request.image)?;
    validate_image(&state, &image)?;

    let timeout = request.timeout_ms.map(Duration::from_millis);
    Ok(Json(analyze(&state, &image, timeout).await))
}

/// Handle a multi-image flyer; images are recognized concurrently
async fn handle_analyze_batch(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<Vec<AnalyzeResponse>>, FlyerError> {
    let files = read_image_fields(&state, multipart).await?;
    if files.is_empty() {
        return Err(FlyerError::MissingFile);
    }

    let responses =
        futures::future::join_all(files.iter().map(|image| analyze(&state, image, None))).await;

    Ok(Json(responses))
}

/// Re-run extraction over (possibly corrected) recognized text
async fn handle_extract(
    State(state): State<AppState>,
    payload: Result<Json<ExtractRequest>, JsonRejection>,
) -> Result<Json<ExtractResponse>, FlyerError> {
    let Json(request) = json_body(&state, payload)?;

    Ok(Json(ExtractResponse {
        success: true,
        products: extract_products(&request.text),
    }))
}

/// Handle competitor price lookups
async fn handle_compare(
    State(state): State<AppState>,
    payload: Result<Json<CompareRequest>, JsonRejection>,
) -> Result<Json<CompareResponse>, FlyerError> {
    let Json(request) = json_body(&state, payload)?;
    let timeout = request.timeout_ms.map(Duration::from_millis);
    let result = with_deadline(timeout, state.fetcher.fetch(&request.url)).await;

    if let Err(err) = &result {
        tracing::warn!("Comparison fetch for {} failed: {}", request.url, err);
    }

    Ok(Json(CompareResponse::from(result)))
}

/// Handle health check requests
async fn handle_health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Handle info requests
async fn handle_info(State(state): State<AppState>) -> impl IntoResponse {
    Json(InfoResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        recognition_configured: state.recognizer.is_configured(),
        max_file_size_bytes: state.config.max_file_size,
        endpoints: [
            "/analyze",
            "/analyze/base64",
            "/analyze/batch",
            "/extract",
            "/compare",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect(),
    })
}

/// Recognize and extract; every failure becomes a tagged response
async fn analyze(state: &AppState, image: &[u8], timeout: Option<Duration>) -> AnalyzeResponse {
    let start = Instant::now();
    let result = with_deadline(timeout, state.recognizer.recognize_text(image)).await;
    let response = AnalyzeResponse::from(result);

    match (&response.products, &response.error) {
        (Some(products), _) => tracing::info!(
            "Analysis completed in {}ms, {} candidate products",
            start.elapsed().as_millis(),
            products.len()
        ),
        (None, Some(error)) => tracing::warn!("Analysis failed: {}", error),
        (None, None) => {}
    }

    response
}

/// Bound a contract call by an optional caller deadline
async fn with_deadline<T, F>(timeout: Option<Duration>, call: F) -> Result<T, FlyerError>
where
    F: Future<Output = Result<T, FlyerError>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .unwrap_or_else(|_| Err(FlyerError::Transport("Request timed out".to_string()))),
        None => call.await,
    }
}

/// Unwrap a JSON body, turning extractor rejections into `{ error, code }` errors
fn json_body<T>(
    state: &AppState,
    payload: Result<Json<T>, JsonRejection>,
) -> Result<Json<T>, FlyerError> {
    payload.map_err(|rejection| {
        FlyerError::from_json_rejection(rejection, body_limit(state.config.max_file_size))
    })
}

/// Collect every `file` field of a multipart form, validating each image
async fn read_image_fields(
    state: &AppState,
    mut multipart: Multipart,
) -> Result<Vec<Bytes>, FlyerError> {
    let mut files = Vec::new();
    let limit = body_limit(state.config.max_file_size);

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| FlyerError::from_multipart(e, limit, "Failed to parse multipart"))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let content_type = field.content_type().map(|s| s.to_string());
        let data = field
            .bytes()
            .await
            .map_err(|e| FlyerError::from_multipart(e, limit, "Failed to read file data"))?;

        if let Some(mime) = content_type.filter(|mime| !mime.starts_with("image/")) {
            tracing::warn!("Received file with content type: {}", mime);
        }
        validate_image(state, &data)?;
        files.push(data);
    }

    Ok(files)
}

/// Enforce the size limit and check the payload is a recognizable image
fn validate_image(state: &AppState, data: &[u8]) -> Result<(), FlyerError> {
    if data.len() > state.config.max_file_size {
        return Err(FlyerError::ImageTooLarge {
            size: data.len(),
            max: state.config.max_file_size,
        });
    }

    let format = image::guess_format(data)
        .map_err(|_| FlyerError::UnsupportedFormat("not a recognized image".to_string()))?;
    tracing::debug!("Received {:?} image ({} bytes)", format, data.len());

    Ok(())
}
