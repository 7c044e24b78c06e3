use axum::{
    extract::Query,
    http::StatusCode,
    response::Html,
    routing::{get, post},
    Json, Router,
};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::{SocketAddr, TcpStream};
use std::process::{Child, Command};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};

// Use atomic counter to give each test a unique port
static PORT_COUNTER: AtomicU16 = AtomicU16::new(9500);

const PNG_HEADER: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct Product {
    name: String,
    sale_price: u64,
    original_price: Option<u64>,
    category: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResponse {
    success: bool,
    full_text: Option<String>,
    products: Option<Vec<Product>>,
    error: Option<String>,
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(dead_code)]
struct CompareResponse {
    success: bool,
    price: Option<u64>,
    image_url: Option<String>,
    secure_image_url: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct InfoResponse {
    version: String,
    recognition_configured: bool,
    max_file_size_bytes: usize,
    endpoints: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct HealthResponse {
    status: String,
    version: String,
}

struct TestServer {
    child: Child,
    port: u16,
}

impl TestServer {
    fn start() -> Self {
        Self::start_with(&[])
    }

    fn start_with(extra_args: &[&str]) -> Self {
        let port = PORT_COUNTER.fetch_add(1, Ordering::SeqCst);

        let child = Command::new(env!("CARGO_BIN_EXE_flyer-board-server"))
            .args(["--host", "127.0.0.1", "--port", &port.to_string()])
            .args(extra_args)
            .env_remove("GOOGLE_CLOUD_VISION_API_KEY")
            .env_remove("VISION_ENDPOINT")
            .spawn()
            .expect("Failed to start server");

        wait_for_port(port);

        Self { child, port }
    }

    fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
    }
}

fn wait_for_port(port: u16) {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if TcpStream::connect_timeout(&addr, Duration::from_millis(100)).is_ok() {
            return;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    panic!("Server on port {} did not start", port);
}

/// Serve `router` on an ephemeral port and return its address
async fn spawn_stub(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind stub server");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// Stand-in for the Vision API that only answers requests carrying the test key
fn vision_stub(text: &'static str) -> Router {
    Router::new().route(
        "/v1/images:annotate",
        post(
            move |Query(params): Query<HashMap<String, String>>,
                  Json(body): Json<serde_json::Value>| async move {
                if params.get("key").map(String::as_str) != Some("test-key") {
                    return (
                        StatusCode::FORBIDDEN,
                        Json(serde_json::json!({ "error": { "message": "API key not valid" } })),
                    );
                }
                let feature = &body["requests"][0]["features"][0]["type"];
                assert_eq!(feature, "TEXT_DETECTION");
                (
                    StatusCode::OK,
                    Json(serde_json::json!({
                        "responses": [{ "textAnnotations": [{ "description": text }] }]
                    })),
                )
            },
        ),
    )
}

fn shop_stub() -> Router {
    Router::new()
        .route(
            "/product",
            get(|| async {
                Html(
                    r#"<html><body>
                        <img class="prod-image__detail" src="//thumbnail.example.com/milk.jpg">
                        <div class="prod-sale-price"><span class="total-price"><strong>2,780</strong>원</span></div>
                    </body></html>"#,
                )
            }),
        )
        .route(
            "/robot",
            get(|| async { Html("<html><body><p>Access Denied</p></body></html>") }),
        )
        .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
}

async fn analyze_png(client: &reqwest::Client, base_url: &str) -> AnalyzeResponse {
    let part = Part::bytes(PNG_HEADER.to_vec())
        .file_name("flyer.png")
        .mime_str("image/png")
        .unwrap();
    let form = Form::new().part("file", part);

    let response = client
        .post(format!("{}/analyze", base_url))
        .multipart(form)
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());
    response.json().await.expect("Failed to parse response")
}

async fn compare(client: &reqwest::Client, base_url: &str, url: &str) -> CompareResponse {
    client
        .post(format!("{}/compare", base_url))
        .json(&serde_json::json!({ "url": url }))
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse response")
}

#[tokio::test]
async fn test_health_endpoint() {
    let server = TestServer::start();
    let client = reqwest::Client::new();

    let response: HealthResponse = client
        .get(format!("{}/health", server.base_url()))
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse response");

    assert_eq!(response.status, "ok");
}

#[tokio::test]
async fn test_info_endpoint_reports_missing_credential() {
    let server = TestServer::start();
    let client = reqwest::Client::new();

    let response: InfoResponse = client
        .get(format!("{}/info", server.base_url()))
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse response");

    assert!(!response.version.is_empty());
    assert!(!response.recognition_configured);
    assert!(response.endpoints.contains(&"/compare".to_string()));
}

#[tokio::test]
async fn test_analyze_without_credential_fails_gracefully() {
    let server = TestServer::start();
    let client = reqwest::Client::new();

    let result = analyze_png(&client, &server.base_url()).await;

    assert!(!result.success);
    assert_eq!(result.code.as_deref(), Some("CONFIGURATION_ERROR"));
    assert!(result.error.unwrap().contains("not configured"));
    assert!(result.products.is_none());
}

#[tokio::test]
async fn test_analyze_extracts_products_from_vision_text() {
    let vision = spawn_stub(vision_stub("사과 1,900원\n바나나\n3,500원 2,000원")).await;
    let endpoint = format!("http://{}/v1/images:annotate", vision);
    let server = TestServer::start_with(&[
        "--vision-api-key",
        "test-key",
        "--vision-endpoint",
        &endpoint,
    ]);
    let client = reqwest::Client::new();

    let result = analyze_png(&client, &server.base_url()).await;

    assert!(result.success, "unexpected failure: {:?}", result.error);
    assert_eq!(
        result.full_text.as_deref(),
        Some("사과 1,900원\n바나나\n3,500원 2,000원")
    );
    let products = result.products.unwrap();
    assert_eq!(products.len(), 2);
    assert_eq!(products[0].name, "사과");
    assert_eq!(products[0].sale_price, 1900);
    assert_eq!(products[0].original_price, None);
    assert_eq!(products[1].name, "바나나");
    assert_eq!(products[1].sale_price, 2000);
    assert_eq!(products[1].original_price, Some(3500));
    assert!(products.iter().all(|p| p.category.is_none()));
}

#[tokio::test]
async fn test_analyze_surfaces_vision_rejection() {
    let vision = spawn_stub(vision_stub("unused")).await;
    let endpoint = format!("http://{}/v1/images:annotate", vision);
    let server = TestServer::start_with(&[
        "--vision-api-key",
        "wrong-key",
        "--vision-endpoint",
        &endpoint,
    ]);
    let client = reqwest::Client::new();

    let result = analyze_png(&client, &server.base_url()).await;

    assert!(!result.success);
    assert_eq!(result.code.as_deref(), Some("TRANSPORT_ERROR"));
    assert!(result.error.unwrap().contains("API key not valid"));
}

#[tokio::test]
async fn test_extract_endpoint() {
    let server = TestServer::start();
    let client = reqwest::Client::new();

    let response: serde_json::Value = client
        .post(format!("{}/extract", server.base_url()))
        .json(&serde_json::json!({ "text": "" }))
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse response");

    assert_eq!(response["success"], true);
    assert_eq!(response["products"], serde_json::json!([]));
}

#[tokio::test]
async fn test_compare_reads_price_and_image() {
    let shop = spawn_stub(shop_stub()).await;
    let server = TestServer::start();
    let client = reqwest::Client::new();

    let result = compare(&client, &server.base_url(), &format!("http://{}/product", shop)).await;

    assert!(result.success);
    assert_eq!(result.price, Some(2780));
    assert_eq!(
        result.image_url.as_deref(),
        Some("//thumbnail.example.com/milk.jpg")
    );
    assert_eq!(
        result.secure_image_url.as_deref(),
        Some("https://thumbnail.example.com/milk.jpg")
    );
}

#[tokio::test]
async fn test_compare_unmatched_page_is_partial_success() {
    let shop = spawn_stub(shop_stub()).await;
    let server = TestServer::start();
    let client = reqwest::Client::new();

    let result = compare(&client, &server.base_url(), &format!("http://{}/robot", shop)).await;

    assert!(result.success);
    assert_eq!(result.price, None);
    assert_eq!(result.image_url, None);
}

#[tokio::test]
async fn test_compare_http_error_is_tagged_failure() {
    let shop = spawn_stub(shop_stub()).await;
    let server = TestServer::start();
    let client = reqwest::Client::new();

    let result = compare(&client, &server.base_url(), &format!("http://{}/missing", shop)).await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("404"));
}
