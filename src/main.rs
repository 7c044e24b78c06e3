use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod comparison;
mod config;
mod error;
mod extraction;
mod recognition;
mod server;

#[derive(Parser, Debug)]
#[command(name = "flyer-board-server")]
#[command(about = "Flyer OCR product extraction and price comparison server")]
#[command(version)]
pub struct Args {
    /// Host address to bind to
    #[arg(long, env = "FLYER_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "FLYER_PORT", default_value = "9393")]
    pub port: u16,

    /// Maximum upload size in bytes (default: 10MB)
    #[arg(long, env = "FLYER_MAX_FILE_SIZE", default_value = "10485760")]
    pub max_file_size: usize,

    /// Google Cloud Vision API key (text recognition is unavailable without it)
    #[arg(long, env = "GOOGLE_CLOUD_VISION_API_KEY", hide_env_values = true)]
    pub vision_api_key: Option<String>,

    /// Text recognition endpoint
    #[arg(
        long,
        env = "VISION_ENDPOINT",
        default_value = "https://vision.googleapis.com/v1/images:annotate"
    )]
    pub vision_endpoint: String,

    /// Timeout for outbound HTTP calls, in seconds
    #[arg(long, env = "FLYER_REQUEST_TIMEOUT_SECS", default_value = "30")]
    pub request_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::from(args);

    tracing::info!("Starting flyer-board-server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Binding to {}:{}", config.host, config.port);
    if config.vision_api_key.is_none() {
        tracing::warn!("GOOGLE_CLOUD_VISION_API_KEY is not set; image analysis will fail");
    }

    server::run(config).await
}
