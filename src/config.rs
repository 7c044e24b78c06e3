use crate::Args;
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub max_file_size: usize,
    /// Blank values are treated as absent.
    pub vision_api_key: Option<String>,
    pub vision_endpoint: String,
    pub request_timeout: Duration,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Self {
            host: args.host,
            port: args.port,
            max_file_size: args.max_file_size,
            vision_api_key: args
                .vision_api_key
                .map(|key| key.trim().to_string())
                .filter(|key| !key.is_empty()),
            vision_endpoint: args.vision_endpoint,
            request_timeout: Duration::from_secs(args.request_timeout_secs),
        }
    }
}

#[cfg(test)]
impl Config {
    pub fn for_tests(vision_api_key: Option<&str>) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            max_file_size: 1024 * 1024,
            vision_api_key: vision_api_key.map(str::to_string),
            vision_endpoint: "http://127.0.0.1:9/v1/images:annotate".to_string(),
            request_timeout: Duration::from_secs(5),
        }
    }
}
