//! Competitor price lookup
//!
//! Fetches a marketplace product page and reads its price and main image
//! through ordered lists of selector probes. The first probe that yields a
//! value wins. Pages that match nothing produce an empty result rather than an
//! error, since the markup of the target site drifts over time.

use crate::error::FlyerError;
use once_cell::sync::Lazy;
use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, PRAGMA, REFERER, USER_AGENT,
};
use reqwest::Url;
use scraper::{Html, Selector};
use std::time::Duration;

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const BROWSER_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8";
const BROWSER_ACCEPT_LANGUAGE: &str = "ko-KR,ko;q=0.9,en-US;q=0.8,en;q=0.7";

/// Price and image read from a competitor page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComparisonResult {
    pub price: Option<u64>,
    pub image_url: Option<String>,
}

/// What a probe reads from the first matching element(s)
#[derive(Debug, Clone, Copy)]
enum Read {
    /// Concatenated text of every matching element
    Text,
    /// Attribute of the first matching element
    Attr(&'static str),
}

/// A single `(document) -> Option<String>` lookup
struct Probe {
    selector: Selector,
    read: Read,
}

impl Probe {
    fn text(css: &str) -> Self {
        Self::new(css, Read::Text)
    }

    fn attr(css: &str, name: &'static str) -> Self {
        Self::new(css, Read::Attr(name))
    }

    fn new(css: &str, read: Read) -> Self {
        Self {
            selector: Selector::parse(css).unwrap(),
            read,
        }
    }

    fn eval(&self, document: &Html) -> Option<String> {
        let value = match self.read {
            Read::Text => document
                .select(&self.selector)
                .flat_map(|element| element.text())
                .collect::<String>(),
            Read::Attr(name) => document
                .select(&self.selector)
                .next()?
                .value()
                .attr(name)?
                .to_string(),
        };
        if value.trim().is_empty() {
            None
        } else {
            Some(value)
        }
    }
}

/// Most specific first
static PRICE_PROBES: Lazy<Vec<Probe>> = Lazy::new(|| {
    vec![
        Probe::text(".prod-sale-price .total-price"),
        Probe::text(".total-price > strong"),
        Probe::text(".price-value"),
        Probe::text(".prod-sale-price"),
        Probe::text("span.total-price"),
    ]
});

static IMAGE_PROBES: Lazy<Vec<Probe>> = Lazy::new(|| {
    vec![
        Probe::attr(".prod-image__detail", "src"),
        Probe::attr(".prod-image__main", "src"),
        Probe::attr(".prod-img-list img", "src"),
    ]
});

fn first_match(probes: &[Probe], document: &Html) -> Option<String> {
    probes.iter().find_map(|probe| probe.eval(document))
}

/// Read price and image from a product page.
pub fn extract_comparison(html: &str) -> ComparisonResult {
    let document = Html::parse_document(html);

    let price = first_match(&PRICE_PROBES, &document).and_then(|text| {
        let digits: String = text.chars().filter(char::is_ascii_digit).collect();
        let price = digits.parse().ok();
        if price.is_none() && !digits.is_empty() {
            tracing::debug!("Ignoring out-of-range price text '{}'", text.trim());
        }
        price
    });
    let image_url = first_match(&IMAGE_PROBES, &document);

    ComparisonResult { price, image_url }
}

/// Give protocol-relative URLs (`//host/path`) an explicit https scheme.
pub fn normalize_image_url(url: &str) -> String {
    if url.starts_with("//") {
        format!("https:{}", url)
    } else {
        url.to_string()
    }
}

/// Fetches competitor pages with a browser-like request profile
pub struct ComparisonFetcher {
    client: reqwest::Client,
}

impl ComparisonFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FlyerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                FlyerError::Initialization(format!("Failed to build HTTP client: {}", e))
            })?;
        Ok(Self { client })
    }

    /// Fetch a product page once and extract its price and image.
    pub async fn fetch(&self, url: &str) -> Result<ComparisonResult, FlyerError> {
        let target = parse_target(url)?;

        let response = self
            .client
            .get(target.clone())
            .headers(browser_headers(&target))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FlyerError::Transport(format!(
                "Failed to fetch product page: {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or_default()
            )));
        }

        let html = response.text().await?;
        let result = extract_comparison(&html);
        tracing::info!(
            "Comparison fetch for {}: price={:?}, image={}",
            target,
            result.price,
            result.image_url.is_some()
        );

        Ok(result)
    }
}

fn parse_target(url: &str) -> Result<Url, FlyerError> {
    let target = Url::parse(url.trim())
        .map_err(|e| FlyerError::InvalidRequest(format!("Invalid URL '{}': {}", url, e)))?;
    match target.scheme() {
        "http" | "https" => Ok(target),
        scheme => Err(FlyerError::InvalidRequest(format!(
            "Unsupported URL scheme: {}",
            scheme
        ))),
    }
}

fn browser_headers(target: &Url) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
    headers.insert(ACCEPT, HeaderValue::from_static(BROWSER_ACCEPT));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(BROWSER_ACCEPT_LANGUAGE));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));

    let origin = target.origin().ascii_serialization();
    if let Ok(referer) = HeaderValue::from_str(&format!("{}/", origin)) {
        headers.insert(REFERER, referer);
    }
    headers
}
