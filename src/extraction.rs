//! Product extraction from recognized flyer text
//!
//! A single forward pass over the recognized lines. Lines carrying prices mark
//! product boundaries; the product name is whatever text remains on the line
//! once the prices are removed, or the line above it. Results are provisional
//! and meant to be corrected by a human reviewer.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Runs of ASCII digits and thousands separators, optionally followed by the won sign.
static PRICE_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9,]+원?").unwrap());

/// Values at or below this are quantities, counts or date fragments, not prices.
const PRICE_FLOOR: u64 = 100;

/// Name used when neither the price line nor the line above yields one.
pub const UNIDENTIFIED_PRODUCT: &str = "미확인 상품";

/// A provisional product record produced from OCR text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateProduct {
    pub name: String,
    pub sale_price: u64,
    /// Present only when more than one price was found on the line.
    pub original_price: Option<u64>,
    /// Assigned later by a reviewer.
    pub category: Option<String>,
}

/// Sale and original price read from a single line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LinePrices {
    sale: u64,
    original: Option<u64>,
}

/// Fold state: products already emitted plus the one still being accumulated.
#[derive(Default)]
struct Scan {
    products: Vec<CandidateProduct>,
    pending: Option<CandidateProduct>,
}

impl Scan {
    fn accept(mut self, candidate: CandidateProduct) -> Self {
        match self.pending.take() {
            Some(previous) if previous.name != candidate.name => {
                tracing::debug!("Flushing candidate '{}'", previous.name);
                self.products.push(previous);
            }
            Some(previous) => {
                // Same name on consecutive price lines: the later line wins.
                tracing::debug!("Replacing candidate '{}'", previous.name);
            }
            None => {}
        }
        self.pending = Some(candidate);
        self
    }

    fn finish(mut self) -> Vec<CandidateProduct> {
        self.products.extend(self.pending.take());
        self.products
    }
}

/// Extract candidate products from the full recognized text.
///
/// Pure and deterministic. Empty or whitespace-only input yields no products.
pub fn extract_products(full_text: &str) -> Vec<CandidateProduct> {
    let lines: Vec<&str> = full_text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    lines
        .iter()
        .enumerate()
        .fold(Scan::default(), |scan, (index, line)| {
            if line.chars().count() < 2 {
                return scan;
            }
            let Some(prices) = scan_prices(line) else {
                return scan;
            };
            let previous = index.checked_sub(1).map(|i| lines[i]);
            scan.accept(CandidateProduct {
                name: derive_name(line, previous),
                sale_price: prices.sale,
                original_price: prices.original,
                category: None,
            })
        })
        .finish()
}

/// Find the valid prices on a line.
///
/// Returns `None` when no token survives the price floor.
fn scan_prices(line: &str) -> Option<LinePrices> {
    let mut prices: Vec<u64> = PRICE_TOKEN
        .find_iter(line)
        .filter_map(|token| parse_price(token.as_str()))
        .filter(|&value| value > PRICE_FLOOR)
        .collect();

    prices.sort_unstable();
    let sale = *prices.first()?;
    let original = if prices.len() > 1 {
        prices.last().copied()
    } else {
        None
    };

    Some(LinePrices { sale, original })
}

/// Keep the digits of a price token and parse them.
fn parse_price(token: &str) -> Option<u64> {
    let digits: String = token.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    match digits.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::debug!("Ignoring out-of-range price token '{}'", token);
            None
        }
    }
}

/// Name for a price line: its residual text, else the previous line, else a placeholder.
fn derive_name(line: &str, previous: Option<&str>) -> String {
    let residual = PRICE_TOKEN.replace_all(line, "");
    let residual = residual.trim();
    if !residual.is_empty() {
        return residual.to_string();
    }
    previous
        .map(str::trim)
        .filter(|prev| !prev.is_empty())
        .unwrap_or(UNIDENTIFIED_PRODUCT)
        .to_string()
}
