use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{
    config::{Config, PUBLIC_EXCHANGE_API_URL},
    error::RateError,
};

/// Currencies listings may be priced in, besides the base.
pub const SUPPORTED_CURRENCIES: &[&str] = &["KRW", "USD", "EUR", "JPY", "CNY", "GBP", "VND", "THB"];

#[async_trait]
pub trait RateSource: Send + Sync {
    /// Base units per one unit of each supported currency.
    async fn fetch(&self, base: &str) -> Result<BTreeMap<String, f64>, RateError>;
}

#[derive(Debug, Deserialize)]
struct LatestResponse {
    #[serde(default)]
    result: Option<String>,
    #[serde(default, rename = "error-type")]
    error_type: Option<String>,
    /// Units of each currency per one base unit.
    #[serde(default, alias = "conversion_rates")]
    rates: BTreeMap<String, f64>,
}

#[derive(Debug, Clone)]
pub struct HttpRateSource {
    client: reqwest::Client,
    /// Everything before `/latest/{base}`.
    root: String,
}

impl HttpRateSource {
    pub fn new(root: impl Into<String>, timeout: Duration) -> Result<Self, RateError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            root: root.into().trim_end_matches('/').to_owned(),
        })
    }

    /// Keyed endpoint when an API key is configured, the public one otherwise.
    pub fn from_config(config: &Config) -> Result<Self, RateError> {
        let root = match &config.exchange_api_key {
            Some(key) => format!("{}/{key}", config.exchange_api_url.trim_end_matches('/')),
            None => {
                info!("EXCHANGE_API_KEY not set, using public rate endpoint");
                PUBLIC_EXCHANGE_API_URL.to_owned()
            }
        };
        Self::new(root, config.rate_fetch_timeout)
    }
}

#[async_trait]
impl RateSource for HttpRateSource {
    async fn fetch(&self, base: &str) -> Result<BTreeMap<String, f64>, RateError> {
        let url = format!("{}/latest/{base}", self.root);
        debug!("fetching exchange rates for {base}");

        let body: LatestResponse = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if body.result.as_deref() == Some("error") {
            return Err(RateError::BadResponse(
                body.error_type.unwrap_or_else(|| "unknown error".to_owned()),
            ));
        }

        let rates = invert_quotes(base, &body.rates);
        if rates.is_empty() {
            return Err(RateError::BadResponse("no supported currencies in response".to_owned()));
        }
        Ok(rates)
    }
}

/// Turns "units per base" quotes into "base per unit" rates for the
/// supported currencies, skipping anything missing or non-positive.
fn invert_quotes(base: &str, quotes: &BTreeMap<String, f64>) -> BTreeMap<String, f64> {
    SUPPORTED_CURRENCIES
        .iter()
        .filter(|code| !code.eq_ignore_ascii_case(base))
        .filter_map(|code| match quotes.get(*code) {
            Some(quote) if quote.is_finite() && *quote > 0.0 => Some((code.to_string(), 1.0 / quote)),
            _ => {
                warn!("no usable {code} quote for base {base}");
                None
            }
        })
        .collect()
}
