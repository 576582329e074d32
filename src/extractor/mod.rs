use std::str::FromStr;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use scraper::{Html, Selector};
use tracing::debug;

use crate::error::ExtractError;
use crate::models::ProductSnapshot;
use crate::traits::{ExtractorConfig, PriceExtractor};

/// Reads product name and price from a page using CSS selectors
pub struct PageExtractor {
    client: Client,
    name_selector: Selector,
    price_selector: Selector,
    config: ExtractorConfig,
}

impl PageExtractor {
    pub fn new(config: ExtractorConfig) -> Result<Self, ExtractError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .build()
            .map_err(ExtractError::Client)?;

        let name_selector = parse_selector(&config.selectors.name)?;
        let price_selector = parse_selector(&config.selectors.price)?;

        Ok(Self {
            client,
            name_selector,
            price_selector,
            config,
        })
    }

    /// Extract a snapshot from an already downloaded page
    pub fn extract(&self, url: &str, html: &str) -> Result<ProductSnapshot, ExtractError> {
        let document = Html::parse_document(html);

        let name = document
            .select(&self.name_selector)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ExtractError::MissingElement {
                url: url.to_string(),
                selector: self.config.selectors.name.clone(),
            })?;

        let price_text = document
            .select(&self.price_selector)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .ok_or_else(|| ExtractError::MissingElement {
                url: url.to_string(),
                selector: self.config.selectors.price.clone(),
            })?;

        let price = parse_price(&price_text).ok_or_else(|| ExtractError::InvalidPrice {
            url: url.to_string(),
            text: price_text.clone(),
        })?;

        Ok(ProductSnapshot { name, price })
    }
}

#[async_trait]
impl PriceExtractor for PageExtractor {
    async fn fetch(&self, url: &str) -> Result<ProductSnapshot, ExtractError> {
        let url = url.trim();
        debug!("Fetching product page {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| ExtractError::Http {
                url: url.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(ExtractError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let html = response.text().await.map_err(|source| ExtractError::Http {
            url: url.to_string(),
            source,
        })?;

        // Html is not Send; parsing happens after the last await.
        self.extract(url, &html)
    }
}

impl Clone for PageExtractor {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            name_selector: self.name_selector.clone(),
            price_selector: self.price_selector.clone(),
            config: self.config.clone(),
        }
    }
}

fn parse_selector(selector: &str) -> Result<Selector, ExtractError> {
    Selector::parse(selector).map_err(|e| ExtractError::Selector(format!("{selector}: {e:?}")))
}

/// Parse a displayed price by dropping everything except digits and `.`
pub fn parse_price(text: &str) -> Option<Decimal> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();

    if cleaned.is_empty() {
        return None;
    }

    Decimal::from_str(&cleaned).ok()
}
