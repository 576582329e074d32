//! Traits for the engine's external collaborators

use async_trait::async_trait;

use crate::error::{ExtractError, NotificationError};
use crate::models::{PriceAlert, ProductSnapshot};

/// Configuration for reading products off their pages
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// User agent sent with every page request
    pub user_agent: String,
    /// Upper bound on a single page request
    pub timeout: std::time::Duration,
    /// CSS selectors for the product fields
    pub selectors: PageSelectors,
}

/// CSS selectors for the parts of a product page the engine reads
#[derive(Debug, Clone)]
pub struct PageSelectors {
    /// Product display name
    pub name: String,
    /// Product price text
    pub price: String,
}

/// Reads a product's current name and price given its URL
#[async_trait]
pub trait PriceExtractor: Send + Sync {
    /// Fetch the product page and extract its name and price
    ///
    /// # Arguments
    /// * `url` - Canonical product URL
    ///
    /// # Returns
    /// * `Result<ProductSnapshot, ExtractError>` - Current name and price or the reason they could not be read
    async fn fetch(&self, url: &str) -> Result<ProductSnapshot, ExtractError>;
}

/// Delivers a price alert to its recipient
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send one alert. An `Err` means the alert was not delivered and stays pending.
    async fn notify(&self, alert: &PriceAlert) -> Result<(), NotificationError>;
}
