//! Error types shared across the engine.

use rust_decimal::Decimal;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the store, the jobs and the engine facade.
#[derive(Debug, Error)]
pub enum Error {
    /// A database statement failed; the enclosing transaction was rolled back.
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    /// Migrations could not be applied at startup.
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// A product page could not be read.
    #[error(transparent)]
    Extraction(#[from] ExtractError),

    /// The requested target is not below the product's current price.
    #[error("target price {target} must be below the current price {current}")]
    TargetNotBelowPrice { target: Decimal, current: Decimal },

    /// The recurring timer could not be created or driven.
    #[error("scheduler error: {0}")]
    Scheduler(#[from] tokio_cron_scheduler::JobSchedulerError),
}

/// Failure to read a product's name and price from its page.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },

    #[error("element `{selector}` not found on {url}")]
    MissingElement { url: String, selector: String },

    #[error("could not parse a price from {text:?} on {url}")]
    InvalidPrice { url: String, text: String },

    #[error("invalid selector `{0}`")]
    Selector(String),

    #[error("could not build http client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Failure to deliver a price alert.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// No transport is configured; the alert stays pending.
    #[error("notifications are disabled: no SMTP host configured")]
    Disabled,

    #[error("invalid email address {address:?}: {reason}")]
    Address { address: String, reason: String },

    #[error("failed to build message: {0}")]
    Message(String),

    #[error("delivery failed: {0}")]
    Delivery(String),
}
