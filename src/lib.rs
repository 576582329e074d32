//! Price tracking engine: refreshes tracked product prices, emails users when
//! a price reaches their target, and re-arms alerts once the price recovers.
//!
//! Each recurring job runs under a PostgreSQL advisory lock, so any number of
//! processes can share one database without duplicating work.

pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod jobs;
pub mod lock;
pub mod models;
pub mod notifier;
pub mod scheduler;
pub mod traits;

#[cfg(test)]
mod testing;

pub use engine::PriceEngine;
pub use error::{Error, Result};
