//! In-memory collaborators for unit tests.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;

use crate::database::TrackingStore;
use crate::error::{ExtractError, NotificationError, Result};
use crate::models::{
    PriceAlert, PriceHistoryEntry, PricePoint, Product, ProductSnapshot, TrackRequest,
    TrackedItem, TrackedProduct,
};
use crate::traits::{Notifier, PriceExtractor};

#[derive(Debug, Default)]
struct State {
    next_id: i64,
    users: Vec<(i64, String)>,
    products: Vec<Product>,
    items: Vec<TrackedItem>,
    history: Vec<PriceHistoryEntry>,
    writes: usize,
}

impl State {
    fn id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Mirrors the PostgreSQL store's statement semantics over plain vectors.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Simulate an outside price change without going through a job.
    pub fn set_price(&self, product_id: i64, price: Decimal) {
        let mut state = self.state();
        if let Some(product) = state.products.iter_mut().find(|p| p.id == product_id) {
            product.current_price = price;
        }
    }

    pub fn product(&self, product_id: i64) -> Option<Product> {
        self.state().products.iter().find(|p| p.id == product_id).cloned()
    }

    pub fn item(&self, item_id: i64) -> Option<TrackedItem> {
        self.state().items.iter().find(|i| i.id == item_id).cloned()
    }

    pub fn product_count(&self) -> usize {
        self.state().products.len()
    }

    pub fn item_count(&self) -> usize {
        self.state().items.len()
    }

    pub fn history(&self, product_id: i64) -> Vec<PriceHistoryEntry> {
        self.state()
            .history
            .iter()
            .filter(|h| h.product_id == product_id)
            .cloned()
            .collect()
    }

    /// Number of mutating statements that changed at least one row.
    pub fn writes(&self) -> usize {
        self.state().writes
    }
}

#[async_trait]
impl TrackingStore for MemoryStore {
    async fn register_user(&self, email: &str) -> Result<i64> {
        let mut state = self.state();
        if let Some((id, _)) = state.users.iter().find(|(_, e)| e == email) {
            return Ok(*id);
        }
        let id = state.id();
        state.users.push((id, email.to_string()));
        Ok(id)
    }

    async fn track(&self, request: &TrackRequest) -> Result<TrackedItem> {
        let mut guard = self.state();
        let state = &mut *guard;

        let mut price_moved = false;
        let product_id = match state.products.iter().position(|p| p.url == request.url) {
            Some(index) => {
                let product = &mut state.products[index];
                price_moved = product.current_price != request.price;
                product.name.clone_from(&request.name);
                product.current_price = request.price;
                product.id
            }
            None => {
                let id = state.id();
                state.products.push(Product {
                    id,
                    url: request.url.clone(),
                    name: request.name.clone(),
                    current_price: request.price,
                });
                id
            }
        };

        let existing = state
            .items
            .iter()
            .position(|i| i.user_id == request.user_id && i.product_id == product_id);
        let item = match existing {
            Some(index) => {
                let item = &mut state.items[index];
                item.target_price = request.target_price;
                item.notified = false;
                item.clone()
            }
            None => {
                let item = TrackedItem {
                    id: state.id(),
                    user_id: request.user_id,
                    product_id,
                    target_price: request.target_price,
                    notified: false,
                    created_at: Utc::now(),
                };
                state.items.push(item.clone());
                item
            }
        };

        if price_moved || !state.history.iter().any(|h| h.product_id == product_id) {
            state.history.push(PriceHistoryEntry {
                product_id,
                recorded_price: request.price,
                recorded_at: Utc::now(),
            });
        }

        state.writes += 1;
        Ok(item)
    }

    async fn products(&self) -> Result<Vec<Product>> {
        Ok(self.state().products.clone())
    }

    async fn record_price(&self, product_id: i64, snapshot: &ProductSnapshot) -> Result<bool> {
        let mut guard = self.state();
        let state = &mut *guard;
        let Some(product) = state
            .products
            .iter_mut()
            .find(|p| p.id == product_id && p.current_price != snapshot.price)
        else {
            return Ok(false);
        };

        product.current_price = snapshot.price;
        product.name.clone_from(&snapshot.name);
        state.history.push(PriceHistoryEntry {
            product_id,
            recorded_price: snapshot.price,
            recorded_at: Utc::now(),
        });
        state.writes += 1;
        Ok(true)
    }

    async fn pending_alerts(&self) -> Result<Vec<PriceAlert>> {
        let state = self.state();
        let alerts = state
            .items
            .iter()
            .filter(|item| !item.notified)
            .filter_map(|item| {
                let product = state.products.iter().find(|p| p.id == item.product_id)?;
                let (_, email) = state.users.iter().find(|(id, _)| *id == item.user_id)?;
                (product.current_price <= item.target_price).then(|| PriceAlert {
                    item_id: item.id,
                    recipient: email.clone(),
                    product_name: product.name.clone(),
                    product_url: product.url.clone(),
                    target_price: item.target_price,
                    current_price: product.current_price,
                })
            })
            .collect();
        Ok(alerts)
    }

    async fn mark_notified(&self, item_id: i64, target_price: Decimal) -> Result<bool> {
        let mut guard = self.state();
        let state = &mut *guard;
        let Some(item) = state
            .items
            .iter_mut()
            .find(|i| i.id == item_id && i.target_price == target_price && !i.notified)
        else {
            return Ok(false);
        };
        item.notified = true;
        state.writes += 1;
        Ok(true)
    }

    async fn reset_recovered(&self) -> Result<u64> {
        let mut guard = self.state();
        let state = &mut *guard;
        let prices: HashMap<i64, Decimal> = state
            .products
            .iter()
            .map(|p| (p.id, p.current_price))
            .collect();

        let mut reset = 0;
        for item in &mut state.items {
            let recovered = prices
                .get(&item.product_id)
                .is_some_and(|price| item.target_price < *price);
            if item.notified && recovered {
                item.notified = false;
                reset += 1;
            }
        }
        if reset > 0 {
            state.writes += 1;
        }
        Ok(reset)
    }

    async fn tracked_items_for_user(&self, user_id: i64) -> Result<Vec<TrackedProduct>> {
        let state = self.state();
        let mut rows: Vec<TrackedProduct> = state
            .items
            .iter()
            .filter(|item| item.user_id == user_id)
            .filter_map(|item| {
                let product = state.products.iter().find(|p| p.id == item.product_id)?;
                Some(TrackedProduct {
                    item_id: item.id,
                    product_id: product.id,
                    url: product.url.clone(),
                    name: product.name.clone(),
                    current_price: product.current_price,
                    target_price: item.target_price,
                    notified: item.notified,
                    created_at: item.created_at,
                })
            })
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.item_id.cmp(&a.item_id)));
        Ok(rows)
    }

    async fn price_series(&self, product_id: i64) -> Result<Vec<PricePoint>> {
        let state = self.state();
        let mut points: Vec<PricePoint> = state
            .history
            .iter()
            .filter(|h| h.product_id == product_id)
            .map(|h| PricePoint {
                recorded_at: h.recorded_at,
                price: h.recorded_price,
            })
            .collect();
        if let Some(product) = state.products.iter().find(|p| p.id == product_id) {
            points.push(PricePoint {
                recorded_at: Utc::now(),
                price: product.current_price,
            });
        }
        points.sort_by_key(|p| p.recorded_at);
        Ok(points)
    }

    async fn untrack(&self, user_id: i64, product_id: i64) -> Result<bool> {
        let mut state = self.state();
        let before = state.items.len();
        state
            .items
            .retain(|i| !(i.user_id == user_id && i.product_id == product_id));
        Ok(state.items.len() < before)
    }
}

/// Serves whatever snapshot (or failure) the test configured per URL.
#[derive(Debug, Default)]
pub struct StaticExtractor {
    pages: Mutex<HashMap<String, Option<ProductSnapshot>>>,
    fetches: Mutex<usize>,
}

impl StaticExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, url: &str, name: &str, price: Decimal) {
        self.pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                url.to_string(),
                Some(ProductSnapshot {
                    name: name.to_string(),
                    price,
                }),
            );
    }

    /// Make `url` fail extraction.
    pub fn break_page(&self, url: &str) {
        self.pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string(), None);
    }

    pub fn fetches(&self) -> usize {
        *self.fetches.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PriceExtractor for StaticExtractor {
    async fn fetch(&self, url: &str) -> std::result::Result<ProductSnapshot, ExtractError> {
        // Suspend like a real request so concurrent runs interleave.
        tokio::task::yield_now().await;
        *self.fetches.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        self.pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned()
            .flatten()
            .ok_or_else(|| ExtractError::MissingElement {
                url: url.to_string(),
                selector: ".sale-price".to_string(),
            })
    }
}

/// Records every alert it is asked to deliver; can be switched to fail.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<PriceAlert>>,
    failing: Mutex<bool>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, failing: bool) {
        *self.failing.lock().unwrap_or_else(PoisonError::into_inner) = failing;
    }

    pub fn sent(&self) -> Vec<PriceAlert> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, alert: &PriceAlert) -> std::result::Result<(), NotificationError> {
        if *self.failing.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(NotificationError::Delivery("connection refused".to_string()));
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(alert.clone());
        Ok(())
    }
}
