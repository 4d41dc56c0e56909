/*!
 * # Order Store
 *
 * Content-store abstraction used by the webhook receiver. The only write is an
 * insert-if-absent keyed by the provider payment id, which is what keeps duplicate
 * notifications from producing duplicate orders.
 */

mod sanity;

pub use sanity::{SanityOrderStore, SanitySettings};

use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use std::sync::Arc;
use thiserror::Error;

use crate::errors::ServiceError;
use crate::models::Order;

/// Order store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Unexpected response (status {status}): {body}")]
    Response { status: u16, body: String },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        ServiceError::PersistenceError(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Created,
    AlreadyExists,
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn find_by_payment_id(&self, payment_id: &str) -> Result<Option<Order>, StoreError>;

    /// Writes `order` unless an order with the same payment id exists. Must be atomic
    /// with respect to concurrent callers.
    async fn insert_if_absent(&self, order: &Order) -> Result<InsertOutcome, StoreError>;
}

/// In-process store, keyed by payment id
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderStore {
    orders: Arc<DashMap<String, Order>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn orders(&self) -> Vec<Order> {
        self.orders.iter().map(|entry| entry.value().clone()).collect()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    fn backend(&self) -> &'static str {
        "in-memory"
    }

    async fn find_by_payment_id(&self, payment_id: &str) -> Result<Option<Order>, StoreError> {
        Ok(self.orders.get(payment_id).map(|entry| entry.value().clone()))
    }

    async fn insert_if_absent(&self, order: &Order) -> Result<InsertOutcome, StoreError> {
        match self.orders.entry(order.payment_id.clone()) {
            Entry::Occupied(_) => Ok(InsertOutcome::AlreadyExists),
            Entry::Vacant(slot) => {
                slot.insert(order.clone());
                Ok(InsertOutcome::Created)
            }
        }
    }
}
