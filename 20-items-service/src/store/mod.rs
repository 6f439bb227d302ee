//! Contract with the backing document store.
//!
//! The service treats the store as an external collaborator: it owns every
//! persisted item, assigns ids and timestamps, and reports "no such
//! document" as `Ok(None)` so callers can tell it apart from a failure.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;

use crate::item::{Item, ItemChanges, ItemId, NewItem};
use crate::provision::AppCredentials;

pub mod memory;
#[cfg(feature = "mongo")]
pub mod mongo;

pub use memory::{MemoryConnector, MemoryStore};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to connect to store: {0}")]
    Connect(String),
    #[error("store connection attempt timed out after {0:?}")]
    Timeout(Duration),
    #[error("store operation `{operation}` failed: {message}")]
    Operation {
        operation: &'static str,
        message: String,
    },
    #[error("failed to close store connection: {0}")]
    Close(String),
    #[error("unsupported store uri scheme `{0}`")]
    UnsupportedScheme(String),
}

impl StoreError {
    pub fn operation(operation: &'static str, err: impl ToString) -> Self {
        Self::Operation {
            operation,
            message: err.to_string(),
        }
    }
}

#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Persists a new item, assigning its id and both timestamps.
    async fn insert(&self, item: NewItem) -> Result<Item, StoreError>;

    /// Every item, newest `created_at` first.
    async fn find_all(&self) -> Result<Vec<Item>, StoreError>;

    async fn find_by_id(&self, id: &ItemId) -> Result<Option<Item>, StoreError>;

    /// Merges `changes` into the stored item and refreshes `updated_at`.
    async fn update_by_id(
        &self,
        id: &ItemId,
        changes: ItemChanges,
    ) -> Result<Option<Item>, StoreError>;

    /// Hard delete. Returns the removed item.
    async fn delete_by_id(&self, id: &ItemId) -> Result<Option<Item>, StoreError>;

    async fn close(&self) -> Result<(), StoreError>;

    /// Whether `key` would be read as a query operator by this store.
    ///
    /// Input sanitization strips such keys from everything a client sends.
    fn is_operator_key(&self, key: &str) -> bool {
        key.starts_with('$') || key.contains('.')
    }
}

/// What provisioning did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    /// The application user now exists.
    Created,
    /// The backend has no users to create.
    Skipped,
}

#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// Opens one connection. Callers bound each attempt with a timeout.
    async fn connect(&self) -> Result<Arc<dyn ItemStore>, StoreError>;

    /// Creates the application user the service connects as.
    async fn provision(&self, credentials: &AppCredentials) -> Result<Provisioned, StoreError>;
}

/// Picks a connector from the scheme of `uri`.
///
/// An unknown scheme is a configuration mistake, so it fails here instead
/// of inside the connect retry loop.
pub fn connector_for(
    uri: &str,
    #[cfg_attr(not(feature = "mongo"), allow(unused_variables))] connect_timeout: Duration,
) -> Result<Arc<dyn StoreConnector>, StoreError> {
    let scheme = uri.split_once("://").map(|(scheme, _)| scheme).unwrap_or(uri);
    match scheme {
        "memory" => Ok(Arc::new(MemoryConnector::default())),
        #[cfg(feature = "mongo")]
        "mongodb" | "mongodb+srv" => Ok(Arc::new(mongo::MongoConnector::new(
            uri.to_string(),
            connect_timeout,
        ))),
        other => Err(StoreError::UnsupportedScheme(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_scheme_is_always_available() {
        assert!(connector_for("memory://", Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        let err = connector_for("redis://localhost", Duration::from_secs(1))
            .err()
            .expect("redis is not a document store");
        assert!(matches!(err, StoreError::UnsupportedScheme(scheme) if scheme == "redis"));
    }

    #[cfg(not(feature = "mongo"))]
    #[test]
    fn mongo_scheme_requires_feature() {
        assert!(connector_for("mongodb://localhost:27017/items", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn default_operator_syntax() {
        let store = MemoryStore::new();
        assert!(store.is_operator_key("$gt"));
        assert!(store.is_operator_key("profile.email"));
        assert!(!store.is_operator_key("name"));
    }
}
