//! In-process item store.
//!
//! Backs `memory://` deployments and every test in the crate. It mirrors the
//! behavior of a document database closely enough for the HTTP contract:
//! random opaque ids, millisecond timestamps, newest-first listing.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use tokio::sync::RwLock;
use tracing::info;

use super::{ItemStore, Provisioned, StoreConnector, StoreError};
use crate::item::{Item, ItemChanges, ItemId, NewItem};
use crate::provision::AppCredentials;

struct Entry {
    // Insertion order breaks ties between items created in the same millisecond.
    seq: u64,
    item: Item,
}

#[derive(Default)]
pub struct MemoryStore {
    items: RwLock<HashMap<ItemId, Entry>>,
    next_seq: AtomicU64,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self, operation: &'static str) -> Result<(), StoreError> {
        if self.is_closed() {
            return Err(StoreError::operation(operation, "connection closed"));
        }
        Ok(())
    }
}

fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn insert(&self, item: NewItem) -> Result<Item, StoreError> {
        self.ensure_open("insert")?;
        let created_at = now();
        let item = Item {
            id: ItemId::new(nanoid::nanoid!()),
            name: item.name,
            description: item.description,
            created_at,
            updated_at: created_at,
        };
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);

        let mut items = self.items.write().await;
        items.insert(
            item.id.clone(),
            Entry {
                seq,
                item: item.clone(),
            },
        );
        Ok(item)
    }

    async fn find_all(&self) -> Result<Vec<Item>, StoreError> {
        self.ensure_open("find_all")?;
        let items = self.items.read().await;
        let mut entries: Vec<&Entry> = items.values().collect();
        entries.sort_by(|a, b| {
            b.item
                .created_at
                .cmp(&a.item.created_at)
                .then(b.seq.cmp(&a.seq))
        });
        Ok(entries.into_iter().map(|entry| entry.item.clone()).collect())
    }

    async fn find_by_id(&self, id: &ItemId) -> Result<Option<Item>, StoreError> {
        self.ensure_open("find_by_id")?;
        let items = self.items.read().await;
        Ok(items.get(id).map(|entry| entry.item.clone()))
    }

    async fn update_by_id(
        &self,
        id: &ItemId,
        changes: ItemChanges,
    ) -> Result<Option<Item>, StoreError> {
        self.ensure_open("update_by_id")?;
        let mut items = self.items.write().await;
        let Some(entry) = items.get_mut(id) else {
            return Ok(None);
        };

        changes.apply_to(&mut entry.item);
        // Clients rely on `updatedAt` moving forward on every write.
        let floor = entry.item.updated_at + Duration::milliseconds(1);
        entry.item.updated_at = now().max(floor);
        Ok(Some(entry.item.clone()))
    }

    async fn delete_by_id(&self, id: &ItemId) -> Result<Option<Item>, StoreError> {
        self.ensure_open("delete_by_id")?;
        let mut items = self.items.write().await;
        Ok(items.remove(id).map(|entry| entry.item))
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out one shared [`MemoryStore`] on every connect.
#[derive(Default)]
pub struct MemoryConnector {
    store: Arc<MemoryStore>,
}

impl MemoryConnector {
    pub fn with_store(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StoreConnector for MemoryConnector {
    async fn connect(&self) -> Result<Arc<dyn ItemStore>, StoreError> {
        Ok(self.store.clone())
    }

    async fn provision(&self, credentials: &AppCredentials) -> Result<Provisioned, StoreError> {
        info!(
            database = %credentials.database,
            username = %credentials.username,
            "memory store has no users; nothing to provision"
        );
        Ok(Provisioned::Skipped)
    }
}
