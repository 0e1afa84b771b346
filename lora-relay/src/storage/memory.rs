//! In-memory storage backend.

use super::MessageStore;
use crate::error::StorageResult;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use lorabridge_types::{EventClass, MessageEntity};
use std::sync::atomic::{AtomicU64, Ordering};

/// Message storage held in a concurrent map. Lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, (u64, MessageEntity)>,
    next_seq: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn collect_sorted(&self, keep: impl Fn(&MessageEntity) -> bool) -> Vec<(u64, MessageEntity)> {
        let mut found: Vec<_> = self
            .entries
            .iter()
            .filter(|e| keep(&e.value().1))
            .map(|e| e.value().clone())
            .collect();
        found.sort_by_key(|(seq, _)| *seq);
        found
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn insert_if_absent(&self, entity: &MessageEntity) -> StorageResult<bool> {
        match self.entries.entry(entity.id.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                slot.insert((seq, entity.clone()));
                Ok(true)
            }
        }
    }

    async fn get(&self, id: &str) -> StorageResult<Option<MessageEntity>> {
        Ok(self.entries.get(id).map(|e| e.value().1.clone()))
    }

    async fn exists(&self, id: &str) -> StorageResult<bool> {
        Ok(self.entries.contains_key(id))
    }

    async fn latest(&self, class: EventClass, limit: u32) -> StorageResult<Vec<MessageEntity>> {
        Ok(self
            .collect_sorted(|e| e.class() == class)
            .into_iter()
            .rev()
            .take(limit as usize)
            .map(|(_, e)| e)
            .collect())
    }

    async fn by_uid(&self, origin_uid: &str) -> StorageResult<Vec<MessageEntity>> {
        Ok(self
            .collect_sorted(|e| e.origin_uid == origin_uid)
            .into_iter()
            .map(|(_, e)| e)
            .collect())
    }

    async fn count(&self, class: EventClass) -> StorageResult<u64> {
        Ok(self
            .entries
            .iter()
            .filter(|e| e.value().1.class() == class)
            .count() as u64)
    }

    async fn delete_all(&self) -> StorageResult<u64> {
        let deleted = self.entries.len() as u64;
        self.entries.clear();
        Ok(deleted)
    }
}
