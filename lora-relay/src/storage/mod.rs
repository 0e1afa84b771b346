//! Storage layer for relayed messages.
//!
//! Entities are keyed by their dedup id. Inserting an id that already exists
//! is a no-op, never an overwrite; this uniqueness is the final word on
//! whether a message was already relayed.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::StorageResult;
use async_trait::async_trait;
use lorabridge_types::{EventClass, MessageEntity};

/// Trait for message storage backends.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Store an entity unless its id is already present.
    ///
    /// Returns `true` if the entity was inserted.
    async fn insert_if_absent(&self, entity: &MessageEntity) -> StorageResult<bool>;

    /// Get an entity by id.
    async fn get(&self, id: &str) -> StorageResult<Option<MessageEntity>>;

    /// Whether an entity with this id is stored.
    async fn exists(&self, id: &str) -> StorageResult<bool>;

    /// Most recently stored entities of a class, newest first.
    async fn latest(&self, class: EventClass, limit: u32) -> StorageResult<Vec<MessageEntity>>;

    /// Entities originating from an event uid, oldest first.
    async fn by_uid(&self, origin_uid: &str) -> StorageResult<Vec<MessageEntity>>;

    /// Number of stored entities of a class.
    async fn count(&self, class: EventClass) -> StorageResult<u64>;

    /// Remove everything.
    ///
    /// Returns the number of entities deleted.
    async fn delete_all(&self) -> StorageResult<u64>;
}
