//! SQLite storage backend.

use super::MessageStore;
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use lorabridge_types::{EventClass, MessageEntity};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

const TABLES: [&str; 2] = ["generic_cot", "chat_messages"];

fn table(class: EventClass) -> &'static str {
    match class {
        EventClass::Generic => "generic_cot",
        EventClass::Chat => "chat_messages",
    }
}

/// SQLite-based message storage.
///
/// Generic and chat entities live in separate tables with the same layout.
/// Uses WAL mode for concurrent reads/writes.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("connections", &self.pool.size())
            .finish()
    }
}

impl SqliteStore {
    /// Open a database file, or an in-memory database for `:memory:`.
    ///
    /// Creates the database file if it doesn't exist.
    pub async fn open(path: &Path) -> StorageResult<Self> {
        if path == Path::new(":memory:") {
            return Self::in_memory().await;
        }
        let url = path.to_str().ok_or_else(|| StorageError::InvalidPath {
            path: path.to_path_buf(),
        })?;

        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory store (for tests and throwaway runs).
    pub async fn in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str(":memory:")?;

        // A single connection that is never recycled; closing it drops the data.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> StorageResult<()> {
        for name in TABLES {
            sqlx::query(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {name} (
                    id TEXT PRIMARY KEY,
                    origin_uid TEXT NOT NULL,
                    msg_type TEXT NOT NULL,
                    time_iso TEXT NOT NULL,
                    origin_label TEXT NOT NULL,
                    raw_text TEXT,
                    compressed BLOB,
                    stored_at INTEGER NOT NULL
                )
                "#
            ))
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Migration(format!("{name}: {e}")))?;

            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{name}_origin_uid ON {name}(origin_uid)"
            ))
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Migration(format!("{name}: {e}")))?;
        }
        Ok(())
    }

    fn current_timestamp() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn insert_if_absent(&self, entity: &MessageEntity) -> StorageResult<bool> {
        // An id lives in exactly one table; a chat id seen as generic is still a duplicate.
        if self.exists(&entity.id).await? {
            return Ok(false);
        }

        let result = sqlx::query(&format!(
            r#"
            INSERT OR IGNORE INTO {} (id, origin_uid, msg_type, time_iso, origin_label, raw_text, compressed, stored_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            table(entity.class())
        ))
        .bind(&entity.id)
        .bind(&entity.origin_uid)
        .bind(&entity.msg_type)
        .bind(&entity.time_iso)
        .bind(&entity.origin_label)
        .bind(entity.raw_text.as_deref())
        .bind(entity.compressed.as_deref())
        .bind(Self::current_timestamp())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, id: &str) -> StorageResult<Option<MessageEntity>> {
        for name in TABLES {
            let row = sqlx::query_as::<_, EntityRow>(&format!(
                r#"
                SELECT id, origin_uid, msg_type, time_iso, origin_label, raw_text, compressed
                FROM {name}
                WHERE id = ?1
                "#
            ))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

            if let Some(row) = row {
                return Ok(Some(row.into()));
            }
        }
        Ok(None)
    }

    async fn exists(&self, id: &str) -> StorageResult<bool> {
        let found: i64 = sqlx::query_scalar(
            r#"
            SELECT EXISTS(SELECT 1 FROM generic_cot WHERE id = ?1)
                OR EXISTS(SELECT 1 FROM chat_messages WHERE id = ?1)
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(found != 0)
    }

    async fn latest(&self, class: EventClass, limit: u32) -> StorageResult<Vec<MessageEntity>> {
        let rows = sqlx::query_as::<_, EntityRow>(&format!(
            r#"
            SELECT id, origin_uid, msg_type, time_iso, origin_label, raw_text, compressed
            FROM {}
            ORDER BY rowid DESC
            LIMIT ?1
            "#,
            table(class)
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn by_uid(&self, origin_uid: &str) -> StorageResult<Vec<MessageEntity>> {
        let rows = sqlx::query_as::<_, EntityRow>(
            r#"
            SELECT id, origin_uid, msg_type, time_iso, origin_label, raw_text, compressed
            FROM (
                SELECT *, rowid AS seq, 0 AS tbl FROM generic_cot WHERE origin_uid = ?1
                UNION ALL
                SELECT *, rowid AS seq, 1 AS tbl FROM chat_messages WHERE origin_uid = ?1
            )
            ORDER BY stored_at ASC, tbl ASC, seq ASC
            "#,
        )
        .bind(origin_uid)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn count(&self, class: EventClass) -> StorageResult<u64> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table(class)))
            .fetch_one(&self.pool)
            .await?;

        Ok(count as u64)
    }

    async fn delete_all(&self) -> StorageResult<u64> {
        let mut tx = self.pool.begin().await?;
        let mut deleted = 0;
        for name in TABLES {
            deleted += sqlx::query(&format!("DELETE FROM {name}"))
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(deleted)
    }
}

/// Internal row type for SQLite queries.
#[derive(sqlx::FromRow)]
struct EntityRow {
    id: String,
    origin_uid: String,
    msg_type: String,
    time_iso: String,
    origin_label: String,
    raw_text: Option<String>,
    compressed: Option<Vec<u8>>,
}

impl From<EntityRow> for MessageEntity {
    fn from(row: EntityRow) -> Self {
        MessageEntity {
            id: row.id,
            origin_uid: row.origin_uid,
            msg_type: row.msg_type,
            time_iso: row.time_iso,
            origin_label: row.origin_label,
            raw_text: row.raw_text,
            compressed: row.compressed,
        }
    }
}
