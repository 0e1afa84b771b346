//! List messages the bridge has relayed.

use anyhow::{Context, Result};
use lorabridge_relay::{MessageStore, SqliteStore};
use lorabridge_types::{EventClass, MessageEntity};
use serde_json::json;
use std::path::Path;

/// Run the history command.
pub async fn run(database: &Path, class: EventClass, limit: u32, as_json: bool) -> Result<()> {
    if database != Path::new(":memory:") && !database.exists() {
        println!("No database at {}", database.display());
        return Ok(());
    }
    let store = SqliteStore::open(database)
        .await
        .with_context(|| format!("Failed to open {}", database.display()))?;
    let entities = store
        .latest(class, limit)
        .await
        .context("Failed to query history")?;
    let total = store.count(class).await.context("Failed to count messages")?;

    if as_json {
        for entity in &entities {
            println!("{}", to_json(entity));
        }
        return Ok(());
    }

    println!("=== {} messages ({} of {}) ===", class, entities.len(), total);
    for entity in &entities {
        println!(
            "{}  {:<8} {:<14} {}  {}",
            entity.time_iso,
            display_origin(&entity.origin_label),
            entity.msg_type,
            entity.origin_uid,
            entity.id
        );
    }
    Ok(())
}

fn display_origin(label: &str) -> &str {
    if label.is_empty() {
        "-"
    } else {
        label
    }
}

/// One JSON object per entity; compacted bytes are left out.
fn to_json(entity: &MessageEntity) -> serde_json::Value {
    json!({
        "id": entity.id,
        "uid": entity.origin_uid,
        "type": entity.msg_type,
        "time": entity.time_iso,
        "origin": entity.origin_label,
        "xml": entity.raw_text,
    })
}
