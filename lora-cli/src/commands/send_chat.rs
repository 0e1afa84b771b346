//! Send one chat message over the radio and exit.

use anyhow::{Context, Result};
use lorabridge_core::RelayOutcome;
use lorabridge_relay::{BridgeConfig, LoraBridge, MemoryHostBus};
use std::sync::Arc;
use std::time::Duration;

/// Run the send-chat command.
pub async fn run(config: BridgeConfig, to: &str, text: &str) -> Result<()> {
    anyhow::ensure!(!text.trim().is_empty(), "Message is empty");

    let bus = Arc::new(MemoryHostBus::new(config.device.uid.as_str()));
    let flush_timeout = config.transport.join_timeout();
    let bridge = LoraBridge::from_config(config, bus.clone(), bus)
        .await
        .context("Failed to set up bridge")?;
    bridge.start().await.context("Failed to start bridge")?;

    let outcome = bridge.send_chat(to, text).await;
    if outcome.is_forwarded() {
        wait_for_send(&bridge, flush_timeout).await;
    }
    bridge.stop().await;

    match outcome {
        RelayOutcome::Forwarded { id } => {
            println!("Sent to {to} (id {id})");
            Ok(())
        }
        other => anyhow::bail!("Message not sent: {other:?}"),
    }
}

/// Frames leave through the worker pool; give it a moment before closing.
async fn wait_for_send(bridge: &LoraBridge, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    while bridge.metrics().frames_sent == 0 {
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!("frame still queued at shutdown");
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lorabridge_relay::{MessageStore, SqliteStore};
    use lorabridge_types::EventClass;
    use tempfile::tempdir;

    fn config(dir: &std::path::Path) -> BridgeConfig {
        let mut config = BridgeConfig::default();
        config.transport.rx_port = 0;
        config.transport.tx_port = 9;
        config.storage.database = dir.join("bridge.db");
        config
    }

    #[tokio::test]
    async fn message_is_persisted() {
        let dir = tempdir().unwrap();
        run(config(dir.path()), "dev-2", "on my way").await.unwrap();

        let store = SqliteStore::open(&dir.path().join("bridge.db")).await.unwrap();
        assert_eq!(store.count(EventClass::Chat).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn empty_message_is_refused() {
        let dir = tempdir().unwrap();
        assert!(run(config(dir.path()), "dev-2", "  ").await.is_err());
        assert!(!dir.path().join("bridge.db").exists());
    }
}
