//! Bridge runtime: one channel, one store, two engines.

use std::sync::Arc;

use lorabridge_core::{resolve_name, Directory, EntityMapper, FrameCodec, RelayOutcome};
use lorabridge_types::{EventClass, Point};
use tokio::sync::Mutex;

use crate::config::{BridgeConfig, ConfigError};
use crate::engine::{EngineContext, SyncEngine};
use crate::error::Result;
use crate::host::{EventFilter, HostBus, Subscription};
use crate::metrics::{BridgeMetrics, MetricsSnapshot};
use crate::storage::{MessageStore, SqliteStore};
use crate::transport::TransportChannel;

/// A running bridge between a host bus and a modem channel.
///
/// `start` and `stop` may be called repeatedly; extra calls are no-ops.
pub struct LoraBridge {
    config: BridgeConfig,
    channel: Arc<TransportChannel>,
    store: Arc<dyn MessageStore>,
    bus: Arc<dyn HostBus>,
    directory: Arc<dyn Directory>,
    metrics: Arc<BridgeMetrics>,
    chat: Arc<SyncEngine>,
    cot: Arc<SyncEngine>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl std::fmt::Debug for LoraBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoraBridge")
            .field("local_uid", &self.config.device.uid)
            .field("running", &self.channel.is_running())
            .field("chat", &self.chat)
            .field("cot", &self.cot)
            .finish_non_exhaustive()
    }
}

impl LoraBridge {
    /// Build a bridge backed by the SQLite database named in `config`.
    pub async fn from_config(
        config: BridgeConfig,
        bus: Arc<dyn HostBus>,
        directory: Arc<dyn Directory>,
    ) -> Result<Self> {
        config.validate()?;
        let store = SqliteStore::open(&config.storage.database).await?;
        tracing::info!(database = %config.storage.database.display(), "storage opened");
        Self::with_store(config, Arc::new(store), bus, directory)
    }

    /// Build a bridge over an existing store.
    ///
    /// The bus must speak for the configured device: `bus.local_uid()` has to
    /// equal `config.device.uid`.
    pub fn with_store(
        config: BridgeConfig,
        store: Arc<dyn MessageStore>,
        bus: Arc<dyn HostBus>,
        directory: Arc<dyn Directory>,
    ) -> Result<Self> {
        config.validate()?;
        if bus.local_uid() != config.device.uid {
            return Err(ConfigError::Invalid(format!(
                "device.uid {:?} does not match host bus uid {:?}",
                config.device.uid,
                bus.local_uid()
            ))
            .into());
        }
        let metrics = Arc::new(BridgeMetrics::default());
        let channel = Arc::new(TransportChannel::new(
            config.transport.clone(),
            Arc::clone(&metrics),
        ));

        let ctx = EngineContext {
            mapper: EntityMapper::new(&config.device.uid),
            codec: FrameCodec::new(config.codec.compaction.compactor()),
            channel: Arc::clone(&channel),
            store: Arc::clone(&store),
            bus: Arc::clone(&bus),
            directory: Arc::clone(&directory),
            metrics: Arc::clone(&metrics),
            inbound_type_filter: config.sync.inbound_type_filter.clone(),
            tracker_capacity: config.sync.tracker_capacity,
        };
        let chat = Arc::new(SyncEngine::new(EventClass::Chat, ctx.clone()));
        let cot = Arc::new(SyncEngine::new(EventClass::Generic, ctx));

        Ok(Self {
            config,
            channel,
            store,
            bus,
            directory,
            metrics,
            chat,
            cot,
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    /// Open the channel and subscribe both engines to the host bus.
    pub async fn start(&self) -> Result<()> {
        let mut subscriptions = self.subscriptions.lock().await;
        if !subscriptions.is_empty() {
            tracing::debug!("bridge already running");
            return Ok(());
        }

        self.channel.register_chat_handler(self.chat.clone());
        self.channel.register_cot_handler(self.cot.clone());
        self.channel.start().await?;

        subscriptions.push(
            self.bus
                .subscribe(EventFilter::Class(EventClass::Chat), self.chat.clone()),
        );
        subscriptions.push(
            self.bus
                .subscribe(EventFilter::Class(EventClass::Generic), self.cot.clone()),
        );

        tracing::info!(
            device = %self.config.device.uid,
            compaction = self.config.codec.compaction.compactor().name(),
            "bridge started"
        );
        Ok(())
    }

    /// Cancel host subscriptions and close the channel.
    pub async fn stop(&self) {
        let mut subscriptions = self.subscriptions.lock().await;
        let was_running = !subscriptions.is_empty();
        for subscription in subscriptions.drain(..) {
            subscription.cancel();
        }
        self.channel.stop().await;
        if was_running {
            tracing::info!(metrics = %self.metrics.snapshot(), "bridge stopped");
        }
    }

    /// Whether the bridge is started.
    pub async fn is_running(&self) -> bool {
        !self.subscriptions.lock().await.is_empty()
    }

    /// Compose and send a chat message from this device.
    ///
    /// The receiver's display name is looked up in the directory.
    pub async fn send_chat(&self, receiver_uid: &str, text: &str) -> RelayOutcome {
        let receiver_callsign = resolve_name(self.directory.as_ref(), receiver_uid);
        let chat = EntityMapper::new(&self.config.device.uid).compose_chat(
            &self.config.device.callsign,
            receiver_uid,
            &receiver_callsign,
            text,
        );
        self.chat.send_local_chat(&chat, Point::unknown()).await
    }

    /// Counter values.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// The message store.
    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// The modem channel.
    pub fn channel(&self) -> &Arc<TransportChannel> {
        &self.channel
    }

    /// Engine for an event class.
    pub fn engine(&self, class: EventClass) -> &Arc<SyncEngine> {
        match class {
            EventClass::Chat => &self.chat,
            EventClass::Generic => &self.cot,
        }
    }

    /// Effective configuration.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayError;
    use crate::host::MemoryHostBus;
    use crate::storage::MemoryStore;
    use lorabridge_types::CotEvent;

    fn bridge(bus: Arc<MemoryHostBus>) -> LoraBridge {
        let mut config = BridgeConfig::default();
        config.device.uid = bus.local_uid().to_string();
        config.transport.rx_port = 0;
        config.transport.tx_port = 9;
        LoraBridge::with_store(config, Arc::new(MemoryStore::new()), bus.clone(), bus).unwrap()
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let bus = Arc::new(MemoryHostBus::new("dev-1"));
        let bridge = bridge(bus.clone());

        bridge.start().await.unwrap();
        bridge.start().await.unwrap();
        assert!(bridge.is_running().await);
        assert_eq!(bus.subscriber_count(), 2);

        bridge.stop().await;
        bridge.stop().await;
        assert!(!bridge.is_running().await);
        assert_eq!(bus.subscriber_count(), 0);
        assert!(!bridge.channel().is_running());
    }

    #[tokio::test]
    async fn host_events_reach_the_store() {
        let bus = Arc::new(MemoryHostBus::new("dev-1"));
        let bridge = bridge(bus.clone());
        bridge.start().await.unwrap();

        bus.publish(CotEvent::new("u1", "a-h-G", "2024-01-01T00:00:00.000Z"))
            .await;
        assert_eq!(bridge.store().count(EventClass::Generic).await.unwrap(), 1);
        assert_eq!(bridge.store().count(EventClass::Chat).await.unwrap(), 0);
        bridge.stop().await;
    }

    #[tokio::test]
    async fn send_chat_resolves_receiver_name() {
        let bus = Arc::new(MemoryHostBus::new("dev-1"));
        bus.add_contact("dev-2", "BRAVO");
        let bridge = bridge(bus.clone());
        bridge.start().await.unwrap();

        let RelayOutcome::Forwarded { id } = bridge.send_chat("dev-2", "hi").await else {
            panic!("chat not forwarded");
        };
        let stored = bridge.store().get(&id).await.unwrap().unwrap();
        let text = stored.raw_text.unwrap();
        assert!(text.contains("chatroom=\"BRAVO\""), "{text}");
        assert!(text.contains("senderCallsign=\"LORA\""), "{text}");
        assert_eq!(bridge.metrics().events_published, 1);
        bridge.stop().await;
    }

    #[test]
    fn bus_for_another_device_is_rejected() {
        let bus = Arc::new(MemoryHostBus::new("dev-1"));
        let mut config = BridgeConfig::default();
        config.device.uid = "dev-2".into();
        let err = LoraBridge::with_store(config, Arc::new(MemoryStore::new()), bus.clone(), bus)
            .unwrap_err();
        assert!(matches!(err, RelayError::Config(ConfigError::Invalid(_))), "{err}");
        assert!(err.to_string().contains("dev-2"));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let bus = Arc::new(MemoryHostBus::new("dev-1"));
        let mut config = BridgeConfig::default();
        config.device.uid = "dev-1".into();
        config.transport.workers = 0;
        assert!(LoraBridge::with_store(config, Arc::new(MemoryStore::new()), bus.clone(), bus).is_err());
    }
}
