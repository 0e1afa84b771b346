//! Bidirectional sync engine for one event class.
//!
//! Two instances run per bridge, one for chat and one for generic CoT. Each
//! listens on the host bus for its class and on the channel for its prefix.
//!
//! Host to radio:
//! `loop check -> map -> encode -> dedup -> persist -> tag original -> send`
//!
//! Radio to host:
//! `decode -> type filter -> loop check -> dedup -> persist -> tag -> publish`
//!
//! The directions share nothing but the store. Every entry point returns a
//! [`RelayOutcome`]; errors never reach the host bus or the channel.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use lorabridge_core::{
    check_host_event, check_radio_event, DedupTracker, Directory, EntityMapper, FrameCodec,
    RelayOutcome, RelayStage,
};
use lorabridge_types::{ChannelTag, ChatMessage, CotEvent, EventClass, MessageEntity, Origin, Point};

use crate::host::{HostBus, HostEventHandler};
use crate::metrics::{bump, BridgeMetrics};
use crate::storage::MessageStore;
use crate::transport::{handler_prefix, FrameHandler, TransportChannel};

/// Dependencies shared by both engines of a bridge.
#[derive(Clone)]
pub struct EngineContext {
    /// Event/entity mapping for this device.
    pub mapper: EntityMapper,
    /// Frame codec.
    pub codec: FrameCodec,
    /// Modem channel.
    pub channel: Arc<TransportChannel>,
    /// Message store.
    pub store: Arc<dyn MessageStore>,
    /// Host bus events are published to.
    pub bus: Arc<dyn HostBus>,
    /// Display-name lookup for chat logging.
    pub directory: Arc<dyn Directory>,
    /// Counters.
    pub metrics: Arc<BridgeMetrics>,
    /// Types never published to the host from the radio.
    pub inbound_type_filter: Vec<String>,
    /// Dedup tracker capacity per direction.
    pub tracker_capacity: usize,
}

/// Relays one event class in both directions.
pub struct SyncEngine {
    class: EventClass,
    ctx: EngineContext,
    inbound_filter: HashSet<String>,
    to_radio: DedupTracker,
    to_host: DedupTracker,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("class", &self.class)
            .field("local_uid", &self.ctx.mapper.local_uid())
            .field("to_radio", &self.to_radio.len())
            .field("to_host", &self.to_host.len())
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Create an engine for `class`.
    pub fn new(class: EventClass, ctx: EngineContext) -> Self {
        let inbound_filter = ctx.inbound_type_filter.iter().cloned().collect();
        let to_radio = DedupTracker::with_capacity(ctx.tracker_capacity);
        let to_host = DedupTracker::with_capacity(ctx.tracker_capacity);
        Self {
            class,
            ctx,
            inbound_filter,
            to_radio,
            to_host,
        }
    }

    /// Class handled by this engine.
    pub fn class(&self) -> EventClass {
        self.class
    }

    fn local_uid(&self) -> &str {
        self.ctx.mapper.local_uid()
    }

    fn suppressed(&self, outcome: RelayOutcome) -> RelayOutcome {
        bump(&self.ctx.metrics.loops_suppressed);
        outcome
    }

    fn duplicate(&self, id: String) -> RelayOutcome {
        bump(&self.ctx.metrics.duplicates_dropped);
        tracing::debug!(class = %self.class, %id, "duplicate, not relayed");
        RelayOutcome::Duplicate { id }
    }

    /// Persist an entity. `Some(outcome)` means stop here.
    async fn persist(&self, entity: &MessageEntity) -> Option<RelayOutcome> {
        match self.ctx.store.insert_if_absent(entity).await {
            Ok(true) => None,
            Ok(false) => Some(self.duplicate(entity.id.clone())),
            Err(e) => {
                tracing::warn!(id = %entity.id, error = %e, "persist failed, relaying anyway");
                None
            }
        }
    }

    /// Relay a host event to the radio.
    ///
    /// On success the event itself is tagged with a host loop marker, so
    /// later host listeners know it was already relayed.
    pub async fn relay_to_radio(&self, event: &mut CotEvent) -> RelayOutcome {
        if event.class() != self.class {
            return RelayOutcome::WrongClass;
        }
        if let Some(reason) = check_host_event(event, self.local_uid()) {
            tracing::debug!(uid = %event.uid, %reason, "host event not relayed");
            return self.suppressed(RelayOutcome::LoopSuppressed(reason));
        }

        let entity = self.ctx.mapper.from_host_event(event, Origin::Host);
        self.transmit(entity, Some(event)).await
    }

    /// Encode, dedup, persist, optionally tag, and send an entity.
    ///
    /// An entity that cannot be framed leaves no trace in the tracker, the
    /// store or the original event.
    async fn transmit(&self, entity: MessageEntity, original: Option<&mut CotEvent>) -> RelayOutcome {
        let frame = match self.ctx.codec.encode(&entity) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(id = %entity.id, error = %e, "encode failed");
                return RelayOutcome::failed(RelayStage::Encoded, e);
            }
        };

        if !self.to_radio.check_and_mark(&entity.id) {
            return self.duplicate(entity.id);
        }
        if let Some(stop) = self.persist(&entity).await {
            return stop;
        }
        if let Some(event) = original {
            event.set_loop_marker(&self.ctx.mapper.marker(Origin::Host, &entity.id));
        }
        tracing::debug!(
            class = %self.class,
            id = %entity.id,
            msg_type = %entity.msg_type,
            bytes = frame.len(),
            "relaying to radio"
        );
        self.ctx.channel.send(ChannelTag::for_class(self.class), &frame);
        RelayOutcome::Forwarded { id: entity.id }
    }

    /// Relay an inbound frame to the host bus.
    pub async fn handle_radio_frame(&self, payload: &[u8]) -> RelayOutcome {
        let (entity, mut event) = match self.decode(payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                bump(&self.ctx.metrics.decode_failures);
                tracing::warn!(class = %self.class, error = %e, "dropping undecodable frame");
                return RelayOutcome::failed(RelayStage::Decoded, e);
            }
        };

        if entity.class() != self.class {
            tracing::warn!(
                class = %self.class,
                msg_type = %entity.msg_type,
                "frame arrived on the wrong channel"
            );
            return RelayOutcome::WrongClass;
        }
        if self.inbound_filter.contains(&entity.msg_type) {
            bump(&self.ctx.metrics.filtered);
            tracing::info!(msg_type = %entity.msg_type, id = %entity.id, "inbound type filtered");
            return RelayOutcome::Filtered {
                msg_type: entity.msg_type,
            };
        }
        if let Some(reason) = check_radio_event(&event, self.local_uid()) {
            tracing::debug!(id = %entity.id, %reason, "radio frame not published");
            return self.suppressed(RelayOutcome::LoopSuppressed(reason));
        }
        if !self.to_host.check_and_mark(&entity.id) {
            return self.duplicate(entity.id);
        }
        if let Some(stop) = self.persist(&entity).await {
            return stop;
        }

        event.set_loop_marker(&self.ctx.mapper.marker(Origin::Radio, &entity.id));
        if self.class == EventClass::Chat {
            self.log_chat(&event);
        }
        self.ctx.bus.publish(event).await;
        bump(&self.ctx.metrics.events_published);
        tracing::debug!(class = %self.class, id = %entity.id, "published to host");
        RelayOutcome::Forwarded { id: entity.id }
    }

    fn decode(&self, payload: &[u8]) -> Result<(MessageEntity, CotEvent), lorabridge_types::CodecError> {
        // The channel has already stripped what it strips; never strip twice.
        let expected = handler_prefix(ChannelTag::for_class(self.class));
        let entity = self.ctx.codec.decode_expecting(payload, expected)?;
        let event = self.ctx.mapper.parse_entity(&entity)?;
        Ok((entity, event))
    }

    fn log_chat(&self, event: &CotEvent) {
        match self.ctx.mapper.chat_from_event(event, self.ctx.directory.as_ref()) {
            Ok(chat) => tracing::info!(
                from = %chat.sender_callsign,
                to = %chat.receiver_callsign,
                direction = ?chat.direction,
                "chat received over radio"
            ),
            Err(e) => tracing::debug!(error = %e, "chat event without a chat view"),
        }
    }

    /// Send a chat message composed on this device.
    ///
    /// The message is persisted, transmitted, and published to the host
    /// tagged as locally generated.
    pub async fn send_local_chat(&self, chat: &ChatMessage, position: Point) -> RelayOutcome {
        if self.class != EventClass::Chat {
            return RelayOutcome::WrongClass;
        }
        let event = self.ctx.mapper.chat_to_event(chat, position);
        let entity = self.ctx.mapper.from_host_event(&event, Origin::Local);

        let outcome = self.transmit(entity, None).await;
        if outcome.is_forwarded() {
            self.ctx.bus.publish(event).await;
            bump(&self.ctx.metrics.events_published);
        }
        outcome
    }
}

#[async_trait]
impl HostEventHandler for SyncEngine {
    async fn on_event(&self, event: &mut CotEvent) {
        let outcome = self.relay_to_radio(event).await;
        tracing::trace!(class = %self.class, ?outcome, "host event handled");
    }
}

#[async_trait]
impl FrameHandler for SyncEngine {
    async fn on_frame(&self, payload: Vec<u8>) {
        let outcome = self.handle_radio_frame(&payload).await;
        tracing::trace!(class = %self.class, ?outcome, "radio frame handled");
    }
}
