//! Mapping between host events and relay entities.
//!
//! Host to radio: an event becomes a [`MessageEntity`] whose text is the
//! canonical XML of the event and whose id is the dedup key for the class.
//! Radio to host: an entity's text is parsed back into an event and tagged
//! with a loop marker before it is published.
//!
//! The chat helpers give the conversational view of `b-t-f` events and build
//! the event for a locally composed chat message.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use lorabridge_types::{
    ChatMessage, CodecError, CotEvent, DetailNode, Direction, EventClass, LoopMarker,
    MessageEntity, Origin, Point, CHAT_TYPE,
};
use sha2::{Digest, Sha256};

/// Chat detail node.
pub const CHAT_NODE: &str = "__chat";

/// Seconds a composed chat event stays fresh.
pub const CHAT_STALE_SECS: i64 = 300;

/// Current time as ISO-8601 UTC with millisecond precision.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Collapse whitespace between tags and trim.
///
/// Text content is left alone; only whitespace-only runs between `>` and `<`
/// are removed.
pub fn canonicalize(text: &str) -> String {
    let trimmed = text.trim();
    let mut out = String::with_capacity(trimmed.len());
    let mut chars = trimmed.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        out.push(c);
        if c != '>' {
            continue;
        }
        let rest = &trimmed[i + 1..];
        let gap = rest.len() - rest.trim_start().len();
        if gap > 0 && rest[gap..].starts_with('<') {
            while chars.peek().is_some_and(|&(j, _)| j < i + 1 + gap) {
                chars.next();
            }
        }
    }
    out
}

/// Content-derived id of a generic event.
///
/// Hex SHA-256 of `uid|type|time|<canonical text length>`. Two observations
/// of the same event on one host collapse to one id.
pub fn content_id(uid: &str, msg_type: &str, time: &str, text_len: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{uid}|{msg_type}|{time}|{text_len}").as_bytes());
    hex::encode(hasher.finalize())
}

/// Declared id of a chat event, stable across hops.
///
/// Priority: loop marker `originalId`, then `__chat@messageId`, then the
/// event uid.
pub fn declared_chat_id(event: &CotEvent) -> String {
    if let Some(marker) = event.loop_marker() {
        if !marker.original_id.is_empty() {
            return marker.original_id;
        }
    }
    event
        .detail
        .child(CHAT_NODE)
        .and_then(|chat| chat.attr("messageId"))
        .filter(|id| !id.is_empty())
        .unwrap_or(&event.uid)
        .to_string()
}

/// Display-name lookup for device uids.
pub trait Directory: Send + Sync {
    /// Display name for `uid`, if known.
    fn display_name(&self, uid: &str) -> Result<Option<String>, DirectoryError>;
}

/// A directory lookup failed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("directory lookup failed: {0}")]
pub struct DirectoryError(pub String);

/// Directory that knows nobody.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDirectory;

impl Directory for NoDirectory {
    fn display_name(&self, _uid: &str) -> Result<Option<String>, DirectoryError> {
        Ok(None)
    }
}

/// Resolve a uid to a display name, falling back to the uid itself.
pub fn resolve_name(directory: &dyn Directory, uid: &str) -> String {
    match directory.display_name(uid) {
        Ok(Some(name)) if !name.is_empty() => name,
        Ok(_) => uid.to_string(),
        Err(e) => {
            tracing::debug!(uid, error = %e, "directory lookup failed, using raw uid");
            uid.to_string()
        }
    }
}

/// Converts between events and entities for one bridge instance.
#[derive(Debug, Clone)]
pub struct EntityMapper {
    local_uid: String,
}

impl EntityMapper {
    /// Create a mapper for the instance with device uid `local_uid`.
    pub fn new(local_uid: impl Into<String>) -> Self {
        Self {
            local_uid: local_uid.into(),
        }
    }

    /// Device uid of this instance.
    pub fn local_uid(&self) -> &str {
        &self.local_uid
    }

    /// Build an entity from a host event.
    ///
    /// `origin` becomes the frame's origin label.
    pub fn from_host_event(&self, event: &CotEvent, origin: Origin) -> MessageEntity {
        let text = canonicalize(&event.to_xml());
        let time = if event.time.is_empty() {
            now_iso()
        } else {
            event.time.clone()
        };
        let id = match event.class() {
            EventClass::Chat => declared_chat_id(event),
            EventClass::Generic => content_id(&event.uid, &event.event_type, &time, text.len()),
        };

        MessageEntity {
            id,
            origin_uid: event.uid.clone(),
            msg_type: event.event_type.clone(),
            time_iso: time,
            origin_label: origin.label().to_string(),
            raw_text: Some(text),
            compressed: None,
        }
    }

    /// Parse an entity's text back into an event, untouched.
    pub fn parse_entity(&self, entity: &MessageEntity) -> Result<CotEvent, CodecError> {
        let text = entity
            .raw_text
            .as_deref()
            .ok_or_else(|| CodecError::MissingPayload {
                id: entity.id.clone(),
            })?;
        let event = CotEvent::from_xml(text)?;
        if !event.is_valid() {
            return Err(CodecError::InvalidEvent(format!(
                "entity {} decodes to an event missing required attributes",
                entity.id
            )));
        }
        Ok(event)
    }

    /// Rebuild a host event from a decoded entity, tagged as coming from
    /// `origin` with the entity id as `originalId`.
    pub fn to_host_event(
        &self,
        entity: &MessageEntity,
        origin: Origin,
    ) -> Result<CotEvent, CodecError> {
        let mut event = self.parse_entity(entity)?;
        event.set_loop_marker(&self.marker(origin, &entity.id));
        Ok(event)
    }

    /// A loop marker stamped with this instance.
    pub fn marker(&self, origin: Origin, original_id: &str) -> LoopMarker {
        LoopMarker::new(origin, original_id).with_instance(self.local_uid.as_str())
    }

    /// Compose a new chat message from the local device.
    pub fn compose_chat(
        &self,
        sender_callsign: &str,
        receiver_uid: &str,
        receiver_callsign: &str,
        message: &str,
    ) -> ChatMessage {
        ChatMessage {
            id: uuid::Uuid::new_v4().to_string(),
            sender_uid: self.local_uid.clone(),
            sender_callsign: sender_callsign.to_string(),
            receiver_uid: receiver_uid.to_string(),
            receiver_callsign: receiver_callsign.to_string(),
            message: message.to_string(),
            timestamp: now_iso(),
            message_type: "text".to_string(),
            origin: Origin::Local.label().to_string(),
            direction: Direction::Outgoing,
        }
    }

    /// Build the host event for a chat message.
    ///
    /// The event carries a local loop marker whose `originalId` is the chat
    /// id, so every hop reuses the same dedup key.
    pub fn chat_to_event(&self, chat: &ChatMessage, position: Point) -> CotEvent {
        let stale = DateTime::parse_from_rfc3339(&chat.timestamp)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
            + Duration::seconds(CHAT_STALE_SECS);

        let chat_node = DetailNode::new(CHAT_NODE)
            .with_attr("parent", "RootContactGroup")
            .with_attr("groupOwner", "false")
            .with_attr("messageId", chat.id.as_str())
            .with_attr("chatroom", chat.receiver_callsign.as_str())
            .with_attr("id", chat.receiver_uid.as_str())
            .with_attr("senderCallsign", chat.sender_callsign.as_str())
            .with_attr("sender", chat.sender_uid.as_str())
            .with_attr("messageType", chat.message_type.as_str())
            .with_child(
                DetailNode::new("chatgrp")
                    .with_attr("uid0", chat.sender_uid.as_str())
                    .with_attr("uid1", chat.receiver_uid.as_str())
                    .with_attr("id", chat.receiver_uid.as_str()),
            );

        let mut event = CotEvent::new(
            format!("PluginMsg.{}.{}.{}", chat.sender_uid, chat.receiver_uid, chat.id),
            CHAT_TYPE,
            chat.timestamp.as_str(),
        )
        .with_how("h-g-i-g-o")
        .with_stale(stale.to_rfc3339_opts(SecondsFormat::Millis, true))
        .with_point(position)
        .with_detail(chat_node)
        .with_detail(
            DetailNode::new("link")
                .with_attr("uid", chat.sender_uid.as_str())
                .with_attr("type", "a-f-G-U-C")
                .with_attr("relation", "p-p"),
        )
        .with_detail(
            DetailNode::new("remarks")
                .with_attr("source", format!("BAO.F.ATAK.{}", chat.sender_uid))
                .with_attr("to", chat.receiver_uid.as_str())
                .with_attr("time", chat.timestamp.as_str())
                .with_text(chat.message.as_str()),
        );
        event.set_loop_marker(&self.marker(Origin::Local, &chat.id));
        event
    }

    /// Conversational view of a chat event.
    ///
    /// Names missing from the event are resolved through `directory`, falling
    /// back to the raw uid. Fails when the event is not a chat or has no
    /// sender or body.
    pub fn chat_from_event(
        &self,
        event: &CotEvent,
        directory: &dyn Directory,
    ) -> Result<ChatMessage, CodecError> {
        if event.class() != EventClass::Chat {
            return Err(CodecError::InvalidEvent(format!(
                "type {} is not a chat",
                event.event_type
            )));
        }
        let chat = event.detail.child(CHAT_NODE);
        let remarks = event.detail.child("remarks");
        let chat_attr = |key: &str| chat.and_then(|c| c.attr(key)).filter(|v| !v.is_empty());

        let sender_uid = event
            .detail
            .child("link")
            .and_then(|l| l.attr("uid"))
            .or_else(|| chat_attr("sender"))
            .ok_or_else(|| CodecError::InvalidEvent("chat has no sender".into()))?
            .to_string();
        let message = chat_attr("message")
            .or_else(|| remarks.and_then(|r| r.text.as_deref()))
            .ok_or_else(|| CodecError::InvalidEvent("chat has no body".into()))?
            .to_string();
        let receiver_uid = chat_attr("id")
            .or_else(|| remarks.and_then(|r| r.attr("to")))
            .unwrap_or_default()
            .to_string();

        let sender_callsign = match chat_attr("senderCallsign") {
            Some(name) => name.to_string(),
            None => resolve_name(directory, &sender_uid),
        };
        let receiver_callsign = resolve_name(directory, &receiver_uid);
        let direction = if sender_uid == self.local_uid {
            Direction::Outgoing
        } else {
            Direction::Incoming
        };
        let origin = event
            .loop_marker()
            .map(|m| m.origin)
            .unwrap_or(Origin::Host);

        Ok(ChatMessage {
            id: declared_chat_id(event),
            sender_uid,
            sender_callsign,
            receiver_uid,
            receiver_callsign,
            message,
            timestamp: event.time.clone(),
            message_type: chat_attr("messageType").unwrap_or("text").to_string(),
            origin: origin.label().to_string(),
            direction,
        })
    }
}
