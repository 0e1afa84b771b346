//! Internal entities persisted by the bridge.

use serde::{Deserialize, Serialize};

use crate::event::EventClass;

/// The unit of persistence, dedup and framing.
///
/// `id` is the dedup key. `origin_label` only feeds loop suppression.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEntity {
    /// Dedup key: a content hash (generic) or the declared message id (chat).
    pub id: String,
    /// Uid of the originating event.
    pub origin_uid: String,
    /// CoT type tag.
    pub msg_type: String,
    /// Event time (ISO-8601 UTC).
    pub time_iso: String,
    /// Which side produced this entity.
    pub origin_label: String,
    /// Canonical XML text of the event.
    pub raw_text: Option<String>,
    /// Compacted form of `raw_text`, once encoded or decoded.
    pub compressed: Option<Vec<u8>>,
}

impl MessageEntity {
    /// Class of this entity, by type tag.
    pub fn class(&self) -> EventClass {
        EventClass::of(&self.msg_type)
    }
}

impl std::fmt::Debug for MessageEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageEntity")
            .field("id", &self.id)
            .field("origin_uid", &self.origin_uid)
            .field("msg_type", &self.msg_type)
            .field("time_iso", &self.time_iso)
            .field("origin_label", &self.origin_label)
            .field(
                "raw_text",
                &self.raw_text.as_ref().map(|t| format!("[{} chars]", t.len())),
            )
            .field(
                "compressed",
                &self.compressed.as_ref().map(|c| format!("[{} bytes]", c.len())),
            )
            .finish()
    }
}

/// Whether a chat message was sent by this device or to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Sent by another party.
    Incoming,
    /// Sent by the local device.
    Outgoing,
}

/// Conversational view of a chat-class event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Declared message id, stable across hops.
    pub id: String,
    /// Sender device uid.
    pub sender_uid: String,
    /// Sender display name.
    pub sender_callsign: String,
    /// Receiver device or room uid.
    pub receiver_uid: String,
    /// Receiver display name, resolved through the directory.
    pub receiver_callsign: String,
    /// Message body.
    pub message: String,
    /// Send time (ISO-8601 UTC).
    pub timestamp: String,
    /// Message kind, usually `text`.
    pub message_type: String,
    /// Origin label.
    pub origin: String,
    /// Relative to the local device.
    pub direction: Direction,
}

impl ChatMessage {
    /// The other party's display name relative to the local device.
    pub fn counterpart_callsign(&self) -> &str {
        match self.direction {
            Direction::Outgoing => &self.receiver_callsign,
            Direction::Incoming => &self.sender_callsign,
        }
    }
}
