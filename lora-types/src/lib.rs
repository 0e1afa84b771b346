//! # lorabridge-types
//!
//! Data model for the CoT-to-LoRa bridge.
//!
//! This crate provides the types shared by every other crate:
//! - [`CotEvent`], [`DetailNode`], [`Point`] - host-side events and their XML text form
//! - [`MessageEntity`], [`ChatMessage`] - what the bridge persists and relays
//! - [`WireFrame`], [`ChannelTag`] - the delimited frame exchanged with the modem
//! - [`LoopMarker`], [`Origin`] - loop-prevention tagging
//! - [`CodecError`] - error type

#![warn(missing_docs)]
#![warn(clippy::all)]

mod entity;
mod error;
mod event;
mod frame;
mod marker;
mod xml;

pub use entity::{ChatMessage, Direction, MessageEntity};
pub use error::CodecError;
pub use event::{CotEvent, DetailNode, EventClass, Point, CHAT_TYPE, UNKNOWN_METRIC};
pub use frame::{
    ChannelTag, FrameHeader, WireFrame, DELIMITER, HEADER_FIELDS, MIN_FIELDS, ROUTING_PROBE_LEN,
};
pub use marker::{LoopMarker, Origin, UnknownOrigin, LOOP_MARKER_NODE};
