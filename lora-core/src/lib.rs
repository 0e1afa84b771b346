//! # lorabridge-core
//!
//! Pure logic for the CoT-to-LoRa bridge (no I/O, instant tests).
//!
//! - [`compact`] - compaction schemes for canonical event text
//! - [`codec`] - entity <-> wire frame encoding
//! - [`mapper`] - host event <-> entity mapping, dedup ids, chat view
//! - [`tracker`] - bounded in-memory dedup per relay direction
//! - [`state`] - pipeline stages, relay outcomes and loop checks
//!
//! Sockets, persistence and the host bus live in `lorabridge-relay`, which
//! drives these pieces.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod compact;
pub mod mapper;
pub mod state;
pub mod tracker;

pub use codec::FrameCodec;
pub use compact::{BinaryXml, Compaction, Compactor, PlainText};
pub use mapper::{
    canonicalize, content_id, declared_chat_id, now_iso, resolve_name, Directory, DirectoryError,
    EntityMapper, NoDirectory, CHAT_NODE,
};
pub use state::{check_host_event, check_radio_event, RelayOutcome, RelayStage, Suppression};
pub use tracker::{DedupTracker, DEFAULT_TRACKER_CAPACITY};
