//! # lorabridge-relay
//!
//! Runtime half of the CoT-to-LoRa bridge.
//!
//! This crate:
//! - Exchanges delimited frames with a local modem process over UDP
//! - Relays host events to the radio and radio frames to the host
//! - Persists every relayed message exactly once
//! - Stops messages from circulating between host and radio
//!
//! ## Architecture
//!
//! ```text
//!   host bus                                        modem process
//!  ┌────────┐  chat   ┌────────────┐  LORA|       ┌───────────┐
//!  │        │◄───────►│ SyncEngine │◄────────────►│           │
//!  │  CoT   │         └─────┬──────┘               │  UDP      │
//!  │ events │  other  ┌─────┴──────┐  LORA_COTX|  │ 1382/1383 │
//!  │        │◄───────►│ SyncEngine │◄────────────►│           │
//!  └────────┘         └─────┬──────┘               └───────────┘
//!                     ┌─────┴──────┐
//!                     │   SQLite   │
//!                     └────────────┘
//! ```
//!
//! [`LoraBridge`] wires the pieces together.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bridge;
pub mod config;
pub mod engine;
pub mod error;
pub mod host;
pub mod metrics;
pub mod storage;
pub mod transport;

pub use bridge::LoraBridge;
pub use config::{BridgeConfig, ConfigError};
pub use engine::{EngineContext, SyncEngine};
pub use error::{RelayError, Result, StorageError, TransportError};
pub use host::{EventFilter, HostBus, HostEventHandler, MemoryHostBus, Subscription};
pub use metrics::{BridgeMetrics, MetricsSnapshot};
pub use storage::{MemoryStore, MessageStore, SqliteStore};
pub use transport::{FrameHandler, TransportChannel};
