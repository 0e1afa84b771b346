//! Loop-prevention marker carried in an event's detail tree.
//!
//! A single `__lora` node records where a relayed copy came from and the id
//! of the message it was derived from. It is the only anti-loop mechanism
//! shared by the two relay directions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::event::{CotEvent, DetailNode};

/// Name of the detail node carrying the marker.
pub const LOOP_MARKER_NODE: &str = "__lora";

/// Which side of the bridge a relayed copy came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    /// Observed on the host event bus.
    Host,
    /// Decoded from a radio frame.
    Radio,
    /// Created by this bridge (e.g. a chat typed into the plugin).
    Local,
}

impl Origin {
    /// Label written into markers and frame headers.
    pub fn label(&self) -> &'static str {
        match self {
            Origin::Host => "ATAK",
            Origin::Radio => "PHY",
            Origin::Local => "Plugin",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Error returned when a label names no known origin.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown origin label: {0}")]
pub struct UnknownOrigin(pub String);

impl FromStr for Origin {
    type Err = UnknownOrigin;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ATAK" | "GeoChat" => Ok(Origin::Host),
            "PHY" | "LoRa" => Ok(Origin::Radio),
            "Plugin" => Ok(Origin::Local),
            other => Err(UnknownOrigin(other.to_string())),
        }
    }
}

/// The marker itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopMarker {
    /// Side the marked copy came from.
    pub origin: Origin,
    /// Id of the message the marked copy was derived from.
    pub original_id: String,
    /// Device uid of the bridge instance that wrote the marker.
    pub instance: Option<String>,
}

impl LoopMarker {
    /// Create a marker without an instance stamp.
    pub fn new(origin: Origin, original_id: impl Into<String>) -> Self {
        Self {
            origin,
            original_id: original_id.into(),
            instance: None,
        }
    }

    /// Builder: stamp the writing instance.
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    /// Express as a detail node.
    pub fn to_node(&self) -> DetailNode {
        let node = DetailNode::new(LOOP_MARKER_NODE)
            .with_attr("origin", self.origin.label())
            .with_attr("originalId", self.original_id.as_str());
        match &self.instance {
            Some(instance) => node.with_attr("instance", instance.as_str()),
            None => node,
        }
    }

    /// Read a marker node. Returns `None` when the origin label is unknown
    /// or the id is missing.
    pub fn from_node(node: &DetailNode) -> Option<Self> {
        if node.name != LOOP_MARKER_NODE {
            return None;
        }
        Some(Self {
            origin: node.attr("origin")?.parse().ok()?,
            original_id: node.attr("originalId")?.to_string(),
            instance: node.attr("instance").map(str::to_string),
        })
    }

    /// True when this marker says the copy was generated by `local_uid`.
    ///
    /// A locally generated marker without an instance stamp is treated as
    /// ours.
    pub fn is_local_to(&self, local_uid: &str) -> bool {
        self.origin == Origin::Local
            && self.instance.as_deref().map_or(true, |i| i == local_uid)
    }
}

impl CotEvent {
    /// True if the detail tree carries a marker node, parseable or not.
    pub fn has_loop_marker(&self) -> bool {
        self.detail.child(LOOP_MARKER_NODE).is_some()
    }

    /// The parsed marker, if present and well-formed.
    pub fn loop_marker(&self) -> Option<LoopMarker> {
        self.detail.child(LOOP_MARKER_NODE).and_then(LoopMarker::from_node)
    }

    /// Attach a marker, replacing any existing one.
    pub fn set_loop_marker(&mut self, marker: &LoopMarker) {
        self.detail.remove_children(LOOP_MARKER_NODE);
        self.detail.add_child(marker.to_node());
    }
}
