//! Host-side CoT events and their detail trees.

use serde::{Deserialize, Serialize};

/// CoT type tag carried by chat messages.
pub const CHAT_TYPE: &str = "b-t-f";

/// Sentinel used by CoT for unknown height and error values.
pub const UNKNOWN_METRIC: f64 = 9_999_999.0;

/// Event class, decided purely by the CoT type tag.
///
/// A relay listener handles exactly one class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventClass {
    /// Human-readable text message between two parties (`b-t-f`).
    Chat,
    /// Everything else: markers, positions, telemetry, tasking.
    Generic,
}

impl EventClass {
    /// Classify a CoT type tag.
    pub fn of(event_type: &str) -> Self {
        if event_type == CHAT_TYPE {
            Self::Chat
        } else {
            Self::Generic
        }
    }
}

impl std::fmt::Display for EventClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Chat => write!(f, "chat"),
            Self::Generic => write!(f, "generic"),
        }
    }
}

/// A node in an XML detail tree: name, ordered attributes, children and
/// optional text.
///
/// The same type represents any XML element, so the `<event>` root and the
/// `<point>` element can be expressed with it as well.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DetailNode {
    /// Element name.
    pub name: String,
    /// Attributes in document order.
    pub attributes: Vec<(String, String)>,
    /// Child elements in document order.
    pub children: Vec<DetailNode>,
    /// Text content, if any non-whitespace text was present.
    pub text: Option<String>,
}

impl DetailNode {
    /// Create an empty element.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Builder: set an attribute.
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    /// Builder: append a child.
    pub fn with_child(mut self, child: DetailNode) -> Self {
        self.children.push(child);
        self
    }

    /// Builder: set the text content.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Get an attribute value.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set an attribute, replacing an existing value in place.
    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((key, value)),
        }
    }

    /// First child with the given name.
    pub fn child(&self, name: &str) -> Option<&DetailNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// First child with the given name, mutably.
    pub fn child_mut(&mut self, name: &str) -> Option<&mut DetailNode> {
        self.children.iter_mut().find(|c| c.name == name)
    }

    /// Append a child element.
    pub fn add_child(&mut self, child: DetailNode) {
        self.children.push(child);
    }

    /// Remove every child with the given name. Returns how many were removed.
    pub fn remove_children(&mut self, name: &str) -> usize {
        let before = self.children.len();
        self.children.retain(|c| c.name != name);
        before - self.children.len()
    }
}

/// Event location.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
    /// Height above ellipsoid in meters.
    pub hae: f64,
    /// Circular error in meters.
    pub ce: f64,
    /// Linear error in meters.
    pub le: f64,
}

impl Point {
    /// Create a point with explicit error values.
    pub fn new(lat: f64, lon: f64, hae: f64, ce: f64, le: f64) -> Self {
        Self {
            lat,
            lon,
            hae,
            ce,
            le,
        }
    }

    /// A point at 0,0 with every metric unknown.
    pub fn unknown() -> Self {
        Self::new(0.0, 0.0, UNKNOWN_METRIC, UNKNOWN_METRIC, UNKNOWN_METRIC)
    }
}

impl Default for Point {
    fn default() -> Self {
        Self::unknown()
    }
}

/// A CoT event as seen on the host event bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CotEvent {
    /// Event uid (the entity it describes, not the message).
    pub uid: String,
    /// CoT type tag, e.g. `a-f-G-U-C` or `b-t-f`.
    pub event_type: String,
    /// How the event was produced, e.g. `h-g-i-g-o`.
    pub how: String,
    /// Event time (ISO-8601 UTC).
    pub time: String,
    /// Validity start (ISO-8601 UTC).
    pub start: String,
    /// Stale time (ISO-8601 UTC).
    pub stale: String,
    /// Location.
    pub point: Point,
    /// `<detail>` element; always present, possibly empty.
    pub detail: DetailNode,
}

impl CotEvent {
    /// Create an event whose start and stale equal `time`, with an unknown
    /// point and an empty detail.
    pub fn new(uid: impl Into<String>, event_type: impl Into<String>, time: impl Into<String>) -> Self {
        let time = time.into();
        Self {
            uid: uid.into(),
            event_type: event_type.into(),
            how: String::new(),
            start: time.clone(),
            stale: time.clone(),
            time,
            point: Point::unknown(),
            detail: DetailNode::new("detail"),
        }
    }

    /// Builder: set `how`.
    pub fn with_how(mut self, how: impl Into<String>) -> Self {
        self.how = how.into();
        self
    }

    /// Builder: set the stale time.
    pub fn with_stale(mut self, stale: impl Into<String>) -> Self {
        self.stale = stale.into();
        self
    }

    /// Builder: set the point.
    pub fn with_point(mut self, point: Point) -> Self {
        self.point = point;
        self
    }

    /// Builder: append a detail child.
    pub fn with_detail(mut self, child: DetailNode) -> Self {
        self.detail.add_child(child);
        self
    }

    /// Class of this event.
    pub fn class(&self) -> EventClass {
        EventClass::of(&self.event_type)
    }

    /// Minimal validity check: uid, type and time must be non-empty.
    pub fn is_valid(&self) -> bool {
        !self.uid.is_empty() && !self.event_type.is_empty() && !self.time.is_empty()
    }
}
