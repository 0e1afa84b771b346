//! Relay pipeline states and outcomes.
//!
//! Each event or frame moves through
//! `Received -> Classified -> Persisted -> Tagged -> Encoded/Decoded -> Forwarded`
//! or stops early. The engine in `lorabridge-relay` performs the I/O; this
//! module only names the stages, the ways a message can be dropped, and the
//! loop checks, so they can be tested without any runtime.

use std::fmt;

use lorabridge_types::{CotEvent, Origin};

/// A step of the relay pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayStage {
    /// Observed on the host bus or read from the channel.
    Received,
    /// Event class and type checked.
    Classified,
    /// Written to the message store.
    Persisted,
    /// Loop marker attached.
    Tagged,
    /// Turned into frame bytes.
    Encoded,
    /// Frame bytes turned back into an entity.
    Decoded,
    /// Handed to the channel or published on the host bus.
    Forwarded,
}

impl fmt::Display for RelayStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RelayStage::Received => "received",
            RelayStage::Classified => "classified",
            RelayStage::Persisted => "persisted",
            RelayStage::Tagged => "tagged",
            RelayStage::Encoded => "encoded",
            RelayStage::Decoded => "decoded",
            RelayStage::Forwarded => "forwarded",
        };
        f.write_str(name)
    }
}

/// Why a message was not relayed because of loop prevention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Suppression {
    /// The event was published by a radio-to-host relay.
    RadioEcho,
    /// The event was already relayed to the radio by a host listener.
    AlreadyRelayed,
    /// The event was composed by this instance.
    LocalEcho,
    /// The event carries a marker this instance cannot interpret.
    ForeignMarker,
}

impl fmt::Display for Suppression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Suppression::RadioEcho => "radio echo",
            Suppression::AlreadyRelayed => "already relayed",
            Suppression::LocalEcho => "local echo",
            Suppression::ForeignMarker => "foreign marker",
        };
        f.write_str(reason)
    }
}

/// Final result of relaying one event or frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Relayed under this id.
    Forwarded {
        /// Message id.
        id: String,
    },
    /// Already relayed in this direction.
    Duplicate {
        /// Message id.
        id: String,
    },
    /// Dropped by loop prevention.
    LoopSuppressed(Suppression),
    /// Type not relayed in this direction.
    Filtered {
        /// CoT type tag.
        msg_type: String,
    },
    /// Belongs to the other engine's class.
    WrongClass,
    /// A stage failed; the message is dropped.
    Failed {
        /// Stage that failed.
        stage: RelayStage,
        /// Error text.
        reason: String,
    },
}

impl RelayOutcome {
    /// Build a failure outcome.
    pub fn failed(stage: RelayStage, reason: impl fmt::Display) -> Self {
        RelayOutcome::Failed {
            stage,
            reason: reason.to_string(),
        }
    }

    /// True if the message was relayed.
    pub fn is_forwarded(&self) -> bool {
        matches!(self, RelayOutcome::Forwarded { .. })
    }
}

/// Loop check for an event observed on the host bus.
///
/// Any marker stops host-to-radio relaying: the event either came from the
/// radio, was already relayed by a host listener, or was composed locally.
pub fn check_host_event(event: &CotEvent, local_uid: &str) -> Option<Suppression> {
    if !event.has_loop_marker() {
        return None;
    }
    Some(match event.loop_marker() {
        None => Suppression::ForeignMarker,
        Some(marker) if marker.is_local_to(local_uid) => Suppression::LocalEcho,
        Some(marker) => match marker.origin {
            Origin::Radio => Suppression::RadioEcho,
            Origin::Host | Origin::Local => Suppression::AlreadyRelayed,
        },
    })
}

/// Loop check for an event decoded from a radio frame.
///
/// Only a copy composed by this instance (or carrying an unstamped local
/// marker) is dropped; markers written by other instances are replaced on
/// publication.
pub fn check_radio_event(event: &CotEvent, local_uid: &str) -> Option<Suppression> {
    event
        .loop_marker()?
        .is_local_to(local_uid)
        .then_some(Suppression::LocalEcho)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lorabridge_types::{DetailNode, LoopMarker, LOOP_MARKER_NODE};

    fn event() -> CotEvent {
        CotEvent::new("u1", "a-f-G", "T")
    }

    fn marked(marker: LoopMarker) -> CotEvent {
        let mut e = event();
        e.set_loop_marker(&marker);
        e
    }

    #[test]
    fn unmarked_host_event_passes() {
        assert_eq!(check_host_event(&event(), "dev-1"), None);
    }

    #[test]
    fn radio_marker_is_echo() {
        let e = marked(LoopMarker::new(Origin::Radio, "x").with_instance("dev-1"));
        assert_eq!(check_host_event(&e, "dev-1"), Some(Suppression::RadioEcho));
    }

    #[test]
    fn host_marker_is_already_relayed() {
        let e = marked(LoopMarker::new(Origin::Host, "x"));
        assert_eq!(
            check_host_event(&e, "dev-1"),
            Some(Suppression::AlreadyRelayed)
        );
    }

    #[test]
    fn own_local_marker_is_local_echo() {
        let stamped = marked(LoopMarker::new(Origin::Local, "x").with_instance("dev-1"));
        assert_eq!(check_host_event(&stamped, "dev-1"), Some(Suppression::LocalEcho));

        let unstamped = marked(LoopMarker::new(Origin::Local, "x"));
        assert_eq!(
            check_host_event(&unstamped, "dev-1"),
            Some(Suppression::LocalEcho)
        );

        let other = marked(LoopMarker::new(Origin::Local, "x").with_instance("dev-2"));
        assert_eq!(
            check_host_event(&other, "dev-1"),
            Some(Suppression::AlreadyRelayed)
        );
    }

    #[test]
    fn unparseable_marker_still_suppresses() {
        let e = event().with_detail(DetailNode::new(LOOP_MARKER_NODE).with_attr("origin", "?"));
        assert_eq!(
            check_host_event(&e, "dev-1"),
            Some(Suppression::ForeignMarker)
        );
    }

    #[test]
    fn radio_check_only_drops_own_compositions() {
        assert_eq!(check_radio_event(&event(), "dev-1"), None);

        let own = marked(LoopMarker::new(Origin::Local, "x").with_instance("dev-1"));
        assert_eq!(check_radio_event(&own, "dev-1"), Some(Suppression::LocalEcho));

        let peer = marked(LoopMarker::new(Origin::Local, "x").with_instance("dev-2"));
        assert_eq!(check_radio_event(&peer, "dev-1"), None);

        let unstamped = marked(LoopMarker::new(Origin::Local, "x"));
        assert_eq!(
            check_radio_event(&unstamped, "dev-1"),
            Some(Suppression::LocalEcho)
        );

        let relayed = marked(LoopMarker::new(Origin::Host, "x").with_instance("dev-1"));
        assert_eq!(check_radio_event(&relayed, "dev-1"), None);
    }

    #[test]
    fn outcome_helpers() {
        assert!(RelayOutcome::Forwarded { id: "a".into() }.is_forwarded());
        let failed = RelayOutcome::failed(RelayStage::Encoded, "boom");
        assert_eq!(
            failed,
            RelayOutcome::Failed {
                stage: RelayStage::Encoded,
                reason: "boom".into()
            }
        );
        assert!(!failed.is_forwarded());
        assert_eq!(RelayStage::Persisted.to_string(), "persisted");
        assert_eq!(Suppression::RadioEcho.to_string(), "radio echo");
    }
}
