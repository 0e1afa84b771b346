//! Wire frame: the delimited text form exchanged with the modem process.
//!
//! ```text
//! [ROUTING_PREFIX|]id|uid|type|timeIso|origin|<transport-encoded payload>
//! ```
//!
//! The header is inspectable without decoding the payload. Empty fields are
//! allowed, but the field count is fixed.

use serde::{Deserialize, Serialize};

use crate::event::EventClass;
use crate::CodecError;

/// Field delimiter.
pub const DELIMITER: char = '|';

/// Number of header fields preceding the payload.
pub const HEADER_FIELDS: usize = 5;

/// Minimum number of fields in a frame (header + payload).
pub const MIN_FIELDS: usize = HEADER_FIELDS + 1;

/// Number of leading bytes inspected when routing an inbound datagram.
pub const ROUTING_PROBE_LEN: usize = 24;

/// Message class multiplexed over the single channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelTag {
    /// Chat messages, prefix `LORA|`.
    Chat,
    /// Generic CoT messages, prefix `LORA_COTX|`.
    GenericCot,
}

impl ChannelTag {
    /// The routing prefix, delimiter included.
    pub fn header(&self) -> &'static str {
        match self {
            ChannelTag::Chat => "LORA|",
            ChannelTag::GenericCot => "LORA_COTX|",
        }
    }

    /// Channel used for an event class.
    pub fn for_class(class: EventClass) -> Self {
        match class {
            EventClass::Chat => ChannelTag::Chat,
            EventClass::Generic => ChannelTag::GenericCot,
        }
    }

    /// Match the start of a payload against the known prefixes.
    ///
    /// `LORA_COTX|` is tested first; the two prefixes share the `LORA` stem.
    pub fn detect(data: &[u8]) -> Option<Self> {
        let probe = &data[..data.len().min(ROUTING_PROBE_LEN)];
        [ChannelTag::GenericCot, ChannelTag::Chat]
            .into_iter()
            .find(|tag| probe.starts_with(tag.header().as_bytes()))
    }

    /// Prepend this channel's prefix to a body.
    pub fn prepend(&self, body: &[u8]) -> Vec<u8> {
        let header = self.header().as_bytes();
        let mut out = Vec::with_capacity(header.len() + body.len());
        out.extend_from_slice(header);
        out.extend_from_slice(body);
        out
    }
}

/// The five routing fields of a frame.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FrameHeader {
    /// Message id.
    pub id: String,
    /// Originating event uid.
    pub uid: String,
    /// CoT type tag.
    pub msg_type: String,
    /// Event time.
    pub time: String,
    /// Origin label, possibly empty.
    pub origin: String,
}

impl FrameHeader {
    fn fields(&self) -> [(&'static str, &str); HEADER_FIELDS] {
        [
            ("id", self.id.as_str()),
            ("uid", self.uid.as_str()),
            ("type", self.msg_type.as_str()),
            ("time", self.time.as_str()),
            ("origin", self.origin.as_str()),
        ]
    }

    /// Reject values that would break the framing.
    pub fn validate(&self) -> Result<(), CodecError> {
        for (field, value) in self.fields() {
            if let Some(bad) = value.chars().find(|c| matches!(c, '|' | '\r' | '\n')) {
                return Err(CodecError::InvalidField {
                    field,
                    reason: format!("contains forbidden character {bad:?}"),
                });
            }
        }
        Ok(())
    }
}

/// A parsed or to-be-rendered frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireFrame {
    /// Routing prefix, if the frame carried (or should carry) one.
    pub tag: Option<ChannelTag>,
    /// Routing header.
    pub header: FrameHeader,
    /// Transport-encoded compacted payload, exactly as on the wire.
    pub payload: String,
}

impl WireFrame {
    /// Parse frame text of unknown channel.
    ///
    /// At most one routing prefix is stripped. Splitting preserves empty
    /// fields; anything after the payload field is ignored.
    pub fn parse(text: &str) -> Result<Self, CodecError> {
        Self::parse_expecting(text, ChannelTag::detect(text.as_bytes()))
    }

    /// Parse frame text whose channel is already known.
    ///
    /// Only `expected`'s prefix is stripped, once, and only if present. With
    /// `None` the text is taken as a bare body, so an id such as `LORA`
    /// survives.
    pub fn parse_expecting(text: &str, expected: Option<ChannelTag>) -> Result<Self, CodecError> {
        let (tag, body) = match expected {
            Some(tag) => match text.strip_prefix(tag.header()) {
                Some(rest) => (Some(tag), rest),
                None => (None, text),
            },
            None => (None, text),
        };

        let parts: Vec<&str> = body.split(DELIMITER).collect();
        if parts.len() < MIN_FIELDS {
            return Err(CodecError::MalformedFrame {
                expected: MIN_FIELDS,
                actual: parts.len(),
            });
        }

        Ok(Self {
            tag,
            header: FrameHeader {
                id: parts[0].to_string(),
                uid: parts[1].to_string(),
                msg_type: parts[2].to_string(),
                time: parts[3].to_string(),
                origin: parts[4].to_string(),
            },
            payload: parts[5].to_string(),
        })
    }

    /// Render frame text, prefix included when `tag` is set.
    pub fn to_text(&self) -> Result<String, CodecError> {
        self.header.validate()?;
        if self.payload.contains(DELIMITER) {
            return Err(CodecError::InvalidField {
                field: "payload",
                reason: "contains the delimiter".into(),
            });
        }

        let mut out = String::new();
        if let Some(tag) = self.tag {
            out.push_str(tag.header());
        }
        for (_, value) in self.header.fields() {
            out.push_str(value);
            out.push(DELIMITER);
        }
        out.push_str(&self.payload);
        Ok(out)
    }

    /// Payload with all whitespace removed.
    pub fn cleaned_payload(&self) -> String {
        self.payload.chars().filter(|c| !c.is_whitespace()).collect()
    }

    /// Characters of the cleaned payload outside the Base64 alphabet.
    pub fn foreign_payload_chars(&self) -> String {
        self.cleaned_payload()
            .chars()
            .filter(|c| !(c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=')))
            .collect()
    }
}
