//! Frame codec: entity <-> wire bytes.
//!
//! Encoding compacts the entity's canonical text, transport-encodes it as
//! standard Base64 and prepends the five header fields. Decoding reverses
//! this. The channel prefix is never added here; the transport owns it.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use lorabridge_types::{ChannelTag, CodecError, FrameHeader, MessageEntity, WireFrame};

use crate::compact::Compactor;

/// Encodes entities into frames and decodes frames into entities.
#[derive(Clone)]
pub struct FrameCodec {
    compactor: Arc<dyn Compactor>,
}

impl std::fmt::Debug for FrameCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCodec")
            .field("compactor", &self.compactor.name())
            .finish()
    }
}

impl FrameCodec {
    /// Create a codec using the given compaction scheme.
    pub fn new(compactor: Arc<dyn Compactor>) -> Self {
        Self { compactor }
    }

    /// Name of the compaction scheme in use.
    pub fn scheme(&self) -> &'static str {
        self.compactor.name()
    }

    /// Encode an entity into unprefixed frame bytes.
    pub fn encode(&self, entity: &MessageEntity) -> Result<Vec<u8>, CodecError> {
        let text = entity
            .raw_text
            .as_deref()
            .ok_or_else(|| CodecError::MissingPayload {
                id: entity.id.clone(),
            })?;
        let compact = self.compactor.compact(text)?;

        let frame = WireFrame {
            tag: None,
            header: FrameHeader {
                id: entity.id.clone(),
                uid: entity.origin_uid.clone(),
                msg_type: entity.msg_type.clone(),
                time: entity.time_iso.clone(),
                origin: entity.origin_label.clone(),
            },
            payload: STANDARD.encode(&compact),
        };
        Ok(frame.to_text()?.into_bytes())
    }

    /// Decode frame bytes, with or without a channel prefix.
    ///
    /// The returned entity has both `raw_text` and `compressed` set.
    pub fn decode(&self, bytes: &[u8]) -> Result<MessageEntity, CodecError> {
        let text = String::from_utf8(bytes.to_vec())?;
        self.decode_frame(WireFrame::parse(&text)?)
    }

    /// Decode bytes from a known channel.
    ///
    /// Only `expected`'s prefix is stripped; `None` means the transport has
    /// already removed it.
    pub fn decode_expecting(
        &self,
        bytes: &[u8],
        expected: Option<ChannelTag>,
    ) -> Result<MessageEntity, CodecError> {
        let text = String::from_utf8(bytes.to_vec())?;
        self.decode_frame(WireFrame::parse_expecting(&text, expected)?)
    }

    fn decode_frame(&self, frame: WireFrame) -> Result<MessageEntity, CodecError> {

        let foreign = frame.foreign_payload_chars();
        if !foreign.is_empty() {
            tracing::warn!(
                id = %frame.header.id,
                chars = %foreign,
                "payload contains characters outside the Base64 alphabet"
            );
        }

        let compact = STANDARD.decode(frame.cleaned_payload())?;
        let raw_text = self.compactor.expand(&compact)?;

        Ok(MessageEntity {
            id: frame.header.id,
            origin_uid: frame.header.uid,
            msg_type: frame.header.msg_type,
            time_iso: frame.header.time,
            origin_label: frame.header.origin,
            raw_text: Some(raw_text),
            compressed: Some(compact),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compact::{BinaryXml, PlainText};
    use lorabridge_types::CotEvent;

    fn entity(origin: &str) -> MessageEntity {
        let event = CotEvent::new("u1", "a-f-G-U-C", "2024-01-01T00:00:00.000Z");
        MessageEntity {
            id: "x".into(),
            origin_uid: "u1".into(),
            msg_type: "a-f-G-U-C".into(),
            time_iso: "2024-01-01T00:00:00.000Z".into(),
            origin_label: origin.into(),
            raw_text: Some(event.to_xml()),
            compressed: None,
        }
    }

    #[test]
    fn encode_then_decode_preserves_header_and_text() {
        let codec = FrameCodec::new(Arc::new(BinaryXml));
        let original = entity("ATAK");
        let bytes = codec.encode(&original).unwrap();
        let decoded = codec.decode(&bytes).unwrap();

        assert_eq!(decoded.id, original.id);
        assert_eq!(decoded.origin_uid, original.origin_uid);
        assert_eq!(decoded.msg_type, original.msg_type);
        assert_eq!(decoded.time_iso, original.time_iso);
        assert_eq!(decoded.origin_label, original.origin_label);
        assert_eq!(decoded.raw_text, original.raw_text);
        assert!(decoded.compressed.is_some());
    }

    #[test]
    fn empty_origin_encodes_as_empty_field() {
        let codec = FrameCodec::new(Arc::new(PlainText));
        let bytes = codec.encode(&entity("")).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("x|u1|a-f-G-U-C|2024-01-01T00:00:00.000Z||"));
        assert_eq!(codec.decode(text.as_bytes()).unwrap().origin_label, "");
    }

    #[test]
    fn decode_accepts_prefixed_frame() {
        let codec = FrameCodec::new(Arc::new(PlainText));
        let mut bytes = b"LORA_COTX|".to_vec();
        bytes.extend(codec.encode(&entity("PHY")).unwrap());
        let decoded = codec.decode(&bytes).unwrap();
        assert_eq!(decoded.id, "x");
        assert_eq!(decoded.origin_label, "PHY");
    }

    #[test]
    fn chat_id_matching_a_prefix_survives_a_stripped_body() {
        let codec = FrameCodec::new(Arc::new(PlainText));
        let event = CotEvent::new("GeoChat.dev-1.All.LORA", "b-t-f", "2024-01-01T00:00:00.000Z");
        let chat = MessageEntity {
            id: "LORA".into(),
            origin_uid: event.uid.clone(),
            msg_type: "b-t-f".into(),
            time_iso: event.time.clone(),
            origin_label: "ATAK".into(),
            raw_text: Some(event.to_xml()),
            compressed: None,
        };
        let body = codec.encode(&chat).unwrap();

        let decoded = codec.decode_expecting(&body, None).unwrap();
        assert_eq!(decoded.id, "LORA");
        assert_eq!(decoded.origin_uid, chat.origin_uid);
        assert_eq!(decoded.raw_text, chat.raw_text);

        // Prefixed on the generic channel, the prefix goes but the id stays.
        let framed = ChannelTag::GenericCot.prepend(&body);
        let decoded = codec
            .decode_expecting(&framed, Some(ChannelTag::GenericCot))
            .unwrap();
        assert_eq!(decoded.id, "LORA");
    }

    #[test]
    fn decode_tolerates_whitespace_in_payload() {
        let codec = FrameCodec::new(Arc::new(PlainText));
        let text = String::from_utf8(codec.encode(&entity("ATAK")).unwrap()).unwrap();
        let (head, payload) = text.rsplit_once('|').unwrap();
        let (a, b) = payload.split_at(payload.len() / 2);
        let spaced = format!("{head}|{a}\n {b}\r\n");
        assert!(codec.decode(spaced.as_bytes()).is_ok());
    }

    #[test]
    fn short_frame_is_malformed() {
        let codec = FrameCodec::new(Arc::new(PlainText));
        assert!(matches!(
            codec.decode(b"a|b|c"),
            Err(CodecError::MalformedFrame { actual: 3, .. })
        ));
    }

    #[test]
    fn bad_base64_fails_transport_decoding() {
        let codec = FrameCodec::new(Arc::new(PlainText));
        assert!(matches!(
            codec.decode(b"a|b|c|d|e|@@@"),
            Err(CodecError::TransportEncoding(_))
        ));
    }

    #[test]
    fn missing_text_is_reported() {
        let codec = FrameCodec::new(Arc::new(PlainText));
        let mut e = entity("ATAK");
        e.raw_text = None;
        assert!(matches!(
            codec.encode(&e),
            Err(CodecError::MissingPayload { .. })
        ));
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let codec = FrameCodec::new(Arc::new(PlainText));
        assert!(matches!(codec.decode(&[0xff, 0xfe]), Err(CodecError::Utf8(_))));
    }
}
