//! Decode a wire frame and show what it carries.

use anyhow::{Context, Result};
use lorabridge_core::{Compaction, FrameCodec};
use lorabridge_types::{ChannelTag, CotEvent, WireFrame};
use std::fmt::Write;

/// Run the inspect command.
pub fn run(frame: &str, compaction: Compaction) -> Result<()> {
    print!("{}", describe(frame, compaction)?);
    Ok(())
}

/// Human-readable breakdown of a frame.
pub fn describe(frame: &str, compaction: Compaction) -> Result<String> {
    let frame = frame.trim();
    let parsed = WireFrame::parse(frame).context("Not a bridge frame")?;
    let codec = FrameCodec::new(compaction.compactor());
    let entity = codec
        .decode(frame.as_bytes())
        .with_context(|| format!("Failed to decode payload as {}", codec.scheme()))?;
    let xml = entity.raw_text.as_deref().unwrap_or_default();

    let mut out = String::new();
    let channel = match parsed.tag {
        Some(ChannelTag::Chat) => "chat",
        Some(ChannelTag::GenericCot) => "generic",
        None => "(no prefix)",
    };
    writeln!(out, "Channel:  {channel}")?;
    writeln!(out, "Id:       {}", entity.id)?;
    writeln!(out, "Uid:      {}", entity.origin_uid)?;
    writeln!(out, "Type:     {} ({})", entity.msg_type, entity.class())?;
    writeln!(out, "Time:     {}", entity.time_iso)?;
    writeln!(out, "Origin:   {}", display_or_dash(&entity.origin_label))?;
    writeln!(
        out,
        "Size:     {} bytes on air, {} bytes compacted, {} chars XML",
        frame.len(),
        entity.compressed.as_ref().map_or(0, Vec::len),
        xml.len()
    )?;

    match CotEvent::from_xml(xml) {
        Ok(event) => {
            if let Some(marker) = event.loop_marker() {
                writeln!(
                    out,
                    "Marker:   {} / {}",
                    marker.origin.label(),
                    marker.original_id
                )?;
            }
        }
        Err(e) => writeln!(out, "Warning:  payload is not a valid event ({e})")?,
    }
    writeln!(out)?;
    writeln!(out, "{xml}")?;
    Ok(out)
}

fn display_or_dash(value: &str) -> &str {
    if value.is_empty() {
        "-"
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lorabridge_core::EntityMapper;
    use lorabridge_types::Origin;

    fn frame(compaction: Compaction) -> String {
        let event = CotEvent::new("u1", "a-h-G", "2024-01-01T00:00:00.000Z");
        let entity = EntityMapper::new("dev-1").from_host_event(&event, Origin::Host);
        let body = FrameCodec::new(compaction.compactor()).encode(&entity).unwrap();
        String::from_utf8(ChannelTag::GenericCot.prepend(&body)).unwrap()
    }

    #[test]
    fn describes_cot_frame() {
        let text = describe(&frame(Compaction::BinaryXml), Compaction::BinaryXml).unwrap();
        assert!(text.contains("Channel:  generic"));
        assert!(text.contains("Uid:      u1"));
        assert!(text.contains("Origin:   ATAK"));
        assert!(text.contains("<event "));
    }

    #[test]
    fn wrong_scheme_fails() {
        let err = describe(&frame(Compaction::Plain), Compaction::BinaryXml).unwrap_err();
        assert!(err.to_string().contains("binary"), "{err}");
    }

    #[test]
    fn short_frame_fails() {
        assert!(describe("a|b|c", Compaction::BinaryXml).is_err());
    }
}
