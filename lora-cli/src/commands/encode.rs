//! Turn a CoT XML file into the frame the bridge would transmit.

use anyhow::{Context, Result};
use lorabridge_core::{Compaction, EntityMapper, FrameCodec};
use lorabridge_types::{ChannelTag, CotEvent, Origin};
use std::path::Path;

/// Run the encode command.
pub async fn run(path: &Path, local_uid: &str, compaction: Compaction) -> Result<()> {
    let xml = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    println!("{}", encode(&xml, local_uid, compaction)?);
    Ok(())
}

/// Frame text, channel prefix included.
pub fn encode(xml: &str, local_uid: &str, compaction: Compaction) -> Result<String> {
    let event = CotEvent::from_xml(xml).context("Invalid CoT XML")?;
    anyhow::ensure!(
        event.is_valid(),
        "Event is missing uid, type or time"
    );

    let entity = EntityMapper::new(local_uid).from_host_event(&event, Origin::Host);
    let body = FrameCodec::new(compaction.compactor())
        .encode(&entity)
        .context("Failed to encode frame")?;
    let frame = ChannelTag::for_class(event.class()).prepend(&body);
    tracing::debug!(
        id = %entity.id,
        xml_chars = xml.len(),
        frame_bytes = frame.len(),
        "encoded"
    );
    String::from_utf8(frame).context("Frame is not valid UTF-8")
}
