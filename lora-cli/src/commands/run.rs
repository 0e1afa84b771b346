//! Run the bridge until interrupted.

use anyhow::{Context, Result};
use async_trait::async_trait;
use lorabridge_core::{Directory, EntityMapper};
use lorabridge_relay::{
    BridgeConfig, EventFilter, HostBus, HostEventHandler, LoraBridge, MemoryHostBus,
};
use lorabridge_types::{CotEvent, EventClass, Origin};
use std::sync::Arc;
use std::time::Duration;

/// Prints events the bridge publishes from the radio.
struct Printer {
    mapper: EntityMapper,
    directory: Arc<dyn Directory>,
}

#[async_trait]
impl HostEventHandler for Printer {
    async fn on_event(&self, event: &mut CotEvent) {
        if let Some(line) = self.render(event) {
            println!("{line}");
        }
    }
}

impl Printer {
    fn render(&self, event: &CotEvent) -> Option<String> {
        let marker = event.loop_marker()?;
        if marker.origin != Origin::Radio {
            return None;
        }
        Some(match event.class() {
            EventClass::Chat => match self.mapper.chat_from_event(event, self.directory.as_ref()) {
                Ok(chat) => format!(
                    "[chat] {} -> {}: {}",
                    chat.sender_callsign, chat.receiver_callsign, chat.message
                ),
                Err(_) => format!("[chat] {} (unreadable)", event.uid),
            },
            EventClass::Generic => format!(
                "[cot]  {} {} at {:.5},{:.5}",
                event.event_type, event.uid, event.point.lat, event.point.lon
            ),
        })
    }
}

/// Run the run command.
pub async fn run(config: BridgeConfig, metrics_every: Option<u64>) -> Result<()> {
    let bus = Arc::new(MemoryHostBus::new(config.device.uid.as_str()));
    let bridge = LoraBridge::from_config(config, bus.clone(), bus.clone())
        .await
        .context("Failed to set up bridge")?;
    bridge.start().await.context("Failed to start bridge")?;

    let printer = Arc::new(Printer {
        mapper: EntityMapper::new(bus.local_uid()),
        directory: bus.clone(),
    });
    let subscription = bus.subscribe(EventFilter::All, printer);

    let transport = &bridge.config().transport;
    println!(
        "Bridge running as {} (rx {}:{}, tx {}:{}). Ctrl-C to stop.",
        bus.local_uid(),
        transport.host,
        transport.rx_port,
        transport.host,
        transport.tx_port
    );

    let period = Duration::from_secs(metrics_every.unwrap_or(0).max(1));
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                break;
            }
            _ = ticker.tick(), if metrics_every.is_some() => {
                println!("[metrics] {}", bridge.metrics());
            }
        }
    }

    subscription.cancel();
    bridge.stop().await;
    println!("{}", serde_json::to_string_pretty(&bridge.metrics())?);
    Ok(())
}
