//! # lora-bridge
//!
//! Command-line front end for the CoT-to-LoRa bridge.
//!
//! ## Commands
//!
//! - `run`: Relay between an in-process host bus and the modem until Ctrl-C
//! - `inspect`: Decode a wire frame and show its header and event
//! - `encode`: Encode a CoT XML file into the frame that would be sent
//! - `send-chat`: Send one chat message and exit
//! - `history`: List relayed messages from the database
//!
//! ## Example
//!
//! ```bash
//! # Start the bridge with a config file
//! lora-bridge --config lora-bridge.toml run --metrics-every 30
//!
//! # See what a captured frame contains
//! lora-bridge inspect 'LORA_COTX|3f2a...|u1|a-h-G|2024-01-01T00:00:00.000Z|ATAK|kqNl...'
//!
//! # Send a chat
//! lora-bridge send-chat --to ANDROID-42 "at the rally point"
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use lorabridge_core::Compaction;
use lorabridge_types::EventClass;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{encode, history, inspect, run, send_chat};

/// Command-line front end for the CoT-to-LoRa bridge.
#[derive(Parser, Debug)]
#[command(name = "lora-bridge")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `lorabridge_relay=trace` (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Relay until interrupted
    Run {
        /// Print counters every N seconds
        #[arg(long)]
        metrics_every: Option<u64>,
    },

    /// Decode a wire frame
    Inspect {
        /// Frame text, with or without a channel prefix
        frame: String,
    },

    /// Encode a CoT XML file into a wire frame
    Encode {
        /// XML file holding one event
        file: PathBuf,
    },

    /// Send a chat message
    SendChat {
        /// Receiver device uid
        #[arg(long)]
        to: String,

        /// Message text
        text: String,
    },

    /// List relayed messages
    History {
        /// Which class to list
        #[arg(long, value_enum, default_value = "generic")]
        class: ClassArg,

        /// Maximum number of messages
        #[arg(long, default_value = "20")]
        limit: u32,

        /// One JSON object per line
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ClassArg {
    Chat,
    Generic,
}

impl From<ClassArg> for EventClass {
    fn from(arg: ClassArg) -> Self {
        match arg {
            ClassArg::Chat => EventClass::Chat,
            ClassArg::Generic => EventClass::Generic,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    let config = config::load(cli.config.as_deref())?;
    let compaction: Compaction = config.codec.compaction;

    match cli.command {
        Commands::Run { metrics_every } => {
            run::run(config, metrics_every).await?;
        }
        Commands::Inspect { frame } => {
            inspect::run(&frame, compaction)?;
        }
        Commands::Encode { file } => {
            encode::run(&file, &config.device.uid, compaction).await?;
        }
        Commands::SendChat { to, text } => {
            send_chat::run(config, &to, &text).await?;
        }
        Commands::History { class, limit, json } => {
            history::run(&config.storage.database, class.into(), limit, json).await?;
        }
    }

    Ok(())
}

/// Logs go to stderr so command output stays clean.
fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
