//! `lifelink-node` command line
//!
//! ```text
//! lifelink-node --config node.toml listen
//! lifelink-node --config node.toml send --message "Trapped, 3rd floor"
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{Instrument, info, warn};

use lifelink_core::{Coordinates, RelayEvent};
use lifelink_logging::{LifelinkSubscriberBuilder, NodeContext};
use lifelink_node::{LifelinkNode, NodeConfig};

#[derive(Parser, Debug)]
#[command(name = "lifelink-node", version, about = "LifeLink emergency alert relay node")]
struct Cli {
    /// Path to the node TOML config
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Human-readable log output
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Listen for alerts from peers and relay them
    Listen,
    /// Originate an alert from this node
    Send(SendArgs),
}

#[derive(Args, Debug)]
struct SendArgs {
    /// Free-text message
    #[arg(short, long)]
    message: Option<String>,

    /// Sender name (defaults to the configured name)
    #[arg(long)]
    name: Option<String>,

    /// Sender phone (defaults to the configured phone)
    #[arg(long)]
    phone: Option<String>,

    #[arg(long)]
    age: Option<u32>,

    #[arg(long)]
    blood_group: Option<String>,

    #[arg(long)]
    medical_issue: Option<String>,

    /// Battery percentage
    #[arg(long)]
    battery: Option<u8>,

    #[arg(long, requires = "longitude", allow_negative_numbers = true)]
    latitude: Option<f64>,

    #[arg(long, requires = "latitude", allow_negative_numbers = true)]
    longitude: Option<f64>,

    /// Keep listening for relayed alerts after sending
    #[arg(long)]
    stay: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => NodeConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => NodeConfig::default(),
    };
    if let Command::Send(args) = &cli.command {
        if let Some(name) = &args.name {
            config.name = name.clone();
        }
        if let Some(phone) = &args.phone {
            config.phone = Some(phone.clone());
        }
    }

    let mut logging = LifelinkSubscriberBuilder::new().with_config(config.logging.clone());
    if let Some(level) = &cli.log_level {
        logging = logging.with_level(level.clone());
    }
    if cli.pretty {
        logging = logging.with_pretty(true);
    }
    let _log_guard = logging.init().context("initializing logging")?;

    let ctx = NodeContext::new(config.name.clone());
    run(cli.command, config).instrument(ctx.span()).await
}

async fn run(command: Command, config: NodeConfig) -> Result<()> {
    let node = LifelinkNode::new(config).context("building node")?;
    let events = tokio::spawn(log_events(node.subscribe()));
    let mut delivered = true;

    match command {
        Command::Listen => {
            let addr = node.start().await.context("starting listener")?;
            info!(%addr, "Listening for alerts, Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
        }
        Command::Send(args) => {
            if args.stay {
                node.start().await.context("starting listener")?;
            }

            let mut builder = node.alert_builder();
            if let Some(message) = args.message {
                builder = builder.message(message);
            }
            if let Some(age) = args.age {
                builder = builder.age(age);
            }
            if let Some(blood_group) = args.blood_group {
                builder = builder.blood_group(blood_group);
            }
            if let Some(issue) = args.medical_issue {
                builder = builder.current_medical_issue(issue);
            }
            if let Some(battery) = args.battery {
                builder = builder.phone_battery(battery);
            }
            if let (Some(lat), Some(lon)) = (args.latitude, args.longitude) {
                builder = builder.location(Coordinates::new(lat, lon));
            }
            let alert = builder
                .build_checked()
                .context("a phone number is required (--phone or config)")?;

            match node.send_alert(alert).await {
                Ok(outcome) => println!("{}", outcome.summary()),
                Err(e) => {
                    delivered = false;
                    eprintln!("❌ {e}");
                    if let lifelink_node::NodeError::Relay(relay) = &e
                        && let Some(report) = relay.report()
                    {
                        eprintln!("{}", report.summary());
                    }
                }
            }

            if args.stay {
                info!("Alert sent, still listening. Ctrl-C to stop");
                tokio::signal::ctrl_c().await?;
            }
        }
    }

    node.stop().await;
    events.abort();
    if !delivered {
        anyhow::bail!("alert was not delivered");
    }
    Ok(())
}

async fn log_events(mut events: tokio::sync::broadcast::Receiver<RelayEvent>) {
    use tokio::sync::broadcast::error::RecvError;
    loop {
        match events.recv().await {
            Ok(RelayEvent::ChannelProgress {
                channel, message, ..
            }) => info!(%channel, "{message}"),
            Ok(RelayEvent::MessageReceived {
                message_id,
                original_sender,
                relay_count,
                ..
            }) => info!(%message_id, sender = %original_sender, relay_count, "Alert received"),
            Ok(RelayEvent::Error { message, .. }) => warn!("{message}"),
            Ok(_) => {}
            Err(RecvError::Lagged(n)) => warn!(skipped = n, "Event log lagging"),
            Err(RecvError::Closed) => break,
        }
    }
}
