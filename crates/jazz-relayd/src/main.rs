//! jazz-relayd: serves a MIDI device to a remote sequencer

mod config;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use jazz_services::RelayDaemon;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::{config_path, load_config, save_config};

#[derive(Debug, Parser)]
#[command(name = "jazz-relayd", version, about = "Relay a MIDI device over the network")]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,
    /// MIDI device node
    #[arg(short, long)]
    device: Option<PathBuf>,
    /// Address to accept the client on
    #[arg(short, long)]
    listen: Option<String>,
    /// Serve the connected socket on stdin (inetd)
    #[arg(long)]
    inetd: bool,
    /// Leave existing portmapper registrations alone
    #[arg(long)]
    keep_registration: bool,
    /// Write the effective configuration to the config file and exit
    #[arg(long)]
    save_config: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("jazz=info".parse()?))
        .init();

    let cli = Cli::parse();
    let path = cli.config.clone().unwrap_or_else(config_path);
    let mut config = load_config(&path);
    if let Some(device) = cli.device {
        config.device = device;
    }
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    config.inherit_stdin |= cli.inetd;
    if cli.keep_registration {
        config.unregister_stale = false;
    }

    if cli.save_config {
        save_config(&path, &config).with_context(|| format!("writing {}", path.display()))?;
        tracing::info!(path = %path.display(), "Saved configuration");
        return Ok(());
    }

    tracing::info!(device = %config.device.display(), "Starting jazz-relayd");
    let options = config.to_options()?;
    RelayDaemon::new(options).run().context("relay stopped")?;
    Ok(())
}
