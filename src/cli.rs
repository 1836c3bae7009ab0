use std::path::PathBuf;
use clap::{Parser, Subcommand};
use futures::channel::mpsc::channel;
use futures::{SinkExt, StreamExt};
use log::{info, warn};
use tokio::io::{stdin, AsyncBufReadExt, BufReader};
use tokio::spawn;
use tokio_util::sync::CancellationToken;

use crate::config::io::ConfigIO;
use crate::config::types::{Config, TiltConfig};
use crate::error::AppRunError;
#[cfg(feature = "rfcomm")]
use crate::link::types::{ChannelKind, Peer};
use crate::tilt::task::tilt_task;
use crate::tilt::types::{AccelSample, TiltReading};

#[derive(Parser, Debug)]
#[command(version, about = "Bluetooth chat link and tilt estimator of the mazeball demo")]
pub struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Wait for a device to connect, then chat over the link
    #[cfg(feature = "rfcomm")]
    Listen,
    /// Connect to a device, then chat over the link
    #[cfg(feature = "rfcomm")]
    Connect {
        /// Bluetooth address of the device, as chosen from discovery
        address: String,
        /// Name to show for the device
        #[arg(long)]
        name: Option<String>,
        /// Use the channel that does not require an authenticated link
        #[arg(long)]
        insecure: bool,
    },
    /// Read "x y z" accelerometer samples from stdin and print tilt readings
    Tilt,
}

/// Parses three numbers separated by whitespace and/or commas.
pub fn parse_sample(line: &str) -> Option<AccelSample> {
    let mut values = line
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<f32>());

    let x = values.next()?.ok()?;
    let y = values.next()?.ok()?;
    let z = values.next()?.ok()?;

    match values.next() {
        None => Some(AccelSample::new(x, y, z)),
        Some(_) => None,
    }
}

async fn load_config(config_io: &ConfigIO) -> Config {
    match config_io.read_or_init().await {
        Ok(config) => config,
        Err(err) => {
            if err.is_file_not_found_error() {
                info!("Config file not found, using defaults");
            } else {
                warn!("Failed to load config, using defaults: {}", err);
            }
            Config::default()
        },
    }
}

async fn run_tilt(config: TiltConfig) -> Result<(), AppRunError> {
    let cancel = CancellationToken::new();
    let (reading_sender, mut readings) = channel::<TiltReading>(128);
    let (mut samples, tilt_handle) = tilt_task(config, cancel, vec![reading_sender]);

    let printer = spawn(async move {
        while let Some(reading) = readings.next().await {
            println!("{}", reading);
        }
    });

    let mut lines = BufReader::new(stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_sample(&line) {
            Some(sample) => {
                if samples.send(sample).await.is_err() {
                    break;
                }
            },
            None => warn!("Expected three numbers (x y z), got {:?}", line),
        }
    }

    drop(samples);
    if let Err(err) = tilt_handle.await {
        warn!("Tilt task failed: {:?}", err);
    }
    if let Err(err) = printer.await {
        warn!("Tilt printer failed: {:?}", err);
    }
    Ok(())
}

pub async fn run(cli: Cli) -> Result<(), AppRunError> {
    let config_io = match &cli.config {
        Some(path) => ConfigIO::open(path)?,
        None => ConfigIO::new_sync()?,
    };

    // one instance per config, so two processes never register the same services
    let mut locker = config_io.locker()?;
    let _lock = locker.lock()?;

    let config = load_config(&config_io).await;

    match cli.command {
        #[cfg(feature = "rfcomm")]
        CliCommand::Listen => crate::chat::console::run_chat(config.link, None).await,
        #[cfg(feature = "rfcomm")]
        CliCommand::Connect { address, name, insecure } => {
            let kind = if insecure { ChannelKind::Insecure } else { ChannelKind::Secure };
            let name = name.unwrap_or_else(|| address.clone());
            crate::chat::console::run_chat(config.link, Some((Peer::new(address, name), kind))).await
        },
        CliCommand::Tilt => run_tilt(config.tilt).await,
    }
}
