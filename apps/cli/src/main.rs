use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ev3flash_core::protocol::EV3_PRODUCT_ID;
use ev3flash_core::session::{SessionConfig, UpgradeSession};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "EV3 firmware recovery tool", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: CliCommand,

    /// Path to a session config file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Reply timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Query hardware and firmware version ids from the bootloader
    Version,
    /// Erase the brick and flash a firmware image, then restart it
    Flash {
        /// Path to the firmware image
        image: PathBuf,
    },
    /// Erase the whole flash chip without writing anything
    Erase,
    /// Reboot a brick running normal firmware into update mode
    EnterUpdate,
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::load_from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SessionConfig::default(),
    };
    if let Some(timeout_ms) = args.timeout_ms {
        config.reply_timeout_ms = timeout_ms;
    }

    match args.command {
        CliCommand::Version => {
            let mut session = UpgradeSession::open(&config)?;
            let version = session.firmware_version()?;
            println!("{version}");
            session.close();
        }
        CliCommand::Flash { image } => {
            let data = std::fs::read(&image)
                .with_context(|| format!("reading image {}", image.display()))?;
            info!(path = %image.display(), size = data.len(), "Loaded firmware image");

            let mut session = UpgradeSession::open(&config)?;
            let transfer = session.write_firmware(&data)?;
            info!(
                bytes = transfer.bytes_sent(),
                checksum = %format!("{:08X}", transfer.expected_checksum()),
                "Flashed and restarted"
            );
            session.close();
        }
        CliCommand::Erase => {
            let mut session = UpgradeSession::open(&config)?;
            session.erase_chip()?;
            info!("Chip erased");
            session.close();
        }
        CliCommand::EnterUpdate => {
            // The running-firmware device, not the bootloader.
            let normal = SessionConfig {
                product_id: EV3_PRODUCT_ID,
                ..config
            };
            let mut session = UpgradeSession::open(&normal)?;
            session.enter_firmware_update()?;
            info!("Device rebooting into firmware-update mode");
            session.close();
        }
    }

    Ok(())
}
