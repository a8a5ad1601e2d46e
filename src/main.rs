//! Salelock CLI Application
//!
//! A developer tool for rendering sale-lock scripts and exercising the
//! marketplace flows against an in-process chain.

mod cli;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "salelock")]
#[command(author = "Darshan")]
#[command(version = "0.1.0")]
#[command(about = "Escrow-free sale-lock transactions for unique tokens", long_about = None)]
struct Cli {
    /// Marketplace configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use testnet address versions
    #[arg(long)]
    testnet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a key pair
    Keygen,

    /// Render a sale-lock script from terms
    Render {
        /// Address allowed to cancel the listing
        #[arg(long)]
        cancel: String,

        /// Address receiving the payment
        #[arg(long)]
        payee: String,

        /// Price in satoshis
        #[arg(short, long)]
        price: u64,

        /// Asset identifier
        #[arg(short, long)]
        asset_id: String,

        /// Item metadata (UTF-8 text)
        #[arg(short, long, default_value = "")]
        metadata: String,

        /// Item metadata as hex, instead of --metadata
        #[arg(long)]
        metadata_hex: Option<String>,
    },

    /// Recover sale terms from a script
    Parse {
        /// Locking script hex
        script: String,
    },

    /// Write the default configuration file
    InitConfig {
        /// Output file path
        #[arg(short, long, default_value = "salelock.json")]
        output: PathBuf,
    },

    /// Run list, purchase and cancel on an in-process chain
    Simulate {
        /// Listing price in satoshis
        #[arg(short, long, default_value = "1000")]
        price: u64,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = cli::load_config(cli.config.as_deref())?;
    if cli.testnet {
        config.address_version = cli::address_version(true);
    }

    match cli.command {
        Commands::Keygen => {
            cli::cmd_keygen(cli.testnet)?;
        }

        Commands::Render {
            cancel,
            payee,
            price,
            asset_id,
            metadata,
            metadata_hex,
        } => {
            let metadata = match metadata_hex {
                Some(hex_metadata) => hex::decode(hex_metadata)?,
                None => metadata.into_bytes(),
            };
            cli::cmd_render(&config, &cancel, &payee, price, &asset_id, &metadata)?;
        }

        Commands::Parse { script } => {
            cli::cmd_parse(&script, config.address_version)?;
        }

        Commands::InitConfig { output } => {
            cli::cmd_init_config(&output)?;
        }

        Commands::Simulate { price } => {
            cli::cmd_simulate(config, price)?;
        }
    }

    Ok(())
}
