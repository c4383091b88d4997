use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::{net::TcpListener, runtime::Runtime, signal};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use call::{
    config::{self, Config},
    server,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}
#[derive(Subcommand)]
enum Commands {
    /// run with config file: --config config.toml
    Run {
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },
    /// print the effective config and exit
    Debug {
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match cli.command {
        Commands::Run { config } => {
            let config: Config = config::load(&config)?;
            let rt = Runtime::new()?;
            rt.block_on(async move {
                info!(addr = %config.addr(), "Starting call relay...");
                match TcpListener::bind(config.addr()).await {
                    Ok(listener) => {
                        server::run(config, listener, signal::ctrl_c()).await;
                    }
                    Err(error) => {
                        error!("Bind tcp with error: {:?}", error);
                    }
                }
            });
        }
        Commands::Debug { config } => {
            let config: Config = config::load(&config)?;
            println!("{:#?}", config);
        }
    };

    Ok(())
}
