use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::{runtime::Runtime, signal};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use call::{
    client::{signaling, Call, Grid, PeerConnector, RecordingClient, SyntheticSource},
    config::{self, ClientConfig},
    error::CallError,
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
    /// join the configured room: --config client.toml
    Join {
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
        /// record the session while joined (host only)
        #[arg(long, value_name = "SESSION")]
        record: Option<u64>,
    },
    /// list recordings of a session
    Recordings {
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
        #[arg(short, long)]
        session: u64,
    },
    /// list attendance of a session
    Attendance {
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
        #[arg(short, long)]
        session: u64,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let rt = Runtime::new()?;

    match cli.command {
        Commands::Join { config, record } => {
            let config: ClientConfig = config::load(&config)?;
            rt.block_on(join(config, record))?;
        }
        Commands::Recordings { config, session } => {
            let config: ClientConfig = config::load(&config)?;
            let client = host_client(&config)?;
            for recording in rt.block_on(client.recordings(session))? {
                println!(
                    "{}\t{}\t{}",
                    recording.id,
                    recording.title.as_deref().unwrap_or("-"),
                    recording.file_url.as_deref().unwrap_or("-"),
                );
            }
        }
        Commands::Attendance { config, session } => {
            let config: ClientConfig = config::load(&config)?;
            let client = host_client(&config)?;
            for record in rt.block_on(client.attendance(session))? {
                let left = record.left_at.map(|t| t.to_rfc3339());
                println!(
                    "{}\t{}\t{}\t{}",
                    record.user,
                    record.joined_at.to_rfc3339(),
                    left.as_deref().unwrap_or("-"),
                    record.duration_seconds.unwrap_or_default(),
                );
            }
        }
    };

    Ok(())
}

fn host_client(config: &ClientConfig) -> call::Result<RecordingClient> {
    match &config.api {
        Some(api) if api.host => RecordingClient::new(api),
        _ => Err(CallError::NotHost),
    }
}

async fn join(config: ClientConfig, record: Option<u64>) -> call::Result<()> {
    let url = signaling::room_url(&config.signaling_url, &config.room, &config.identity)?;
    let (outbox, inbound) = signaling::connect(&url).await?;
    let connector = PeerConnector::new(config.ice_servers.clone())?;

    let mut call = Call::new(
        config.identity.clone(),
        connector,
        SyntheticSource::default(),
        Grid::default(),
        outbox,
    );
    if let Ok(client) = host_client(&config) {
        call = call.with_host_controls(client);
    }

    call.start(config.media.into()).await?;
    info!(room = %config.room, identity = %config.identity, "joined");

    if let Some(session) = record {
        let id = call.host_controls()?.start(session).await?;
        info!(recording_id = id, "recording");
    }

    let res = call.run(inbound, signal::ctrl_c()).await;

    if record.is_some() {
        if let Err(err) = call.host_controls()?.stop().await {
            error!(cause = %err, "failed to stop recording");
        }
    }
    res
}
