//! roomctl - command-line client for a roomd node

use anyhow::Context;
use clap::{Parser, Subcommand};
use room_gossip_core::{Error, RoomName, RoomPayload};
use room_gossip_net::{ClientError, RoomClient};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// RoomGossip directory client
#[derive(Parser, Debug)]
#[command(name = "roomctl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Node to talk to
    #[arg(short, long, env = "ROOMCTL_NODE", default_value = "127.0.0.1:9200")]
    node: String,

    /// Timeout for each call (seconds, at least 1)
    #[arg(long, default_value = "10", value_parser = clap::value_parser!(u64).range(1..))]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Publish a room from a JSON map file
    Publish { token: String, file: PathBuf },
    /// Remove a room you own
    Remove { token: String, name: String },
    /// List every room the node knows
    List,
    /// Print a room document
    Get { name: String },
}

/// Process exit codes, one per failure class
fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<ClientError>() {
        Some(ClientError::Remote(Error::Unauthorized)) => 1,
        Some(ClientError::Remote(Error::RoomAlreadyExists(_))) => 2,
        Some(ClientError::Remote(Error::RoomNotExists(_))) => 3,
        Some(ClientError::Remote(Error::WrongRoomFormat(_))) => 4,
        Some(_) => 5,
        // Local input problems (unreadable or invalid map file)
        None => 4,
    }
}

fn read_room_file(path: &Path) -> anyhow::Result<String> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    // Catch malformed maps before they reach the node
    RoomPayload::parse(&text).with_context(|| format!("{} is not a valid room", path.display()))?;
    Ok(text)
}

async fn execute(cli: Cli) -> anyhow::Result<()> {
    let timeout = Duration::from_secs(cli.timeout_secs);

    let json = match &cli.command {
        Command::Publish { file, .. } => Some(read_room_file(file)?),
        _ => None,
    };

    let mut client = RoomClient::connect_with_timeout(&cli.node, timeout).await?;

    match cli.command {
        Command::Publish { token, .. } => {
            let json = json.unwrap_or_default();
            client.publish(&token, &json).await?;
            println!("Published");
        }
        Command::Remove { token, name } => {
            client.remove(&token, &RoomName::from(name)).await?;
            println!("Removed");
        }
        Command::List => {
            for room in client.available_rooms().await? {
                println!("{}\t{}", room.name, room.owner);
            }
        }
        Command::Get { name } => {
            println!("{}", client.get_room(&RoomName::from(name)).await?);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();

    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("roomctl: {:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}
