//! Configuration for roomd

use clap::Parser;
use room_gossip_core::NodeId;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// roomd - RoomGossip room directory daemon
#[derive(Parser, Debug, Clone)]
#[command(name = "roomd")]
#[command(about = "RoomGossip room directory and replication daemon")]
pub struct Config {
    /// Listen address for client and peer connections
    #[arg(short, long, default_value = "0.0.0.0:9200")]
    pub listen: SocketAddr,

    /// Address peers use to reach this node (defaults to the listen address)
    #[arg(long)]
    pub advertise: Option<String>,

    /// Data directory for persistent storage
    #[arg(short, long, default_value = "./data/roomd")]
    pub data_dir: PathBuf,

    /// Users file maintained by the authentication service
    #[arg(long, env = "ROOMD_USERS_FILE", default_value = "users.json")]
    pub users_file: PathBuf,

    /// Bootstrap peers (comma-separated addresses)
    #[arg(long, value_delimiter = ',')]
    pub bootstrap: Vec<String>,

    /// Interval between periodic announcements in seconds (0 disables)
    #[arg(long, default_value = "30")]
    pub announce_interval_secs: u64,

    /// Maximum number of known peers (0 = unbounded)
    #[arg(long, default_value = "0")]
    pub max_peers: usize,

    /// Timeout for a single remote call to a peer in seconds
    #[arg(long, default_value = "10")]
    pub peer_timeout_secs: u64,

    /// Log format (json or pretty)
    #[arg(long, default_value = "pretty")]
    pub log_format: String,
}

impl Config {
    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        match &self.advertise {
            Some(advertise) if advertise.trim().is_empty() => {
                anyhow::bail!("Advertise address cannot be empty");
            }
            Some(_) => {}
            // The listen address doubles as the node id peers dial
            None if self.listen.ip().is_unspecified() || self.listen.port() == 0 => {
                anyhow::bail!(
                    "Listen address {} is not dialable by peers; set --advertise",
                    self.listen
                );
            }
            None => {}
        }
        if self.peer_timeout_secs == 0 {
            anyhow::bail!("Peer timeout must be at least one second");
        }
        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            anyhow::bail!("Unknown log format: {}", self.log_format);
        }
        Ok(())
    }

    /// This node's identity on the topic
    pub fn node_id(&self) -> NodeId {
        match &self.advertise {
            Some(advertise) => NodeId::from(advertise.trim()),
            None => NodeId::from(self.listen.to_string()),
        }
    }

    pub fn bootstrap_peers(&self) -> Vec<NodeId> {
        self.bootstrap
            .iter()
            .map(|addr| addr.trim())
            .filter(|addr| !addr.is_empty())
            .map(NodeId::from)
            .collect()
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_timeout_secs)
    }

    pub fn announce_interval(&self) -> Option<Duration> {
        (self.announce_interval_secs > 0).then(|| Duration::from_secs(self.announce_interval_secs))
    }
}
