//! roomd server - main service loop

use crate::auth::UsersFile;
use crate::channel::PeerFanout;
use crate::config::Config;
use crate::directory::{DirectoryError, RoomDirectory};
use crate::node::{Node, NodeStats};
use crate::peers::PeerRegistry;
use crate::reconcile::TcpConnector;
use crate::storage::{Storage, StorageError};
use futures::{SinkExt, StreamExt};
use room_gossip_net::messages::gossip_from_frame;
use room_gossip_net::{Frame, FrameCodec, FrameError, FrameType, Request};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::interval;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

/// Server errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),
}

/// Server state
pub struct Server {
    config: Config,
    storage: Arc<Storage>,
    node: Arc<Node>,
    /// Shutdown signal
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Result<Self, ServerError> {
        let node_id = config.node_id();

        // Open storage
        let storage = Arc::new(Storage::open(&config.data_dir)?);

        let directory = Arc::new(RoomDirectory::open(storage.clone())?);
        let peers = Arc::new(PeerRegistry::open(storage.clone(), config.max_peers)?);

        let channel = Arc::new(PeerFanout::new(
            node_id.clone(),
            peers.clone(),
            config.bootstrap_peers(),
            config.peer_timeout(),
        ));

        let node = Arc::new(Node::new(
            node_id,
            directory,
            peers,
            Arc::new(UsersFile::new(&config.users_file)),
            channel,
            Arc::new(TcpConnector::new(config.peer_timeout())),
        ));

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            storage,
            node,
            shutdown_tx,
        })
    }

    /// The node this server exposes
    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    /// Bind the configured address and run
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.config.listen).await?;
        self.run_on(listener).await
    }

    /// Run on an already bound listener until shutdown
    pub async fn run_on(&self, listener: TcpListener) -> Result<(), ServerError> {
        info!(
            "Starting roomd as {} ({} room(s), {} known peer(s))",
            self.node.node_id(),
            self.node.directory().len(),
            self.node.peers().len()
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        // Join the topic before accepting anything
        let gossip_handle = self.node.start(self.shutdown_tx.subscribe()).await;
        let announce_handle = self.spawn_announce_task();

        info!("Listening on {}", listener.local_addr()?);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            debug!("Accepted connection from {}", addr);
                            let node = self.node.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(node, stream, addr).await {
                                    warn!("Connection error from {}: {}", addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutting down...");
                    break;
                }
            }
        }

        // Both tasks watch the shutdown signal; the gossip loop aborts its
        // in-flight handlers before returning
        if let Err(e) = gossip_handle.await {
            warn!("Gossip task failed: {}", e);
        }
        if let Some(handle) = announce_handle {
            if let Err(e) = handle.await {
                warn!("Announce task failed: {}", e);
            }
        }

        // Flush storage
        self.storage.flush()?;

        Ok(())
    }

    /// Spawn the periodic announcement that drives anti-entropy on peers
    fn spawn_announce_task(&self) -> Option<tokio::task::JoinHandle<()>> {
        let period = self.config.announce_interval()?;
        let gossip = self.node.gossip().clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            // The first tick fires immediately; start-up already said hello
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        debug!("Periodic announce");
                        gossip.announce().await;
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        }))
    }

    /// Shutdown the server
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get server statistics
    pub fn stats(&self) -> NodeStats {
        self.node.stats()
    }
}

/// Serve one connection: requests get a response, gossip is handed to
/// the topic for delivery and relay, pings get a pong.
async fn handle_connection(
    node: Arc<Node>,
    stream: TcpStream,
    addr: SocketAddr,
) -> Result<(), FrameError> {
    let mut framed = Framed::new(stream, FrameCodec::new());

    while let Some(frame) = framed.next().await {
        let frame = frame?;
        match frame.frame_type {
            FrameType::Ping => framed.send(Frame::pong()).await?,
            FrameType::Request => {
                let request = Request::from_frame(&frame)?;
                debug!("{} from {}", request.operation(), addr);
                let response = node.handle_request(request).await;
                framed.send(response.to_frame()?).await?;
            }
            FrameType::Gossip => {
                let envelope = gossip_from_frame(&frame)?;
                debug!(
                    "Gossip {} from {} (hop {})",
                    envelope.message.kind(),
                    addr,
                    envelope.hops
                );
                node.channel().receive(envelope);
            }
            FrameType::Pong | FrameType::Response => {
                warn!("Unexpected {:?} frame from {}", frame.frame_type, addr);
            }
        }
    }

    debug!("Connection from {} closed", addr);
    Ok(())
}
