//! Pull-based reconciliation against a peer's room listing
//!
//! A reconciliation pass lists the peer's rooms, works out which names the
//! local directory lacks, and fetches each of them from the peer. It never
//! deletes anything: a room we hold that the peer lacks is assumed not to
//! have reached the peer yet. Removals only travel as `RoomRemoved` gossip.
//!
//! The directory lock is only taken around local reads and writes, never
//! while a remote call is in flight.

use crate::directory::{DirectoryError, RoomDirectory};
use async_trait::async_trait;
use parking_lot::RwLock;
use room_gossip_core::{Error, NodeId, RoomName, RoomPayload, RoomSummary};
use room_gossip_net::{ClientError, RoomClient};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Failure talking to a peer
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("Peer unreachable: {0}")]
    Unreachable(String),
    #[error("Peer refused: {0}")]
    Remote(Error),
}

/// Reconciliation errors
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Peer {peer} unreachable: {reason}")]
    PeerUnreachable { peer: NodeId, reason: String },
    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),
}

/// The remote operations reconciliation needs from a peer
#[async_trait]
pub trait PeerSession: Send {
    async fn available_rooms(&mut self) -> Result<Vec<RoomSummary>, PeerError>;
    async fn get_room(&mut self, name: &RoomName) -> Result<String, PeerError>;
}

/// Opens sessions to peers by node id
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(&self, peer: &NodeId) -> Result<Box<dyn PeerSession>, PeerError>;
}

// =============================================================================
// TCP SESSIONS
// =============================================================================

impl From<ClientError> for PeerError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Remote(e) => PeerError::Remote(e),
            other => PeerError::Unreachable(other.to_string()),
        }
    }
}

#[async_trait]
impl PeerSession for RoomClient {
    async fn available_rooms(&mut self) -> Result<Vec<RoomSummary>, PeerError> {
        Ok(RoomClient::available_rooms(self).await?)
    }

    async fn get_room(&mut self, name: &RoomName) -> Result<String, PeerError> {
        Ok(RoomClient::get_room(self, name).await?)
    }
}

/// Dials peers over TCP, treating the node id as the address
pub struct TcpConnector {
    timeout: Duration,
}

impl TcpConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl PeerConnector for TcpConnector {
    async fn connect(&self, peer: &NodeId) -> Result<Box<dyn PeerSession>, PeerError> {
        let client = RoomClient::connect_with_timeout(peer.as_str(), self.timeout).await?;
        Ok(Box::new(client))
    }
}

// =============================================================================
// IN-PROCESS SESSIONS
// =============================================================================

/// Reaches peer directories living in the same process
#[derive(Default)]
pub struct InProcessConnector {
    directories: RwLock<HashMap<NodeId, Arc<RoomDirectory>>>,
}

impl InProcessConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `directory` reachable as `node`
    pub fn attach(&self, node: NodeId, directory: Arc<RoomDirectory>) {
        self.directories.write().insert(node, directory);
    }

    /// Make `node` unreachable
    pub fn detach(&self, node: &NodeId) {
        self.directories.write().remove(node);
    }
}

struct InProcessSession {
    directory: Arc<RoomDirectory>,
}

#[async_trait]
impl PeerSession for InProcessSession {
    async fn available_rooms(&mut self) -> Result<Vec<RoomSummary>, PeerError> {
        Ok(self.directory.list_all().into_vec())
    }

    async fn get_room(&mut self, name: &RoomName) -> Result<String, PeerError> {
        self.directory
            .get(name)
            .map(|payload| payload.to_json_string())
            .map_err(|e| PeerError::Remote(e.into()))
    }
}

#[async_trait]
impl PeerConnector for InProcessConnector {
    async fn connect(&self, peer: &NodeId) -> Result<Box<dyn PeerSession>, PeerError> {
        let directory = self
            .directories
            .read()
            .get(peer)
            .cloned()
            .ok_or_else(|| PeerError::Unreachable(format!("no node {peer} in process")))?;
        Ok(Box::new(InProcessSession { directory }))
    }
}

// =============================================================================
// ENGINE
// =============================================================================

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Rooms the peer listed
    pub listed: usize,
    /// Names we did not have
    pub missing: usize,
    /// Rooms actually written to the directory
    pub imported: usize,
}

/// Imports rooms the local directory is missing relative to a peer
pub struct ReconciliationEngine {
    directory: Arc<RoomDirectory>,
    connector: Arc<dyn PeerConnector>,
    runs: AtomicU64,
    imported: AtomicU64,
    failures: AtomicU64,
}

impl ReconciliationEngine {
    pub fn new(directory: Arc<RoomDirectory>, connector: Arc<dyn PeerConnector>) -> Self {
        Self {
            directory,
            connector,
            runs: AtomicU64::new(0),
            imported: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Pull every room `peer` has and we lack
    pub async fn reconcile_with(&self, peer: &NodeId) -> Result<ReconcileReport, ReconcileError> {
        self.runs.fetch_add(1, Ordering::Relaxed);
        let result = self.pull(peer).await;
        match &result {
            Ok(report) => {
                self.imported
                    .fetch_add(report.imported as u64, Ordering::Relaxed);
                if report.imported > 0 {
                    info!("Imported {} room(s) from {}", report.imported, peer);
                }
            }
            Err(_) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
        result
    }

    async fn pull(&self, peer: &NodeId) -> Result<ReconcileReport, ReconcileError> {
        let unreachable = |e: PeerError| ReconcileError::PeerUnreachable {
            peer: peer.clone(),
            reason: e.to_string(),
        };

        let mut session = self.connector.connect(peer).await.map_err(unreachable)?;
        let remote = session.available_rooms().await.map_err(unreachable)?;

        let local: HashSet<RoomName> = self.directory.list_all().into_iter().map(|s| s.name).collect();
        let missing: Vec<RoomSummary> = remote
            .iter()
            .filter(|summary| !local.contains(&summary.name))
            .cloned()
            .collect();

        let mut report = ReconcileReport {
            listed: remote.len(),
            missing: missing.len(),
            imported: 0,
        };
        debug!(
            "Peer {} lists {} room(s), {} missing locally",
            peer, report.listed, report.missing
        );

        for summary in missing {
            let json = match session.get_room(&summary.name).await {
                Ok(json) => json,
                Err(PeerError::Remote(Error::RoomNotExists(_))) => {
                    debug!("Room {} vanished from {} before fetch", summary.name, peer);
                    continue;
                }
                Err(e) => return Err(unreachable(e)),
            };

            let payload = match RoomPayload::parse(&json) {
                Ok(payload) if payload.name() == summary.name => payload,
                Ok(payload) => {
                    warn!(
                        "Peer {} served room {} for name {}, skipping",
                        peer,
                        payload.name(),
                        summary.name
                    );
                    continue;
                }
                Err(e) => {
                    warn!("Peer {} served malformed room {}: {}", peer, summary.name, e);
                    continue;
                }
            };

            if self.directory.import_foreign(summary.owner, payload)? {
                report.imported += 1;
            }
        }

        Ok(report)
    }

    /// Get reconciliation statistics
    pub fn stats(&self) -> ReconcileStats {
        ReconcileStats {
            runs: self.runs.load(Ordering::Relaxed),
            imported: self.imported.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Reconciliation statistics
#[derive(Debug, Clone, Default)]
pub struct ReconcileStats {
    pub runs: u64,
    pub imported: u64,
    pub failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use tempfile::tempdir;

    fn payload(name: &str, data: u32) -> RoomPayload {
        RoomPayload::parse(&format!(r#"{{"room":"{name}","data":[{data}]}}"#)).unwrap()
    }

    fn create_directory() -> (Arc<RoomDirectory>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).unwrap());
        (Arc::new(RoomDirectory::open(storage).unwrap()), dir)
    }

    /// Peer whose listing advertises rooms it cannot serve
    struct LyingSession;

    #[async_trait]
    impl PeerSession for LyingSession {
        async fn available_rooms(&mut self) -> Result<Vec<RoomSummary>, PeerError> {
            Ok(vec![
                RoomSummary {
                    name: "gone".into(),
                    owner: "alice".into(),
                },
                RoomSummary {
                    name: "renamed".into(),
                    owner: "alice".into(),
                },
                RoomSummary {
                    name: "broken".into(),
                    owner: "alice".into(),
                },
            ])
        }

        async fn get_room(&mut self, name: &RoomName) -> Result<String, PeerError> {
            match name.as_str() {
                "gone" => Err(PeerError::Remote(Error::RoomNotExists("gone".into()))),
                "renamed" => Ok(r#"{"room":"other"}"#.into()),
                _ => Ok("{not json".into()),
            }
        }
    }

    struct LyingConnector;

    #[async_trait]
    impl PeerConnector for LyingConnector {
        async fn connect(&self, _: &NodeId) -> Result<Box<dyn PeerSession>, PeerError> {
            Ok(Box::new(LyingSession))
        }
    }

    #[tokio::test]
    async fn test_pulls_missing_rooms() {
        let (local, _d1) = create_directory();
        let (remote, _d2) = create_directory();
        remote.put("alice".into(), payload("tutorial", 1)).unwrap();
        remote.put("alice".into(), payload("arena", 1)).unwrap();
        local.put("bob".into(), payload("arena", 2)).unwrap();

        let connector = Arc::new(InProcessConnector::new());
        connector.attach("a:1".into(), remote.clone());
        let engine = ReconciliationEngine::new(local.clone(), connector);

        let report = engine.reconcile_with(&"a:1".into()).await.unwrap();
        assert_eq!(
            report,
            ReconcileReport {
                listed: 2,
                missing: 1,
                imported: 1,
            }
        );

        assert_eq!(local.get(&"tutorial".into()).unwrap(), payload("tutorial", 1));
        assert_eq!(local.owner_of(&"tutorial".into()), Some("alice".into()));
        // Differently-owned copy under the same name stays put
        assert_eq!(local.owner_of(&"arena".into()), Some("bob".into()));
    }

    #[tokio::test]
    async fn test_never_deletes_local_rooms() {
        let (local, _d1) = create_directory();
        let (remote, _d2) = create_directory();
        local.put("bob".into(), payload("only-here", 1)).unwrap();

        let connector = Arc::new(InProcessConnector::new());
        connector.attach("a:1".into(), remote);
        let engine = ReconciliationEngine::new(local.clone(), connector);

        engine.reconcile_with(&"a:1".into()).await.unwrap();
        assert!(local.contains(&"only-here".into()));
    }

    #[tokio::test]
    async fn test_second_pass_is_noop() {
        let (local, _d1) = create_directory();
        let (remote, _d2) = create_directory();
        remote.put("alice".into(), payload("tutorial", 1)).unwrap();

        let connector = Arc::new(InProcessConnector::new());
        connector.attach("a:1".into(), remote);
        let engine = ReconciliationEngine::new(local.clone(), connector);

        engine.reconcile_with(&"a:1".into()).await.unwrap();
        let before = local.list_all();
        let report = engine.reconcile_with(&"a:1".into()).await.unwrap();

        assert_eq!(report.missing, 0);
        assert_eq!(local.list_all(), before);
        assert_eq!(engine.stats().runs, 2);
        assert_eq!(engine.stats().imported, 1);
    }

    #[tokio::test]
    async fn test_unreachable_peer() {
        let (local, _d1) = create_directory();
        let engine = ReconciliationEngine::new(local.clone(), Arc::new(InProcessConnector::new()));

        let result = engine.reconcile_with(&"nowhere:1".into()).await;
        assert!(matches!(result, Err(ReconcileError::PeerUnreachable { .. })));
        assert!(local.is_empty());
        assert_eq!(engine.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_skips_bad_rooms() {
        let (local, _d1) = create_directory();
        let engine = ReconciliationEngine::new(local.clone(), Arc::new(LyingConnector));

        let report = engine.reconcile_with(&"liar:1".into()).await.unwrap();
        assert_eq!(report.missing, 3);
        assert_eq!(report.imported, 0);
        assert!(local.is_empty());
    }

    #[tokio::test]
    async fn test_over_tcp_unreachable() {
        let (local, _d1) = create_directory();
        let engine = ReconciliationEngine::new(
            local,
            Arc::new(TcpConnector::new(Duration::from_millis(500))),
        );

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = engine.reconcile_with(&addr.into()).await;
        assert!(matches!(result, Err(ReconcileError::PeerUnreachable { .. })));
    }
}
