//! Multi-node replication scenarios

use room_gossip_core::{Error, NodeId, RoomName, RoomPayload};
use room_gossip_net::{ClientError, RoomClient};
use roomd::reconcile::InProcessConnector;
use roomd::{Config, LocalChannel, Node, PeerRegistry, RoomDirectory, Server, Storage, TokenTable};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

const TUTORIAL: &str = r#"{"room":"tutorial","data":[[0,1,0],[1,1,1]]}"#;
const ARENA_ALICE: &str = r#"{"room":"arena","data":[[1]]}"#;
const ARENA_BOB: &str = r#"{"room":"arena","data":[[2]]}"#;

/// Poll `check` until it holds or five seconds pass
async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..250 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Several nodes sharing one in-process topic
struct Federation {
    channel: LocalChannel,
    connector: Arc<InProcessConnector>,
    tokens: Arc<TokenTable>,
    shutdown: broadcast::Sender<()>,
    dirs: Vec<TempDir>,
}

impl Federation {
    fn new() -> Self {
        let tokens = Arc::new(TokenTable::new());
        tokens.issue("alice", "tok-alice");
        tokens.issue("bob", "tok-bob");
        let (shutdown, _) = broadcast::channel(1);

        Self {
            channel: LocalChannel::new(256),
            connector: Arc::new(InProcessConnector::new()),
            tokens,
            shutdown,
            dirs: Vec::new(),
        }
    }

    /// Create a node without joining the topic yet
    fn node(&mut self, id: &str) -> Arc<Node> {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).unwrap());
        self.dirs.push(dir);

        let directory = Arc::new(RoomDirectory::open(storage).unwrap());
        self.connector.attach(NodeId::from(id), directory.clone());

        Arc::new(Node::new(
            id.into(),
            directory,
            Arc::new(PeerRegistry::new(0)),
            self.tokens.clone(),
            Arc::new(self.channel.clone()),
            self.connector.clone(),
        ))
    }

    async fn start(&self, node: &Node) {
        node.start(self.shutdown.subscribe()).await;
    }
}

fn has_room(node: &Node, name: &str) -> bool {
    node.directory().contains(&RoomName::from(name))
}

#[tokio::test]
async fn test_publish_and_remove_propagate() {
    let mut fed = Federation::new();
    let a = fed.node("a:1");
    let b = fed.node("b:1");
    let c = fed.node("c:1");
    for node in [&a, &b, &c] {
        fed.start(node).await;
    }

    a.publish("tok-alice", TUTORIAL).await.unwrap();

    eventually("tutorial on b and c", || async {
        has_room(&b, "tutorial") && has_room(&c, "tutorial")
    })
    .await;
    let served = RoomPayload::parse(&c.get_room(&"tutorial".into()).unwrap()).unwrap();
    assert_eq!(served, RoomPayload::parse(TUTORIAL).unwrap());
    assert_eq!(
        b.directory().owner_of(&"tutorial".into()),
        Some("alice".into())
    );

    a.remove("tok-alice", &"tutorial".into()).await.unwrap();

    eventually("tutorial gone everywhere", || async {
        !has_room(&a, "tutorial") && !has_room(&b, "tutorial") && !has_room(&c, "tutorial")
    })
    .await;
    assert_eq!(
        b.get_room(&"tutorial".into()).unwrap_err(),
        Error::RoomNotExists("tutorial".into())
    );
}

#[tokio::test]
async fn test_late_joiner_catches_up() {
    let mut fed = Federation::new();
    let a = fed.node("a:1");
    let b = fed.node("b:1");
    fed.start(&a).await;
    fed.start(&b).await;

    a.publish("tok-alice", TUTORIAL).await.unwrap();
    b.publish("tok-bob", ARENA_BOB).await.unwrap();

    let c = fed.node("c:1");
    fed.start(&c).await;

    eventually("c imports both rooms", || async {
        has_room(&c, "tutorial") && has_room(&c, "arena")
    })
    .await;
    eventually("a and b learn about c", || async {
        a.peers().contains(&"c:1".into()) && b.peers().contains(&"c:1".into())
    })
    .await;
    assert_eq!(c.directory().owner_of(&"arena".into()), Some("bob".into()));
}

#[tokio::test]
async fn test_same_name_different_owners_stay_divergent() {
    let mut fed = Federation::new();
    let a = fed.node("a:1");
    let b = fed.node("b:1");

    // Both publish before either node has joined the topic
    a.publish("tok-alice", ARENA_ALICE).await.unwrap();
    b.publish("tok-bob", ARENA_BOB).await.unwrap();

    fed.start(&a).await;
    fed.start(&b).await;

    a.gossip().announce().await;
    b.gossip().announce().await;
    eventually("both reconciled at least once", || async {
        a.stats().reconcile.runs > 0 && b.stats().reconcile.runs > 0
    })
    .await;

    assert_eq!(a.directory().owner_of(&"arena".into()), Some("alice".into()));
    assert_eq!(b.directory().owner_of(&"arena".into()), Some("bob".into()));
}

#[tokio::test]
async fn test_unreachable_origin_does_not_block() {
    let mut fed = Federation::new();
    let a = fed.node("a:1");
    let b = fed.node("b:1");
    fed.start(&a).await;
    fed.start(&b).await;

    fed.connector.detach(&"a:1".into());
    a.publish("tok-alice", TUTORIAL).await.unwrap();

    eventually("b tried and failed", || async {
        b.stats().reconcile.failures > 0
    })
    .await;
    assert!(!has_room(&b, "tutorial"));

    // Once a is reachable again, the next announcement heals the gap
    fed.connector.attach("a:1".into(), a.directory().clone());
    a.gossip().announce().await;
    eventually("b catches up", || async { has_room(&b, "tutorial") }).await;
}

// =============================================================================
// OVER TCP
// =============================================================================

struct TcpNode {
    server: Arc<Server>,
    addr: String,
    _dir: TempDir,
}

fn write_users(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("users.json");
    std::fs::write(
        &path,
        r#"{
            "alice": {"password_hash": "h1", "current_token": "tok-alice"},
            "bob": {"password_hash": "h2", "current_token": "tok-bob"}
        }"#,
    )
    .unwrap();
    path
}

async fn spawn_server(bootstrap: Vec<String>) -> TcpNode {
    let dir = tempfile::tempdir().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let config = Config {
        listen: listener.local_addr().unwrap(),
        advertise: Some(addr.clone()),
        data_dir: dir.path().join("data"),
        users_file: write_users(dir.path()),
        bootstrap,
        announce_interval_secs: 0,
        max_peers: 0,
        peer_timeout_secs: 5,
        log_format: "pretty".into(),
    };

    let server = Arc::new(Server::new(config).unwrap());
    let running = server.clone();
    tokio::spawn(async move { running.run_on(listener).await });

    TcpNode {
        server,
        addr,
        _dir: dir,
    }
}

#[tokio::test]
async fn test_client_operations_over_tcp() {
    let node = spawn_server(vec![]).await;
    let mut client = RoomClient::connect(&node.addr).await.unwrap();

    client.ping().await.unwrap();
    client.publish("tok-alice", ARENA_ALICE).await.unwrap();

    let rooms = client.available_rooms().await.unwrap();
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0].owner.as_str(), "alice");

    let json = client.get_room(&"arena".into()).await.unwrap();
    assert_eq!(
        RoomPayload::parse(&json).unwrap(),
        RoomPayload::parse(ARENA_ALICE).unwrap()
    );

    let err = client.publish("tok-bob", ARENA_BOB).await.unwrap_err();
    assert!(matches!(err, ClientError::Remote(Error::RoomAlreadyExists(_))));

    let err = client.remove("tok-bob", &"arena".into()).await.unwrap_err();
    assert!(matches!(err, ClientError::Remote(Error::RoomNotExists(_))));

    let err = client.publish("stolen", ARENA_ALICE).await.unwrap_err();
    assert!(matches!(err, ClientError::Remote(Error::Unauthorized)));

    let err = client.publish("tok-alice", "[]").await.unwrap_err();
    assert!(matches!(err, ClientError::Remote(Error::WrongRoomFormat(_))));

    client.remove("tok-alice", &"arena".into()).await.unwrap();
    assert!(client.available_rooms().await.unwrap().is_empty());

    node.server.shutdown();
}

#[tokio::test]
async fn test_two_servers_replicate_over_tcp() {
    let a = spawn_server(vec![]).await;
    let mut client_a = RoomClient::connect(&a.addr).await.unwrap();
    client_a.publish("tok-alice", TUTORIAL).await.unwrap();

    // b says hello to a, a registers b and announces, b pulls from a
    let b = spawn_server(vec![a.addr.clone()]).await;
    let b_node = b.server.node().clone();
    eventually("b imports tutorial", || async { has_room(&b_node, "tutorial") }).await;

    // b's publications reach a through b's bootstrap fan-out
    let mut client_b = RoomClient::connect(&b.addr).await.unwrap();
    client_b.publish("tok-bob", ARENA_BOB).await.unwrap();
    let a_node = a.server.node().clone();
    eventually("a imports arena", || async { has_room(&a_node, "arena") }).await;

    client_b.remove("tok-bob", &"arena".into()).await.unwrap();
    eventually("arena removed on a", || async { !has_room(&a_node, "arena") }).await;

    a.server.shutdown();
    b.server.shutdown();
}

fn knows(node: &TcpNode, peer: &TcpNode) -> bool {
    node.server.node().peers().contains(&peer.addr.as_str().into())
}

fn serves(node: &TcpNode, name: &str) -> bool {
    has_room(node.server.node(), name)
}

#[tokio::test]
async fn test_spokes_discover_each_other_through_hub() {
    let hub = spawn_server(vec![]).await;
    let b = spawn_server(vec![hub.addr.clone()]).await;
    eventually("hub knows b", || async { knows(&hub, &b) }).await;
    let c = spawn_server(vec![hub.addr.clone()]).await;

    // c's hello is relayed by the hub; b answers with an announce
    eventually("b and c know each other", || async {
        knows(&b, &c) && knows(&c, &b)
    })
    .await;

    for node in [&hub, &b, &c] {
        node.server.shutdown();
    }
}

#[tokio::test]
async fn test_removal_reaches_nodes_behind_the_hub() {
    let hub = spawn_server(vec![]).await;
    let b = spawn_server(vec![hub.addr.clone()]).await;
    eventually("hub knows b", || async { knows(&hub, &b) }).await;
    let c = spawn_server(vec![hub.addr.clone()]).await;
    eventually("hub knows c", || async { knows(&hub, &c) }).await;

    let mut client_c = RoomClient::connect(&c.addr).await.unwrap();
    client_c.publish("tok-alice", TUTORIAL).await.unwrap();

    eventually("hub and b cache tutorial", || async {
        serves(&hub, "tutorial") && serves(&b, "tutorial")
    })
    .await;
    assert_eq!(
        b.server.node().directory().owner_of(&"tutorial".into()),
        Some("alice".into())
    );

    client_c.remove("tok-alice", &"tutorial".into()).await.unwrap();

    eventually("no node serves tutorial", || async {
        !serves(&hub, "tutorial") && !serves(&b, "tutorial") && !serves(&c, "tutorial")
    })
    .await;
    let mut client_b = RoomClient::connect(&b.addr).await.unwrap();
    let err = client_b.get_room(&"tutorial".into()).await.unwrap_err();
    assert!(matches!(err, ClientError::Remote(Error::RoomNotExists(_))));

    for node in [&hub, &b, &c] {
        node.server.shutdown();
    }
}

#[tokio::test]
async fn test_chain_of_four_replicates_end_to_end() {
    let a = spawn_server(vec![]).await;
    let b = spawn_server(vec![a.addr.clone()]).await;
    eventually("a knows b", || async { knows(&a, &b) }).await;
    let c = spawn_server(vec![b.addr.clone()]).await;
    eventually("b knows c", || async { knows(&b, &c) }).await;
    let d = spawn_server(vec![c.addr.clone()]).await;

    // d's hello travels d -> c -> b -> a
    eventually("a learns about d", || async { knows(&a, &d) }).await;

    let mut client_d = RoomClient::connect(&d.addr).await.unwrap();
    client_d.publish("tok-bob", ARENA_BOB).await.unwrap();
    eventually("every node caches arena", || async {
        [&a, &b, &c].iter().all(|node| serves(node, "arena"))
    })
    .await;

    // A publication at the far end travels back the other way
    let mut client_a = RoomClient::connect(&a.addr).await.unwrap();
    client_a.publish("tok-alice", TUTORIAL).await.unwrap();
    eventually("d caches tutorial", || async { serves(&d, "tutorial") }).await;

    client_d.remove("tok-bob", &"arena".into()).await.unwrap();
    eventually("arena gone everywhere", || async {
        [&a, &b, &c, &d].iter().all(|node| !serves(node, "arena"))
    })
    .await;
    assert!(serves(&a, "tutorial") && serves(&b, "tutorial") && serves(&c, "tutorial"));

    for node in [&a, &b, &c, &d] {
        node.server.shutdown();
    }
}
