//! End-to-end over real gRPC: two shard servers and one coordinator on
//! ephemeral ports.

use socialgraph::common::{CoordinatorConfig, ShardConfig, ShardDescriptor, ShardRange};
use socialgraph::proto::social_graph_client::SocialGraphClient;
use socialgraph::proto::{NodeId, Transaction};
use socialgraph::{CoordinatorServer, ShardServer};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

struct Running {
    _dir: TempDir,
    coord_url: String,
    http_addr: std::net::SocketAddr,
    stops: Vec<oneshot::Sender<()>>,
}

async fn start_cluster() -> Running {
    let dir = TempDir::new().unwrap();
    let mut stops = Vec::new();
    let mut shards = Vec::new();

    for (id, range) in [(1, ShardRange::new(1, 949)), (2, ShardRange::new(950, 1899))] {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut config = ShardConfig::new(id, range, addr);
        config.data_dir = dir.path().to_path_buf();

        let (tx, rx) = oneshot::channel::<()>();
        stops.push(tx);
        tokio::spawn(ShardServer::new(config).serve_with_listener(listener, async move {
            let _ = rx.await;
        }));
        shards.push(ShardDescriptor::new(id, range, format!("http://{}", addr)));
    }

    let grpc_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let http_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let coord_url = format!("http://{}", grpc_listener.local_addr().unwrap());
    let http_addr = http_listener.local_addr().unwrap();
    let config = CoordinatorConfig {
        node_id: "coord-1".into(),
        shards,
        txn_log_path: Some(dir.path().join("txn.jsonl")),
        ..Default::default()
    };

    let (tx, rx) = oneshot::channel::<()>();
    stops.push(tx);
    tokio::spawn(CoordinatorServer::new(config).serve_with_listener(
        grpc_listener,
        Some(http_listener),
        async move {
            let _ = rx.await;
        },
    ));

    Running {
        _dir: dir,
        coord_url,
        http_addr,
        stops,
    }
}

async fn http_get(addr: std::net::SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        path
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

fn tx(timestamp: &str, node1: i64, node2: i64, weight: i64) -> Transaction {
    Transaction {
        timestamp: timestamp.into(),
        node1,
        node2,
        weight,
        txn_id: String::new(),
    }
}

#[tokio::test]
async fn test_insert_and_query_over_grpc() {
    let cluster = start_cluster().await;

    let mut client = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(client) = SocialGraphClient::connect(cluster.coord_url.clone()).await {
                return client;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("coordinator did not come up");

    // Wait out the first election.
    let ack = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let ack = client
                .insert_data(tx("t1", 100, 1500, 2))
                .await
                .unwrap()
                .into_inner();
            if ack.success || ack.leader_hint.is_empty() {
                return ack;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("coordinator never became leader");
    assert!(ack.success, "insert failed: {}", ack.message);

    let ack = client
        .insert_data(tx("t2", 42, 42, 1))
        .await
        .unwrap()
        .into_inner();
    assert!(ack.success);

    let ack = client
        .insert_data(tx("t3", 5, 5000, 1))
        .await
        .unwrap()
        .into_inner();
    assert!(!ack.success);

    let edges = client
        .get_edges(NodeId { id: 1500 })
        .await
        .unwrap()
        .into_inner()
        .edges;
    assert_eq!(edges.len(), 1);
    assert_eq!((edges[0].node1, edges[0].node2, edges[0].weight), (100, 1500, 2));

    let edges = client
        .get_edges(NodeId { id: 42 })
        .await
        .unwrap()
        .into_inner()
        .edges;
    assert_eq!(edges.len(), 1);
    assert!(edges[0].is_self_loop);

    let status = http_get(cluster.http_addr, "/status").await;
    assert!(status.starts_with("HTTP/1.1 200"));
    assert!(status.contains("\"role\":\"leader\""));

    let metrics = http_get(cluster.http_addr, "/metrics").await;
    assert!(metrics.contains("socialgraph_transactions_total{status=\"committed\"} 2"));

    let log = http_get(cluster.http_addr, "/transactions").await;
    assert!(log.contains("\"status\":\"committed\""));
    // Newest only: the rejected out-of-range insert never got a record.
    let page = http_get(cluster.http_addr, "/transactions?limit=1").await;
    assert!(page.contains("\"node1\":42"));
    assert!(!page.contains("\"node1\":100"));

    for stop in cluster.stops {
        let _ = stop.send(());
    }
}
