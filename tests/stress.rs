//! Stress test: many cross-shard transactions through one coordinator

mod common;

use common::TestCluster;
use std::time::{Duration, Instant};

#[tokio::test]
async fn stress_insert_and_read() {
    let cluster = TestCluster::start_with(Duration::from_secs(2), Duration::from_secs(2)).await;

    let n = 500i64;
    let start = Instant::now();
    for i in 0..n {
        let (a, b) = (1 + i % 949, 950 + i % 950);
        cluster
            .coordinator
            .insert_data(format!("ts_{}", i), a, b, i)
            .await
            .unwrap();
    }
    let write_time = start.elapsed();

    let start = Instant::now();
    let mut total = 0;
    for node in 1..=n.min(949) {
        total += cluster.coordinator.get_edges(node).await.len();
    }
    let read_time = start.elapsed();

    println!("Insert {} edges: {:?}", n, write_time);
    println!("Read {} nodes: {:?}", n.min(949), read_time);
    assert_eq!(total as i64, n);
    assert_eq!(cluster.shard(1).edge_count().unwrap() as i64, n);
    assert_eq!(cluster.shard(2).edge_count().unwrap() as i64, n);
    assert!(write_time.as_secs_f64() < 30.0, "Write too slow");
    assert!(read_time.as_secs_f64() < 30.0, "Read too slow");
}
