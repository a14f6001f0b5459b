//! # State Ingestion Under Load
//!
//! Concurrent publishers against one twin, and the queued broker delivery
//! loop feeding the pipeline until cancelled.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use lib_twins::connections::memory_service;
use lib_twins::{Attribute, Definition, Message, Twin, TwinsConfig};
use serde_json::json;
use tokio_util::sync::CancellationToken;

const TOKEN: &str = "ingest-token";
const CHANNEL: &str = "plant";

fn definition(subtopics: &[&str]) -> Definition {
    Definition::new(
        subtopics
            .iter()
            .map(|s| Attribute {
                name: s.to_string(),
                channel: CHANNEL.to_string(),
                subtopic: s.to_string(),
                persist_state: true,
            })
            .collect(),
    )
}

fn pack(name: &str, n: usize) -> Vec<u8> {
    let recs: Vec<_> = (0..n).map(|i| json!({"n": name, "v": i as f64})).collect();
    serde_json::to_vec(&recs).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ingestion_keeps_ids_gap_free() {
    let tokens = HashMap::from([(TOKEN.to_string(), "ops@example.com".to_string())]);
    let (svc, _) = memory_service(tokens, &TwinsConfig::default());
    let svc = Arc::new(svc);
    let twin = svc
        .add_twin(TOKEN, Twin::default(), definition(&["pressure", "flow", "level"]))
        .await
        .unwrap();

    let publishers = ["pressure", "flow", "level"].into_iter().flat_map(|subtopic| {
        let svc = Arc::clone(&svc);
        (0..10).map(move |_| {
            let svc = Arc::clone(&svc);
            async move { svc.save_states(&Message::new(CHANNEL, subtopic, pack(subtopic, 5))).await }
        })
    });
    let results = join_all(publishers).await;
    assert!(results.iter().all(|r| r == &Ok(5)));

    let page = svc.list_states(TOKEN, 0, 1000, &twin.id).await.unwrap();
    assert_eq!(page.page.total, 150);
    let ids: Vec<u64> = page.states.iter().map(|s| s.id).collect();
    assert_eq!(ids, (0..150).collect::<Vec<u64>>());

    // The last snapshot carries a value for every attribute.
    let last = page.states.last().unwrap();
    for name in ["pressure", "flow", "level"] {
        assert!(last.payload.contains_key(name), "missing {}", name);
    }
}

#[tokio::test]
async fn test_broker_loop_delivers_until_cancelled() {
    let tokens = HashMap::from([(TOKEN.to_string(), "ops@example.com".to_string())]);
    let (svc, backend) = memory_service(tokens, &TwinsConfig::default());
    let twin = svc
        .add_twin(TOKEN, Twin::default(), definition(&["pressure"]))
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let broker = Arc::clone(&backend.broker);
    let loop_handle = tokio::spawn({
        let cancel = cancel.clone();
        async move { broker.run(cancel).await }
    });

    let sender = backend.broker.sender();
    // Unrouted and malformed messages are consumed without stopping the loop.
    sender.send(Message::new(CHANNEL, "unknown", pack("x", 1))).unwrap();
    sender.send(Message::new(CHANNEL, "pressure", b"{".to_vec())).unwrap();
    for _ in 0..3 {
        sender.send(Message::new(CHANNEL, "pressure", pack("pressure", 2))).unwrap();
    }

    let mut saved = 0;
    for _ in 0..50 {
        saved = backend.states.count().await;
        if saved == 6 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(saved, 6);

    cancel.cancel();
    let delivered = loop_handle.await.unwrap();
    assert_eq!(delivered, 4);

    let page = svc.list_states(TOKEN, 0, 10, &twin.id).await.unwrap();
    assert_eq!(page.states.len(), 6);
}
