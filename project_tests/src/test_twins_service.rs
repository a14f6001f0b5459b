//! # Twins Service Scenarios
//!
//! Drives the full service over the in-memory collaborators: twin lifecycle,
//! listing windows, state ingestion totals and state queries.

use std::collections::HashMap;

use lib_twins::connections::{memory_service, MemoryBackend};
use lib_twins::{Attribute, Definition, Message, Metadata, Twin, TwinsConfig, TwinsError, TwinsService};
use serde_json::json;

const TOKEN: &str = "admin-token";
const EMAIL: &str = "admin@example.com";
const WRONG_TOKEN: &str = "wrong-token";
const OTHER_TOKEN: &str = "other-token";
const OTHER_EMAIL: &str = "other@example.com";
const CHANNEL: &str = "b4f6a8e0-telemetry";
const NUM_RECS: usize = 100;

fn service() -> (TwinsService, MemoryBackend) {
    let tokens = HashMap::from([
        (TOKEN.to_string(), EMAIL.to_string()),
        (OTHER_TOKEN.to_string(), OTHER_EMAIL.to_string()),
    ]);
    memory_service(tokens, &TwinsConfig::default())
}

fn definition(names: &[&str], subtopics: &[&str]) -> Definition {
    let attributes = names
        .iter()
        .zip(subtopics)
        .map(|(name, subtopic)| Attribute {
            name: name.to_string(),
            channel: CHANNEL.to_string(),
            subtopic: subtopic.to_string(),
            persist_state: true,
        })
        .collect();
    Definition::new(attributes)
}

fn senml(n: usize, name: &str) -> Vec<serde_json::Value> {
    (0..n)
        .map(|i| json!({"bn": "engine:", "n": name, "u": "Cel", "v": 20.0 + i as f64, "t": 1_600_000_000 + i}))
        .collect()
}

fn message(subtopic: &str, recs: &[serde_json::Value]) -> Message {
    Message::new(CHANNEL, subtopic, serde_json::to_vec(recs).unwrap())
}

#[tokio::test]
async fn test_add_twin() {
    let (svc, _) = service();
    let def = definition(&["temperature"], &["engine"]);

    let twin = svc.add_twin(TOKEN, Twin::default(), def.clone()).await.unwrap();
    assert!(!twin.id.is_empty());
    assert_eq!(twin.owner, EMAIL);
    assert_eq!(twin.revision, 0);
    assert_eq!(twin.definitions.len(), 1);
    assert_eq!(twin.created, twin.updated);

    let res = svc.add_twin(WRONG_TOKEN, Twin::default(), def).await;
    assert_eq!(res, Err(TwinsError::UnauthorizedAccess));

    // The rejected add left nothing behind.
    let page = svc.list_twins(TOKEN, 0, 10, None, None).await.unwrap();
    assert_eq!(page.page.total, 1);
    assert_eq!(svc.resolve(CHANNEL, "engine").await.unwrap().twin_id, twin.id);
}

#[tokio::test]
async fn test_update_twin() {
    let (svc, _) = service();
    let twin = svc
        .add_twin(TOKEN, Twin::default(), definition(&["temperature"], &["engine"]))
        .await
        .unwrap();

    let mut changed = twin.clone();
    changed.name = "engine twin".to_string();
    let def = definition(&["temperature", "humidity"], &["engine", "chassis"]);
    assert_eq!(svc.update_twin(TOKEN, changed.clone(), def.clone()).await, Ok(()));

    let res = svc.update_twin(WRONG_TOKEN, changed.clone(), def.clone()).await;
    assert_eq!(res, Err(TwinsError::UnauthorizedAccess));

    let mut missing = changed;
    missing.id = "non-existing".to_string();
    assert_eq!(svc.update_twin(TOKEN, missing, def).await, Err(TwinsError::NotFound));

    let stored = svc.view_twin(TOKEN, &twin.id).await.unwrap();
    assert_eq!(stored.name, "engine twin");
    assert_eq!(stored.revision, 1);
    assert!(stored.updated >= stored.created);
    assert!(svc.resolve(CHANNEL, "chassis").await.is_some());
}

#[tokio::test]
async fn test_view_twin() {
    let (svc, _) = service();
    let twin = svc.add_twin(TOKEN, Twin::default(), Definition::default()).await.unwrap();

    assert_eq!(svc.view_twin(TOKEN, &twin.id).await.unwrap().id, twin.id);
    assert_eq!(svc.view_twin(WRONG_TOKEN, &twin.id).await, Err(TwinsError::UnauthorizedAccess));
    assert_eq!(svc.view_twin(TOKEN, "non-existing").await, Err(TwinsError::NotFound));
}

#[tokio::test]
async fn test_list_twins() {
    let (svc, _) = service();
    let n = 10;
    for i in 0..n {
        let twin = Twin {
            name: format!("name-{}", i),
            ..Default::default()
        };
        svc.add_twin(TOKEN, twin, Definition::default()).await.unwrap();
    }

    let all = svc.list_twins(TOKEN, 0, n, Some("name"), None).await.unwrap();
    assert_eq!(all.twins.len(), 10);
    assert_eq!(all.page.total, 10);

    let zero = svc.list_twins(TOKEN, 0, 0, Some("name"), None).await.unwrap();
    assert!(zero.twins.is_empty());
    assert_eq!(zero.page.total, 10);

    let window = svc.list_twins(TOKEN, 8, 5, Some("name"), None).await.unwrap();
    assert_eq!(window.twins.len(), 2);
    assert_eq!(window.twins[0].name, "name-8");

    let res = svc.list_twins(WRONG_TOKEN, n, 0, None, None).await;
    assert_eq!(res, Err(TwinsError::UnauthorizedAccess));
}

#[tokio::test]
async fn test_list_twins_by_metadata() {
    let (svc, _) = service();
    for (i, site) in ["north", "south", "north"].iter().enumerate() {
        let mut metadata = Metadata::new();
        metadata.insert("site".to_string(), json!(site));
        metadata.insert("rack".to_string(), json!(i));
        let twin = Twin {
            name: format!("pump-{}", i),
            metadata,
            ..Default::default()
        };
        svc.add_twin(TOKEN, twin, Definition::default()).await.unwrap();
    }

    let mut filter = Metadata::new();
    filter.insert("site".to_string(), json!("north"));
    let page = svc.list_twins(TOKEN, 0, 10, None, Some(&filter)).await.unwrap();
    let names: Vec<&str> = page.twins.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["pump-0", "pump-2"]);
}

#[tokio::test]
async fn test_remove_twin() {
    let (svc, _) = service();
    let twin = svc.add_twin(TOKEN, Twin::default(), Definition::default()).await.unwrap();

    assert_eq!(svc.remove_twin(WRONG_TOKEN, &twin.id).await, Err(TwinsError::UnauthorizedAccess));
    assert_eq!(svc.remove_twin(TOKEN, &twin.id).await, Ok(()));
    assert_eq!(svc.remove_twin(TOKEN, &twin.id).await, Ok(()));
    assert_eq!(svc.remove_twin(TOKEN, "non-existing").await, Ok(()));
    assert_eq!(svc.view_twin(TOKEN, &twin.id).await, Err(TwinsError::NotFound));
}

#[tokio::test]
async fn test_save_states() {
    let (svc, _) = service();
    let twin = svc
        .add_twin(TOKEN, Twin::default(), definition(&["temperature", "humidity"], &["engine", "chassis"]))
        .await
        .unwrap();
    let recs = senml(NUM_RECS, "temperature");

    let cases: Vec<(&str, Message, Result<usize, TwinsError>)> = vec![
        ("add 100 states", message("engine", &recs), Ok(NUM_RECS)),
        ("add 20 states", message("engine", &recs[10..30]), Ok(20)),
        ("add states for attribute without twin", message("wheel", &recs[30..50]), Err(TwinsError::NotFound)),
        ("use empty senml pack", message("engine", &[]), Ok(0)),
    ];

    let mut total = 0;
    for (desc, msg, expected) in cases {
        let res = svc.save_states(&msg).await;
        assert_eq!(res, expected, "{}", desc);
        total += res.unwrap_or(0);

        let page = svc.list_states(TOKEN, 0, 10, &twin.id).await.unwrap();
        assert_eq!(page.page.total, total as u64, "{}", desc);
    }
}

#[tokio::test]
async fn test_list_states() {
    let (svc, _) = service();
    let twin = svc
        .add_twin(TOKEN, Twin::default(), definition(&["temperature", "humidity"], &["engine", "chassis"]))
        .await
        .unwrap();
    let idle = svc
        .add_twin(TOKEN, Twin::default(), definition(&["speed"], &["wheel"]))
        .await
        .unwrap();
    svc.save_states(&message("engine", &senml(NUM_RECS, "temperature")))
        .await
        .unwrap();

    let n = NUM_RECS as u64;
    let cases = [
        ("first 10 states", TOKEN, twin.id.as_str(), 0, 10, Ok(10)),
        ("last 10 states", TOKEN, twin.id.as_str(), n - 10, n, Ok(10)),
        ("last 10 states with limit past the end", TOKEN, twin.id.as_str(), n - 10, n + 10, Ok(10)),
        ("offset at the end", TOKEN, twin.id.as_str(), n, n + 10, Ok(0)),
        ("wrong token", WRONG_TOKEN, twin.id.as_str(), 0, 10, Err(TwinsError::UnauthorizedAccess)),
        ("twin owned by someone else", OTHER_TOKEN, twin.id.as_str(), 0, 10, Ok(0)),
        ("non-existing twin", TOKEN, "non-existing", 0, 10, Ok(0)),
        ("twin without states", TOKEN, idle.id.as_str(), 0, 10, Ok(0)),
    ];

    for (desc, token, id, offset, limit, expected) in cases {
        let res = svc.list_states(token, offset, limit, id).await.map(|p| p.states.len());
        assert_eq!(res, expected, "{}", desc);
    }

    let foreign = svc.list_states(OTHER_TOKEN, 0, 10, &twin.id).await.unwrap();
    assert_eq!(foreign.page.total, 0);
    assert!(foreign.states.is_empty());

    let last = svc.list_states(TOKEN, n - 1, 1, &twin.id).await.unwrap();
    assert_eq!(last.states[0].id, n - 1);
}

#[tokio::test]
async fn test_engine_scenario() {
    let (svc, backend) = service();
    let twin = svc
        .add_twin(TOKEN, Twin::default(), definition(&["temperature"], &["engine"]))
        .await
        .unwrap();

    // Measurements carry the SenML record time.
    let recs = vec![
        json!({"bn": "pump:", "bt": 1_700_000_000, "n": "temperature", "v": 71.5}),
        json!({"n": "temperature", "t": 10, "v": 72.0}),
    ];
    assert_eq!(svc.save_states(&message("engine", &recs)).await, Ok(2));

    let page = svc.list_states(TOKEN, 0, 10, &twin.id).await.unwrap();
    assert_eq!(page.states.len(), 2);
    assert_eq!(page.states[0].created.timestamp(), 1_700_000_000);
    assert_eq!(page.states[1].created.timestamp(), 1_700_000_010);
    assert_eq!(page.states[1].payload.get("temperature"), Some(&json!(72.0)));

    svc.remove_twin(TOKEN, &twin.id).await.unwrap();
    assert!(backend.broker.subscriptions().await.is_empty());
    assert_eq!(svc.save_states(&message("engine", &recs)).await, Err(TwinsError::NotFound));
    assert_eq!(backend.states.count().await, 2);
}
