//! # In-Memory Repositories
//!
//! Reference implementations of the twin and state storage contracts. Twins
//! are listed in insertion order; states are kept per twin in append order.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::core::contracts::{StateRepository, TwinRepository};
use crate::core::errors::{Result, TwinsError};
use crate::core::model::{Metadata, PageMetadata, State, StatesPage, Twin, TwinsPage};

#[derive(Default)]
struct TwinTable {
    next_seq: u64,
    seq_by_id: HashMap<String, u64>,
    twins: BTreeMap<u64, Twin>,
}

/// Twin storage backed by a map, ordered by insertion.
#[derive(Default)]
pub struct MemoryTwinRepository {
    table: RwLock<TwinTable>,
}

impl MemoryTwinRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TwinRepository for MemoryTwinRepository {
    async fn save(&self, twin: &Twin) -> Result<String> {
        let mut table = self.table.write().await;
        if table.seq_by_id.contains_key(&twin.id) {
            return Err(TwinsError::Conflict);
        }
        let seq = table.next_seq;
        table.next_seq += 1;
        table.seq_by_id.insert(twin.id.clone(), seq);
        table.twins.insert(seq, twin.clone());
        Ok(twin.id.clone())
    }

    async fn update(&self, twin: &Twin) -> Result<()> {
        let mut table = self.table.write().await;
        let seq = *table.seq_by_id.get(&twin.id).ok_or(TwinsError::NotFound)?;
        table.twins.insert(seq, twin.clone());
        Ok(())
    }

    async fn retrieve_by_id(&self, id: &str) -> Result<Twin> {
        let table = self.table.read().await;
        table
            .seq_by_id
            .get(id)
            .and_then(|seq| table.twins.get(seq))
            .cloned()
            .ok_or(TwinsError::NotFound)
    }

    async fn retrieve_all(
        &self,
        owner: &str,
        offset: u64,
        limit: u64,
        name: Option<&str>,
        metadata: Option<&Metadata>,
    ) -> Result<TwinsPage> {
        let table = self.table.read().await;
        let matched: Vec<&Twin> = table
            .twins
            .values()
            .filter(|t| t.owner == owner)
            .filter(|t| name.map_or(true, |n| t.name.contains(n)))
            .filter(|t| metadata.map_or(true, |m| t.matches_metadata(m)))
            .collect();

        let page = PageMetadata {
            total: matched.len() as u64,
            offset,
            limit,
        };
        let twins = matched[page.window(matched.len())]
            .iter()
            .map(|t| (*t).clone())
            .collect();

        Ok(TwinsPage { page, twins })
    }

    async fn retrieve_every(&self) -> Result<Vec<Twin>> {
        Ok(self.table.read().await.twins.values().cloned().collect())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let mut table = self.table.write().await;
        if let Some(seq) = table.seq_by_id.remove(id) {
            table.twins.remove(&seq);
        }
        Ok(())
    }
}

/// Append-only state storage.
#[derive(Default)]
pub struct MemoryStateRepository {
    states: RwLock<HashMap<String, Vec<State>>>,
}

impl MemoryStateRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored states across all twins.
    pub async fn count(&self) -> usize {
        self.states.read().await.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl StateRepository for MemoryStateRepository {
    async fn save(&self, state: &State) -> Result<()> {
        self.states
            .write()
            .await
            .entry(state.twin_id.clone())
            .or_default()
            .push(state.clone());
        Ok(())
    }

    async fn retrieve_last(&self, twin_id: &str) -> Result<Option<State>> {
        Ok(self
            .states
            .read()
            .await
            .get(twin_id)
            .and_then(|states| states.last())
            .cloned())
    }

    async fn retrieve_all(&self, offset: u64, limit: u64, twin_id: &str) -> Result<StatesPage> {
        let states = self.states.read().await;
        let all = states.get(twin_id).map(Vec::as_slice).unwrap_or_default();

        let page = PageMetadata {
            total: all.len() as u64,
            offset,
            limit,
        };
        Ok(StatesPage {
            page,
            states: all[page.window(all.len())].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::{json, Map};

    fn twin(id: &str, owner: &str, name: &str) -> Twin {
        Twin {
            id: id.to_string(),
            owner: owner.to_string(),
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn state(twin_id: &str, id: u64) -> State {
        State {
            twin_id: twin_id.to_string(),
            id,
            definition: 0,
            created: Utc::now(),
            payload: Map::new(),
        }
    }

    #[tokio::test]
    async fn test_save_rejects_duplicate_id() {
        let repo = MemoryTwinRepository::new();
        repo.save(&twin("a", "o", "n")).await.unwrap();
        assert_eq!(repo.save(&twin("a", "o", "n")).await, Err(TwinsError::Conflict));
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let repo = MemoryTwinRepository::new();
        assert_eq!(repo.update(&twin("a", "o", "n")).await, Err(TwinsError::NotFound));
    }

    #[tokio::test]
    async fn test_retrieve_all_filters_and_pages() {
        let repo = MemoryTwinRepository::new();
        for i in 0..6 {
            let mut t = twin(&format!("t{}", i), "alice", &format!("pump-{}", i));
            if i % 2 == 0 {
                t.metadata.insert("serial".into(), json!("123"));
            }
            repo.save(&t).await.unwrap();
        }
        repo.save(&twin("x", "bob", "pump-x")).await.unwrap();

        let page = repo.retrieve_all("alice", 1, 2, Some("pump"), None).await.unwrap();
        assert_eq!(page.page.total, 6);
        let ids: Vec<&str> = page.twins.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2"]);

        let mut filter = Metadata::new();
        filter.insert("serial".into(), json!("123"));
        let page = repo.retrieve_all("alice", 0, 10, None, Some(&filter)).await.unwrap();
        assert_eq!(page.page.total, 3);

        let page = repo.retrieve_all("alice", 0, 10, Some("pump-4"), None).await.unwrap();
        assert_eq!(page.twins.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let repo = MemoryTwinRepository::new();
        repo.save(&twin("a", "o", "n")).await.unwrap();
        assert!(repo.remove("a").await.is_ok());
        assert!(repo.remove("a").await.is_ok());
        assert_eq!(repo.retrieve_by_id("a").await, Err(TwinsError::NotFound));
    }

    #[tokio::test]
    async fn test_states_keep_insertion_order() {
        let repo = MemoryStateRepository::new();
        for i in 0..5 {
            repo.save(&state("t", i)).await.unwrap();
        }
        repo.save(&state("other", 0)).await.unwrap();

        let page = repo.retrieve_all(3, 10, "t").await.unwrap();
        assert_eq!(page.page.total, 5);
        assert_eq!(page.states.iter().map(|s| s.id).collect::<Vec<_>>(), vec![3, 4]);
        assert_eq!(repo.retrieve_last("t").await.unwrap().map(|s| s.id), Some(4));
        assert!(repo.retrieve_last("none").await.unwrap().is_none());
        assert_eq!(repo.count().await, 6);
    }
}
