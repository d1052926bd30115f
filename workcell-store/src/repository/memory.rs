//! In-memory job repository

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use workcell_core::domain::JobRecord;

use super::JobStore;
use crate::db::validate_table_name;
use crate::error::{Result, StoreError};

/// Job store kept in process memory
///
/// Follows the same ordering rules as the SQL store: ids are assigned from a
/// counter on insert and `get_next` returns the smallest id. The connection
/// flag can be flipped to exercise the disconnected paths.
pub struct InMemoryJobStore {
    state: Mutex<MemoryState>,
}

struct MemoryState {
    tables: HashMap<String, BTreeMap<u64, JobRecord>>,
    next_id: u64,
    connected: bool,
}

impl InMemoryJobStore {
    /// Creates an empty, connected store
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                tables: HashMap::new(),
                next_id: 1,
                connected: true,
            }),
        }
    }

    /// Simulates the server going away or coming back
    pub fn set_connected(&self, connected: bool) {
        self.lock().connected = connected;
    }

    /// Snapshot of a table in id order
    pub fn records(&self, table: &str) -> Vec<JobRecord> {
        self.lock()
            .tables
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn connected_state(&self, table: &str) -> Result<MutexGuard<'_, MemoryState>> {
        validate_table_name(table)?;
        let state = self.lock();
        if !state.connected {
            return Err(StoreError::Disconnected);
        }
        Ok(state)
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn connect(&self) -> Result<()> {
        self.set_connected(true);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    async fn get_next(&self, table: &str) -> Result<Option<JobRecord>> {
        let state = self.connected_state(table)?;
        Ok(state
            .tables
            .get(table)
            .and_then(|rows| rows.values().next().cloned()))
    }

    async fn insert(&self, table: &str, record: &JobRecord) -> Result<JobRecord> {
        let mut state = self.connected_state(table)?;
        let id = state.next_id;
        state.next_id += 1;

        let stored = JobRecord {
            id: id.to_string(),
            ..record.clone()
        };
        state
            .tables
            .entry(table.to_string())
            .or_default()
            .insert(id, stored.clone());

        Ok(stored)
    }

    async fn update(&self, table: &str, record: &JobRecord) -> Result<bool> {
        let id = parse_id(&record.id)?;
        let mut state = self.connected_state(table)?;

        match state.tables.get_mut(table).and_then(|rows| rows.get_mut(&id)) {
            Some(row) => {
                row.remaining = record.remaining;
                row.in_production = record.in_production;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, table: &str, id: &str) -> Result<bool> {
        let id = parse_id(id)?;
        let mut state = self.connected_state(table)?;

        Ok(state
            .tables
            .get_mut(table)
            .and_then(|rows| rows.remove(&id))
            .is_some())
    }

    async fn close(&self) {
        self.set_connected(false);
    }
}

fn parse_id(id: &str) -> Result<u64> {
    id.parse::<u64>()
        .map_err(|_| StoreError::InvalidId(id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_next_returns_smallest_id() {
        let store = InMemoryJobStore::new();
        let first = store.insert("sc2", &JobRecord::new("BELL", "A", 2)).await.unwrap();
        store.insert("sc2", &JobRecord::new("BELL", "B", 1)).await.unwrap();

        let next = store.get_next("sc2").await.unwrap().unwrap();
        assert_eq!(next.id, first.id);
        assert_eq!(next.part_type, "A");
    }

    #[tokio::test]
    async fn test_ids_order_numerically() {
        let store = InMemoryJobStore::new();
        for i in 0..11 {
            store.insert("sc2", &JobRecord::new("BELL", "A", i)).await.unwrap();
        }
        // Remove ids 1..=9 so "10" and "11" remain; string order would pick wrong
        for id in 1..=9 {
            store.delete("sc2", &id.to_string()).await.unwrap();
        }

        let next = store.get_next("sc2").await.unwrap().unwrap();
        assert_eq!(next.id, "10");
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let store = InMemoryJobStore::new();
        let mut record = store.insert("sc2", &JobRecord::new("BELL", "A", 2)).await.unwrap();

        record.remaining = 1;
        record.in_production = true;
        assert!(store.update("sc2", &record).await.unwrap());
        assert_eq!(store.records("sc2")[0].remaining, 1);

        assert!(store.delete("sc2", &record.id).await.unwrap());
        assert!(!store.delete("sc2", &record.id).await.unwrap());
        assert!(store.get_next("sc2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_table_has_no_next() {
        let store = InMemoryJobStore::new();
        assert!(store.get_next("sc2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_disconnected_store_fails_softly() {
        let store = InMemoryJobStore::new();
        store.insert("sc2", &JobRecord::new("BELL", "A", 2)).await.unwrap();
        store.set_connected(false);

        assert!(!store.is_connected());
        assert!(store.get_next("sc2").await.unwrap_err().is_disconnected());

        store.connect().await.unwrap();
        assert!(store.get_next("sc2").await.unwrap().is_some());
    }
}
