//! Run-scoped key/value records.
//!
//! Writes are append-only and conflict-free; `(run_id, key)` is not unique
//! and latest-wins is a read-time choice. Deletion is a hard delete by key
//! (documented decision) returning the removed count.

use std::collections::HashMap;

use parking_lot::RwLock;
use uuid::Uuid;

use shaman_domain::rundata::{Pagination, RunDataEntry, RunDataFilter, SortOrder};
use shaman_domain::{Error, Result};

/// A page of entries plus its pagination echo.
#[derive(Debug, Clone)]
pub struct RunDataPage {
    pub data: Vec<RunDataEntry>,
    pub pagination: Pagination,
}

pub struct RunDataStore {
    /// run_id → entries in write order.
    entries: RwLock<HashMap<Uuid, Vec<RunDataEntry>>>,
}

impl RunDataStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Append an entry. Never updates in place.
    pub fn write(&self, org_id: Uuid, entry: RunDataEntry) -> Result<RunDataEntry> {
        if entry.org_id != org_id {
            return Err(Error::TenantMismatch(format!(
                "run-data for run {} belongs to another organization",
                entry.run_id
            )));
        }
        self.entries
            .write()
            .entry(entry.run_id)
            .or_default()
            .push(entry.clone());
        Ok(entry)
    }

    /// Latest entry for an exact key, if any.
    pub fn read_latest(&self, org_id: Uuid, run_id: Uuid, key: &str) -> Option<RunDataEntry> {
        let entries = self.entries.read();
        entries.get(&run_id).and_then(|list| {
            list.iter()
                .rev()
                .find(|e| e.org_id == org_id && e.key == key)
                .cloned()
        })
    }

    /// Filtered, paginated query. Results are ordered by `created_at`
    /// (ties by `id`), ascending unless the filter says otherwise.
    pub fn query(&self, org_id: Uuid, run_id: Uuid, filter: &RunDataFilter) -> RunDataPage {
        let entries = self.entries.read();
        let mut matching: Vec<RunDataEntry> = entries
            .get(&run_id)
            .map(|list| {
                list.iter()
                    .filter(|e| e.org_id == org_id && filter.matches(e))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        if filter.sort_order == Some(SortOrder::Desc) {
            matching.reverse();
        }

        let total = matching.len();
        let offset = filter.offset.unwrap_or(0);
        let limit = filter.limit.unwrap_or(100);
        let data: Vec<RunDataEntry> =
            matching.into_iter().skip(offset).take(limit).collect();

        RunDataPage {
            data,
            pagination: Pagination {
                total,
                limit,
                offset,
            },
        }
    }

    /// All entries of a run, newest first.
    pub fn list(&self, org_id: Uuid, run_id: Uuid, limit: usize, offset: usize) -> RunDataPage {
        self.query(
            org_id,
            run_id,
            &RunDataFilter {
                limit: Some(limit),
                offset: Some(offset),
                sort_order: Some(SortOrder::Desc),
                ..Default::default()
            },
        )
    }

    /// Snapshot of every entry in write order, for memory assembly.
    pub fn snapshot(&self, org_id: Uuid, run_id: Uuid) -> Vec<RunDataEntry> {
        self.entries
            .read()
            .get(&run_id)
            .map(|list| {
                list.iter()
                    .filter(|e| e.org_id == org_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Hard-delete every entry under `key`. Returns the removed count.
    pub fn delete(&self, org_id: Uuid, run_id: Uuid, key: &str) -> usize {
        let mut entries = self.entries.write();
        let Some(list) = entries.get_mut(&run_id) else {
            return 0;
        };
        let before = list.len();
        list.retain(|e| !(e.org_id == org_id && e.key == key));
        before - list.len()
    }

    /// Drop every entry of a run (run deletion cascade).
    pub fn delete_for_run(&self, org_id: Uuid, run_id: Uuid) -> usize {
        let mut entries = self.entries.write();
        match entries.get(&run_id) {
            Some(list) if list.iter().all(|e| e.org_id == org_id) => entries
                .remove(&run_id)
                .map(|list| list.len())
                .unwrap_or(0),
            _ => 0,
        }
    }
}

impl Default for RunDataStore {
    fn default() -> Self {
        Self::new()
    }
}
