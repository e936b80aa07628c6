//! RunData — append-only key/value records scoped to a run.
//!
//! Agents use these records to share state across steps. Writes never update
//! in place; multiple entries may share a key and latest-wins is a read-time
//! choice. Entries are totally ordered by `created_at`, ties broken by `id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDataEntry {
    pub id: Uuid,
    pub run_id: Uuid,
    pub org_id: Uuid,
    pub key: String,
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by_step_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by_agent_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Filter applied by `run_data_query`. All present clauses AND together.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunDataFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(rename = "keyStartsWith", skip_serializing_if = "Option::is_none")]
    pub key_starts_with: Option<String>,
    /// Entry must carry every listed tag.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    #[serde(rename = "sortOrder", skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<SortOrder>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl RunDataFilter {
    pub fn matches(&self, entry: &RunDataEntry) -> bool {
        if let Some(key) = &self.key {
            if &entry.key != key {
                return false;
            }
        }
        if let Some(prefix) = &self.key_starts_with {
            if !entry.key.starts_with(prefix.as_str()) {
                return false;
            }
        }
        self.tags.iter().all(|t| entry.tags.contains(t))
    }
}

/// Pagination echo returned alongside a page of entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}
