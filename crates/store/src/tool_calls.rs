//! Tool-call records issued by the LLM per step.

use std::collections::HashMap;

use parking_lot::RwLock;
use uuid::Uuid;

use shaman_domain::message::ToolCallRecord;
use shaman_domain::{Error, Result};

pub struct ToolCallStore {
    /// step_id → records in issue order.
    calls: RwLock<HashMap<Uuid, Vec<ToolCallRecord>>>,
}

impl ToolCallStore {
    pub fn new() -> Self {
        Self {
            calls: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert(&self, org_id: Uuid, record: ToolCallRecord) -> Result<()> {
        if record.org_id != org_id {
            return Err(Error::TenantMismatch(format!(
                "tool call {} belongs to another organization",
                record.id
            )));
        }
        let mut calls = self.calls.write();
        let entries = calls.entry(record.step_id).or_default();
        if entries.iter().any(|r| r.id == record.id) {
            return Err(Error::Conflict(format!(
                "tool call {} already recorded",
                record.id
            )));
        }
        entries.push(record);
        Ok(())
    }

    pub fn for_step(&self, org_id: Uuid, step_id: Uuid) -> Vec<ToolCallRecord> {
        self.calls
            .read()
            .get(&step_id)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.org_id == org_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for ToolCallStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn record(org: Uuid, step: Uuid, id: &str) -> ToolCallRecord {
        ToolCallRecord {
            id: id.into(),
            step_id: step,
            org_id: org,
            tool_name: "run_data_write".into(),
            input: json!({ "key": "x" }),
            is_platform_tool: true,
            is_agent_call: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn insert_and_list_in_order() {
        let store = ToolCallStore::new();
        let org = Uuid::new_v4();
        let step = Uuid::new_v4();
        store.insert(org, record(org, step, "c1")).unwrap();
        store.insert(org, record(org, step, "c2")).unwrap();
        let records = store.for_step(org, step);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "c1");
    }

    #[test]
    fn duplicate_id_conflicts() {
        let store = ToolCallStore::new();
        let org = Uuid::new_v4();
        let step = Uuid::new_v4();
        store.insert(org, record(org, step, "c1")).unwrap();
        assert!(matches!(
            store.insert(org, record(org, step, "c1")),
            Err(Error::Conflict(_))
        ));
    }

    #[test]
    fn cross_tenant_list_is_empty() {
        let store = ToolCallStore::new();
        let org = Uuid::new_v4();
        let step = Uuid::new_v4();
        store.insert(org, record(org, step, "c1")).unwrap();
        assert!(store.for_step(Uuid::new_v4(), step).is_empty());
    }
}
