//! Run records.

use std::collections::HashMap;

use parking_lot::RwLock;
use uuid::Uuid;

use shaman_domain::run::Run;
use shaman_domain::{Error, Result};

pub struct RunStore {
    runs: RwLock<HashMap<Uuid, Run>>,
}

impl RunStore {
    pub fn new() -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert(&self, org_id: Uuid, run: Run) -> Result<()> {
        if run.org_id != org_id {
            return Err(Error::TenantMismatch(format!(
                "run {} belongs to another organization",
                run.id
            )));
        }
        let mut runs = self.runs.write();
        if runs.contains_key(&run.id) {
            return Err(Error::Conflict(format!("run {} already exists", run.id)));
        }
        runs.insert(run.id, run);
        Ok(())
    }

    pub fn get(&self, org_id: Uuid, run_id: Uuid) -> Result<Run> {
        self.runs
            .read()
            .get(&run_id)
            .filter(|r| r.org_id == org_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("run {run_id}")))
    }

    /// Mutate a run in place under the tenant predicate.
    pub fn update<F>(&self, org_id: Uuid, run_id: Uuid, f: F) -> Result<Run>
    where
        F: FnOnce(&mut Run),
    {
        let mut runs = self.runs.write();
        let run = runs
            .get_mut(&run_id)
            .ok_or_else(|| Error::NotFound(format!("run {run_id}")))?;
        if run.org_id != org_id {
            return Err(Error::TenantMismatch(format!(
                "run {run_id} belongs to another organization"
            )));
        }
        f(run);
        Ok(run.clone())
    }

    /// Delete a run row. The caller owns cascading to steps and run-data.
    pub fn delete(&self, org_id: Uuid, run_id: Uuid) -> Result<()> {
        let mut runs = self.runs.write();
        match runs.get(&run_id) {
            Some(run) if run.org_id == org_id => {
                runs.remove(&run_id);
                Ok(())
            }
            Some(_) => Err(Error::TenantMismatch(format!(
                "run {run_id} belongs to another organization"
            ))),
            None => Err(Error::NotFound(format!("run {run_id}"))),
        }
    }
}

impl Default for RunStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shaman_domain::run::RunStatus;

    #[test]
    fn insert_and_get_scoped_by_org() {
        let store = RunStore::new();
        let org_a = Uuid::new_v4();
        let org_b = Uuid::new_v4();
        let run = Run::new(org_a, "hello");
        let run_id = run.id;
        store.insert(org_a, run).unwrap();

        assert!(store.get(org_a, run_id).is_ok());
        // Cross-tenant read is indistinguishable from absence.
        assert!(matches!(
            store.get(org_b, run_id),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn insert_with_wrong_org_is_tenant_mismatch() {
        let store = RunStore::new();
        let run = Run::new(Uuid::new_v4(), "x");
        let err = store.insert(Uuid::new_v4(), run).unwrap_err();
        assert!(matches!(err, Error::TenantMismatch(_)));
    }

    #[test]
    fn duplicate_insert_conflicts() {
        let store = RunStore::new();
        let org = Uuid::new_v4();
        let run = Run::new(org, "x");
        store.insert(org, run.clone()).unwrap();
        assert!(matches!(
            store.insert(org, run),
            Err(Error::Conflict(_))
        ));
    }

    #[test]
    fn cross_tenant_update_is_tenant_mismatch() {
        let store = RunStore::new();
        let org_a = Uuid::new_v4();
        let run = Run::new(org_a, "x");
        let run_id = run.id;
        store.insert(org_a, run).unwrap();

        let err = store
            .update(Uuid::new_v4(), run_id, |r| r.status = RunStatus::Working)
            .unwrap_err();
        assert!(matches!(err, Error::TenantMismatch(_)));

        // The row is untouched.
        let run = store.get(org_a, run_id).unwrap();
        assert_eq!(run.status, RunStatus::Submitted);
    }

    #[test]
    fn update_returns_new_state() {
        let store = RunStore::new();
        let org = Uuid::new_v4();
        let run = Run::new(org, "x");
        let run_id = run.id;
        store.insert(org, run).unwrap();

        let updated = store
            .update(org, run_id, |r| r.finish(RunStatus::Completed))
            .unwrap();
        assert_eq!(updated.status, RunStatus::Completed);
        assert!(updated.end_time.is_some());
    }
}
