//! Step records and DAG queries.

use std::collections::HashMap;

use parking_lot::RwLock;
use uuid::Uuid;

use shaman_domain::step::{Step, StepStatus};
use shaman_domain::{Error, Result};

pub struct StepStore {
    steps: RwLock<HashMap<Uuid, Step>>,
}

impl StepStore {
    pub fn new() -> Self {
        Self {
            steps: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert(&self, org_id: Uuid, step: Step) -> Result<()> {
        if step.org_id != org_id {
            return Err(Error::TenantMismatch(format!(
                "step {} belongs to another organization",
                step.id
            )));
        }
        let mut steps = self.steps.write();
        if steps.contains_key(&step.id) {
            return Err(Error::Conflict(format!("step {} already exists", step.id)));
        }
        steps.insert(step.id, step);
        Ok(())
    }

    pub fn get(&self, org_id: Uuid, step_id: Uuid) -> Result<Step> {
        self.steps
            .read()
            .get(&step_id)
            .filter(|s| s.org_id == org_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("step {step_id}")))
    }

    pub fn update<F>(&self, org_id: Uuid, step_id: Uuid, f: F) -> Result<Step>
    where
        F: FnOnce(&mut Step),
    {
        let mut steps = self.steps.write();
        let step = steps
            .get_mut(&step_id)
            .ok_or_else(|| Error::NotFound(format!("step {step_id}")))?;
        if step.org_id != org_id {
            return Err(Error::TenantMismatch(format!(
                "step {step_id} belongs to another organization"
            )));
        }
        f(step);
        Ok(step.clone())
    }

    /// All steps of a run, ordered by depth then creation.
    pub fn for_run(&self, org_id: Uuid, run_id: Uuid) -> Vec<Step> {
        let mut steps: Vec<Step> = self
            .steps
            .read()
            .values()
            .filter(|s| s.org_id == org_id && s.run_id == run_id)
            .cloned()
            .collect();
        steps.sort_by(|a, b| a.depth.cmp(&b.depth).then(a.start_time.cmp(&b.start_time)));
        steps
    }

    /// Steps of a run still counting against the completion rule.
    pub fn active_for_run(&self, org_id: Uuid, run_id: Uuid) -> Vec<Step> {
        self.steps
            .read()
            .values()
            .filter(|s| s.org_id == org_id && s.run_id == run_id && s.status.is_active())
            .cloned()
            .collect()
    }

    /// Whether every step of the run reached a status in `allowed`.
    pub fn all_steps_in(&self, org_id: Uuid, run_id: Uuid, allowed: &[StepStatus]) -> bool {
        self.steps
            .read()
            .values()
            .filter(|s| s.org_id == org_id && s.run_id == run_id)
            .all(|s| allowed.contains(&s.status))
    }

    pub fn delete_for_run(&self, org_id: Uuid, run_id: Uuid) -> usize {
        let mut steps = self.steps.write();
        let before = steps.len();
        steps.retain(|_, s| !(s.org_id == org_id && s.run_id == run_id));
        before - steps.len()
    }
}

impl Default for StepStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shaman_domain::step::StepType;

    fn seeded() -> (StepStore, Uuid, Uuid, Step) {
        let store = StepStore::new();
        let org = Uuid::new_v4();
        let run_id = Uuid::new_v4();
        let root = Step::root(run_id, org, "A", json!("in"));
        store.insert(org, root.clone()).unwrap();
        (store, org, run_id, root)
    }

    #[test]
    fn for_run_is_tenant_scoped() {
        let (store, org, run_id, _) = seeded();
        assert_eq!(store.for_run(org, run_id).len(), 1);
        assert!(store.for_run(Uuid::new_v4(), run_id).is_empty());
    }

    #[test]
    fn active_excludes_terminal_steps() {
        let (store, org, run_id, root) = seeded();
        let mut child = Step::child(&root, StepType::AgentCall, json!("x"));
        child.finish(StepStatus::Completed);
        store.insert(org, child).unwrap();

        let active = store.active_for_run(org, run_id);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, root.id);
    }

    #[test]
    fn all_steps_in_checks_every_row() {
        let (store, org, run_id, root) = seeded();
        store
            .update(org, root.id, |s| s.finish(StepStatus::Completed))
            .unwrap();
        assert!(store.all_steps_in(org, run_id, &[StepStatus::Completed]));
        assert!(!store.all_steps_in(org, run_id, &[StepStatus::Failed]));
    }

    #[test]
    fn cross_tenant_get_is_not_found() {
        let (store, _org, _run, root) = seeded();
        assert!(matches!(
            store.get(Uuid::new_v4(), root.id),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn delete_for_run_removes_only_that_run() {
        let (store, org, run_id, _) = seeded();
        let other_run = Step::root(Uuid::new_v4(), org, "B", json!(null));
        let other_id = other_run.id;
        store.insert(org, other_run).unwrap();

        assert_eq!(store.delete_for_run(org, run_id), 1);
        assert!(store.get(org, other_id).is_ok());
    }
}
