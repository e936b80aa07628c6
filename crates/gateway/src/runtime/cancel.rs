//! Per-run cancellation tokens.
//!
//! Each worker registers a token for the run it is driving. `tasks/cancel`
//! signals the token; the execution loop checks it cooperatively at the top
//! of each iteration and before each tool dispatch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

/// A cancellation token checked by the execution loop.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Active cancellation tokens keyed by run id.
#[derive(Default)]
pub struct CancelMap {
    tokens: Mutex<HashMap<Uuid, CancelToken>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for a run, created on first use so a cancel arriving before
    /// the worker picks the step up is not lost.
    pub fn token_for(&self, run_id: Uuid) -> CancelToken {
        self.tokens
            .lock()
            .entry(run_id)
            .or_default()
            .clone()
    }

    /// Cancel a run's token. Returns true if one was registered.
    pub fn cancel(&self, run_id: Uuid) -> bool {
        match self.tokens.lock().get(&run_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_cancelled(&self, run_id: Uuid) -> bool {
        self.tokens
            .lock()
            .get(&run_id)
            .map(|t| t.is_cancelled())
            .unwrap_or(false)
    }

    /// Drop the token once the run reaches a terminal state.
    pub fn remove(&self, run_id: Uuid) {
        self.tokens.lock().remove(&run_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_lifecycle() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn clones_share_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn cancel_before_registration_sticks() {
        let map = CancelMap::new();
        let run_id = Uuid::new_v4();
        // A cancel arriving before the worker starts creates the token…
        let early = map.token_for(run_id);
        early.cancel();
        // …and the worker later observes it.
        assert!(map.token_for(run_id).is_cancelled());
        assert!(map.is_cancelled(run_id));
    }

    #[test]
    fn cancel_unknown_run_returns_false() {
        let map = CancelMap::new();
        assert!(!map.cancel(Uuid::new_v4()));
    }

    #[test]
    fn remove_clears_token() {
        let map = CancelMap::new();
        let run_id = Uuid::new_v4();
        map.token_for(run_id);
        map.cancel(run_id);
        map.remove(run_id);
        assert!(!map.is_cancelled(run_id));
    }
}
