//! Per-run event fan-out for the streaming RPC methods.
//!
//! Workers emit task projections and completion messages here; streaming
//! handlers subscribe and forward until the run terminates. Channels are
//! cleaned up when the run reaches a terminal state so subscribers see the
//! stream end.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use uuid::Uuid;

use shaman_protocol::{A2aMessage, A2aTask};

/// One observable event in a run's lifetime, in run-time order.
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// A task status update (the root task's current projection).
    Task(A2aTask),
    /// A completion message produced by a step.
    Message(A2aMessage),
}

impl RunEvent {
    /// Whether this event closes the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunEvent::Task(task) if task.status.state.is_terminal())
    }
}

pub struct RunEventHub {
    channels: RwLock<HashMap<Uuid, broadcast::Sender<RunEvent>>>,
}

impl RunEventHub {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribe to a run's events, creating the channel if needed.
    pub fn subscribe(&self, run_id: Uuid) -> broadcast::Receiver<RunEvent> {
        let mut channels = self.channels.write();
        channels
            .entry(run_id)
            .or_insert_with(|| broadcast::channel(256).0)
            .subscribe()
    }

    /// Broadcast an event to all subscribers of a run.
    pub fn emit(&self, run_id: Uuid, event: RunEvent) {
        let channels = self.channels.read();
        if let Some(tx) = channels.get(&run_id) {
            let _ = tx.send(event);
        }
    }

    /// Drop the channel after the terminal event so receivers drain and
    /// observe closure.
    pub fn cleanup(&self, run_id: Uuid) {
        self.channels.write().remove(&run_id);
    }
}

impl Default for RunEventHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shaman_protocol::TaskState;

    #[tokio::test]
    async fn emit_reaches_subscriber() {
        let hub = RunEventHub::new();
        let run_id = Uuid::new_v4();
        let mut rx = hub.subscribe(run_id);

        hub.emit(
            run_id,
            RunEvent::Task(A2aTask::new("t", "c", TaskState::Working)),
        );
        let event = rx.recv().await.unwrap();
        assert!(!event.is_terminal());
    }

    #[tokio::test]
    async fn terminal_task_event_is_terminal() {
        let event = RunEvent::Task(A2aTask::new("t", "c", TaskState::Completed));
        assert!(event.is_terminal());
        let event = RunEvent::Message(A2aMessage::agent_text("m", "done"));
        assert!(!event.is_terminal());
    }

    #[tokio::test]
    async fn emit_without_subscribers_is_a_no_op() {
        let hub = RunEventHub::new();
        hub.emit(
            Uuid::new_v4(),
            RunEvent::Task(A2aTask::new("t", "c", TaskState::Working)),
        );
    }

    #[tokio::test]
    async fn cleanup_closes_receivers() {
        let hub = RunEventHub::new();
        let run_id = Uuid::new_v4();
        let mut rx = hub.subscribe(run_id);
        hub.cleanup(run_id);
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }
}
