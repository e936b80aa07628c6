//! In-process queue with at-least-once redelivery.
//!
//! Dispatch model: one unbounded channel per task type feeding a dispatcher
//! task; the dispatcher bounds parallelism with a semaphore and spawns one
//! task per delivery. Retryable failures are re-enqueued after backoff with
//! the same task id, so consumers see genuine redeliveries.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use shaman_domain::{Error, Result};

use crate::backoff::BackoffPolicy;
use crate::{DeadLetterHandler, HandlerOutcome, QueueTask, TaskHandler, TaskQueue};

struct Registration {
    sender: mpsc::UnboundedSender<QueueTask>,
    /// Receiver end, parked here until `register_handler` claims it.
    /// Tasks enqueued before registration buffer in the channel.
    parked: Option<mpsc::UnboundedReceiver<QueueTask>>,
}

pub struct InMemoryQueue {
    channels: Mutex<HashMap<String, Registration>>,
    backoff: BackoffPolicy,
    /// Shared with dispatchers so installation order does not matter.
    dead_letter: Arc<Mutex<Option<DeadLetterHandler>>>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            backoff: BackoffPolicy::default(),
            dead_letter: Arc::new(Mutex::new(None)),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Install the callback invoked on exhausted or non-retryable failures.
    pub fn set_dead_letter(&self, handler: DeadLetterHandler) {
        *self.dead_letter.lock() = Some(handler);
    }

    /// Get or create the channel sender for a task type. Tasks enqueued
    /// before a handler registers buffer in the channel.
    fn sender_for(&self, task_type: &str) -> mpsc::UnboundedSender<QueueTask> {
        let mut channels = self.channels.lock();
        channels
            .entry(task_type.to_owned())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::unbounded_channel();
                Registration {
                    sender: tx,
                    parked: Some(rx),
                }
            })
            .sender
            .clone()
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl TaskQueue for InMemoryQueue {
    async fn enqueue(
        &self,
        run_id: Uuid,
        task_type: &str,
        payload: Value,
        metadata: Value,
    ) -> Result<Uuid> {
        if self.shutdown.is_cancelled() {
            return Err(Error::QueueUnavailable("queue is shutting down".into()));
        }
        let task = QueueTask {
            id: Uuid::new_v4(),
            run_id,
            task_type: task_type.to_owned(),
            payload,
            metadata,
            attempt: 0,
            enqueued_at: Utc::now(),
        };
        let task_id = task.id;
        self.sender_for(task_type)
            .send(task)
            .map_err(|_| Error::QueueUnavailable(format!("no channel for {task_type}")))?;
        tracing::debug!(%task_id, %run_id, task_type, "task enqueued");
        Ok(task_id)
    }

    fn register_handler(
        &self,
        task_type: &str,
        handler: TaskHandler,
        concurrency: usize,
        max_attempts: u32,
    ) {
        // Ensure the channel exists, then claim its receiver.
        let sender = self.sender_for(task_type);
        let parked = self
            .channels
            .lock()
            .get_mut(task_type)
            .and_then(|reg| reg.parked.take());
        let mut rx = match parked {
            Some(rx) => rx,
            None => {
                tracing::warn!(task_type, "handler already registered, ignoring");
                return;
            }
        };

        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let backoff = self.backoff.clone();
        let dead_letter = self.dead_letter.clone();
        let shutdown = self.shutdown.clone();
        let tracker = self.tracker.clone();
        let task_type = task_type.to_owned();

        let dispatcher_tracker = tracker.clone();
        tracker.spawn(async move {
            loop {
                let task = tokio::select! {
                    t = rx.recv() => match t {
                        Some(t) => t,
                        None => break,
                    },
                    _ = shutdown.cancelled() => break,
                };

                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => break,
                };

                let handler = handler.clone();
                let sender = sender.clone();
                let backoff = backoff.clone();
                let dead_letter = dead_letter.clone();
                let shutdown = shutdown.clone();
                let task_type = task_type.clone();

                dispatcher_tracker.spawn(async move {
                    let _permit = permit;
                    let task_id = task.id;
                    let attempt = task.attempt;
                    tracing::debug!(%task_id, attempt, %task_type, "task delivery");

                    let outcome = handler(task.clone()).await;
                    match outcome {
                        HandlerOutcome::Done(_) => {
                            tracing::debug!(%task_id, %task_type, "task done");
                        }
                        HandlerOutcome::Fail { error, retryable } => {
                            let attempts_left =
                                retryable && attempt + 1 < max_attempts;
                            if attempts_left && !shutdown.is_cancelled() {
                                let delay = backoff.delay_for_attempt(attempt);
                                tracing::warn!(
                                    %task_id,
                                    attempt,
                                    delay_ms = delay.as_millis() as u64,
                                    error = %error,
                                    "task failed, scheduling redelivery"
                                );
                                tokio::time::sleep(delay).await;
                                let mut retry = task;
                                retry.attempt += 1;
                                let _ = sender.send(retry);
                            } else {
                                tracing::error!(
                                    %task_id,
                                    attempt,
                                    retryable,
                                    error = %error,
                                    "task failed terminally"
                                );
                                let dl = dead_letter.lock().clone();
                                if let Some(dl) = dl {
                                    dl(task, error).await;
                                }
                            }
                        }
                    }
                });
            }
        });
        tracing::info!(concurrency, max_attempts, "queue consumer registered");
    }

    async fn shutdown(&self) {
        self.shutdown.cancel();
        // Drop all senders so dispatcher loops see channel close.
        self.channels.lock().clear();
        self.tracker.close();
        self.tracker.wait().await;
        tracing::info!("queue drained");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_handler(
        counter: Arc<AtomicU32>,
        fail_first_n: u32,
        retryable: bool,
    ) -> TaskHandler {
        Arc::new(move |_task| {
            let counter = counter.clone();
            Box::pin(async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < fail_first_n {
                    HandlerOutcome::Fail {
                        error: "induced".into(),
                        retryable,
                    }
                } else {
                    HandlerOutcome::Done(json!({ "n": n }))
                }
            })
        })
    }

    #[tokio::test]
    async fn delivers_enqueued_task() {
        let queue = InMemoryQueue::new();
        let counter = Arc::new(AtomicU32::new(0));
        queue.register_handler("t", counting_handler(counter.clone(), 0, false), 2, 3);
        queue
            .enqueue(Uuid::new_v4(), "t", json!({}), json!({}))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn buffers_tasks_enqueued_before_registration() {
        let queue = InMemoryQueue::new();
        queue
            .enqueue(Uuid::new_v4(), "late", json!({ "k": 1 }), json!({}))
            .await
            .unwrap();
        let counter = Arc::new(AtomicU32::new(0));
        queue.register_handler("late", counting_handler(counter.clone(), 0, false), 1, 3);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retryable_failure_is_redelivered() {
        let queue = InMemoryQueue::new().with_backoff(BackoffPolicy {
            initial_delay: std::time::Duration::from_millis(5),
            max_delay: std::time::Duration::from_millis(10),
            factor: 1.0,
        });
        let counter = Arc::new(AtomicU32::new(0));
        queue.register_handler("r", counting_handler(counter.clone(), 2, true), 1, 5);
        queue
            .enqueue(Uuid::new_v4(), "r", json!({}), json!({}))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        // Two failures then success.
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_failure_goes_to_dead_letter() {
        let queue = InMemoryQueue::new();
        let dead = Arc::new(AtomicU32::new(0));
        let dead_clone = dead.clone();
        queue.set_dead_letter(Arc::new(move |_task, _error| {
            let dead = dead_clone.clone();
            Box::pin(async move {
                dead.fetch_add(1, Ordering::SeqCst);
                HandlerOutcome::Done(json!(null))
            })
        }));
        let counter = Arc::new(AtomicU32::new(0));
        queue.register_handler("d", counting_handler(counter.clone(), 10, false), 1, 5);
        queue
            .enqueue(Uuid::new_v4(), "d", json!({}), json!({}))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1, "non-retryable is not redelivered");
        assert_eq!(dead.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_go_to_dead_letter() {
        let queue = InMemoryQueue::new().with_backoff(BackoffPolicy {
            initial_delay: std::time::Duration::from_millis(2),
            max_delay: std::time::Duration::from_millis(4),
            factor: 1.0,
        });
        let dead = Arc::new(AtomicU32::new(0));
        let dead_clone = dead.clone();
        queue.set_dead_letter(Arc::new(move |_task, _error| {
            let dead = dead_clone.clone();
            Box::pin(async move {
                dead.fetch_add(1, Ordering::SeqCst);
                HandlerOutcome::Done(json!(null))
            })
        }));
        let counter = Arc::new(AtomicU32::new(0));
        queue.register_handler("x", counting_handler(counter.clone(), 99, true), 1, 3);
        queue
            .enqueue(Uuid::new_v4(), "x", json!({}), json!({}))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3, "max_attempts deliveries");
        assert_eq!(dead.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn enqueue_after_shutdown_is_unavailable() {
        let queue = InMemoryQueue::new();
        queue.shutdown().await;
        let err = queue
            .enqueue(Uuid::new_v4(), "t", json!({}), json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::QueueUnavailable(_)));
    }
}
