//! Single-process dispatch loop: claim a batch, fan out to a
//! bounded-concurrency executor, collect outcomes in completion order, and
//! commit each event's terminal status.

use std::sync::Arc;
use std::time::Duration;

use dispatchbox_db::Repository;
use dispatchbox_handlers::{DispatchOutcome, HandlerRegistry};
use dispatchbox_model::Event;
use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use tokio::sync::{watch, Semaphore};
use tracing::Instrument;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Log-correlation identifier; every log line carries a worker
    /// identifier (name + PID).
    pub name: String,
    pub batch_size: i64,
    pub poll_interval: Duration,
    pub max_parallel: usize,
    /// Per-handler dispatch deadline, opt-in. `None` preserves unbounded
    /// handler execution.
    pub handler_timeout: Option<Duration>,
}

/// Owns a Repository, a handler registry, and the polling parameters for one
/// dispatch loop. One instance per worker task.
pub struct Worker {
    repo: Arc<Repository>,
    handlers: Arc<HandlerRegistry>,
    config: WorkerConfig,
    stop: watch::Receiver<bool>,
}

impl Worker {
    pub fn new(
        repo: Arc<Repository>,
        handlers: Arc<HandlerRegistry>,
        config: WorkerConfig,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            repo,
            handlers,
            config,
            stop,
        }
    }

    /// Run the dispatch loop until the shared stop signal is set. An
    /// in-flight batch is always drained to status-write completion before
    /// returning.
    pub async fn run(&mut self) {
        let pid = std::process::id();
        let span = tracing::info_span!("worker", name = %self.config.name, pid = %pid);
        self.run_loop().instrument(span).await
    }

    async fn run_loop(&mut self) {
        tracing::info!("worker started");
        while !*self.stop.borrow() {
            match self.repo.fetch_pending(self.config.batch_size).await {
                Ok(batch) if batch.is_empty() => {
                    self.sleep_or_wake().await;
                }
                Ok(batch) => {
                    tracing::debug!(count = batch.len(), "fetched events for processing");
                    metrics::counter!("dispatchbox_events_claimed_total").increment(batch.len() as u64);
                    self.dispatch_batch(batch).await;
                }
                Err(err) => {
                    tracing::error!(error = %err, "fetch_pending failed, sleeping poll interval");
                    self.sleep_or_wake().await;
                }
            }
        }
        tracing::info!("worker stopped");
    }

    /// Sleep `poll_interval`, but wake early if the stop signal flips so
    /// shutdown is responsive even while idle.
    async fn sleep_or_wake(&mut self) {
        tokio::select! {
            _ = tokio::time::sleep(self.config.poll_interval) => {},
            _ = self.stop.changed() => {},
        }
    }

    /// Fan out a claimed batch to up to `max_parallel` concurrent handler
    /// invocations and commit each outcome as it completes. Status writes
    /// happen in completion order, not submission order.
    async fn dispatch_batch(&self, batch: Vec<Event>) {
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel));
        let mut pending = FuturesUnordered::new();
        let in_flight = metrics::gauge!("dispatchbox_in_flight_dispatches");

        for event in batch {
            let id = event.id;
            let handlers = Arc::clone(&self.handlers);
            let semaphore = Arc::clone(&semaphore);
            let handler_timeout = self.config.handler_timeout;

            in_flight.increment(1.0);
            let handle = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore is never closed");
                dispatch_one(&handlers, &event, handler_timeout).await
            });

            pending.push(async move { (id, handle.await) });
        }

        while let Some((id, joined)) = pending.next().await {
            in_flight.decrement(1.0);
            let Some(id) = id else {
                // A row without an id cannot be closed out.
                tracing::error!("event has no id, skipping status write");
                continue;
            };

            match joined {
                Ok(outcome) => self.commit_outcome(id, outcome).await,
                Err(join_err) => {
                    tracing::error!(event_id = id, error = %join_err, "dispatch task panicked");
                    self.commit_outcome(id, DispatchOutcome::Failed(join_err.into())).await;
                }
            }
        }
    }

    async fn commit_outcome(&self, id: i64, outcome: DispatchOutcome) {
        match outcome {
            DispatchOutcome::Ok => {
                if let Err(err) = self.repo.mark_success(id).await {
                    tracing::error!(event_id = id, error = %err, "failed to mark event success");
                } else {
                    tracing::debug!(event_id = id, "successfully processed event");
                    metrics::counter!("dispatchbox_events_total", "outcome" => "success").increment(1);
                }
            }
            DispatchOutcome::NotFound => {
                tracing::error!(event_id = id, "no handler registered for event type");
                metrics::counter!("dispatchbox_events_total", "outcome" => "handler_not_found").increment(1);
                if let Err(err) = self.repo.mark_retry(id).await {
                    tracing::error!(event_id = id, error = %err, "failed to mark event retry");
                }
            }
            DispatchOutcome::Failed(err) => {
                tracing::error!(event_id = id, error = %err, "error processing event");
                metrics::counter!("dispatchbox_events_total", "outcome" => "failed").increment(1);
                if let Err(err) = self.repo.mark_retry(id).await {
                    tracing::error!(event_id = id, error = %err, "failed to mark event retry");
                }
            }
        }
    }
}

/// Invoke the handler for one event, optionally under a deadline.
async fn dispatch_one(
    handlers: &HandlerRegistry,
    event: &Event,
    handler_timeout: Option<Duration>,
) -> DispatchOutcome {
    let dispatch = handlers.dispatch(&event.event_type, &event.payload);
    match handler_timeout {
        None => dispatch.await,
        Some(deadline) => match tokio::time::timeout(deadline, dispatch).await {
            Ok(outcome) => outcome,
            Err(_) => DispatchOutcome::Failed(anyhow::anyhow!(
                "handler timed out after {:?}",
                deadline
            )),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dispatchbox_handlers::EventHandler;
    use dispatchbox_model::Status;
    use serde_json::json;

    fn event(id: i64, event_type: &str) -> Event {
        Event {
            id: Some(id),
            aggregate_type: "order".to_string(),
            aggregate_id: "42".to_string(),
            event_type: event_type.to_string(),
            payload: json!({}),
            status: Status::Pending,
            attempts: 0,
            next_run_at: chrono::Utc::now(),
            created_at: None,
        }
    }

    struct Noop;

    #[async_trait]
    impl EventHandler for Noop {
        async fn handle(&self, _payload: &serde_json::Value) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct Slow;

    #[async_trait]
    impl EventHandler for Slow {
        async fn handle(&self, _payload: &serde_json::Value) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn dispatch_one_ok_on_success() {
        let mut registry = HandlerRegistry::new();
        registry.register("order.created", Arc::new(Noop));
        let outcome = dispatch_one(&registry, &event(1, "order.created"), None).await;
        assert!(matches!(outcome, DispatchOutcome::Ok));
    }

    #[tokio::test]
    async fn dispatch_one_not_found_for_unregistered_type() {
        let registry = HandlerRegistry::new();
        let outcome = dispatch_one(&registry, &event(9, "unknown.event"), None).await;
        assert!(matches!(outcome, DispatchOutcome::NotFound));
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_one_times_out_as_failed_when_deadline_set() {
        let mut registry = HandlerRegistry::new();
        registry.register("slow.event", Arc::new(Slow));
        let fut = dispatch_one(&registry, &event(1, "slow.event"), Some(Duration::from_secs(1)));
        let outcome = tokio::time::timeout(Duration::from_secs(5), fut)
            .await
            .expect("outer timeout should not fire");
        assert!(matches!(outcome, DispatchOutcome::Failed(_)));
    }
}
