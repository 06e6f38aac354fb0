//! End-to-end dispatch loop scenarios:
//! a successful handler marks the row done; a missing handler registration
//! retries and eventually dead-letters.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dispatchbox_db::{RepoConfig, Repository};
use dispatchbox_handlers::{EventHandler, HandlerRegistry};
use dispatchbox_model::Status;
use dispatchbox_worker::{Worker, WorkerConfig};
use serde_json::Value;

struct AlwaysOk;

#[async_trait]
impl EventHandler for AlwaysOk {
    async fn handle(&self, _payload: &Value) -> anyhow::Result<()> {
        Ok(())
    }
}

async fn make_repo(max_attempts: i32) -> Repository {
    let dsn = std::env::var("DISPATCHBOX_DATABASE_URL")
        .expect("DISPATCHBOX_DATABASE_URL must be set for ignored DB tests");
    let mut config = RepoConfig::default();
    config.max_attempts = max_attempts;
    config.retry_backoff = chrono::Duration::seconds(0);
    let repo = Repository::connect(&dsn, config).await.expect("connect");
    repo.migrate().await.expect("migrate");
    repo
}

async fn seed(dsn: &str, event_type: &str) -> i64 {
    let pool = sqlx::PgPool::connect(dsn).await.expect("raw pool");
    let row = sqlx::query(
        "INSERT INTO outbox_event (aggregate_type, aggregate_id, event_type, payload) \
         VALUES ('order', '42', $1, '{\"orderId\":\"42\"}') RETURNING id",
    )
    .bind(event_type)
    .fetch_one(&pool)
    .await
    .expect("seed insert");
    sqlx::Row::try_get(&row, "id").expect("id")
}

async fn run_one_iteration(repo: Arc<Repository>, handlers: Arc<HandlerRegistry>) {
    let (_tx, rx) = tokio::sync::watch::channel(false);
    let mut worker = Worker::new(
        repo.clone(),
        handlers,
        WorkerConfig {
            name: "worker-test".to_string(),
            batch_size: 10,
            poll_interval: Duration::from_millis(10),
            max_parallel: 4,
            handler_timeout: None,
        },
        rx,
    );
    // Drive exactly one claim+dispatch+commit cycle via an internal race: the
    // loop's first fetch_pending+dispatch always runs before the stop signal
    // is observed, because the check happens at the top of the next
    // iteration. A short-lived worker task with a stop flipped right after
    // spawn gives us "run until idle" semantics without assuming internals.
    let handle = tokio::spawn(async move { worker.run().await });
    tokio::time::sleep(Duration::from_millis(200)).await;
    let _tx = _tx;
    drop(_tx);
    handle.abort();
}

#[tokio::test]
#[ignore = "requires DISPATCHBOX_DATABASE_URL; run: DISPATCHBOX_DATABASE_URL=postgres://... cargo test -p dispatchbox-worker -- --include-ignored"]
async fn successful_handler_marks_row_done() {
    let dsn = std::env::var("DISPATCHBOX_DATABASE_URL").expect("DISPATCHBOX_DATABASE_URL");
    let repo = Arc::new(make_repo(5).await);
    let id = seed(&dsn, "order.created").await;

    let mut handlers = HandlerRegistry::new();
    handlers.register("order.created", Arc::new(AlwaysOk));

    run_one_iteration(repo.clone(), Arc::new(handlers)).await;

    let claimed = repo.fetch_pending(50).await.expect("fetch_pending");
    assert!(
        claimed.iter().all(|e| e.id != Some(id)),
        "row should no longer be eligible after a successful dispatch"
    );
}

#[tokio::test]
#[ignore = "requires DISPATCHBOX_DATABASE_URL; run: DISPATCHBOX_DATABASE_URL=postgres://... cargo test -p dispatchbox-worker -- --include-ignored"]
async fn unregistered_event_type_retries_then_dead_letters() {
    let dsn = std::env::var("DISPATCHBOX_DATABASE_URL").expect("DISPATCHBOX_DATABASE_URL");
    let repo = Arc::new(make_repo(1).await);
    let id = seed(&dsn, "unknown.event").await;

    let handlers = Arc::new(HandlerRegistry::new());
    run_one_iteration(repo.clone(), handlers).await;

    let dead = repo
        .get_dead(id)
        .await
        .expect("get_dead")
        .expect("max_attempts=1 should dead-letter on first failure");
    assert_eq!(dead.status, Status::Dead);
    assert_eq!(dead.attempts, 1);
}
