//! Verifies DLQ listing/stats/replay: dead rows are queryable, retryable
//! individually or in batch, and revert to pending with attempts reset.

use dispatchbox_db::{RepoConfig, Repository};
use dispatchbox_model::Status;

async fn seed_dead(pool: &sqlx::PgPool, aggregate_type: &str) -> i64 {
    let row = sqlx::query(
        "INSERT INTO outbox_event (aggregate_type, aggregate_id, event_type, payload, status, attempts) \
         VALUES ($1, 'agg-1', 'evt.type', '{}', 'dead', 5) RETURNING id",
    )
    .bind(aggregate_type)
    .fetch_one(pool)
    .await
    .expect("seed dead row");
    sqlx::Row::try_get(&row, "id").expect("id")
}

#[tokio::test]
#[ignore = "requires DISPATCHBOX_DATABASE_URL; run: DISPATCHBOX_DATABASE_URL=postgres://... cargo test -p dispatchbox-db -- --include-ignored"]
async fn dlq_list_and_single_retry_roundtrip() {
    let dsn = std::env::var("DISPATCHBOX_DATABASE_URL").expect("DISPATCHBOX_DATABASE_URL");
    let repo = Repository::connect(&dsn, RepoConfig::default())
        .await
        .expect("connect");
    repo.migrate().await.expect("migrate");

    let pool = sqlx::PgPool::connect(&dsn).await.expect("raw pool");
    let id = seed_dead(&pool, "invoice").await;

    let count = repo.count_dead(Some("invoice"), None).await.expect("count_dead");
    assert!(count >= 1);

    let retried = repo.retry_dead(id).await.expect("retry_dead");
    assert!(retried);

    let again = repo.retry_dead(id).await.expect("retry_dead no-op");
    assert!(!again, "retrying an already-pending row is a no-op");

    let fetched = repo.fetch_pending(50).await.expect("fetch_pending");
    let ev = fetched.iter().find(|e| e.id == Some(id)).expect("row should be pending again");
    assert_eq!(ev.status, Status::Pending);
    assert_eq!(ev.attempts, 0);
}

#[tokio::test]
#[ignore = "requires DISPATCHBOX_DATABASE_URL; run: DISPATCHBOX_DATABASE_URL=postgres://... cargo test -p dispatchbox-db -- --include-ignored"]
async fn dlq_batch_retry_skips_non_dead_ids() {
    let dsn = std::env::var("DISPATCHBOX_DATABASE_URL").expect("DISPATCHBOX_DATABASE_URL");
    let repo = Repository::connect(&dsn, RepoConfig::default())
        .await
        .expect("connect");
    repo.migrate().await.expect("migrate");

    let pool = sqlx::PgPool::connect(&dsn).await.expect("raw pool");
    let dead_a = seed_dead(&pool, "order").await;
    let dead_b = seed_dead(&pool, "order").await;

    let affected = repo
        .retry_dead_batch(&[dead_a, dead_b, 999_999_999])
        .await
        .expect("retry_dead_batch");
    assert_eq!(affected, 2);
}
