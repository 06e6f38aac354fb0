//! Verifies FOR UPDATE SKIP LOCKED isolation: two concurrent claimers never
//! receive overlapping rows.

use dispatchbox_db::{RepoConfig, Repository};

async fn make_repo() -> Repository {
    let dsn = std::env::var("DISPATCHBOX_DATABASE_URL")
        .expect("DISPATCHBOX_DATABASE_URL must be set for ignored DB tests");
    let repo = Repository::connect(&dsn, RepoConfig::default())
        .await
        .expect("connect");
    repo.migrate().await.expect("migrate");
    repo
}

async fn seed(repo: &Repository, pool_dsn: &str, n: usize) {
    let pool = sqlx::PgPool::connect(pool_dsn).await.expect("raw pool");
    for i in 0..n {
        sqlx::query(
            "INSERT INTO outbox_event (aggregate_type, aggregate_id, event_type, payload) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind("order")
        .bind(format!("order-{i}"))
        .bind("order.created")
        .bind(serde_json::json!({"n": i}))
        .execute(&pool)
        .await
        .expect("seed insert");
    }
    let _ = repo;
}

#[tokio::test]
#[ignore = "requires DISPATCHBOX_DATABASE_URL; run: DISPATCHBOX_DATABASE_URL=postgres://... cargo test -p dispatchbox-db -- --include-ignored"]
async fn concurrent_claims_never_overlap() {
    let dsn = std::env::var("DISPATCHBOX_DATABASE_URL").expect("DISPATCHBOX_DATABASE_URL");
    let repo = make_repo().await;
    seed(&repo, &dsn, 20).await;

    let repo_a = Repository::connect(&dsn, RepoConfig::default())
        .await
        .expect("connect a");
    let repo_b = Repository::connect(&dsn, RepoConfig::default())
        .await
        .expect("connect b");

    let (batch_a, batch_b) = tokio::join!(repo_a.fetch_pending(10), repo_b.fetch_pending(10));
    let batch_a = batch_a.expect("fetch a");
    let batch_b = batch_b.expect("fetch b");

    let ids_a: std::collections::HashSet<_> = batch_a.iter().filter_map(|e| e.id).collect();
    let ids_b: std::collections::HashSet<_> = batch_b.iter().filter_map(|e| e.id).collect();
    assert!(ids_a.is_disjoint(&ids_b));
    assert_eq!(ids_a.len(), 10);
    assert_eq!(ids_b.len(), 10);
}
