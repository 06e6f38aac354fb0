//! Shared state for the admin HTTP surface.
//!
//! Each request builds a fresh, short-timeout Repository handle and
//! disposes of it — no long-lived cursors or transactions are held across
//! requests. `AppState` therefore only holds the DSN and the timeout
//! profile to connect with, not a pooled Repository instance.

use std::time::Duration;

use dispatchbox_db::{RepoConfig, Repository};

use crate::metrics::MetricsRegistry;

/// Short connect/query timeouts for admin-surface DB access: 2s connect
/// for everything, 2s query timeout for readiness, 5s for DLQ reads.
fn admin_repo_config(query_timeout: Duration) -> RepoConfig {
    RepoConfig {
        connect_timeout: Duration::from_secs(2),
        query_timeout,
        max_attempts: 5,
        retry_backoff: chrono::Duration::seconds(30),
        max_connections: 2,
    }
}

pub struct AppState {
    dsn: String,
    pub metrics: Option<MetricsRegistry>,
}

impl AppState {
    pub fn new(dsn: impl Into<String>, metrics: Option<MetricsRegistry>) -> Self {
        Self {
            dsn: dsn.into(),
            metrics,
        }
    }

    /// Open a fresh Repository handle with the 2s readiness-probe timeout.
    pub async fn repository_for_ready(&self) -> Result<Repository, dispatchbox_db::RepoError> {
        Repository::connect(&self.dsn, admin_repo_config(Duration::from_secs(2))).await
    }

    /// Open a fresh Repository handle with the 5s DLQ-read timeout.
    pub async fn repository_for_dlq(&self) -> Result<Repository, dispatchbox_db::RepoError> {
        Repository::connect(&self.dsn, admin_repo_config(Duration::from_secs(5))).await
    }
}
