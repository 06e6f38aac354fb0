//! Request and response types for the admin HTTP surface. No business
//! logic lives here.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeadEventsQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub aggregate_type: Option<String>,
    pub event_type: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeadEventsResponse {
    pub events: Vec<Value>,
    pub count: usize,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeadEventsStatsResponse {
    pub total: i64,
    pub aggregate_type: Option<String>,
    pub event_type: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetryResponse {
    pub status: &'static str,
    pub event_id: i64,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryBatchRequest {
    pub event_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetryBatchResponse {
    pub status: &'static str,
    pub message: String,
    pub requested: usize,
    pub processed: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: None,
        }
    }
}
