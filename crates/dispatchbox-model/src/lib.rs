//! In-memory representation of an `outbox_event` row and its wire format.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::postgres::PgRow;
use sqlx::Row;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

/// Lifecycle status of an outbox row: pending -> retry* -> done | dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pending,
    Retry,
    Done,
    Dead,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Retry => "retry",
            Status::Done => "done",
            Status::Dead => "dead",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Status::Pending),
            "retry" => Some(Status::Retry),
            "done" => Some(Status::Done),
            "dead" => Some(Status::Dead),
            _ => None,
        }
    }
}

/// An outbox event row. `id` and `created_at` are `None` for rows that have
/// not yet been persisted (or, for `id`, defensively absent on a malformed
/// read); both are omitted from [`Event::to_wire`] when `None`.
#[derive(Debug, Clone)]
pub struct Event {
    pub id: Option<i64>,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: Value,
    pub status: Status,
    pub attempts: i32,
    pub next_run_at: DateTime<Utc>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Event {
    /// Construct an [`Event`] from a claimed database row.
    ///
    /// `next_run_at` is the only field this refuses to default: a row
    /// without it cannot be scheduled, so construction fails rather than
    /// silently inventing a timestamp. Every other optional field falls
    /// back to a sensible default.
    pub fn from_row(row: &PgRow) -> Result<Self, ModelError> {
        let next_run_at = row
            .try_get::<Option<DateTime<Utc>>, _>("next_run_at")
            .ok()
            .flatten()
            .ok_or(ModelError::MissingField("next_run_at"))?;

        let id = row.try_get::<Option<i64>, _>("id").ok().flatten();

        let aggregate_type = row
            .try_get::<Option<String>, _>("aggregate_type")
            .ok()
            .flatten()
            .unwrap_or_default();

        let aggregate_id = row
            .try_get::<Option<String>, _>("aggregate_id")
            .ok()
            .flatten()
            .unwrap_or_default();

        let event_type = row
            .try_get::<Option<String>, _>("event_type")
            .ok()
            .flatten()
            .unwrap_or_default();

        let payload = row
            .try_get::<Option<Value>, _>("payload")
            .ok()
            .flatten()
            .unwrap_or_else(|| Value::Object(Map::new()));

        let status = row
            .try_get::<Option<String>, _>("status")
            .ok()
            .flatten()
            .and_then(|s| Status::parse(&s))
            .unwrap_or(Status::Pending);

        let attempts = row
            .try_get::<Option<i32>, _>("attempts")
            .ok()
            .flatten()
            .unwrap_or(0);

        let created_at = row
            .try_get::<Option<DateTime<Utc>>, _>("created_at")
            .ok()
            .flatten();

        Ok(Event {
            id,
            aggregate_type,
            aggregate_id,
            event_type,
            payload,
            status,
            attempts,
            next_run_at,
            created_at,
        })
    }

    /// Produce the admin-surface wire representation: absolute instants as
    /// ISO-8601 UTC strings, `id`/`created_at` omitted when `None`.
    pub fn to_wire(&self) -> Value {
        let mut m = Map::new();
        m.insert(
            "aggregate_type".to_string(),
            Value::String(self.aggregate_type.clone()),
        );
        m.insert(
            "aggregate_id".to_string(),
            Value::String(self.aggregate_id.clone()),
        );
        m.insert(
            "event_type".to_string(),
            Value::String(self.event_type.clone()),
        );
        m.insert("payload".to_string(), self.payload.clone());
        m.insert(
            "status".to_string(),
            Value::String(self.status.as_str().to_string()),
        );
        m.insert("attempts".to_string(), Value::from(self.attempts));
        m.insert(
            "next_run_at".to_string(),
            Value::String(self.next_run_at.to_rfc3339()),
        );
        if let Some(id) = self.id {
            m.insert("id".to_string(), Value::from(id));
        }
        if let Some(created_at) = self.created_at {
            m.insert(
                "created_at".to_string(),
                Value::String(created_at.to_rfc3339()),
            );
        }
        Value::Object(m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_wire_omits_null_id_and_created_at() {
        let ev = Event {
            id: None,
            aggregate_type: "order".to_string(),
            aggregate_id: "42".to_string(),
            event_type: "order.created".to_string(),
            payload: serde_json::json!({"orderId": "42"}),
            status: Status::Pending,
            attempts: 0,
            next_run_at: Utc::now(),
            created_at: None,
        };

        let wire = ev.to_wire();
        let obj = wire.as_object().unwrap();
        assert!(!obj.contains_key("id"));
        assert!(!obj.contains_key("created_at"));
        assert_eq!(obj["status"], "pending");
    }

    #[test]
    fn to_wire_includes_id_and_created_at_when_present() {
        let now = Utc::now();
        let ev = Event {
            id: Some(7),
            aggregate_type: "order".to_string(),
            aggregate_id: "42".to_string(),
            event_type: "order.created".to_string(),
            payload: serde_json::json!({}),
            status: Status::Dead,
            attempts: 5,
            next_run_at: now,
            created_at: Some(now),
        };

        let wire = ev.to_wire();
        let obj = wire.as_object().unwrap();
        assert_eq!(obj["id"], 7);
        assert_eq!(obj["status"], "dead");
        assert!(obj.contains_key("created_at"));
    }

    #[test]
    fn status_parse_rejects_unknown_values() {
        assert!(Status::parse("bogus").is_none());
        assert_eq!(Status::parse("dead"), Some(Status::Dead));
    }
}
