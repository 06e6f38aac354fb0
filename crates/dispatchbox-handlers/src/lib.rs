//! Maps `event_type -> handler(payload)` and reports dispatch outcomes.
//!
//! A handler signals failure by returning `Err`; any error is treated as a
//! retryable failure by the caller (the registry draws no distinction
//! between transient and permanent at this layer). A handler that returns
//! `Ok` is a success.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, payload: &Value) -> anyhow::Result<()>;
}

/// Result of looking up and invoking a handler for an event type.
pub enum DispatchOutcome {
    Ok,
    NotFound,
    Failed(anyhow::Error),
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) {
        self.handlers.insert(event_type.into(), handler);
    }

    pub fn is_registered(&self, event_type: &str) -> bool {
        self.handlers.contains_key(event_type)
    }

    /// Look up and invoke the handler for `event_type`. A missing
    /// registration is reported as `DispatchOutcome::NotFound`, not as an
    /// error: the caller treats it identically to a handler failure
    /// (retry path, eventually dead).
    pub async fn dispatch(&self, event_type: &str, payload: &Value) -> DispatchOutcome {
        match self.handlers.get(event_type) {
            None => DispatchOutcome::NotFound,
            Some(handler) => match handler.handle(payload).await {
                Ok(()) => DispatchOutcome::Ok,
                Err(err) => DispatchOutcome::Failed(err),
            },
        }
    }
}

/// Demo handlers mirroring the reference business handlers: send a customer
/// email, push order data to a CRM, and record analytics. These are sample
/// collaborators, not part of the core dispatch contract — kept here so the
/// CLI has something to register out of the box.
pub mod demo {
    use super::*;

    pub struct SendEmail;

    #[async_trait]
    impl EventHandler for SendEmail {
        async fn handle(&self, payload: &Value) -> anyhow::Result<()> {
            let customer_id = payload
                .get("customerId")
                .ok_or_else(|| anyhow::anyhow!("payload missing customerId"))?;
            tracing::info!(customer_id = %customer_id, "email sent");
            Ok(())
        }
    }

    pub struct PushToCrm;

    #[async_trait]
    impl EventHandler for PushToCrm {
        async fn handle(&self, payload: &Value) -> anyhow::Result<()> {
            let order_id = payload
                .get("orderId")
                .ok_or_else(|| anyhow::anyhow!("payload missing orderId"))?;
            tracing::info!(order_id = %order_id, "CRM updated");
            Ok(())
        }
    }

    pub struct RecordAnalytics;

    #[async_trait]
    impl EventHandler for RecordAnalytics {
        async fn handle(&self, payload: &Value) -> anyhow::Result<()> {
            let order_id = payload
                .get("orderId")
                .ok_or_else(|| anyhow::anyhow!("payload missing orderId"))?;
            tracing::info!(order_id = %order_id, "analytics recorded");
            Ok(())
        }
    }

    /// A registry pre-populated with the three demo handlers, keyed the same
    /// way as the reference `HANDLERS` dict.
    pub fn registry() -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry.register("order.created", Arc::new(SendEmail));
        registry.register("order.created.analytics", Arc::new(RecordAnalytics));
        registry.register("order.created.crm", Arc::new(PushToCrm));
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysFails;

    #[async_trait]
    impl EventHandler for AlwaysFails {
        async fn handle(&self, _payload: &Value) -> anyhow::Result<()> {
            anyhow::bail!("boom")
        }
    }

    #[tokio::test]
    async fn dispatch_not_found_for_unregistered_event_type() {
        let registry = HandlerRegistry::new();
        let outcome = registry.dispatch("unknown.event", &serde_json::json!({})).await;
        assert!(matches!(outcome, DispatchOutcome::NotFound));
    }

    #[tokio::test]
    async fn dispatch_ok_on_success() {
        let registry = demo::registry();
        let outcome = registry
            .dispatch("order.created", &serde_json::json!({"customerId": "c1"}))
            .await;
        assert!(matches!(outcome, DispatchOutcome::Ok));
    }

    #[tokio::test]
    async fn dispatch_failed_propagates_handler_error() {
        let mut registry = HandlerRegistry::new();
        registry.register("always.fails", std::sync::Arc::new(AlwaysFails));
        let outcome = registry.dispatch("always.fails", &serde_json::json!({})).await;
        assert!(matches!(outcome, DispatchOutcome::Failed(_)));
    }
}
