//! Admin HTTP surface: liveness, readiness, optional metrics, and the DLQ
//! inspection/replay API. Route paths and payload shapes are what callers
//! depend on; the HTTP framework underneath is an implementation detail.

pub mod api_types;
mod extract;
pub mod metrics;
pub mod routes;
pub mod state;

pub use metrics::MetricsRegistry;
pub use routes::build_router;
pub use state::AppState;
