//! Optional Prometheus exposition for `GET /metrics`. Counters and gauges
//! themselves are recorded from `dispatchbox-worker` via the `metrics`
//! facade's global recorder; this module only installs the recorder and
//! renders its text exposition.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

#[derive(Clone)]
pub struct MetricsRegistry {
    handle: PrometheusHandle,
}

impl MetricsRegistry {
    /// Install the process-global Prometheus recorder. Must be called at
    /// most once per process; the admin binary does this only when metrics
    /// are enabled. Absent a registered recorder, `/metrics` returns `501`.
    pub fn install() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder()?;
        Ok(Self { handle })
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }
}
