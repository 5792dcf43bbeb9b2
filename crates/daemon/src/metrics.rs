// Sidecar metrics: lifecycle counters, error counters, and resource
// gauges, rendered in Prometheus text format and served over HTTP.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use axum::extract::State;
use axum::routing::get;
use axum::Router;
use tokio::sync::broadcast;
use tracing::info;

const METRICS_PREFIX: &str = "dashsync";

#[derive(Debug, Default)]
pub struct SidecarMetrics {
    created_total: AtomicU64,
    deleted_total: AtomicU64,
    updated_total: Mutex<HashMap<String, u64>>,
    errors_total: Mutex<HashMap<String, u64>>,
    resources: AtomicU64,
    resource_errors: Mutex<HashMap<String, u64>>,
}

impl SidecarMetrics {
    pub fn inc_created(&self) {
        self.created_total.fetch_add(1, Ordering::SeqCst);
    }

    pub fn inc_deleted(&self) {
        self.deleted_total.fetch_add(1, Ordering::SeqCst);
    }

    /// Count an update, labelled by the resource field that changed.
    pub fn inc_updated(&self, field: &str) {
        increment_label_counter(&self.updated_total, field, 1);
    }

    /// Count a handling failure, labelled by its stable reason code.
    pub fn inc_error(&self, code: &str) {
        increment_label_counter(&self.errors_total, code, 1);
    }

    /// Current number of managed resources, recomputed on each watch event.
    pub fn set_resources(&self, count: u64) {
        self.resources.store(count, Ordering::SeqCst);
    }

    /// Replace the per-reason gauge of resources currently carrying a
    /// non-empty status reason. Recomputed wholesale on each watch event.
    pub fn set_resource_errors(&self, counts: HashMap<String, u64>) {
        let mut guard = self.resource_errors.lock().expect("metrics map lock poisoned");
        *guard = counts;
    }

    pub fn render_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str(&format!(
            "# HELP {METRICS_PREFIX}_created_resources_total Created resources counter.\n\
             # TYPE {METRICS_PREFIX}_created_resources_total counter\n\
             {METRICS_PREFIX}_created_resources_total {}\n",
            self.created_total.load(Ordering::SeqCst)
        ));

        output.push_str(&format!(
            "# HELP {METRICS_PREFIX}_deleted_resources_total Deleted resources counter.\n\
             # TYPE {METRICS_PREFIX}_deleted_resources_total counter\n\
             {METRICS_PREFIX}_deleted_resources_total {}\n",
            self.deleted_total.load(Ordering::SeqCst)
        ));

        output.push_str(&format!(
            "# HELP {METRICS_PREFIX}_updated_resources_total Updated resources counter by changed field.\n\
             # TYPE {METRICS_PREFIX}_updated_resources_total counter\n"
        ));
        append_label_counter_lines(
            &mut output,
            &format!("{METRICS_PREFIX}_updated_resources_total"),
            "field",
            &self.updated_total,
        );

        output.push_str(&format!(
            "# HELP {METRICS_PREFIX}_errors_total Handling errors counter by reason code.\n\
             # TYPE {METRICS_PREFIX}_errors_total counter\n"
        ));
        append_label_counter_lines(
            &mut output,
            &format!("{METRICS_PREFIX}_errors_total"),
            "error",
            &self.errors_total,
        );

        output.push_str(&format!(
            "# HELP {METRICS_PREFIX}_resources Current number of managed resources.\n\
             # TYPE {METRICS_PREFIX}_resources gauge\n\
             {METRICS_PREFIX}_resources {}\n",
            self.resources.load(Ordering::SeqCst)
        ));

        output.push_str(&format!(
            "# HELP {METRICS_PREFIX}_resource_errors Resources currently carrying an error reason.\n\
             # TYPE {METRICS_PREFIX}_resource_errors gauge\n"
        ));
        append_label_counter_lines(
            &mut output,
            &format!("{METRICS_PREFIX}_resource_errors"),
            "error",
            &self.resource_errors,
        );

        output
    }
}

fn increment_label_counter(map: &Mutex<HashMap<String, u64>>, label: &str, delta: u64) {
    let mut guard = map.lock().expect("metrics map lock poisoned");
    let value = guard.entry(label.to_string()).or_insert(0);
    *value = value.saturating_add(delta);
}

fn append_label_counter_lines(
    output: &mut String,
    metric_name: &str,
    label_name: &str,
    map: &Mutex<HashMap<String, u64>>,
) {
    let guard = map.lock().expect("metrics map lock poisoned");
    let mut entries: Vec<_> = guard.iter().collect();
    entries.sort_by(|(left, _), (right, _)| left.cmp(right));

    for (label, value) in entries {
        output.push_str(&format!(
            "{metric_name}{{{label_name}=\"{}\"}} {value}\n",
            escape_label_value(label),
        ));
    }
}

fn escape_label_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\n', "\\n").replace('"', "\\\"")
}

/// Serve `/metrics` and `/healthz` until the shutdown channel fires.
pub async fn serve(
    addr: SocketAddr,
    metrics: Arc<SidecarMetrics>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let app = Router::new()
        .route("/metrics", get(render_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(metrics);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {addr}"))?;
    info!(addr = %addr, "metrics endpoint listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
        .context("metrics server terminated unexpectedly")
}

async fn render_handler(State(metrics): State<Arc<SidecarMetrics>>) -> String {
    metrics.render_prometheus()
}
