//! # Metrics Collection
//!
//! Prometheus counters for content operations, credential minting, policy
//! churn and metadata/content inconsistencies.

use crate::config::ObservabilityConfig;
use crate::errors::{Result, StrongroomError};
use ::tracing::{info, warn};
use metrics::{counter, describe_counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Metrics recorder that tracks secrets subsystem metrics
#[derive(Debug, Clone, Default)]
pub struct MetricsRecorder;

impl MetricsRecorder {
    pub fn new() -> Self {
        Self
    }

    /// Record a content store operation
    pub fn record_content_operation(&self, backend: &str, operation: &str, duration: f64, success: bool) {
        let status = if success { "success" } else { "error" };
        let labels = [
            ("backend", backend.to_string()),
            ("operation", operation.to_string()),
            ("status", status.to_string()),
        ];
        counter!("secret_content_operations_total", &labels).increment(1);

        let duration_labels = [("backend", backend.to_string()), ("operation", operation.to_string())];
        histogram!("secret_content_operation_duration_seconds", &duration_labels).record(duration);
    }

    /// Record a minted scoped credential
    pub fn record_credential_minted(&self, backend: &str, policy_count: usize) {
        let labels = [("backend", backend.to_string())];
        counter!("secret_credentials_minted_total", &labels).increment(1);
        counter!("secret_policies_written_total", &labels).increment(policy_count as u64);
    }

    pub fn record_policies_deleted(&self, backend: &str, count: usize) {
        let labels = [("backend", backend.to_string())];
        counter!("secret_policies_deleted_total", &labels).increment(count as u64);
    }

    /// Record a revision whose metadata was written without its content
    pub fn record_inconsistency(&self, backend: &str) {
        let labels = [("backend", backend.to_string())];
        counter!("secret_inconsistencies_total", &labels).increment(1);
    }

    pub fn register_secrets_metrics(&self) {
        describe_counter!("secret_content_operations_total", "Content store operations by backend and status");
        describe_counter!("secret_credentials_minted_total", "Scoped backend credentials minted");
        describe_counter!("secret_policies_written_total", "Backend access policies written");
        describe_counter!("secret_policies_deleted_total", "Backend access policies deleted");
        describe_counter!(
            "secret_inconsistencies_total",
            "Revisions whose metadata was written but content was not"
        );
    }
}

/// Global metrics recorder instance
static METRICS: once_cell::sync::Lazy<Arc<RwLock<Option<MetricsRecorder>>>> =
    once_cell::sync::Lazy::new(|| Arc::new(RwLock::new(None)));

/// Initialize metrics collection and Prometheus exporter
pub async fn init_metrics(config: &ObservabilityConfig) -> Result<()> {
    if !config.enable_metrics {
        return Ok(());
    }

    let metrics_addr = match config.metrics_bind_address() {
        Some(addr) => addr,
        None => {
            warn!("Metrics disabled: no bind address configured");
            return Ok(());
        }
    };

    let socket_addr: SocketAddr = metrics_addr.parse().map_err(|e| {
        StrongroomError::config(format!("Invalid metrics bind address '{}': {}", metrics_addr, e))
    })?;

    PrometheusBuilder::new()
        .with_http_listener(socket_addr)
        .add_global_label("service", &config.service_name)
        .install()
        .map_err(|e| StrongroomError::config(format!("Failed to initialize metrics exporter: {}", e)))?;

    let recorder = MetricsRecorder::new();
    {
        let mut metrics = METRICS.write().await;
        *metrics = Some(recorder.clone());
    }
    recorder.register_secrets_metrics();

    info!(
        metrics_addr = %metrics_addr,
        service_name = %config.service_name,
        "Metrics collection initialized"
    );

    Ok(())
}

/// Get the global metrics recorder
pub async fn get_metrics() -> Option<MetricsRecorder> {
    METRICS.read().await.clone()
}

/// Record a content store operation via the global recorder
pub async fn record_content_operation(backend: &str, operation: &str, duration: f64, success: bool) {
    if let Some(metrics) = get_metrics().await {
        metrics.record_content_operation(backend, operation, duration, success);
    }
}

/// Record a minted credential via the global recorder
pub async fn record_credential_minted(backend: &str, policy_count: usize) {
    if let Some(metrics) = get_metrics().await {
        metrics.record_credential_minted(backend, policy_count);
    }
}

pub async fn record_policies_deleted(backend: &str, count: usize) {
    if let Some(metrics) = get_metrics().await {
        metrics.record_policies_deleted(backend, count);
    }
}

/// Record a metadata/content inconsistency via the global recorder
pub async fn record_inconsistency(backend: &str) {
    if let Some(metrics) = get_metrics().await {
        metrics.record_inconsistency(backend);
    }
}
