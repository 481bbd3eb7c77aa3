//! Prometheus Metrics Definitions
//!
//! Counters for service operations, cache lookups and audit write failures.
//! Metrics are registered on a caller-owned [`Registry`], so each service
//! bundle (and each test) has its own set.

use prometheus::{
    register_int_counter_vec_with_registry, register_int_counter_with_registry, Encoder,
    IntCounter, IntCounterVec, Registry, TextEncoder,
};

use crate::error::{ApiError, ApiResult};

/// Outcome label of a service operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn as_label(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "error",
        }
    }

    pub fn of<T, E>(result: &Result<T, E>) -> Self {
        if result.is_ok() {
            Outcome::Success
        } else {
            Outcome::Failure
        }
    }
}

/// Container for all ATRIUM metrics.
#[derive(Clone)]
pub struct AtriumMetrics {
    registry: Registry,

    /// Service operation counter - labels: service, operation, outcome
    pub operations_total: IntCounterVec,

    /// Cache lookup counter - labels: kind, result (hit/miss)
    pub cache_lookups_total: IntCounterVec,

    /// Audit entries that could not be written
    pub audit_failures_total: IntCounter,
}

impl AtriumMetrics {
    /// Create and register all metrics on `registry`.
    pub fn new(registry: Registry) -> ApiResult<Self> {
        Ok(Self {
            operations_total: register_int_counter_vec_with_registry!(
                "atrium_operations_total",
                "Total number of service operations",
                &["service", "operation", "outcome"],
                registry
            )
            .map_err(|e| {
                ApiError::internal_error(format!("Failed to register operations_total: {}", e))
            })?,

            cache_lookups_total: register_int_counter_vec_with_registry!(
                "atrium_cache_lookups_total",
                "Total number of resource cache lookups",
                &["kind", "result"],
                registry
            )
            .map_err(|e| {
                ApiError::internal_error(format!("Failed to register cache_lookups_total: {}", e))
            })?,

            audit_failures_total: register_int_counter_with_registry!(
                "atrium_audit_failures_total",
                "Total number of audit entries that failed to persist",
                registry
            )
            .map_err(|e| {
                ApiError::internal_error(format!("Failed to register audit_failures_total: {}", e))
            })?,

            registry,
        })
    }

    /// Metrics on a fresh private registry.
    pub fn unregistered() -> ApiResult<Self> {
        Self::new(Registry::new())
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record the outcome of a service operation.
    pub fn record_operation(&self, service: &str, operation: &str, outcome: Outcome) {
        self.operations_total
            .with_label_values(&[service, operation, outcome.as_label()])
            .inc();
    }

    /// Record a cache lookup for `kind` (workspace, project, ...).
    pub fn record_cache_lookup(&self, kind: &str, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.cache_lookups_total
            .with_label_values(&[kind, result])
            .inc();
    }

    pub fn record_audit_failure(&self) {
        self.audit_failures_total.inc();
    }

    pub fn audit_failures(&self) -> u64 {
        self.audit_failures_total.get()
    }

    /// Current value of one operation counter.
    pub fn operation_count(&self, service: &str, operation: &str, outcome: Outcome) -> u64 {
        self.operations_total
            .with_label_values(&[service, operation, outcome.as_label()])
            .get()
    }

    /// Render every metric of the registry in the Prometheus text format.
    pub fn render(&self) -> ApiResult<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| ApiError::internal_error(format!("Failed to encode metrics: {}", e)))?;
        String::from_utf8(buffer)
            .map_err(|e| ApiError::internal_error(format!("Metrics are not UTF-8: {}", e)))
    }
}

impl std::fmt::Debug for AtriumMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtriumMetrics").finish_non_exhaustive()
    }
}
