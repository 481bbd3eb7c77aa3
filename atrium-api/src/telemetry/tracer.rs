//! Tracing Subscriber Initialization
//!
//! Installs a `tracing-subscriber` registry with an `EnvFilter` and either a
//! JSON or a human-readable `fmt` layer.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::ApiConfig;
use crate::error::{ApiError, ApiResult};

/// Filter used when neither `RUST_LOG` nor a configured level is present.
pub const DEFAULT_FILTER: &str = "atrium_api=debug,atrium_storage=info,info";

/// Telemetry configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup event
    pub service_name: String,
    /// Service version
    pub service_version: String,
    /// Filter directives, e.g. `atrium_api=debug,info`
    pub filter: String,
    /// JSON lines instead of the pretty format
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "atrium-api".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            filter: DEFAULT_FILTER.to_string(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Take the log level and format from the service configuration.
    ///
    /// A plain level such as `warn` is appended to the default crate
    /// directives; anything containing `=` is used as-is.
    pub fn from_api_config(config: &ApiConfig) -> Self {
        let level = config.log_level.trim();
        let filter = if level.is_empty() {
            DEFAULT_FILTER.to_string()
        } else if level.contains('=') {
            level.to_string()
        } else {
            format!("atrium_api=debug,atrium_storage=info,{}", level)
        };
        Self {
            filter,
            json: config.log_json,
            ..Self::default()
        }
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.filter))
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    }
}

/// Initialize the global tracing subscriber.
///
/// Call once at startup. A second call fails because a global subscriber is
/// already set.
pub fn init_tracing(config: &TelemetryConfig) -> ApiResult<()> {
    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().pretty().boxed()
    };

    tracing_subscriber::registry()
        .with(config.env_filter())
        .with(fmt_layer)
        .try_init()
        .map_err(|e| ApiError::internal_error(format!("Failed to init subscriber: {}", e)))?;

    tracing::info!(
        service_name = config.service_name,
        service_version = config.service_version,
        json = config.json,
        "Telemetry initialized"
    );

    Ok(())
}
