//! Per-account service properties.

use serde::{Deserialize, Serialize};

/// CORS rule for a storage service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CorsRule {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub exposed_headers: Vec<String>,
    pub max_age_in_seconds: u32,
}

/// Retention policy for logs and metrics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RetentionPolicy {
    pub enabled: bool,
    pub days: Option<u32>,
}

/// Analytics logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub version: String,
    pub read: bool,
    pub write: bool,
    pub delete: bool,
    pub retention_policy: RetentionPolicy,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            read: false,
            write: false,
            delete: false,
            retention_policy: RetentionPolicy::default(),
        }
    }
}

/// Hour/minute metrics settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub version: String,
    pub enabled: bool,
    pub include_apis: Option<bool>,
    pub retention_policy: RetentionPolicy,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            enabled: false,
            include_apis: None,
            retention_policy: RetentionPolicy::default(),
        }
    }
}

/// Service properties blob for one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ServiceProperties {
    pub logging: LoggingConfig,
    pub hour_metrics: MetricsConfig,
    pub minute_metrics: MetricsConfig,
    pub cors: Vec<CorsRule>,
    pub default_service_version: Option<String>,
}
