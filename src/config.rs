//! Operator configuration
//!
//! Read once at startup from the environment. Unset variables take their
//! defaults; unparsable numbers are logged and replaced by the default.

use std::time::Duration;

use tracing::warn;

pub const DEFAULT_GOVERNING_SERVICE: &str = "elasticsearch-db";
pub const DEFAULT_ELASTICSEARCH_IMAGE: &str = "docker.elastic.co/elasticsearch/elasticsearch";
pub const DEFAULT_RESTORE_IMAGE: &str = "docker.elastic.co/elasticsearch/elasticsearch";

const DEFAULT_SYNC_PERIOD_SECS: u64 = 120;
const DEFAULT_STATEFULSET_READY_TIMEOUT_SECS: u64 = 30 * 60;
const DEFAULT_RESTORE_JOB_TIMEOUT_SECS: u64 = 30 * 60;
const DEFAULT_READINESS_POLL_INTERVAL_SECS: u64 = 10;
const DEFAULT_HEALTH_PORT: u16 = 8080;

#[derive(Clone, Debug, PartialEq)]
pub struct OperatorConfig {
    /// Name of the headless Service shared by all instances in a namespace
    pub governing_service: String,
    /// Elasticsearch image repository; the instance version is the tag
    pub elasticsearch_image: String,
    /// Image running restore jobs
    pub restore_image: String,
    /// Full resync period of the watch loops
    pub sync_period: Duration,
    pub statefulset_ready_timeout: Duration,
    pub restore_job_timeout: Duration,
    /// Poll interval for bounded waits
    pub poll_interval: Duration,
    pub health_port: u16,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            governing_service: DEFAULT_GOVERNING_SERVICE.to_string(),
            elasticsearch_image: DEFAULT_ELASTICSEARCH_IMAGE.to_string(),
            restore_image: DEFAULT_RESTORE_IMAGE.to_string(),
            sync_period: Duration::from_secs(DEFAULT_SYNC_PERIOD_SECS),
            statefulset_ready_timeout: Duration::from_secs(DEFAULT_STATEFULSET_READY_TIMEOUT_SECS),
            restore_job_timeout: Duration::from_secs(DEFAULT_RESTORE_JOB_TIMEOUT_SECS),
            poll_interval: Duration::from_secs(DEFAULT_READINESS_POLL_INTERVAL_SECS),
            health_port: DEFAULT_HEALTH_PORT,
        }
    }
}

impl OperatorConfig {
    /// Build the configuration from process environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| {
            Duration::from_secs(parse_or(&lookup, key, default.as_secs()))
        };

        Self {
            governing_service: lookup("GOVERNING_SERVICE")
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.governing_service),
            elasticsearch_image: lookup("ELASTICSEARCH_IMAGE")
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.elasticsearch_image),
            restore_image: lookup("RESTORE_IMAGE")
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.restore_image),
            sync_period: secs("SYNC_PERIOD_SECS", defaults.sync_period),
            statefulset_ready_timeout: secs(
                "STATEFULSET_READY_TIMEOUT_SECS",
                defaults.statefulset_ready_timeout,
            ),
            restore_job_timeout: secs("RESTORE_JOB_TIMEOUT_SECS", defaults.restore_job_timeout),
            poll_interval: secs("READINESS_POLL_INTERVAL_SECS", defaults.poll_interval),
            health_port: parse_or(&lookup, "HEALTH_PORT", defaults.health_port),
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display + Copy,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, default = %default, "invalid value, using default");
            default
        }),
    }
}
