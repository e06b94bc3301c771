//! Engine configuration
//!
//! Loaded from TOML, then overridden from the environment:
//!
//! - `ORGDIR_FRESHNESS_MS`: freshness window for every query
//! - `ORGDIR_RETENTION_MS`: retention window for every query
//! - `ORGDIR_SWEEP_INTERVAL_MS`: retention sweep period
//! - `ORGDIR_TOTALS_FAMILY`: precomputed aggregate family to read
//! - `ORGDIR_CONSUMER`: change-feed consumer name
//!
//! Durations are expressed in milliseconds.

use crate::cache::CachePolicy;
use crate::error::{AnalyticsError, AnalyticsResult};
use crate::feed::Table;
use crate::model::DEFAULT_COHORTS;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_TOTALS_FAMILY: &str = "organization_totals";

pub const DEFAULT_TOTALS_COUNTERS: [&str; 3] = [
    "total_organizations",
    "total_members",
    "total_weighted_headcount",
];

/// Sweep periods below this are rejected
const SWEEP_INTERVAL_MIN: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub cache: CacheConfig,
    /// Family of precomputed aggregates reported as totals
    pub totals_family: String,
    /// Counters always present in totals, zero when missing from the store
    pub totals_counters: Vec<String>,
    /// Cohorts reported by cohort statistics
    pub cohorts: Vec<String>,
    pub subscriber: SubscriberConfig,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        AnalyticsConfig {
            cache: CacheConfig::default(),
            totals_family: DEFAULT_TOTALS_FAMILY.to_string(),
            totals_counters: DEFAULT_TOTALS_COUNTERS.iter().map(|s| s.to_string()).collect(),
            cohorts: DEFAULT_COHORTS.iter().map(|s| s.to_string()).collect(),
            subscriber: SubscriberConfig::default(),
        }
    }
}

impl AnalyticsConfig {
    /// Configuration for tests (short windows, fast sweeps)
    pub fn test() -> Self {
        AnalyticsConfig {
            cache: CacheConfig::test(),
            subscriber: SubscriberConfig {
                consumer: "orgdir-analytics-test".to_string(),
                ..SubscriberConfig::default()
            },
            ..AnalyticsConfig::default()
        }
    }

    pub fn from_toml_str(s: &str) -> AnalyticsResult<Self> {
        let config: AnalyticsConfig =
            toml::from_str(s).map_err(|e| AnalyticsError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> AnalyticsResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| AnalyticsError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> AnalyticsResult<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Apply `ORGDIR_*` overrides from the process environment
    pub fn apply_env(&mut self) -> AnalyticsResult<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> AnalyticsResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(ms) = parse_millis(&lookup, "ORGDIR_FRESHNESS_MS")? {
            for policy in self.cache.policies_mut() {
                policy.freshness = ms;
            }
        }
        if let Some(ms) = parse_millis(&lookup, "ORGDIR_RETENTION_MS")? {
            for policy in self.cache.policies_mut() {
                policy.retention = ms;
            }
        }
        if let Some(ms) = parse_millis(&lookup, "ORGDIR_SWEEP_INTERVAL_MS")? {
            self.cache.sweep_interval = ms;
        }
        if let Some(family) = lookup("ORGDIR_TOTALS_FAMILY") {
            self.totals_family = family;
        }
        if let Some(consumer) = lookup("ORGDIR_CONSUMER") {
            self.subscriber.consumer = consumer;
        }

        for policy in self.cache.policies_mut() {
            *policy = policy.normalized();
        }
        self.validate()
    }

    pub fn validate(&self) -> AnalyticsResult<()> {
        if self.cache.sweep_interval < SWEEP_INTERVAL_MIN {
            return Err(AnalyticsError::Config(
                "cache.sweep_interval must be at least 1ms".to_string(),
            ));
        }
        if self.totals_family.trim().is_empty() {
            return Err(AnalyticsError::Config("totals_family must not be empty".to_string()));
        }
        if self.subscriber.consumer.trim().is_empty() {
            return Err(AnalyticsError::Config(
                "subscriber.consumer must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_millis<F>(lookup: &F, name: &str) -> AnalyticsResult<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|_| AnalyticsError::Config(format!("{} must be milliseconds, got '{}'", name, raw))),
    }
}

/// Per-query cache policies and the retention sweep period
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub distribution: CachePolicy,
    pub totals: CachePolicy,
    pub cohort_statistics: CachePolicy,
    #[serde(with = "duration_millis")]
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            distribution: CachePolicy::default(),
            totals: CachePolicy::new(Duration::from_secs(60), Duration::from_secs(30 * 60)),
            cohort_statistics: CachePolicy::default(),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl CacheConfig {
    pub fn test() -> Self {
        let policy = CachePolicy::new(Duration::from_millis(500), Duration::from_secs(5));
        CacheConfig {
            distribution: policy,
            totals: policy,
            cohort_statistics: policy,
            sweep_interval: Duration::from_millis(50),
        }
    }

    fn policies_mut(&mut self) -> [&mut CachePolicy; 3] {
        [
            &mut self.distribution,
            &mut self.totals,
            &mut self.cohort_statistics,
        ]
    }
}

/// Change-feed subscription settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriberConfig {
    /// Consumer name; each instance gets its own channel under it
    pub consumer: String,
    pub watched_tables: Vec<Table>,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        SubscriberConfig {
            consumer: "orgdir-analytics".to_string(),
            watched_tables: Table::ALL.to_vec(),
        }
    }
}

pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
