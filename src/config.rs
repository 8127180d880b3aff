//! Runtime configuration, read once from `INNKEEP_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::queue::{OnConflict, QueueConfig};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} (expected {expected})")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub workers: usize,
    pub queue_capacity: usize,
    pub on_conflict: OnConflict,
    /// Compact the WAL once this many events were appended since the last compaction.
    pub compact_threshold: u64,
    /// Prometheus exporter port; `None` disables metrics export.
    pub metrics_port: Option<u16>,
    /// How long shutdown waits for queued and running jobs.
    pub shutdown_grace: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 3000,
            data_dir: PathBuf::from("./data"),
            workers: 8,
            queue_capacity: 1024,
            on_conflict: OnConflict::Drop,
            compact_threshold: 1000,
            metrics_port: None,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, var: &str, default: T) -> T {
    lookup(var).and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build a config from any variable source. Unparseable numbers fall back
    /// to their defaults; an unknown conflict policy is an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let d = Self::default();
        let on_conflict = match lookup("INNKEEP_ON_CONFLICT") {
            None => d.on_conflict,
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                var: "INNKEEP_ON_CONFLICT",
                value,
                expected: "drop or reschedule",
            })?,
        };
        Ok(Self {
            bind: lookup("INNKEEP_BIND").unwrap_or(d.bind),
            port: parsed(&lookup, "INNKEEP_PORT", d.port),
            data_dir: lookup("INNKEEP_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            workers: parsed(&lookup, "INNKEEP_WORKERS", d.workers).max(1),
            queue_capacity: parsed(&lookup, "INNKEEP_QUEUE_CAPACITY", d.queue_capacity).max(1),
            on_conflict,
            compact_threshold: parsed(&lookup, "INNKEEP_COMPACT_THRESHOLD", d.compact_threshold),
            metrics_port: lookup("INNKEEP_METRICS_PORT").and_then(|s| s.trim().parse().ok()),
            shutdown_grace: Duration::from_secs(parsed(
                &lookup,
                "INNKEEP_SHUTDOWN_GRACE_SECS",
                d.shutdown_grace.as_secs(),
            )),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("innkeep.wal")
    }

    pub fn queue(&self) -> QueueConfig {
        QueueConfig {
            workers: self.workers,
            capacity: self.queue_capacity,
            on_conflict: self.on_conflict,
            ..QueueConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.addr(), "0.0.0.0:3000");
        assert_eq!(config.workers, 8);
        assert_eq!(config.on_conflict, OnConflict::Drop);
        assert!(config.metrics_port.is_none());
        assert_eq!(config.wal_path(), PathBuf::from("./data/innkeep.wal"));
    }

    #[test]
    fn reads_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("INNKEEP_PORT", "8080"),
            ("INNKEEP_WORKERS", "2"),
            ("INNKEEP_ON_CONFLICT", "reschedule"),
            ("INNKEEP_METRICS_PORT", "9000"),
            ("INNKEEP_SHUTDOWN_GRACE_SECS", "3"),
        ]))
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.queue().workers, 2);
        assert_eq!(config.queue().on_conflict, OnConflict::Reschedule);
        assert_eq!(config.metrics_port, Some(9000));
        assert_eq!(config.shutdown_grace, Duration::from_secs(3));
    }

    #[test]
    fn bad_numbers_fall_back() {
        let config = Config::from_lookup(lookup(&[("INNKEEP_PORT", "http"), ("INNKEEP_WORKERS", "0")])).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.workers, 1);
    }

    #[test]
    fn unknown_conflict_policy_is_rejected() {
        let err = Config::from_lookup(lookup(&[("INNKEEP_ON_CONFLICT", "retry")])).unwrap_err();
        assert!(err.to_string().contains("INNKEEP_ON_CONFLICT"));
    }
}
