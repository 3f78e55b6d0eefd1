//! Todo CDC
//!
//! Change-data-capture pipeline for the todo backend:
//! - Decodes before/after snapshots from the datastore mutation log
//! - Derives domain events (created, completed, deleted) from each mutation
//! - Publishes them to the event bus (NATS) for notification, audit and replication consumers
//! - Redelivers failed batches a bounded number of times, then dead-letters them
//!
//! Delivery is at-least-once: a redelivered batch re-publishes events that already
//! went out, so consumers must be idempotent per event (see
//! [`events::DomainEvent::idempotency_key`]).

pub mod cdc;
pub mod events;
pub mod records;
pub mod stream;

use anyhow::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// YAML config structs (deserialization targets)
// ============================================================================

/// Top-level YAML configuration file structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub nats: NatsYamlConfig,
    pub pipeline: PipelineYamlConfig,
}

/// NATS configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NatsYamlConfig {
    pub url: String,
    pub subject_prefix: String,
    /// Await JetStream acknowledgements instead of a plain flush
    pub jetstream: bool,
}

impl Default for NatsYamlConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".into(),
            subject_prefix: "todo.events".into(),
            jetstream: false,
        }
    }
}

/// Pipeline configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineYamlConfig {
    pub source: String,
    pub publish_timeout_ms: u64,
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub dead_letter_path: String,
}

impl Default for PipelineYamlConfig {
    fn default() -> Self {
        Self {
            source: events::DEFAULT_EVENT_SOURCE.into(),
            publish_timeout_ms: 5000,
            batch_size: 10,
            max_retries: 3,
            retry_backoff_ms: 250,
            dead_letter_path: "dead-letters.jsonl".into(),
        }
    }
}

// ============================================================================
// Runtime config (what the application actually uses)
// ============================================================================

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub nats_url: String,
    pub subject_prefix: String,
    pub jetstream: bool,
    /// Source tag attached to every published event
    pub event_source: String,
    /// Upper bound for a single publish attempt
    pub publish_timeout: Duration,
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub dead_letter_path: PathBuf,
}

impl Config {
    /// Load configuration from environment variables only.
    /// Equivalent to from_yaml_and_env(None).
    pub fn from_env() -> Result<Self> {
        Self::from_yaml_and_env(None)
    }

    /// Load configuration from an optional YAML file, then override with env vars.
    ///
    /// Priority: env var > YAML > default
    ///
    /// If `yaml_path` is None, tries "config.yaml" in CWD. If the file doesn't
    /// exist, falls back to pure env var / defaults.
    pub fn from_yaml_and_env(yaml_path: Option<&Path>) -> Result<Self> {
        // 1. Load YAML config (or defaults if file not found)
        let yaml = Self::load_yaml(yaml_path);

        // 2. Build Config with env var overrides
        let config = Self {
            nats_url: std::env::var("NATS_URL").unwrap_or(yaml.nats.url),
            subject_prefix: std::env::var("NATS_SUBJECT_PREFIX")
                .unwrap_or(yaml.nats.subject_prefix),
            jetstream: env_parse("NATS_JETSTREAM").unwrap_or(yaml.nats.jetstream),
            event_source: std::env::var("EVENT_SOURCE").unwrap_or(yaml.pipeline.source),
            publish_timeout: Duration::from_millis(
                env_parse("PUBLISH_TIMEOUT_MS").unwrap_or(yaml.pipeline.publish_timeout_ms),
            ),
            batch_size: env_parse("BATCH_SIZE").unwrap_or(yaml.pipeline.batch_size),
            max_retries: env_parse("MAX_RETRIES").unwrap_or(yaml.pipeline.max_retries),
            retry_backoff: Duration::from_millis(
                env_parse("RETRY_BACKOFF_MS").unwrap_or(yaml.pipeline.retry_backoff_ms),
            ),
            dead_letter_path: std::env::var("DEAD_LETTER_PATH")
                .unwrap_or(yaml.pipeline.dead_letter_path)
                .into(),
        };

        if config.batch_size == 0 {
            anyhow::bail!("batch_size must be at least 1");
        }
        if config.event_source.is_empty() {
            anyhow::bail!("event source tag must not be empty");
        }
        Ok(config)
    }

    /// Try to load and parse a YAML config file. Returns defaults on any failure.
    fn load_yaml(yaml_path: Option<&Path>) -> YamlConfig {
        let default_path = Path::new("config.yaml");
        let path = yaml_path.unwrap_or(default_path);

        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_yaml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    YamlConfig::default()
                }
            },
            Err(_) => {
                tracing::debug!(
                    "No config file at {}, using env vars / defaults",
                    path.display()
                );
                YamlConfig::default()
            }
        }
    }
}

/// Parse an env var, ignoring it when unset or unparseable.
fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod config_tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_yaml_config_loading() {
        let yaml = r#"
nats:
  url: nats://bus:4222
  subject_prefix: prod.todo
  jetstream: true

pipeline:
  source: TodoApi
  publish_timeout_ms: 1500
  batch_size: 25
  max_retries: 5
  retry_backoff_ms: 0
  dead_letter_path: /var/lib/todo-cdc/dlq.jsonl
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.nats.url, "nats://bus:4222");
        assert_eq!(config.nats.subject_prefix, "prod.todo");
        assert!(config.nats.jetstream);
        assert_eq!(config.pipeline.source, "TodoApi");
        assert_eq!(config.pipeline.batch_size, 25);
        assert_eq!(config.pipeline.max_retries, 5);
        assert_eq!(config.pipeline.dead_letter_path, "/var/lib/todo-cdc/dlq.jsonl");
    }

    #[test]
    fn test_yaml_defaults() {
        let config = YamlConfig::default();
        assert_eq!(config.nats.url, "nats://localhost:4222");
        assert_eq!(config.nats.subject_prefix, "todo.events");
        assert!(!config.nats.jetstream);
        assert_eq!(config.pipeline.source, "TodoService");
        assert_eq!(config.pipeline.publish_timeout_ms, 5000);
        assert_eq!(config.pipeline.batch_size, 10);
        assert_eq!(config.pipeline.max_retries, 3);
    }

    #[test]
    fn test_partial_section_keeps_defaults() {
        let yaml = r#"
pipeline:
  batch_size: 50
"#;
        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.pipeline.batch_size, 50);
        assert_eq!(config.pipeline.max_retries, 3);
        assert_eq!(config.nats.url, "nats://localhost:4222");
    }

    /// Combined test for YAML file loading, env var overrides, and validation.
    /// Runs as a single test to avoid parallel env var race conditions.
    #[test]
    fn test_yaml_and_env_lifecycle() {
        // Helper to clear all config env vars
        fn clear_env() {
            for var in &[
                "NATS_URL",
                "NATS_SUBJECT_PREFIX",
                "NATS_JETSTREAM",
                "EVENT_SOURCE",
                "PUBLISH_TIMEOUT_MS",
                "BATCH_SIZE",
                "MAX_RETRIES",
                "RETRY_BACKOFF_MS",
                "DEAD_LETTER_PATH",
            ] {
                std::env::remove_var(var);
            }
        }

        // --- Phase 1: YAML values loaded correctly ---
        let yaml = r#"
nats:
  url: nats://yaml-host:4222
pipeline:
  batch_size: 7
  publish_timeout_ms: 900
"#;
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("config.yaml");
        let mut file = std::fs::File::create(&file_path).unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        clear_env();

        let config = Config::from_yaml_and_env(Some(&file_path)).unwrap();
        assert_eq!(config.nats_url, "nats://yaml-host:4222");
        assert_eq!(config.batch_size, 7);
        assert_eq!(config.publish_timeout, Duration::from_millis(900));
        assert_eq!(config.event_source, "TodoService");

        // --- Phase 2: Env vars override YAML ---
        std::env::set_var("NATS_URL", "nats://env-host:4222");
        std::env::set_var("BATCH_SIZE", "3");
        std::env::set_var("NATS_JETSTREAM", "true");
        std::env::set_var("MAX_RETRIES", "not-a-number");

        let config = Config::from_yaml_and_env(Some(&file_path)).unwrap();
        assert_eq!(config.nats_url, "nats://env-host:4222");
        assert_eq!(config.batch_size, 3);
        assert!(config.jetstream);
        // Unparseable env value falls back to YAML / default
        assert_eq!(config.max_retries, 3);
        // YAML value still used where no env override
        assert_eq!(config.publish_timeout, Duration::from_millis(900));

        // --- Phase 3: Invalid batch size rejected ---
        std::env::set_var("BATCH_SIZE", "0");
        assert!(Config::from_yaml_and_env(Some(&file_path)).is_err());

        clear_env();

        // --- Phase 4: No YAML file → defaults ---
        let nonexistent = Path::new("/tmp/nonexistent-todo-cdc-config-12345.yaml");
        let config = Config::from_yaml_and_env(Some(nonexistent)).unwrap();
        assert_eq!(config.nats_url, "nats://localhost:4222");
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.dead_letter_path, PathBuf::from("dead-letters.jsonl"));

        // --- Phase 5: Malformed YAML → defaults ---
        std::fs::write(&file_path, "nats: [unterminated").unwrap();
        let config = Config::from_yaml_and_env(Some(&file_path)).unwrap();
        assert_eq!(config.subject_prefix, "todo.events");
    }
}
