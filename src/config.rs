//! Configuration types for the dataset pipeline.
//!
//! Provides the broker topology names and store/notifier settings using
//! the builder pattern for ergonomic setup.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::store::{JsonStore, MemoryStore, ProgressStore};
use crate::types::Stage;

/// Configuration for the pipeline orchestrator and workers.
///
/// Use [`PipelineConfig::builder()`] for a fluent API.
///
/// # Example
///
/// ```rust,ignore
/// use dataset_pipeline::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .exchange("dataset_exchange_preprocess")
///     .queue_prefix("dataset_queue")
///     .build()?;
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Name of the exchange all stage queues are bound to.
    /// Default: "dataset_exchange_preprocess"
    pub exchange: String,

    /// Prefix for per-stage queue names (`{prefix}_{stage}`).
    /// Default: "dataset_queue"
    pub queue_prefix: String,

    /// Capacity of the notifier broadcast channel.
    /// Default: 64
    pub notifier_capacity: usize,

    /// Optional path for the JSON-file-backed progress store.
    /// When `None`, an in-memory store is used.
    /// Default: None
    pub store_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            exchange: "dataset_exchange_preprocess".to_string(),
            queue_prefix: "dataset_queue".to_string(),
            notifier_capacity: 64,
            store_path: None,
        }
    }
}

impl PipelineConfig {
    /// Create a new configuration builder.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Queue name for a stage, derived from the configured prefix.
    #[must_use]
    pub fn queue_name(&self, stage: Stage) -> String {
        format!("{}_{}", self.queue_prefix, stage.as_str())
    }

    /// Routing key for a stage.
    #[must_use]
    pub fn routing_key(&self, stage: Stage) -> &'static str {
        stage.as_str()
    }

    /// Open the progress store this configuration selects: a [`JsonStore`]
    /// at `store_path` when set, otherwise a fresh [`MemoryStore`].
    pub fn open_store(&self) -> crate::error::Result<Arc<dyn ProgressStore>> {
        match &self.store_path {
            Some(path) => Ok(Arc::new(JsonStore::open(path)?)),
            None => Ok(Arc::new(MemoryStore::new())),
        }
    }

    /// Validate the configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.exchange.is_empty() {
            return Err(ConfigValidationError::EmptyName("exchange"));
        }
        if self.queue_prefix.is_empty() {
            return Err(ConfigValidationError::EmptyName("queue_prefix"));
        }
        if self.notifier_capacity == 0 {
            return Err(ConfigValidationError::InvalidNotifierCapacity(
                self.notifier_capacity,
            ));
        }
        Ok(())
    }
}

/// Errors that can occur during configuration validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Configuration field '{0}' must not be empty")]
    EmptyName(&'static str),

    #[error("Invalid notifier capacity: {0} (must be at least 1)")]
    InvalidNotifierCapacity(usize),
}

/// Builder for [`PipelineConfig`] with fluent API.
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    exchange: Option<String>,
    queue_prefix: Option<String>,
    notifier_capacity: Option<usize>,
    store_path: Option<PathBuf>,
}

impl PipelineConfigBuilder {
    /// Set the exchange name.
    pub fn exchange(mut self, name: impl Into<String>) -> Self {
        self.exchange = Some(name.into());
        self
    }

    /// Set the queue name prefix.
    pub fn queue_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.queue_prefix = Some(prefix.into());
        self
    }

    /// Set the notifier broadcast channel capacity.
    pub fn notifier_capacity(mut self, capacity: usize) -> Self {
        self.notifier_capacity = Some(capacity);
        self
    }

    /// Persist the progress store to a JSON file at this path.
    pub fn store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    /// Build the configuration, validating it first.
    pub fn build(self) -> Result<PipelineConfig, ConfigValidationError> {
        let defaults = PipelineConfig::default();
        let config = PipelineConfig {
            exchange: self.exchange.unwrap_or(defaults.exchange),
            queue_prefix: self.queue_prefix.unwrap_or(defaults.queue_prefix),
            notifier_capacity: self.notifier_capacity.unwrap_or(defaults.notifier_capacity),
            store_path: self.store_path,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_topology_names() {
        let config = PipelineConfig::default();
        assert_eq!(config.exchange, "dataset_exchange_preprocess");
        assert_eq!(
            config.queue_name(Stage::FillMissing),
            "dataset_queue_fill_missing"
        );
        assert_eq!(config.routing_key(Stage::DetectOutliers), "detect_outliers");
    }

    #[test]
    fn test_builder_overrides() {
        let config = PipelineConfig::builder()
            .exchange("pipeline_exchange")
            .queue_prefix("pipeline")
            .notifier_capacity(8)
            .build()
            .unwrap();
        assert_eq!(config.exchange, "pipeline_exchange");
        assert_eq!(
            config.queue_name(Stage::FeatureExtraction),
            "pipeline_feature_extraction"
        );
        assert_eq!(config.notifier_capacity, 8);
    }

    #[test]
    fn test_builder_rejects_empty_exchange() {
        let result = PipelineConfig::builder().exchange("").build();
        assert!(matches!(
            result,
            Err(ConfigValidationError::EmptyName("exchange"))
        ));
    }

    #[test]
    fn test_open_store_without_path_is_ephemeral() {
        let config = PipelineConfig::default();
        let job = crate::types::PipelineJob::new(
            "j1",
            PathBuf::from("a.csv"),
            crate::types::StageParameters::default(),
        );
        config.open_store().unwrap().insert(job).unwrap();
        // A second open yields an independent, empty store.
        assert!(config.open_store().unwrap().get("j1").unwrap().is_none());
    }

    #[test]
    fn test_open_store_with_path_persists() {
        let dir = std::env::temp_dir().join("dataset-pipeline-config-store");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("progress.json");
        let _ = std::fs::remove_file(&path);

        let config = PipelineConfig::builder()
            .store_path(&path)
            .build()
            .unwrap();

        let job = crate::types::PipelineJob::new(
            "j1",
            PathBuf::from("a.csv"),
            crate::types::StageParameters::default(),
        );
        config.open_store().unwrap().insert(job).unwrap();
        // Reopening through the same config sees the persisted record.
        let reopened = config.open_store().unwrap();
        assert!(reopened.get("j1").unwrap().is_some());
    }

    #[test]
    fn test_builder_rejects_zero_capacity() {
        let result = PipelineConfig::builder().notifier_capacity(0).build();
        assert!(matches!(
            result,
            Err(ConfigValidationError::InvalidNotifierCapacity(0))
        ));
    }
}
