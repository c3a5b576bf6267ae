//! Core data model for the dataset pipeline.
//!
//! Defines the fixed stage order, job records, stage parameters, and the
//! message payload carried on the broker between stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{PipelineError, Result};

/// The three ordered processing stages applied to every dataset.
///
/// Stages only advance forward in this order; a job never regresses or
/// skips a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Fill missing values in numeric columns.
    FillMissing,
    /// Detect and treat outliers in numeric columns.
    DetectOutliers,
    /// Select features, dropping highly correlated columns.
    FeatureExtraction,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 3] = [
        Stage::FillMissing,
        Stage::DetectOutliers,
        Stage::FeatureExtraction,
    ];

    /// Returns the wire/routing-key name of the stage.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::FillMissing => "fill_missing",
            Stage::DetectOutliers => "detect_outliers",
            Stage::FeatureExtraction => "feature_extraction",
        }
    }

    /// Returns a human-readable name for the stage.
    #[must_use]
    pub fn display_name(&self) -> &'static str {
        match self {
            Stage::FillMissing => "Filling Missing Values",
            Stage::DetectOutliers => "Detecting Outliers",
            Stage::FeatureExtraction => "Extracting Features",
        }
    }

    /// The fixed progress checkpoint reached when this stage completes.
    ///
    /// Modeled as an explicit mapping rather than recomputed ad hoc.
    #[must_use]
    pub fn checkpoint(&self) -> u8 {
        match self {
            Stage::FillMissing => 33,
            Stage::DetectOutliers => 66,
            Stage::FeatureExtraction => 100,
        }
    }

    /// The stage that follows this one, or `None` for the final stage.
    #[must_use]
    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::FillMissing => Some(Stage::DetectOutliers),
            Stage::DetectOutliers => Some(Stage::FeatureExtraction),
            Stage::FeatureExtraction => None,
        }
    }

    /// Returns `true` if this is the final stage of the pipeline.
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.next().is_none()
    }

    /// Suffix appended to the input file stem for this stage's output
    /// artifact. Deterministic so re-running a stage overwrites rather
    /// than duplicates.
    #[must_use]
    pub fn output_suffix(&self) -> &'static str {
        match self {
            Stage::FillMissing => "filled",
            Stage::DetectOutliers => "outliers",
            Stage::FeatureExtraction => "features",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for parsing a [`Stage`] from a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStageError {
    invalid_value: String,
}

impl ParseStageError {
    /// Returns the invalid value that caused the parse error.
    #[must_use]
    pub fn invalid_value(&self) -> &str {
        &self.invalid_value
    }
}

impl std::fmt::Display for ParseStageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid stage: '{}'. Valid values are: fill_missing, detect_outliers, \
             feature_extraction",
            self.invalid_value
        )
    }
}

impl std::error::Error for ParseStageError {}

impl FromStr for Stage {
    type Err = ParseStageError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "fill_missing" => Ok(Stage::FillMissing),
            "detect_outliers" => Ok(Stage::DetectOutliers),
            "feature_extraction" => Ok(Stage::FeatureExtraction),
            _ => Err(ParseStageError {
                invalid_value: s.to_string(),
            }),
        }
    }
}

/// Lifecycle status of a pipeline job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job exists and is waiting for (or between) stages.
    #[default]
    Pending,
    /// A stage is currently executing.
    Processing,
    /// All stages finished successfully.
    Completed,
    /// A stage failed; terminal for the job.
    Failed,
}

impl JobStatus {
    /// Returns the wire name of the status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Returns `true` if this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strategy for filling missing numeric values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillMethod {
    /// Fill with the column mean.
    #[default]
    Mean,
    /// Fill with a user-supplied constant (requires `fill_value`).
    Constant,
    /// Linear interpolation between neighboring values.
    Linear,
}

/// Strategy for treating detected outliers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierMethod {
    /// Cap values at the IQR fences (Q1 - 1.5*IQR, Q3 + 1.5*IQR).
    #[default]
    Cap,
    /// Replace outliers with the column mean.
    Mean,
    /// Replace outliers with the column median.
    Median,
}

/// Stage configuration captured at submission time.
///
/// Immutable for the life of the job, and carried in full on every
/// [`StageMessage`] so each stage is self-contained and replay-safe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageParameters {
    /// How missing numeric values are filled.
    pub fill_method: FillMethod,

    /// Constant used when `fill_method` is [`FillMethod::Constant`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fill_value: Option<f64>,

    /// How outliers are treated.
    pub outlier_method: OutlierMethod,

    /// Percentage of feature columns kept by feature extraction, in (0, 100].
    pub top_percent: u8,
}

impl Default for StageParameters {
    fn default() -> Self {
        Self {
            fill_method: FillMethod::default(),
            fill_value: None,
            outlier_method: OutlierMethod::default(),
            top_percent: 100,
        }
    }
}

impl StageParameters {
    /// Validate the parameter set.
    ///
    /// Fails fast before any message is published: constant fill requires
    /// a value, and `top_percent` must lie in (0, 100].
    pub fn validate(&self) -> Result<()> {
        if self.fill_method == FillMethod::Constant && self.fill_value.is_none() {
            return Err(PipelineError::Validation(
                "fill_method 'constant' requires a fill_value".to_string(),
            ));
        }
        if self.top_percent == 0 || self.top_percent > 100 {
            return Err(PipelineError::Validation(format!(
                "top_percent must be in (0, 100], got {}",
                self.top_percent
            )));
        }
        Ok(())
    }
}

/// Durable record of one dataset's traversal of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineJob {
    /// Opaque unique identifier, assigned at creation.
    pub job_id: String,

    /// The most recently entered stage.
    pub current_stage: Stage,

    /// Lifecycle status.
    pub status: JobStatus,

    /// Progress in [0, 100]; non-decreasing while status is not failed,
    /// and 100 exactly when status is completed.
    pub percentage_completed: u8,

    /// Artifact consumed by the current/next stage.
    pub input_path: PathBuf,

    /// Artifact produced by the most recently completed stage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,

    /// Stage configuration, immutable for the life of the job.
    pub parameters: StageParameters,

    /// Creation timestamp, set once.
    pub created_at: DateTime<Utc>,
}

impl PipelineJob {
    /// Create a fresh record for a newly submitted job.
    #[must_use]
    pub fn new(job_id: impl Into<String>, input_path: PathBuf, parameters: StageParameters) -> Self {
        Self {
            job_id: job_id.into(),
            current_stage: Stage::FillMissing,
            status: JobStatus::Pending,
            percentage_completed: 0,
            input_path,
            output_path: None,
            parameters,
            created_at: Utc::now(),
        }
    }
}

/// Partial update applied to a [`PipelineJob`] record.
///
/// Only set fields are merged; unset fields keep their stored value, so
/// concurrent writers touching disjoint fields cannot clobber each other.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentage_completed: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
}

impl JobUpdate {
    /// Create an empty update.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the current stage.
    #[must_use]
    pub fn stage(mut self, stage: Stage) -> Self {
        self.current_stage = Some(stage);
        self
    }

    /// Set the status.
    #[must_use]
    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the progress percentage.
    #[must_use]
    pub fn percentage(mut self, pct: u8) -> Self {
        self.percentage_completed = Some(pct);
        self
    }

    /// Set the output artifact path.
    #[must_use]
    pub fn output_path(mut self, path: PathBuf) -> Self {
        self.output_path = Some(path);
        self
    }

    /// Merge this update into a job record, last-writer-wins per field.
    ///
    /// An update carrying a stage the record has already moved past is
    /// stale (a redelivered message for an earlier stage) and is dropped
    /// whole, so `current_stage` and `percentage_completed` never
    /// regress.
    pub fn apply(&self, job: &mut PipelineJob) {
        if let Some(stage) = self.current_stage {
            if stage < job.current_stage {
                return;
            }
            job.current_stage = stage;
        }
        if let Some(status) = self.status {
            job.status = status;
        }
        if let Some(pct) = self.percentage_completed {
            job.percentage_completed = pct;
        }
        if let Some(ref path) = self.input_path {
            job.input_path = path.clone();
        }
        if let Some(ref path) = self.output_path {
            job.output_path = Some(path.clone());
        }
    }
}

/// The payload carried on the broker between stages.
///
/// Created by the entry point (first stage) or by a worker on successful
/// completion of the prior stage; never mutated after publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageMessage {
    /// Job this message belongs to.
    pub job_id: String,

    /// Input artifact for the receiving stage.
    pub artifact_path: PathBuf,

    /// The receiving stage.
    pub stage: Stage,

    /// Full original parameter set, so every stage is self-contained.
    pub parameters: StageParameters,

    /// Progress snapshot at publish time.
    pub percentage_completed: u8,
}

impl StageMessage {
    /// Serialize the message for the wire.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize a message from the wire.
    ///
    /// Failures here mark the delivery as a poison message, to be
    /// rejected without requeue.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| PipelineError::MalformedMessage(e.to_string()))
    }
}
