//! Stage transforms.
//!
//! Each pipeline stage is a [`StageTransform`]: given an input CSV artifact
//! and the job's parameters, it produces the stage's output artifact at a
//! deterministic path and returns that path. Outputs are complete-or-absent
//! (written via temp file + rename), and the output path depends only on
//! the input path and stage, so re-running a transform on a redelivered
//! message overwrites rather than duplicates.

mod features;
mod fill_missing;
mod outliers;

pub use features::FeatureExtractionTransform;
pub use fill_missing::FillMissingTransform;
pub use outliers::DetectOutliersTransform;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::TransformError;
use crate::types::{Stage, StageParameters};

/// One pipeline stage's dataset transformation.
pub trait StageTransform: Send + Sync {
    /// The stage this transform implements.
    fn stage(&self) -> Stage;

    /// Run the transform on `input`, writing the stage's output artifact
    /// and returning its path.
    fn transform(
        &self,
        input: &Path,
        params: &StageParameters,
    ) -> Result<PathBuf, TransformError>;
}

/// The built-in transform for a stage.
#[must_use]
pub fn transform_for(stage: Stage) -> Arc<dyn StageTransform> {
    match stage {
        Stage::FillMissing => Arc::new(FillMissingTransform),
        Stage::DetectOutliers => Arc::new(DetectOutliersTransform),
        Stage::FeatureExtraction => Arc::new(FeatureExtractionTransform),
    }
}

/// Numeric column contents as optional floats, in row order.
pub(crate) fn column_values(
    df: &polars::prelude::DataFrame,
    name: &str,
) -> Result<Vec<Option<f64>>, TransformError> {
    use polars::prelude::*;
    let series = df
        .column(name)?
        .as_materialized_series()
        .cast(&DataType::Float64)?;
    Ok(series.f64()?.into_iter().collect())
}

/// Mean over the present values, `None` if every value is missing.
pub(crate) fn mean_of(values: &[Option<f64>]) -> Option<f64> {
    let mut sum = 0.0;
    let mut count = 0usize;
    for v in values.iter().flatten() {
        sum += v;
        count += 1;
    }
    if count == 0 { None } else { Some(sum / count as f64) }
}

/// Linear-interpolation quantile over an ascending slice. `q` in [0, 1].
pub(crate) fn quantile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = (sorted.len() - 1) as f64 * q;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * frac)
}
