//! Feature-extraction stage: drops correlated features and selects the
//! leading share of what remains.

use polars::prelude::*;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{StageTransform, column_values};
use crate::error::TransformError;
use crate::types::{Stage, StageParameters};
use crate::utils::{numeric_column_names, read_csv, stage_output_path, write_csv_atomic};

/// Column treated as the dataset's index/target: always kept, never a
/// candidate for correlation dropping or top-percent selection.
const TARGET_COLUMN: &str = "timestamp";

/// Pairwise Pearson correlation above which the later of two feature
/// columns is dropped.
const CORRELATION_THRESHOLD: f64 = 0.85;

/// Drops rows with missing values, removes numeric feature columns whose
/// absolute Pearson correlation with an earlier kept column exceeds 0.85,
/// then keeps the leading `top_percent`% of the surviving features. A
/// `timestamp` column, if present, is carried through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct FeatureExtractionTransform;

impl StageTransform for FeatureExtractionTransform {
    fn stage(&self) -> Stage {
        Stage::FeatureExtraction
    }

    fn transform(
        &self,
        input: &Path,
        params: &StageParameters,
    ) -> Result<PathBuf, TransformError> {
        let df = read_csv(input)?;
        let mut df = drop_null_rows(df)?;

        let candidates: Vec<String> = numeric_column_names(&df)
            .into_iter()
            .filter(|name| name != TARGET_COLUMN)
            .collect();
        if candidates.is_empty() {
            return Err(TransformError::Failed(
                "dataset has no numeric feature columns to select from".to_string(),
            ));
        }

        // Greedy correlation filter: the first column of each correlated
        // group survives.
        let mut kept: Vec<(String, Vec<f64>)> = Vec::new();
        for name in candidates {
            let values: Vec<f64> = column_values(&df, &name)?
                .into_iter()
                .flatten()
                .collect();
            let correlated_with = kept
                .iter()
                .find(|(_, other)| pearson(&values, other).abs() > CORRELATION_THRESHOLD)
                .map(|(other, _)| other.clone());
            match correlated_with {
                Some(other) => {
                    debug!(column = %name, with = %other, "dropping correlated feature");
                }
                None => kept.push((name, values)),
            }
        }

        // Leading top_percent% of the surviving features, at least one.
        let keep_count =
            (kept.len() * usize::from(params.top_percent)).div_ceil(100).max(1);
        kept.truncate(keep_count);

        let mut selected: Vec<String> = Vec::with_capacity(kept.len() + 1);
        if df.get_column_names().iter().any(|c| c.as_str() == TARGET_COLUMN) {
            selected.push(TARGET_COLUMN.to_string());
        }
        selected.extend(kept.into_iter().map(|(name, _)| name));
        df = df.select(selected)?;

        let output = stage_output_path(input, Stage::FeatureExtraction);
        write_csv_atomic(&mut df, &output)?;
        Ok(output)
    }
}

/// Remove every row that has a missing value in any column.
fn drop_null_rows(df: DataFrame) -> Result<DataFrame, TransformError> {
    let mut keep = vec![true; df.height()];
    for col in df.get_columns() {
        let series = col.as_materialized_series();
        if series.null_count() == 0 {
            continue;
        }
        for (i, is_null) in series.is_null().into_iter().enumerate() {
            if is_null == Some(true) {
                keep[i] = false;
            }
        }
    }
    if keep.iter().all(|k| *k) {
        return Ok(df);
    }
    let mask = BooleanChunked::from_slice("mask".into(), &keep);
    Ok(df.filter(&mask)?)
}

/// Pearson correlation coefficient; 0.0 when either column has zero
/// variance or the inputs are empty.
fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }
    let n_f = n as f64;
    let mean_a = a[..n].iter().sum::<f64>() / n_f;
    let mean_b = b[..n].iter().sum::<f64>() / n_f;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..n {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    if var_a == 0.0 || var_b == 0.0 {
        return 0.0;
    }
    cov / (var_a * var_b).sqrt()
}
