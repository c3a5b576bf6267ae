//! Detect-outliers stage: treats values outside the IQR fences.

use polars::prelude::*;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{StageTransform, column_values, mean_of, quantile_sorted};
use crate::error::TransformError;
use crate::types::{OutlierMethod, Stage, StageParameters};
use crate::utils::{numeric_column_names, read_csv, stage_output_path, write_csv_atomic};

/// Scans each numeric column for values outside the Tukey fences
/// (Q1 − 1.5·IQR, Q3 + 1.5·IQR) and either caps them at the fences or
/// replaces them with the column mean/median. A dataset with no numeric
/// columns has nothing to scan and is a transform failure.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetectOutliersTransform;

impl StageTransform for DetectOutliersTransform {
    fn stage(&self) -> Stage {
        Stage::DetectOutliers
    }

    fn transform(
        &self,
        input: &Path,
        params: &StageParameters,
    ) -> Result<PathBuf, TransformError> {
        let mut df = read_csv(input)?;

        let columns = numeric_column_names(&df);
        if columns.is_empty() {
            return Err(TransformError::Failed(
                "dataset has no numeric columns to scan for outliers".to_string(),
            ));
        }

        for name in columns {
            let values = column_values(&df, &name)?;
            let mut sorted: Vec<f64> = values.iter().copied().flatten().collect();
            if sorted.is_empty() {
                continue;
            }
            sorted.sort_by(f64::total_cmp);

            // Fences always exist once the column has at least one value.
            let q1 = quantile_sorted(&sorted, 0.25).unwrap_or(sorted[0]);
            let q3 = quantile_sorted(&sorted, 0.75).unwrap_or(sorted[0]);
            let iqr = q3 - q1;
            let lower = q1 - 1.5 * iqr;
            let upper = q3 + 1.5 * iqr;

            let replacement = match params.outlier_method {
                OutlierMethod::Cap => None,
                OutlierMethod::Mean => mean_of(&values),
                OutlierMethod::Median => quantile_sorted(&sorted, 0.5),
            };

            let mut treated = 0usize;
            let adjusted: Vec<Option<f64>> = values
                .iter()
                .map(|v| {
                    v.map(|v| {
                        if v < lower || v > upper {
                            treated += 1;
                            match replacement {
                                Some(r) => r,
                                None => v.clamp(lower, upper),
                            }
                        } else {
                            v
                        }
                    })
                })
                .collect();

            if treated > 0 {
                debug!(column = %name, treated, lower, upper, "treated outliers");
                df.replace(&name, Series::new(name.as_str().into(), adjusted))?;
            }
        }

        let output = stage_output_path(input, Stage::DetectOutliers);
        write_csv_atomic(&mut df, &output)?;
        Ok(output)
    }
}
