//! Fill-missing stage: imputes missing values in numeric columns.

use polars::prelude::*;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{StageTransform, column_values, mean_of};
use crate::error::TransformError;
use crate::types::{FillMethod, Stage, StageParameters};
use crate::utils::{numeric_column_names, read_csv, stage_output_path, write_csv_atomic};

/// Imputes missing numeric values by column mean, a user constant, or
/// linear interpolation. Non-numeric columns and numeric columns without
/// missing values pass through untouched; a dataset with no numeric
/// columns is a no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct FillMissingTransform;

impl StageTransform for FillMissingTransform {
    fn stage(&self) -> Stage {
        Stage::FillMissing
    }

    fn transform(
        &self,
        input: &Path,
        params: &StageParameters,
    ) -> Result<PathBuf, TransformError> {
        let mut df = read_csv(input)?;

        for name in numeric_column_names(&df) {
            let values = column_values(&df, &name)?;
            if !values.iter().any(Option::is_none) {
                continue;
            }
            debug!(column = %name, method = ?params.fill_method, "filling missing values");

            let filled: Vec<f64> = match params.fill_method {
                FillMethod::Mean => {
                    let mean = mean_of(&values).ok_or_else(|| {
                        TransformError::Failed(format!(
                            "column '{name}' has no values to compute a mean from"
                        ))
                    })?;
                    values.iter().map(|v| v.unwrap_or(mean)).collect()
                }
                FillMethod::Constant => {
                    let constant = params.fill_value.ok_or_else(|| {
                        TransformError::Failed(
                            "constant fill requires a fill_value".to_string(),
                        )
                    })?;
                    values.iter().map(|v| v.unwrap_or(constant)).collect()
                }
                FillMethod::Linear => interpolate_linear(&values).ok_or_else(|| {
                    TransformError::Failed(format!(
                        "column '{name}' has no values to interpolate from"
                    ))
                })?,
            };

            df.replace(&name, Series::new(name.as_str().into(), filled))?;
        }

        let output = stage_output_path(input, Stage::FillMissing);
        write_csv_atomic(&mut df, &output)?;
        Ok(output)
    }
}

/// Linear interpolation over gaps. Interior gaps are interpolated between
/// the neighboring present values; leading/trailing gaps are clamped to
/// the nearest present value. Returns `None` when no value is present.
fn interpolate_linear(values: &[Option<f64>]) -> Option<Vec<f64>> {
    let known: Vec<(usize, f64)> = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|v| (i, v)))
        .collect();
    let (&(first_idx, first), &(last_idx, last)) = (known.first()?, known.last()?);

    let mut out = Vec::with_capacity(values.len());
    let mut window = 0usize;
    for (i, v) in values.iter().enumerate() {
        if let Some(v) = v {
            out.push(*v);
            continue;
        }
        if i < first_idx {
            out.push(first);
        } else if i > last_idx {
            out.push(last);
        } else {
            // Interior gap: find the bracketing known points.
            while known[window + 1].0 < i {
                window += 1;
            }
            let (lo_idx, lo) = known[window];
            let (hi_idx, hi) = known[window + 1];
            let frac = (i - lo_idx) as f64 / (hi_idx - lo_idx) as f64;
            out.push(lo + (hi - lo) * frac);
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("dataset-pipeline-fill-{name}"));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_input(dir: &Path, mut df: DataFrame) -> PathBuf {
        let path = dir.join("input.csv");
        write_csv_atomic(&mut df, &path).unwrap();
        path
    }

    fn column(df: &DataFrame, name: &str) -> Vec<Option<f64>> {
        column_values(df, name).unwrap()
    }

    #[test]
    fn test_mean_fill() {
        let dir = scratch_dir("mean");
        let input = write_input(
            &dir,
            df!["x" => [Some(1.0f64), None, Some(3.0)]].unwrap(),
        );

        let out = FillMissingTransform
            .transform(&input, &StageParameters::default())
            .unwrap();
        assert_eq!(out, dir.join("input_filled.csv"));

        let result = read_csv(&out).unwrap();
        assert_eq!(column(&result, "x"), vec![Some(1.0), Some(2.0), Some(3.0)]);
    }

    #[test]
    fn test_constant_fill() {
        let dir = scratch_dir("constant");
        let input = write_input(
            &dir,
            df!["x" => [None, Some(5.0f64), None]].unwrap(),
        );

        let params = StageParameters {
            fill_method: FillMethod::Constant,
            fill_value: Some(-1.0),
            ..Default::default()
        };
        let out = FillMissingTransform.transform(&input, &params).unwrap();

        let result = read_csv(&out).unwrap();
        assert_eq!(
            column(&result, "x"),
            vec![Some(-1.0), Some(5.0), Some(-1.0)]
        );
    }

    #[test]
    fn test_linear_fill_interpolates_and_clamps_edges() {
        let dir = scratch_dir("linear");
        let input = write_input(
            &dir,
            df!["x" => [None, Some(2.0f64), None, None, Some(8.0), None]].unwrap(),
        );

        let params = StageParameters {
            fill_method: FillMethod::Linear,
            ..Default::default()
        };
        let out = FillMissingTransform.transform(&input, &params).unwrap();

        let result = read_csv(&out).unwrap();
        assert_eq!(
            column(&result, "x"),
            vec![
                Some(2.0), // leading gap clamped
                Some(2.0),
                Some(4.0), // interior interpolated
                Some(6.0),
                Some(8.0),
                Some(8.0), // trailing gap clamped
            ]
        );
    }

    #[test]
    fn test_no_numeric_columns_is_noop() {
        let dir = scratch_dir("strings");
        let input = write_input(
            &dir,
            df!["name" => ["a", "b", "c"]].unwrap(),
        );

        let out = FillMissingTransform
            .transform(&input, &StageParameters::default())
            .unwrap();
        let result = read_csv(&out).unwrap();
        assert_eq!(result.shape(), (3, 1));
    }

    #[test]
    fn test_interpolate_linear_needs_at_least_one_value() {
        assert_eq!(interpolate_linear(&[None, None]), None);
        assert_eq!(interpolate_linear(&[Some(5.0)]), Some(vec![5.0]));
    }

    #[test]
    fn test_rerun_overwrites_same_output() {
        let dir = scratch_dir("rerun");
        let input = write_input(
            &dir,
            df!["x" => [Some(1.0f64), None, Some(3.0)]].unwrap(),
        );

        let params = StageParameters::default();
        let first = FillMissingTransform.transform(&input, &params).unwrap();
        let second = FillMissingTransform.transform(&input, &params).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            std::fs::read_to_string(&first).unwrap(),
            std::fs::read_to_string(&second).unwrap()
        );
    }
}
