//! Shared utilities for the dataset pipeline.
//!
//! CSV loading/writing helpers and artifact path derivation used across
//! the stage transforms.

use polars::prelude::*;
use std::path::{Path, PathBuf};

use crate::error::TransformError;
use crate::types::Stage;

/// Check if a DataType is numeric (integer or float).
#[inline]
pub fn is_numeric_dtype(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
    )
}

/// Names of the numeric columns of a DataFrame, in column order.
pub fn numeric_column_names(df: &DataFrame) -> Vec<String> {
    df.get_columns()
        .iter()
        .filter(|col| is_numeric_dtype(col.dtype()))
        .map(|col| col.name().to_string())
        .collect()
}

/// Derive the deterministic output artifact path for a stage.
///
/// The output lives next to the input, named `{stem}_{suffix}.csv`.
/// Re-running a stage on the same input overwrites the same path, which
/// is what makes redelivered messages safe to process again.
#[must_use]
pub fn stage_output_path(input: &Path, stage: Stage) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("dataset");
    let file_name = format!("{}_{}.csv", stem, stage.output_suffix());
    match input.parent() {
        Some(dir) => dir.join(file_name),
        None => PathBuf::from(file_name),
    }
}

/// Load a CSV artifact into a DataFrame.
pub fn read_csv(path: &Path) -> Result<DataFrame, TransformError> {
    if !path.exists() {
        return Err(TransformError::Failed(format!(
            "input artifact not found: {}",
            path.display()
        )));
    }
    let df = CsvReadOptions::default()
        .with_infer_schema_length(Some(100))
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;
    Ok(df)
}

/// Write a DataFrame to a CSV artifact, complete-or-nothing.
///
/// Writes to a temporary sibling file and renames it into place, so a
/// crash mid-write never leaves a partial artifact at the target path.
pub fn write_csv_atomic(df: &mut DataFrame, path: &Path) -> Result<(), TransformError> {
    let tmp_path = path.with_extension("csv.tmp");
    {
        let mut file = std::fs::File::create(&tmp_path)?;
        CsvWriter::new(&mut file)
            .include_header(true)
            .finish(df)?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("dataset-pipeline-utils-{name}"));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_is_numeric_dtype() {
        assert!(is_numeric_dtype(&DataType::Float64));
        assert!(is_numeric_dtype(&DataType::Int32));
        assert!(!is_numeric_dtype(&DataType::String));
        assert!(!is_numeric_dtype(&DataType::Boolean));
    }

    #[test]
    fn test_numeric_column_names() {
        let df = df![
            "age" => [22i64, 38, 26],
            "name" => ["a", "b", "c"],
            "fare" => [7.25f64, 71.28, 7.92],
        ]
        .unwrap();
        assert_eq!(numeric_column_names(&df), vec!["age", "fare"]);
    }

    #[test]
    fn test_stage_output_path_is_deterministic() {
        let input = Path::new("uploads/train.csv");
        let out = stage_output_path(input, Stage::FillMissing);
        assert_eq!(out, PathBuf::from("uploads/train_filled.csv"));
        // Same input, same stage, same path.
        assert_eq!(out, stage_output_path(input, Stage::FillMissing));

        assert_eq!(
            stage_output_path(Path::new("uploads/train_filled.csv"), Stage::DetectOutliers),
            PathBuf::from("uploads/train_filled_outliers.csv")
        );
    }

    #[test]
    fn test_read_csv_missing_file() {
        let err = read_csv(Path::new("definitely/not/here.csv")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_write_then_read_roundtrip() {
        let dir = scratch_dir("roundtrip");
        let path = dir.join("out.csv");

        let mut df = df![
            "x" => [1.0f64, 2.0, 3.0],
            "y" => [10i64, 20, 30],
        ]
        .unwrap();
        write_csv_atomic(&mut df, &path).unwrap();

        // No temp file left behind.
        assert!(!path.with_extension("csv.tmp").exists());

        let back = read_csv(&path).unwrap();
        assert_eq!(back.shape(), (3, 2));
    }
}
