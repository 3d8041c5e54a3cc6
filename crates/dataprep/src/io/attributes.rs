//! Per-image visual attribute tables (shape, colour and texture statistics).
//!
//! Tables are read from JSON, either as an array of records or as the
//! column-oriented `{column: {row: value}}` layout, or from CSV with a header
//! row. Missing cells count as zero. When an `image_id` column is present the
//! rows are put in natural order of their ids, matching the order in which
//! image files are paired.

use std::fs;
use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    algorithms::{binning::BinSpec, sorting::natural_cmp},
    error::{DataPrepError, Result},
};

pub const IMAGE_ID_COLUMN: &str = "image_id";

/// Cells of a table before numeric conversion, row-major
struct RawTable {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl RawTable {
    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    fn from_json(content: &str) -> Result<Self> {
        match serde_json::from_str::<Value>(content)? {
            Value::Array(records) => Self::from_records(records),
            Value::Object(columns) => Self::from_columns(columns),
            _ => Err(DataPrepError::UnsupportedFileFormat(
                "visual attribute JSON must be an array of records or an object of columns".to_string(),
            )),
        }
    }

    fn from_records(records: Vec<Value>) -> Result<Self> {
        let mut columns: Vec<String> = Vec::new();
        for record in &records {
            let Value::Object(fields) = record else {
                return Err(DataPrepError::UnsupportedFileFormat(
                    "visual attribute records must be JSON objects".to_string(),
                ));
            };
            for key in fields.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }

        let rows = records
            .iter()
            .map(|record| {
                columns
                    .iter()
                    .map(|column| record.get(column).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();

        Ok(Self { columns, rows })
    }

    fn from_columns(table: serde_json::Map<String, Value>) -> Result<Self> {
        let columns: Vec<String> = table.keys().cloned().collect();

        // row labels in natural order across all columns
        let mut labels: Vec<String> = Vec::new();
        for values in table.values() {
            match values {
                Value::Object(cells) => {
                    for key in cells.keys() {
                        if !labels.contains(key) {
                            labels.push(key.clone());
                        }
                    }
                }
                Value::Array(cells) => {
                    for i in 0..cells.len() {
                        let key = i.to_string();
                        if !labels.contains(&key) {
                            labels.push(key);
                        }
                    }
                }
                _ => {
                    return Err(DataPrepError::UnsupportedFileFormat(
                        "column-oriented JSON must map each column to an object or array".to_string(),
                    ))
                }
            }
        }
        labels.sort_by(|a, b| natural_cmp(a, b));

        let rows = labels
            .iter()
            .map(|label| {
                table
                    .values()
                    .map(|values| match values {
                        Value::Object(cells) => cells.get(label).cloned(),
                        Value::Array(cells) => label
                            .parse::<usize>()
                            .ok()
                            .and_then(|i| cells.get(i).cloned()),
                        _ => None,
                    }
                    .unwrap_or(Value::Null))
                    .collect()
            })
            .collect();

        Ok(Self { columns, rows })
    }

    fn from_csv<R: std::io::Read>(reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
        let columns: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(
                (0..columns.len())
                    .map(|i| match record.get(i).map(str::trim) {
                        None | Some("") => Value::Null,
                        Some(cell) => Value::String(cell.to_string()),
                    })
                    .collect(),
            );
        }

        Ok(Self { columns, rows })
    }
}

fn numeric(cell: &Value, column: &str, row: usize) -> Result<f64> {
    let non_numeric = || DataPrepError::NonNumericAttribute {
        column: column.to_string(),
        row,
        value: cell.to_string(),
    };

    match cell {
        Value::Null => Ok(0.0),
        Value::Number(n) => n.as_f64().ok_or_else(non_numeric),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() || s.eq_ignore_ascii_case("nan") {
                return Ok(0.0);
            }
            s.parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(non_numeric)
        }
        _ => Err(non_numeric()),
    }
}

fn id_text(cell: &Value) -> String {
    match cell {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Summary of one attribute column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AttributeStats {
    pub attribute: String,
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation (`n - 1` denominator)
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

/// Numeric attribute columns, one value per image/mask pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VisualAttributeTable {
    /// `image_id` of each row, when the source has that column
    pub image_ids: Option<Vec<String>>,
    pub columns: Vec<String>,
    /// Column-major, parallel to `columns`
    pub values: Vec<Vec<f64>>,
}

impl VisualAttributeTable {
    /// Read a `.json` or `.csv` table.
    ///
    /// With `required` set, exactly those columns are kept and each must be
    /// present; otherwise every column except `image_id` is kept.
    pub fn from_file(path: &Path, required: Option<&[String]>) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);

        let raw = match extension.as_deref() {
            Some("json") => {
                let content = fs::read_to_string(path).map_err(|e| DataPrepError::path_io(path, e))?;
                RawTable::from_json(&content)?
            }
            Some("csv") => {
                let file = fs::File::open(path).map_err(|e| DataPrepError::path_io(path, e))?;
                RawTable::from_csv(file)?
            }
            _ => {
                return Err(DataPrepError::UnsupportedFileFormat(format!(
                    "visual attribute file must be .json or .csv: {}",
                    path.display()
                )))
            }
        };

        let table = Self::from_raw(raw, required)?;
        debug!(rows = table.len(), columns = table.columns.len(), ?path, "Loaded visual attributes");
        Ok(table)
    }

    pub fn from_json_str(content: &str, required: Option<&[String]>) -> Result<Self> {
        Self::from_raw(RawTable::from_json(content)?, required)
    }

    pub fn from_csv_str(content: &str, required: Option<&[String]>) -> Result<Self> {
        Self::from_raw(RawTable::from_csv(content.as_bytes())?, required)
    }

    fn from_raw(mut raw: RawTable, required: Option<&[String]>) -> Result<Self> {
        let id_index = raw.column_index(IMAGE_ID_COLUMN);

        if let Some(index) = id_index {
            raw.rows
                .sort_by(|a, b| natural_cmp(&id_text(&a[index]), &id_text(&b[index])));
        }

        let selected: Vec<String> = match required {
            Some(columns) => columns.to_vec(),
            None => raw
                .columns
                .iter()
                .filter(|c| c.as_str() != IMAGE_ID_COLUMN)
                .cloned()
                .collect(),
        };

        let mut values = Vec::with_capacity(selected.len());
        for column in &selected {
            let index = raw
                .column_index(column)
                .ok_or_else(|| DataPrepError::MissingAttribute(column.clone()))?;
            let column_values = raw
                .rows
                .iter()
                .enumerate()
                .map(|(row, cells)| numeric(&cells[index], column, row))
                .collect::<Result<Vec<f64>>>()?;
            values.push(column_values);
        }

        let image_ids = id_index.map(|index| raw.rows.iter().map(|r| id_text(&r[index])).collect());

        Ok(Self {
            image_ids,
            columns: selected,
            values,
        })
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.values
            .first()
            .map(Vec::len)
            .or_else(|| self.image_ids.as_ref().map(Vec::len))
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn column(&self, name: &str) -> Result<&[f64]> {
        self.columns
            .iter()
            .position(|c| c == name)
            .map(|i| self.values[i].as_slice())
            .ok_or_else(|| DataPrepError::MissingAttribute(name.to_string()))
    }

    /// Fail unless there is exactly one row per pair
    pub fn check_rows(&self, pairs: usize) -> Result<()> {
        if self.len() != pairs {
            return Err(DataPrepError::AttributeRowMismatch {
                rows: self.len(),
                pairs,
            });
        }
        Ok(())
    }

    pub fn stats(&self) -> Vec<AttributeStats> {
        self.columns
            .iter()
            .zip(&self.values)
            .map(|(attribute, values)| column_stats(attribute, values))
            .collect()
    }

    /// Z-score every column with its own mean and sample std. A constant
    /// column is only centred.
    pub fn normalized(&self) -> Self {
        let values = self
            .stats()
            .iter()
            .zip(&self.values)
            .map(|(stats, values)| {
                let scale = if stats.std > 0.0 { stats.std } else { 1.0 };
                values.iter().map(|v| (v - stats.mean) / scale).collect()
            })
            .collect();

        Self {
            image_ids: self.image_ids.clone(),
            columns: self.columns.clone(),
            values,
        }
    }

    /// Bins and bin weights of every column
    pub fn bin_specs(&self) -> Vec<BinSpec> {
        self.columns
            .iter()
            .zip(&self.values)
            .map(|(attribute, values)| BinSpec::fit(attribute.clone(), values))
            .collect()
    }

    /// Per-row sample weight for every column, parallel to `columns`
    pub fn sample_weights(&self) -> Vec<Vec<f64>> {
        self.bin_specs()
            .iter()
            .zip(&self.values)
            .map(|(spec, values)| spec.sample_weights(values))
            .collect()
    }
}

fn column_stats(attribute: &str, values: &[f64]) -> AttributeStats {
    let count = values.len();
    let n = count as f64;
    let mean = if count > 0 { values.iter().sum::<f64>() / n } else { 0.0 };
    let std = if count > 1 {
        (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
    } else {
        0.0
    };

    AttributeStats {
        attribute: attribute.to_string(),
        count,
        mean,
        std,
        min: values.iter().copied().fold(f64::INFINITY, f64::min),
        max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    }
}

const MAX_COLUMN_NAME_LEN: usize = 25;

fn validation(error: &str, description: impl Into<String>) -> DataPrepError {
    DataPrepError::Validation {
        error: error.to_string(),
        description: description.into(),
    }
}

/// Validate an uploaded stratification CSV and rewrite it with rows in natural
/// `image_id` order.
///
/// Returns the attribute column names, i.e. every kept column except
/// `image_id`. On failure the file is deleted.
pub fn validate_stratification_file(path: &Path, expected_rows: usize) -> Result<Vec<String>> {
    match check_and_rewrite(path, expected_rows) {
        Ok(columns) => Ok(columns),
        Err(err) => {
            if let Err(remove_err) = fs::remove_file(path) {
                warn!(?path, %remove_err, "Could not delete rejected stratification file");
            }
            Err(match err {
                err @ DataPrepError::Validation { .. } => err,
                other => validation("Validation Error", other.to_string()),
            })
        }
    }
}

fn check_and_rewrite(path: &Path, expected_rows: usize) -> Result<Vec<String>> {
    let file = fs::File::open(path).map_err(|e| DataPrepError::path_io(path, e))?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(file);

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let mut rows: Vec<Vec<String>> = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push((0..headers.len()).map(|i| record.get(i).unwrap_or("").to_string()).collect());
    }

    // index-generated columns
    let mut keep: Vec<usize> = (0..headers.len())
        .filter(|&i| !headers[i].to_ascii_lowercase().starts_with("unnamed"))
        .collect();

    if keep.is_empty() || rows.is_empty() {
        return Err(validation(
            "CSV File Error",
            "The CSV file is empty or missing headers. Ensure that the first row contains the column names.",
        ));
    }

    if rows.len() != expected_rows {
        return Err(validation(
            "Row Count Mismatch",
            format!(
                "Expected {expected_rows} rows (one per image), but found {}. \
                 Ensure that each image in the dataset has a corresponding row in the CSV file.",
                rows.len()
            ),
        ));
    }

    keep.retain(|&i| rows.iter().any(|row| !row[i].trim().is_empty()));
    keep.retain(|&i| !headers[i].trim().is_empty());
    let names: Vec<String> = keep.iter().map(|&i| headers[i].trim().to_string()).collect();

    let id_position = names
        .iter()
        .position(|n| n == IMAGE_ID_COLUMN)
        .ok_or_else(|| {
            validation(
                "Missing Column",
                "The CSV file must include a column named 'image_id'. \
                 Ensure that the first row contains 'image_id' as a header.",
            )
        })?;
    let id_index = keep[id_position];

    if rows.iter().any(|row| row[id_index].contains(' ')) {
        return Err(validation(
            "Invalid 'image_id' Values",
            "The 'image_id' column contains values with spaces. \
             Ensure that all 'image_id' values are free of spaces.",
        ));
    }

    let invalid: Vec<&String> = names
        .iter()
        .filter(|n| n.contains(' ') || !(1..=MAX_COLUMN_NAME_LEN).contains(&n.chars().count()))
        .collect();
    if !invalid.is_empty() {
        return Err(validation(
            "Invalid column names",
            format!(
                "Column names must be between 1 and {MAX_COLUMN_NAME_LEN} characters long and cannot contain spaces. \
                 The following invalid columns were found: {invalid:?}. Please rename these columns and try again."
            ),
        ));
    }

    rows.sort_by(|a, b| natural_cmp(&a[id_index], &b[id_index]));

    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(&names)?;
    for row in &rows {
        writer.write_record(keep.iter().map(|&i| row[i].as_str()))?;
    }
    writer.flush().map_err(|e| DataPrepError::path_io(path, e))?;

    Ok(names.into_iter().filter(|n| n != IMAGE_ID_COLUMN).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_json_records_with_missing_values() {
        let json = r#"[
            {"image_id": "img_10", "L": 3.0, "a": null},
            {"image_id": "img_2", "L": 1.5},
            {"image_id": "img_1", "L": "2", "a": 4}
        ]"#;
        let table = VisualAttributeTable::from_json_str(json, None).expect("Should parse");

        assert_eq!(table.columns, vec!["L", "a"]);
        assert_eq!(
            table.image_ids.as_deref(),
            Some(&["img_1".to_string(), "img_2".to_string(), "img_10".to_string()][..])
        );
        assert_eq!(table.column("L").expect("Should exist"), &[2.0, 1.5, 3.0]);
        assert_eq!(table.column("a").expect("Should exist"), &[4.0, 0.0, 0.0]);
    }

    #[test]
    fn test_json_columns_layout() {
        let json = r#"{"L": {"0": 1.0, "1": 2.0, "10": 5.0, "2": 3.0}, "b": [7, 8, 9]}"#;
        let table = VisualAttributeTable::from_json_str(json, None).expect("Should parse");

        assert_eq!(table.len(), 4);
        assert_eq!(table.column("L").expect("Should exist"), &[1.0, 2.0, 3.0, 5.0]);
        assert_eq!(table.column("b").expect("Should exist"), &[7.0, 8.0, 9.0, 0.0]);
    }

    #[test]
    fn test_csv_and_required_columns() {
        let csv = "image_id,L,a,b\nx_2,1,,3\nx_1,4,5,6\n";
        let required = vec!["a".to_string(), "L".to_string()];
        let table = VisualAttributeTable::from_csv_str(csv, Some(&required)).expect("Should parse");

        assert_eq!(table.columns, required);
        assert_eq!(table.column("a").expect("Should exist"), &[5.0, 0.0]);
        assert_eq!(table.column("L").expect("Should exist"), &[4.0, 1.0]);

        let missing = vec!["roundness".to_string()];
        let err = VisualAttributeTable::from_csv_str(csv, Some(&missing)).expect_err("Should fail");
        assert!(matches!(err, DataPrepError::MissingAttribute(ref c) if c == "roundness"));
    }

    #[test]
    fn test_non_numeric_cell_names_column() {
        let csv = "L\n1\nbright\n";
        let err = VisualAttributeTable::from_csv_str(csv, None).expect_err("Should fail");
        assert!(matches!(err, DataPrepError::NonNumericAttribute { ref column, row: 1, .. } if column == "L"));
    }

    #[test]
    fn test_stats_and_normalisation() {
        let table = VisualAttributeTable::from_csv_str("v,c\n1,5\n2,5\n3,5\n", None).expect("Should parse");
        let stats = table.stats();
        assert_eq!(stats[0].mean, 2.0);
        assert_eq!(stats[0].std, 1.0);
        assert_eq!((stats[0].min, stats[0].max), (1.0, 3.0));

        let normalized = table.normalized();
        assert_eq!(normalized.column("v").expect("Should exist"), &[-1.0, 0.0, 1.0]);
        assert_eq!(normalized.column("c").expect("Should exist"), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_sample_weights_follow_bins() {
        let table = VisualAttributeTable::from_csv_str("v\n1\n1\n1\n1\n9\n", None).expect("Should parse");
        let weights = table.sample_weights();
        assert_eq!(weights.len(), 1);
        assert_eq!(weights[0].len(), 5);
        assert!(weights[0][4] > weights[0][0]);
    }

    #[test]
    fn test_row_count_check() {
        let table = VisualAttributeTable::from_csv_str("v\n1\n2\n", None).expect("Should parse");
        assert!(table.check_rows(2).is_ok());
        assert!(matches!(
            table.check_rows(3),
            Err(DataPrepError::AttributeRowMismatch { rows: 2, pairs: 3 })
        ));
    }

    #[test]
    fn test_unsupported_extension() {
        let err = VisualAttributeTable::from_file(Path::new("attrs.xlsx"), None).expect_err("Should fail");
        assert!(matches!(err, DataPrepError::UnsupportedFileFormat(_)));
    }

    fn write_csv(content: &str) -> (TempDir, std::path::PathBuf) {
        let dir = TempDir::new().expect("Should create temp dir");
        let path = dir.path().join("strat.csv");
        fs::write(&path, content).expect("Should write");
        (dir, path)
    }

    #[test]
    fn test_stratification_file_is_sorted_and_cleaned() {
        let (_dir, path) = write_csv("Unnamed: 0,image_id,L,empty,a\n0,img_10,1,,2\n1,img_2,3,,4\n2,img_1,5,,6\n");

        let columns = validate_stratification_file(&path, 3).expect("Should validate");
        assert_eq!(columns, vec!["L", "a"]);

        let rewritten = fs::read_to_string(&path).expect("Should still exist");
        assert_eq!(rewritten, "image_id,L,a\nimg_1,5,6\nimg_2,3,4\nimg_10,1,2\n");
    }

    #[test]
    fn test_stratification_file_rejections_delete_file() {
        let cases = [
            ("image_id,L\nimg_1,1\n", 2, "Row Count Mismatch"),
            ("name,L\nimg_1,1\n", 1, "Missing Column"),
            ("image_id,L\nimg 1,1\n", 1, "Invalid 'image_id' Values"),
            ("image_id,bad name\nimg_1,1\n", 1, "Invalid column names"),
            ("image_id,L\n", 0, "CSV File Error"),
        ];

        for (content, rows, expected) in cases {
            let (_dir, path) = write_csv(content);
            let err = validate_stratification_file(&path, rows).expect_err("Should reject");
            match err {
                DataPrepError::Validation { error, .. } => assert_eq!(error, expected),
                other => panic!("unexpected error {other:?}"),
            }
            assert!(!path.exists(), "rejected file must be deleted");
        }
    }
}
