use std::fs;
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use super::AnalysisError;

pub const REQUIRED_COLUMNS: [&str; 4] = ["Sample_id", "timestamp", "Long", "Lat"];

pub const MAX_FILE_SIZE_MB: u64 = 50;

const LONGITUDE_RANGE: (f64, f64) = (-180.0, 180.0);
const LATITUDE_RANGE: (f64, f64) = (-90.0, 90.0);

/// A validated sample table: header row plus string cells, one Vec per row.
#[derive(Debug, Clone)]
pub struct SampleTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl SampleTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    /// Cell values of one column parsed as f64 where possible.
    pub fn numeric_column(&self, name: &str) -> Vec<Option<f64>> {
        match self.column_index(name) {
            Some(index) => self
                .rows
                .iter()
                .map(|row| row.get(index).and_then(|cell| cell.parse::<f64>().ok()))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Columns other than the required identity/coordinate fields.
    pub fn chemistry_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|column| !REQUIRED_COLUMNS.contains(&column.as_str()))
            .map(String::as_str)
            .collect()
    }
}

/// Read an input file into a [`SampleTable`] and run baseline validation.
pub fn load(path: &Path) -> Result<SampleTable, AnalysisError> {
    if !path.exists() {
        return Err(AnalysisError::Validation(format!(
            "File not found: {}",
            path.display()
        )));
    }

    let size_mb = fs::metadata(path)?.len() / (1024 * 1024);
    if size_mb > MAX_FILE_SIZE_MB {
        return Err(AnalysisError::Validation(format!(
            "File too large: {size_mb}MB (max {MAX_FILE_SIZE_MB}MB)"
        )));
    }

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    if extension != "csv" && extension != "txt" {
        return Err(AnalysisError::Validation(format!(
            "Unsupported file format: .{extension}"
        )));
    }

    let raw = fs::read_to_string(path)?;
    let delimiter = sniff_delimiter(&extension, &raw);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .from_reader(raw.as_bytes());

    let columns: Vec<String> = reader
        .headers()
        .map_err(|err| AnalysisError::Validation(format!("Failed to parse file: {err}")))?
        .iter()
        .map(normalize_header)
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record =
            record.map_err(|err| AnalysisError::Validation(format!("Failed to parse file: {err}")))?;
        rows.push(record.iter().map(str::to_string).collect());
    }

    let table = SampleTable { columns, rows };
    validate(&table)?;
    Ok(table)
}

/// Validate required columns and value ranges.
pub fn validate(table: &SampleTable) -> Result<(), AnalysisError> {
    if table.is_empty() {
        return Err(AnalysisError::Validation("File contains no data".to_string()));
    }

    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|required| table.column_index(required).is_none())
        .collect();
    if !missing.is_empty() {
        return Err(AnalysisError::Validation(format!(
            "Missing required columns: {}. Required: {}",
            missing.join(", "),
            REQUIRED_COLUMNS.join(", ")
        )));
    }

    validate_coordinates(table)?;
    validate_timestamps(table)?;
    validate_chemistry(table)?;
    Ok(())
}

fn validate_coordinates(table: &SampleTable) -> Result<(), AnalysisError> {
    let longitudes = table.numeric_column("Long");
    let latitudes = table.numeric_column("Lat");

    let missing = longitudes
        .iter()
        .zip(latitudes.iter())
        .filter(|(long, lat)| long.is_none() || lat.is_none())
        .count();
    if missing > 0 {
        return Err(AnalysisError::Validation(format!(
            "Found {missing} samples with missing coordinates"
        )));
    }

    let bad_long = longitudes
        .iter()
        .flatten()
        .filter(|value| **value < LONGITUDE_RANGE.0 || **value > LONGITUDE_RANGE.1)
        .count();
    if bad_long > 0 {
        return Err(AnalysisError::Validation(format!(
            "Found {bad_long} samples with invalid longitude (must be {} to {})",
            LONGITUDE_RANGE.0, LONGITUDE_RANGE.1
        )));
    }

    let bad_lat = latitudes
        .iter()
        .flatten()
        .filter(|value| **value < LATITUDE_RANGE.0 || **value > LATITUDE_RANGE.1)
        .count();
    if bad_lat > 0 {
        return Err(AnalysisError::Validation(format!(
            "Found {bad_lat} samples with invalid latitude (must be {} to {})",
            LATITUDE_RANGE.0, LATITUDE_RANGE.1
        )));
    }

    Ok(())
}

fn validate_timestamps(table: &SampleTable) -> Result<(), AnalysisError> {
    let index = table
        .column_index("timestamp")
        .expect("required column checked before range validation");

    let missing = table
        .rows
        .iter()
        .filter(|row| row.get(index).map(|cell| cell.is_empty()).unwrap_or(true))
        .count();
    if missing > 0 {
        return Err(AnalysisError::Validation(format!(
            "Found {missing} samples with missing timestamps"
        )));
    }

    for row in &table.rows {
        let cell = &row[index];
        if parse_timestamp(cell).is_none() {
            return Err(AnalysisError::Validation(format!(
                "Invalid timestamp format: '{cell}'"
            )));
        }
    }
    Ok(())
}

fn validate_chemistry(table: &SampleTable) -> Result<(), AnalysisError> {
    let chemistry = table.chemistry_columns();
    if chemistry.is_empty() {
        return Err(AnalysisError::Validation(
            "No chemical concentration columns found. Provide at least one chemical column \
             in addition to required fields."
                .to_string(),
        ));
    }

    for column in chemistry {
        let negative = table
            .numeric_column(column)
            .into_iter()
            .flatten()
            .filter(|value| *value < 0.0)
            .count();
        if negative > 0 {
            return Err(AnalysisError::Validation(format!(
                "Found {negative} negative values in '{column}' (concentrations must be >= 0)"
            )));
        }
    }
    Ok(())
}

fn normalize_header(raw: &str) -> String {
    let normalized = raw.trim().to_lowercase().replace('-', "_");
    match normalized.as_str() {
        "longitude" | "long" | "lon" | "lng" => "Long".to_string(),
        "latitude" | "lat" => "Lat".to_string(),
        "time_stamp" | "datetime" | "time" | "timestamp" => "timestamp".to_string(),
        "sampleid" | "sample id" | "sample_id" => "Sample_id".to_string(),
        _ => raw.trim().to_string(),
    }
}

fn sniff_delimiter(extension: &str, raw: &str) -> u8 {
    if extension == "txt" {
        let header = raw.lines().next().unwrap_or_default();
        if header.contains('\t') {
            return b'\t';
        }
    }
    b','
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.naive_utc());
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(parsed);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}
