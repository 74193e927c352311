use std::fs;
use std::path::Path;

use serde_json::{json, Map, Value};
use tracing::info;

use super::loader::{SampleTable, REQUIRED_COLUMNS};
use super::{AnalysisError, AnalysisFunction, AnalysisOutcome};

pub const MODEL_NITRATE: &str = "nitrate";
pub const MODEL_CONSERVATIVE: &str = "conservative";
pub const MODEL_COMBINED: &str = "combined";

/// Tracer keywords matched as whole words against normalized column names.
pub const CONSERVATIVE_TRACER_KEYWORDS: &[&str] = &[
    // Major ions
    "chloride", "cl", "bromide", "br", "sodium", "na", "potassium", "k", "magnesium", "mg",
    "mg2", "calcium", "ca", "ca2",
    // Isotopes
    "δ18o", "d18o", "δ2h", "d2h",
    // Other
    "conductivity", "ec",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct ModelFlags {
    pub nitrate: bool,
    pub conservative: bool,
}

impl ModelFlags {
    pub fn any(&self) -> bool {
        self.nitrate || self.conservative
    }
}

/// Lowercase, non-alphanumeric runs collapsed to single spaces. The isotope
/// delta sign survives so δ18O keys keep matching.
pub fn normalize_column(raw: &str) -> String {
    let replaced: String = raw
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == 'δ' {
                c
            } else {
                ' '
            }
        })
        .collect();
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_nitrate_name(normalized: &str) -> bool {
    normalized.contains("nitrate") || normalized.contains("no3")
}

fn is_conservative_name(normalized: &str) -> bool {
    // Whole words only; "Cluster" must not match "cl".
    normalized
        .split_whitespace()
        .any(|word| CONSERVATIVE_TRACER_KEYWORDS.contains(&word))
}

/// Decide which apportionment models apply, from column names alone.
pub fn detect_models(table: &SampleTable) -> ModelFlags {
    let normalized: Vec<String> = table.columns.iter().map(|c| normalize_column(c)).collect();

    let flags = ModelFlags {
        nitrate: normalized.iter().any(|column| is_nitrate_name(column)),
        conservative: normalized.iter().any(|column| is_conservative_name(column)),
    };
    info!(
        nitrate_detected = flags.nitrate,
        conservative_detected = flags.conservative,
        "model detection complete"
    );
    flags
}

pub fn model_type_for(flags: ModelFlags) -> &'static str {
    if flags.nitrate && flags.conservative {
        MODEL_COMBINED
    } else if flags.nitrate {
        MODEL_NITRATE
    } else {
        MODEL_CONSERVATIVE
    }
}

/// The default tracer-apportionment implementation of [`AnalysisFunction`].
pub struct TracerAnalysis;

impl AnalysisFunction for TracerAnalysis {
    fn run(
        &self,
        table: &SampleTable,
        _parameters: &Map<String, Value>,
        progress: &mut dyn FnMut(f64, &str),
    ) -> Result<AnalysisOutcome, AnalysisError> {
        progress(30.0, "Detecting tracers...");
        let flags = detect_models(table);
        if !flags.any() {
            return Err(AnalysisError::Model(
                "No supported nitrate or conservative tracer columns detected.".to_string(),
            ));
        }

        let mut models_run = Vec::new();
        let mut models = Map::new();

        if flags.nitrate {
            info!("running nitrate model");
            progress(40.0, "Running nitrate apportionment model...");
            models.insert(
                MODEL_NITRATE.to_string(),
                run_tracer_model(table, MODEL_NITRATE, |name| is_nitrate_name(name))?,
            );
            models_run.push(MODEL_NITRATE.to_string());
        }

        if flags.conservative {
            info!(rows = table.len(), "running conservative model");
            progress(55.0, "Running conservative apportionment model...");
            models.insert(
                MODEL_CONSERVATIVE.to_string(),
                run_tracer_model(table, MODEL_CONSERVATIVE, |name| is_conservative_name(name))?,
            );
            models_run.push(MODEL_CONSERVATIVE.to_string());
        }

        progress(90.0, "Finalizing results...");

        Ok(AnalysisOutcome {
            models_run,
            summary: json!({
                "total_samples": table.len(),
                "n_models": models.len(),
                "models": models,
            }),
        })
    }
}

/// Per-model summary over the columns selected by `matches`.
fn run_tracer_model(
    table: &SampleTable,
    model_type: &str,
    matches: impl Fn(&str) -> bool,
) -> Result<Value, AnalysisError> {
    let columns: Vec<&str> = table
        .chemistry_columns()
        .into_iter()
        .filter(|column| matches(&normalize_column(column)))
        .collect();

    let mut values = Vec::new();
    for column in &columns {
        values.extend(table.numeric_column(column).into_iter().flatten());
    }
    if values.is_empty() {
        return Err(AnalysisError::Model(format!(
            "{model_type} model failed: no numeric tracer measurements"
        )));
    }

    let mean = values.iter().sum::<f64>() / values.len() as f64;
    Ok(json!({
        "model_type": model_type,
        "n_samples": table.len(),
        "n_chemicals": columns.len(),
        "mean_concentration": mean,
    }))
}

/// Write the contributions artifact next to the job's outputs: base and
/// chemistry columns, then the per-model contribution columns. Returns the
/// row count and resolved model type.
pub fn write_contributions(
    table: &SampleTable,
    output_path: &Path,
) -> Result<(usize, String), AnalysisError> {
    let base_columns: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|column| table.column_index(column).is_some())
        .collect();
    let chemistry: Vec<&str> = table.chemistry_columns();
    let nitrate_columns: Vec<&str> = chemistry
        .iter()
        .copied()
        .filter(|column| is_nitrate_name(&normalize_column(column)))
        .collect();
    let conservative_columns: Vec<&str> = chemistry
        .iter()
        .copied()
        .filter(|column| !nitrate_columns.contains(column))
        .collect();

    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(output_path)?;

    let mut header: Vec<String> = base_columns
        .iter()
        .chain(chemistry.iter())
        .map(|column| column.to_string())
        .collect();
    if !nitrate_columns.is_empty() {
        header.push("nitrate_contribution".to_string());
    }
    for index in 1..=conservative_columns.len() {
        header.push(format!("conservative_contribution_{index}"));
    }
    writer.write_record(&header)?;

    let nitrate_values: Vec<Vec<Option<f64>>> = nitrate_columns
        .iter()
        .map(|column| table.numeric_column(column))
        .collect();
    let conservative_values: Vec<Vec<Option<f64>>> = conservative_columns
        .iter()
        .map(|column| table.numeric_column(column))
        .collect();

    for (row_index, row) in table.rows.iter().enumerate() {
        let mut record = Vec::with_capacity(header.len());
        for column in base_columns.iter().chain(chemistry.iter()) {
            let index = table
                .column_index(column)
                .expect("columns enumerated from the table");
            record.push(row.get(index).cloned().unwrap_or_default());
        }

        if !nitrate_columns.is_empty() {
            record.push(row_mean(&nitrate_values, row_index));
        }
        for values in &conservative_values {
            let value = values.get(row_index).copied().flatten();
            record.push(value.map(|v| v.to_string()).unwrap_or_default());
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;

    let model_type = if !nitrate_columns.is_empty() && !conservative_columns.is_empty() {
        MODEL_COMBINED
    } else if !nitrate_columns.is_empty() {
        MODEL_NITRATE
    } else {
        MODEL_CONSERVATIVE
    };
    Ok((table.len(), model_type.to_string()))
}

fn row_mean(columns: &[Vec<Option<f64>>], row_index: usize) -> String {
    let values: Vec<f64> = columns
        .iter()
        .filter_map(|column| column.get(row_index).copied().flatten())
        .collect();
    if values.is_empty() {
        String::new()
    } else {
        (values.iter().sum::<f64>() / values.len() as f64).to_string()
    }
}
