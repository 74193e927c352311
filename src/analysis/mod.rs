pub mod engine;
pub mod loader;

use serde_json::{Map, Value};
use thiserror::Error;

pub use engine::TracerAnalysis;
pub use loader::SampleTable;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Model(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub models_run: Vec<String>,
    pub summary: Value,
}

/// The apportionment model seam. The orchestrator only sees this trait, so
/// tests can substitute an implementation with scripted behavior.
pub trait AnalysisFunction: Send + Sync + 'static {
    fn run(
        &self,
        table: &SampleTable,
        parameters: &Map<String, Value>,
        progress: &mut dyn FnMut(f64, &str),
    ) -> Result<AnalysisOutcome, AnalysisError>;
}
