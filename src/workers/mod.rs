use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tokio::task;
use tracing::{error, info, warn};

use crate::analysis::{engine, loader, AnalysisFunction};
use crate::error::{JobError, JobResult};
use crate::jobs::{JobPatch, JobStore};
use crate::models::{Job, JobStatus};

/// Progress band reserved for the analysis function; the orchestrator owns
/// [0, 10) for setup and (95, 100] for finalization.
pub const PROGRESS_FLOOR: f64 = 10.0;
pub const PROGRESS_CEILING: f64 = 95.0;

pub fn clamp_progress(percent: f64) -> f64 {
    percent.clamp(PROGRESS_FLOOR, PROGRESS_CEILING)
}

/// Runs the analysis pipeline out-of-band. `start` returns as soon as the
/// job is marked processing; the execution itself happens on the blocking
/// thread pool behind its own error boundary, and clients observe it only
/// by polling the job row.
#[derive(Clone)]
pub struct Orchestrator {
    jobs: Arc<JobStore>,
    analysis: Arc<dyn AnalysisFunction>,
    outputs_dir: PathBuf,
}

impl Orchestrator {
    pub fn new(
        jobs: Arc<JobStore>,
        analysis: Arc<dyn AnalysisFunction>,
        outputs_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            jobs,
            analysis,
            outputs_dir: outputs_dir.into(),
        }
    }

    /// Require `queued`, mark `processing`, schedule the execution, return.
    pub async fn start(&self, user_id: &str, job_id: &str) -> JobResult<Job> {
        let job = self.jobs.get(user_id, job_id)?;
        if job.status != JobStatus::Queued {
            return Err(JobError::InvalidTransition {
                current: job.status,
            });
        }

        let job = self.jobs.transition(
            user_id,
            job_id,
            JobStatus::Processing,
            JobPatch {
                progress_percent: Some(1.0),
                error_message: Some(None),
                ..Default::default()
            },
        )?;

        let runner = self.clone();
        let user_id = user_id.to_string();
        let job_id = job_id.to_string();
        tokio::spawn(async move {
            let result =
                task::spawn_blocking(move || runner.execute(&user_id, &job_id)).await;
            if let Err(err) = result {
                error!(error = %err, "analysis task panicked");
            }
        });

        Ok(job)
    }

    /// The execution's error boundary: every failure becomes a terminal
    /// `failed` row with the message preserved and prior parameters intact.
    fn execute(&self, user_id: &str, job_id: &str) {
        info!(job_id, user_id, "starting analysis");
        if let Err(message) = self.run_pipeline(user_id, job_id) {
            warn!(job_id, error = %message, "analysis failed");
            let patch = JobPatch {
                progress_percent: Some(100.0),
                error_message: Some(Some(message)),
                ..Default::default()
            };
            if let Err(err) = self.jobs.transition(user_id, job_id, JobStatus::Failed, patch) {
                error!(job_id, error = %err, "failed to record job failure");
            }
        }
    }

    fn run_pipeline(&self, user_id: &str, job_id: &str) -> Result<(), String> {
        let started = Instant::now();

        let job = self.jobs.get(user_id, job_id).map_err(|err| err.to_string())?;
        let input_file = job
            .input_file
            .as_deref()
            .ok_or_else(|| "Input file is missing for this job".to_string())?;
        let input_path = Path::new(input_file);
        if !input_path.exists() {
            return Err(format!("Input file not found: {}", input_path.display()));
        }

        let table = loader::load(input_path).map_err(|err| err.to_string())?;
        self.report_progress(user_id, job_id, PROGRESS_FLOOR);

        let jobs = Arc::clone(&self.jobs);
        let progress_user = user_id.to_string();
        let progress_job = job_id.to_string();
        let mut progress = move |percent: f64, message: &str| {
            let clamped = clamp_progress(percent);
            if let Err(err) = jobs.update_progress(&progress_user, &progress_job, clamped) {
                warn!(job_id = %progress_job, error = %err, "progress update failed");
            }
            info!(job_id = %progress_job, progress = clamped, message, "analysis progress");
        };

        let outcome = self
            .analysis
            .run(&table, &job.parameters, &mut progress)
            .map_err(|err| err.to_string())?;

        let output_dir = self.outputs_dir.join(user_id).join(job_id);
        fs::create_dir_all(&output_dir).map_err(|err| err.to_string())?;
        let csv_path = output_dir.join("contributions.csv");
        let (sample_count, model_type) =
            engine::write_contributions(&table, &csv_path).map_err(|err| err.to_string())?;

        let elapsed = started.elapsed().as_secs_f64();
        let mut parameters = job.parameters.clone();
        parameters.insert("sample_count".to_string(), json!(sample_count));
        parameters.insert("model_type".to_string(), json!(model_type));
        parameters.insert(
            "processing_time_seconds".to_string(),
            json!((elapsed * 1000.0).round() / 1000.0),
        );
        parameters.insert(
            "models_run".to_string(),
            Value::Array(outcome.models_run.iter().map(|m| json!(m)).collect()),
        );

        self.jobs
            .transition(
                user_id,
                job_id,
                JobStatus::Completed,
                JobPatch {
                    progress_percent: Some(100.0),
                    error_message: Some(None),
                    results_csv: Some(csv_path.to_string_lossy().into_owned()),
                    output_dir: Some(output_dir.to_string_lossy().into_owned()),
                    parameters: Some(parameters),
                    ..Default::default()
                },
            )
            .map_err(|err| err.to_string())?;

        info!(job_id, user_id, "analysis completed");
        Ok(())
    }

    fn report_progress(&self, user_id: &str, job_id: &str, percent: f64) {
        if let Err(err) = self.jobs.update_progress(user_id, job_id, percent) {
            warn!(job_id, error = %err, "progress update failed");
        }
    }
}
