use std::fs;
use std::path::{Path, PathBuf};

use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;
use uuid::Uuid;

use crate::db::{DbConnection, DbPool};
use crate::error::{JobError, JobResult};
use crate::models::{encode_parameters, Job, JobRecord, JobStatus, NewJob};
use crate::schema::jobs;

/// Field-level overrides for a status transition. Omitted fields keep their
/// prior values; `completed_at` is governed by the terminal rule alone.
/// `error_message` is a double Option so a transition can keep (None),
/// clear (Some(None)), or set (Some(Some(_))) the stored message.
#[derive(Debug, Default)]
pub struct JobPatch {
    pub progress_percent: Option<f64>,
    pub error_message: Option<Option<String>>,
    pub input_file: Option<String>,
    pub results_csv: Option<String>,
    pub parameters: Option<Map<String, Value>>,
    pub output_dir: Option<String>,
    pub completed_at: Option<NaiveDateTime>,
}

/// The decoded contributions artifact of a completed job.
#[derive(Debug, Clone, Serialize)]
pub struct JobResults {
    pub job_id: String,
    pub user_id: String,
    pub csv_file_name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
    pub total_rows: usize,
    pub dataset_name: Option<String>,
    pub model_type: Option<String>,
    pub models_run: Vec<String>,
}

/// Tenant-scoped job CRUD and status transitions. Every operation keys on
/// `(user_id, job_id)`; a job owned by someone else is indistinguishable
/// from a job that does not exist.
pub struct JobStore {
    pool: DbPool,
    uploads_dir: PathBuf,
}

impl JobStore {
    pub fn new(pool: DbPool, uploads_dir: impl Into<PathBuf>) -> Self {
        Self {
            pool,
            uploads_dir: uploads_dir.into(),
        }
    }

    fn conn(&self) -> JobResult<DbConnection> {
        Ok(self.pool.get()?)
    }

    pub fn create(&self, user_id: &str, parameters: Map<String, Value>) -> JobResult<Job> {
        let mut conn = self.conn()?;
        let new_job = NewJob {
            job_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            status: JobStatus::Queued.as_str().to_string(),
            progress_percent: 0.0,
            parameters: encode_parameters(&parameters)?,
            created_at: Utc::now().naive_utc(),
        };

        diesel::insert_into(jobs::table)
            .values(&new_job)
            .execute(&mut conn)?;

        info!(job_id = %new_job.job_id, user_id, "created job");
        let record = find_record(&mut conn, user_id, &new_job.job_id)?.ok_or(JobError::UnknownJob)?;
        Job::try_from(record)
    }

    pub fn get(&self, user_id: &str, job_id: &str) -> JobResult<Job> {
        let mut conn = self.conn()?;
        let record = find_record(&mut conn, user_id, job_id)?.ok_or(JobError::UnknownJob)?;
        Job::try_from(record)
    }

    /// Read-modify-write inside one immediate transaction so concurrent
    /// writers to the same row serialize instead of losing updates.
    pub fn transition(
        &self,
        user_id: &str,
        job_id: &str,
        status: JobStatus,
        patch: JobPatch,
    ) -> JobResult<Job> {
        let mut conn = self.conn()?;
        let record = conn.immediate_transaction::<JobRecord, JobError, _>(|conn| {
            let existing = jobs::table
                .find(job_id)
                .filter(jobs::user_id.eq(user_id))
                .first::<JobRecord>(conn)
                .optional()?
                .ok_or(JobError::UnknownJob)?;

            let completed_at = if status.is_terminal() {
                Some(patch.completed_at.unwrap_or_else(|| Utc::now().naive_utc()))
            } else {
                None
            };
            let progress_percent = match patch.progress_percent {
                Some(value) => value,
                None if status == JobStatus::Completed => 100.0,
                None => existing.progress_percent,
            };
            let error_message = match patch.error_message {
                Some(value) => value,
                None => existing.error_message,
            };
            let input_file = patch.input_file.or(existing.input_file);
            let results_csv = patch.results_csv.or(existing.results_csv);
            let output_dir = patch.output_dir.or(existing.output_dir);
            let parameters = match patch.parameters {
                Some(map) => encode_parameters(&map)?,
                None => existing.parameters,
            };

            diesel::update(jobs::table.find(job_id).filter(jobs::user_id.eq(user_id)))
                .set((
                    jobs::status.eq(status.as_str()),
                    jobs::progress_percent.eq(progress_percent),
                    jobs::error_message.eq(error_message),
                    jobs::input_file.eq(input_file),
                    jobs::results_csv.eq(results_csv),
                    jobs::parameters.eq(parameters),
                    jobs::completed_at.eq(completed_at),
                    jobs::output_dir.eq(output_dir),
                ))
                .execute(conn)?;

            let refreshed = jobs::table
                .find(job_id)
                .filter(jobs::user_id.eq(user_id))
                .first::<JobRecord>(conn)?;
            Ok(refreshed)
        })?;

        Job::try_from(record)
    }

    /// Pure progress write; fails UnknownJob when the row is absent.
    pub fn update_progress(&self, user_id: &str, job_id: &str, percent: f64) -> JobResult<Job> {
        let mut conn = self.conn()?;
        let affected = diesel::update(jobs::table.find(job_id).filter(jobs::user_id.eq(user_id)))
            .set(jobs::progress_percent.eq(percent))
            .execute(&mut conn)?;
        if affected == 0 {
            return Err(JobError::UnknownJob);
        }

        let record = find_record(&mut conn, user_id, job_id)?.ok_or(JobError::UnknownJob)?;
        Job::try_from(record)
    }

    pub fn list(
        &self,
        user_id: &str,
        status_filter: Option<&str>,
        limit: i64,
    ) -> JobResult<Vec<Job>> {
        let mut conn = self.conn()?;
        let mut query = jobs::table
            .filter(jobs::user_id.eq(user_id))
            .into_boxed();
        if let Some(raw) = status_filter {
            let status = JobStatus::parse(raw)?;
            query = query.filter(jobs::status.eq(status.as_str()));
        }

        let records: Vec<JobRecord> = query
            .order(jobs::created_at.desc())
            .limit(limit)
            .load(&mut conn)?;
        records.into_iter().map(Job::try_from).collect()
    }

    pub fn upload_path(&self, user_id: &str, job_id: &str, original_filename: &str) -> PathBuf {
        let extension = Path::new(original_filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("csv");
        self.uploads_dir
            .join(user_id)
            .join(job_id)
            .join(format!("input.{extension}"))
    }

    /// Persist the uploaded bytes under a per-(user, job) directory, then
    /// mark the job queued with its input file recorded.
    pub fn save_upload(
        &self,
        user_id: &str,
        job_id: &str,
        original_filename: &str,
        content: &[u8],
    ) -> JobResult<PathBuf> {
        let path = self.upload_path(user_id, job_id, original_filename);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;

        self.transition(
            user_id,
            job_id,
            JobStatus::Queued,
            JobPatch {
                input_file: Some(path.to_string_lossy().into_owned()),
                ..Default::default()
            },
        )?;
        Ok(path)
    }

    /// Results of a completed job. In-progress, failed, and
    /// completed-but-missing-artifact are reported distinctly; the artifact
    /// existence check runs even when the status says completed.
    pub fn results(&self, user_id: &str, job_id: &str) -> JobResult<JobResults> {
        let job = self.get(user_id, job_id)?;

        match job.status {
            JobStatus::Queued | JobStatus::Processing => Err(JobError::ResultsNotReady),
            JobStatus::Failed => Err(JobError::JobFailed(
                job.error_message.unwrap_or_else(|| "job failed".to_string()),
            )),
            JobStatus::Completed => {
                let csv_path = job.results_csv.ok_or(JobError::MissingArtifact)?;
                let csv_path = PathBuf::from(csv_path);
                if !csv_path.exists() {
                    return Err(JobError::MissingArtifact);
                }

                let (columns, rows) = read_results_csv(&csv_path)?;
                let total_rows = rows.len();
                let models_run = job
                    .parameters
                    .get("models_run")
                    .and_then(Value::as_array)
                    .map(|values| {
                        values
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();

                Ok(JobResults {
                    job_id: job.job_id,
                    user_id: job.user_id,
                    csv_file_name: csv_path
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                    columns,
                    rows,
                    total_rows,
                    dataset_name: job
                        .parameters
                        .get("dataset_name")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    model_type: job
                        .parameters
                        .get("model_type")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    models_run,
                })
            }
        }
    }
}

fn find_record(
    conn: &mut DbConnection,
    user_id: &str,
    job_id: &str,
) -> JobResult<Option<JobRecord>> {
    Ok(jobs::table
        .find(job_id)
        .filter(jobs::user_id.eq(user_id))
        .first(conn)
        .optional()?)
}

fn read_results_csv(path: &Path) -> JobResult<(Vec<String>, Vec<Map<String, Value>>)> {
    let mut reader = csv::Reader::from_path(path)?;
    let columns: Vec<String> = reader
        .headers()?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut row = Map::new();
        for (column, cell) in columns.iter().zip(record.iter()) {
            row.insert(column.clone(), cell_to_value(cell));
        }
        rows.push(row);
    }
    Ok((columns, rows))
}

fn cell_to_value(cell: &str) -> Value {
    if cell.is_empty() {
        return Value::Null;
    }
    match cell.parse::<f64>() {
        Ok(number) => serde_json::Number::from_f64(number)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Err(_) => Value::String(cell.to_string()),
    }
}
