use std::fmt;

use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::JobError;
use crate::schema::*;

pub const ROLE_USER: &str = "user";
pub const ROLE_ADMIN: &str = "admin";

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
#[diesel(primary_key(user_id))]
pub struct User {
    pub user_id: String,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub full_name: Option<String>,
    pub role: String,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub last_seen_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub user_id: String,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub full_name: Option<String>,
    pub role: String,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub last_seen_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = refresh_sessions)]
#[diesel(primary_key(jti))]
#[diesel(belongs_to(User, foreign_key = user_id))]
pub struct RefreshSession {
    pub jti: String,
    pub user_id: String,
    pub expires_at: NaiveDateTime,
    pub created_at: NaiveDateTime,
    pub revoked_at: Option<NaiveDateTime>,
    pub replaced_by_jti: Option<String>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = refresh_sessions)]
pub struct NewRefreshSession {
    pub jti: String,
    pub user_id: String,
    pub expires_at: NaiveDateTime,
    pub created_at: NaiveDateTime,
}

/// Job lifecycle: queued -> processing -> {completed, failed}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Queued,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, JobError> {
        match raw {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(JobError::InvalidStatus(other.to_string())),
        }
    }

    /// Terminal statuses carry a non-null completed_at; non-terminal never do.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = jobs)]
#[diesel(primary_key(job_id))]
pub struct JobRecord {
    pub job_id: String,
    pub user_id: String,
    pub status: String,
    pub progress_percent: f64,
    pub error_message: Option<String>,
    pub input_file: Option<String>,
    pub results_csv: Option<String>,
    pub parameters: String,
    pub created_at: NaiveDateTime,
    pub completed_at: Option<NaiveDateTime>,
    pub output_dir: Option<String>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = jobs)]
pub struct NewJob {
    pub job_id: String,
    pub user_id: String,
    pub status: String,
    pub progress_percent: f64,
    pub parameters: String,
    pub created_at: NaiveDateTime,
}

/// A job with its parameter blob decoded into a map.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub job_id: String,
    pub user_id: String,
    pub status: JobStatus,
    pub progress_percent: f64,
    pub error_message: Option<String>,
    pub input_file: Option<String>,
    pub results_csv: Option<String>,
    pub parameters: Map<String, Value>,
    pub created_at: NaiveDateTime,
    pub completed_at: Option<NaiveDateTime>,
    pub output_dir: Option<String>,
}

impl TryFrom<JobRecord> for Job {
    type Error = JobError;

    fn try_from(record: JobRecord) -> Result<Self, Self::Error> {
        let status = JobStatus::parse(&record.status)?;
        let parameters = decode_parameters(&record.parameters)?;
        Ok(Job {
            job_id: record.job_id,
            user_id: record.user_id,
            status,
            progress_percent: record.progress_percent,
            error_message: record.error_message,
            input_file: record.input_file,
            results_csv: record.results_csv,
            parameters,
            created_at: record.created_at,
            completed_at: record.completed_at,
            output_dir: record.output_dir,
        })
    }
}

pub fn decode_parameters(raw: &str) -> Result<Map<String, Value>, JobError> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        _ => Ok(Map::new()),
    }
}

pub fn encode_parameters(parameters: &Map<String, Value>) -> Result<String, JobError> {
    Ok(serde_json::to_string(&Value::Object(parameters.clone()))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrips_through_strings() {
        for status in JobStatus::ALL {
            assert_eq!(JobStatus::parse(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn unknown_status_is_rejected() {
        let err = JobStatus::parse("paused").unwrap_err();
        assert!(matches!(err, JobError::InvalidStatus(ref s) if s == "paused"));
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn empty_parameter_blob_decodes_to_empty_map() {
        assert!(decode_parameters("").unwrap().is_empty());
        assert!(decode_parameters("{}").unwrap().is_empty());
    }
}
