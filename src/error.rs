use thiserror::Error;

use crate::models::JobStatus;

pub type AuthResult<T> = Result<T, AuthError>;
pub type JobResult<T> = Result<T, JobError>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("an account with this email already exists")]
    EmailTaken,
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("refresh session not found")]
    SessionNotFound,
    #[error("refresh token revoked")]
    SessionRevoked,
    #[error("refresh token expired")]
    SessionExpired,
    #[error("account is inactive")]
    InactiveUser,
    #[error("administrator role required")]
    Forbidden,
    #[error("credential hashing failed: {0}")]
    Credential(String),
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("database pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(value: jsonwebtoken::errors::Error) -> Self {
        AuthError::InvalidToken(value.to_string())
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job not found")]
    UnknownJob,
    #[error("invalid job status '{0}'")]
    InvalidStatus(String),
    #[error("job cannot be processed (current status: {current})")]
    InvalidTransition { current: JobStatus },
    #[error("job is not finished yet")]
    ResultsNotReady,
    #[error("job failed: {0}")]
    JobFailed(String),
    #[error("results artifact missing for completed job")]
    MissingArtifact,
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("database pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parameter encoding error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("results parse error: {0}")]
    Csv(#[from] csv::Error),
}
