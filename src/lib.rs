pub mod analysis;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod models;
pub mod schema;
pub mod workers;

pub use auth::{AccessClaims, SessionManager, TokenPair};
pub use error::{AuthError, JobError};
pub use jobs::{JobPatch, JobStore};
pub use models::{Job, JobStatus, User};
pub use workers::Orchestrator;
