use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use serde_json::{Map, Value};
use tempfile::TempDir;

use backend::analysis::{
    AnalysisError, AnalysisFunction, AnalysisOutcome, SampleTable, TracerAnalysis,
};
use backend::auth::JwtCodec;
use backend::config::AppConfig;
use backend::db::{self, DbPool};
use backend::jobs::JobStore;
use backend::models::{Job, User, ROLE_USER};
use backend::workers::Orchestrator;
use backend::SessionManager;

static TRACING: Lazy<()> = Lazy::new(backend::logging::init_tracing);

pub const TEST_PASSWORD: &str = "s3cret";

#[allow(dead_code)]
pub const NITRATE_CSV: &str = "Sample_id,timestamp,Long,Lat,NO3\n\
s1,2024-03-01,12.5,47.2,3.4\n\
s2,2024-03-02,12.6,47.3,4.1\n\
s3,2024-03-03,12.7,47.4,2.9\n";

/// A fully wired backend over a throwaway data directory.
pub struct TestEnv {
    pub config: AppConfig,
    pub pool: DbPool,
    pub sessions: SessionManager,
    pub jobs: Arc<JobStore>,
    pub orchestrator: Orchestrator,
    _data_dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Result<Self> {
        Self::with_analysis(Arc::new(TracerAnalysis))
    }

    pub fn with_analysis(analysis: Arc<dyn AnalysisFunction>) -> Result<Self> {
        let data_dir = tempfile::tempdir()?;
        let config = AppConfig::for_data_dir(data_dir.path());
        Self::build(config, data_dir, analysis)
    }

    #[allow(dead_code)]
    pub fn with_config(mutate: impl FnOnce(&mut AppConfig)) -> Result<Self> {
        let data_dir = tempfile::tempdir()?;
        let mut config = AppConfig::for_data_dir(data_dir.path());
        mutate(&mut config);
        Self::build(config, data_dir, Arc::new(TracerAnalysis))
    }

    fn build(
        config: AppConfig,
        data_dir: TempDir,
        analysis: Arc<dyn AnalysisFunction>,
    ) -> Result<Self> {
        Lazy::force(&TRACING);

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        let mut conn = pool.get()?;
        db::run_migrations(&mut conn)?;
        drop(conn);

        let codec = JwtCodec::from_config(&config);
        let sessions = SessionManager::new(pool.clone(), codec);
        let jobs = Arc::new(JobStore::new(pool.clone(), config.uploads_dir()));
        let orchestrator = Orchestrator::new(Arc::clone(&jobs), analysis, config.outputs_dir());

        Ok(Self {
            config,
            pool,
            sessions,
            jobs,
            orchestrator,
            _data_dir: data_dir,
        })
    }

    pub fn register_user(&self, email: &str) -> Result<User> {
        Ok(self
            .sessions
            .register(email, TEST_PASSWORD, Some("Alex Doe"), ROLE_USER)?)
    }

    /// Create a job and upload `csv` as its input, leaving it queued.
    #[allow(dead_code)]
    pub fn queued_job_with_upload(&self, user_id: &str, csv: &str) -> Result<Job> {
        let mut parameters = Map::new();
        parameters.insert(
            "dataset_name".to_string(),
            Value::String("survey".to_string()),
        );
        let job = self.jobs.create(user_id, parameters)?;
        self.jobs
            .save_upload(user_id, &job.job_id, "samples.csv", csv.as_bytes())?;
        Ok(self.jobs.get(user_id, &job.job_id)?)
    }

    /// Poll until the background execution lands in a terminal status.
    #[allow(dead_code)]
    pub async fn wait_for_terminal(&self, user_id: &str, job_id: &str) -> Result<Job> {
        for _ in 0..200 {
            let job = self.jobs.get(user_id, job_id)?;
            if job.status.is_terminal() {
                return Ok(job);
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        bail!("job {job_id} did not reach a terminal status in time")
    }
}

/// Analysis double that always fails with a fixed message.
#[allow(dead_code)]
pub struct FailingAnalysis {
    pub message: &'static str,
}

impl AnalysisFunction for FailingAnalysis {
    fn run(
        &self,
        _table: &SampleTable,
        _parameters: &Map<String, Value>,
        progress: &mut dyn FnMut(f64, &str),
    ) -> Result<AnalysisOutcome, AnalysisError> {
        progress(20.0, "about to fail");
        Err(AnalysisError::Model(self.message.to_string()))
    }
}
