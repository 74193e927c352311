mod common;

use anyhow::Result;
use backend::error::JobError;
use backend::jobs::JobPatch;
use backend::models::JobStatus;
use common::TestEnv;
use serde_json::{json, Map, Value};

fn parameters(dataset: &str) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("dataset_name".to_string(), json!(dataset));
    map
}

#[tokio::test]
async fn new_jobs_start_queued_with_zero_progress() -> Result<()> {
    let env = TestEnv::new()?;
    let user = env.register_user("pat@example.com")?;

    let job = env.jobs.create(&user.user_id, parameters("survey"))?;
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.progress_percent, 0.0);
    assert!(job.completed_at.is_none());
    assert!(job.error_message.is_none());
    assert_eq!(job.parameters.get("dataset_name"), Some(&json!("survey")));

    let fetched = env.jobs.get(&user.user_id, &job.job_id)?;
    assert_eq!(fetched.job_id, job.job_id);

    Ok(())
}

#[tokio::test]
async fn jobs_are_invisible_to_non_owners() -> Result<()> {
    let env = TestEnv::new()?;
    let owner = env.register_user("owner@example.com")?;
    let other = env.register_user("other@example.com")?;

    let job = env.jobs.create(&owner.user_id, Map::new())?;

    assert!(matches!(
        env.jobs.get(&other.user_id, &job.job_id),
        Err(JobError::UnknownJob)
    ));
    assert!(matches!(
        env.jobs.transition(
            &other.user_id,
            &job.job_id,
            JobStatus::Processing,
            JobPatch::default()
        ),
        Err(JobError::UnknownJob)
    ));
    assert!(matches!(
        env.jobs.update_progress(&other.user_id, &job.job_id, 50.0),
        Err(JobError::UnknownJob)
    ));
    assert!(env.jobs.list(&other.user_id, None, 100)?.is_empty());

    // The owner still sees it.
    assert_eq!(env.jobs.list(&owner.user_id, None, 100)?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn completed_at_is_set_exactly_for_terminal_statuses() -> Result<()> {
    let env = TestEnv::new()?;
    let user = env.register_user("pat@example.com")?;
    let job = env.jobs.create(&user.user_id, Map::new())?;

    let processing = env.jobs.transition(
        &user.user_id,
        &job.job_id,
        JobStatus::Processing,
        JobPatch {
            progress_percent: Some(40.0),
            ..Default::default()
        },
    )?;
    assert!(processing.completed_at.is_none());

    let completed = env.jobs.transition(
        &user.user_id,
        &job.job_id,
        JobStatus::Completed,
        JobPatch::default(),
    )?;
    assert!(completed.completed_at.is_some());
    // Completed defaults the progress to 100 when not overridden.
    assert_eq!(completed.progress_percent, 100.0);

    // Returning to a non-terminal status clears the stamp again.
    let requeued = env.jobs.transition(
        &user.user_id,
        &job.job_id,
        JobStatus::Queued,
        JobPatch::default(),
    )?;
    assert!(requeued.completed_at.is_none());
    // Queued keeps the prior progress unless overridden.
    assert_eq!(requeued.progress_percent, 100.0);

    Ok(())
}

#[tokio::test]
async fn failed_preserves_progress_and_records_message() -> Result<()> {
    let env = TestEnv::new()?;
    let user = env.register_user("pat@example.com")?;
    let job = env.jobs.create(&user.user_id, Map::new())?;

    env.jobs.transition(
        &user.user_id,
        &job.job_id,
        JobStatus::Processing,
        JobPatch {
            progress_percent: Some(40.0),
            ..Default::default()
        },
    )?;

    let failed = env.jobs.transition(
        &user.user_id,
        &job.job_id,
        JobStatus::Failed,
        JobPatch {
            error_message: Some(Some("tracer detection failed".to_string())),
            ..Default::default()
        },
    )?;
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.progress_percent, 40.0);
    assert_eq!(failed.error_message.as_deref(), Some("tracer detection failed"));
    assert!(failed.completed_at.is_some());

    Ok(())
}

#[tokio::test]
async fn omitted_patch_fields_keep_prior_values() -> Result<()> {
    let env = TestEnv::new()?;
    let user = env.register_user("pat@example.com")?;
    let job = env.jobs.create(&user.user_id, parameters("survey"))?;

    env.jobs.transition(
        &user.user_id,
        &job.job_id,
        JobStatus::Queued,
        JobPatch {
            input_file: Some("/tmp/input.csv".to_string()),
            error_message: Some(Some("stale error".to_string())),
            ..Default::default()
        },
    )?;

    // Nothing in this patch touches input_file or parameters.
    let updated = env.jobs.transition(
        &user.user_id,
        &job.job_id,
        JobStatus::Processing,
        JobPatch {
            error_message: Some(None),
            ..Default::default()
        },
    )?;
    assert_eq!(updated.input_file.as_deref(), Some("/tmp/input.csv"));
    assert_eq!(updated.parameters.get("dataset_name"), Some(&json!("survey")));
    assert!(updated.error_message.is_none());

    Ok(())
}

#[tokio::test]
async fn list_orders_newest_first_and_filters_by_status() -> Result<()> {
    let env = TestEnv::new()?;
    let user = env.register_user("pat@example.com")?;

    let first = env.jobs.create(&user.user_id, Map::new())?;
    let second = env.jobs.create(&user.user_id, Map::new())?;
    let third = env.jobs.create(&user.user_id, Map::new())?;

    env.jobs.transition(
        &user.user_id,
        &second.job_id,
        JobStatus::Completed,
        JobPatch::default(),
    )?;

    let all = env.jobs.list(&user.user_id, None, 100)?;
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].job_id, third.job_id);
    assert_eq!(all[2].job_id, first.job_id);

    let completed = env.jobs.list(&user.user_id, Some("completed"), 100)?;
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].job_id, second.job_id);

    let limited = env.jobs.list(&user.user_id, None, 2)?;
    assert_eq!(limited.len(), 2);

    let err = env.jobs.list(&user.user_id, Some("paused"), 100).unwrap_err();
    assert!(matches!(err, JobError::InvalidStatus(ref raw) if raw == "paused"));

    Ok(())
}

#[tokio::test]
async fn progress_updates_require_an_existing_job() -> Result<()> {
    let env = TestEnv::new()?;
    let user = env.register_user("pat@example.com")?;

    let err = env
        .jobs
        .update_progress(&user.user_id, "no-such-job", 50.0)
        .unwrap_err();
    assert!(matches!(err, JobError::UnknownJob));

    let job = env.jobs.create(&user.user_id, Map::new())?;
    let updated = env.jobs.update_progress(&user.user_id, &job.job_id, 37.5)?;
    assert_eq!(updated.progress_percent, 37.5);

    Ok(())
}

#[tokio::test]
async fn save_upload_persists_bytes_and_requeues_the_job() -> Result<()> {
    let env = TestEnv::new()?;
    let user = env.register_user("pat@example.com")?;
    let job = env.jobs.create(&user.user_id, Map::new())?;

    let path = env
        .jobs
        .save_upload(&user.user_id, &job.job_id, "field-data.txt", b"a\tb\n")?;
    assert!(path.ends_with("input.txt"));
    assert_eq!(std::fs::read(&path)?, b"a\tb\n");

    let job = env.jobs.get(&user.user_id, &job.job_id)?;
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.input_file.as_deref(), Some(path.to_string_lossy().as_ref()));

    // No extension falls back to .csv.
    let other = env.jobs.create(&user.user_id, Map::new())?;
    let path = env
        .jobs
        .save_upload(&user.user_id, &other.job_id, "data", b"x,y\n")?;
    assert!(path.ends_with("input.csv"));

    Ok(())
}
