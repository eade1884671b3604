//! Integration tests for the indexing job state machine.

mod common;

use common::{test_db, unique};
use quarry_db::{CreateJobRequest, Identity, JobCounters, JobStatus, Scope};
use serde_json::json;

fn request(job_id: &str, user: &str) -> CreateJobRequest {
    CreateJobRequest {
        job_id: job_id.to_string(),
        index_name: "example-com".to_string(),
        source_url: "https://example.com/docs".to_string(),
        user_id: Some(user.to_string()),
        team_id: None,
        scope: Scope::User,
        metadata: json!({}),
    }
}

fn counters(discovered: i64, processed: i64, indexed: i64, chunks: i64) -> JobCounters {
    JobCounters {
        pages_discovered: discovered,
        pages_processed: processed,
        pages_indexed: indexed,
        total_chunks: chunks,
    }
}

#[tokio::test]
async fn test_create_starts_job() {
    let Some(db) = test_db().await else { return };
    let job_id = unique("job");

    db.jobs.create(request(&job_id, "u1")).await.unwrap();
    let job = db.jobs.get(&job_id).await.unwrap().unwrap();

    assert_eq!(job.status, JobStatus::Started);
    assert_eq!(job.counters, JobCounters::default());
    assert!(job.completed_at.is_none());
    assert!(job.duration_seconds.is_none());
}

#[tokio::test]
async fn test_progress_counters_are_monotonic() {
    let Some(db) = test_db().await else { return };
    let job_id = unique("job");
    db.jobs.create(request(&job_id, "u1")).await.unwrap();

    db.jobs
        .update_status(&job_id, JobStatus::Running, Some(counters(5, 5, 4, 20)), None, None)
        .await
        .unwrap();
    // A stale update with lower counters must not move anything backwards.
    db.jobs
        .update_progress(&job_id, counters(3, 3, 2, 10))
        .await
        .unwrap();

    let job = db.jobs.get(&job_id).await.unwrap().unwrap();
    assert_eq!(job.counters, counters(5, 5, 4, 20));
    assert_eq!(job.status, JobStatus::Running);
}

#[tokio::test]
async fn test_terminal_transition_sets_timing() {
    let Some(db) = test_db().await else { return };
    let job_id = unique("job");
    db.jobs.create(request(&job_id, "u1")).await.unwrap();

    let updated = db
        .jobs
        .update_status(&job_id, JobStatus::Completed, Some(counters(9, 9, 8, 40)), None, None)
        .await
        .unwrap();
    assert!(updated);

    let job = db.jobs.get(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.completed_at.is_some());
    assert!(job.duration_seconds.is_some());
    assert!(job.duration_seconds.unwrap() >= 0.0);
}

#[tokio::test]
async fn test_terminal_jobs_are_immutable() {
    let Some(db) = test_db().await else { return };
    let job_id = unique("job");
    db.jobs.create(request(&job_id, "u1")).await.unwrap();
    db.jobs
        .update_status(&job_id, JobStatus::Failed, None, Some("crawler exploded"), None)
        .await
        .unwrap();
    let frozen = db.jobs.get(&job_id).await.unwrap().unwrap();

    // A later writer loses the race: no change at all.
    let updated = db
        .jobs
        .update_status(&job_id, JobStatus::Completed, Some(counters(99, 99, 99, 999)), None, None)
        .await
        .unwrap();
    assert!(!updated);

    let job = db.jobs.get(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_message.as_deref(), Some("crawler exploded"));
    assert_eq!(job.counters, frozen.counters);
    assert_eq!(job.completed_at, frozen.completed_at);
}

#[tokio::test]
async fn test_failure_details_preserved() {
    let Some(db) = test_db().await else { return };
    let job_id = unique("job");
    db.jobs.create(request(&job_id, "u1")).await.unwrap();

    let details = json!({"kind": "provider", "status": 503});
    db.jobs
        .update_status(
            &job_id,
            JobStatus::Failed,
            Some(counters(2, 2, 1, 3)),
            Some("embedding provider unavailable"),
            Some(&details),
        )
        .await
        .unwrap();

    let job = db.jobs.get(&job_id).await.unwrap().unwrap();
    assert_eq!(
        job.error_message.as_deref(),
        Some("embedding provider unavailable")
    );
    assert_eq!(job.error_details, Some(details));
    // Partial progress survives as evidence.
    assert_eq!(job.counters, counters(2, 2, 1, 3));
}

#[tokio::test]
async fn test_list_by_identity_filters_and_orders() {
    let Some(db) = test_db().await else { return };
    let user = unique("user");
    let other = unique("other");

    let first = unique("job");
    let second = unique("job");
    db.jobs.create(request(&first, &user)).await.unwrap();
    db.jobs.create(request(&second, &user)).await.unwrap();
    db.jobs.create(request(&unique("job"), &other)).await.unwrap();

    let jobs = db
        .jobs
        .list_by_identity(&Identity::user(user.clone()), 10)
        .await
        .unwrap();
    assert_eq!(jobs.len(), 2);
    // Newest first.
    assert!(jobs[0].started_at >= jobs[1].started_at);
    assert!(jobs.iter().all(|j| j.initiated_by_user.as_deref() == Some(user.as_str())));

    // A team identity with the same string id sees nothing.
    let team_view = db
        .jobs
        .list_by_identity(&Identity::team(user), 10)
        .await
        .unwrap();
    assert!(team_view.is_empty());
}

#[tokio::test]
async fn test_unknown_job_is_none() {
    let Some(db) = test_db().await else { return };
    assert!(db.jobs.get(&unique("missing")).await.unwrap().is_none());
}
