//! Ingest runner: the entry point a durable-execution engine invokes.
//!
//! Usage:
//!
//! ```text
//! quarry-ingest html <url> [job-id]
//! quarry-ingest pdf <url> [job-id]
//! ```
//!
//! Creates the job row when no job id is supplied, then runs the ingest to
//! a terminal state. Exit status is non-zero on failure so the engine can
//! retry the attempt.

use std::process::ExitCode;

use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use quarry_core::Scope;
use quarry_db::CreateJobRequest;
use quarry_ingest::DocService;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new("info,sqlx=warn")
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (mode, url, job_id) = match args.as_slice() {
        [mode, url] => (mode.clone(), url.clone(), None),
        [mode, url, job_id] => (mode.clone(), url.clone(), Some(job_id.clone())),
        _ => {
            eprintln!("usage: quarry-ingest <html|pdf> <url> [job-id]");
            return ExitCode::from(2);
        }
    };

    let service = match DocService::from_env().await {
        Ok(service) => service,
        Err(e) => {
            error!(error = %e, "Failed to initialize service");
            return ExitCode::FAILURE;
        }
    };
    let ingestor = service.ingestor();

    // Without an engine-supplied id, register the job here under a CLI
    // identity so progress is observable in the job table.
    let job_id = match job_id {
        Some(id) => id,
        None => {
            let id = format!("job-{}", Uuid::new_v4());
            let index_name = match quarry_core::derive_index_name(&url) {
                Ok(name) => name,
                Err(e) => {
                    error!(error = %e, "Invalid source URL");
                    return ExitCode::FAILURE;
                }
            };
            let created = ingestor
                .db()
                .jobs
                .create(CreateJobRequest {
                    job_id: id.clone(),
                    index_name,
                    source_url: url.clone(),
                    user_id: Some("cli".to_string()),
                    team_id: None,
                    scope: Scope::User,
                    metadata: serde_json::json!({ "source_type": mode }),
                })
                .await;
            if let Err(e) = created {
                error!(error = %e, "Failed to create job row");
                return ExitCode::FAILURE;
            }
            id
        }
    };

    let outcome = match mode.as_str() {
        "html" => ingestor.run_html_ingest(&url, &job_id).await,
        "pdf" => ingestor.run_pdf_ingest(&url, &job_id).await,
        other => {
            eprintln!("unknown mode {:?}; expected html or pdf", other);
            return ExitCode::from(2);
        }
    };

    match outcome {
        Ok(counters) => {
            println!(
                "{}: {} pages, {} chunks",
                job_id, counters.pages_processed, counters.total_chunks
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(job_id = %job_id, error = %e, "Ingest failed");
            ExitCode::FAILURE
        }
    }
}
