//! Job handlers for reprocessing and highlight import.
//!
//! A hosting job system hands each handler a [`JobContext`]; the handler
//! reports progress through it and returns a [`JobResult`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{error, info, warn};
use uuid::Uuid;

use rhizome_core::ReprocessConfig;
use rhizome_recovery::{HighlightInput, RecoveryEngine};

use crate::reprocess::{CancellationFlag, Collaborators, Repositories, ReprocessingOrchestrator};
use crate::review::import_and_store;

/// Kinds of job this crate can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Reprocess,
    ImportHighlights,
}

/// A unit of work addressed to one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub id: Uuid,
    pub kind: JobKind,
    pub document_id: Uuid,
    #[serde(default)]
    pub payload: Option<JsonValue>,
}

/// Progress callback a hosting job system attaches to a [`JobContext`].
pub type JobProgressCallback = Box<dyn Fn(i32, Option<&str>) + Send + Sync>;

/// Context provided to job handlers.
pub struct JobContext {
    pub request: JobRequest,
    cancellation: CancellationFlag,
    progress_callback: Option<JobProgressCallback>,
}

impl JobContext {
    pub fn new(request: JobRequest) -> Self {
        Self {
            request,
            cancellation: CancellationFlag::new(),
            progress_callback: None,
        }
    }

    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(i32, Option<&str>) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
        self
    }

    pub fn with_cancellation(mut self, flag: CancellationFlag) -> Self {
        self.cancellation = flag;
        self
    }

    pub fn report_progress(&self, percent: i32, message: Option<&str>) {
        if let Some(ref callback) = self.progress_callback {
            callback(percent, message);
        }
    }

    pub fn document_id(&self) -> Uuid {
        self.request.document_id
    }

    pub fn payload(&self) -> Option<&JsonValue> {
        self.request.payload.as_ref()
    }

    pub fn cancellation(&self) -> &CancellationFlag {
        &self.cancellation
    }

    fn parse_payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T, String> {
        let payload = self
            .payload()
            .cloned()
            .ok_or_else(|| format!("{:?} job {} has no payload", self.request.kind, self.request.id))?;
        serde_json::from_value(payload).map_err(|e| format!("invalid payload: {}", e))
    }
}

/// Result of job execution.
#[derive(Debug)]
pub enum JobResult {
    /// Job completed with optional result data.
    Success(Option<JsonValue>),
    /// Job failed with an error message.
    Failed(String),
}

/// Trait for job handlers.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The job kind this handler processes.
    fn kind(&self) -> JobKind;

    /// Execute the job.
    async fn execute(&self, ctx: JobContext) -> JobResult;

    fn can_handle(&self, kind: JobKind) -> bool {
        self.kind() == kind
    }
}

/// Payload of a [`JobKind::Reprocess`] job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReprocessPayload {
    /// The document's edited text.
    pub text: String,
}

/// Payload of a [`JobKind::ImportHighlights`] job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportHighlightsPayload {
    /// The document's current text.
    pub text: String,
    pub highlights: Vec<HighlightInput>,
}

/// Runs [`ReprocessingOrchestrator`] for reprocess jobs.
pub struct ReprocessHandler {
    repos: Repositories,
    collaborators: Collaborators,
    config: ReprocessConfig,
}

impl ReprocessHandler {
    pub fn new(repos: Repositories, collaborators: Collaborators, config: ReprocessConfig) -> Self {
        Self {
            repos,
            collaborators,
            config,
        }
    }
}

#[async_trait]
impl JobHandler for ReprocessHandler {
    fn kind(&self) -> JobKind {
        JobKind::Reprocess
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let payload: ReprocessPayload = match ctx.parse_payload() {
            Ok(p) => p,
            Err(e) => return JobResult::Failed(e),
        };
        let document_id = ctx.document_id();
        let cancellation = ctx.cancellation().clone();

        let ctx = std::sync::Arc::new(ctx);
        let progress_ctx = ctx.clone();
        let orchestrator = ReprocessingOrchestrator::new(
            self.repos.clone(),
            self.collaborators.clone(),
            self.config.clone(),
        )
        .with_cancellation(cancellation)
        .with_progress_callback(move |percent, stage| {
            progress_ctx.report_progress(percent, Some(stage))
        });

        match orchestrator.run(document_id, &payload.text).await {
            Ok(outcome) if outcome.is_committed() => {
                info!(job_id = %ctx.request.id, document_id = %document_id, "Reprocess job complete");
                JobResult::Success(summary(&outcome))
            }
            Ok(outcome) => JobResult::Failed(
                outcome
                    .error
                    .unwrap_or_else(|| "reprocessing rolled back".to_string()),
            ),
            Err(e) => {
                error!(job_id = %ctx.request.id, document_id = %document_id, error = %e, "Reprocess job failed");
                JobResult::Failed(e.to_string())
            }
        }
    }
}

/// Serialize a job's result data. A value that cannot be represented as
/// JSON is logged and dropped; the job itself still succeeded.
fn summary<T: Serialize>(value: &T) -> Option<JsonValue> {
    match serde_json::to_value(value) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(error = %e, "Failed to serialize job result");
            None
        }
    }
}

/// Places imported highlights for import jobs.
pub struct ImportHighlightsHandler {
    repos: Repositories,
    engine: RecoveryEngine,
}

impl ImportHighlightsHandler {
    pub fn new(repos: Repositories, config: &ReprocessConfig) -> Self {
        Self {
            repos,
            engine: RecoveryEngine::new(config.recovery.clone()),
        }
    }
}

#[async_trait]
impl JobHandler for ImportHighlightsHandler {
    fn kind(&self) -> JobKind {
        JobKind::ImportHighlights
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let payload: ImportHighlightsPayload = match ctx.parse_payload() {
            Ok(p) => p,
            Err(e) => return JobResult::Failed(e),
        };
        ctx.report_progress(10, Some("placing highlights"));

        let result = import_and_store(
            &self.engine,
            self.repos.chunks.as_ref(),
            self.repos.annotations.as_ref(),
            ctx.document_id(),
            &payload.text,
            payload.highlights,
        )
        .await;

        match result {
            Ok(report) => {
                ctx.report_progress(100, Some("complete"));
                JobResult::Success(Some(serde_json::json!({
                    "imported": report.imported.len(),
                    "review_queue": report.review_queue.len(),
                    "failed": report.failed.len(),
                })))
            }
            Err(e) => JobResult::Failed(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_summary_drops_unserializable_values() {
        assert_eq!(summary(&serde_json::json!({ "ok": 1 })), Some(serde_json::json!({ "ok": 1 })));

        // JSON object keys must be strings
        let mut bad = HashMap::new();
        bad.insert((1, 2), "pair");
        assert_eq!(summary(&bad), None);
    }

    #[test]
    fn test_context_reports_through_callback() {
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let ctx = JobContext::new(JobRequest {
            id: Uuid::now_v7(),
            kind: JobKind::Reprocess,
            document_id: Uuid::nil(),
            payload: None,
        })
        .with_progress_callback(move |p, msg| sink.lock().unwrap().push((p, msg.map(String::from))));

        ctx.report_progress(40, Some("chunks_inserted"));
        assert_eq!(*seen.lock().unwrap(), vec![(40, Some("chunks_inserted".to_string()))]);
        assert!(ctx.parse_payload::<ReprocessPayload>().is_err());
    }
}
