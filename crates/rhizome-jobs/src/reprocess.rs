//! Reprocessing orchestrator.
//!
//! Drives one document from its current chunk generation to a new one built
//! from edited text, carrying annotations and connections across:
//!
//! | Stage | Progress | Work |
//! |-------|----------|------|
//! | `marked_stale` | 10 | Snapshot and deactivate the current chunks |
//! | `chunks_inserted` | 40 | Chunk, enrich, embed, store the new batch |
//! | `post_processed` | 55 / 80 / 90 | Detect connections, recover annotations, remap connections |
//! | `committed` | 100 | Promote the new batch |
//!
//! Any fatal failure before commit discards the new batch and restores the
//! old generation (`rolled_back`). Enrichment, embedding, detection and
//! remapping are fault isolated: their failures become warnings.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn, Span};
use uuid::Uuid;

use rhizome_core::defaults;
use rhizome_core::{
    logging, Annotation, AnnotationRepository, Chunk, ChunkRepository, ChunkingBackend,
    ConnectionDetector, ConnectionRepository, DocumentRepository, DocumentStatus,
    EmbeddingBackend, Error, MetadataEnricher, NewChunk, NoOpDetector, NoOpEnricher,
    RecoveryReport, RecoveryResult, ReprocessConfig, ReprocessOutcome, ReprocessingStage, Result,
    ReviewItem, SuggestedMatch,
};
use rhizome_db::Database;
use rhizome_recovery::{apply_outcome, RecoveryEngine};

use crate::migration::{ChunkMigrationCoordinator, MigrationHandle};
use crate::remap::ConnectionRemapper;

/// Progress callback: percent complete and stage label.
pub type ProgressCallback = Arc<dyn Fn(i32, &str) + Send + Sync>;

/// Shared flag a hosting job sets to stop a run before post-processing.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The four repositories a run reads and writes.
#[derive(Clone)]
pub struct Repositories {
    pub documents: Arc<dyn DocumentRepository>,
    pub chunks: Arc<dyn ChunkRepository>,
    pub annotations: Arc<dyn AnnotationRepository>,
    pub connections: Arc<dyn ConnectionRepository>,
}

impl Repositories {
    /// Use one store for every repository.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: DocumentRepository
            + ChunkRepository
            + AnnotationRepository
            + ConnectionRepository
            + 'static,
    {
        Self {
            documents: store.clone(),
            chunks: store.clone(),
            annotations: store.clone(),
            connections: store,
        }
    }

    /// Postgres repositories sharing the database pool.
    pub fn from_database(db: &Database) -> Self {
        let pool = db.pool().clone();
        Self {
            documents: Arc::new(rhizome_db::PgDocumentRepository::new(pool.clone())),
            chunks: Arc::new(rhizome_db::PgChunkRepository::new(pool.clone())),
            annotations: Arc::new(rhizome_db::PgAnnotationRepository::new(pool.clone())),
            connections: Arc::new(rhizome_db::PgConnectionRepository::new(pool)),
        }
    }
}

/// Pluggable processing steps. Only the chunker is required.
#[derive(Clone)]
pub struct Collaborators {
    pub chunker: Arc<dyn ChunkingBackend>,
    pub enricher: Arc<dyn MetadataEnricher>,
    pub embedder: Option<Arc<dyn EmbeddingBackend>>,
    pub detector: Arc<dyn ConnectionDetector>,
}

impl Collaborators {
    pub fn new(chunker: Arc<dyn ChunkingBackend>) -> Self {
        Self {
            chunker,
            enricher: Arc::new(NoOpEnricher),
            embedder: None,
            detector: Arc::new(NoOpDetector),
        }
    }

    pub fn with_enricher(mut self, enricher: Arc<dyn MetadataEnricher>) -> Self {
        self.enricher = enricher;
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingBackend>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_detector(mut self, detector: Arc<dyn ConnectionDetector>) -> Self {
        self.detector = detector;
        self
    }
}

/// Monotonic progress reporting.
///
/// Lower or repeated values are dropped. Persistence goes through a single
/// writer task so stored progress never moves backwards, and a failed write
/// never blocks or fails the run.
struct ProgressTracker {
    last: AtomicI32,
    callback: Option<ProgressCallback>,
    writer: mpsc::UnboundedSender<(i32, &'static str)>,
}

impl ProgressTracker {
    fn spawn(
        document_id: Uuid,
        documents: Arc<dyn DocumentRepository>,
        callback: Option<ProgressCallback>,
    ) -> Self {
        let (writer, mut rx) = mpsc::unbounded_channel::<(i32, &'static str)>();
        tokio::spawn(async move {
            while let Some((percent, stage)) = rx.recv().await {
                if let Err(e) = documents.set_progress(document_id, percent, stage).await {
                    debug!(document_id = %document_id, error = %e, "Progress write failed");
                }
            }
        });
        Self {
            last: AtomicI32::new(0),
            callback,
            writer,
        }
    }

    fn report(&self, percent: i32, stage: &'static str) {
        let previous = self.last.fetch_max(percent, Ordering::SeqCst);
        if percent <= previous {
            return;
        }
        if let Some(ref callback) = self.callback {
            callback(percent, stage);
        }
        // receiver only closes when the runtime shuts down
        let _ = self.writer.send((percent, stage));
    }
}

/// Runs reprocessing for documents.
pub struct ReprocessingOrchestrator {
    repos: Repositories,
    collaborators: Collaborators,
    config: ReprocessConfig,
    engine: RecoveryEngine,
    coordinator: ChunkMigrationCoordinator,
    remapper: ConnectionRemapper,
    cancellation: CancellationFlag,
    progress: Option<ProgressCallback>,
}

impl ReprocessingOrchestrator {
    pub fn new(repos: Repositories, collaborators: Collaborators, config: ReprocessConfig) -> Self {
        Self {
            engine: RecoveryEngine::new(config.recovery.clone()),
            coordinator: ChunkMigrationCoordinator::new(repos.chunks.clone()),
            remapper: ConnectionRemapper::new(repos.connections.clone(), config.remap.clone()),
            repos,
            collaborators,
            config,
            cancellation: CancellationFlag::new(),
            progress: None,
        }
    }

    /// Share a cancellation flag with the caller.
    pub fn with_cancellation(mut self, flag: CancellationFlag) -> Self {
        self.cancellation = flag;
        self
    }

    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(i32, &str) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
        self
    }

    pub fn cancellation(&self) -> CancellationFlag {
        self.cancellation.clone()
    }

    pub fn config(&self) -> &ReprocessConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &ChunkMigrationCoordinator {
        &self.coordinator
    }

    /// Reprocess `document_id` against `new_text`.
    ///
    /// Returns `Err` only when nothing was changed (the document or its
    /// annotations could not be read, or the old generation could not be
    /// deactivated) or when a rollback itself failed. A run that was rolled
    /// back cleanly returns `Ok` with stage `RolledBack` and the cause in
    /// `error`.
    #[instrument(
        skip_all,
        fields(
            subsystem = "jobs",
            component = "orchestrator",
            document_id = %document_id,
            batch_tag = tracing::field::Empty,
            recovery_rate = tracing::field::Empty,
            duration_ms = tracing::field::Empty,
        )
    )]
    pub async fn run(&self, document_id: Uuid, new_text: &str) -> Result<ReprocessOutcome> {
        let start = Instant::now();
        let mut outcome = ReprocessOutcome {
            document_id,
            batch_tag: None,
            stage: ReprocessingStage::Idle,
            recovery: RecoveryReport::default(),
            remap: Default::default(),
            connections_detected: None,
            chunk_count: 0,
            error: None,
            warnings: Vec::new(),
        };

        self.repos.documents.get(document_id).await?;
        if self.cancellation.is_cancelled() {
            outcome.stage = ReprocessingStage::RolledBack;
            outcome.error = Some(Error::Cancelled("before start".into()).to_string());
            return Ok(outcome);
        }

        let annotations = match self.repos.annotations.list_for_document(document_id).await {
            Ok(a) => a,
            Err(e) => {
                self.mark_failed(document_id, &e).await;
                return Err(e);
            }
        };

        self.repos
            .documents
            .set_status(document_id, DocumentStatus::Reprocessing, None)
            .await?;
        let tracker = ProgressTracker::spawn(
            document_id,
            self.repos.documents.clone(),
            self.progress.clone(),
        );

        let mut handle = match self.coordinator.begin_migration(document_id).await {
            Ok(h) => h,
            Err(e) => {
                self.mark_failed(document_id, &e).await;
                return Err(e);
            }
        };
        Span::current().record(logging::BATCH_TAG, handle.batch().as_str());
        outcome.batch_tag = Some(handle.batch().clone());
        outcome.stage = ReprocessingStage::MarkedStale;
        tracker.report(defaults::PROGRESS_MARKED_STALE, ReprocessingStage::MarkedStale.as_str());

        if let Err(e) = self
            .advance(&mut handle, &mut outcome, &annotations, new_text, &tracker)
            .await
        {
            self.rollback(&mut handle, &mut outcome, &annotations, e).await?;
            Span::current().record(logging::DURATION_MS, start.elapsed().as_millis() as u64);
            return Ok(outcome);
        }

        outcome.stage = ReprocessingStage::Committed;
        if let Err(e) = self
            .repos
            .documents
            .set_status(document_id, DocumentStatus::Completed, None)
            .await
        {
            warn!(error = %e, "Failed to mark document completed");
            outcome.warnings.push(format!("status update failed: {}", e));
        }
        tracker.report(defaults::PROGRESS_COMPLETE, ReprocessingStage::Committed.as_str());

        let elapsed = start.elapsed().as_millis() as u64;
        let span = Span::current();
        span.record(logging::RECOVERY_RATE, outcome.recovery.recovery_rate);
        span.record(logging::DURATION_MS, elapsed);
        info!(
            chunk_count = outcome.chunk_count,
            annotation_count = outcome.recovery.total(),
            recovered = outcome.recovery.success.len(),
            needs_review = outcome.recovery.needs_review.len(),
            lost = outcome.recovery.lost.len(),
            connections_remapped = outcome.remap.remapped,
            warnings = outcome.warnings.len(),
            "Reprocessing committed"
        );
        Ok(outcome)
    }

    /// Everything between marking stale and the promote flip. Any `Err` is
    /// fatal and rolls the run back.
    async fn advance(
        &self,
        handle: &mut MigrationHandle,
        outcome: &mut ReprocessOutcome,
        annotations: &[Annotation],
        new_text: &str,
        tracker: &ProgressTracker,
    ) -> Result<()> {
        let document_id = handle.document_id();
        self.check_cancelled(ReprocessingStage::MarkedStale)?;

        let chunks = self.build_chunks(new_text, &mut outcome.warnings).await?;
        let new_chunks = self
            .coordinator
            .insert_new_chunks(handle, chunks)
            .await?
            .to_vec();
        outcome.chunk_count = new_chunks.len();
        outcome.stage = ReprocessingStage::ChunksInserted;
        tracker.report(
            defaults::PROGRESS_CHUNKS_INSERTED,
            ReprocessingStage::ChunksInserted.as_str(),
        );
        self.check_cancelled(ReprocessingStage::ChunksInserted)?;

        let old_chunks = handle.previous_chunks();

        if self.config.skip_connection_detection {
            debug!("Connection detection skipped by configuration");
        } else {
            match self.collaborators.detector.detect(document_id, &new_chunks).await {
                Ok(n) => outcome.connections_detected = Some(n),
                Err(e) => {
                    warn!(error = %e, "Connection detection failed, continuing");
                    outcome.warnings.push(format!("connection detection failed: {}", e));
                }
            }
        }
        tracker.report(defaults::PROGRESS_CONNECTIONS_DETECTED, "connections_detected");

        outcome.recovery = self
            .recover_annotations(annotations, new_text, &new_chunks, old_chunks)
            .await;
        if outcome.recovery.persist_failures > 0 {
            outcome.warnings.push(format!(
                "{} annotation results could not be saved",
                outcome.recovery.persist_failures
            ));
        }
        tracker.report(defaults::PROGRESS_ANNOTATIONS_RECOVERED, "annotations_recovered");

        outcome.remap = self
            .remapper
            .remap_best_effort(document_id, old_chunks, &new_chunks)
            .await;
        if let Some(ref e) = outcome.remap.error {
            outcome.warnings.push(format!("connection remap degraded: {}", e));
        }
        outcome.stage = ReprocessingStage::PostProcessed;
        tracker.report(
            defaults::PROGRESS_POST_PROCESSED,
            ReprocessingStage::PostProcessed.as_str(),
        );

        self.coordinator.promote(handle).await
    }

    /// Chunk the text, then attach metadata and embeddings where available.
    async fn build_chunks(&self, text: &str, warnings: &mut Vec<String>) -> Result<Vec<NewChunk>> {
        let mut chunks = self.collaborators.chunker.chunk(text).await.map_err(|e| {
            Error::ChunkBatch(format!(
                "{} chunker failed: {}",
                self.collaborators.chunker.name(),
                e
            ))
        })?;

        match self.collaborators.enricher.enrich(&chunks).await {
            Ok(values) if values.len() == chunks.len() => {
                for (chunk, value) in chunks.iter_mut().zip(values) {
                    merge_metadata(&mut chunk.metadata, value);
                }
            }
            Ok(values) => {
                warn!(expected = chunks.len(), got = values.len(), "Enricher returned wrong count");
                warnings.push("metadata enrichment returned mismatched results".to_string());
            }
            Err(e) => {
                warn!(error = %e, "Metadata enrichment failed, continuing");
                warnings.push(format!("metadata enrichment failed: {}", e));
            }
        }

        if let Some(ref embedder) = self.collaborators.embedder {
            let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
            match embedder.embed_texts(&texts).await {
                Ok(vectors) if vectors.len() == chunks.len() => {
                    for (chunk, vector) in chunks.iter_mut().zip(vectors) {
                        chunk.embedding = Some(vector);
                    }
                }
                Ok(_) => warnings.push("embedding returned mismatched results".to_string()),
                Err(e) => {
                    warn!(model = embedder.model_name(), error = %e, "Embedding failed, continuing");
                    warnings.push(format!("embedding failed: {}", e));
                }
            }
        }

        Ok(chunks)
    }

    /// Recover every annotation and persist each result before commit.
    async fn recover_annotations(
        &self,
        annotations: &[Annotation],
        text: &str,
        new_chunks: &[Chunk],
        old_chunks: &[Chunk],
    ) -> RecoveryReport {
        let start = Instant::now();
        let results = self
            .engine
            .recover_all(annotations, text, new_chunks, old_chunks);
        let mut report = RecoveryReport::default();

        for (annotation, (_, result)) in annotations.iter().zip(results) {
            let mut updated = annotation.clone();
            let persisted = match result {
                RecoveryResult::Success(o) => {
                    apply_outcome(&mut updated.anchor, &o);
                    updated.recovery_confidence = Some(o.confidence);
                    updated.recovery_method = Some(o.method);
                    updated.needs_review = false;
                    updated.suggested_match = None;
                    let saved = self.repos.annotations.apply_recovery(updated.id, &o).await;
                    report.success.push(updated);
                    saved
                }
                RecoveryResult::NeedsReview(o) => {
                    let suggestion = SuggestedMatch::from(&o);
                    updated.needs_review = true;
                    updated.suggested_match = Some(suggestion.clone());
                    let saved = self
                        .repos
                        .annotations
                        .flag_for_review(updated.id, &suggestion)
                        .await;
                    report.needs_review.push(ReviewItem {
                        annotation: updated,
                        suggested_match: suggestion,
                    });
                    saved
                }
                RecoveryResult::Lost => {
                    updated.unresolved = true;
                    let saved = self.repos.annotations.mark_lost(updated.id).await;
                    report.lost.push(updated);
                    saved
                }
            };
            if let Err(e) = persisted {
                report.persist_failures += 1;
                warn!(annotation_id = %annotation.id, error = %e, "Failed to save recovery result");
            }
        }

        report.execution_time_ms = start.elapsed().as_millis() as u64;
        report.finalize_rate();
        info!(
            annotation_count = report.total(),
            recovery_rate = report.recovery_rate,
            duration_ms = report.execution_time_ms,
            "Annotation recovery complete"
        );
        report
    }

    fn check_cancelled(&self, stage: ReprocessingStage) -> Result<()> {
        if self.cancellation.is_cancelled() {
            Err(Error::Cancelled(format!("after {}", stage)))
        } else {
            Ok(())
        }
    }

    /// Discard the new batch, put back any annotation and connection state
    /// written during the run, and mark the document failed.
    async fn rollback(
        &self,
        handle: &mut MigrationHandle,
        outcome: &mut ReprocessOutcome,
        snapshot: &[Annotation],
        cause: Error,
    ) -> Result<()> {
        let document_id = handle.document_id();
        error!(stage = %outcome.stage, error = %cause, "Reprocessing failed, rolling back");

        if let Err(e) = self.coordinator.discard(handle).await {
            let combined = Error::Migration(format!(
                "rollback of batch {} failed: {}; original error: {}",
                handle.batch(),
                e,
                cause
            ));
            self.mark_failed(document_id, &combined).await;
            return Err(combined);
        }

        let restore_failures = self.restore_written_state(outcome, snapshot).await;
        if restore_failures > 0 {
            let combined = Error::Migration(format!(
                "rollback could not restore {} annotations or connections; original error: {}",
                restore_failures, cause
            ));
            self.mark_failed(document_id, &combined).await;
            return Err(combined);
        }

        self.mark_failed(document_id, &cause).await;
        outcome.stage = ReprocessingStage::RolledBack;
        outcome.error = Some(cause.to_string());
        outcome.chunk_count = 0;
        outcome.recovery = RecoveryReport::default();
        outcome.remap = Default::default();
        Ok(())
    }

    /// Write the pre-run annotations and connections back when recovery or
    /// remapping already touched them. Returns the number of failed writes.
    async fn restore_written_state(
        &self,
        outcome: &ReprocessOutcome,
        snapshot: &[Annotation],
    ) -> usize {
        let mut failures = 0;

        if outcome.recovery.total() > 0 {
            for annotation in snapshot {
                if let Err(e) = self.repos.annotations.restore(annotation).await {
                    failures += 1;
                    warn!(annotation_id = %annotation.id, error = %e, "Failed to restore annotation");
                }
            }
        }

        for connection in &outcome.remap.previous {
            if let Err(e) = self.repos.connections.restore(connection).await {
                failures += 1;
                warn!(connection_id = %connection.id, error = %e, "Failed to restore connection");
            }
        }

        failures
    }

    async fn mark_failed(&self, document_id: Uuid, cause: &Error) {
        let message = cause.to_string();
        if let Err(e) = self
            .repos
            .documents
            .set_status(document_id, DocumentStatus::Failed, Some(&message))
            .await
        {
            warn!(document_id = %document_id, error = %e, "Failed to record failure status");
        }
    }
}

/// Merge enrichment output into chunker metadata. Object keys from the
/// enricher win; a null leaves the chunk untouched.
fn merge_metadata(target: &mut Option<JsonValue>, value: JsonValue) {
    match (target.as_mut(), value) {
        (_, JsonValue::Null) => {}
        (Some(JsonValue::Object(existing)), JsonValue::Object(extra)) => {
            existing.extend(extra);
        }
        (_, value) => *target = Some(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_metadata() {
        let mut meta = Some(json!({ "type": "paragraph" }));
        merge_metadata(&mut meta, json!({ "topic": "physics" }));
        assert_eq!(meta, Some(json!({ "type": "paragraph", "topic": "physics" })));

        merge_metadata(&mut meta, JsonValue::Null);
        assert_eq!(meta.as_ref().unwrap()["topic"], json!("physics"));

        let mut empty = None;
        merge_metadata(&mut empty, json!({ "k": 1 }));
        assert_eq!(empty, Some(json!({ "k": 1 })));
    }

    #[test]
    fn test_cancellation_flag_is_shared() {
        let flag = CancellationFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_cancelled());
        flag.cancel();
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn test_progress_is_monotonic() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let store = Arc::new(rhizome_db::MemoryStore::new());
        let tracker = ProgressTracker::spawn(
            Uuid::now_v7(),
            store,
            Some(Arc::new(move |p: i32, _: &str| sink.lock().unwrap().push(p))),
        );

        tracker.report(10, "a");
        tracker.report(40, "b");
        tracker.report(30, "c");
        tracker.report(40, "d");
        tracker.report(100, "e");

        assert_eq!(*seen.lock().unwrap(), vec![10, 40, 100]);
    }
}
