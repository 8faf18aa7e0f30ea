//! Chunk generation migration.
//!
//! A reprocessing run never edits chunks in place. The coordinator moves a
//! document from one chunk generation to the next in four steps:
//!
//! 1. [`begin_migration`](ChunkMigrationCoordinator::begin_migration) snapshots
//!    the current chunks and marks them inactive.
//! 2. [`insert_new_chunks`](ChunkMigrationCoordinator::insert_new_chunks)
//!    writes the new generation, inactive, under a fresh [`BatchTag`].
//! 3. [`promote`](ChunkMigrationCoordinator::promote) makes the new batch
//!    current and deletes the old generation, or
//! 4. [`discard`](ChunkMigrationCoordinator::discard) deletes the new batch
//!    and restores the old generation exactly.
//!
//! At every step outside the two flips a document has either its old
//! generation or its new one, never a mix. A crash between steps leaves
//! state that [`repair_interrupted`](ChunkMigrationCoordinator::repair_interrupted)
//! can resolve.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use rhizome_core::{
    validate_chunk_sequence, BatchTag, Chunk, ChunkRepository, Error, NewChunk, Result,
};

/// Where a migration currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    /// Old generation is inactive, nothing inserted yet.
    Begun,
    /// New generation is stored but not current.
    Inserted,
    /// New generation is current.
    Promoted,
    /// New generation removed, old generation restored.
    Discarded,
}

/// State of one in-flight generation swap.
#[derive(Debug)]
pub struct MigrationHandle {
    document_id: Uuid,
    batch: BatchTag,
    previous: Vec<Chunk>,
    deactivated: Vec<Uuid>,
    inserted: Vec<Chunk>,
    state: MigrationState,
}

impl MigrationHandle {
    pub fn document_id(&self) -> Uuid {
        self.document_id
    }

    pub fn batch(&self) -> &BatchTag {
        &self.batch
    }

    /// The generation that was current when the migration began.
    pub fn previous_chunks(&self) -> &[Chunk] {
        &self.previous
    }

    /// The new generation, empty until inserted.
    pub fn inserted_chunks(&self) -> &[Chunk] {
        &self.inserted
    }

    pub fn state(&self) -> MigrationState {
        self.state
    }

    fn expect_state(&self, allowed: &[MigrationState], action: &str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::Migration(format!(
                "cannot {} batch {} in state {:?}",
                action, self.batch, self.state
            )))
        }
    }
}

/// What [`ChunkMigrationCoordinator::repair_interrupted`] found and did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RepairOutcome {
    /// Exactly one generation, nothing to do.
    Clean,
    /// A promoted batch left stale chunks behind; they were deleted.
    CompletedPromote { deleted: u64 },
    /// An interrupted run left no current chunks; its batch was deleted and
    /// the prior generation restored.
    RestoredPrevious { restored: u64, discarded: u64 },
    /// Only an inactive batch remained; it was made current.
    ActivatedOrphan { activated: u64 },
}

/// Runs chunk generation swaps against a [`ChunkRepository`].
#[derive(Clone)]
pub struct ChunkMigrationCoordinator {
    chunks: Arc<dyn ChunkRepository>,
}

impl ChunkMigrationCoordinator {
    pub fn new(chunks: Arc<dyn ChunkRepository>) -> Self {
        Self { chunks }
    }

    /// Snapshot and deactivate the current generation.
    pub async fn begin_migration(&self, document_id: Uuid) -> Result<MigrationHandle> {
        let previous = self.chunks.list_current(document_id).await?;
        let deactivated = self.chunks.deactivate_current(document_id).await?;
        let batch = BatchTag::generate();

        info!(
            subsystem = "jobs",
            component = "coordinator",
            document_id = %document_id,
            batch_tag = %batch,
            chunk_count = deactivated.len(),
            "Marked current chunks stale"
        );

        Ok(MigrationHandle {
            document_id,
            batch,
            previous,
            deactivated,
            inserted: Vec::new(),
            state: MigrationState::Begun,
        })
    }

    /// Store the new generation as inactive chunks under the handle's batch.
    ///
    /// The batch must be non-empty with dense indices and non-empty spans.
    pub async fn insert_new_chunks<'h>(
        &self,
        handle: &'h mut MigrationHandle,
        chunks: Vec<NewChunk>,
    ) -> Result<&'h [Chunk]> {
        handle.expect_state(&[MigrationState::Begun], "insert into")?;
        if chunks.is_empty() {
            return Err(Error::ChunkBatch("chunker produced no chunks".to_string()));
        }
        validate_chunk_sequence(
            chunks
                .iter()
                .map(|c| (c.chunk_index, c.start_offset, c.end_offset)),
        )?;

        let stored = self
            .chunks
            .insert_batch(handle.document_id, &handle.batch, chunks)
            .await?;
        debug!(
            document_id = %handle.document_id,
            batch_tag = %handle.batch,
            chunk_count = stored.len(),
            "Inserted new chunk generation"
        );

        handle.inserted = stored;
        handle.state = MigrationState::Inserted;
        Ok(&handle.inserted)
    }

    /// Make the new batch current and drop the old generation.
    ///
    /// A failed activation leaves the handle in `Inserted` so the caller can
    /// still discard. A failed cleanup only leaves stale inactive rows,
    /// which [`Self::repair_interrupted`] removes later.
    pub async fn promote(&self, handle: &mut MigrationHandle) -> Result<()> {
        handle.expect_state(&[MigrationState::Inserted], "promote")?;

        let activated = self
            .chunks
            .activate_batch(handle.document_id, &handle.batch)
            .await?;
        handle.state = MigrationState::Promoted;

        match self.chunks.delete_inactive(handle.document_id).await {
            Ok(deleted) => info!(
                subsystem = "jobs",
                component = "coordinator",
                document_id = %handle.document_id,
                batch_tag = %handle.batch,
                activated,
                deleted,
                "Promoted chunk batch"
            ),
            Err(e) => warn!(
                subsystem = "jobs",
                component = "coordinator",
                document_id = %handle.document_id,
                batch_tag = %handle.batch,
                error = %e,
                "Promoted chunk batch but failed to delete old generation"
            ),
        }
        Ok(())
    }

    /// Remove the new batch and restore exactly the chunks that were current
    /// before the migration began.
    pub async fn discard(&self, handle: &mut MigrationHandle) -> Result<()> {
        handle.expect_state(&[MigrationState::Begun, MigrationState::Inserted], "discard")?;

        let removed = self
            .chunks
            .delete_batch(handle.document_id, &handle.batch)
            .await?;
        let restored = self.chunks.reactivate(&handle.deactivated).await?;
        handle.inserted.clear();
        handle.state = MigrationState::Discarded;

        info!(
            subsystem = "jobs",
            component = "coordinator",
            document_id = %handle.document_id,
            batch_tag = %handle.batch,
            removed,
            restored,
            "Discarded chunk batch"
        );
        Ok(())
    }

    /// Bring a document left mid-migration back to a single generation.
    ///
    /// With current chunks present the swap already happened and only the
    /// stale rows go. Without any, the newest batch is treated as the
    /// unfinished one: it is deleted and the older rows come back.
    pub async fn repair_interrupted(&self, document_id: Uuid) -> Result<RepairOutcome> {
        let all = self.chunks.list_all(document_id).await?;
        if all.is_empty() {
            return Ok(RepairOutcome::Clean);
        }

        if all.iter().any(|c| c.is_current) {
            if all.iter().all(|c| c.is_current) {
                return Ok(RepairOutcome::Clean);
            }
            let deleted = self.chunks.delete_inactive(document_id).await?;
            warn!(document_id = %document_id, deleted, "Removed stale chunks left by a promoted run");
            return Ok(RepairOutcome::CompletedPromote { deleted });
        }

        let latest = all.iter().filter_map(|c| c.reprocessing_batch.as_ref()).max().cloned();
        let latest_ids: HashSet<Uuid> = all
            .iter()
            .filter(|c| latest.is_some() && c.reprocessing_batch == latest)
            .map(|c| c.id)
            .collect();
        let prior: Vec<Uuid> = all
            .iter()
            .filter(|c| !latest_ids.contains(&c.id))
            .map(|c| c.id)
            .collect();

        match latest {
            Some(batch) if !prior.is_empty() => {
                let discarded = self.chunks.delete_batch(document_id, &batch).await?;
                let restored = self.chunks.reactivate(&prior).await?;
                warn!(
                    document_id = %document_id,
                    batch_tag = %batch,
                    discarded,
                    restored,
                    "Rolled back interrupted reprocessing run"
                );
                Ok(RepairOutcome::RestoredPrevious { restored, discarded })
            }
            Some(batch) => {
                let activated = self.chunks.activate_batch(document_id, &batch).await?;
                warn!(document_id = %document_id, batch_tag = %batch, activated, "Activated orphaned chunk batch");
                Ok(RepairOutcome::ActivatedOrphan { activated })
            }
            None => {
                let restored = self.chunks.reactivate(&prior).await?;
                warn!(document_id = %document_id, restored, "Reactivated untagged chunks");
                Ok(RepairOutcome::RestoredPrevious { restored, discarded: 0 })
            }
        }
    }
}
