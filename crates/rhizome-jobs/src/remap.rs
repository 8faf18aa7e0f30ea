//! Connection remapping after a chunk generation swap.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use rhizome_core::{Chunk, Connection, ConnectionRepository, RemapConfig, RemapResult, Result};
use rhizome_recovery::{build_mapping, ChunkMapping};

const REASON_AMBIGUOUS: &str = "ambiguous";
const REASON_UNMAPPED: &str = "unmapped";

/// Decision for one connection endpoint.
enum Endpoint {
    /// Not a chunk of this document; left alone.
    Foreign(Uuid),
    Moved(Uuid),
    Ambiguous(Uuid),
    Unmapped(Uuid),
}

impl Endpoint {
    fn resolve(id: Uuid, mapping: &HashMap<Uuid, ChunkMapping>) -> Self {
        match mapping.get(&id) {
            None => Endpoint::Foreign(id),
            Some(ChunkMapping::Remapped { chunk_id, .. }) => Endpoint::Moved(*chunk_id),
            Some(ChunkMapping::Ambiguous { .. }) => Endpoint::Ambiguous(id),
            Some(ChunkMapping::Unmapped { .. }) => Endpoint::Unmapped(id),
        }
    }

    fn id(&self) -> Uuid {
        match self {
            Endpoint::Foreign(id)
            | Endpoint::Moved(id)
            | Endpoint::Ambiguous(id)
            | Endpoint::Unmapped(id) => *id,
        }
    }
}

/// Rewrites connection endpoints from old chunks to their successors.
pub struct ConnectionRemapper {
    connections: Arc<dyn ConnectionRepository>,
    config: RemapConfig,
}

impl ConnectionRemapper {
    pub fn new(connections: Arc<dyn ConnectionRepository>, config: RemapConfig) -> Self {
        Self {
            connections,
            config,
        }
    }

    /// Remap every connection touching `old_chunks`.
    ///
    /// Endpoints that map cleanly are rewritten. A connection with any
    /// endpoint that is ambiguous or unmapped keeps that stale id and is
    /// flagged, ambiguity taking precedence in the reported reason.
    pub async fn remap(
        &self,
        document_id: Uuid,
        old_chunks: &[Chunk],
        new_chunks: &[Chunk],
    ) -> Result<RemapResult> {
        let mapping = build_mapping(old_chunks, new_chunks, &self.config);
        let old_ids: Vec<Uuid> = old_chunks.iter().map(|c| c.id).collect();
        let connections = self.connections.list_for_chunks(&old_ids).await?;

        let mut result = RemapResult::default();
        let mut write_failures = 0usize;

        for connection in &connections {
            match self
                .remap_one(connection, &mapping, &mut result.previous)
                .await
            {
                Ok(Some(reason)) => {
                    if reason == REASON_AMBIGUOUS {
                        result.ambiguous += 1;
                    } else {
                        result.unmapped += 1;
                    }
                    result.flagged.push(connection.id);
                }
                Ok(None) => result.remapped += 1,
                Err(e) => {
                    write_failures += 1;
                    warn!(
                        subsystem = "jobs",
                        component = "remapper",
                        connection_id = %connection.id,
                        error = %e,
                        "Failed to update connection"
                    );
                }
            }
        }

        if write_failures > 0 {
            result.error = Some(format!("{} connection updates failed", write_failures));
        }

        info!(
            subsystem = "jobs",
            component = "remapper",
            document_id = %document_id,
            remapped = result.remapped,
            ambiguous = result.ambiguous,
            unmapped = result.unmapped,
            "Connection remap complete"
        );
        Ok(result)
    }

    /// Like [`Self::remap`], but a failed pass is reported in the result
    /// instead of returned.
    pub async fn remap_best_effort(
        &self,
        document_id: Uuid,
        old_chunks: &[Chunk],
        new_chunks: &[Chunk],
    ) -> RemapResult {
        match self.remap(document_id, old_chunks, new_chunks).await {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    subsystem = "jobs",
                    component = "remapper",
                    document_id = %document_id,
                    error = %e,
                    "Connection remap failed, continuing"
                );
                RemapResult::degraded(e.to_string())
            }
        }
    }

    /// Returns the flag reason when the connection was flagged. The
    /// connection is pushed onto `previous` before its first write.
    async fn remap_one(
        &self,
        connection: &Connection,
        mapping: &HashMap<Uuid, ChunkMapping>,
        previous: &mut Vec<Connection>,
    ) -> Result<Option<&'static str>> {
        let source = Endpoint::resolve(connection.source_chunk_id, mapping);
        let target = Endpoint::resolve(connection.target_chunk_id, mapping);

        let reason = match (&source, &target) {
            (Endpoint::Ambiguous(_), _) | (_, Endpoint::Ambiguous(_)) => Some(REASON_AMBIGUOUS),
            (Endpoint::Unmapped(_), _) | (_, Endpoint::Unmapped(_)) => Some(REASON_UNMAPPED),
            _ => None,
        };

        let (new_source, new_target) = (source.id(), target.id());
        let moved =
            new_source != connection.source_chunk_id || new_target != connection.target_chunk_id;
        if moved || reason.is_some() {
            previous.push(connection.clone());
        }
        if moved {
            self.connections
                .update_endpoints(connection.id, new_source, new_target)
                .await?;
        }
        if let Some(reason) = reason {
            self.connections.flag_stale(connection.id, reason).await?;
        }

        debug!(
            connection_id = %connection.id,
            source = %new_source,
            target = %new_target,
            flagged = reason.unwrap_or("none"),
            "Remapped connection"
        );
        Ok(reason)
    }
}
