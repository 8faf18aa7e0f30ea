//! In-memory implementation of every repository trait.
//!
//! Used by tests and by embedded callers that keep documents outside
//! Postgres. State sits behind a single `tokio::sync::RwLock`, so each trait
//! call is atomic on its own, matching the per-statement guarantees of the
//! Postgres repositories.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use pgvector::Vector;
use serde_json::{json, Value as JsonValue};
use tokio::sync::RwLock;
use uuid::Uuid;

use rhizome_core::{
    Annotation, AnnotationRepository, BatchTag, Chunk, ChunkRepository, Connection,
    ConnectionRepository, Document, DocumentRepository, DocumentStatus, Error, NewChunk,
    RecoveryOutcome, Result, SuggestedMatch,
};

#[derive(Default)]
struct State {
    documents: HashMap<Uuid, Document>,
    chunks: Vec<Chunk>,
    embeddings: HashMap<Uuid, Vector>,
    // keyed by v7 id, so iteration follows creation order
    annotations: BTreeMap<Uuid, Annotation>,
    connections: BTreeMap<Uuid, Connection>,
}

/// In-memory store for tests and embedded use.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending document.
    pub async fn create_document(&self, id: Uuid) {
        let mut state = self.state.write().await;
        state.documents.entry(id).or_insert_with(|| Document {
            id,
            status: DocumentStatus::Pending,
            processing_stage: None,
            progress: 0,
            error_message: None,
            updated_at: Utc::now(),
        });
    }

    /// Store an initial (non-reprocessed) chunk generation as current.
    pub async fn seed_chunks(&self, document_id: Uuid, chunks: Vec<NewChunk>) -> Vec<Chunk> {
        let mut state = self.state.write().await;
        let stored: Vec<Chunk> = chunks
            .into_iter()
            .map(|c| Chunk {
                id: Uuid::now_v7(),
                document_id,
                chunk_index: c.chunk_index,
                start_offset: c.start_offset,
                end_offset: c.end_offset,
                content: c.content,
                is_current: true,
                reprocessing_batch: None,
                metadata: c.metadata,
            })
            .collect();
        state.chunks.extend(stored.iter().cloned());
        stored
    }

    pub async fn insert_connection(&self, connection: Connection) {
        self.state
            .write()
            .await
            .connections
            .insert(connection.id, connection);
    }

    pub async fn connection(&self, id: Uuid) -> Option<Connection> {
        self.state.read().await.connections.get(&id).cloned()
    }

    pub async fn embedding(&self, chunk_id: Uuid) -> Option<Vector> {
        self.state.read().await.embeddings.get(&chunk_id).cloned()
    }
}

fn annotation_mut<'a>(state: &'a mut State, id: Uuid) -> Result<&'a mut Annotation> {
    state
        .annotations
        .get_mut(&id)
        .ok_or(Error::AnnotationNotFound(id))
}

fn sorted(mut chunks: Vec<Chunk>) -> Vec<Chunk> {
    chunks.sort_by(|a, b| {
        a.reprocessing_batch
            .cmp(&b.reprocessing_batch)
            .then(a.chunk_index.cmp(&b.chunk_index))
    });
    chunks
}

#[async_trait]
impl DocumentRepository for MemoryStore {
    async fn get(&self, id: Uuid) -> Result<Document> {
        self.state
            .read()
            .await
            .documents
            .get(&id)
            .cloned()
            .ok_or(Error::DocumentNotFound(id))
    }

    async fn set_status(&self, id: Uuid, status: DocumentStatus, error: Option<&str>) -> Result<()> {
        let mut state = self.state.write().await;
        let doc = state
            .documents
            .get_mut(&id)
            .ok_or(Error::DocumentNotFound(id))?;
        doc.status = status;
        doc.error_message = error.map(str::to_string);
        doc.updated_at = Utc::now();
        Ok(())
    }

    async fn set_progress(&self, id: Uuid, percent: i32, stage: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(doc) = state.documents.get_mut(&id) {
            doc.progress = percent;
            doc.processing_stage = Some(stage.to_string());
            doc.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[async_trait]
impl ChunkRepository for MemoryStore {
    async fn list_current(&self, document_id: Uuid) -> Result<Vec<Chunk>> {
        let state = self.state.read().await;
        Ok(sorted(
            state
                .chunks
                .iter()
                .filter(|c| c.document_id == document_id && c.is_current)
                .cloned()
                .collect(),
        ))
    }

    async fn list_all(&self, document_id: Uuid) -> Result<Vec<Chunk>> {
        let state = self.state.read().await;
        Ok(sorted(
            state
                .chunks
                .iter()
                .filter(|c| c.document_id == document_id)
                .cloned()
                .collect(),
        ))
    }

    async fn deactivate_current(&self, document_id: Uuid) -> Result<Vec<Uuid>> {
        let mut state = self.state.write().await;
        let mut ids = Vec::new();
        for c in state
            .chunks
            .iter_mut()
            .filter(|c| c.document_id == document_id && c.is_current)
        {
            c.is_current = false;
            ids.push(c.id);
        }
        Ok(ids)
    }

    async fn insert_batch(
        &self,
        document_id: Uuid,
        batch: &BatchTag,
        chunks: Vec<NewChunk>,
    ) -> Result<Vec<Chunk>> {
        let mut state = self.state.write().await;
        let mut stored = Vec::with_capacity(chunks.len());
        for c in chunks {
            let chunk = Chunk {
                id: Uuid::now_v7(),
                document_id,
                chunk_index: c.chunk_index,
                start_offset: c.start_offset,
                end_offset: c.end_offset,
                content: c.content,
                is_current: false,
                reprocessing_batch: Some(batch.clone()),
                metadata: c.metadata,
            };
            if let Some(vector) = c.embedding {
                state.embeddings.insert(chunk.id, vector);
            }
            stored.push(chunk);
        }
        state.chunks.extend(stored.iter().cloned());
        Ok(stored)
    }

    async fn activate_batch(&self, document_id: Uuid, batch: &BatchTag) -> Result<u64> {
        let mut state = self.state.write().await;
        let mut n = 0;
        for c in state.chunks.iter_mut().filter(|c| {
            c.document_id == document_id && c.reprocessing_batch.as_ref() == Some(batch)
        }) {
            c.is_current = true;
            n += 1;
        }
        Ok(n)
    }

    async fn delete_inactive(&self, document_id: Uuid) -> Result<u64> {
        let mut state = self.state.write().await;
        let before = state.chunks.len();
        let State {
            chunks, embeddings, ..
        } = &mut *state;
        chunks.retain(|c| {
            let keep = c.document_id != document_id || c.is_current;
            if !keep {
                embeddings.remove(&c.id);
            }
            keep
        });
        Ok((before - chunks.len()) as u64)
    }

    async fn delete_batch(&self, document_id: Uuid, batch: &BatchTag) -> Result<u64> {
        let mut state = self.state.write().await;
        let before = state.chunks.len();
        let State {
            chunks, embeddings, ..
        } = &mut *state;
        chunks.retain(|c| {
            let keep =
                c.document_id != document_id || c.reprocessing_batch.as_ref() != Some(batch);
            if !keep {
                embeddings.remove(&c.id);
            }
            keep
        });
        Ok((before - chunks.len()) as u64)
    }

    async fn reactivate(&self, chunk_ids: &[Uuid]) -> Result<u64> {
        let mut state = self.state.write().await;
        let mut n = 0;
        for c in state.chunks.iter_mut().filter(|c| chunk_ids.contains(&c.id)) {
            c.is_current = true;
            n += 1;
        }
        Ok(n)
    }
}

#[async_trait]
impl AnnotationRepository for MemoryStore {
    async fn list_for_document(&self, document_id: Uuid) -> Result<Vec<Annotation>> {
        let state = self.state.read().await;
        Ok(state
            .annotations
            .values()
            .filter(|a| a.document_id == document_id)
            .cloned()
            .collect())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Annotation>> {
        Ok(self.state.read().await.annotations.get(&id).cloned())
    }

    async fn insert(&self, annotation: &Annotation) -> Result<()> {
        let mut state = self.state.write().await;
        if state.annotations.contains_key(&annotation.id) {
            return Err(Error::InvalidInput(format!(
                "annotation {} already exists",
                annotation.id
            )));
        }
        state.annotations.insert(annotation.id, annotation.clone());
        Ok(())
    }

    async fn apply_recovery(&self, id: Uuid, outcome: &RecoveryOutcome) -> Result<()> {
        let mut state = self.state.write().await;
        let a = annotation_mut(&mut state, id)?;
        a.anchor.start_offset = outcome.new_start_offset;
        a.anchor.end_offset = outcome.new_end_offset;
        a.anchor.chunk_ids = outcome.chunk_ids.clone();
        a.anchor.original_chunk_index = outcome.new_chunk_index;
        a.anchor.text_context = outcome.context.clone();
        a.recovery_confidence = Some(outcome.confidence);
        a.recovery_method = Some(outcome.method);
        a.needs_review = false;
        a.suggested_match = None;
        a.unresolved = false;
        Ok(())
    }

    async fn flag_for_review(&self, id: Uuid, suggestion: &SuggestedMatch) -> Result<()> {
        let mut state = self.state.write().await;
        let a = annotation_mut(&mut state, id)?;
        a.needs_review = true;
        a.suggested_match = Some(suggestion.clone());
        a.unresolved = false;
        Ok(())
    }

    async fn mark_lost(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        let a = annotation_mut(&mut state, id)?;
        a.unresolved = true;
        a.needs_review = false;
        a.suggested_match = None;
        Ok(())
    }

    async fn restore(&self, annotation: &Annotation) -> Result<()> {
        let mut state = self.state.write().await;
        let a = annotation_mut(&mut state, annotation.id)?;
        *a = annotation.clone();
        Ok(())
    }
}

#[async_trait]
impl ConnectionRepository for MemoryStore {
    async fn list_for_chunks(&self, chunk_ids: &[Uuid]) -> Result<Vec<Connection>> {
        let state = self.state.read().await;
        Ok(state
            .connections
            .values()
            .filter(|c| {
                chunk_ids.contains(&c.source_chunk_id) || chunk_ids.contains(&c.target_chunk_id)
            })
            .cloned()
            .collect())
    }

    async fn update_endpoints(&self, id: Uuid, source: Uuid, target: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        let c = state
            .connections
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("connection {}", id)))?;
        c.source_chunk_id = source;
        c.target_chunk_id = target;
        Ok(())
    }

    async fn flag_stale(&self, id: Uuid, reason: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let c = state
            .connections
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("connection {}", id)))?;
        if !c.metadata.is_object() {
            c.metadata = json!({});
        }
        if let JsonValue::Object(map) = &mut c.metadata {
            map.insert("stale_reference".into(), JsonValue::Bool(true));
            map.insert("stale_reason".into(), JsonValue::String(reason.to_string()));
        }
        Ok(())
    }

    async fn restore(&self, connection: &Connection) -> Result<()> {
        let mut state = self.state.write().await;
        let c = state
            .connections
            .get_mut(&connection.id)
            .ok_or_else(|| Error::NotFound(format!("connection {}", connection.id)))?;
        c.source_chunk_id = connection.source_chunk_id;
        c.target_chunk_id = connection.target_chunk_id;
        c.metadata = connection.metadata.clone();
        Ok(())
    }
}
