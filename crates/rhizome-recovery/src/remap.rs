//! Overlap-based mapping of old chunks onto a new chunk layout.
//!
//! Pure decision logic for the connection remapper: for each old chunk,
//! which new chunk (if any) inherits its connections.

use std::collections::HashMap;

use rhizome_core::{Chunk, RemapConfig};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where an old chunk's connections should point after reprocessing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChunkMapping {
    /// A single new chunk covers enough of the old span.
    Remapped { chunk_id: Uuid, fraction: f64 },
    /// The best candidates are too close to pick one.
    Ambiguous { candidates: Vec<Uuid>, fraction: f64 },
    /// No new chunk covers enough of the old span.
    Unmapped { best_fraction: f64 },
}

impl ChunkMapping {
    pub fn target(&self) -> Option<Uuid> {
        match self {
            Self::Remapped { chunk_id, .. } => Some(*chunk_id),
            _ => None,
        }
    }
}

/// Map one old chunk onto the new layout.
///
/// The fraction is `overlap / old span`. Candidates within `ambiguity_epsilon`
/// of the best are ambiguous, otherwise the best wins if it reaches
/// `overlap_threshold`.
pub fn map_chunk(old: &Chunk, new_chunks: &[Chunk], config: &RemapConfig) -> ChunkMapping {
    let span = old.span_len();
    if span == 0 {
        return ChunkMapping::Unmapped { best_fraction: 0.0 };
    }

    let mut scored: Vec<(f64, usize, Uuid)> = new_chunks
        .iter()
        .filter_map(|c| {
            let overlap = c.overlap_with(old.start_offset, old.end_offset);
            (overlap > 0).then(|| (overlap as f64 / span as f64, c.chunk_index, c.id))
        })
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));

    let Some(&(best, _, best_id)) = scored.first() else {
        return ChunkMapping::Unmapped { best_fraction: 0.0 };
    };

    // float slack so 0.55 vs 0.50 counts as within 0.05
    let tied: Vec<Uuid> = scored
        .iter()
        .take_while(|(f, _, _)| best - f <= config.ambiguity_epsilon + 1e-12)
        .map(|(_, _, id)| *id)
        .collect();
    if tied.len() > 1 {
        return ChunkMapping::Ambiguous {
            candidates: tied,
            fraction: best,
        };
    }

    if best < config.overlap_threshold {
        return ChunkMapping::Unmapped {
            best_fraction: best,
        };
    }

    ChunkMapping::Remapped {
        chunk_id: best_id,
        fraction: best,
    }
}

/// Map every old chunk, keyed by old chunk id.
pub fn build_mapping(
    old_chunks: &[Chunk],
    new_chunks: &[Chunk],
    config: &RemapConfig,
) -> HashMap<Uuid, ChunkMapping> {
    old_chunks
        .iter()
        .map(|old| (old.id, map_chunk(old, new_chunks, config)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(index: usize, start: usize, end: usize) -> Chunk {
        Chunk {
            id: Uuid::new_v4(),
            document_id: Uuid::nil(),
            chunk_index: index,
            start_offset: start,
            end_offset: end,
            content: String::new(),
            is_current: true,
            reprocessing_batch: None,
            metadata: None,
        }
    }

    #[test]
    fn test_larger_overlap_wins() {
        // old span 200: first new chunk covers 120, second 80
        let old = chunk(0, 100, 300);
        let a = chunk(0, 0, 220);
        let b = chunk(1, 220, 400);
        let mapping = map_chunk(&old, &[a.clone(), b], &RemapConfig::default());
        assert_eq!(
            mapping,
            ChunkMapping::Remapped {
                chunk_id: a.id,
                fraction: 0.6
            }
        );
    }

    #[test]
    fn test_equal_overlap_is_ambiguous() {
        let old = chunk(0, 0, 200);
        let a = chunk(0, 0, 100);
        let b = chunk(1, 100, 200);
        let mapping = map_chunk(&old, &[a.clone(), b.clone()], &RemapConfig::default());
        assert_eq!(
            mapping,
            ChunkMapping::Ambiguous {
                candidates: vec![a.id, b.id],
                fraction: 0.5
            }
        );
    }

    #[test]
    fn test_small_overlap_is_unmapped() {
        let old = chunk(0, 0, 100);
        let a = chunk(0, 60, 200);
        let mapping = map_chunk(&old, &[a], &RemapConfig::default());
        assert_eq!(mapping, ChunkMapping::Unmapped { best_fraction: 0.4 });
        assert_eq!(mapping.target(), None);
    }

    #[test]
    fn test_no_overlap_is_unmapped() {
        let old = chunk(0, 0, 100);
        let a = chunk(0, 100, 200);
        assert_eq!(
            map_chunk(&old, &[a], &RemapConfig::default()),
            ChunkMapping::Unmapped { best_fraction: 0.0 }
        );
    }

    #[test]
    fn test_build_mapping_covers_every_old_chunk() {
        let old = vec![chunk(0, 0, 50), chunk(1, 50, 100)];
        let new = vec![chunk(0, 0, 100)];
        let table = build_mapping(&old, &new, &RemapConfig::default());
        assert_eq!(table.len(), 2);
        assert!(table.values().all(|m| m.target() == Some(new[0].id)));
    }
}
