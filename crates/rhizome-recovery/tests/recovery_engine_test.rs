//! End-to-end behaviour of the recovery engine on realistic documents.

use rhizome_core::{
    Annotation, AnnotationAnchor, Chunk, RecoveryConfig, RecoveryMethod, RecoveryResult,
    RecoveryTier,
};
use rhizome_recovery::{CharText, RecoveryEngine};
use uuid::Uuid;

const FILLER: &str = "lorem ipsum dolor sit amet consectetur adipiscing elit ";
const NEEDLE: &str = "the convergence thesis";

fn filler(len: usize) -> String {
    FILLER.chars().cycle().take(len).collect()
}

/// Chunks cut at the given character boundaries.
fn chunks_at(text: &str, bounds: &[usize]) -> Vec<Chunk> {
    let t = CharText::new(text);
    bounds
        .windows(2)
        .enumerate()
        .map(|(i, w)| Chunk {
            id: Uuid::new_v4(),
            document_id: Uuid::nil(),
            chunk_index: i,
            start_offset: w[0],
            end_offset: w[1],
            content: t.slice(w[0], w[1]).to_string(),
            is_current: true,
            reprocessing_batch: None,
            metadata: None,
        })
        .collect()
}

fn anchor_at(text: &str, start: usize, len: usize, chunks: &[Chunk]) -> Annotation {
    let t = CharText::new(text);
    let end = start + len;
    let owning: Vec<&Chunk> = chunks.iter().filter(|c| c.touches(start, end)).collect();
    Annotation::new(
        Uuid::nil(),
        AnnotationAnchor {
            chunk_ids: owning.iter().map(|c| c.id).collect(),
            start_offset: start,
            end_offset: end,
            original_text: t.slice(start, end).to_string(),
            text_context: t.context_around(start, end, 100),
            original_chunk_index: owning.first().map(|c| c.chunk_index),
        },
    )
}

#[test]
fn test_shifted_chunk_boundaries_recover_at_new_literal_position() {
    let old_text = format!("{}{}{}", filler(518), NEEDLE, filler(460));
    let new_text = format!("{}{}{}", filler(512), NEEDLE, filler(466));
    let old_len = old_text.chars().count();
    let new_len = new_text.chars().count();

    let old_chunks = chunks_at(&old_text, &[0, 100, 200, 300, 400, 500, 700, old_len]);
    let new_chunks = chunks_at(&new_text, &[0, 95, 195, 295, 395, 495, 705, new_len]);
    let annotation = anchor_at(&old_text, 518, NEEDLE.len(), &old_chunks);
    assert_eq!(annotation.anchor.original_chunk_index, Some(5));

    let result = RecoveryEngine::default().recover(&annotation, &new_text, &new_chunks, &old_chunks);
    let RecoveryResult::Success(outcome) = result else {
        panic!("expected success, got {:?}", result);
    };
    assert_eq!(outcome.confidence, 1.0);
    assert_eq!(outcome.method, RecoveryMethod::Exact);
    assert_eq!(outcome.new_start_offset, 512);
    assert_eq!(outcome.new_end_offset, 512 + NEEDLE.len());
    assert_eq!(outcome.new_chunk_id, Some(new_chunks[5].id));
    assert_eq!(outcome.new_chunk_index, Some(5));
}

#[test]
fn test_identical_text_keeps_every_annotation_in_place() {
    let text = format!(
        "{}{}{}The second claim follows.{}",
        filler(300),
        NEEDLE,
        filler(250),
        filler(200)
    );
    let len = text.chars().count();
    let chunks = chunks_at(&text, &[0, 200, 400, 600, len]);
    let t = CharText::new(&text);
    let annotations: Vec<Annotation> = [NEEDLE, "The second claim follows."]
        .iter()
        .map(|n| {
            let start = t.find_all(n, 0, len)[0];
            anchor_at(&text, start, n.chars().count(), &chunks)
        })
        .collect();

    let results = RecoveryEngine::default().recover_all(&annotations, &text, &chunks, &chunks);
    assert_eq!(results.len(), annotations.len());
    for ((id, result), annotation) in results.iter().zip(&annotations) {
        assert_eq!(*id, annotation.id);
        let outcome = result.outcome().expect("located");
        assert_eq!(result.tier(), RecoveryTier::Success);
        assert_eq!(outcome.method, RecoveryMethod::Exact);
        assert_eq!(outcome.confidence, 1.0);
        assert_eq!(outcome.new_start_offset, annotation.anchor.start_offset);
        assert_eq!(outcome.new_end_offset, annotation.anchor.end_offset);
    }
}

#[test]
fn test_verbatim_text_is_never_lost_or_reviewed() {
    let old_text = format!("{}{}{}", filler(900), NEEDLE, filler(100));
    // heavy edit far away, annotation text untouched
    let new_text = format!("Entirely new opening section. {}{}{}", filler(40), NEEDLE, filler(3000));
    let old_len = old_text.chars().count();
    let new_len = new_text.chars().count();
    let old_chunks = chunks_at(&old_text, &[0, 500, old_len]);
    let new_chunks = chunks_at(&new_text, &[0, 1000, 2000, new_len]);
    let annotation = anchor_at(&old_text, 900, NEEDLE.len(), &old_chunks);

    let result = RecoveryEngine::default().recover(&annotation, &new_text, &new_chunks, &old_chunks);
    assert_eq!(result.tier(), RecoveryTier::Success);
    assert_eq!(result.confidence(), 1.0);
}

#[test]
fn test_repeated_text_resolves_by_context() {
    let text = format!(
        "Chapter one. {} opens the book. {} Chapter two. {} closes the book.",
        NEEDLE,
        filler(400),
        NEEDLE
    );
    let len = text.chars().count();
    let chunks = chunks_at(&text, &[0, 250, len]);
    let t = CharText::new(&text);
    let second = t.find_all(NEEDLE, 0, len)[1];
    let annotation = anchor_at(&text, second, NEEDLE.len(), &chunks);

    let result = RecoveryEngine::default().recover(&annotation, &text, &chunks, &chunks);
    let outcome = result.outcome().expect("located");
    assert_eq!(outcome.new_start_offset, second);
}

#[test]
fn test_fuzzy_match_goes_to_review_with_suggestion_data() {
    let old_text = format!("{}The committee approved the budget proposal today.{}", filler(200), filler(200));
    let new_text = format!("{}Yesterday the committee approved a budget plan.{}", filler(200), filler(200));
    let old_len = old_text.chars().count();
    let new_len = new_text.chars().count();
    let old_chunks = chunks_at(&old_text, &[0, 150, 300, old_len]);
    let new_chunks = chunks_at(&new_text, &[0, 150, 300, new_len]);
    let annotation = anchor_at(&old_text, 204, 30, &old_chunks);

    let engine = RecoveryEngine::new(RecoveryConfig::default().with_context_window(50));
    let result = engine.recover(&annotation, &new_text, &new_chunks, &old_chunks);
    assert_eq!(result.tier(), RecoveryTier::NeedsReview);
    let outcome = result.outcome().expect("suggestion");
    assert!(outcome.confidence <= 0.84);
    assert!(!outcome.chunk_ids.is_empty());
    assert!(!outcome.context.before.is_empty());
}

#[test]
fn test_recovery_is_deterministic() {
    let old_text = format!("{}A sentence that will be slightly changed here.{}", filler(120), filler(120));
    let new_text = format!("{}A sentence which was slightly changed here.{}", filler(120), filler(120));
    let old_chunks = chunks_at(&old_text, &[0, 100, old_text.chars().count()]);
    let new_chunks = chunks_at(&new_text, &[0, 100, new_text.chars().count()]);
    let annotation = anchor_at(&old_text, 120, 46, &old_chunks);

    let engine = RecoveryEngine::default();
    let first = engine.recover(&annotation, &new_text, &new_chunks, &old_chunks);
    for _ in 0..5 {
        assert_eq!(engine.recover(&annotation, &new_text, &new_chunks, &old_chunks), first);
    }
}
