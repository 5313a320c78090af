//! Focal-point retrieval: recency x relevance x importance scoring over a
//! persona's event/thought streams.

use crate::associative::AssociativeMemory;
use crate::schema::{ConceptNode, NodeId};

/// Per-persona tunables the scoring formula is built from. `g_*` are the
/// implementation-tunable group weights; `w_*` are the per-persona weights
/// layered on top of them.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalWeights {
    pub w_recency: f32,
    pub w_relevance: f32,
    pub w_importance: f32,
    pub g_recency: f32,
    pub g_relevance: f32,
    pub g_importance: f32,
    pub recency_decay: f32,
}

/// A node paired with its retrieval score and the sub-scores it was built
/// from, useful for debugging/printing.
#[derive(Debug, Clone)]
pub struct ScoredNode {
    pub id: NodeId,
    pub score: f32,
    pub recency: f32,
    pub relevance: f32,
    pub importance: f32,
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Min-max normalize `values` to `[0, 1]`; a zero range yields `0.5` for
/// every element (the candidate set carries no discriminating signal).
fn normalize_minmax(values: &[f32]) -> Vec<f32> {
    if values.is_empty() {
        return Vec::new();
    }
    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if (max - min).abs() < f32::EPSILON {
        return vec![0.5; values.len()];
    }
    values.iter().map(|v| (v - min) / (max - min)).collect()
}

/// Candidate nodes for a focal-point retrieval pass: `seq_event ∪
/// seq_thought`, excluding idle events, sorted ascending by `last_accessed`
/// (oldest first — the order the recency formula expects).
fn candidate_nodes(memory: &AssociativeMemory) -> Vec<&ConceptNode> {
    let mut candidates: Vec<&ConceptNode> = memory
        .seq_event()
        .into_iter()
        .filter(|node| !node.embedding_key.to_lowercase().contains("idle"))
        .chain(memory.seq_thought())
        .collect();
    candidates.sort_by(|a, b| a.last_accessed.cmp(&b.last_accessed));
    candidates
}

/// Score and rank every candidate node against a single `focal_point`
/// embedding, returning the top `n_count` by descending combined score.
/// Touches `last_accessed` on every returned node (set to `curr_time`) —
/// the only place focal-point retrieval mutates memory.
pub fn retrieve_focal_points(
    memory: &mut AssociativeMemory,
    focal_point_embedding: &[f32],
    weights: RetrievalWeights,
    n_count: usize,
    curr_time: &str,
) -> Vec<ScoredNode> {
    let candidates = candidate_nodes(memory);
    let n = candidates.len();
    if n == 0 {
        return Vec::new();
    }

    let recency_raw: Vec<f32> = (1..=n)
        .map(|i| weights.recency_decay.powi((n - i) as i32))
        .collect();
    let importance_raw: Vec<f32> = candidates.iter().map(|node| node.poignancy as f32).collect();
    let relevance_raw: Vec<f32> = candidates
        .iter()
        .map(|node| {
            memory
                .embeddings
                .get(&node.embedding_key)
                .map(|embedding| cosine_similarity(focal_point_embedding, embedding))
                .unwrap_or(0.0)
        })
        .collect();

    let recency = normalize_minmax(&recency_raw);
    let importance = normalize_minmax(&importance_raw);
    let relevance = normalize_minmax(&relevance_raw);

    let mut scored: Vec<ScoredNode> = candidates
        .iter()
        .enumerate()
        .map(|(i, node)| {
            let score = weights.w_recency * recency[i] * weights.g_recency
                + weights.w_relevance * relevance[i] * weights.g_relevance
                + weights.w_importance * importance[i] * weights.g_importance;
            ScoredNode {
                id: node.id,
                score,
                recency: recency[i],
                relevance: relevance[i],
                importance: importance[i],
            }
        })
        .collect();

    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(n_count);

    for scored_node in &scored {
        memory.touch_last_accessed(scored_node.id, curr_time);
    }

    scored
}

/// The simpler retrieval variant used by the reactive planning stage: for a
/// single perceived event, gather the events/thoughts its `(s, p, o)`
/// matches as keywords. The focal event itself is returned alongside so
/// callers don't have to look it up twice.
pub struct ReactiveRetrieval<'a> {
    pub curr_event: &'a ConceptNode,
    pub events: Vec<&'a ConceptNode>,
    pub thoughts: Vec<&'a ConceptNode>,
}

pub fn retrieve_for_reactive_stage<'a>(
    memory: &'a AssociativeMemory,
    curr_event: &'a ConceptNode,
) -> ReactiveRetrieval<'a> {
    ReactiveRetrieval {
        curr_event,
        events: memory.retrieve_relevant_events(&curr_event.subject, &curr_event.predicate, &curr_event.object),
        thoughts: memory.retrieve_relevant_thoughts(&curr_event.subject, &curr_event.predicate, &curr_event.object),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn default_weights() -> RetrievalWeights {
        RetrievalWeights {
            w_recency: 1.0,
            w_relevance: 1.0,
            w_importance: 1.0,
            g_recency: 0.5,
            g_relevance: 3.0,
            g_importance: 2.0,
            recency_decay: 0.99,
        }
    }

    fn kw(words: &[&str]) -> HashSet<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn normalize_minmax_falls_back_to_half_on_zero_range() {
        let values = vec![3.0, 3.0, 3.0];
        assert_eq!(normalize_minmax(&values), vec![0.5, 0.5, 0.5]);
    }

    #[test]
    fn normalize_minmax_maps_extremes_to_zero_and_one() {
        let values = vec![1.0, 5.0, 3.0];
        let normalized = normalize_minmax(&values);
        assert_eq!(normalized[0], 0.0);
        assert_eq!(normalized[1], 1.0);
    }

    #[test]
    fn returns_at_most_n_count_sorted_descending() {
        let mut mem = AssociativeMemory::new();
        for i in 0..5 {
            mem.add_event("t", None, "Isabella", "is", format!("act-{i}"), "x", kw(&["x"]), (i + 1) as u8);
        }
        let scored = retrieve_focal_points(&mut mem, &[], default_weights(), 3, "curr");
        assert!(scored.len() <= 3);
        for pair in scored.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn idle_events_are_excluded_from_candidates() {
        let mut mem = AssociativeMemory::new();
        mem.add_event("t0", None, "Isabella", "is", "idle", "", kw(&[]), 1);
        mem.add_event("t1", None, "Isabella", "is", "reading", "reading a book", kw(&["reading"]), 5);
        let scored = retrieve_focal_points(&mut mem, &[], default_weights(), 10, "curr");
        assert_eq!(scored.len(), 1);
    }

    #[test]
    fn retrieval_touches_last_accessed_on_selected_nodes() {
        let mut mem = AssociativeMemory::new();
        let id = mem.add_event("t0", None, "Isabella", "is", "reading", "reading", kw(&["reading"]), 5);
        retrieve_focal_points(&mut mem, &[], default_weights(), 10, "new_curr_time");
        assert_eq!(mem.node(id).unwrap().last_accessed, "new_curr_time");
    }

    #[test]
    fn newest_node_has_strongest_recency_component() {
        let mut mem = AssociativeMemory::new();
        mem.add_event("t0", None, "Isabella", "is", "old-thing", "old", kw(&["old"]), 1);
        let newest = mem.add_event("t1", None, "Isabella", "is", "new-thing", "new", kw(&["new"]), 1);
        let scored = retrieve_focal_points(&mut mem, &[], default_weights(), 10, "curr");
        let newest_scored = scored.iter().find(|s| s.id == newest).unwrap();
        assert_eq!(newest_scored.recency, 1.0);
    }
}
