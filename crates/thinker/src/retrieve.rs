//! Retrieve: turns a set of focal-point strings into ranked memory nodes,
//! the thin seam between the tick loop and `townsim_memory::retrieval`.

use std::collections::HashMap;

use townsim_llm::LlmGateway;
use townsim_memory::{AssociativeMemory, ConceptNode, RetrievalWeights, ScoredNode};

/// Run focal-point retrieval once per `focal_points` entry, embedding each
/// point through `gateway` and scoring against `memory`. Returns a map
/// keyed by the literal focal-point string, in call order.
pub async fn retrieve(
    memory: &mut AssociativeMemory,
    gateway: &LlmGateway,
    focal_points: &[String],
    weights: RetrievalWeights,
    n_count: usize,
    curr_time: &str,
) -> anyhow::Result<HashMap<String, Vec<ScoredNode>>> {
    let mut out = HashMap::with_capacity(focal_points.len());
    for focal_point in focal_points {
        let embedding = gateway.embed(focal_point).await.unwrap_or_default();
        let scored = townsim_memory::retrieve_focal_points(memory, &embedding, weights, n_count, curr_time);
        out.insert(focal_point.clone(), scored);
    }
    Ok(out)
}

/// Resolve a focal-point retrieval result back into full `ConceptNode`s, in
/// score order, for a single focal point.
pub fn resolve<'a>(memory: &'a AssociativeMemory, scored: &[ScoredNode]) -> Vec<&'a ConceptNode> {
    scored.iter().filter_map(|s| memory.node(s.id)).collect()
}

/// The reactive-stage variant: no embeddings involved, pure keyword match
/// against a single perceived event.
pub fn retrieve_reactive<'a>(
    memory: &'a AssociativeMemory,
    curr_event: &'a ConceptNode,
) -> townsim_memory::ReactiveRetrieval<'a> {
    townsim_memory::retrieve_for_reactive_stage(memory, curr_event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use townsim_llm::{GenerationParams, OllamaBackend};

    fn kw(words: &[&str]) -> HashSet<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    fn weights() -> RetrievalWeights {
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

    #[test]
    fn resolve_maps_scored_nodes_back_to_full_nodes() {
        let mut mem = AssociativeMemory::new();
        let id = mem.add_event("t0", None, "Isabella", "is", "reading", "reading", kw(&["reading"]), 3);
        let scored = townsim_memory::retrieve_focal_points(&mut mem, &[], weights(), 10, "curr");
        let nodes = resolve(&mem, &scored);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].id, id);
    }

    #[tokio::test]
    async fn retrieve_returns_an_entry_per_focal_point_even_when_embed_fails() {
        // An unreachable base URL exercises the "embed failed -> empty vector"
        // fallback path without requiring a live Ollama instance.
        let gateway = LlmGateway::ollama(
            "http://127.0.0.1:1",
            std::time::Duration::from_millis(50),
            "test-model",
            "test-embed",
        );
        let mut mem = AssociativeMemory::new();
        mem.add_event("t0", None, "Isabella", "is", "reading", "reading", kw(&["reading"]), 3);

        let focal_points = vec!["plan for today".to_string(), "important recent events".to_string()];
        let result = retrieve(&mut mem, &gateway, &focal_points, weights(), 10, "curr").await.unwrap();
        assert_eq!(result.len(), 2);
        assert!(result.contains_key("plan for today"));
        let _ = GenerationParams::default();
        let _ = OllamaBackend::new("http://127.0.0.1:1", std::time::Duration::from_millis(1));
    }
}
