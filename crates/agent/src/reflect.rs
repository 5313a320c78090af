//! Reflection: the contract boundary perception's `importance_trigger_curr`
//! gates. Once the accumulated poignancy of perceived events crosses the
//! trigger, summarize recent high-salience memory into new thought nodes and
//! reset the gate.

use townsim_llm::{GenerationParams, LlmGateway, safe_generate};
use townsim_memory::{AssociativeMemory, RetrievalWeights, Scratch};
use townsim_thinker::retrieve::{resolve, retrieve};

const REFLECTION_FOCAL_POINTS: [&str; 2] = ["today's events", "recent important thoughts"];

pub fn should_reflect(scratch: &Scratch) -> bool {
    scratch.importance_trigger_curr <= 0
}

fn reset(scratch: &mut Scratch) {
    scratch.importance_trigger_curr = scratch.importance_trigger_max;
    scratch.importance_ele_n = 0;
}

/// Run one reflection pass, writing at most a handful of new thought nodes.
/// Always resets the trigger, even when retrieval or generation comes back
/// empty, so a quiet tick doesn't retry reflection every subsequent tick.
pub async fn reflect(scratch: &mut Scratch, memory: &mut AssociativeMemory, gateway: &LlmGateway, weights: RetrievalWeights) {
    let focal_points: Vec<String> = REFLECTION_FOCAL_POINTS.iter().map(|s| s.to_string()).collect();
    let retrieved = retrieve(memory, gateway, &focal_points, weights, 15, &scratch.curr_time).await.unwrap_or_default();

    let mut summaries = Vec::new();
    for focal_point in &focal_points {
        if let Some(scored) = retrieved.get(focal_point) {
            summaries.extend(resolve(memory, scored).into_iter().map(|node| node.spo_summary()));
        }
    }

    if summaries.is_empty() {
        reset(scratch);
        return;
    }

    let prompt = format!(
        "{name}'s recent memories:\n{summaries}\n\nWrite 1 to 3 short high-level insights {name} might draw \
         from these, one per line, no numbering.",
        name = scratch.name,
        summaries = summaries.join("\n"),
    );
    let raw = safe_generate(
        gateway,
        &prompt,
        &GenerationParams::default(),
        3,
        String::new(),
        |_raw| true,
        |raw| raw.trim().to_string(),
    )
    .await;

    for insight in raw.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let embedding = gateway.embed(insight).await.unwrap_or_default();
        memory.add_thought(
            scratch.curr_time.clone(),
            None,
            scratch.name.clone(),
            "reflects",
            insight.to_string(),
            insight.to_string(),
            Default::default(),
            5,
            Vec::new(),
        );
        memory.embeddings.insert(insight.to_string(), embedding);
    }

    reset(scratch);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

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
    fn should_reflect_triggers_at_or_below_zero() {
        let mut scratch = Scratch::new("Isabella", "February 13, 2023, 00:00:00", (0, 0));
        scratch.importance_trigger_curr = 1;
        assert!(!should_reflect(&scratch));
        scratch.importance_trigger_curr = 0;
        assert!(should_reflect(&scratch));
    }

    #[tokio::test]
    async fn reflect_resets_the_trigger_even_with_no_memories() {
        let mut scratch = Scratch::new("Isabella", "February 13, 2023, 00:00:00", (0, 0));
        scratch.importance_trigger_curr = -5;
        let mut memory = AssociativeMemory::new();
        let gateway = LlmGateway::ollama("http://127.0.0.1:1", Duration::from_millis(20), "m", "e");

        reflect(&mut scratch, &mut memory, &gateway, weights()).await;

        assert_eq!(scratch.importance_trigger_curr, scratch.importance_trigger_max);
        assert_eq!(scratch.importance_ele_n, 0);
    }
}
