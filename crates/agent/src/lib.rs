//! Persona: the per-agent aggregate tying short-term scratch state to a
//! persona's two memory stores, plus the per-tick cognition pipeline built
//! on top of `townsim_thinker` and `townsim_exec`.

pub mod execute;
pub mod perceive;
pub mod reflect;
pub mod tick;

use townsim_memory::{AssociativeMemory, RetrievalWeights, Scratch, SpatialMemory};

/// One simulated agent. The maze and LLM gateway are shared resources
/// threaded in per-tick by the world loop rather than owned here.
#[derive(Debug, Clone)]
pub struct Persona {
    pub scratch: Scratch,
    pub associative: AssociativeMemory,
    pub spatial: SpatialMemory,
}

impl Persona {
    pub fn new(scratch: Scratch, associative: AssociativeMemory, spatial: SpatialMemory) -> Self {
        Self { scratch, associative, spatial }
    }

    /// This persona's retrieval weights: its own `w_*` tunables layered on
    /// the fixed group weights.
    pub fn retrieval_weights(&self) -> RetrievalWeights {
        RetrievalWeights {
            w_recency: self.scratch.recency_w,
            w_relevance: self.scratch.relevance_w,
            w_importance: self.scratch.importance_w,
            g_recency: 0.5,
            g_relevance: 3.0,
            g_importance: 2.0,
            recency_decay: self.scratch.recency_decay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retrieval_weights_carries_per_persona_tunables() {
        let mut scratch = Scratch::new("Isabella Rodriguez", "February 13, 2023, 00:00:00", (0, 0));
        scratch.recency_w = 2.0;
        let persona = Persona::new(scratch, AssociativeMemory::new(), SpatialMemory::new());
        let weights = persona.retrieval_weights();
        assert_eq!(weights.w_recency, 2.0);
        assert_eq!(weights.g_relevance, 3.0);
    }
}
