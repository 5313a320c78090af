pub mod associative;
pub mod event_log;
pub mod retrieval;
pub mod schema;
pub mod scratch;
pub mod scratch_store;
pub mod spatial;
pub mod spatial_store;

pub use associative::{AssociativeMemory, compress_for_embedding_key};
pub use event_log::AssociativeMemoryStore;
pub use retrieval::{
    ReactiveRetrieval, RetrievalWeights, ScoredNode, retrieve_focal_points, retrieve_for_reactive_stage,
};
pub use schema::{ChatLine, ConceptNode, Filling, NodeId, NodeKind};
pub use scratch::{EventTriple, Scratch, ScheduleSlot};
pub use scratch_store::ScratchStore;
pub use spatial::SpatialMemory;
pub use spatial_store::SpatialMemoryStore;
