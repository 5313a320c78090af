//! `ConceptNode`: the single node type every associative-memory stream is
//! built from.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Monotonically increasing node identity, unique across a persona's entire
/// memory (events, thoughts, and chats share one counter). A plain integer
/// rather than a `Uuid` — node order is load-bearing (DAG-by-construction
/// thought citations, reverse-chronological sequences) and a `u64` sorts and
/// serializes exactly the way the on-disk `node_N` naming expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node_{}", self.0)
    }
}

/// The three node kinds an associative memory stores. Each has its own
/// sequence and per-type counter; `depth` and `filling` are interpreted
/// differently per kind (see field docs below).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Event,
    Thought,
    Chat,
}

/// A single line of one chat turn, `(speaker, utterance)`.
pub type ChatLine = (String, String);

/// What a node's `filling` holds, which depends on its `kind`:
/// - `Event`/nothing cited: empty.
/// - `Thought`: the ids of the nodes this thought was derived from.
/// - `Chat`: the full utterance transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Filling {
    Citations(Vec<NodeId>),
    Transcript(Vec<ChatLine>),
}

impl Default for Filling {
    fn default() -> Self {
        Filling::Citations(Vec::new())
    }
}

/// A single node in a persona's associative memory: an event, a thought, or
/// a chat, uniformly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptNode {
    pub id: NodeId,
    /// 1-indexed count of nodes of this `kind` created so far, inclusive of
    /// this one (`node.type_count == 3` is the 3rd event ever recorded).
    pub type_count: u64,
    pub kind: NodeKind,
    /// Thought-chain length: 0 for events and chats, `1 + max(depth of cited
    /// nodes)` for thoughts.
    pub depth: u32,
    /// Simulated time this node was created.
    pub created: String,
    pub expiration: Option<String>,
    /// Simulated time this node was last surfaced by retrieval; touched by
    /// focal-point retrieval when the node is selected.
    pub last_accessed: String,
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub description: String,
    /// Key into the owning memory's `embeddings` map.
    pub embedding_key: String,
    /// Importance, 1-10.
    pub poignancy: u8,
    pub keywords: HashSet<String>,
    #[serde(default)]
    pub filling: Filling,
}

impl ConceptNode {
    /// `"{subject}: {predicate} {object}"`, the compact form used in
    /// reflection/planning prompt context.
    pub fn spo_summary(&self) -> String {
        format!("{}: {} {}", self.subject, self.predicate, self.object)
    }

    pub fn is_idle(&self) -> bool {
        self.predicate == "is" && self.object == "idle"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_displays_with_prefix() {
        assert_eq!(NodeId(7).to_string(), "node_7");
    }

    #[test]
    fn spo_summary_formats_triple() {
        let node = ConceptNode {
            id: NodeId(1),
            type_count: 1,
            kind: NodeKind::Event,
            depth: 0,
            created: "February 13, 2023, 00:00:00".to_string(),
            expiration: None,
            last_accessed: "February 13, 2023, 00:00:00".to_string(),
            subject: "Isabella".to_string(),
            predicate: "is".to_string(),
            object: "reading".to_string(),
            description: "Isabella is reading".to_string(),
            embedding_key: "Isabella is reading".to_string(),
            poignancy: 3,
            keywords: HashSet::new(),
            filling: Filling::default(),
        };
        assert_eq!(node.spo_summary(), "Isabella: is reading");
    }
}
