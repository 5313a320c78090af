//! Append-only associative memory: the three node streams (events,
//! thoughts, chats), their keyword indices, and keyword-strength tallies.

use std::collections::{HashMap, HashSet};

use crate::schema::{ChatLine, ConceptNode, Filling, NodeId, NodeKind};

/// Rewrite `"... (detail)"` descriptions to a compressed embedding key: the
/// first three tokens of the prefix plus the parenthesized detail. Public so
/// perception can embed text under the exact key `add_event` will assign.
pub fn compress_for_embedding_key(description: &str) -> String {
    let Some(open) = description.find('(') else {
        return description.to_string();
    };
    let Some(close_rel) = description[open..].find(')') else {
        return description.to_string();
    };
    let prefix = &description[..open];
    let detail = &description[open + 1..open + close_rel];
    let first_three: Vec<&str> = prefix.split_whitespace().take(3).collect();
    format!("{} {}", first_three.join(" "), detail.trim())
}

#[derive(Debug, Clone, Default)]
pub struct AssociativeMemory {
    /// Canonical node storage, keyed by id.
    nodes: HashMap<NodeId, ConceptNode>,
    /// Most-recent-first id sequences, one per kind.
    seq_event: Vec<NodeId>,
    seq_thought: Vec<NodeId>,
    seq_chat: Vec<NodeId>,
    /// Lowercased keyword -> most-recent-first node ids.
    kw_to_event: HashMap<String, Vec<NodeId>>,
    kw_to_thought: HashMap<String, Vec<NodeId>>,
    kw_to_chat: HashMap<String, Vec<NodeId>>,
    /// Tallies over the event/thought streams, excluding the "is idle"
    /// trivial event.
    kw_strength_event: HashMap<String, u32>,
    kw_strength_thought: HashMap<String, u32>,
    pub embeddings: HashMap<String, Vec<f32>>,
    next_id: u64,
    event_count: u64,
    thought_count: u64,
    chat_count: u64,
}

impl AssociativeMemory {
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh_id(&mut self) -> NodeId {
        self.next_id += 1;
        NodeId(self.next_id)
    }

    fn index_keywords(index: &mut HashMap<String, Vec<NodeId>>, keywords: &HashSet<String>, id: NodeId) {
        for keyword in keywords {
            index.entry(keyword.to_lowercase()).or_default().insert(0, id);
        }
    }

    fn bump_strength(strengths: &mut HashMap<String, u32>, keywords: &HashSet<String>) {
        for keyword in keywords {
            *strengths.entry(keyword.to_lowercase()).or_insert(0) += 1;
        }
    }

    /// Record a new event node. `cited` is always empty for events.
    pub fn add_event(
        &mut self,
        created: impl Into<String>,
        expiration: Option<String>,
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
        description: impl Into<String>,
        keywords: HashSet<String>,
        poignancy: u8,
    ) -> NodeId {
        let description = description.into();
        let embedding_key = compress_for_embedding_key(&description);
        let created = created.into();
        let id = self.fresh_id();
        self.event_count += 1;

        let is_idle = {
            let p: String = predicate.into();
            let o: String = object.into();
            // Re-bind so the moved Strings are usable below.
            let idle = p == "is" && o == "idle";
            let node = ConceptNode {
                id,
                type_count: self.event_count,
                kind: NodeKind::Event,
                depth: 0,
                created: created.clone(),
                expiration,
                last_accessed: created,
                subject: subject.into(),
                predicate: p,
                object: o,
                description,
                embedding_key,
                poignancy,
                keywords: keywords.clone(),
                filling: Filling::Citations(Vec::new()),
            };
            self.nodes.insert(id, node);
            idle
        };

        self.seq_event.insert(0, id);
        Self::index_keywords(&mut self.kw_to_event, &keywords, id);
        if !is_idle {
            Self::bump_strength(&mut self.kw_strength_event, &keywords);
        }
        id
    }

    /// Record a new thought node. `depth = 1 + max(depth of cited nodes)`.
    pub fn add_thought(
        &mut self,
        created: impl Into<String>,
        expiration: Option<String>,
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
        description: impl Into<String>,
        keywords: HashSet<String>,
        poignancy: u8,
        cited: Vec<NodeId>,
    ) -> NodeId {
        let description = description.into();
        let embedding_key = compress_for_embedding_key(&description);
        let created = created.into();
        let id = self.fresh_id();
        self.thought_count += 1;

        let depth = 1 + cited
            .iter()
            .filter_map(|cited_id| self.nodes.get(cited_id))
            .map(|node| node.depth)
            .max()
            .unwrap_or(0);

        let is_idle = {
            let p: String = predicate.into();
            let o: String = object.into();
            let idle = p == "is" && o == "idle";
            let node = ConceptNode {
                id,
                type_count: self.thought_count,
                kind: NodeKind::Thought,
                depth,
                created: created.clone(),
                expiration,
                last_accessed: created,
                subject: subject.into(),
                predicate: p,
                object: o,
                description,
                embedding_key,
                poignancy,
                keywords: keywords.clone(),
                filling: Filling::Citations(cited),
            };
            self.nodes.insert(id, node);
            idle
        };

        self.seq_thought.insert(0, id);
        Self::index_keywords(&mut self.kw_to_thought, &keywords, id);
        if !is_idle {
            Self::bump_strength(&mut self.kw_strength_thought, &keywords);
        }
        id
    }

    /// Record a new chat node. Chats never touch the keyword-strength
    /// tallies.
    #[allow(clippy::too_many_arguments)]
    pub fn add_chat(
        &mut self,
        created: impl Into<String>,
        expiration: Option<String>,
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
        description: impl Into<String>,
        keywords: HashSet<String>,
        poignancy: u8,
        transcript: Vec<ChatLine>,
    ) -> NodeId {
        let description = description.into();
        let embedding_key = compress_for_embedding_key(&description);
        let created = created.into();
        let id = self.fresh_id();
        self.chat_count += 1;

        let node = ConceptNode {
            id,
            type_count: self.chat_count,
            kind: NodeKind::Chat,
            depth: 0,
            created: created.clone(),
            expiration,
            last_accessed: created,
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
            description,
            embedding_key,
            poignancy,
            keywords: keywords.clone(),
            filling: Filling::Transcript(transcript),
        };
        self.nodes.insert(id, node);

        self.seq_chat.insert(0, id);
        Self::index_keywords(&mut self.kw_to_chat, &keywords, id);
        id
    }

    pub fn node(&self, id: NodeId) -> Option<&ConceptNode> {
        self.nodes.get(&id)
    }

    /// Link a self-chat event node to the chat node recording its
    /// transcript. Events otherwise carry empty `filling`; this is the one
    /// case that overloads it.
    pub fn set_event_filling(&mut self, event_id: NodeId, chat_id: NodeId) {
        if let Some(node) = self.nodes.get_mut(&event_id) {
            node.filling = Filling::Citations(vec![chat_id]);
        }
    }

    pub fn seq_event(&self) -> Vec<&ConceptNode> {
        self.seq_event.iter().filter_map(|id| self.nodes.get(id)).collect()
    }

    pub fn seq_thought(&self) -> Vec<&ConceptNode> {
        self.seq_thought.iter().filter_map(|id| self.nodes.get(id)).collect()
    }

    pub fn seq_chat(&self) -> Vec<&ConceptNode> {
        self.seq_chat.iter().filter_map(|id| self.nodes.get(id)).collect()
    }

    pub fn all_nodes(&self) -> impl Iterator<Item = &ConceptNode> {
        self.nodes.values()
    }

    pub fn touch_last_accessed(&mut self, id: NodeId, curr_time: &str) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.last_accessed = curr_time.to_string();
        }
    }

    /// The `(subject, predicate, object)` triples of the most recent
    /// `retention` events, used by perception to deduplicate.
    pub fn get_summarized_latest_events(&self, retention: usize) -> HashSet<(String, String, String)> {
        self.seq_event
            .iter()
            .take(retention)
            .filter_map(|id| self.nodes.get(id))
            .map(|node| (node.subject.clone(), node.predicate.clone(), node.object.clone()))
            .collect()
    }

    /// Events matched by any of `s`, `p`, `o` as a (lowercased) keyword.
    pub fn retrieve_relevant_events(&self, s: &str, p: &str, o: &str) -> Vec<&ConceptNode> {
        self.retrieve_by_keywords(&self.kw_to_event, s, p, o)
    }

    /// Thoughts matched by any of `s`, `p`, `o` as a (lowercased) keyword.
    pub fn retrieve_relevant_thoughts(&self, s: &str, p: &str, o: &str) -> Vec<&ConceptNode> {
        self.retrieve_by_keywords(&self.kw_to_thought, s, p, o)
    }

    fn retrieve_by_keywords(&self, index: &HashMap<String, Vec<NodeId>>, s: &str, p: &str, o: &str) -> Vec<&ConceptNode> {
        let mut seen = HashSet::new();
        let mut matched = Vec::new();
        for key in [s, p, o] {
            let Some(ids) = index.get(&key.to_lowercase()) else {
                continue;
            };
            for id in ids {
                if seen.insert(*id) {
                    if let Some(node) = self.nodes.get(id) {
                        matched.push(node);
                    }
                }
            }
        }
        matched
    }

    /// Most recent chat node whose object equals `name`, case-insensitively.
    pub fn get_last_chat(&self, name: &str) -> Option<&ConceptNode> {
        self.kw_to_chat
            .get(&name.to_lowercase())
            .and_then(|ids| ids.first())
            .and_then(|id| self.nodes.get(id))
    }

    pub fn keyword_strength_event(&self, keyword: &str) -> u32 {
        self.kw_strength_event.get(&keyword.to_lowercase()).copied().unwrap_or(0)
    }

    pub fn keyword_strength_thought(&self, keyword: &str) -> u32 {
        self.kw_strength_thought.get(&keyword.to_lowercase()).copied().unwrap_or(0)
    }

    pub fn kw_strength_event_snapshot(&self) -> HashMap<String, u32> {
        self.kw_strength_event.clone()
    }

    pub fn kw_strength_thought_snapshot(&self) -> HashMap<String, u32> {
        self.kw_strength_thought.clone()
    }

    /// Rebuild a memory from a previously-saved snapshot: `nodes` in any
    /// order (sorted internally by id), plus the keyword-strength tallies
    /// and embeddings map as persisted. Sequences and keyword indices are
    /// reconstructed from the nodes themselves.
    pub fn rebuild(
        mut nodes: Vec<ConceptNode>,
        kw_strength_event: HashMap<String, u32>,
        kw_strength_thought: HashMap<String, u32>,
        embeddings: HashMap<String, Vec<f32>>,
    ) -> Self {
        nodes.sort_by_key(|n| n.id);
        let mut memory = Self {
            embeddings,
            kw_strength_event,
            kw_strength_thought,
            ..Self::default()
        };

        for node in nodes {
            memory.next_id = memory.next_id.max(node.id.0);
            match node.kind {
                NodeKind::Event => {
                    memory.event_count = memory.event_count.max(node.type_count);
                    memory.seq_event.insert(0, node.id);
                    Self::index_keywords(&mut memory.kw_to_event, &node.keywords, node.id);
                }
                NodeKind::Thought => {
                    memory.thought_count = memory.thought_count.max(node.type_count);
                    memory.seq_thought.insert(0, node.id);
                    Self::index_keywords(&mut memory.kw_to_thought, &node.keywords, node.id);
                }
                NodeKind::Chat => {
                    memory.chat_count = memory.chat_count.max(node.type_count);
                    memory.seq_chat.insert(0, node.id);
                    Self::index_keywords(&mut memory.kw_to_chat, &node.keywords, node.id);
                }
            }
            memory.nodes.insert(node.id, node);
        }

        // seq_* were built oldest-inserted-last via `insert(0, ..)` over an
        // ascending-id iteration, which already yields newest-first.
        memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kw(words: &[&str]) -> HashSet<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn ids_are_unique_and_strictly_increasing() {
        let mut mem = AssociativeMemory::new();
        let a = mem.add_event("t0", None, "Isabella", "is", "reading", "Isabella is reading", kw(&["reading"]), 2);
        let b = mem.add_event("t1", None, "Isabella", "is", "idle", "", kw(&[]), 1);
        assert!(b.0 > a.0);
    }

    #[test]
    fn seq_event_is_reverse_chronological() {
        let mut mem = AssociativeMemory::new();
        let a = mem.add_event("t0", None, "Isabella", "is", "reading", "reading", kw(&["reading"]), 2);
        let b = mem.add_event("t1", None, "Isabella", "is", "cooking", "cooking", kw(&["cooking"]), 2);
        let seq = mem.seq_event();
        assert_eq!(seq[0].id, b);
        assert_eq!(seq[1].id, a);
    }

    #[test]
    fn idle_events_do_not_bump_keyword_strength() {
        let mut mem = AssociativeMemory::new();
        mem.add_event("t0", None, "Isabella", "is", "idle", "", kw(&["idle"]), 1);
        assert_eq!(mem.keyword_strength_event("idle"), 0);
    }

    #[test]
    fn non_idle_event_bumps_keyword_strength() {
        let mut mem = AssociativeMemory::new();
        mem.add_event("t0", None, "Isabella", "is", "reading", "reading a book", kw(&["reading"]), 3);
        mem.add_event("t1", None, "Isabella", "is", "reading", "still reading", kw(&["reading"]), 3);
        assert_eq!(mem.keyword_strength_event("reading"), 2);
    }

    #[test]
    fn thought_depth_is_one_plus_max_cited_depth() {
        let mut mem = AssociativeMemory::new();
        let e1 = mem.add_event("t0", None, "Isabella", "is", "reading", "reading", kw(&["reading"]), 2);
        let t1 = mem.add_thought(
            "t1", None, "Isabella", "enjoys", "reading", "Isabella enjoys reading",
            kw(&["reading"]), 4, vec![e1],
        );
        let t2 = mem.add_thought(
            "t2", None, "Isabella", "is", "a reader", "Isabella identifies as a reader",
            kw(&["reader"]), 5, vec![t1],
        );
        assert_eq!(mem.node(t1).unwrap().depth, 1);
        assert_eq!(mem.node(t2).unwrap().depth, 2);
    }

    #[test]
    fn compress_for_embedding_key_shortens_parenthetical_descriptions() {
        let mut mem = AssociativeMemory::new();
        let id = mem.add_event(
            "t0", None, "Isabella", "is", "sleeping",
            "Isabella is sleeping in her bed (lying down, eyes closed)",
            kw(&["sleeping"]), 1,
        );
        let node = mem.node(id).unwrap();
        assert_eq!(node.embedding_key, "Isabella is sleeping lying down, eyes closed");
    }

    #[test]
    fn retrieve_relevant_events_matches_any_of_s_p_o() {
        let mut mem = AssociativeMemory::new();
        mem.add_event("t0", None, "Isabella", "is", "reading", "reading", kw(&["reading"]), 2);
        let found = mem.retrieve_relevant_events("reading", "x", "y");
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn get_last_chat_returns_most_recent_for_name() {
        let mut mem = AssociativeMemory::new();
        mem.add_chat(
            "t0", None, "Isabella", "chat with", "Klaus", "chatted about coffee",
            kw(&["klaus"]), 3, vec![("Isabella".to_string(), "Hi Klaus".to_string())],
        );
        mem.add_chat(
            "t1", None, "Isabella", "chat with", "Klaus", "chatted about the weather",
            kw(&["klaus"]), 3, vec![("Isabella".to_string(), "Nice day".to_string())],
        );
        let last = mem.get_last_chat("Klaus").unwrap();
        assert_eq!(last.description, "chatted about the weather");
    }

    #[test]
    fn get_summarized_latest_events_respects_retention() {
        let mut mem = AssociativeMemory::new();
        for i in 0..5 {
            mem.add_event("t", None, "Isabella", "is", format!("doing-{i}"), "x", kw(&[]), 1);
        }
        assert_eq!(mem.get_summarized_latest_events(2).len(), 2);
    }
}
