//! Converse: the two-agent multi-turn dialogue loop, plus the
//! `load_history_via_whisper` seed-statement ingestion the operator CLI
//! drives directly.

use serde::Deserialize;
use townsim_llm::{GenerationParams, LlmGateway, safe_generate};
use townsim_memory::{AssociativeMemory, ChatLine, RetrievalWeights};

use crate::extract_json;
use crate::retrieve::resolve;

const CHAT_ROUND_CAP: usize = 8;

/// One side of a two-agent conversation: whatever Converse needs from a
/// persona without depending on the `agent` crate's full `Persona` type.
pub struct Speaker<'a> {
    pub name: &'a str,
    pub act_description: &'a str,
    pub memory: &'a mut AssociativeMemory,
    pub retrieval_weights: RetrievalWeights,
}

#[derive(Debug, Deserialize)]
struct UtteranceResponse {
    utterance: String,
    #[serde(default)]
    end: bool,
}

async fn summarize_relationship(
    gateway: &LlmGateway,
    speaker: &str,
    other: &str,
    retrieved_summaries: &[String],
) -> String {
    let context = retrieved_summaries.join("\n");
    let prompt = format!(
        "Summarize {speaker}'s relationship with {other} in one or two sentences, \
         based on these memories:\n{context}\n\nRelationship summary:"
    );
    safe_generate(
        gateway,
        &prompt,
        &GenerationParams::default(),
        3,
        format!("{speaker} does not yet know {other} well."),
        |raw| !raw.trim().is_empty(),
        |raw| raw.trim().to_string(),
    )
    .await
}

async fn generate_utterance(
    gateway: &LlmGateway,
    speaker_name: &str,
    other_name: &str,
    relationship: &str,
    retrieved_summaries: &[String],
    transcript: &[ChatLine],
) -> UtteranceResponse {
    let narrated = format!("{speaker_name} was talking with {other_name}.");
    let history: String = transcript
        .iter()
        .map(|(name, line)| format!("{name}: {line}"))
        .collect::<Vec<_>>()
        .join("\n");
    let memories = retrieved_summaries.join("\n");

    let prompt = format!(
        "{narrated}\nRelationship: {relationship}\nRelevant memories:\n{memories}\n\n\
         Conversation so far:\n{history}\n\n\
         Respond with JSON {{\"utterance\": \"...\", \"end\": false}} giving {speaker_name}'s next \
         line of dialogue, and whether the conversation should end after it."
    );

    let fail_safe = serde_json::json!({ "utterance": "...", "end": true }).to_string();
    let raw = safe_generate(
        gateway,
        &prompt,
        &GenerationParams::default(),
        3,
        fail_safe,
        |raw| serde_json::from_str::<UtteranceResponse>(extract_json(raw)).is_ok(),
        |raw| raw.to_string(),
    )
    .await;

    serde_json::from_str(extract_json(&raw)).unwrap_or(UtteranceResponse {
        utterance: "...".to_string(),
        end: true,
    })
}

/// Run the full dialogue between `first` and `second`, alternating turns,
/// up to [`CHAT_ROUND_CAP`] exchanges per side or until either utterance
/// flags `end`. Returns the full `[name, utterance]` transcript.
pub async fn converse(gateway: &LlmGateway, first: &mut Speaker<'_>, second: &mut Speaker<'_>) -> Vec<ChatLine> {
    let mut transcript: Vec<ChatLine> = Vec::new();

    let first_relationship = {
        let embedding = gateway.embed(second.name).await.unwrap_or_default();
        let retrieved = townsim_memory::retrieve_focal_points(first.memory, &embedding, first.retrieval_weights, 50, "curr");
        let summaries: Vec<String> = resolve(first.memory, &retrieved).into_iter().map(|n| n.spo_summary()).collect();
        summarize_relationship(gateway, first.name, second.name, &summaries).await
    };

    for round in 0..CHAT_ROUND_CAP * 2 {
        let (speaker, other_name, relationship) = if round % 2 == 0 {
            (&mut *first, second.name, first_relationship.clone())
        } else {
            (&mut *second, first.name, first_relationship.clone())
        };

        let mut focal_points = vec![relationship.clone(), format!("{other_name} is {}", speaker.act_description)];
        if let Some(last_four) = transcript.rchunks(4).next() {
            let lines: String = last_four.iter().map(|(n, l)| format!("{n}: {l}")).collect::<Vec<_>>().join("\n");
            focal_points.push(lines);
        }

        let mut retrieved_summaries = Vec::new();
        for focal_point in &focal_points {
            let embedding = gateway.embed(focal_point).await.unwrap_or_default();
            let scored = townsim_memory::retrieve_focal_points(speaker.memory, &embedding, speaker.retrieval_weights, 15, "curr");
            retrieved_summaries.extend(resolve(speaker.memory, &scored).into_iter().map(|n| n.spo_summary()));
        }

        let response = generate_utterance(gateway, speaker.name, other_name, &relationship, &retrieved_summaries, &transcript).await;
        transcript.push((speaker.name.to_string(), response.utterance));

        if response.end {
            break;
        }
    }

    transcript
}

/// Ingest freeform seed statements as inner-thought nodes: each gets an
/// LLM-scored poignancy, an embedding, and expires 30 simulated days out.
pub async fn load_history_via_whisper(
    memory: &mut AssociativeMemory,
    gateway: &LlmGateway,
    persona_name: &str,
    curr_time: &str,
    expiration_time: &str,
    statements: &[String],
) -> Vec<townsim_memory::NodeId> {
    let mut ids = Vec::new();
    for statement in statements {
        let poignancy = score_poignancy(gateway, statement).await;
        let embedding = gateway.embed(statement).await.unwrap_or_default();
        let embedding_key = statement.clone();
        let id = memory.add_thought(
            curr_time.to_string(),
            Some(expiration_time.to_string()),
            persona_name,
            "recalls",
            statement.clone(),
            statement.clone(),
            Default::default(),
            poignancy,
            Vec::new(),
        );
        memory.embeddings.insert(embedding_key, embedding);
        ids.push(id);
    }
    ids
}

async fn score_poignancy(gateway: &LlmGateway, statement: &str) -> u8 {
    let prompt = format!(
        "On a scale of 1 to 10, how emotionally significant is this memory: \"{statement}\"? \
         Respond with only the integer."
    );
    let raw = safe_generate(
        gateway,
        &prompt,
        &GenerationParams::default(),
        3,
        "5".to_string(),
        |raw| raw.trim().chars().all(|c| c.is_ascii_digit()) && !raw.trim().is_empty(),
        |raw| raw.trim().to_string(),
    )
    .await;
    raw.parse::<u8>().unwrap_or(5).clamp(1, 10)
}

/// Result of one line in an operator "analysis" session: a stateless
/// interview with a single persona, gated by a safety score so the
/// operator cannot coax the agent into speaking as if it had human agency
/// it doesn't have. Nothing here touches memory.
pub struct AnalysisOutcome {
    pub refused: bool,
    pub reply: Option<String>,
}

async fn generate_safety_score(gateway: &LlmGateway, persona_name: &str, line: &str) -> u8 {
    let prompt = format!(
        "On a scale of 1 to 10, how inappropriate would it be to attribute human agency to \
         {persona_name}, a computational agent, based on this message: \"{line}\"? \
         Respond with only the integer."
    );
    let raw = safe_generate(
        gateway,
        &prompt,
        &GenerationParams::default(),
        3,
        "1".to_string(),
        |raw| raw.trim().chars().all(|c| c.is_ascii_digit()) && !raw.trim().is_empty(),
        |raw| raw.trim().to_string(),
    )
    .await;
    raw.parse::<u8>().unwrap_or(1).clamp(1, 10)
}

/// One turn of an analysis session: score `line` for safety, refuse at
/// `>= 8`, otherwise retrieve against it and let `speaker` reply. Appends
/// both the interviewer's line and the reply to `transcript` on success.
pub async fn analysis_turn(
    gateway: &LlmGateway,
    speaker: &mut Speaker<'_>,
    transcript: &mut Vec<ChatLine>,
    line: &str,
) -> AnalysisOutcome {
    if generate_safety_score(gateway, speaker.name, line).await >= 8 {
        return AnalysisOutcome { refused: true, reply: None };
    }

    let embedding = gateway.embed(line).await.unwrap_or_default();
    let scored = townsim_memory::retrieve_focal_points(speaker.memory, &embedding, speaker.retrieval_weights, 50, "curr");
    let summaries: Vec<String> = resolve(speaker.memory, &scored).into_iter().map(|n| n.spo_summary()).collect();

    transcript.push(("Interviewer".to_string(), line.to_string()));
    let response = generate_utterance(gateway, speaker.name, "Interviewer", "", &summaries, transcript).await;
    transcript.push((speaker.name.to_string(), response.utterance.clone()));

    AnalysisOutcome { refused: false, reply: Some(response.utterance) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_strips_surrounding_prose() {
        let raw = "Sure, here you go: {\"utterance\": \"hi\", \"end\": false} -- hope that helps";
        let json = extract_json(raw);
        let parsed: UtteranceResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.utterance, "hi");
        assert!(!parsed.end);
    }

    #[test]
    fn extract_json_falls_back_to_raw_when_no_braces_present() {
        assert_eq!(extract_json("no json here"), "no json here");
    }

    #[tokio::test]
    async fn analysis_turn_refuses_on_high_safety_score() {
        use std::time::Duration;
        use townsim_memory::{AssociativeMemory, RetrievalWeights};

        let gateway = LlmGateway::ollama("http://127.0.0.1:1", Duration::from_millis(10), "m", "e");
        let mut memory = AssociativeMemory::new();
        let weights = RetrievalWeights {
            w_recency: 1.0,
            w_relevance: 1.0,
            w_importance: 1.0,
            g_recency: 0.5,
            g_relevance: 3.0,
            g_importance: 2.0,
            recency_decay: 0.99,
        };
        let mut speaker = Speaker { name: "Klaus Mueller", act_description: "reading", memory: &mut memory, retrieval_weights: weights };
        let mut transcript = Vec::new();

        // Unreachable gateway -> safe_generate exhausts retries -> fail-safe "1", well under the refusal threshold.
        let outcome = analysis_turn(&gateway, &mut speaker, &mut transcript, "what do you think about the weather?").await;
        assert!(!outcome.refused);
        assert!(outcome.reply.is_some());
    }
}
