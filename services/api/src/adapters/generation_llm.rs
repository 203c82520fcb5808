//! services/api/src/adapters/generation_llm.rs
//!
//! The five prompts of multi-step answer generation. Each stage is one JSON-mode
//! chat completion; the orchestration lives in `autorfp_core::pipeline`.

use async_trait::async_trait;
use autorfp_core::pipeline::{
    AnswerValidation, DocumentExcerpt, ExtractedInformation, QuestionAnalysis, SearchHit,
    SynthesizedResponse,
};
use autorfp_core::ports::{PortError, PortResult, ResponseGenerationService};
use serde::{Deserialize, Serialize};

use crate::adapters::llm::JsonChat;

const ANALYZE_INSTRUCTIONS: &str = r#"You analyze questions from RFP (Request for Proposal) questionnaires before they are answered.

Return ONLY a JSON object:
{
  "question_type": "factual | descriptive | compliance | pricing | technical | other",
  "complexity": "low | medium | high",
  "key_topics": ["..."],
  "required_information": ["facts the answer must contain"],
  "search_queries": ["short queries to find those facts in company documents"]
}"#;

const SEARCH_INSTRUCTIONS: &str = r#"You locate passages in company documents that help answer an RFP question.

You receive the question, its analysis and the available documents. Select the passages that contain relevant facts, copying them verbatim.

Return ONLY a JSON object:
{
  "hits": [
    { "file_name": "...", "page_number": null, "excerpt": "verbatim passage", "relevance": 0.0 }
  ]
}

relevance is between 0 and 1. Return an empty list when nothing is relevant. Never invent passages."#;

const EXTRACT_INSTRUCTIONS: &str = r#"You extract facts from document passages to answer an RFP question.

Return ONLY a JSON object:
{
  "facts": [ { "statement": "...", "file_name": "...", "page_number": null } ],
  "gaps": ["information the question asks for that the passages do not contain"]
}

Only state facts supported by the passages."#;

const SYNTHESIZE_INSTRUCTIONS: &str = r#"You write answers to RFP questions on behalf of the responding company.

Use only the extracted facts. Write in a professional, confident tone, in the first person plural ("we"). Be specific and concise. If information is missing, answer what you can and do not invent details.

Return ONLY a JSON object:
{
  "answer": "the answer text",
  "confidence": 0.0,
  "sources": [ { "file_name": "...", "page_number": null, "relevance": null, "excerpt": null } ]
}

confidence is between 0 and 1 and reflects how well the facts support the answer."#;

const VALIDATE_INSTRUCTIONS: &str = r#"You review draft answers to RFP questions.

Check that the answer addresses the question, is consistent with its sources, and makes no unsupported claims.

Return ONLY a JSON object:
{
  "is_valid": true,
  "confidence": 0.0,
  "issues": ["..."],
  "revised_answer": null
}

Set revised_answer to an improved answer only when the draft needs changes; otherwise null."#;

#[derive(Deserialize)]
struct SearchResult {
    #[serde(default)]
    hits: Vec<SearchHit>,
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `ResponseGenerationService` using an OpenAI chat model.
#[derive(Clone)]
pub struct OpenAiGenerationAdapter {
    chat: JsonChat,
}

impl OpenAiGenerationAdapter {
    pub fn new(chat: JsonChat) -> Self {
        Self { chat }
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> PortResult<String> {
    serde_json::to_string_pretty(value).map_err(|e| PortError::Unexpected(e.to_string()))
}

//=========================================================================================
// `ResponseGenerationService` Trait Implementation
//=========================================================================================

#[async_trait]
impl ResponseGenerationService for OpenAiGenerationAdapter {
    async fn analyze_question(&self, question: &str) -> PortResult<QuestionAnalysis> {
        let input = format!("Question:\n{}", question);
        self.chat
            .complete("analyze question", ANALYZE_INSTRUCTIONS, &input)
            .await
    }

    async fn search_documents(
        &self,
        question: &str,
        analysis: &QuestionAnalysis,
        documents: &[DocumentExcerpt],
    ) -> PortResult<Vec<SearchHit>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let input = format!(
            "Question:\n{}\n\nAnalysis:\n{}\n\nDocuments:\n{}",
            question,
            to_json(analysis)?,
            to_json(documents)?
        );
        let result: SearchResult = self
            .chat
            .complete("search documents", SEARCH_INSTRUCTIONS, &input)
            .await?;
        Ok(result.hits)
    }

    async fn extract_information(
        &self,
        question: &str,
        hits: &[SearchHit],
    ) -> PortResult<ExtractedInformation> {
        let input = format!("Question:\n{}\n\nPassages:\n{}", question, to_json(hits)?);
        self.chat
            .complete("extract information", EXTRACT_INSTRUCTIONS, &input)
            .await
    }

    async fn synthesize_response(
        &self,
        question: &str,
        analysis: &QuestionAnalysis,
        information: &ExtractedInformation,
    ) -> PortResult<SynthesizedResponse> {
        let input = format!(
            "Question:\n{}\n\nAnalysis:\n{}\n\nExtracted facts:\n{}",
            question,
            to_json(analysis)?,
            to_json(information)?
        );
        self.chat
            .complete("synthesize response", SYNTHESIZE_INSTRUCTIONS, &input)
            .await
    }

    async fn validate_answer(
        &self,
        question: &str,
        response: &SynthesizedResponse,
    ) -> PortResult<AnswerValidation> {
        let input = format!("Question:\n{}\n\nDraft:\n{}", question, to_json(response)?);
        self.chat
            .complete("validate answer", VALIDATE_INSTRUCTIONS, &input)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::llm::parse_json;

    #[test]
    fn search_result_defaults_to_no_hits() {
        let result: SearchResult = parse_json("{}").unwrap();
        assert!(result.hits.is_empty());
    }

    #[test]
    fn stage_replies_parse_into_pipeline_types() {
        let validation: AnswerValidation =
            parse_json(r#"{"is_valid": false, "issues": ["too vague"], "revised_answer": "We do."}"#)
                .unwrap();
        assert!(!validation.is_valid);
        assert_eq!(validation.revised_answer.as_deref(), Some("We do."));

        let response: SynthesizedResponse = parse_json(
            r#"{"answer": "We encrypt data at rest.", "confidence": 0.8,
                "sources": [{"file_name": "security.pdf", "page_number": 4}]}"#,
        )
        .unwrap();
        assert_eq!(response.sources[0].page_number, Some(4));
    }
}
