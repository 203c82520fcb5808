//! services/api/src/adapters/extraction_llm.rs
//!
//! This module contains the adapter that turns RFP text into sections and questions.
//! It implements the `QuestionExtractionService` port from the `core` crate.

use async_trait::async_trait;
use autorfp_core::pipeline::ExtractedQuestionnaire;
use autorfp_core::ports::{PortResult, QuestionExtractionService};

use crate::adapters::llm::JsonChat;

const SYSTEM_INSTRUCTIONS: &str = r#"You extract questions from RFP (Request for Proposal) documents.

Read the document and identify every question or requirement the responding vendor must answer.
Group them by the section of the document they appear in.

Return ONLY a JSON object with this shape:
{
  "sections": [
    {
      "id": "section_1",
      "title": "Section title as written in the document",
      "description": "One sentence describing the section, or null",
      "questions": [
        { "id": "q1_1", "text": "The full question text", "answer": null }
      ]
    }
  ]
}

Rules:
- Question ids are unique across the whole document and follow the pattern q<section>_<index>.
- Keep the original wording of each question. Turn imperative requirements ("Describe your...") into the question text as written.
- If the document already contains an answer for a question, put it in "answer"; otherwise use null.
- Skip instructions to bidders, deadlines and contact details that do not require an answer.
- Do not invent questions that are not in the document."#;

/// Upper bound on the characters of document text sent in one extraction request.
const MAX_DOCUMENT_CHARS: usize = 200_000;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `QuestionExtractionService` using an OpenAI chat model.
#[derive(Clone)]
pub struct OpenAiExtractionAdapter {
    chat: JsonChat,
}

impl OpenAiExtractionAdapter {
    pub fn new(chat: JsonChat) -> Self {
        Self { chat }
    }
}

//=========================================================================================
// `QuestionExtractionService` Trait Implementation
//=========================================================================================

#[async_trait]
impl QuestionExtractionService for OpenAiExtractionAdapter {
    async fn extract_questions(
        &self,
        document_name: &str,
        content: &str,
    ) -> PortResult<ExtractedQuestionnaire> {
        let user_input = user_input(document_name, content);
        self.chat
            .complete("question extraction", SYSTEM_INSTRUCTIONS, &user_input)
            .await
    }
}

/// The user message: the document name, then its text cut to [`MAX_DOCUMENT_CHARS`].
fn user_input(document_name: &str, content: &str) -> String {
    let content = match content.char_indices().nth(MAX_DOCUMENT_CHARS) {
        Some((idx, _)) => &content[..idx],
        None => content,
    };
    format!("Document name: {}\n\nDocument content:\n{}", document_name, content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_in_file_names_are_left_alone() {
        let input = user_input("{content}.pdf", "Q1. Do you offer SSO?");
        assert_eq!(input.matches("Do you offer SSO?").count(), 1);
        assert!(input.starts_with("Document name: {content}.pdf\n"));
    }

    #[test]
    fn long_documents_are_truncated() {
        let content = "é".repeat(MAX_DOCUMENT_CHARS + 10);
        let input = user_input("rfp.pdf", &content);
        assert_eq!(input.matches('é').count(), MAX_DOCUMENT_CHARS);
    }
}
