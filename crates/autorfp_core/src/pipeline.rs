//! crates/autorfp_core/src/pipeline.rs
//!
//! The two LLM-backed workflows: turning an uploaded RFP into stored questions,
//! and the five-stage answer generation. Both are strictly sequential and stop at
//! the first failing call; nothing is persisted unless every step succeeded.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::access::{authorize, Capability};
use crate::domain::{Answer, AnswerDraft, Document, Question, Source};
use crate::ports::{
    DatabaseService, DocumentParsingService, PortError, PortResult, QuestionExtractionService,
    ResponseGenerationService,
};

/// Upper bound on the characters of each stored document handed to the search stage.
pub const MAX_EXCERPT_CHARS: usize = 12_000;

//=========================================================================================
// Ingestion & Extraction Types
//=========================================================================================

/// What the document-parsing service returns for an upload.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDocument {
    pub content: String,
    pub page_count: Option<u32>,
}

/// The JSON object the extraction prompt asks the model to return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedQuestionnaire {
    pub sections: Vec<ExtractedSection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedSection {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub questions: Vec<ExtractedQuestion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedQuestion {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub answer: Option<String>,
}

impl ExtractedQuestionnaire {
    pub fn question_count(&self) -> usize {
        self.sections.iter().map(|s| s.questions.len()).sum()
    }

    /// Rejects replies that cannot be stored: no questions, blank texts, or
    /// question ids that collide (they become per-project reference ids).
    pub fn validate(&self) -> PortResult<()> {
        if self.question_count() == 0 {
            return Err(PortError::External(
                "The language model did not return any questions".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for section in &self.sections {
            for question in &section.questions {
                if question.id.trim().is_empty() || question.text.trim().is_empty() {
                    return Err(PortError::External(format!(
                        "Section '{}' contains a question without id or text",
                        section.title
                    )));
                }
                if !seen.insert(question.id.trim()) {
                    return Err(PortError::External(format!(
                        "Duplicate question id '{}' in extraction result",
                        question.id
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Where the text for question extraction comes from.
#[derive(Debug, Clone)]
pub enum ExtractionSource {
    /// A document previously uploaded to the project.
    Document(Uuid),
    /// Text supplied directly by the caller.
    Inline { document_name: String, content: String },
}

//=========================================================================================
// Answer Generation Types
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStage {
    AnalyzeQuestion,
    SearchDocuments,
    ExtractInformation,
    SynthesizeResponse,
    ValidateAnswer,
}

impl GenerationStage {
    /// Every stage, in execution order.
    pub const ALL: [GenerationStage; 5] = [
        GenerationStage::AnalyzeQuestion,
        GenerationStage::SearchDocuments,
        GenerationStage::ExtractInformation,
        GenerationStage::SynthesizeResponse,
        GenerationStage::ValidateAnswer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationStage::AnalyzeQuestion => "analyze_question",
            GenerationStage::SearchDocuments => "search_documents",
            GenerationStage::ExtractInformation => "extract_information",
            GenerationStage::SynthesizeResponse => "synthesize_response",
            GenerationStage::ValidateAnswer => "validate_answer",
        }
    }
}

impl fmt::Display for GenerationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuestionAnalysis {
    #[serde(default)]
    pub question_type: String,
    #[serde(default)]
    pub complexity: String,
    #[serde(default)]
    pub key_topics: Vec<String>,
    #[serde(default)]
    pub required_information: Vec<String>,
    #[serde(default)]
    pub search_queries: Vec<String>,
}

/// A stored document as presented to the search stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentExcerpt {
    pub file_name: String,
    pub content: String,
}

impl DocumentExcerpt {
    pub fn from_document(document: &Document) -> Self {
        Self {
            file_name: document.file_name.clone(),
            content: document.content.chars().take(MAX_EXCERPT_CHARS).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub file_name: String,
    #[serde(default)]
    pub page_number: Option<u32>,
    pub excerpt: String,
    #[serde(default)]
    pub relevance: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFact {
    pub statement: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub page_number: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedInformation {
    #[serde(default)]
    pub facts: Vec<ExtractedFact>,
    #[serde(default)]
    pub gaps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesizedResponse {
    pub answer: String,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub sources: Vec<Source>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerValidation {
    pub is_valid: bool,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub revised_answer: Option<String>,
}

/// Timing of one executed stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    pub stage: GenerationStage,
    pub duration_ms: u64,
}

/// The result of running all five stages.
#[derive(Debug, Clone)]
pub struct GeneratedResponse {
    pub answer: AnswerDraft,
    pub validation: AnswerValidation,
    pub stages: Vec<StageReport>,
}

/// A generated answer after it has been stored against its question.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub answer: Answer,
    pub validation: AnswerValidation,
    pub stages: Vec<StageReport>,
}

//=========================================================================================
// Ingestion & Extraction
//=========================================================================================

/// Sends an uploaded file to the parsing service and stores the text on the project.
pub async fn ingest_document(
    db: &dyn DatabaseService,
    parser: &dyn DocumentParsingService,
    actor: Uuid,
    project_id: Uuid,
    file_name: &str,
    data: &[u8],
) -> PortResult<Document> {
    let project = db.get_project(project_id).await?;
    authorize(db, actor, project.organization_id, Capability::EditContent).await?;

    if data.is_empty() {
        return Err(PortError::Validation("The uploaded file is empty".to_string()));
    }

    let organization = db.get_organization(project.organization_id).await?;
    let parsed = parser
        .parse_document(file_name, data, organization.parsing.as_ref())
        .await?;

    if parsed.content.trim().is_empty() {
        return Err(PortError::External(format!(
            "No text could be extracted from '{}'",
            file_name
        )));
    }

    info!(%project_id, file_name, chars = parsed.content.len(), "document parsed");
    db.create_document(project_id, file_name, &parsed.content, parsed.page_count)
        .await
}

/// Extracts the questions of an RFP with the language model and stores them.
pub async fn extract_questions(
    db: &dyn DatabaseService,
    extractor: &dyn QuestionExtractionService,
    actor: Uuid,
    project_id: Uuid,
    source: ExtractionSource,
) -> PortResult<Vec<Question>> {
    let project = db.get_project(project_id).await?;
    authorize(db, actor, project.organization_id, Capability::EditContent).await?;

    let (document_name, content) = match source {
        ExtractionSource::Document(document_id) => {
            let document = db.get_document(document_id).await?;
            if document.project_id != project_id {
                return Err(PortError::NotFound(format!(
                    "Document {} not found in project {}",
                    document_id, project_id
                )));
            }
            (document.file_name, document.content)
        }
        ExtractionSource::Inline {
            document_name,
            content,
        } => (document_name, content),
    };

    if content.trim().is_empty() {
        return Err(PortError::Validation("Document content is empty".to_string()));
    }

    let started = Instant::now();
    let questionnaire = extractor.extract_questions(&document_name, &content).await?;
    questionnaire.validate()?;
    info!(
        %project_id,
        sections = questionnaire.sections.len(),
        questions = questionnaire.question_count(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "questions extracted"
    );

    db.save_extracted_questions(project_id, &questionnaire).await
}

//=========================================================================================
// Multi-Step Answer Generation
//=========================================================================================

/// Runs the five generation stages in order against the given documents.
pub async fn run_generation(
    generator: &dyn ResponseGenerationService,
    question: &str,
    documents: &[DocumentExcerpt],
) -> PortResult<GeneratedResponse> {
    let mut stages = Vec::with_capacity(GenerationStage::ALL.len());

    let analysis = timed(
        GenerationStage::AnalyzeQuestion,
        &mut stages,
        generator.analyze_question(question),
    )
    .await?;

    let hits = timed(
        GenerationStage::SearchDocuments,
        &mut stages,
        generator.search_documents(question, &analysis, documents),
    )
    .await?;

    let information = timed(
        GenerationStage::ExtractInformation,
        &mut stages,
        generator.extract_information(question, &hits),
    )
    .await?;

    let response = timed(
        GenerationStage::SynthesizeResponse,
        &mut stages,
        generator.synthesize_response(question, &analysis, &information),
    )
    .await?;

    let validation = timed(
        GenerationStage::ValidateAnswer,
        &mut stages,
        generator.validate_answer(question, &response),
    )
    .await?;

    if !validation.is_valid {
        warn!(issues = ?validation.issues, "generated answer did not pass validation");
    }

    let text = validation
        .revised_answer
        .as_deref()
        .map(str::trim)
        .filter(|revised| !revised.is_empty())
        .unwrap_or(response.answer.trim())
        .to_string();

    if text.is_empty() {
        return Err(PortError::External(
            "The language model returned an empty answer".to_string(),
        ));
    }

    Ok(GeneratedResponse {
        answer: AnswerDraft {
            text,
            confidence: Some(validation.confidence.clamp(0.0, 1.0)),
            sources: response.sources,
        },
        validation,
        stages,
    })
}

/// Generates an answer for a stored project question and saves it.
pub async fn generate_answer(
    db: &dyn DatabaseService,
    generator: &dyn ResponseGenerationService,
    actor: Uuid,
    question_id: Uuid,
) -> PortResult<GenerationOutcome> {
    let question = db.get_question(question_id).await?;
    let project = db.get_project(question.project_id).await?;
    authorize(db, actor, project.organization_id, Capability::EditContent).await?;

    let excerpts = project_excerpts(db, project.id).await?;
    let generated = run_generation(generator, &question.text, &excerpts).await?;
    let answer = db.upsert_answer(question_id, &generated.answer).await?;

    Ok(GenerationOutcome {
        answer,
        validation: generated.validation,
        stages: generated.stages,
    })
}

/// Generates an answer for free text against a project's documents without storing it.
pub async fn generate_response(
    db: &dyn DatabaseService,
    generator: &dyn ResponseGenerationService,
    actor: Uuid,
    project_id: Uuid,
    question: &str,
) -> PortResult<GeneratedResponse> {
    let project = db.get_project(project_id).await?;
    authorize(db, actor, project.organization_id, Capability::View).await?;

    if question.trim().is_empty() {
        return Err(PortError::Validation("Question must not be empty".to_string()));
    }

    let excerpts = project_excerpts(db, project_id).await?;
    run_generation(generator, question, &excerpts).await
}

async fn project_excerpts(
    db: &dyn DatabaseService,
    project_id: Uuid,
) -> PortResult<Vec<DocumentExcerpt>> {
    let documents = db.list_documents(project_id).await?;
    Ok(documents.iter().map(DocumentExcerpt::from_document).collect())
}

async fn timed<T>(
    stage: GenerationStage,
    reports: &mut Vec<StageReport>,
    call: impl Future<Output = PortResult<T>>,
) -> PortResult<T> {
    let started = Instant::now();
    let value = call.await.map_err(|e| stage_error(stage, e))?;
    let duration_ms = started.elapsed().as_millis() as u64;
    info!(%stage, duration_ms, "generation stage finished");
    reports.push(StageReport { stage, duration_ms });
    Ok(value)
}

/// Prefixes the message with the failing stage, keeping the error kind.
fn stage_error(stage: GenerationStage, error: PortError) -> PortError {
    let prefix = |message: String| format!("{} failed: {}", stage, message);
    match error {
        PortError::NotFound(m) => PortError::NotFound(prefix(m)),
        PortError::Forbidden(m) => PortError::Forbidden(prefix(m)),
        PortError::Validation(m) => PortError::Validation(prefix(m)),
        PortError::Conflict(m) => PortError::Conflict(prefix(m)),
        PortError::External(m) => PortError::External(prefix(m)),
        PortError::Unexpected(m) => PortError::Unexpected(prefix(m)),
        PortError::Unauthorized => PortError::Unauthorized,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{InMemoryDatabase, ScriptedExtractor, ScriptedGenerator, StaticParser};

    fn questionnaire(ids: &[&str]) -> ExtractedQuestionnaire {
        ExtractedQuestionnaire {
            sections: vec![ExtractedSection {
                id: "s1".to_string(),
                title: "Technical Requirements".to_string(),
                description: None,
                questions: ids
                    .iter()
                    .map(|id| ExtractedQuestion {
                        id: id.to_string(),
                        text: format!("Question {}", id),
                        answer: None,
                    })
                    .collect(),
            }],
        }
    }

    #[test]
    fn validation_rejects_empty_and_duplicate_questions() {
        assert!(matches!(
            questionnaire(&[]).validate(),
            Err(PortError::External(_))
        ));
        assert!(matches!(
            questionnaire(&["q1", "q1"]).validate(),
            Err(PortError::External(_))
        ));
        assert!(questionnaire(&["q1", "q2"]).validate().is_ok());
    }

    #[test]
    fn excerpts_are_truncated_on_char_boundaries() {
        let document = Document {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            file_name: "rfp.pdf".to_string(),
            content: "é".repeat(MAX_EXCERPT_CHARS + 10),
            page_count: None,
            created_at: chrono::Utc::now(),
        };
        let excerpt = DocumentExcerpt::from_document(&document);
        assert_eq!(excerpt.content.chars().count(), MAX_EXCERPT_CHARS);
    }

    #[tokio::test]
    async fn stages_run_in_declared_order() {
        let generator = ScriptedGenerator::answering("We encrypt data at rest.");
        let result = run_generation(&generator, "Do you encrypt data?", &[])
            .await
            .unwrap();

        let executed: Vec<_> = result.stages.iter().map(|r| r.stage).collect();
        assert_eq!(executed, GenerationStage::ALL.to_vec());
        assert_eq!(generator.calls(), GenerationStage::ALL.to_vec());
        assert_eq!(result.answer.text, "We encrypt data at rest.");
    }

    #[tokio::test]
    async fn failing_stage_stops_the_pipeline() {
        let generator = ScriptedGenerator::answering("unused")
            .failing_at(GenerationStage::ExtractInformation);
        let err = run_generation(&generator, "Q?", &[]).await.unwrap_err();

        match err {
            PortError::External(message) => assert!(message.starts_with("extract_information")),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(
            generator.calls(),
            vec![
                GenerationStage::AnalyzeQuestion,
                GenerationStage::SearchDocuments,
                GenerationStage::ExtractInformation,
            ]
        );
    }

    #[tokio::test]
    async fn revised_answer_replaces_synthesized_text() {
        let generator = ScriptedGenerator::answering("draft").with_revision("final wording");
        let result = run_generation(&generator, "Q?", &[]).await.unwrap();
        assert_eq!(result.answer.text, "final wording");
    }

    #[tokio::test]
    async fn generated_answer_is_persisted() {
        let db = InMemoryDatabase::new();
        let owner = db.seed_user("owner@example.com").await;
        let (_, project) = db.seed_project(owner).await;
        let questions = db
            .save_extracted_questions(project.id, &questionnaire(&["q1"]))
            .await
            .unwrap();

        let generator = ScriptedGenerator::answering("Yes, SOC 2 Type II.");
        let outcome = generate_answer(&db, &generator, owner, questions[0].id)
            .await
            .unwrap();

        assert_eq!(outcome.stages.len(), 5);
        let stored = db.get_question(questions[0].id).await.unwrap();
        assert_eq!(stored.answer.unwrap().text, "Yes, SOC 2 Type II.");
    }

    #[tokio::test]
    async fn failed_generation_leaves_no_answer() {
        let db = InMemoryDatabase::new();
        let owner = db.seed_user("owner@example.com").await;
        let (_, project) = db.seed_project(owner).await;
        let questions = db
            .save_extracted_questions(project.id, &questionnaire(&["q1"]))
            .await
            .unwrap();

        let generator =
            ScriptedGenerator::answering("x").failing_at(GenerationStage::ValidateAnswer);
        assert!(generate_answer(&db, &generator, owner, questions[0].id)
            .await
            .is_err());
        assert!(db.get_question(questions[0].id).await.unwrap().answer.is_none());
    }

    #[tokio::test]
    async fn extraction_persists_every_question() {
        let db = InMemoryDatabase::new();
        let owner = db.seed_user("owner@example.com").await;
        let (_, project) = db.seed_project(owner).await;
        let extractor = ScriptedExtractor::returning(questionnaire(&["q1", "q2", "q3"]));

        let stored = extract_questions(
            &db,
            &extractor,
            owner,
            project.id,
            ExtractionSource::Inline {
                document_name: "rfp.pdf".to_string(),
                content: "1. Describe your company.".to_string(),
            },
        )
        .await
        .unwrap();

        assert_eq!(stored.len(), 3);
        assert_eq!(db.list_questions(project.id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn invalid_extraction_persists_nothing() {
        let db = InMemoryDatabase::new();
        let owner = db.seed_user("owner@example.com").await;
        let (_, project) = db.seed_project(owner).await;
        let extractor = ScriptedExtractor::returning(questionnaire(&["q1", "q1"]));

        let result = extract_questions(
            &db,
            &extractor,
            owner,
            project.id,
            ExtractionSource::Inline {
                document_name: "rfp.pdf".to_string(),
                content: "text".to_string(),
            },
        )
        .await;

        assert!(result.is_err());
        assert!(db.list_questions(project.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn extraction_from_another_projects_document_is_not_found() {
        let db = InMemoryDatabase::new();
        let owner = db.seed_user("owner@example.com").await;
        let (_, project) = db.seed_project(owner).await;
        let (_, other) = db.seed_project(owner).await;
        let document = db
            .create_document(other.id, "other.pdf", "text", None)
            .await
            .unwrap();
        let extractor = ScriptedExtractor::returning(questionnaire(&["q1"]));

        let result = extract_questions(
            &db,
            &extractor,
            owner,
            project.id,
            ExtractionSource::Document(document.id),
        )
        .await;
        assert!(matches!(result, Err(PortError::NotFound(_))));
    }

    #[tokio::test]
    async fn ingestion_stores_parsed_text() {
        let db = InMemoryDatabase::new();
        let owner = db.seed_user("owner@example.com").await;
        let (_, project) = db.seed_project(owner).await;
        let parser = StaticParser::new("# RFP\n1. Describe your SLA.");

        let document = ingest_document(&db, &parser, owner, project.id, "rfp.pdf", b"%PDF")
            .await
            .unwrap();

        assert_eq!(document.file_name, "rfp.pdf");
        assert_eq!(db.list_documents(project.id).await.unwrap().len(), 1);
    }
}
