//! crates/autorfp_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or APIs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    Answer, AnswerDraft, Document, KnowledgeBase, KnowledgeBaseChanges, KnowledgeBaseQuestion,
    KnowledgeBaseQuestionChanges, Member, NewKnowledgeBaseQuestion, NewOrganization,
    Organization, OrganizationChanges, OrganizationMembership, ParsingConnection, Project,
    ProjectChanges, Question, Role, User, UserCredentials,
};
use crate::pipeline::{
    AnswerValidation, DocumentExcerpt, ExtractedInformation, ExtractedQuestionnaire,
    ParsedDocument, QuestionAnalysis, SearchHit, SynthesizedResponse,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("External service failed: {0}")]
    External(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- Users & Auth Sessions ---
    async fn create_user_with_email(
        &self,
        email: &str,
        hashed_password: &str,
        name: Option<&str>,
    ) -> PortResult<User>;

    async fn get_user(&self, user_id: Uuid) -> PortResult<User>;

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials>;

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()>;

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid>;

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()>;

    // --- Organizations ---
    /// Creates the organization and makes `creator` its owner in one transaction.
    async fn create_organization(
        &self,
        creator: Uuid,
        organization: &NewOrganization,
    ) -> PortResult<Organization>;

    async fn get_organization(&self, organization_id: Uuid) -> PortResult<Organization>;

    async fn list_organizations_for_user(
        &self,
        user_id: Uuid,
    ) -> PortResult<Vec<OrganizationMembership>>;

    async fn update_organization(
        &self,
        organization_id: Uuid,
        changes: &OrganizationChanges,
    ) -> PortResult<Organization>;

    async fn delete_organization(&self, organization_id: Uuid) -> PortResult<()>;

    async fn set_parsing_connection(
        &self,
        organization_id: Uuid,
        connection: Option<&ParsingConnection>,
    ) -> PortResult<Organization>;

    // --- Membership ---
    async fn get_member_role(&self, organization_id: Uuid, user_id: Uuid)
        -> PortResult<Option<Role>>;

    async fn list_members(&self, organization_id: Uuid) -> PortResult<Vec<Member>>;

    async fn add_member(&self, organization_id: Uuid, user_id: Uuid, role: Role)
        -> PortResult<Member>;

    /// Changes a member's role. Implementations must apply
    /// [`crate::access::ensure_owner_remains`] under the same transaction as the write.
    async fn update_member_role(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        role: Role,
    ) -> PortResult<Member>;

    /// Removes a member, with the same last-owner guarantee as `update_member_role`.
    async fn remove_member(&self, organization_id: Uuid, user_id: Uuid) -> PortResult<()>;

    // --- Projects ---
    async fn create_project(
        &self,
        organization_id: Uuid,
        name: &str,
        description: Option<&str>,
    ) -> PortResult<Project>;

    async fn get_project(&self, project_id: Uuid) -> PortResult<Project>;

    async fn list_projects(&self, organization_id: Uuid) -> PortResult<Vec<Project>>;

    async fn update_project(&self, project_id: Uuid, changes: &ProjectChanges)
        -> PortResult<Project>;

    async fn delete_project(&self, project_id: Uuid) -> PortResult<()>;

    // --- Knowledge Bases ---
    async fn create_knowledge_base(
        &self,
        organization_id: Uuid,
        name: &str,
        description: Option<&str>,
    ) -> PortResult<KnowledgeBase>;

    async fn get_knowledge_base(&self, knowledge_base_id: Uuid) -> PortResult<KnowledgeBase>;

    async fn list_knowledge_bases(&self, organization_id: Uuid) -> PortResult<Vec<KnowledgeBase>>;

    async fn update_knowledge_base(
        &self,
        knowledge_base_id: Uuid,
        changes: &KnowledgeBaseChanges,
    ) -> PortResult<KnowledgeBase>;

    async fn delete_knowledge_base(&self, knowledge_base_id: Uuid) -> PortResult<()>;

    async fn list_knowledge_base_questions(
        &self,
        knowledge_base_id: Uuid,
    ) -> PortResult<Vec<KnowledgeBaseQuestion>>;

    async fn get_knowledge_base_question(
        &self,
        question_id: Uuid,
    ) -> PortResult<KnowledgeBaseQuestion>;

    /// Inserts the question and, when present, its answer in one transaction.
    async fn create_knowledge_base_question(
        &self,
        knowledge_base_id: Uuid,
        question: &NewKnowledgeBaseQuestion,
    ) -> PortResult<KnowledgeBaseQuestion>;

    /// Updates the question and applies the answer change in one transaction.
    async fn update_knowledge_base_question(
        &self,
        question_id: Uuid,
        changes: &KnowledgeBaseQuestionChanges,
    ) -> PortResult<KnowledgeBaseQuestion>;

    /// Deletes the question together with its answer.
    async fn delete_knowledge_base_question(&self, question_id: Uuid) -> PortResult<()>;

    // --- Documents ---
    async fn create_document(
        &self,
        project_id: Uuid,
        file_name: &str,
        content: &str,
        page_count: Option<u32>,
    ) -> PortResult<Document>;

    async fn get_document(&self, document_id: Uuid) -> PortResult<Document>;

    async fn list_documents(&self, project_id: Uuid) -> PortResult<Vec<Document>>;

    // --- Project Questions & Answers ---
    /// Upserts every extracted question (and supplied answer) in one transaction.
    async fn save_extracted_questions(
        &self,
        project_id: Uuid,
        questionnaire: &ExtractedQuestionnaire,
    ) -> PortResult<Vec<Question>>;

    async fn list_questions(&self, project_id: Uuid) -> PortResult<Vec<Question>>;

    async fn get_question(&self, question_id: Uuid) -> PortResult<Question>;

    async fn upsert_answer(&self, question_id: Uuid, answer: &AnswerDraft) -> PortResult<Answer>;

    async fn delete_question(&self, question_id: Uuid) -> PortResult<()>;
}

#[async_trait]
pub trait DocumentParsingService: Send + Sync {
    /// Uploads a binary document and returns its extracted text.
    async fn parse_document(
        &self,
        file_name: &str,
        data: &[u8],
        connection: Option<&ParsingConnection>,
    ) -> PortResult<ParsedDocument>;
}

#[async_trait]
pub trait QuestionExtractionService: Send + Sync {
    /// Asks the language model for the sections and questions of an RFP.
    async fn extract_questions(
        &self,
        document_name: &str,
        content: &str,
    ) -> PortResult<ExtractedQuestionnaire>;
}

/// One method per stage of the multi-step answer generation.
#[async_trait]
pub trait ResponseGenerationService: Send + Sync {
    async fn analyze_question(&self, question: &str) -> PortResult<QuestionAnalysis>;

    async fn search_documents(
        &self,
        question: &str,
        analysis: &QuestionAnalysis,
        documents: &[DocumentExcerpt],
    ) -> PortResult<Vec<SearchHit>>;

    async fn extract_information(
        &self,
        question: &str,
        hits: &[SearchHit],
    ) -> PortResult<ExtractedInformation>;

    async fn synthesize_response(
        &self,
        question: &str,
        analysis: &QuestionAnalysis,
        information: &ExtractedInformation,
    ) -> PortResult<SynthesizedResponse>;

    async fn validate_answer(
        &self,
        question: &str,
        response: &SynthesizedResponse,
    ) -> PortResult<AnswerValidation>;
}
