pub mod access;
pub mod domain;
pub mod knowledge;
pub mod pipeline;
pub mod ports;
pub mod questions;
pub mod tenancy;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use access::{authorize, Capability};
pub use domain::{
    Answer, AnswerChange, AnswerDraft, Document, KnowledgeBase, KnowledgeBaseAnswer,
    KnowledgeBaseChanges, KnowledgeBaseQuestion, KnowledgeBaseQuestionChanges, Member,
    NewKnowledgeBaseQuestion, Organization, OrganizationChanges, OrganizationMembership,
    ParsingConnection, Project, ProjectChanges, Question, Role, Source, User, UserCredentials,
};
pub use ports::{
    DatabaseService, DocumentParsingService, PortError, PortResult, QuestionExtractionService,
    ResponseGenerationService,
};
