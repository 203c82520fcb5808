//! crates/autorfp_core/src/questions.rs
//!
//! Project questions, answers and stored documents.

use uuid::Uuid;

use crate::access::{authorize, Capability};
use crate::domain::{Answer, AnswerDraft, Document, Project, Question};
use crate::ports::{DatabaseService, PortError, PortResult};

pub async fn list_questions(
    db: &dyn DatabaseService,
    actor: Uuid,
    project_id: Uuid,
) -> PortResult<Vec<Question>> {
    let project = db.get_project(project_id).await?;
    authorize(db, actor, project.organization_id, Capability::View).await?;
    db.list_questions(project_id).await
}

/// Creates or replaces the answer of a question with user-supplied text.
pub async fn save_answer(
    db: &dyn DatabaseService,
    actor: Uuid,
    question_id: Uuid,
    answer: AnswerDraft,
) -> PortResult<Answer> {
    if answer.text.trim().is_empty() {
        return Err(PortError::Validation("Answer text must not be empty".to_string()));
    }
    authorize_question(db, actor, question_id, Capability::EditContent).await?;
    db.upsert_answer(question_id, &answer).await
}

pub async fn delete_question(
    db: &dyn DatabaseService,
    actor: Uuid,
    question_id: Uuid,
) -> PortResult<()> {
    authorize_question(db, actor, question_id, Capability::EditContent).await?;
    db.delete_question(question_id).await
}

pub async fn list_documents(
    db: &dyn DatabaseService,
    actor: Uuid,
    project_id: Uuid,
) -> PortResult<Vec<Document>> {
    let project = db.get_project(project_id).await?;
    authorize(db, actor, project.organization_id, Capability::View).await?;
    db.list_documents(project_id).await
}

pub async fn get_document(
    db: &dyn DatabaseService,
    actor: Uuid,
    document_id: Uuid,
) -> PortResult<Document> {
    let document = db.get_document(document_id).await?;
    let project = db.get_project(document.project_id).await?;
    authorize(db, actor, project.organization_id, Capability::View).await?;
    Ok(document)
}

async fn authorize_question(
    db: &dyn DatabaseService,
    actor: Uuid,
    question_id: Uuid,
    capability: Capability,
) -> PortResult<Project> {
    let question = db.get_question(question_id).await?;
    let project = db.get_project(question.project_id).await?;
    authorize(db, actor, project.organization_id, capability).await?;
    Ok(project)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Source;
    use crate::pipeline::{ExtractedQuestion, ExtractedQuestionnaire, ExtractedSection};
    use crate::testing::InMemoryDatabase;

    async fn seeded_question(db: &InMemoryDatabase, owner: Uuid) -> Question {
        let (_, project) = db.seed_project(owner).await;
        let questionnaire = ExtractedQuestionnaire {
            sections: vec![ExtractedSection {
                id: "1".to_string(),
                title: "Company".to_string(),
                description: None,
                questions: vec![ExtractedQuestion {
                    id: "q1".to_string(),
                    text: "How many employees do you have?".to_string(),
                    answer: None,
                }],
            }],
        };
        db.save_extracted_questions(project.id, &questionnaire)
            .await
            .unwrap()
            .remove(0)
    }

    #[tokio::test]
    async fn saved_answer_is_listed_with_its_question() {
        let db = InMemoryDatabase::new();
        let owner = db.seed_user("owner@example.com").await;
        let question = seeded_question(&db, owner).await;

        let draft = AnswerDraft {
            text: "About 250.".to_string(),
            confidence: None,
            sources: vec![Source {
                file_name: "company-profile.pdf".to_string(),
                page_number: Some(2),
                relevance: Some(0.9),
                excerpt: None,
            }],
        };
        save_answer(&db, owner, question.id, draft).await.unwrap();

        let listed = list_questions(&db, owner, question.project_id).await.unwrap();
        let answer = listed[0].answer.as_ref().unwrap();
        assert_eq!(answer.text, "About 250.");
        assert_eq!(answer.sources[0].page_number, Some(2));
    }

    #[tokio::test]
    async fn blank_answers_are_rejected() {
        let db = InMemoryDatabase::new();
        let owner = db.seed_user("owner@example.com").await;
        let question = seeded_question(&db, owner).await;

        let result = save_answer(&db, owner, question.id, AnswerDraft::default()).await;
        assert!(matches!(result, Err(PortError::Validation(_))));
    }

    #[tokio::test]
    async fn outsiders_cannot_answer() {
        let db = InMemoryDatabase::new();
        let owner = db.seed_user("owner@example.com").await;
        let outsider = db.seed_user("outsider@example.com").await;
        let question = seeded_question(&db, owner).await;

        let draft = AnswerDraft {
            text: "Hijacked".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            save_answer(&db, outsider, question.id, draft).await,
            Err(PortError::Forbidden(_))
        ));
        assert!(matches!(
            list_questions(&db, outsider, question.project_id).await,
            Err(PortError::Forbidden(_))
        ));
    }
}
