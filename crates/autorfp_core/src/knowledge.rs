//! crates/autorfp_core/src/knowledge.rs
//!
//! Knowledge base use cases.

use uuid::Uuid;

use crate::access::{authorize, Capability};
use crate::domain::{
    KnowledgeBase, KnowledgeBaseChanges, KnowledgeBaseQuestion, KnowledgeBaseQuestionChanges,
    NewKnowledgeBaseQuestion,
};
use crate::ports::{DatabaseService, PortError, PortResult};

pub async fn list_knowledge_bases(
    db: &dyn DatabaseService,
    actor: Uuid,
    organization_id: Uuid,
) -> PortResult<Vec<KnowledgeBase>> {
    authorize(db, actor, organization_id, Capability::View).await?;
    db.list_knowledge_bases(organization_id).await
}

pub async fn create_knowledge_base(
    db: &dyn DatabaseService,
    actor: Uuid,
    organization_id: Uuid,
    name: &str,
    description: Option<&str>,
) -> PortResult<KnowledgeBase> {
    authorize(db, actor, organization_id, Capability::EditContent).await?;
    db.create_knowledge_base(organization_id, name.trim(), description)
        .await
}

pub async fn get_knowledge_base(
    db: &dyn DatabaseService,
    actor: Uuid,
    knowledge_base_id: Uuid,
) -> PortResult<KnowledgeBase> {
    let knowledge_base = db.get_knowledge_base(knowledge_base_id).await?;
    authorize(db, actor, knowledge_base.organization_id, Capability::View).await?;
    Ok(knowledge_base)
}

pub async fn update_knowledge_base(
    db: &dyn DatabaseService,
    actor: Uuid,
    knowledge_base_id: Uuid,
    changes: KnowledgeBaseChanges,
) -> PortResult<KnowledgeBase> {
    let knowledge_base = db.get_knowledge_base(knowledge_base_id).await?;
    authorize(db, actor, knowledge_base.organization_id, Capability::EditContent).await?;
    db.update_knowledge_base(knowledge_base_id, &changes).await
}

pub async fn delete_knowledge_base(
    db: &dyn DatabaseService,
    actor: Uuid,
    knowledge_base_id: Uuid,
) -> PortResult<()> {
    let knowledge_base = db.get_knowledge_base(knowledge_base_id).await?;
    authorize(
        db,
        actor,
        knowledge_base.organization_id,
        Capability::ManageOrganization,
    )
    .await?;
    db.delete_knowledge_base(knowledge_base_id).await
}

pub async fn list_questions(
    db: &dyn DatabaseService,
    actor: Uuid,
    knowledge_base_id: Uuid,
) -> PortResult<Vec<KnowledgeBaseQuestion>> {
    get_knowledge_base(db, actor, knowledge_base_id).await?;
    db.list_knowledge_base_questions(knowledge_base_id).await
}

pub async fn create_question(
    db: &dyn DatabaseService,
    actor: Uuid,
    knowledge_base_id: Uuid,
    question: NewKnowledgeBaseQuestion,
) -> PortResult<KnowledgeBaseQuestion> {
    let knowledge_base = db.get_knowledge_base(knowledge_base_id).await?;
    authorize(db, actor, knowledge_base.organization_id, Capability::EditContent).await?;
    db.create_knowledge_base_question(knowledge_base_id, &question)
        .await
}

pub async fn update_question(
    db: &dyn DatabaseService,
    actor: Uuid,
    knowledge_base_id: Uuid,
    question_id: Uuid,
    changes: KnowledgeBaseQuestionChanges,
) -> PortResult<KnowledgeBaseQuestion> {
    authorize_question(db, actor, knowledge_base_id, question_id).await?;
    db.update_knowledge_base_question(question_id, &changes)
        .await
}

pub async fn delete_question(
    db: &dyn DatabaseService,
    actor: Uuid,
    knowledge_base_id: Uuid,
    question_id: Uuid,
) -> PortResult<()> {
    authorize_question(db, actor, knowledge_base_id, question_id).await?;
    db.delete_knowledge_base_question(question_id).await
}

/// Checks edit rights on the knowledge base and that the question belongs to it.
async fn authorize_question(
    db: &dyn DatabaseService,
    actor: Uuid,
    knowledge_base_id: Uuid,
    question_id: Uuid,
) -> PortResult<()> {
    let knowledge_base = db.get_knowledge_base(knowledge_base_id).await?;
    authorize(db, actor, knowledge_base.organization_id, Capability::EditContent).await?;

    let question = db.get_knowledge_base_question(question_id).await?;
    if question.knowledge_base_id != knowledge_base_id {
        return Err(PortError::NotFound(format!(
            "Question {} not found in knowledge base {}",
            question_id, knowledge_base_id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AnswerChange, Role};
    use crate::testing::InMemoryDatabase;
    use crate::tenancy;

    async fn setup() -> (InMemoryDatabase, Uuid, KnowledgeBase) {
        let db = InMemoryDatabase::new();
        let owner = db.seed_user("owner@example.com").await;
        let (org, _) = db.seed_project(owner).await;
        let kb = create_knowledge_base(&db, owner, org.id, "Security answers", None)
            .await
            .unwrap();
        (db, owner, kb)
    }

    fn new_question(answer: Option<&str>) -> NewKnowledgeBaseQuestion {
        NewKnowledgeBaseQuestion {
            text: "Do you support SSO?".to_string(),
            topic: Some("Security".to_string()),
            tags: vec!["sso".to_string()],
            answer: answer.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn deleting_question_removes_its_answer() {
        let (db, owner, kb) = setup().await;
        let question = create_question(&db, owner, kb.id, new_question(Some("Yes, SAML and OIDC.")))
            .await
            .unwrap();
        assert_eq!(db.knowledge_base_answer_count(), 1);

        delete_question(&db, owner, kb.id, question.id).await.unwrap();

        assert_eq!(db.knowledge_base_answer_count(), 0);
        assert!(list_questions(&db, owner, kb.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn answer_is_created_replaced_and_cleared() {
        let (db, owner, kb) = setup().await;
        let question = create_question(&db, owner, kb.id, new_question(None)).await.unwrap();
        assert!(question.answer.is_none());

        let set = KnowledgeBaseQuestionChanges {
            answer: AnswerChange::Set("Yes.".to_string()),
            ..Default::default()
        };
        let updated = update_question(&db, owner, kb.id, question.id, set).await.unwrap();
        assert_eq!(updated.answer.unwrap().text, "Yes.");

        let replace = KnowledgeBaseQuestionChanges {
            text: Some("Do you support SAML SSO?".to_string()),
            answer: AnswerChange::Set("Yes, via Okta.".to_string()),
            ..Default::default()
        };
        let updated = update_question(&db, owner, kb.id, question.id, replace).await.unwrap();
        assert_eq!(updated.text, "Do you support SAML SSO?");
        assert_eq!(updated.answer.unwrap().text, "Yes, via Okta.");

        let keep = KnowledgeBaseQuestionChanges::default();
        let kept = update_question(&db, owner, kb.id, question.id, keep).await.unwrap();
        assert!(kept.answer.is_some());

        let clear = KnowledgeBaseQuestionChanges {
            answer: AnswerChange::Clear,
            ..Default::default()
        };
        let cleared = update_question(&db, owner, kb.id, question.id, clear).await.unwrap();
        assert!(cleared.answer.is_none());
        assert_eq!(db.knowledge_base_answer_count(), 0);
    }

    #[tokio::test]
    async fn question_must_belong_to_knowledge_base() {
        let (db, owner, kb) = setup().await;
        let other = create_knowledge_base(&db, owner, kb.organization_id, "Other", None)
            .await
            .unwrap();
        let question = create_question(&db, owner, kb.id, new_question(None)).await.unwrap();

        let result = delete_question(&db, owner, other.id, question.id).await;
        assert!(matches!(result, Err(PortError::NotFound(_))));
    }

    #[tokio::test]
    async fn members_edit_but_cannot_delete_knowledge_bases() {
        let (db, owner, kb) = setup().await;
        let member = db.seed_user("member@example.com").await;
        tenancy::add_member(&db, owner, kb.organization_id, "member@example.com", Role::Member)
            .await
            .unwrap();

        create_question(&db, member, kb.id, new_question(None)).await.unwrap();
        assert!(matches!(
            delete_knowledge_base(&db, member, kb.id).await,
            Err(PortError::Forbidden(_))
        ));
        delete_knowledge_base(&db, owner, kb.id).await.unwrap();
    }

    #[tokio::test]
    async fn outsiders_cannot_read_knowledge_bases() {
        let (db, _, kb) = setup().await;
        let outsider = db.seed_user("outsider@example.com").await;

        assert!(matches!(
            list_questions(&db, outsider, kb.id).await,
            Err(PortError::Forbidden(_))
        ));
        assert!(matches!(
            list_knowledge_bases(&db, outsider, kb.organization_id).await,
            Err(PortError::Forbidden(_))
        ));
    }
}
