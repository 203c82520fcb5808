//! crates/autorfp_core/src/testing.rs
//!
//! In-memory implementations of the ports, used by the unit and HTTP test suites.
//! The database keeps the same guarantees the PostgreSQL adapter gets from its
//! constraints and transactions: unique slugs and emails, cascading deletes and
//! the last-owner rule.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::access::ensure_owner_remains;
use crate::domain::{
    Answer, AnswerChange, AnswerDraft, Document, KnowledgeBase, KnowledgeBaseAnswer,
    KnowledgeBaseChanges, KnowledgeBaseQuestion, KnowledgeBaseQuestionChanges, Member,
    NewKnowledgeBaseQuestion, NewOrganization, Organization, OrganizationChanges,
    OrganizationMembership, ParsingConnection, Project, ProjectChanges, Question, Role, User,
    UserCredentials,
};
use crate::pipeline::{
    AnswerValidation, DocumentExcerpt, ExtractedInformation, ExtractedQuestionnaire,
    GenerationStage, ParsedDocument, QuestionAnalysis, SearchHit, SynthesizedResponse,
};
use crate::ports::{
    DatabaseService, DocumentParsingService, PortError, PortResult, QuestionExtractionService,
    ResponseGenerationService,
};

//=========================================================================================
// InMemoryDatabase
//=========================================================================================

struct MemberRow {
    organization_id: Uuid,
    user_id: Uuid,
    role: Role,
    joined_at: DateTime<Utc>,
}

#[derive(Default)]
struct Store {
    users: Vec<(User, String)>,
    sessions: Vec<(String, Uuid, DateTime<Utc>)>,
    organizations: Vec<Organization>,
    members: Vec<MemberRow>,
    projects: Vec<Project>,
    knowledge_bases: Vec<KnowledgeBase>,
    kb_questions: Vec<KnowledgeBaseQuestion>,
    kb_answers: Vec<(Uuid, KnowledgeBaseAnswer)>,
    documents: Vec<Document>,
    questions: Vec<Question>,
    answers: Vec<Answer>,
}

impl Store {
    fn user(&self, user_id: Uuid) -> PortResult<&User> {
        self.users
            .iter()
            .map(|(user, _)| user)
            .find(|u| u.id == user_id)
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))
    }

    fn organization_mut(&mut self, id: Uuid) -> PortResult<&mut Organization> {
        self.organizations
            .iter_mut()
            .find(|o| o.id == id)
            .ok_or_else(|| PortError::NotFound(format!("Organization {} not found", id)))
    }

    fn member(&self, organization_id: Uuid, user_id: Uuid) -> PortResult<Member> {
        let row = self
            .members
            .iter()
            .find(|m| m.organization_id == organization_id && m.user_id == user_id)
            .ok_or_else(|| PortError::NotFound(format!("User {} is not a member", user_id)))?;
        Ok(Member {
            organization_id,
            user: self.user(user_id)?.clone(),
            role: row.role,
            joined_at: row.joined_at,
        })
    }

    fn roles(&self, organization_id: Uuid) -> Vec<(Uuid, Role)> {
        self.members
            .iter()
            .filter(|m| m.organization_id == organization_id)
            .map(|m| (m.user_id, m.role))
            .collect()
    }

    fn project_mut(&mut self, id: Uuid) -> PortResult<&mut Project> {
        self.projects
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| PortError::NotFound(format!("Project {} not found", id)))
    }

    fn knowledge_base_mut(&mut self, id: Uuid) -> PortResult<&mut KnowledgeBase> {
        self.knowledge_bases
            .iter_mut()
            .find(|k| k.id == id)
            .ok_or_else(|| PortError::NotFound(format!("Knowledge base {} not found", id)))
    }

    fn kb_question(&self, id: Uuid) -> PortResult<KnowledgeBaseQuestion> {
        let mut question = self
            .kb_questions
            .iter()
            .find(|q| q.id == id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Question {} not found", id)))?;
        question.answer = self
            .kb_answers
            .iter()
            .find(|(question_id, _)| *question_id == id)
            .map(|(_, answer)| answer.clone());
        Ok(question)
    }

    fn question(&self, id: Uuid) -> PortResult<Question> {
        let mut question = self
            .questions
            .iter()
            .find(|q| q.id == id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Question {} not found", id)))?;
        question.answer = self.answers.iter().find(|a| a.question_id == id).cloned();
        Ok(question)
    }

    fn set_answer(&mut self, question_id: Uuid, draft: &AnswerDraft) -> Answer {
        let answer = Answer {
            question_id,
            text: draft.text.clone(),
            confidence: draft.confidence,
            sources: draft.sources.clone(),
            updated_at: Utc::now(),
        };
        self.answers.retain(|a| a.question_id != question_id);
        self.answers.push(answer.clone());
        answer
    }

    fn delete_project_rows(&mut self, project_id: Uuid) {
        let question_ids: Vec<Uuid> = self
            .questions
            .iter()
            .filter(|q| q.project_id == project_id)
            .map(|q| q.id)
            .collect();
        self.answers.retain(|a| !question_ids.contains(&a.question_id));
        self.questions.retain(|q| q.project_id != project_id);
        self.documents.retain(|d| d.project_id != project_id);
        self.projects.retain(|p| p.id != project_id);
    }

    fn delete_knowledge_base_rows(&mut self, knowledge_base_id: Uuid) {
        let question_ids: Vec<Uuid> = self
            .kb_questions
            .iter()
            .filter(|q| q.knowledge_base_id == knowledge_base_id)
            .map(|q| q.id)
            .collect();
        self.kb_answers.retain(|(id, _)| !question_ids.contains(id));
        self.kb_questions
            .retain(|q| q.knowledge_base_id != knowledge_base_id);
        self.knowledge_bases.retain(|k| k.id != knowledge_base_id);
    }
}

/// A `DatabaseService` backed by vectors behind a mutex.
#[derive(Default)]
pub struct InMemoryDatabase {
    store: Mutex<Store>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Creates a user with a placeholder password hash and returns its id.
    pub async fn seed_user(&self, email: &str) -> Uuid {
        match self.create_user_with_email(email, "not-a-real-hash", None).await {
            Ok(user) => user.id,
            Err(_) => self
                .store()
                .users
                .iter()
                .find(|(u, _)| u.email == email)
                .map(|(u, _)| u.id)
                .unwrap_or_default(),
        }
    }

    /// Creates an organization owned by `owner` with one project in it.
    pub async fn seed_project(&self, owner: Uuid) -> (Organization, Project) {
        let suffix = Uuid::new_v4().simple().to_string();
        let organization = self
            .create_organization(
                owner,
                &NewOrganization {
                    name: format!("Org {}", &suffix[..8]),
                    slug: format!("org-{}", &suffix[..8]),
                    description: None,
                },
            )
            .await
            .unwrap_or_else(|e| panic!("seeding organization failed: {}", e));
        let project = self
            .create_project(organization.id, "RFP", None)
            .await
            .unwrap_or_else(|e| panic!("seeding project failed: {}", e));
        (organization, project)
    }

    pub fn project_count(&self) -> usize {
        self.store().projects.len()
    }

    pub fn knowledge_base_answer_count(&self) -> usize {
        self.store().kb_answers.len()
    }

    pub fn answer_count(&self) -> usize {
        self.store().answers.len()
    }
}

#[async_trait]
impl DatabaseService for InMemoryDatabase {
    async fn create_user_with_email(
        &self,
        email: &str,
        hashed_password: &str,
        name: Option<&str>,
    ) -> PortResult<User> {
        let mut store = self.store();
        if store
            .users
            .iter()
            .any(|(u, _)| u.email.eq_ignore_ascii_case(email))
        {
            return Err(PortError::Conflict(format!("Email {} is already registered", email)));
        }
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            name: name.map(str::to_string),
            created_at: Utc::now(),
        };
        store.users.push((user.clone(), hashed_password.to_string()));
        Ok(user)
    }

    async fn get_user(&self, user_id: Uuid) -> PortResult<User> {
        self.store().user(user_id).cloned()
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        self.store()
            .users
            .iter()
            .find(|(u, _)| u.email.eq_ignore_ascii_case(email))
            .map(|(u, hash)| UserCredentials {
                user_id: u.id,
                email: u.email.clone(),
                hashed_password: hash.clone(),
            })
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", email)))
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        self.store()
            .sessions
            .push((session_id.to_string(), user_id, expires_at));
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid> {
        self.store()
            .sessions
            .iter()
            .find(|(id, _, expires_at)| id == session_id && *expires_at > Utc::now())
            .map(|(_, user_id, _)| *user_id)
            .ok_or(PortError::Unauthorized)
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        self.store().sessions.retain(|(id, _, _)| id != session_id);
        Ok(())
    }

    async fn create_organization(
        &self,
        creator: Uuid,
        organization: &NewOrganization,
    ) -> PortResult<Organization> {
        let mut store = self.store();
        store.user(creator)?;
        if store.organizations.iter().any(|o| o.slug == organization.slug) {
            return Err(PortError::Conflict(format!(
                "Slug '{}' is already taken",
                organization.slug
            )));
        }
        let now = Utc::now();
        let created = Organization {
            id: Uuid::new_v4(),
            name: organization.name.clone(),
            slug: organization.slug.clone(),
            description: organization.description.clone(),
            parsing: None,
            created_at: now,
            updated_at: now,
        };
        store.organizations.push(created.clone());
        store.members.push(MemberRow {
            organization_id: created.id,
            user_id: creator,
            role: Role::Owner,
            joined_at: now,
        });
        Ok(created)
    }

    async fn get_organization(&self, organization_id: Uuid) -> PortResult<Organization> {
        self.store().organization_mut(organization_id).map(|o| o.clone())
    }

    async fn list_organizations_for_user(
        &self,
        user_id: Uuid,
    ) -> PortResult<Vec<OrganizationMembership>> {
        let store = self.store();
        Ok(store
            .members
            .iter()
            .filter(|m| m.user_id == user_id)
            .filter_map(|m| {
                store
                    .organizations
                    .iter()
                    .find(|o| o.id == m.organization_id)
                    .map(|o| OrganizationMembership {
                        organization: o.clone(),
                        role: m.role,
                    })
            })
            .collect())
    }

    async fn update_organization(
        &self,
        organization_id: Uuid,
        changes: &OrganizationChanges,
    ) -> PortResult<Organization> {
        let mut store = self.store();
        if let Some(slug) = &changes.slug {
            if store
                .organizations
                .iter()
                .any(|o| o.slug == *slug && o.id != organization_id)
            {
                return Err(PortError::Conflict(format!("Slug '{}' is already taken", slug)));
            }
        }
        let organization = store.organization_mut(organization_id)?;
        if let Some(name) = &changes.name {
            organization.name = name.clone();
        }
        if let Some(slug) = &changes.slug {
            organization.slug = slug.clone();
        }
        if let Some(description) = &changes.description {
            organization.description = description.clone();
        }
        organization.updated_at = Utc::now();
        Ok(organization.clone())
    }

    async fn delete_organization(&self, organization_id: Uuid) -> PortResult<()> {
        let mut store = self.store();
        store.organization_mut(organization_id)?;
        let projects: Vec<Uuid> = store
            .projects
            .iter()
            .filter(|p| p.organization_id == organization_id)
            .map(|p| p.id)
            .collect();
        for project_id in projects {
            store.delete_project_rows(project_id);
        }
        let knowledge_bases: Vec<Uuid> = store
            .knowledge_bases
            .iter()
            .filter(|k| k.organization_id == organization_id)
            .map(|k| k.id)
            .collect();
        for knowledge_base_id in knowledge_bases {
            store.delete_knowledge_base_rows(knowledge_base_id);
        }
        store.members.retain(|m| m.organization_id != organization_id);
        store.organizations.retain(|o| o.id != organization_id);
        Ok(())
    }

    async fn set_parsing_connection(
        &self,
        organization_id: Uuid,
        connection: Option<&ParsingConnection>,
    ) -> PortResult<Organization> {
        let mut store = self.store();
        let organization = store.organization_mut(organization_id)?;
        organization.parsing = connection.cloned();
        organization.updated_at = Utc::now();
        Ok(organization.clone())
    }

    async fn get_member_role(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> PortResult<Option<Role>> {
        Ok(self
            .store()
            .members
            .iter()
            .find(|m| m.organization_id == organization_id && m.user_id == user_id)
            .map(|m| m.role))
    }

    async fn list_members(&self, organization_id: Uuid) -> PortResult<Vec<Member>> {
        let store = self.store();
        store
            .members
            .iter()
            .filter(|m| m.organization_id == organization_id)
            .map(|m| store.member(organization_id, m.user_id))
            .collect()
    }

    async fn add_member(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        role: Role,
    ) -> PortResult<Member> {
        let mut store = self.store();
        store.organization_mut(organization_id)?;
        store.user(user_id)?;
        if store
            .members
            .iter()
            .any(|m| m.organization_id == organization_id && m.user_id == user_id)
        {
            return Err(PortError::Conflict("User is already a member".to_string()));
        }
        store.members.push(MemberRow {
            organization_id,
            user_id,
            role,
            joined_at: Utc::now(),
        });
        store.member(organization_id, user_id)
    }

    async fn update_member_role(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        role: Role,
    ) -> PortResult<Member> {
        let mut store = self.store();
        store.member(organization_id, user_id)?;
        ensure_owner_remains(&store.roles(organization_id), user_id, Some(role))?;
        if let Some(row) = store
            .members
            .iter_mut()
            .find(|m| m.organization_id == organization_id && m.user_id == user_id)
        {
            row.role = role;
        }
        store.member(organization_id, user_id)
    }

    async fn remove_member(&self, organization_id: Uuid, user_id: Uuid) -> PortResult<()> {
        let mut store = self.store();
        store.member(organization_id, user_id)?;
        ensure_owner_remains(&store.roles(organization_id), user_id, None)?;
        store
            .members
            .retain(|m| !(m.organization_id == organization_id && m.user_id == user_id));
        Ok(())
    }

    async fn create_project(
        &self,
        organization_id: Uuid,
        name: &str,
        description: Option<&str>,
    ) -> PortResult<Project> {
        let mut store = self.store();
        store.organization_mut(organization_id)?;
        let now = Utc::now();
        let project = Project {
            id: Uuid::new_v4(),
            organization_id,
            name: name.to_string(),
            description: description.map(str::to_string),
            created_at: now,
            updated_at: now,
        };
        store.projects.push(project.clone());
        Ok(project)
    }

    async fn get_project(&self, project_id: Uuid) -> PortResult<Project> {
        self.store().project_mut(project_id).map(|p| p.clone())
    }

    async fn list_projects(&self, organization_id: Uuid) -> PortResult<Vec<Project>> {
        Ok(self
            .store()
            .projects
            .iter()
            .filter(|p| p.organization_id == organization_id)
            .cloned()
            .collect())
    }

    async fn update_project(
        &self,
        project_id: Uuid,
        changes: &ProjectChanges,
    ) -> PortResult<Project> {
        let mut store = self.store();
        let project = store.project_mut(project_id)?;
        if let Some(name) = &changes.name {
            project.name = name.clone();
        }
        if let Some(description) = &changes.description {
            project.description = description.clone();
        }
        project.updated_at = Utc::now();
        Ok(project.clone())
    }

    async fn delete_project(&self, project_id: Uuid) -> PortResult<()> {
        let mut store = self.store();
        store.project_mut(project_id)?;
        store.delete_project_rows(project_id);
        Ok(())
    }

    async fn create_knowledge_base(
        &self,
        organization_id: Uuid,
        name: &str,
        description: Option<&str>,
    ) -> PortResult<KnowledgeBase> {
        let mut store = self.store();
        store.organization_mut(organization_id)?;
        let now = Utc::now();
        let knowledge_base = KnowledgeBase {
            id: Uuid::new_v4(),
            organization_id,
            name: name.to_string(),
            description: description.map(str::to_string),
            created_at: now,
            updated_at: now,
        };
        store.knowledge_bases.push(knowledge_base.clone());
        Ok(knowledge_base)
    }

    async fn get_knowledge_base(&self, knowledge_base_id: Uuid) -> PortResult<KnowledgeBase> {
        self.store()
            .knowledge_base_mut(knowledge_base_id)
            .map(|k| k.clone())
    }

    async fn list_knowledge_bases(&self, organization_id: Uuid) -> PortResult<Vec<KnowledgeBase>> {
        Ok(self
            .store()
            .knowledge_bases
            .iter()
            .filter(|k| k.organization_id == organization_id)
            .cloned()
            .collect())
    }

    async fn update_knowledge_base(
        &self,
        knowledge_base_id: Uuid,
        changes: &KnowledgeBaseChanges,
    ) -> PortResult<KnowledgeBase> {
        let mut store = self.store();
        let knowledge_base = store.knowledge_base_mut(knowledge_base_id)?;
        if let Some(name) = &changes.name {
            knowledge_base.name = name.clone();
        }
        if let Some(description) = &changes.description {
            knowledge_base.description = description.clone();
        }
        knowledge_base.updated_at = Utc::now();
        Ok(knowledge_base.clone())
    }

    async fn delete_knowledge_base(&self, knowledge_base_id: Uuid) -> PortResult<()> {
        let mut store = self.store();
        store.knowledge_base_mut(knowledge_base_id)?;
        store.delete_knowledge_base_rows(knowledge_base_id);
        Ok(())
    }

    async fn list_knowledge_base_questions(
        &self,
        knowledge_base_id: Uuid,
    ) -> PortResult<Vec<KnowledgeBaseQuestion>> {
        let store = self.store();
        store
            .kb_questions
            .iter()
            .filter(|q| q.knowledge_base_id == knowledge_base_id)
            .map(|q| store.kb_question(q.id))
            .collect()
    }

    async fn get_knowledge_base_question(
        &self,
        question_id: Uuid,
    ) -> PortResult<KnowledgeBaseQuestion> {
        self.store().kb_question(question_id)
    }

    async fn create_knowledge_base_question(
        &self,
        knowledge_base_id: Uuid,
        question: &NewKnowledgeBaseQuestion,
    ) -> PortResult<KnowledgeBaseQuestion> {
        let mut store = self.store();
        store.knowledge_base_mut(knowledge_base_id)?;
        let now = Utc::now();
        let id = Uuid::new_v4();
        store.kb_questions.push(KnowledgeBaseQuestion {
            id,
            knowledge_base_id,
            text: question.text.clone(),
            topic: question.topic.clone(),
            tags: question.tags.clone(),
            answer: None,
            created_at: now,
            updated_at: now,
        });
        if let Some(text) = &question.answer {
            store.kb_answers.push((
                id,
                KnowledgeBaseAnswer {
                    text: text.clone(),
                    updated_at: now,
                },
            ));
        }
        store.kb_question(id)
    }

    async fn update_knowledge_base_question(
        &self,
        question_id: Uuid,
        changes: &KnowledgeBaseQuestionChanges,
    ) -> PortResult<KnowledgeBaseQuestion> {
        let mut store = self.store();
        let now = Utc::now();
        let question = store
            .kb_questions
            .iter_mut()
            .find(|q| q.id == question_id)
            .ok_or_else(|| PortError::NotFound(format!("Question {} not found", question_id)))?;
        if let Some(text) = &changes.text {
            question.text = text.clone();
        }
        if let Some(topic) = &changes.topic {
            question.topic = topic.clone();
        }
        if let Some(tags) = &changes.tags {
            question.tags = tags.clone();
        }
        question.updated_at = now;

        match &changes.answer {
            AnswerChange::Keep => {}
            AnswerChange::Set(text) => {
                store.kb_answers.retain(|(id, _)| *id != question_id);
                store.kb_answers.push((
                    question_id,
                    KnowledgeBaseAnswer {
                        text: text.clone(),
                        updated_at: now,
                    },
                ));
            }
            AnswerChange::Clear => store.kb_answers.retain(|(id, _)| *id != question_id),
        }
        store.kb_question(question_id)
    }

    async fn delete_knowledge_base_question(&self, question_id: Uuid) -> PortResult<()> {
        let mut store = self.store();
        store.kb_question(question_id)?;
        store.kb_answers.retain(|(id, _)| *id != question_id);
        store.kb_questions.retain(|q| q.id != question_id);
        Ok(())
    }

    async fn create_document(
        &self,
        project_id: Uuid,
        file_name: &str,
        content: &str,
        page_count: Option<u32>,
    ) -> PortResult<Document> {
        let mut store = self.store();
        store.project_mut(project_id)?;
        let document = Document {
            id: Uuid::new_v4(),
            project_id,
            file_name: file_name.to_string(),
            content: content.to_string(),
            page_count,
            created_at: Utc::now(),
        };
        store.documents.push(document.clone());
        Ok(document)
    }

    async fn get_document(&self, document_id: Uuid) -> PortResult<Document> {
        self.store()
            .documents
            .iter()
            .find(|d| d.id == document_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Document {} not found", document_id)))
    }

    async fn list_documents(&self, project_id: Uuid) -> PortResult<Vec<Document>> {
        Ok(self
            .store()
            .documents
            .iter()
            .filter(|d| d.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn save_extracted_questions(
        &self,
        project_id: Uuid,
        questionnaire: &ExtractedQuestionnaire,
    ) -> PortResult<Vec<Question>> {
        let mut store = self.store();
        store.project_mut(project_id)?;
        let mut ids = Vec::with_capacity(questionnaire.question_count());
        for section in &questionnaire.sections {
            for extracted in &section.questions {
                let reference_id = extracted.id.trim().to_string();
                let existing = store
                    .questions
                    .iter_mut()
                    .find(|q| q.project_id == project_id && q.reference_id == reference_id);
                let id = match existing {
                    Some(question) => {
                        question.text = extracted.text.clone();
                        question.topic = Some(section.title.clone());
                        question.section_id = Some(section.id.clone());
                        question.id
                    }
                    None => {
                        let question = Question {
                            id: Uuid::new_v4(),
                            project_id,
                            reference_id,
                            text: extracted.text.clone(),
                            topic: Some(section.title.clone()),
                            section_id: Some(section.id.clone()),
                            answer: None,
                            created_at: Utc::now(),
                        };
                        let id = question.id;
                        store.questions.push(question);
                        id
                    }
                };
                if let Some(text) = extracted.answer.as_deref().filter(|t| !t.trim().is_empty()) {
                    store.set_answer(
                        id,
                        &AnswerDraft {
                            text: text.to_string(),
                            ..Default::default()
                        },
                    );
                }
                ids.push(id);
            }
        }
        ids.into_iter().map(|id| store.question(id)).collect()
    }

    async fn list_questions(&self, project_id: Uuid) -> PortResult<Vec<Question>> {
        let store = self.store();
        store
            .questions
            .iter()
            .filter(|q| q.project_id == project_id)
            .map(|q| store.question(q.id))
            .collect()
    }

    async fn get_question(&self, question_id: Uuid) -> PortResult<Question> {
        self.store().question(question_id)
    }

    async fn upsert_answer(&self, question_id: Uuid, answer: &AnswerDraft) -> PortResult<Answer> {
        let mut store = self.store();
        store.question(question_id)?;
        Ok(store.set_answer(question_id, answer))
    }

    async fn delete_question(&self, question_id: Uuid) -> PortResult<()> {
        let mut store = self.store();
        store.question(question_id)?;
        store.answers.retain(|a| a.question_id != question_id);
        store.questions.retain(|q| q.id != question_id);
        Ok(())
    }
}

//=========================================================================================
// Scripted External Services
//=========================================================================================

/// A parser that returns the same text for every upload.
pub struct StaticParser {
    content: String,
}

impl StaticParser {
    pub fn new(content: &str) -> Self {
        Self {
            content: content.to_string(),
        }
    }
}

#[async_trait]
impl DocumentParsingService for StaticParser {
    async fn parse_document(
        &self,
        _file_name: &str,
        _data: &[u8],
        _connection: Option<&ParsingConnection>,
    ) -> PortResult<ParsedDocument> {
        Ok(ParsedDocument {
            content: self.content.clone(),
            page_count: Some(1),
        })
    }
}

/// An extractor that returns a fixed questionnaire, or a fixed error.
pub struct ScriptedExtractor {
    reply: PortResult<ExtractedQuestionnaire>,
}

impl ScriptedExtractor {
    pub fn returning(questionnaire: ExtractedQuestionnaire) -> Self {
        Self {
            reply: Ok(questionnaire),
        }
    }

    pub fn failing(error: PortError) -> Self {
        Self { reply: Err(error) }
    }
}

#[async_trait]
impl QuestionExtractionService for ScriptedExtractor {
    async fn extract_questions(
        &self,
        _document_name: &str,
        _content: &str,
    ) -> PortResult<ExtractedQuestionnaire> {
        self.reply.clone()
    }
}

/// A generator that records which stages ran and can fail at a chosen stage.
pub struct ScriptedGenerator {
    answer: String,
    revision: Option<String>,
    fail_at: Option<GenerationStage>,
    calls: Mutex<Vec<GenerationStage>>,
}

impl ScriptedGenerator {
    pub fn answering(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            revision: None,
            fail_at: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_at(mut self, stage: GenerationStage) -> Self {
        self.fail_at = Some(stage);
        self
    }

    pub fn with_revision(mut self, revision: &str) -> Self {
        self.revision = Some(revision.to_string());
        self
    }

    pub fn calls(&self) -> Vec<GenerationStage> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn enter(&self, stage: GenerationStage) -> PortResult<()> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(stage);
        if self.fail_at == Some(stage) {
            return Err(PortError::External("scripted failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ResponseGenerationService for ScriptedGenerator {
    async fn analyze_question(&self, question: &str) -> PortResult<QuestionAnalysis> {
        self.enter(GenerationStage::AnalyzeQuestion)?;
        Ok(QuestionAnalysis {
            question_type: "factual".to_string(),
            complexity: "simple".to_string(),
            key_topics: vec![question.to_string()],
            required_information: Vec::new(),
            search_queries: vec![question.to_string()],
        })
    }

    async fn search_documents(
        &self,
        _question: &str,
        _analysis: &QuestionAnalysis,
        documents: &[DocumentExcerpt],
    ) -> PortResult<Vec<SearchHit>> {
        self.enter(GenerationStage::SearchDocuments)?;
        Ok(documents
            .iter()
            .map(|d| SearchHit {
                file_name: d.file_name.clone(),
                page_number: None,
                excerpt: d.content.chars().take(200).collect(),
                relevance: 0.5,
            })
            .collect())
    }

    async fn extract_information(
        &self,
        _question: &str,
        _hits: &[SearchHit],
    ) -> PortResult<ExtractedInformation> {
        self.enter(GenerationStage::ExtractInformation)?;
        Ok(ExtractedInformation::default())
    }

    async fn synthesize_response(
        &self,
        _question: &str,
        _analysis: &QuestionAnalysis,
        _information: &ExtractedInformation,
    ) -> PortResult<SynthesizedResponse> {
        self.enter(GenerationStage::SynthesizeResponse)?;
        Ok(SynthesizedResponse {
            answer: self.answer.clone(),
            confidence: 0.8,
            sources: Vec::new(),
        })
    }

    async fn validate_answer(
        &self,
        _question: &str,
        _response: &SynthesizedResponse,
    ) -> PortResult<AnswerValidation> {
        self.enter(GenerationStage::ValidateAnswer)?;
        Ok(AnswerValidation {
            is_valid: true,
            confidence: 0.9,
            issues: Vec::new(),
            revised_answer: self.revision.clone(),
        })
    }
}
