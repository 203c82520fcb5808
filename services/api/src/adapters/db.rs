//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DatabaseService` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use autorfp_core::access::ensure_owner_remains;
use autorfp_core::domain::{
    Answer, AnswerChange, AnswerDraft, Document, KnowledgeBase, KnowledgeBaseAnswer,
    KnowledgeBaseChanges, KnowledgeBaseQuestion, KnowledgeBaseQuestionChanges, Member,
    NewKnowledgeBaseQuestion, NewOrganization, Organization, OrganizationChanges,
    OrganizationMembership, ParsingConnection, Project, ProjectChanges, Question, Role, Source,
    User, UserCredentials,
};
use autorfp_core::pipeline::ExtractedQuestionnaire;
use autorfp_core::ports::{DatabaseService, PortError, PortResult};
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn begin(&self) -> PortResult<Transaction<'static, Postgres>> {
        self.pool.begin().await.map_err(unexpected)
    }
}

//=========================================================================================
// Error Mapping
//=========================================================================================

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Maps a sqlx error to a port error. `missing` describes the row for `NotFound`.
fn db_error(e: sqlx::Error, missing: impl FnOnce() -> String) -> PortError {
    match &e {
        sqlx::Error::RowNotFound => PortError::NotFound(missing()),
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some(UNIQUE_VIOLATION) => PortError::Conflict(
                match db.constraint() {
                    Some("users_email_key") => "Email is already registered",
                    Some("organizations_slug_key") => "Slug is already taken",
                    Some("organization_users_pkey") => "User is already a member",
                    _ => "Resource already exists",
                }
                .to_string(),
            ),
            Some(FOREIGN_KEY_VIOLATION) => PortError::NotFound(missing()),
            _ => PortError::Unexpected(e.to_string()),
        },
        _ => PortError::Unexpected(e.to_string()),
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn parse_role(role: &str) -> PortResult<Role> {
    role.parse::<Role>().map_err(PortError::Unexpected)
}

fn not_found_unless_affected(rows: u64, what: impl FnOnce() -> String) -> PortResult<()> {
    if rows == 0 {
        return Err(PortError::NotFound(what()));
    }
    Ok(())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRecord {
    id: Uuid,
    email: String,
    name: Option<String>,
    created_at: DateTime<Utc>,
}
impl UserRecord {
    fn to_domain(self) -> User {
        User {
            id: self.id,
            email: self.email,
            name: self.name,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct CredentialsRecord {
    id: Uuid,
    email: String,
    hashed_password: String,
}

const ORGANIZATION_COLUMNS: &str = "o.id, o.name, o.slug, o.description, o.parsing_project_id, \
     o.parsing_project_name, o.parsing_connected_at, o.created_at, o.updated_at";

#[derive(FromRow)]
struct OrganizationRecord {
    id: Uuid,
    name: String,
    slug: String,
    description: Option<String>,
    parsing_project_id: Option<String>,
    parsing_project_name: Option<String>,
    parsing_connected_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl OrganizationRecord {
    fn to_domain(self) -> Organization {
        let parsing = match (self.parsing_project_id, self.parsing_connected_at) {
            (Some(project_id), Some(connected_at)) => Some(ParsingConnection {
                project_id,
                project_name: self.parsing_project_name,
                connected_at,
            }),
            _ => None,
        };
        Organization {
            id: self.id,
            name: self.name,
            slug: self.slug,
            description: self.description,
            parsing,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(FromRow)]
struct MembershipRecord {
    #[sqlx(flatten)]
    organization: OrganizationRecord,
    role: String,
}
impl MembershipRecord {
    fn to_domain(self) -> PortResult<OrganizationMembership> {
        Ok(OrganizationMembership {
            role: parse_role(&self.role)?,
            organization: self.organization.to_domain(),
        })
    }
}

const MEMBER_SELECT: &str = "SELECT ou.organization_id, ou.role, ou.created_at AS joined_at, \
     u.id, u.email, u.name, u.created_at \
     FROM organization_users ou JOIN users u ON u.id = ou.user_id";

#[derive(FromRow)]
struct MemberRecord {
    organization_id: Uuid,
    role: String,
    joined_at: DateTime<Utc>,
    #[sqlx(flatten)]
    user: UserRecord,
}
impl MemberRecord {
    fn to_domain(self) -> PortResult<Member> {
        Ok(Member {
            organization_id: self.organization_id,
            role: parse_role(&self.role)?,
            joined_at: self.joined_at,
            user: self.user.to_domain(),
        })
    }
}

const PROJECT_COLUMNS: &str = "id, organization_id, name, description, created_at, updated_at";

#[derive(FromRow)]
struct ProjectRecord {
    id: Uuid,
    organization_id: Uuid,
    name: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl ProjectRecord {
    fn to_domain(self) -> Project {
        Project {
            id: self.id,
            organization_id: self.organization_id,
            name: self.name,
            description: self.description,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

const DOCUMENT_COLUMNS: &str = "id, project_id, file_name, content, page_count, created_at";

#[derive(FromRow)]
struct DocumentRecord {
    id: Uuid,
    project_id: Uuid,
    file_name: String,
    content: String,
    page_count: Option<i32>,
    created_at: DateTime<Utc>,
}
impl DocumentRecord {
    fn to_domain(self) -> Document {
        Document {
            id: self.id,
            project_id: self.project_id,
            file_name: self.file_name,
            content: self.content,
            page_count: self.page_count.and_then(|n| u32::try_from(n).ok()),
            created_at: self.created_at,
        }
    }
}

const QUESTION_SELECT: &str = "SELECT q.id, q.project_id, q.reference_id, q.text, q.topic, \
     q.section_id, q.created_at, a.text AS answer_text, a.confidence AS answer_confidence, \
     a.sources AS answer_sources, a.updated_at AS answer_updated_at \
     FROM questions q LEFT JOIN answers a ON a.question_id = q.id";

#[derive(FromRow)]
struct QuestionRecord {
    id: Uuid,
    project_id: Uuid,
    reference_id: String,
    text: String,
    topic: Option<String>,
    section_id: Option<String>,
    created_at: DateTime<Utc>,
    answer_text: Option<String>,
    answer_confidence: Option<f32>,
    answer_sources: Option<Json<Vec<Source>>>,
    answer_updated_at: Option<DateTime<Utc>>,
}
impl QuestionRecord {
    fn to_domain(self) -> Question {
        let answer = match (self.answer_text, self.answer_updated_at) {
            (Some(text), Some(updated_at)) => Some(Answer {
                question_id: self.id,
                text,
                confidence: self.answer_confidence,
                sources: self.answer_sources.map(|s| s.0).unwrap_or_default(),
                updated_at,
            }),
            _ => None,
        };
        Question {
            id: self.id,
            project_id: self.project_id,
            reference_id: self.reference_id,
            text: self.text,
            topic: self.topic,
            section_id: self.section_id,
            answer,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct AnswerRecord {
    question_id: Uuid,
    text: String,
    confidence: Option<f32>,
    sources: Json<Vec<Source>>,
    updated_at: DateTime<Utc>,
}
impl AnswerRecord {
    fn to_domain(self) -> Answer {
        Answer {
            question_id: self.question_id,
            text: self.text,
            confidence: self.confidence,
            sources: self.sources.0,
            updated_at: self.updated_at,
        }
    }
}

const KNOWLEDGE_BASE_COLUMNS: &str =
    "id, organization_id, name, description, created_at, updated_at";

#[derive(FromRow)]
struct KnowledgeBaseRecord {
    id: Uuid,
    organization_id: Uuid,
    name: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl KnowledgeBaseRecord {
    fn to_domain(self) -> KnowledgeBase {
        KnowledgeBase {
            id: self.id,
            organization_id: self.organization_id,
            name: self.name,
            description: self.description,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

const KB_QUESTION_SELECT: &str = "SELECT q.id, q.knowledge_base_id, q.text, q.topic, q.tags, \
     q.created_at, q.updated_at, a.text AS answer_text, a.updated_at AS answer_updated_at \
     FROM knowledge_base_questions q LEFT JOIN knowledge_base_answers a ON a.question_id = q.id";

#[derive(FromRow)]
struct KnowledgeBaseQuestionRecord {
    id: Uuid,
    knowledge_base_id: Uuid,
    text: String,
    topic: Option<String>,
    tags: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    answer_text: Option<String>,
    answer_updated_at: Option<DateTime<Utc>>,
}
impl KnowledgeBaseQuestionRecord {
    fn to_domain(self) -> KnowledgeBaseQuestion {
        let answer = match (self.answer_text, self.answer_updated_at) {
            (Some(text), Some(updated_at)) => Some(KnowledgeBaseAnswer { text, updated_at }),
            _ => None,
        };
        KnowledgeBaseQuestion {
            id: self.id,
            knowledge_base_id: self.knowledge_base_id,
            text: self.text,
            topic: self.topic,
            tags: self.tags,
            answer,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

//=========================================================================================
// Transaction Helpers
//=========================================================================================

/// Locks the organization's membership rows for the rest of the transaction.
async fn lock_members(
    tx: &mut Transaction<'static, Postgres>,
    organization_id: Uuid,
) -> PortResult<Vec<(Uuid, Role)>> {
    let rows: Vec<(Uuid, String)> = sqlx::query_as(
        "SELECT user_id, role FROM organization_users WHERE organization_id = $1 FOR UPDATE",
    )
    .bind(organization_id)
    .fetch_all(&mut **tx)
    .await
    .map_err(unexpected)?;

    rows.into_iter()
        .map(|(user_id, role)| Ok((user_id, parse_role(&role)?)))
        .collect()
}

async fn upsert_answer_in(
    tx: &mut Transaction<'static, Postgres>,
    question_id: Uuid,
    answer: &AnswerDraft,
) -> PortResult<Answer> {
    let record = sqlx::query_as::<_, AnswerRecord>(
        "INSERT INTO answers (question_id, text, confidence, sources, updated_at) \
         VALUES ($1, $2, $3, $4, NOW()) \
         ON CONFLICT (question_id) DO UPDATE SET text = EXCLUDED.text, \
         confidence = EXCLUDED.confidence, sources = EXCLUDED.sources, updated_at = NOW() \
         RETURNING question_id, text, confidence, sources, updated_at",
    )
    .bind(question_id)
    .bind(&answer.text)
    .bind(answer.confidence)
    .bind(Json(&answer.sources))
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| db_error(e, || format!("Question {} not found", question_id)))?;
    Ok(record.to_domain())
}

async fn set_knowledge_base_answer(
    tx: &mut Transaction<'static, Postgres>,
    question_id: Uuid,
    text: &str,
) -> PortResult<()> {
    sqlx::query(
        "INSERT INTO knowledge_base_answers (question_id, text, updated_at) VALUES ($1, $2, NOW()) \
         ON CONFLICT (question_id) DO UPDATE SET text = EXCLUDED.text, updated_at = NOW()",
    )
    .bind(question_id)
    .bind(text)
    .execute(&mut **tx)
    .await
    .map_err(|e| db_error(e, || format!("Question {} not found", question_id)))?;
    Ok(())
}

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    // --- Users & Auth Sessions ---

    async fn create_user_with_email(
        &self,
        email: &str,
        hashed_password: &str,
        name: Option<&str>,
    ) -> PortResult<User> {
        let record = sqlx::query_as::<_, UserRecord>(
            "INSERT INTO users (id, email, name, hashed_password) VALUES ($1, $2, $3, $4) \
             RETURNING id, email, name, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(name)
        .bind(hashed_password)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error(e, || format!("User {} not found", email)))?;
        Ok(record.to_domain())
    }

    async fn get_user(&self, user_id: Uuid) -> PortResult<User> {
        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT id, email, name, created_at FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error(e, || format!("User {} not found", user_id)))?;
        Ok(record.to_domain())
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        let record = sqlx::query_as::<_, CredentialsRecord>(
            "SELECT id, email, hashed_password FROM users WHERE LOWER(email) = LOWER($1)",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error(e, || format!("User {} not found", email)))?;
        Ok(UserCredentials {
            user_id: record.id,
            email: record.email,
            hashed_password: record.hashed_password,
        })
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        sqlx::query("INSERT INTO auth_sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(session_id)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error(e, || format!("User {} not found", user_id)))?;
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid> {
        let row: Option<(Uuid,)> = sqlx::query_as(
            "SELECT user_id FROM auth_sessions WHERE id = $1 AND expires_at > NOW()",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        row.map(|(user_id,)| user_id).ok_or(PortError::Unauthorized)
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    // --- Organizations ---

    async fn create_organization(
        &self,
        creator: Uuid,
        organization: &NewOrganization,
    ) -> PortResult<Organization> {
        let mut tx = self.begin().await?;

        let record = sqlx::query_as::<_, OrganizationRecord>(&format!(
            "INSERT INTO organizations AS o (id, name, slug, description) VALUES ($1, $2, $3, $4) \
             RETURNING {}",
            ORGANIZATION_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&organization.name)
        .bind(&organization.slug)
        .bind(&organization.description)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| db_error(e, || "Organization not found".to_string()))?;

        sqlx::query(
            "INSERT INTO organization_users (organization_id, user_id, role) VALUES ($1, $2, $3)",
        )
        .bind(record.id)
        .bind(creator)
        .bind(Role::Owner.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error(e, || format!("User {} not found", creator)))?;

        tx.commit().await.map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn get_organization(&self, organization_id: Uuid) -> PortResult<Organization> {
        let record = sqlx::query_as::<_, OrganizationRecord>(&format!(
            "SELECT {} FROM organizations o WHERE o.id = $1",
            ORGANIZATION_COLUMNS
        ))
        .bind(organization_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error(e, || format!("Organization {} not found", organization_id)))?;
        Ok(record.to_domain())
    }

    async fn list_organizations_for_user(
        &self,
        user_id: Uuid,
    ) -> PortResult<Vec<OrganizationMembership>> {
        let records = sqlx::query_as::<_, MembershipRecord>(&format!(
            "SELECT {}, ou.role FROM organizations o \
             JOIN organization_users ou ON ou.organization_id = o.id \
             WHERE ou.user_id = $1 ORDER BY o.created_at ASC",
            ORGANIZATION_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        records.into_iter().map(MembershipRecord::to_domain).collect()
    }

    async fn update_organization(
        &self,
        organization_id: Uuid,
        changes: &OrganizationChanges,
    ) -> PortResult<Organization> {
        let record = sqlx::query_as::<_, OrganizationRecord>(&format!(
            "UPDATE organizations AS o SET name = COALESCE($2, o.name), slug = COALESCE($3, o.slug), \
             description = CASE WHEN $4 THEN $5 ELSE o.description END, updated_at = NOW() \
             WHERE o.id = $1 RETURNING {}",
            ORGANIZATION_COLUMNS
        ))
        .bind(organization_id)
        .bind(&changes.name)
        .bind(&changes.slug)
        .bind(changes.description.is_some())
        .bind(changes.description.clone().flatten())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error(e, || format!("Organization {} not found", organization_id)))?;
        Ok(record.to_domain())
    }

    async fn delete_organization(&self, organization_id: Uuid) -> PortResult<()> {
        let result = sqlx::query("DELETE FROM organizations WHERE id = $1")
            .bind(organization_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        not_found_unless_affected(result.rows_affected(), || {
            format!("Organization {} not found", organization_id)
        })
    }

    async fn set_parsing_connection(
        &self,
        organization_id: Uuid,
        connection: Option<&ParsingConnection>,
    ) -> PortResult<Organization> {
        let record = sqlx::query_as::<_, OrganizationRecord>(&format!(
            "UPDATE organizations AS o SET parsing_project_id = $2, parsing_project_name = $3, \
             parsing_connected_at = $4, updated_at = NOW() WHERE o.id = $1 RETURNING {}",
            ORGANIZATION_COLUMNS
        ))
        .bind(organization_id)
        .bind(connection.map(|c| c.project_id.as_str()))
        .bind(connection.and_then(|c| c.project_name.as_deref()))
        .bind(connection.map(|c| c.connected_at))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error(e, || format!("Organization {} not found", organization_id)))?;
        Ok(record.to_domain())
    }

    // --- Membership ---

    async fn get_member_role(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> PortResult<Option<Role>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT role FROM organization_users WHERE organization_id = $1 AND user_id = $2",
        )
        .bind(organization_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        row.map(|(role,)| parse_role(&role)).transpose()
    }

    async fn list_members(&self, organization_id: Uuid) -> PortResult<Vec<Member>> {
        let records = sqlx::query_as::<_, MemberRecord>(&format!(
            "{} WHERE ou.organization_id = $1 ORDER BY ou.created_at ASC",
            MEMBER_SELECT
        ))
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        records.into_iter().map(MemberRecord::to_domain).collect()
    }

    async fn add_member(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        role: Role,
    ) -> PortResult<Member> {
        sqlx::query(
            "INSERT INTO organization_users (organization_id, user_id, role) VALUES ($1, $2, $3)",
        )
        .bind(organization_id)
        .bind(user_id)
        .bind(role.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| db_error(e, || "Organization or user not found".to_string()))?;

        self.fetch_member(organization_id, user_id).await
    }

    async fn update_member_role(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        role: Role,
    ) -> PortResult<Member> {
        let mut tx = self.begin().await?;
        let members = lock_members(&mut tx, organization_id).await?;
        if !members.iter().any(|(id, _)| *id == user_id) {
            return Err(PortError::NotFound(format!("Member {} not found", user_id)));
        }
        ensure_owner_remains(&members, user_id, Some(role))?;

        sqlx::query(
            "UPDATE organization_users SET role = $3 WHERE organization_id = $1 AND user_id = $2",
        )
        .bind(organization_id)
        .bind(user_id)
        .bind(role.as_str())
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;
        tx.commit().await.map_err(unexpected)?;

        self.fetch_member(organization_id, user_id).await
    }

    async fn remove_member(&self, organization_id: Uuid, user_id: Uuid) -> PortResult<()> {
        let mut tx = self.begin().await?;
        let members = lock_members(&mut tx, organization_id).await?;
        if !members.iter().any(|(id, _)| *id == user_id) {
            return Err(PortError::NotFound(format!("Member {} not found", user_id)));
        }
        ensure_owner_remains(&members, user_id, None)?;

        sqlx::query("DELETE FROM organization_users WHERE organization_id = $1 AND user_id = $2")
            .bind(organization_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        tx.commit().await.map_err(unexpected)?;
        Ok(())
    }

    // --- Projects ---

    async fn create_project(
        &self,
        organization_id: Uuid,
        name: &str,
        description: Option<&str>,
    ) -> PortResult<Project> {
        let record = sqlx::query_as::<_, ProjectRecord>(&format!(
            "INSERT INTO projects (id, organization_id, name, description) VALUES ($1, $2, $3, $4) \
             RETURNING {}",
            PROJECT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(organization_id)
        .bind(name)
        .bind(description)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error(e, || format!("Organization {} not found", organization_id)))?;
        Ok(record.to_domain())
    }

    async fn get_project(&self, project_id: Uuid) -> PortResult<Project> {
        let record = sqlx::query_as::<_, ProjectRecord>(&format!(
            "SELECT {} FROM projects WHERE id = $1",
            PROJECT_COLUMNS
        ))
        .bind(project_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error(e, || format!("Project {} not found", project_id)))?;
        Ok(record.to_domain())
    }

    async fn list_projects(&self, organization_id: Uuid) -> PortResult<Vec<Project>> {
        let records = sqlx::query_as::<_, ProjectRecord>(&format!(
            "SELECT {} FROM projects WHERE organization_id = $1 ORDER BY created_at DESC",
            PROJECT_COLUMNS
        ))
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(ProjectRecord::to_domain).collect())
    }

    async fn update_project(
        &self,
        project_id: Uuid,
        changes: &ProjectChanges,
    ) -> PortResult<Project> {
        let record = sqlx::query_as::<_, ProjectRecord>(&format!(
            "UPDATE projects SET name = COALESCE($2, name), \
             description = CASE WHEN $3 THEN $4 ELSE description END, updated_at = NOW() \
             WHERE id = $1 RETURNING {}",
            PROJECT_COLUMNS
        ))
        .bind(project_id)
        .bind(&changes.name)
        .bind(changes.description.is_some())
        .bind(changes.description.clone().flatten())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error(e, || format!("Project {} not found", project_id)))?;
        Ok(record.to_domain())
    }

    async fn delete_project(&self, project_id: Uuid) -> PortResult<()> {
        let result = sqlx::query("DELETE FROM projects WHERE id = $1")
            .bind(project_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        not_found_unless_affected(result.rows_affected(), || {
            format!("Project {} not found", project_id)
        })
    }

    // --- Knowledge Bases ---

    async fn create_knowledge_base(
        &self,
        organization_id: Uuid,
        name: &str,
        description: Option<&str>,
    ) -> PortResult<KnowledgeBase> {
        let record = sqlx::query_as::<_, KnowledgeBaseRecord>(&format!(
            "INSERT INTO knowledge_bases (id, organization_id, name, description) \
             VALUES ($1, $2, $3, $4) RETURNING {}",
            KNOWLEDGE_BASE_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(organization_id)
        .bind(name)
        .bind(description)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error(e, || format!("Organization {} not found", organization_id)))?;
        Ok(record.to_domain())
    }

    async fn get_knowledge_base(&self, knowledge_base_id: Uuid) -> PortResult<KnowledgeBase> {
        let record = sqlx::query_as::<_, KnowledgeBaseRecord>(&format!(
            "SELECT {} FROM knowledge_bases WHERE id = $1",
            KNOWLEDGE_BASE_COLUMNS
        ))
        .bind(knowledge_base_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error(e, || format!("Knowledge base {} not found", knowledge_base_id)))?;
        Ok(record.to_domain())
    }

    async fn list_knowledge_bases(&self, organization_id: Uuid) -> PortResult<Vec<KnowledgeBase>> {
        let records = sqlx::query_as::<_, KnowledgeBaseRecord>(&format!(
            "SELECT {} FROM knowledge_bases WHERE organization_id = $1 ORDER BY created_at ASC",
            KNOWLEDGE_BASE_COLUMNS
        ))
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(KnowledgeBaseRecord::to_domain).collect())
    }

    async fn update_knowledge_base(
        &self,
        knowledge_base_id: Uuid,
        changes: &KnowledgeBaseChanges,
    ) -> PortResult<KnowledgeBase> {
        let record = sqlx::query_as::<_, KnowledgeBaseRecord>(&format!(
            "UPDATE knowledge_bases SET name = COALESCE($2, name), \
             description = CASE WHEN $3 THEN $4 ELSE description END, updated_at = NOW() \
             WHERE id = $1 RETURNING {}",
            KNOWLEDGE_BASE_COLUMNS
        ))
        .bind(knowledge_base_id)
        .bind(&changes.name)
        .bind(changes.description.is_some())
        .bind(changes.description.clone().flatten())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error(e, || format!("Knowledge base {} not found", knowledge_base_id)))?;
        Ok(record.to_domain())
    }

    async fn delete_knowledge_base(&self, knowledge_base_id: Uuid) -> PortResult<()> {
        let result = sqlx::query("DELETE FROM knowledge_bases WHERE id = $1")
            .bind(knowledge_base_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        not_found_unless_affected(result.rows_affected(), || {
            format!("Knowledge base {} not found", knowledge_base_id)
        })
    }

    async fn list_knowledge_base_questions(
        &self,
        knowledge_base_id: Uuid,
    ) -> PortResult<Vec<KnowledgeBaseQuestion>> {
        let records = sqlx::query_as::<_, KnowledgeBaseQuestionRecord>(&format!(
            "{} WHERE q.knowledge_base_id = $1 ORDER BY q.created_at ASC",
            KB_QUESTION_SELECT
        ))
        .bind(knowledge_base_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records
            .into_iter()
            .map(KnowledgeBaseQuestionRecord::to_domain)
            .collect())
    }

    async fn get_knowledge_base_question(
        &self,
        question_id: Uuid,
    ) -> PortResult<KnowledgeBaseQuestion> {
        let record = sqlx::query_as::<_, KnowledgeBaseQuestionRecord>(&format!(
            "{} WHERE q.id = $1",
            KB_QUESTION_SELECT
        ))
        .bind(question_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error(e, || format!("Question {} not found", question_id)))?;
        Ok(record.to_domain())
    }

    async fn create_knowledge_base_question(
        &self,
        knowledge_base_id: Uuid,
        question: &NewKnowledgeBaseQuestion,
    ) -> PortResult<KnowledgeBaseQuestion> {
        let mut tx = self.begin().await?;
        let question_id = Uuid::new_v4();

        sqlx::query(
            "INSERT INTO knowledge_base_questions (id, knowledge_base_id, text, topic, tags) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(question_id)
        .bind(knowledge_base_id)
        .bind(&question.text)
        .bind(&question.topic)
        .bind(&question.tags)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error(e, || format!("Knowledge base {} not found", knowledge_base_id)))?;

        if let Some(answer) = &question.answer {
            set_knowledge_base_answer(&mut tx, question_id, answer).await?;
        }

        tx.commit().await.map_err(unexpected)?;
        self.get_knowledge_base_question(question_id).await
    }

    async fn update_knowledge_base_question(
        &self,
        question_id: Uuid,
        changes: &KnowledgeBaseQuestionChanges,
    ) -> PortResult<KnowledgeBaseQuestion> {
        let mut tx = self.begin().await?;

        let result = sqlx::query(
            "UPDATE knowledge_base_questions SET text = COALESCE($2, text), \
             topic = CASE WHEN $3 THEN $4 ELSE topic END, tags = COALESCE($5, tags), \
             updated_at = NOW() WHERE id = $1",
        )
        .bind(question_id)
        .bind(&changes.text)
        .bind(changes.topic.is_some())
        .bind(changes.topic.clone().flatten())
        .bind(&changes.tags)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;
        not_found_unless_affected(result.rows_affected(), || {
            format!("Question {} not found", question_id)
        })?;

        match &changes.answer {
            AnswerChange::Keep => {}
            AnswerChange::Set(text) => set_knowledge_base_answer(&mut tx, question_id, text).await?,
            AnswerChange::Clear => {
                sqlx::query("DELETE FROM knowledge_base_answers WHERE question_id = $1")
                    .bind(question_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(unexpected)?;
            }
        }

        tx.commit().await.map_err(unexpected)?;
        self.get_knowledge_base_question(question_id).await
    }

    async fn delete_knowledge_base_question(&self, question_id: Uuid) -> PortResult<()> {
        let mut tx = self.begin().await?;

        sqlx::query("DELETE FROM knowledge_base_answers WHERE question_id = $1")
            .bind(question_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        let result = sqlx::query("DELETE FROM knowledge_base_questions WHERE id = $1")
            .bind(question_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        not_found_unless_affected(result.rows_affected(), || {
            format!("Question {} not found", question_id)
        })?;

        tx.commit().await.map_err(unexpected)?;
        Ok(())
    }

    // --- Documents ---

    async fn create_document(
        &self,
        project_id: Uuid,
        file_name: &str,
        content: &str,
        page_count: Option<u32>,
    ) -> PortResult<Document> {
        let record = sqlx::query_as::<_, DocumentRecord>(&format!(
            "INSERT INTO documents (id, project_id, file_name, content, page_count) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            DOCUMENT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(project_id)
        .bind(file_name)
        .bind(content)
        .bind(page_count.and_then(|n| i32::try_from(n).ok()))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error(e, || format!("Project {} not found", project_id)))?;
        Ok(record.to_domain())
    }

    async fn get_document(&self, document_id: Uuid) -> PortResult<Document> {
        let record = sqlx::query_as::<_, DocumentRecord>(&format!(
            "SELECT {} FROM documents WHERE id = $1",
            DOCUMENT_COLUMNS
        ))
        .bind(document_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error(e, || format!("Document {} not found", document_id)))?;
        Ok(record.to_domain())
    }

    async fn list_documents(&self, project_id: Uuid) -> PortResult<Vec<Document>> {
        let records = sqlx::query_as::<_, DocumentRecord>(&format!(
            "SELECT {} FROM documents WHERE project_id = $1 ORDER BY created_at ASC",
            DOCUMENT_COLUMNS
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(DocumentRecord::to_domain).collect())
    }

    // --- Project Questions & Answers ---

    async fn save_extracted_questions(
        &self,
        project_id: Uuid,
        questionnaire: &ExtractedQuestionnaire,
    ) -> PortResult<Vec<Question>> {
        let mut tx = self.begin().await?;
        let mut ids = Vec::with_capacity(questionnaire.question_count());

        let questions = questionnaire
            .sections
            .iter()
            .flat_map(|section| section.questions.iter().map(move |q| (section, q)))
            .collect::<Vec<_>>();

        for (position, (section, extracted)) in questions.into_iter().enumerate() {
            let (id,): (Uuid,) = sqlx::query_as(
                "INSERT INTO questions (id, project_id, reference_id, text, topic, section_id, position) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7) \
                 ON CONFLICT (project_id, reference_id) DO UPDATE SET text = EXCLUDED.text, \
                 topic = EXCLUDED.topic, section_id = EXCLUDED.section_id, position = EXCLUDED.position \
                 RETURNING id",
            )
            .bind(Uuid::new_v4())
            .bind(project_id)
            .bind(extracted.id.trim())
            .bind(&extracted.text)
            .bind(&section.title)
            .bind(&section.id)
            .bind(i32::try_from(position).unwrap_or(i32::MAX))
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| db_error(e, || format!("Project {} not found", project_id)))?;

            if let Some(text) = extracted.answer.as_deref().filter(|t| !t.trim().is_empty()) {
                let draft = AnswerDraft {
                    text: text.to_string(),
                    ..Default::default()
                };
                upsert_answer_in(&mut tx, id, &draft).await?;
            }
            ids.push(id);
        }

        tx.commit().await.map_err(unexpected)?;

        let records = sqlx::query_as::<_, QuestionRecord>(&format!(
            "{} WHERE q.id = ANY($1) ORDER BY q.position ASC",
            QUESTION_SELECT
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(QuestionRecord::to_domain).collect())
    }

    async fn list_questions(&self, project_id: Uuid) -> PortResult<Vec<Question>> {
        let records = sqlx::query_as::<_, QuestionRecord>(&format!(
            "{} WHERE q.project_id = $1 ORDER BY q.position ASC, q.created_at ASC",
            QUESTION_SELECT
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(QuestionRecord::to_domain).collect())
    }

    async fn get_question(&self, question_id: Uuid) -> PortResult<Question> {
        let record = sqlx::query_as::<_, QuestionRecord>(&format!(
            "{} WHERE q.id = $1",
            QUESTION_SELECT
        ))
        .bind(question_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error(e, || format!("Question {} not found", question_id)))?;
        Ok(record.to_domain())
    }

    async fn upsert_answer(&self, question_id: Uuid, answer: &AnswerDraft) -> PortResult<Answer> {
        let mut tx = self.begin().await?;
        let saved = upsert_answer_in(&mut tx, question_id, answer).await?;
        tx.commit().await.map_err(unexpected)?;
        Ok(saved)
    }

    async fn delete_question(&self, question_id: Uuid) -> PortResult<()> {
        let result = sqlx::query("DELETE FROM questions WHERE id = $1")
            .bind(question_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        not_found_unless_affected(result.rows_affected(), || {
            format!("Question {} not found", question_id)
        })
    }
}

impl DbAdapter {
    async fn fetch_member(&self, organization_id: Uuid, user_id: Uuid) -> PortResult<Member> {
        let record = sqlx::query_as::<_, MemberRecord>(&format!(
            "{} WHERE ou.organization_id = $1 AND ou.user_id = $2",
            MEMBER_SELECT
        ))
        .bind(organization_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error(e, || format!("Member {} not found", user_id)))?;
        record.to_domain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_not_found_maps_to_not_found() {
        let err = db_error(sqlx::Error::RowNotFound, || "Project 1 not found".to_string());
        assert_eq!(err, PortError::NotFound("Project 1 not found".to_string()));
    }

    #[test]
    fn other_errors_are_unexpected() {
        let err = db_error(sqlx::Error::PoolTimedOut, || unreachable!());
        assert!(matches!(err, PortError::Unexpected(_)));
    }

    #[test]
    fn stored_roles_round_trip() {
        for role in [Role::Member, Role::Admin, Role::Owner] {
            assert_eq!(parse_role(role.as_str()).unwrap(), role);
        }
        assert!(matches!(parse_role("guest"), Err(PortError::Unexpected(_))));
    }

    #[test]
    fn parsing_connection_requires_project_and_timestamp() {
        let now = Utc::now();
        let record = |project_id: Option<&str>, connected_at: Option<DateTime<Utc>>| {
            OrganizationRecord {
                id: Uuid::new_v4(),
                name: "Acme".to_string(),
                slug: "acme".to_string(),
                description: None,
                parsing_project_id: project_id.map(str::to_string),
                parsing_project_name: Some("RFPs".to_string()),
                parsing_connected_at: connected_at,
                created_at: now,
                updated_at: now,
            }
        };

        let connected = record(Some("proj_1"), Some(now)).to_domain();
        assert_eq!(connected.parsing.unwrap().project_id, "proj_1");
        assert!(record(None, Some(now)).to_domain().parsing.is_none());
    }
}
