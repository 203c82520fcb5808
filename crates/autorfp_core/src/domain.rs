//! crates/autorfp_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or HTTP framework.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

//=========================================================================================
// Users
//=========================================================================================

/// Represents a user - used throughout app.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

// Only used internally for login/signup - contains sensitive data
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user_id: Uuid,
    pub email: String,
    pub hashed_password: String,
}

//=========================================================================================
// Tenancy
//=========================================================================================

/// The role a user holds inside one organization.
///
/// Variants are declared from least to most privileged so that the derived
/// ordering matches the capability tiers: `Member < Admin < Owner`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Member,
    Admin,
    Owner,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Member => "member",
            Role::Admin => "admin",
            Role::Owner => "owner",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "member" => Ok(Role::Member),
            "admin" => Ok(Role::Admin),
            "owner" => Ok(Role::Owner),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// Identifiers of the document-parsing project an organization is connected to.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsingConnection {
    pub project_id: String,
    pub project_name: Option<String>,
    pub connected_at: DateTime<Utc>,
}

/// The tenant root. Owns projects, knowledge bases and members.
#[derive(Debug, Clone, PartialEq)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub parsing: Option<ParsingConnection>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An organization as seen by one of its members.
#[derive(Debug, Clone)]
pub struct OrganizationMembership {
    pub organization: Organization,
    pub role: Role,
}

/// A row of the organization's member list.
#[derive(Debug, Clone)]
pub struct Member {
    pub organization_id: Uuid,
    pub user: User,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewOrganization {
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
}

/// A partial update. `None` leaves a field untouched; for nullable columns the
/// inner `Option` distinguishes "clear" from "set".
#[derive(Debug, Clone, Default)]
pub struct OrganizationChanges {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub description: Option<Option<String>>,
}

//=========================================================================================
// Projects and documents
//=========================================================================================

/// A unit of RFP work within an organization.
#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct ProjectChanges {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
}

/// A parsed RFP document stored against a project.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: Uuid,
    pub project_id: Uuid,
    pub file_name: String,
    pub content: String,
    pub page_count: Option<u32>,
    pub created_at: DateTime<Utc>,
}

//=========================================================================================
// Project questions and answers
//=========================================================================================

/// A question extracted from an RFP, scoped to a project.
#[derive(Debug, Clone, PartialEq)]
pub struct Question {
    pub id: Uuid,
    pub project_id: Uuid,
    /// Stable identifier assigned during extraction (e.g. `q1_3`).
    pub reference_id: String,
    pub text: String,
    pub topic: Option<String>,
    pub section_id: Option<String>,
    pub answer: Option<Answer>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub question_id: Uuid,
    pub text: String,
    pub confidence: Option<f32>,
    pub sources: Vec<Source>,
    pub updated_at: DateTime<Utc>,
}

/// A citation attached to a generated answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub file_name: String,
    #[serde(default)]
    pub page_number: Option<u32>,
    #[serde(default)]
    pub relevance: Option<f32>,
    #[serde(default)]
    pub excerpt: Option<String>,
}

/// The values written when an answer is created or replaced.
#[derive(Debug, Clone, Default)]
pub struct AnswerDraft {
    pub text: String,
    pub confidence: Option<f32>,
    pub sources: Vec<Source>,
}

//=========================================================================================
// Knowledge bases
//=========================================================================================

/// An organization-scoped repository of reusable question/answer pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeBase {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct KnowledgeBaseChanges {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeBaseQuestion {
    pub id: Uuid,
    pub knowledge_base_id: Uuid,
    pub text: String,
    pub topic: Option<String>,
    pub tags: Vec<String>,
    pub answer: Option<KnowledgeBaseAnswer>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeBaseAnswer {
    pub text: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewKnowledgeBaseQuestion {
    pub text: String,
    pub topic: Option<String>,
    pub tags: Vec<String>,
    pub answer: Option<String>,
}

/// What to do with a knowledge-base answer when its question is updated.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum AnswerChange {
    /// Leave the current answer (or its absence) as it is.
    #[default]
    Keep,
    /// Create the answer, or replace the existing one.
    Set(String),
    /// Delete the answer if there is one.
    Clear,
}

#[derive(Debug, Clone, Default)]
pub struct KnowledgeBaseQuestionChanges {
    pub text: Option<String>,
    pub topic: Option<Option<String>>,
    pub tags: Option<Vec<String>>,
    pub answer: AnswerChange,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_are_ordered_by_privilege() {
        assert!(Role::Member < Role::Admin);
        assert!(Role::Admin < Role::Owner);
        assert_eq!(Role::Owner.max(Role::Member), Role::Owner);
    }

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!("OWNER".parse::<Role>().unwrap(), Role::Owner);
        assert_eq!(" admin ".parse::<Role>().unwrap(), Role::Admin);
        assert!("superuser".parse::<Role>().is_err());
    }
}
