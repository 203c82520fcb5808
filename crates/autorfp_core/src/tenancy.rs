//! crates/autorfp_core/src/tenancy.rs
//!
//! Organization, membership and project use cases. Each function authorizes the
//! acting user before touching the database port.

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::access::{authorize, Capability};
use crate::domain::{
    Member, NewOrganization, Organization, OrganizationChanges, OrganizationMembership,
    ParsingConnection, Project, ProjectChanges, Role,
};
use crate::ports::{DatabaseService, PortError, PortResult};

pub const MAX_SLUG_LEN: usize = 64;

/// Derives a URL slug from a display name: lowercase ASCII alphanumerics separated
/// by single dashes.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    slug.chars().take(MAX_SLUG_LEN).collect::<String>().trim_end_matches('-').to_string()
}

pub fn validate_slug(slug: &str) -> PortResult<()> {
    let well_formed = !slug.is_empty()
        && slug.len() <= MAX_SLUG_LEN
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !well_formed {
        return Err(PortError::Validation(format!(
            "Slug '{}' must be 1-{} lowercase letters, digits or dashes",
            slug, MAX_SLUG_LEN
        )));
    }
    Ok(())
}

//=========================================================================================
// Organizations
//=========================================================================================

pub async fn create_organization(
    db: &dyn DatabaseService,
    actor: Uuid,
    name: &str,
    slug: Option<&str>,
    description: Option<&str>,
) -> PortResult<Organization> {
    let slug = match slug {
        Some(slug) => slug.trim().to_string(),
        None => slugify(name),
    };
    validate_slug(&slug)?;

    let organization = db
        .create_organization(
            actor,
            &NewOrganization {
                name: name.trim().to_string(),
                slug,
                description: description.map(str::to_string),
            },
        )
        .await?;

    info!(organization_id = %organization.id, slug = %organization.slug, "organization created");
    Ok(organization)
}

pub async fn list_organizations(
    db: &dyn DatabaseService,
    actor: Uuid,
) -> PortResult<Vec<OrganizationMembership>> {
    db.list_organizations_for_user(actor).await
}

pub async fn get_organization(
    db: &dyn DatabaseService,
    actor: Uuid,
    organization_id: Uuid,
) -> PortResult<OrganizationMembership> {
    let role = authorize(db, actor, organization_id, Capability::View).await?;
    let organization = db.get_organization(organization_id).await?;
    Ok(OrganizationMembership { organization, role })
}

pub async fn update_organization(
    db: &dyn DatabaseService,
    actor: Uuid,
    organization_id: Uuid,
    changes: OrganizationChanges,
) -> PortResult<Organization> {
    authorize(db, actor, organization_id, Capability::ManageOrganization).await?;
    if let Some(slug) = &changes.slug {
        validate_slug(slug)?;
    }
    db.update_organization(organization_id, &changes).await
}

pub async fn delete_organization(
    db: &dyn DatabaseService,
    actor: Uuid,
    organization_id: Uuid,
) -> PortResult<()> {
    authorize(db, actor, organization_id, Capability::DeleteOrganization).await?;
    db.delete_organization(organization_id).await?;
    info!(%organization_id, %actor, "organization deleted");
    Ok(())
}

/// Stores the identifiers of the document-parsing project used for uploads.
pub async fn connect_parsing_service(
    db: &dyn DatabaseService,
    actor: Uuid,
    organization_id: Uuid,
    project_id: &str,
    project_name: Option<&str>,
) -> PortResult<Organization> {
    authorize(db, actor, organization_id, Capability::ManageOrganization).await?;
    let connection = ParsingConnection {
        project_id: project_id.trim().to_string(),
        project_name: project_name.map(str::to_string),
        connected_at: Utc::now(),
    };
    db.set_parsing_connection(organization_id, Some(&connection))
        .await
}

pub async fn disconnect_parsing_service(
    db: &dyn DatabaseService,
    actor: Uuid,
    organization_id: Uuid,
) -> PortResult<Organization> {
    authorize(db, actor, organization_id, Capability::ManageOrganization).await?;
    db.set_parsing_connection(organization_id, None).await
}

//=========================================================================================
// Membership
//=========================================================================================

pub async fn list_members(
    db: &dyn DatabaseService,
    actor: Uuid,
    organization_id: Uuid,
) -> PortResult<Vec<Member>> {
    authorize(db, actor, organization_id, Capability::View).await?;
    db.list_members(organization_id).await
}

/// Adds an existing user, looked up by email, to the organization.
pub async fn add_member(
    db: &dyn DatabaseService,
    actor: Uuid,
    organization_id: Uuid,
    email: &str,
    role: Role,
) -> PortResult<Member> {
    let actor_role = authorize(db, actor, organization_id, Capability::InviteMembers).await?;
    if role == Role::Owner && !actor_role.allows(Capability::GrantOwnership) {
        return Err(PortError::Forbidden(
            "Only owners can grant the owner role".to_string(),
        ));
    }

    let user = db.get_user_by_email(email.trim()).await.map_err(|e| match e {
        PortError::NotFound(_) => PortError::NotFound(format!("No user with email {}", email)),
        other => other,
    })?;

    if db.get_member_role(organization_id, user.user_id).await?.is_some() {
        return Err(PortError::Conflict(format!(
            "{} is already a member of this organization",
            email
        )));
    }

    db.add_member(organization_id, user.user_id, role).await
}

pub async fn update_member_role(
    db: &dyn DatabaseService,
    actor: Uuid,
    organization_id: Uuid,
    target: Uuid,
    new_role: Role,
) -> PortResult<Member> {
    let actor_role = authorize(db, actor, organization_id, Capability::View).await?;
    let current_role = target_role(db, organization_id, target).await?;

    let self_demotion = actor == target && new_role <= current_role;
    let required = if new_role == Role::Owner || current_role == Role::Owner {
        Capability::GrantOwnership
    } else if self_demotion {
        Capability::View
    } else {
        Capability::ManageMembers
    };
    require(actor_role, required)?;

    let member = db
        .update_member_role(organization_id, target, new_role)
        .await?;
    info!(%organization_id, %target, from = %current_role, to = %new_role, "member role changed");
    Ok(member)
}

/// Removes `target` from the organization. Any member may remove themselves.
pub async fn remove_member(
    db: &dyn DatabaseService,
    actor: Uuid,
    organization_id: Uuid,
    target: Uuid,
) -> PortResult<()> {
    let actor_role = authorize(db, actor, organization_id, Capability::View).await?;
    let current_role = target_role(db, organization_id, target).await?;

    let required = if actor == target {
        Capability::View
    } else if current_role == Role::Owner {
        Capability::GrantOwnership
    } else {
        Capability::ManageMembers
    };
    require(actor_role, required)?;

    db.remove_member(organization_id, target).await?;
    info!(%organization_id, %target, "member removed");
    Ok(())
}

async fn target_role(db: &dyn DatabaseService, organization_id: Uuid, target: Uuid) -> PortResult<Role> {
    db.get_member_role(organization_id, target)
        .await?
        .ok_or_else(|| PortError::NotFound(format!("User {} is not a member", target)))
}

fn require(role: Role, capability: Capability) -> PortResult<()> {
    if role.allows(capability) {
        Ok(())
    } else {
        Err(PortError::Forbidden(format!(
            "This action requires the {} role",
            capability.minimum_role()
        )))
    }
}

//=========================================================================================
// Projects
//=========================================================================================

pub async fn create_project(
    db: &dyn DatabaseService,
    actor: Uuid,
    organization_id: Uuid,
    name: &str,
    description: Option<&str>,
) -> PortResult<Project> {
    authorize(db, actor, organization_id, Capability::EditContent).await?;
    db.create_project(organization_id, name.trim(), description)
        .await
}

pub async fn list_projects(
    db: &dyn DatabaseService,
    actor: Uuid,
    organization_id: Uuid,
) -> PortResult<Vec<Project>> {
    authorize(db, actor, organization_id, Capability::View).await?;
    db.list_projects(organization_id).await
}

pub async fn get_project(db: &dyn DatabaseService, actor: Uuid, project_id: Uuid) -> PortResult<Project> {
    let project = db.get_project(project_id).await?;
    authorize(db, actor, project.organization_id, Capability::View).await?;
    Ok(project)
}

pub async fn update_project(
    db: &dyn DatabaseService,
    actor: Uuid,
    project_id: Uuid,
    changes: ProjectChanges,
) -> PortResult<Project> {
    let project = db.get_project(project_id).await?;
    authorize(db, actor, project.organization_id, Capability::ManageOrganization).await?;
    db.update_project(project_id, &changes).await
}

pub async fn delete_project(db: &dyn DatabaseService, actor: Uuid, project_id: Uuid) -> PortResult<()> {
    let project = db.get_project(project_id).await?;
    authorize(db, actor, project.organization_id, Capability::ManageOrganization).await?;
    db.delete_project(project_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryDatabase;

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("Acme Corp."), "acme-corp");
        assert_eq!(slugify("  Hello -- World  "), "hello-world");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn slug_validation() {
        assert!(validate_slug("acme-2024").is_ok());
        assert!(validate_slug("Acme").is_err());
        assert!(validate_slug("-acme").is_err());
        assert!(validate_slug("").is_err());
        assert!(validate_slug(&"a".repeat(MAX_SLUG_LEN + 1)).is_err());
    }

    #[tokio::test]
    async fn creator_becomes_owner() {
        let db = InMemoryDatabase::new();
        let user = db.seed_user("founder@example.com").await;

        let org = create_organization(&db, user, "Acme Corp", None, None)
            .await
            .unwrap();

        assert_eq!(org.slug, "acme-corp");
        assert_eq!(db.get_member_role(org.id, user).await.unwrap(), Some(Role::Owner));
    }

    #[tokio::test]
    async fn duplicate_slug_conflicts() {
        let db = InMemoryDatabase::new();
        let user = db.seed_user("founder@example.com").await;
        create_organization(&db, user, "Acme", None, None).await.unwrap();

        let second = create_organization(&db, user, "ACME", None, None).await;
        assert!(matches!(second, Err(PortError::Conflict(_))));
    }

    #[tokio::test]
    async fn sole_owner_can_neither_leave_nor_be_demoted() {
        let db = InMemoryDatabase::new();
        let owner = db.seed_user("owner@example.com").await;
        let org = create_organization(&db, owner, "Solo", None, None).await.unwrap();
        let before = db.list_members(org.id).await.unwrap();

        let removed = remove_member(&db, owner, org.id, owner).await;
        assert!(matches!(removed, Err(PortError::Conflict(_))));

        let demoted = update_member_role(&db, owner, org.id, owner, Role::Member).await;
        assert!(matches!(demoted, Err(PortError::Conflict(_))));

        let after = db.list_members(org.id).await.unwrap();
        assert_eq!(before.len(), after.len());
        assert_eq!(after[0].role, Role::Owner);
    }

    #[tokio::test]
    async fn only_owners_promote_to_owner() {
        let db = InMemoryDatabase::new();
        let owner = db.seed_user("owner@example.com").await;
        let admin = db.seed_user("admin@example.com").await;
        let member = db.seed_user("member@example.com").await;
        let org = create_organization(&db, owner, "Acme", None, None).await.unwrap();
        add_member(&db, owner, org.id, "admin@example.com", Role::Admin).await.unwrap();
        add_member(&db, owner, org.id, "member@example.com", Role::Member).await.unwrap();

        let by_admin = update_member_role(&db, admin, org.id, member, Role::Owner).await;
        assert!(matches!(by_admin, Err(PortError::Forbidden(_))));
        let self_promotion = update_member_role(&db, admin, org.id, admin, Role::Owner).await;
        assert!(matches!(self_promotion, Err(PortError::Forbidden(_))));

        let by_owner = update_member_role(&db, owner, org.id, member, Role::Owner).await.unwrap();
        assert_eq!(by_owner.role, Role::Owner);
    }

    #[tokio::test]
    async fn admins_manage_members_but_not_owners() {
        let db = InMemoryDatabase::new();
        let owner = db.seed_user("owner@example.com").await;
        let admin = db.seed_user("admin@example.com").await;
        let member = db.seed_user("member@example.com").await;
        let org = create_organization(&db, owner, "Acme", None, None).await.unwrap();
        add_member(&db, owner, org.id, "admin@example.com", Role::Admin).await.unwrap();
        add_member(&db, admin, org.id, "member@example.com", Role::Member).await.unwrap();

        assert!(matches!(
            remove_member(&db, admin, org.id, owner).await,
            Err(PortError::Forbidden(_))
        ));
        assert!(matches!(
            update_member_role(&db, admin, org.id, owner, Role::Member).await,
            Err(PortError::Forbidden(_))
        ));
        assert!(matches!(
            remove_member(&db, member, org.id, admin).await,
            Err(PortError::Forbidden(_))
        ));

        remove_member(&db, admin, org.id, member).await.unwrap();
        assert_eq!(db.get_member_role(org.id, member).await.unwrap(), None);
    }

    #[tokio::test]
    async fn member_can_leave() {
        let db = InMemoryDatabase::new();
        let owner = db.seed_user("owner@example.com").await;
        let member = db.seed_user("member@example.com").await;
        let org = create_organization(&db, owner, "Acme", None, None).await.unwrap();
        add_member(&db, owner, org.id, "member@example.com", Role::Member).await.unwrap();

        remove_member(&db, member, org.id, member).await.unwrap();
        assert_eq!(db.list_members(org.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn owner_can_step_down_when_another_owner_exists() {
        let db = InMemoryDatabase::new();
        let first = db.seed_user("first@example.com").await;
        let second = db.seed_user("second@example.com").await;
        let org = create_organization(&db, first, "Acme", None, None).await.unwrap();
        add_member(&db, first, org.id, "second@example.com", Role::Owner).await.unwrap();

        let demoted = update_member_role(&db, first, org.id, first, Role::Admin).await.unwrap();
        assert_eq!(demoted.role, Role::Admin);
        assert!(matches!(
            remove_member(&db, second, org.id, second).await,
            Err(PortError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn adding_existing_member_conflicts() {
        let db = InMemoryDatabase::new();
        let owner = db.seed_user("owner@example.com").await;
        db.seed_user("member@example.com").await;
        let org = create_organization(&db, owner, "Acme", None, None).await.unwrap();
        add_member(&db, owner, org.id, "member@example.com", Role::Member).await.unwrap();

        let again = add_member(&db, owner, org.id, "member@example.com", Role::Admin).await;
        assert!(matches!(again, Err(PortError::Conflict(_))));
        let unknown = add_member(&db, owner, org.id, "ghost@example.com", Role::Member).await;
        assert!(matches!(unknown, Err(PortError::NotFound(_))));
    }

    #[tokio::test]
    async fn outsiders_are_forbidden_everywhere() {
        let db = InMemoryDatabase::new();
        let owner = db.seed_user("owner@example.com").await;
        let outsider = db.seed_user("outsider@example.com").await;
        let org = create_organization(&db, owner, "Acme", None, None).await.unwrap();
        let project = create_project(&db, owner, org.id, "RFP 1", None).await.unwrap();

        let forbidden = |r: PortResult<()>| matches!(r, Err(PortError::Forbidden(_)));
        assert!(forbidden(get_organization(&db, outsider, org.id).await.map(|_| ())));
        assert!(forbidden(list_members(&db, outsider, org.id).await.map(|_| ())));
        assert!(forbidden(list_projects(&db, outsider, org.id).await.map(|_| ())));
        assert!(forbidden(get_project(&db, outsider, project.id).await.map(|_| ())));
        assert!(forbidden(
            update_organization(&db, outsider, org.id, OrganizationChanges::default())
                .await
                .map(|_| ())
        ));
        assert!(forbidden(delete_organization(&db, outsider, org.id).await));
        assert!(forbidden(
            create_project(&db, outsider, org.id, "Sneaky", None).await.map(|_| ())
        ));
        assert!(list_organizations(&db, outsider).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn project_in_missing_organization_is_not_found() {
        let db = InMemoryDatabase::new();
        let user = db.seed_user("user@example.com").await;
        let missing = Uuid::new_v4();

        let result = create_project(&db, user, missing, "Orphan", None).await;
        assert!(matches!(result, Err(PortError::NotFound(_))));
        assert_eq!(db.project_count(), 0);
    }

    #[tokio::test]
    async fn only_owner_deletes_organization() {
        let db = InMemoryDatabase::new();
        let owner = db.seed_user("owner@example.com").await;
        let admin = db.seed_user("admin@example.com").await;
        let org = create_organization(&db, owner, "Acme", None, None).await.unwrap();
        add_member(&db, owner, org.id, "admin@example.com", Role::Admin).await.unwrap();

        assert!(matches!(
            delete_organization(&db, admin, org.id).await,
            Err(PortError::Forbidden(_))
        ));
        delete_organization(&db, owner, org.id).await.unwrap();
        assert!(matches!(
            db.get_organization(org.id).await,
            Err(PortError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn parsing_connection_round_trip() {
        let db = InMemoryDatabase::new();
        let owner = db.seed_user("owner@example.com").await;
        let org = create_organization(&db, owner, "Acme", None, None).await.unwrap();

        let connected = connect_parsing_service(&db, owner, org.id, "proj_123", Some("RFPs"))
            .await
            .unwrap();
        assert_eq!(connected.parsing.unwrap().project_id, "proj_123");

        let disconnected = disconnect_parsing_service(&db, owner, org.id).await.unwrap();
        assert!(disconnected.parsing.is_none());
    }
}
