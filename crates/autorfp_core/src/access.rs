//! crates/autorfp_core/src/access.rs
//!
//! The role/capability policy shared by every organization-scoped operation.

use tracing::debug;
use uuid::Uuid;

use crate::domain::Role;
use crate::ports::{DatabaseService, PortError, PortResult};

/// Something an actor wants to do inside an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Read organization data, members, projects, knowledge bases and questions.
    View,
    /// Create projects and edit their content: documents, questions, answers, knowledge bases.
    EditContent,
    /// Add users to the organization.
    InviteMembers,
    /// Change roles of, or remove, non-owner members.
    ManageMembers,
    /// Update the organization, update/delete projects, delete knowledge bases.
    ManageOrganization,
    DeleteOrganization,
    /// Promote to owner, or modify/remove an existing owner.
    GrantOwnership,
}

impl Capability {
    /// The least privileged role that holds this capability.
    pub fn minimum_role(self) -> Role {
        match self {
            Capability::View | Capability::EditContent => Role::Member,
            Capability::InviteMembers
            | Capability::ManageMembers
            | Capability::ManageOrganization => Role::Admin,
            Capability::DeleteOrganization | Capability::GrantOwnership => Role::Owner,
        }
    }
}

impl Role {
    pub fn allows(self, capability: Capability) -> bool {
        self >= capability.minimum_role()
    }
}

/// Resolves the actor's role in `organization_id` and checks it against `capability`.
///
/// A missing organization is `NotFound`; a non-member or an insufficient role is
/// `Forbidden`.
pub async fn authorize(
    db: &dyn DatabaseService,
    actor: Uuid,
    organization_id: Uuid,
    capability: Capability,
) -> PortResult<Role> {
    db.get_organization(organization_id).await?;

    let role = db
        .get_member_role(organization_id, actor)
        .await?
        .ok_or_else(|| {
            PortError::Forbidden("You are not a member of this organization".to_string())
        })?;

    if !role.allows(capability) {
        debug!(%actor, %organization_id, ?capability, %role, "access denied");
        return Err(PortError::Forbidden(format!(
            "This action requires the {} role",
            capability.minimum_role()
        )));
    }

    Ok(role)
}

/// Checks that setting `target` to `new_role` (or removing it when `None`) leaves
/// the organization with at least one owner.
///
/// `members` is the organization's current membership. Database adapters call this
/// while holding a lock on those rows, in the transaction that performs the write.
pub fn ensure_owner_remains(
    members: &[(Uuid, Role)],
    target: Uuid,
    new_role: Option<Role>,
) -> PortResult<()> {
    let remaining_owners = members
        .iter()
        .filter(|(user_id, role)| {
            let role = if *user_id == target { new_role } else { Some(*role) };
            role == Some(Role::Owner)
        })
        .count();

    if remaining_owners == 0 {
        return Err(PortError::Conflict(
            "An organization must keep at least one owner".to_string(),
        ));
    }
    Ok(())
}
