//! Role-based authorization policy.
//!
//! `authorize` is a pure `(role, action) -> bool` table. Ownership-scoped
//! actions take the actor and owner ids so the owner-or-admin rule lives here
//! too, not in the handlers.

use uuid::Uuid;

use crate::error::{Result, WorkflowError};
use crate::models::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Submit a photo to the PPE detection pipeline.
    SubmitDetection,
    /// Create a clock-in without the detection gate.
    CreateDirectClockin,
    EndClockin,
    ModifyClockinHours,
    CreateProject,
    UpdateProject,
    DeleteProject,
    RecordLocation,
    ViewAllHistory,
    ViewAllSummary,
    ViewAllLocations,
}

pub fn authorize(role: Role, action: Action) -> bool {
    use Action::*;
    match (role, action) {
        (Role::Admin, SubmitDetection) => false,
        (Role::Admin, _) => true,

        (Role::Field, SubmitDetection) => true,
        (Role::Field, CreateDirectClockin) => false,
        (Role::Office, SubmitDetection) => false,
        (Role::Office, CreateDirectClockin) => true,

        (_, EndClockin | ModifyClockinHours | RecordLocation) => true,
        (_, CreateProject | UpdateProject) => true,
        (_, DeleteProject | ViewAllHistory | ViewAllSummary | ViewAllLocations) => false,
    }
}

/// `authorize` as a `Result`, for use with `?`.
pub fn ensure(role: Role, action: Action) -> Result<()> {
    if authorize(role, action) {
        Ok(())
    } else {
        Err(WorkflowError::Forbidden(format!(
            "role '{}' may not perform {:?}",
            role.as_str(),
            action
        )))
    }
}

/// Owner-or-admin rule for per-record actions (delete clock-in, correct history).
pub fn ensure_owner_or_admin(role: Role, actor: Uuid, owner: Uuid) -> Result<()> {
    if role == Role::Admin || actor == owner {
        Ok(())
    } else {
        Err(WorkflowError::Forbidden("not the owner of this record".into()))
    }
}

/// The authenticated caller of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: Uuid, role: Role) -> Self {
        Actor { user_id, role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn ensure(&self, action: Action) -> Result<()> {
        ensure(self.role, action)
    }

    pub fn ensure_owns(&self, owner: Uuid) -> Result<()> {
        ensure_owner_or_admin(self.role, self.user_id, owner)
    }

    /// `None` for admins (see everything), otherwise the actor's own id.
    pub fn scope(&self) -> Option<Uuid> {
        if self.is_admin() {
            None
        } else {
            Some(self.user_id)
        }
    }
}
