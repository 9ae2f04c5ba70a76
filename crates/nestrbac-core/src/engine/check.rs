use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use crate::node::{EntityRef, Hierarchy, NodeId, UserId};

use super::{AccessError, GrantReader};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRequest {
    pub permission: EntityRef,
    pub user: Option<UserId>,
}

impl CheckRequest {
    pub fn new(permission: impl Into<EntityRef>, user: impl Into<Option<UserId>>) -> Self {
        Self {
            permission: permission.into(),
            user: user.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Granted;

/// Role closure walks down the role tree; permission matching walks up the
/// permission tree. A role holds every permission granted to its descendants,
/// and a permission is implied by any of its ancestors.
pub struct AccessEvaluator<R: GrantReader> {
    reader: Arc<R>,
}

impl<R: GrantReader> AccessEvaluator<R> {
    pub fn new(reader: Arc<R>) -> Self {
        Self { reader }
    }

    pub async fn check(&self, request: &CheckRequest) -> Result<bool, AccessError> {
        let user = request.user.ok_or(AccessError::UserRequired)?;
        let permission = self.resolve_permission(&request.permission).await?;

        let direct = self.reader.direct_roles(user).await?;
        self.evaluate(&direct, permission).await
    }

    pub async fn has_permission(
        &self,
        role: NodeId,
        permission: NodeId,
    ) -> Result<bool, AccessError> {
        self.evaluate(&[role], permission).await
    }

    pub async fn enforce(&self, request: &CheckRequest) -> Result<Granted, AccessError> {
        if self.check(request).await? {
            return Ok(Granted);
        }

        Err(AccessError::Denied {
            permission: request.permission.to_string(),
            user: request.user.ok_or(AccessError::UserRequired)?,
        })
    }

    /// True when `role` lies in the closure of the user's direct roles.
    pub async fn has_role(&self, role: &EntityRef, user: UserId) -> Result<bool, AccessError> {
        let role_id = self
            .reader
            .resolve(Hierarchy::Roles, role)
            .await?
            .ok_or_else(|| AccessError::RoleNotFound(role.to_string()))?;

        let direct = self.reader.direct_roles(user).await?;
        let closure = self.role_closure(&direct).await?;

        Ok(closure.contains(&role_id))
    }

    async fn resolve_permission(&self, permission: &EntityRef) -> Result<NodeId, AccessError> {
        self.reader
            .resolve(Hierarchy::Permissions, permission)
            .await?
            .ok_or_else(|| AccessError::PermissionNotFound(permission.to_string()))
    }

    async fn evaluate(&self, direct: &[NodeId], permission: NodeId) -> Result<bool, AccessError> {
        if direct.is_empty() {
            return Ok(false);
        }

        let path = self
            .reader
            .ancestors(Hierarchy::Permissions, permission)
            .await?;
        if path.is_empty() {
            return Ok(false);
        }

        let closure: Vec<NodeId> = self.role_closure(direct).await?.into_iter().collect();
        if closure.is_empty() {
            return Ok(false);
        }

        let granted: HashSet<NodeId> = self
            .reader
            .granted_permissions(&closure)
            .await?
            .into_iter()
            .collect();

        Ok(path.iter().any(|p| granted.contains(p)))
    }

    async fn role_closure(&self, direct: &[NodeId]) -> Result<BTreeSet<NodeId>, AccessError> {
        let mut closure = BTreeSet::new();
        for role in direct {
            if closure.contains(role) {
                continue;
            }
            closure.extend(self.reader.subtree(Hierarchy::Roles, *role).await?);
        }
        Ok(closure)
    }
}
