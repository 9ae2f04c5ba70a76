use std::sync::Arc;

use nestrbac_core::node::{EntityRef, Hierarchy, Node, NodeId, Selector, UserId};
use nestrbac_core::path::PathLimits;
use nestrbac_storage::SnapshotStore;

use crate::adapter;
use crate::audit;
use crate::error::RbacError;
use crate::lookup;

/// User to role assignments. Users are opaque external ids with no tree.
pub struct UserManager<S> {
    store: Arc<S>,
    limits: PathLimits,
}

impl<S: SnapshotStore> UserManager<S> {
    pub fn new(store: Arc<S>, limits: PathLimits) -> Self {
        Self { store, limits }
    }

    /// False when the role reference does not resolve, the pair already
    /// exists, or the role does not.
    pub async fn assign(
        &self,
        role: impl Into<EntityRef>,
        user: UserId,
    ) -> Result<bool, RbacError> {
        let Some(role) = self.resolve_role(&role.into()).await? else {
            return Ok(false);
        };

        let assigned = self.store.assign_user(user, role).await?;
        audit::audit_user_assignment(user, role, true, assigned);
        Ok(assigned)
    }

    pub async fn unassign(
        &self,
        role: impl Into<EntityRef>,
        user: UserId,
    ) -> Result<bool, RbacError> {
        let Some(role) = self.resolve_role(&role.into()).await? else {
            return Ok(false);
        };

        let removed = self.store.unassign_user(user, role).await?;
        audit::audit_user_assignment(user, role, false, removed);
        Ok(removed)
    }

    async fn resolve_role(&self, role: &EntityRef) -> Result<Option<NodeId>, RbacError> {
        lookup::resolve(&*self.store, Hierarchy::Roles, self.limits, role).await
    }

    /// True when `role` is one of the user's roles or lies below one of them.
    pub async fn has_role(&self, role: &EntityRef, user: UserId) -> Result<bool, RbacError> {
        let evaluator = adapter::evaluator(&*self.store, self.limits).await?;
        Ok(evaluator.has_role(role, user).await?)
    }

    /// Directly assigned roles; `None` when the user holds none.
    pub async fn all_roles(&self, user: UserId) -> Result<Option<Vec<Node>>, RbacError> {
        let rows = self.store.roles_of_user(user).await?;

        let mut roles = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(node) = self
                .store
                .get(Hierarchy::Roles, &Selector::ById(row.role_id))
                .await?
            {
                roles.push(node);
            }
        }

        if roles.is_empty() {
            return Ok(None);
        }
        Ok(Some(roles))
    }

    pub async fn role_count(&self, user: UserId) -> Result<usize, RbacError> {
        Ok(self.store.roles_of_user(user).await?.len())
    }

    /// Clears every user assignment and reseeds the root user on the root role.
    pub async fn reset_assignments(&self, confirm: bool) -> Result<u64, RbacError> {
        if !confirm {
            return Err(RbacError::ConfirmationRequired("user_roles"));
        }

        let removed = self.store.reset_user_assignments().await?;
        audit::audit_reset("user_roles", removed);
        Ok(removed)
    }
}
