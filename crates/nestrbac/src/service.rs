use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;

use nestrbac_core::engine::{AccessError, CheckRequest, Granted};
use nestrbac_core::node::{EntityRef, Hierarchy, NodeId, UserId};
use nestrbac_core::path::PathLimits;
use nestrbac_storage::postgres::migrations;
use nestrbac_storage::{InMemoryStore, PostgresStore, SnapshotStore, StorageError, verify_tree};

use crate::adapter;
use crate::audit;
use crate::config::RbacConfig;
use crate::error::RbacError;
use crate::hierarchy::{HierarchyManager, Permissions, Roles};
use crate::users::UserManager;

/// Entry point tying both hierarchies, both assignment relations and the
/// evaluator to one storage handle.
pub struct Rbac<S: SnapshotStore> {
    store: Arc<S>,
    limits: PathLimits,
    roles: Roles<S>,
    permissions: Permissions<S>,
    users: UserManager<S>,
}

impl Rbac<InMemoryStore> {
    pub fn in_memory(limits: PathLimits) -> Self {
        Self::new(Arc::new(InMemoryStore::new()), limits)
    }
}

impl Rbac<PostgresStore> {
    /// Connects, bootstraps the relations and seeds them. Any failure leaves
    /// no instance behind.
    pub async fn open_postgres(config: &RbacConfig) -> Result<Self, RbacError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .connect(&config.database.url)
            .await
            .map_err(|e| StorageError::Internal(format!("failed to connect: {e}")))?;

        migrations::bootstrap(&pool, &config.database.schema).await?;
        let store = PostgresStore::new(pool, &config.database.schema)?;

        tracing::info!(schema = %config.database.schema, "postgres store ready");
        Ok(Self::new(Arc::new(store), config.path_limits()))
    }
}

impl<S: SnapshotStore> Rbac<S> {
    pub fn new(store: Arc<S>, limits: PathLimits) -> Self {
        Self {
            roles: HierarchyManager::new(Arc::clone(&store), limits),
            permissions: HierarchyManager::new(Arc::clone(&store), limits),
            users: UserManager::new(Arc::clone(&store), limits),
            store,
            limits,
        }
    }

    pub fn roles(&self) -> &Roles<S> {
        &self.roles
    }

    pub fn permissions(&self) -> &Permissions<S> {
        &self.permissions
    }

    pub fn users(&self) -> &UserManager<S> {
        &self.users
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// False when either reference does not resolve, the pair already
    /// exists, or a resolved id names no node.
    pub async fn assign(&self, role: &EntityRef, permission: &EntityRef) -> Result<bool, RbacError> {
        let Some((role, permission)) = self.resolve_pair(role, permission).await? else {
            return Ok(false);
        };

        let assigned = self.store.assign_permission(role, permission).await?;
        audit::audit_permission_assignment(role, permission, true, assigned);
        Ok(assigned)
    }

    pub async fn unassign(
        &self,
        role: &EntityRef,
        permission: &EntityRef,
    ) -> Result<bool, RbacError> {
        let Some((role, permission)) = self.resolve_pair(role, permission).await? else {
            return Ok(false);
        };

        let removed = self.store.unassign_permission(role, permission).await?;
        audit::audit_permission_assignment(role, permission, false, removed);
        Ok(removed)
    }

    async fn resolve_pair(
        &self,
        role: &EntityRef,
        permission: &EntityRef,
    ) -> Result<Option<(NodeId, NodeId)>, RbacError> {
        let role = self.roles.resolve(role).await?;
        let permission = self.permissions.resolve(permission).await?;
        Ok(role.zip(permission))
    }

    /// Clears every role permission assignment and reseeds root on root.
    pub async fn reset_assignments(&self, confirm: bool) -> Result<u64, RbacError> {
        if !confirm {
            return Err(RbacError::ConfirmationRequired("role_permissions"));
        }

        let removed = self.store.reset_permission_assignments().await?;
        audit::audit_reset("role_permissions", removed);
        Ok(removed)
    }

    pub async fn check(
        &self,
        permission: impl Into<EntityRef>,
        user: Option<UserId>,
    ) -> Result<bool, RbacError> {
        let request = CheckRequest::new(permission, user);
        let evaluator = adapter::evaluator(&*self.store, self.limits).await?;
        let allowed = evaluator.check(&request).await?;

        if let Some(user) = request.user {
            audit::audit_check(&request.permission, user, allowed);
        }
        Ok(allowed)
    }

    /// Like `check`, but a denial comes back as `AccessError::Denied`.
    pub async fn enforce(
        &self,
        permission: impl Into<EntityRef>,
        user: Option<UserId>,
    ) -> Result<Granted, RbacError> {
        let request = CheckRequest::new(permission, user);
        let evaluator = adapter::evaluator(&*self.store, self.limits).await?;

        evaluator.enforce(&request).await.map_err(|e| {
            if let AccessError::Denied { user, .. } = &e {
                audit::audit_denied(&request.permission, *user);
            }
            e.into()
        })
    }

    pub async fn has_permission(
        &self,
        role: NodeId,
        permission: NodeId,
    ) -> Result<bool, RbacError> {
        self.roles.has_permission(role, permission).await
    }

    /// Resets both trees and both assignment relations back to the seed state.
    pub async fn reset(&self, confirm: bool) -> Result<(), RbacError> {
        if !confirm {
            return Err(RbacError::ConfirmationRequired("everything"));
        }

        self.roles.reset(true).await?;
        self.permissions.reset(true).await?;
        self.reset_assignments(true).await?;
        self.users.reset_assignments(true).await?;
        Ok(())
    }

    /// Node counts of the role and permission trees once both pass the
    /// structural invariant check.
    pub async fn verify(&self) -> Result<(usize, usize), RbacError> {
        let snapshot = self.store.snapshot().await?;
        let roles = verify_tree(&snapshot, Hierarchy::Roles).await?;
        let permissions = verify_tree(&snapshot, Hierarchy::Permissions).await?;
        Ok((roles, permissions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nestrbac_core::node::{ROOT_ID, ROOT_USER};

    const USER: UserId = UserId::new(7);

    fn rbac() -> Rbac<InMemoryStore> {
        Rbac::in_memory(PathLimits::default())
    }

    #[tokio::test]
    async fn root_user_holds_everything_after_seed() {
        let rbac = rbac();
        rbac.permissions().add_path("/x/y", &[]).await.unwrap();

        assert!(rbac.check("/x/y", Some(ROOT_USER)).await.unwrap());
        assert!(rbac.check(ROOT_ID, Some(ROOT_USER)).await.unwrap());
    }

    #[tokio::test]
    async fn check_requires_user() {
        let rbac = rbac();

        let result = rbac.check("/", None).await;

        assert!(matches!(
            result,
            Err(RbacError::Access(AccessError::UserRequired))
        ));
    }

    #[tokio::test]
    async fn check_unknown_permission_rejected() {
        let rbac = rbac();

        let by_title = rbac.check("ghost", Some(USER)).await;
        let by_path = rbac.check("/ghost", Some(USER)).await;

        assert!(matches!(
            by_title,
            Err(RbacError::Access(AccessError::PermissionNotFound(ref p))) if p == "ghost"
        ));
        assert!(matches!(
            by_path,
            Err(RbacError::Access(AccessError::PermissionNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn unknown_numeric_permission_is_false() {
        let rbac = rbac();

        assert!(!rbac.check(NodeId::new(99), Some(ROOT_USER)).await.unwrap());
    }

    #[tokio::test]
    async fn assign_resolves_references() {
        let rbac = rbac();
        rbac.roles().add_path("/editor", &[]).await.unwrap();
        rbac.permissions().add_path("/posts/write", &[]).await.unwrap();

        let assigned = rbac
            .assign(&EntityRef::parse("editor"), &EntityRef::parse("/posts"))
            .await
            .unwrap();
        let again = rbac
            .assign(&EntityRef::parse("/editor"), &EntityRef::parse("posts"))
            .await
            .unwrap();
        let unresolved = rbac
            .assign(&EntityRef::parse("ghost"), &EntityRef::parse("/posts"))
            .await
            .unwrap();

        assert!(assigned);
        assert!(!again);
        assert!(!unresolved);
    }

    #[tokio::test]
    async fn unassign_revokes_grant() {
        let rbac = rbac();
        let editor = rbac.roles().add("editor", "", None).await.unwrap();
        let posts = rbac.permissions().add("posts", "", None).await.unwrap();
        rbac.assign(&editor.into(), &posts.into()).await.unwrap();
        rbac.users().assign(editor, USER).await.unwrap();
        assert!(rbac.check(posts, Some(USER)).await.unwrap());

        assert!(rbac.unassign(&editor.into(), &posts.into()).await.unwrap());

        assert!(!rbac.check(posts, Some(USER)).await.unwrap());
        assert!(!rbac.unassign(&editor.into(), &posts.into()).await.unwrap());
    }

    #[tokio::test]
    async fn enforce_returns_typed_denial() {
        let rbac = rbac();
        rbac.permissions().add_path("/x", &[]).await.unwrap();

        let granted = rbac.enforce("/x", Some(ROOT_USER)).await;
        let denied = rbac.enforce("/x", Some(USER)).await;

        assert!(matches!(granted, Ok(Granted)));
        assert!(matches!(
            denied,
            Err(RbacError::Access(AccessError::Denied { ref permission, user }))
                if permission == "/x" && user == USER
        ));
    }

    #[tokio::test]
    async fn reset_assignments_requires_confirmation() {
        let rbac = rbac();
        let a = rbac.roles().add("a", "", None).await.unwrap();
        rbac.assign(&a.into(), &ROOT_ID.into()).await.unwrap();

        let refused = rbac.reset_assignments(false).await;
        let removed = rbac.reset_assignments(true).await.unwrap();

        assert!(matches!(refused, Err(RbacError::ConfirmationRequired(_))));
        assert_eq!(removed, 2);
        assert_eq!(rbac.roles().permissions(ROOT_ID).await.unwrap(), vec![ROOT_ID]);
        assert!(rbac.roles().permissions(a).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn full_reset_restores_seed_state() {
        let rbac = rbac();
        rbac.roles().add_path("/a/b", &[]).await.unwrap();
        rbac.permissions().add_path("/x", &[]).await.unwrap();
        rbac.users()
            .assign(NodeId::new(2), USER)
            .await
            .unwrap();

        assert!(matches!(
            rbac.reset(false).await,
            Err(RbacError::ConfirmationRequired(_))
        ));
        rbac.reset(true).await.unwrap();

        assert_eq!(rbac.verify().await.unwrap(), (1, 1));
        assert_eq!(rbac.users().role_count(USER).await.unwrap(), 0);
        assert!(rbac.check(ROOT_ID, Some(ROOT_USER)).await.unwrap());
    }

    #[tokio::test]
    async fn root_user_keeps_access_after_role_reset() {
        let rbac = rbac();
        rbac.permissions().add_path("/x", &[]).await.unwrap();
        rbac.roles().add_path("/a", &[]).await.unwrap();

        rbac.roles().reset(true).await.unwrap();

        assert!(rbac.check("/", Some(ROOT_USER)).await.unwrap());
        assert!(rbac.check("/x", Some(ROOT_USER)).await.unwrap());
    }

    #[tokio::test]
    async fn verify_counts_both_trees() {
        let rbac = rbac();
        rbac.roles().add_path("/a/b/c", &[]).await.unwrap();
        rbac.permissions().add_path("/x", &[]).await.unwrap();

        assert_eq!(rbac.verify().await.unwrap(), (4, 2));
    }
}
