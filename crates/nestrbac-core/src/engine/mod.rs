mod check;

pub use check::{AccessEvaluator, CheckRequest, Granted};

use std::future::Future;

use crate::node::{EntityRef, Hierarchy, NodeId, UserId};
use crate::path::PathError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    #[error("a user id is required")]
    UserRequired,

    #[error("permission not found: {0}")]
    PermissionNotFound(String),

    #[error("role not found: {0}")]
    RoleNotFound(String),

    #[error("user {user} does not hold permission '{permission}'")]
    Denied { permission: String, user: UserId },

    #[error(transparent)]
    Path(#[from] PathError),

    #[error("backend does not support {0}")]
    UnsupportedBackend(String),

    #[error("storage error: {0}")]
    StorageError(String),
}

/// Read access to one consistent snapshot of both trees and both assignment relations.
pub trait GrantReader: Send + Sync {
    fn resolve(
        &self,
        hierarchy: Hierarchy,
        entity: &EntityRef,
    ) -> impl Future<Output = Result<Option<NodeId>, AccessError>> + Send;

    fn direct_roles(
        &self,
        user: UserId,
    ) -> impl Future<Output = Result<Vec<NodeId>, AccessError>> + Send;

    /// The node and all of its descendants; empty for an unknown node.
    fn subtree(
        &self,
        hierarchy: Hierarchy,
        id: NodeId,
    ) -> impl Future<Output = Result<Vec<NodeId>, AccessError>> + Send;

    /// Root-to-node path, node included; empty for an unknown node.
    fn ancestors(
        &self,
        hierarchy: Hierarchy,
        id: NodeId,
    ) -> impl Future<Output = Result<Vec<NodeId>, AccessError>> + Send;

    fn granted_permissions(
        &self,
        roles: &[NodeId],
    ) -> impl Future<Output = Result<Vec<NodeId>, AccessError>> + Send;
}
