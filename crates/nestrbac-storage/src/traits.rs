use std::future::Future;

use nestrbac_core::nested::Corruption;
use nestrbac_core::node::{
    DepthMode, DepthNode, Hierarchy, Node, NodeData, NodeEdit, NodeId, RolePermission, Selector,
    UserId, UserRole,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("{hierarchy} has no node with {selector}")]
    NodeNotFound {
        hierarchy: Hierarchy,
        selector: Selector,
    },

    #[error("the root of {0} cannot have a sibling")]
    SiblingOfRoot(Hierarchy),

    #[error("path of {length} bytes exceeds the backend aggregation limit of {limit}")]
    PathTooLong { length: usize, limit: usize },

    #[error("backend does not support {0}")]
    UnsupportedBackend(String),

    #[error("structural corruption in {hierarchy}: {source}")]
    StructuralCorruption {
        hierarchy: Hierarchy,
        source: Corruption,
    },

    #[error("internal storage error: {0}")]
    Internal(String),
}

/// What the backend can do for root-to-node title reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCapabilities {
    pub ordered_aggregation: bool,
    pub max_aggregate_length: Option<usize>,
}

impl Default for BackendCapabilities {
    fn default() -> Self {
        Self {
            ordered_aggregation: true,
            max_aggregate_length: None,
        }
    }
}

pub trait TreeReader: Send + Sync {
    fn get(
        &self,
        hierarchy: Hierarchy,
        selector: &Selector,
    ) -> impl Future<Output = Result<Option<Node>, StorageError>> + Send;

    fn count(&self, hierarchy: Hierarchy) -> impl Future<Output = Result<u64, StorageError>> + Send;

    /// `None` both when the node is unknown and when it has no children.
    fn children(
        &self,
        hierarchy: Hierarchy,
        selector: &Selector,
    ) -> impl Future<Output = Result<Option<Vec<Node>>, StorageError>> + Send;

    fn descendants(
        &self,
        hierarchy: Hierarchy,
        selector: &Selector,
        mode: DepthMode,
    ) -> impl Future<Output = Result<Vec<DepthNode>, StorageError>> + Send;

    /// Root first, node last; empty for an unknown node.
    fn path(
        &self,
        hierarchy: Hierarchy,
        selector: &Selector,
    ) -> impl Future<Output = Result<Vec<Node>, StorageError>> + Send;

    fn leaves(
        &self,
        hierarchy: Hierarchy,
        under: Option<&Selector>,
    ) -> impl Future<Output = Result<Vec<Node>, StorageError>> + Send;

    fn full_tree(
        &self,
        hierarchy: Hierarchy,
    ) -> impl Future<Output = Result<Vec<DepthNode>, StorageError>> + Send;

    /// Lowest id whose title is `leaf_title` and whose root-first ancestor
    /// titles, joined by `/`, equal `key`.
    fn find_by_path(
        &self,
        hierarchy: Hierarchy,
        key: &str,
        leaf_title: &str,
    ) -> impl Future<Output = Result<Option<NodeId>, StorageError>> + Send;

    fn capabilities(&self) -> BackendCapabilities;
}

/// Structural mutations. Each call is one atomic unit and never interleaves
/// with another structural mutation of the same tree.
pub trait TreeStore: TreeReader {
    fn insert_child(
        &self,
        hierarchy: Hierarchy,
        parent: &Selector,
        data: &NodeData,
    ) -> impl Future<Output = Result<NodeId, StorageError>> + Send;

    fn insert_sibling(
        &self,
        hierarchy: Hierarchy,
        after: &Selector,
        data: &NodeData,
    ) -> impl Future<Output = Result<NodeId, StorageError>> + Send;

    /// Removes one node, promoting its children, along with the assignments
    /// that reference it. Returns 0 or 1.
    fn delete(
        &self,
        hierarchy: Hierarchy,
        selector: &Selector,
    ) -> impl Future<Output = Result<u64, StorageError>> + Send;

    /// Removes a node with all of its descendants and their assignments.
    fn delete_subtree(
        &self,
        hierarchy: Hierarchy,
        selector: &Selector,
    ) -> impl Future<Output = Result<u64, StorageError>> + Send;

    fn update(
        &self,
        hierarchy: Hierarchy,
        selector: &Selector,
        edit: &NodeEdit,
    ) -> impl Future<Output = Result<u64, StorageError>> + Send;

    /// Deletes every node, reseeds the root and restarts id generation after it.
    fn reset(&self, hierarchy: Hierarchy) -> impl Future<Output = Result<u64, StorageError>> + Send;
}

pub trait AssignmentReader: Send + Sync {
    fn permissions_of(
        &self,
        role: NodeId,
    ) -> impl Future<Output = Result<Vec<RolePermission>, StorageError>> + Send;

    fn roles_of(
        &self,
        permission: NodeId,
    ) -> impl Future<Output = Result<Vec<RolePermission>, StorageError>> + Send;

    /// Distinct permissions assigned to any of `roles`.
    fn permissions_of_any(
        &self,
        roles: &[NodeId],
    ) -> impl Future<Output = Result<Vec<NodeId>, StorageError>> + Send;

    fn roles_of_user(
        &self,
        user: UserId,
    ) -> impl Future<Output = Result<Vec<UserRole>, StorageError>> + Send;
}

pub trait AssignmentStore: AssignmentReader {
    /// False when the pair already exists or either node does not exist.
    fn assign_permission(
        &self,
        role: NodeId,
        permission: NodeId,
    ) -> impl Future<Output = Result<bool, StorageError>> + Send;

    fn unassign_permission(
        &self,
        role: NodeId,
        permission: NodeId,
    ) -> impl Future<Output = Result<bool, StorageError>> + Send;

    fn unassign_all_permissions(
        &self,
        role: NodeId,
    ) -> impl Future<Output = Result<u64, StorageError>> + Send;

    fn unassign_all_roles(
        &self,
        permission: NodeId,
    ) -> impl Future<Output = Result<u64, StorageError>> + Send;

    fn reset_permission_assignments(
        &self,
    ) -> impl Future<Output = Result<u64, StorageError>> + Send;

    /// False when the pair already exists or the role does not exist.
    fn assign_user(
        &self,
        user: UserId,
        role: NodeId,
    ) -> impl Future<Output = Result<bool, StorageError>> + Send;

    fn unassign_user(
        &self,
        user: UserId,
        role: NodeId,
    ) -> impl Future<Output = Result<bool, StorageError>> + Send;

    fn unassign_all_users(
        &self,
        role: NodeId,
    ) -> impl Future<Output = Result<u64, StorageError>> + Send;

    fn reset_user_assignments(&self) -> impl Future<Output = Result<u64, StorageError>> + Send;
}

/// A backend able to hand out a read view frozen at one point in time.
pub trait SnapshotStore: TreeStore + AssignmentStore {
    type Snapshot: TreeReader + AssignmentReader;

    fn snapshot(&self) -> impl Future<Output = Result<Self::Snapshot, StorageError>> + Send;
}
