use std::marker::PhantomData;
use std::sync::Arc;

use nestrbac_core::node::{
    DepthMode, DepthNode, EntityRef, Hierarchy, Node, NodeData, NodeEdit, NodeId, ROOT_ID,
    ROOT_TITLE, Selector,
};
use nestrbac_core::path::{self, HierarchyPath, PathLimits};
use nestrbac_storage::{SnapshotStore, StorageError};

use crate::adapter;
use crate::audit;
use crate::error::RbacError;
use crate::lookup;

/// Compile-time selection of the tree a manager operates on.
pub trait HierarchyKind: Send + Sync + 'static {
    const HIERARCHY: Hierarchy;

    fn not_found(entity: String) -> RbacError;
}

#[derive(Debug, Clone, Copy)]
pub struct RoleHierarchy;

#[derive(Debug, Clone, Copy)]
pub struct PermissionHierarchy;

impl HierarchyKind for RoleHierarchy {
    const HIERARCHY: Hierarchy = Hierarchy::Roles;

    fn not_found(entity: String) -> RbacError {
        RbacError::RoleNotFound(entity)
    }
}

impl HierarchyKind for PermissionHierarchy {
    const HIERARCHY: Hierarchy = Hierarchy::Permissions;

    fn not_found(entity: String) -> RbacError {
        RbacError::PermissionNotFound(entity)
    }
}

pub type Roles<S> = HierarchyManager<S, RoleHierarchy>;
pub type Permissions<S> = HierarchyManager<S, PermissionHierarchy>;

pub struct HierarchyManager<S, K> {
    store: Arc<S>,
    limits: PathLimits,
    kind: PhantomData<K>,
}

impl<S: SnapshotStore, K: HierarchyKind> HierarchyManager<S, K> {
    pub fn new(store: Arc<S>, limits: PathLimits) -> Self {
        Self {
            store,
            limits,
            kind: PhantomData,
        }
    }

    fn hierarchy(&self) -> Hierarchy {
        K::HIERARCHY
    }

    pub async fn resolve(&self, entity: &EntityRef) -> Result<Option<NodeId>, RbacError> {
        lookup::resolve(&*self.store, self.hierarchy(), self.limits, entity).await
    }

    /// Adds a node as the last child of `parent`, or of the root when `None`.
    pub async fn add(
        &self,
        title: &str,
        description: &str,
        parent: Option<NodeId>,
    ) -> Result<NodeId, RbacError> {
        let parent = parent.unwrap_or(ROOT_ID);
        let id = self
            .store
            .insert_child(
                self.hierarchy(),
                &Selector::ById(parent),
                &NodeData::new(title, description),
            )
            .await
            .map_err(|e| match e {
                StorageError::NodeNotFound { .. } => K::not_found(parent.to_string()),
                other => other.into(),
            })?;

        tracing::debug!(hierarchy = %self.hierarchy(), %id, %parent, title, "node added");
        Ok(id)
    }

    /// Creates every missing component of `path`, reusing existing prefixes.
    /// Returns how many nodes were created.
    pub async fn add_path(&self, path: &str, descriptions: &[&str]) -> Result<usize, RbacError> {
        let path = HierarchyPath::parse(path)?;

        let mut parent = ROOT_ID;
        let mut created = 0;
        for (idx, prefix) in path.prefixes().enumerate() {
            if let Some(existing) =
                lookup::path_id(&*self.store, self.hierarchy(), self.limits, &prefix).await?
            {
                parent = existing;
                continue;
            }

            let description = descriptions.get(idx).copied().unwrap_or_default();
            parent = self.add(prefix.leaf(), description, Some(parent)).await?;
            created += 1;
        }

        Ok(created)
    }

    pub async fn path_id(&self, path: &str) -> Result<Option<NodeId>, RbacError> {
        let path = HierarchyPath::parse(path)?;
        lookup::path_id(&*self.store, self.hierarchy(), self.limits, &path).await
    }

    pub async fn title_id(&self, title: &str) -> Result<Option<NodeId>, RbacError> {
        lookup::title_id(&*self.store, self.hierarchy(), title).await
    }

    pub async fn get(&self, id: NodeId) -> Result<Option<Node>, RbacError> {
        Ok(self.store.get(self.hierarchy(), &Selector::ById(id)).await?)
    }

    pub async fn title(&self, id: NodeId) -> Result<Option<String>, RbacError> {
        Ok(self.get(id).await?.map(|n| n.title))
    }

    pub async fn description(&self, id: NodeId) -> Result<Option<String>, RbacError> {
        Ok(self.get(id).await?.map(|n| n.description))
    }

    pub async fn count(&self) -> Result<u64, RbacError> {
        Ok(self.store.count(self.hierarchy()).await?)
    }

    pub async fn get_path(&self, id: NodeId) -> Result<Option<String>, RbacError> {
        let nodes = self.path(id).await?;
        if nodes.is_empty() {
            return Ok(None);
        }
        Ok(Some(path::render_titles(
            nodes.iter().map(|n| n.title.as_str()),
        )))
    }

    /// Root first, `id` last; empty when `id` is unknown.
    pub async fn path(&self, id: NodeId) -> Result<Vec<Node>, RbacError> {
        Ok(self.store.path(self.hierarchy(), &Selector::ById(id)).await?)
    }

    /// The root keeps its title; path lookups are keyed on it.
    pub async fn edit(&self, id: NodeId, edit: &NodeEdit) -> Result<bool, RbacError> {
        if edit.is_empty() {
            return Ok(false);
        }
        if id == ROOT_ID && edit.title.as_deref().is_some_and(|t| t != ROOT_TITLE) {
            return Err(RbacError::RootRetitle(self.hierarchy()));
        }
        let updated = self
            .store
            .update(self.hierarchy(), &Selector::ById(id), edit)
            .await?;
        Ok(updated > 0)
    }

    pub async fn children(&self, id: NodeId) -> Result<Option<Vec<Node>>, RbacError> {
        Ok(self
            .store
            .children(self.hierarchy(), &Selector::ById(id))
            .await?)
    }

    /// Proper descendants in `lft` order with depths relative to `id`.
    pub async fn descendants(&self, id: NodeId) -> Result<Vec<DepthNode>, RbacError> {
        Ok(self
            .store
            .descendants(self.hierarchy(), &Selector::ById(id), DepthMode::Relative)
            .await?)
    }

    /// Zero for the root, `-1` for an unknown node.
    pub async fn depth(&self, id: NodeId) -> Result<i64, RbacError> {
        let len = self.path(id).await?.len();
        Ok(i64::try_from(len).unwrap_or(i64::MAX) - 1)
    }

    pub async fn parent(&self, id: NodeId) -> Result<Option<Node>, RbacError> {
        let mut nodes = self.path(id).await?;
        if nodes.len() < 2 {
            return Ok(None);
        }
        nodes.pop();
        Ok(nodes.pop())
    }

    /// The sibling `distance` places away in child order; negative looks left.
    pub async fn sibling(&self, id: NodeId, distance: i64) -> Result<Option<Node>, RbacError> {
        let Some(parent) = self.parent(id).await? else {
            return Ok(None);
        };
        let siblings = self.children(parent.id).await?.unwrap_or_default();
        let Some(index) = siblings.iter().position(|n| n.id == id) else {
            return Ok(None);
        };

        let target = i64::try_from(index).unwrap_or(i64::MAX).saturating_add(distance);
        Ok(usize::try_from(target)
            .ok()
            .and_then(|t| siblings.get(t).cloned()))
    }

    pub async fn leaves(&self, under: Option<NodeId>) -> Result<Vec<Node>, RbacError> {
        let under = under.map(Selector::ById);
        Ok(self.store.leaves(self.hierarchy(), under.as_ref()).await?)
    }

    pub async fn full_tree(&self) -> Result<Vec<DepthNode>, RbacError> {
        Ok(self.store.full_tree(self.hierarchy()).await?)
    }

    /// Removes `id`, or its whole subtree when `recursive`. Assignments of
    /// every removed node go with it. Children of a non-recursive removal
    /// move up one level.
    pub async fn remove(&self, id: NodeId, recursive: bool) -> Result<u64, RbacError> {
        if id == ROOT_ID {
            return Err(RbacError::RootRemoval(self.hierarchy()));
        }

        let selector = Selector::ById(id);
        let removed = if recursive {
            self.store
                .delete_subtree(self.hierarchy(), &selector)
                .await?
        } else {
            self.store.delete(self.hierarchy(), &selector).await?
        };

        audit::audit_removal(self.hierarchy(), id, recursive, removed);
        Ok(removed)
    }

    /// Deletes every node and reseeds the root; ids continue after the root.
    pub async fn reset(&self, confirm: bool) -> Result<u64, RbacError> {
        if !confirm {
            return Err(RbacError::ConfirmationRequired(self.hierarchy().table()));
        }

        let removed = self.store.reset(self.hierarchy()).await?;
        audit::audit_reset(self.hierarchy().table(), removed);
        Ok(removed)
    }
}

impl<S: SnapshotStore> HierarchyManager<S, RoleHierarchy> {
    pub async fn permissions(&self, role: NodeId) -> Result<Vec<NodeId>, RbacError> {
        let rows = self.store.permissions_of(role).await?;
        Ok(rows.into_iter().map(|r| r.permission_id).collect())
    }

    pub async fn permission_nodes(&self, role: NodeId) -> Result<Vec<Node>, RbacError> {
        let mut nodes = Vec::new();
        for permission in self.permissions(role).await? {
            if let Some(node) = self
                .store
                .get(Hierarchy::Permissions, &Selector::ById(permission))
                .await?
            {
                nodes.push(node);
            }
        }
        Ok(nodes)
    }

    pub async fn unassign_permissions(&self, role: NodeId) -> Result<u64, RbacError> {
        Ok(self.store.unassign_all_permissions(role).await?)
    }

    pub async fn unassign_users(&self, role: NodeId) -> Result<u64, RbacError> {
        Ok(self.store.unassign_all_users(role).await?)
    }

    /// Same evaluation as a user check with `role` as the only direct role.
    pub async fn has_permission(
        &self,
        role: NodeId,
        permission: NodeId,
    ) -> Result<bool, RbacError> {
        let evaluator = adapter::evaluator(&*self.store, self.limits).await?;
        Ok(evaluator.has_permission(role, permission).await?)
    }
}

impl<S: SnapshotStore> HierarchyManager<S, PermissionHierarchy> {
    pub async fn roles(&self, permission: NodeId) -> Result<Vec<NodeId>, RbacError> {
        let rows = self.store.roles_of(permission).await?;
        Ok(rows.into_iter().map(|r| r.role_id).collect())
    }

    pub async fn role_nodes(&self, permission: NodeId) -> Result<Vec<Node>, RbacError> {
        let mut nodes = Vec::new();
        for role in self.roles(permission).await? {
            if let Some(node) = self
                .store
                .get(Hierarchy::Roles, &Selector::ById(role))
                .await?
            {
                nodes.push(node);
            }
        }
        Ok(nodes)
    }

    pub async fn unassign_roles(&self, permission: NodeId) -> Result<u64, RbacError> {
        Ok(self.store.unassign_all_roles(permission).await?)
    }
}
