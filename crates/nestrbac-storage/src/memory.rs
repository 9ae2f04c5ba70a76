use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;

use nestrbac_core::nested::{Interval, Shift};
use nestrbac_core::node::{
    DepthMode, DepthNode, Hierarchy, Node, NodeData, NodeEdit, NodeId, ROOT_ID, ROOT_TITLE,
    ROOT_USER, RolePermission, Selector, UserId, UserRole,
};
use nestrbac_core::path::SEPARATOR;

use crate::traits::{
    AssignmentReader, AssignmentStore, BackendCapabilities, SnapshotStore, StorageError,
    TreeReader, TreeStore,
};

fn root_node() -> Node {
    Node {
        id: ROOT_ID,
        lft: 0,
        rght: 1,
        title: ROOT_TITLE.to_string(),
        description: ROOT_TITLE.to_string(),
    }
}

/// Pairs each node, given in `lft` order, with its depth below the first node.
fn with_depths(sorted: &[&Node]) -> Vec<DepthNode> {
    let mut open: Vec<i64> = Vec::new();
    let mut result = Vec::with_capacity(sorted.len());
    for node in sorted {
        while open.last().is_some_and(|&rght| rght < node.lft) {
            open.pop();
        }
        result.push(DepthNode {
            node: (*node).clone(),
            depth: open.len(),
        });
        open.push(node.rght);
    }
    result
}

#[derive(Debug, Clone)]
struct Tree {
    nodes: Vec<Node>,
    next_id: i64,
}

impl Tree {
    fn seeded() -> Self {
        Self {
            nodes: vec![root_node()],
            next_id: ROOT_ID.value() + 1,
        }
    }

    fn find(&self, selector: &Selector) -> Option<&Node> {
        match selector {
            Selector::ById(id) => self.nodes.iter().find(|n| n.id == *id),
            Selector::ByTitle(title) => self
                .nodes
                .iter()
                .filter(|n| n.title == *title)
                .min_by_key(|n| n.id),
        }
    }

    fn sorted(&self) -> Vec<&Node> {
        let mut sorted: Vec<&Node> = self.nodes.iter().collect();
        sorted.sort_by_key(|n| n.lft);
        sorted
    }

    fn within(&self, bounds: Interval) -> Vec<&Node> {
        self.sorted()
            .into_iter()
            .filter(|n| bounds.contains(&n.interval()))
            .collect()
    }

    fn path(&self, target: &Node) -> Vec<Node> {
        let bounds = target.interval();
        self.sorted()
            .into_iter()
            .filter(|n| n.interval().contains(&bounds))
            .cloned()
            .collect()
    }

    fn descendants(&self, top: &Node, mode: DepthMode) -> Vec<DepthNode> {
        let offset = match mode {
            DepthMode::Relative => 0,
            DepthMode::Absolute => self.path(top).len() - 1,
        };
        with_depths(&self.within(top.interval()))
            .into_iter()
            .skip(1)
            .map(|mut d| {
                d.depth += offset;
                d
            })
            .collect()
    }

    fn shift(&mut self, shift: Shift) {
        for node in &mut self.nodes {
            shift.apply_to(node);
        }
    }

    fn insert(&mut self, slot: Interval, data: &NodeData) -> NodeId {
        let id = NodeId::new(self.next_id);
        self.next_id += 1;
        self.nodes.push(Node {
            id,
            lft: slot.lft,
            rght: slot.rght,
            title: data.title.clone(),
            description: data.description.clone(),
        });
        id
    }
}

#[derive(Debug, Clone)]
struct InnerState {
    roles: Tree,
    permissions: Tree,
    role_permissions: Vec<RolePermission>,
    user_roles: Vec<UserRole>,
    capabilities: BackendCapabilities,
}

impl InnerState {
    fn seeded(capabilities: BackendCapabilities) -> Self {
        let now = Utc::now();
        Self {
            roles: Tree::seeded(),
            permissions: Tree::seeded(),
            role_permissions: vec![RolePermission {
                role_id: ROOT_ID,
                permission_id: ROOT_ID,
                assigned_at: now,
            }],
            user_roles: vec![UserRole {
                user_id: ROOT_USER,
                role_id: ROOT_ID,
                assigned_at: now,
            }],
            capabilities,
        }
    }

    fn tree(&self, hierarchy: Hierarchy) -> &Tree {
        match hierarchy {
            Hierarchy::Roles => &self.roles,
            Hierarchy::Permissions => &self.permissions,
        }
    }

    fn tree_mut(&mut self, hierarchy: Hierarchy) -> &mut Tree {
        match hierarchy {
            Hierarchy::Roles => &mut self.roles,
            Hierarchy::Permissions => &mut self.permissions,
        }
    }

    fn drop_assignments(&mut self, hierarchy: Hierarchy, removed: &BTreeSet<NodeId>) {
        match hierarchy {
            Hierarchy::Roles => {
                self.role_permissions
                    .retain(|a| !removed.contains(&a.role_id));
                self.user_roles.retain(|a| !removed.contains(&a.role_id));
            }
            Hierarchy::Permissions => {
                self.role_permissions
                    .retain(|a| !removed.contains(&a.permission_id));
            }
        }
    }

    fn get(&self, hierarchy: Hierarchy, selector: &Selector) -> Option<Node> {
        self.tree(hierarchy).find(selector).cloned()
    }

    fn count(&self, hierarchy: Hierarchy) -> u64 {
        self.tree(hierarchy).nodes.len() as u64
    }

    fn children(&self, hierarchy: Hierarchy, selector: &Selector) -> Option<Vec<Node>> {
        let tree = self.tree(hierarchy);
        let top = tree.find(selector)?;
        let children: Vec<Node> = tree
            .descendants(top, DepthMode::Relative)
            .into_iter()
            .filter(|d| d.depth == 1)
            .map(|d| d.node)
            .collect();
        if children.is_empty() {
            None
        } else {
            Some(children)
        }
    }

    fn descendants(
        &self,
        hierarchy: Hierarchy,
        selector: &Selector,
        mode: DepthMode,
    ) -> Vec<DepthNode> {
        let tree = self.tree(hierarchy);
        match tree.find(selector) {
            Some(top) => tree.descendants(top, mode),
            None => Vec::new(),
        }
    }

    fn path(&self, hierarchy: Hierarchy, selector: &Selector) -> Vec<Node> {
        let tree = self.tree(hierarchy);
        match tree.find(selector) {
            Some(target) => tree.path(target),
            None => Vec::new(),
        }
    }

    fn leaves(&self, hierarchy: Hierarchy, under: Option<&Selector>) -> Vec<Node> {
        let tree = self.tree(hierarchy);
        let candidates = match under {
            None => tree.sorted(),
            Some(selector) => match tree.find(selector) {
                Some(top) => tree.within(top.interval()),
                None => Vec::new(),
            },
        };
        candidates
            .into_iter()
            .filter(|n| n.is_leaf())
            .cloned()
            .collect()
    }

    fn full_tree(&self, hierarchy: Hierarchy) -> Vec<DepthNode> {
        with_depths(&self.tree(hierarchy).sorted())
    }

    fn find_by_path(
        &self,
        hierarchy: Hierarchy,
        key: &str,
        leaf_title: &str,
    ) -> Result<Option<NodeId>, StorageError> {
        if !self.capabilities.ordered_aggregation {
            return Err(StorageError::UnsupportedBackend(
                "ordered string aggregation".to_string(),
            ));
        }
        if let Some(limit) = self.capabilities.max_aggregate_length
            && key.len() > limit
        {
            return Err(StorageError::PathTooLong {
                length: key.len(),
                limit,
            });
        }

        let tree = self.tree(hierarchy);
        let separator = SEPARATOR.to_string();
        Ok(tree
            .nodes
            .iter()
            .filter(|n| n.title == leaf_title)
            .filter(|n| {
                let titles: Vec<&str> = tree
                    .sorted()
                    .into_iter()
                    .filter(|p| p.interval().contains(&n.interval()))
                    .map(|p| p.title.as_str())
                    .collect();
                titles.join(&separator) == key
            })
            .map(|n| n.id)
            .min())
    }

    fn permissions_of(&self, role: NodeId) -> Vec<RolePermission> {
        let mut rows: Vec<RolePermission> = self
            .role_permissions
            .iter()
            .filter(|a| a.role_id == role)
            .cloned()
            .collect();
        rows.sort_by_key(|a| a.permission_id);
        rows
    }

    fn roles_of(&self, permission: NodeId) -> Vec<RolePermission> {
        let mut rows: Vec<RolePermission> = self
            .role_permissions
            .iter()
            .filter(|a| a.permission_id == permission)
            .cloned()
            .collect();
        rows.sort_by_key(|a| a.role_id);
        rows
    }

    fn permissions_of_any(&self, roles: &[NodeId]) -> Vec<NodeId> {
        let distinct: BTreeSet<NodeId> = self
            .role_permissions
            .iter()
            .filter(|a| roles.contains(&a.role_id))
            .map(|a| a.permission_id)
            .collect();
        distinct.into_iter().collect()
    }

    fn roles_of_user(&self, user: UserId) -> Vec<UserRole> {
        let mut rows: Vec<UserRole> = self
            .user_roles
            .iter()
            .filter(|a| a.user_id == user)
            .cloned()
            .collect();
        rows.sort_by_key(|a| a.role_id);
        rows
    }
}

#[derive(Debug, Clone)]
pub struct InMemoryStore {
    state: Arc<Mutex<InnerState>>,
}

impl InMemoryStore {
    /// A store in the bootstrapped state: both roots and both sentinel assignments.
    pub fn new() -> Self {
        Self::with_capabilities(BackendCapabilities::default())
    }

    pub fn with_capabilities(capabilities: BackendCapabilities) -> Self {
        Self {
            state: Arc::new(Mutex::new(InnerState::seeded(capabilities))),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, InnerState>, StorageError> {
        self.state
            .lock()
            .map_err(|_| StorageError::Internal("in-memory state lock poisoned".to_string()))
    }
}

#[cfg(test)]
impl InMemoryStore {
    pub(crate) fn overwrite_bounds(&self, hierarchy: Hierarchy, id: NodeId, lft: i64, rght: i64) {
        let mut state = self.state.lock().unwrap();
        if let Some(node) = state
            .tree_mut(hierarchy)
            .nodes
            .iter_mut()
            .find(|n| n.id == id)
        {
            node.lft = lft;
            node.rght = rght;
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeReader for InMemoryStore {
    async fn get(
        &self,
        hierarchy: Hierarchy,
        selector: &Selector,
    ) -> Result<Option<Node>, StorageError> {
        Ok(self.lock()?.get(hierarchy, selector))
    }

    async fn count(&self, hierarchy: Hierarchy) -> Result<u64, StorageError> {
        Ok(self.lock()?.count(hierarchy))
    }

    async fn children(
        &self,
        hierarchy: Hierarchy,
        selector: &Selector,
    ) -> Result<Option<Vec<Node>>, StorageError> {
        Ok(self.lock()?.children(hierarchy, selector))
    }

    async fn descendants(
        &self,
        hierarchy: Hierarchy,
        selector: &Selector,
        mode: DepthMode,
    ) -> Result<Vec<DepthNode>, StorageError> {
        Ok(self.lock()?.descendants(hierarchy, selector, mode))
    }

    async fn path(
        &self,
        hierarchy: Hierarchy,
        selector: &Selector,
    ) -> Result<Vec<Node>, StorageError> {
        Ok(self.lock()?.path(hierarchy, selector))
    }

    async fn leaves(
        &self,
        hierarchy: Hierarchy,
        under: Option<&Selector>,
    ) -> Result<Vec<Node>, StorageError> {
        Ok(self.lock()?.leaves(hierarchy, under))
    }

    async fn full_tree(&self, hierarchy: Hierarchy) -> Result<Vec<DepthNode>, StorageError> {
        Ok(self.lock()?.full_tree(hierarchy))
    }

    async fn find_by_path(
        &self,
        hierarchy: Hierarchy,
        key: &str,
        leaf_title: &str,
    ) -> Result<Option<NodeId>, StorageError> {
        self.lock()?.find_by_path(hierarchy, key, leaf_title)
    }

    fn capabilities(&self) -> BackendCapabilities {
        match self.lock() {
            Ok(state) => state.capabilities,
            Err(e) => {
                tracing::warn!(error = %e, "reporting no path aggregation support");
                BackendCapabilities {
                    ordered_aggregation: false,
                    max_aggregate_length: None,
                }
            }
        }
    }
}

impl TreeStore for InMemoryStore {
    async fn insert_child(
        &self,
        hierarchy: Hierarchy,
        parent: &Selector,
        data: &NodeData,
    ) -> Result<NodeId, StorageError> {
        let mut state = self.lock()?;
        let tree = state.tree_mut(hierarchy);

        let boundary = match tree.find(parent) {
            Some(node) => node.rght,
            None if tree.nodes.is_empty() => 0,
            None => {
                return Err(StorageError::NodeNotFound {
                    hierarchy,
                    selector: parent.clone(),
                });
            }
        };

        let (shift, slot) = Shift::child_gap(boundary);
        tree.shift(shift);
        Ok(tree.insert(slot, data))
    }

    async fn insert_sibling(
        &self,
        hierarchy: Hierarchy,
        after: &Selector,
        data: &NodeData,
    ) -> Result<NodeId, StorageError> {
        let mut state = self.lock()?;
        let tree = state.tree_mut(hierarchy);

        let boundary = match tree.find(after) {
            Some(node) if node.lft == 0 => return Err(StorageError::SiblingOfRoot(hierarchy)),
            Some(node) => node.rght,
            None if tree.nodes.is_empty() => {
                return Err(StorageError::NodeNotFound {
                    hierarchy,
                    selector: after.clone(),
                });
            }
            None => 0,
        };

        let (shift, slot) = Shift::sibling_gap(boundary);
        tree.shift(shift);
        Ok(tree.insert(slot, data))
    }

    async fn delete(&self, hierarchy: Hierarchy, selector: &Selector) -> Result<u64, StorageError> {
        let mut state = self.lock()?;
        let tree = state.tree_mut(hierarchy);

        let Some(target) = tree.find(selector).cloned() else {
            return Ok(0);
        };

        tree.nodes.retain(|n| n.id != target.id);
        tree.shift(Shift::Promote {
            removed: target.interval(),
        });
        state.drop_assignments(hierarchy, &BTreeSet::from([target.id]));

        Ok(1)
    }

    async fn delete_subtree(
        &self,
        hierarchy: Hierarchy,
        selector: &Selector,
    ) -> Result<u64, StorageError> {
        let mut state = self.lock()?;
        let tree = state.tree_mut(hierarchy);

        let Some(target) = tree.find(selector).cloned() else {
            return Ok(0);
        };
        let removed = target.interval();

        let ids: BTreeSet<NodeId> = tree
            .nodes
            .iter()
            .filter(|n| removed.contains_boundary(n.lft))
            .map(|n| n.id)
            .collect();
        tree.nodes.retain(|n| !ids.contains(&n.id));
        tree.shift(Shift::Collapse { removed });
        state.drop_assignments(hierarchy, &ids);

        Ok(ids.len() as u64)
    }

    async fn update(
        &self,
        hierarchy: Hierarchy,
        selector: &Selector,
        edit: &NodeEdit,
    ) -> Result<u64, StorageError> {
        let mut state = self.lock()?;
        let tree = state.tree_mut(hierarchy);

        let Some(id) = tree.find(selector).map(|n| n.id) else {
            return Ok(0);
        };
        let Some(node) = tree.nodes.iter_mut().find(|n| n.id == id) else {
            return Ok(0);
        };
        if let Some(ref title) = edit.title {
            node.title = title.clone();
        }
        if let Some(ref description) = edit.description {
            node.description = description.clone();
        }

        Ok(1)
    }

    async fn reset(&self, hierarchy: Hierarchy) -> Result<u64, StorageError> {
        let mut state = self.lock()?;

        let tree = state.tree_mut(hierarchy);
        let mut ids: BTreeSet<NodeId> = tree.nodes.iter().map(|n| n.id).collect();
        let removed = ids.len() as u64;
        *tree = Tree::seeded();

        // the root keeps its id, so its assignments stay valid
        ids.remove(&ROOT_ID);
        state.drop_assignments(hierarchy, &ids);

        Ok(removed)
    }
}

impl AssignmentReader for InMemoryStore {
    async fn permissions_of(&self, role: NodeId) -> Result<Vec<RolePermission>, StorageError> {
        Ok(self.lock()?.permissions_of(role))
    }

    async fn roles_of(&self, permission: NodeId) -> Result<Vec<RolePermission>, StorageError> {
        Ok(self.lock()?.roles_of(permission))
    }

    async fn permissions_of_any(&self, roles: &[NodeId]) -> Result<Vec<NodeId>, StorageError> {
        Ok(self.lock()?.permissions_of_any(roles))
    }

    async fn roles_of_user(&self, user: UserId) -> Result<Vec<UserRole>, StorageError> {
        Ok(self.lock()?.roles_of_user(user))
    }
}

impl AssignmentStore for InMemoryStore {
    async fn assign_permission(
        &self,
        role: NodeId,
        permission: NodeId,
    ) -> Result<bool, StorageError> {
        let mut state = self.lock()?;

        let exists = state.roles.find(&Selector::ById(role)).is_some()
            && state
                .permissions
                .find(&Selector::ById(permission))
                .is_some();
        let duplicate = state
            .role_permissions
            .iter()
            .any(|a| a.role_id == role && a.permission_id == permission);
        if !exists || duplicate {
            return Ok(false);
        }

        state.role_permissions.push(RolePermission {
            role_id: role,
            permission_id: permission,
            assigned_at: Utc::now(),
        });
        Ok(true)
    }

    async fn unassign_permission(
        &self,
        role: NodeId,
        permission: NodeId,
    ) -> Result<bool, StorageError> {
        let mut state = self.lock()?;
        let before = state.role_permissions.len();
        state
            .role_permissions
            .retain(|a| !(a.role_id == role && a.permission_id == permission));
        Ok(state.role_permissions.len() < before)
    }

    async fn unassign_all_permissions(&self, role: NodeId) -> Result<u64, StorageError> {
        let mut state = self.lock()?;
        let before = state.role_permissions.len();
        state.role_permissions.retain(|a| a.role_id != role);
        Ok((before - state.role_permissions.len()) as u64)
    }

    async fn unassign_all_roles(&self, permission: NodeId) -> Result<u64, StorageError> {
        let mut state = self.lock()?;
        let before = state.role_permissions.len();
        state
            .role_permissions
            .retain(|a| a.permission_id != permission);
        Ok((before - state.role_permissions.len()) as u64)
    }

    async fn reset_permission_assignments(&self) -> Result<u64, StorageError> {
        let mut state = self.lock()?;
        let removed = state.role_permissions.len() as u64;
        state.role_permissions.clear();

        let roots_present = state.roles.find(&Selector::ById(ROOT_ID)).is_some()
            && state.permissions.find(&Selector::ById(ROOT_ID)).is_some();
        if roots_present {
            state.role_permissions.push(RolePermission {
                role_id: ROOT_ID,
                permission_id: ROOT_ID,
                assigned_at: Utc::now(),
            });
        }
        Ok(removed)
    }

    async fn assign_user(&self, user: UserId, role: NodeId) -> Result<bool, StorageError> {
        let mut state = self.lock()?;

        let exists = state.roles.find(&Selector::ById(role)).is_some();
        let duplicate = state
            .user_roles
            .iter()
            .any(|a| a.user_id == user && a.role_id == role);
        if !exists || duplicate {
            return Ok(false);
        }

        state.user_roles.push(UserRole {
            user_id: user,
            role_id: role,
            assigned_at: Utc::now(),
        });
        Ok(true)
    }

    async fn unassign_user(&self, user: UserId, role: NodeId) -> Result<bool, StorageError> {
        let mut state = self.lock()?;
        let before = state.user_roles.len();
        state
            .user_roles
            .retain(|a| !(a.user_id == user && a.role_id == role));
        Ok(state.user_roles.len() < before)
    }

    async fn unassign_all_users(&self, role: NodeId) -> Result<u64, StorageError> {
        let mut state = self.lock()?;
        let before = state.user_roles.len();
        state.user_roles.retain(|a| a.role_id != role);
        Ok((before - state.user_roles.len()) as u64)
    }

    async fn reset_user_assignments(&self) -> Result<u64, StorageError> {
        let mut state = self.lock()?;
        let removed = state.user_roles.len() as u64;
        state.user_roles.clear();

        if state.roles.find(&Selector::ById(ROOT_ID)).is_some() {
            state.user_roles.push(UserRole {
                user_id: ROOT_USER,
                role_id: ROOT_ID,
                assigned_at: Utc::now(),
            });
        }
        Ok(removed)
    }
}

/// Frozen copy of the whole store taken under its lock.
#[derive(Debug, Clone)]
pub struct InMemorySnapshot {
    state: Arc<InnerState>,
}

impl SnapshotStore for InMemoryStore {
    type Snapshot = InMemorySnapshot;

    async fn snapshot(&self) -> Result<InMemorySnapshot, StorageError> {
        let state = self.lock()?;
        Ok(InMemorySnapshot {
            state: Arc::new(state.clone()),
        })
    }
}

impl TreeReader for InMemorySnapshot {
    async fn get(
        &self,
        hierarchy: Hierarchy,
        selector: &Selector,
    ) -> Result<Option<Node>, StorageError> {
        Ok(self.state.get(hierarchy, selector))
    }

    async fn count(&self, hierarchy: Hierarchy) -> Result<u64, StorageError> {
        Ok(self.state.count(hierarchy))
    }

    async fn children(
        &self,
        hierarchy: Hierarchy,
        selector: &Selector,
    ) -> Result<Option<Vec<Node>>, StorageError> {
        Ok(self.state.children(hierarchy, selector))
    }

    async fn descendants(
        &self,
        hierarchy: Hierarchy,
        selector: &Selector,
        mode: DepthMode,
    ) -> Result<Vec<DepthNode>, StorageError> {
        Ok(self.state.descendants(hierarchy, selector, mode))
    }

    async fn path(
        &self,
        hierarchy: Hierarchy,
        selector: &Selector,
    ) -> Result<Vec<Node>, StorageError> {
        Ok(self.state.path(hierarchy, selector))
    }

    async fn leaves(
        &self,
        hierarchy: Hierarchy,
        under: Option<&Selector>,
    ) -> Result<Vec<Node>, StorageError> {
        Ok(self.state.leaves(hierarchy, under))
    }

    async fn full_tree(&self, hierarchy: Hierarchy) -> Result<Vec<DepthNode>, StorageError> {
        Ok(self.state.full_tree(hierarchy))
    }

    async fn find_by_path(
        &self,
        hierarchy: Hierarchy,
        key: &str,
        leaf_title: &str,
    ) -> Result<Option<NodeId>, StorageError> {
        self.state.find_by_path(hierarchy, key, leaf_title)
    }

    fn capabilities(&self) -> BackendCapabilities {
        self.state.capabilities
    }
}

impl AssignmentReader for InMemorySnapshot {
    async fn permissions_of(&self, role: NodeId) -> Result<Vec<RolePermission>, StorageError> {
        Ok(self.state.permissions_of(role))
    }

    async fn roles_of(&self, permission: NodeId) -> Result<Vec<RolePermission>, StorageError> {
        Ok(self.state.roles_of(permission))
    }

    async fn permissions_of_any(&self, roles: &[NodeId]) -> Result<Vec<NodeId>, StorageError> {
        Ok(self.state.permissions_of_any(roles))
    }

    async fn roles_of_user(&self, user: UserId) -> Result<Vec<UserRole>, StorageError> {
        Ok(self.state.roles_of_user(user))
    }
}
