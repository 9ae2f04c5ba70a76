pub mod migrations;
mod queries;

use sqlx::{PgPool, Postgres, Transaction};
use tokio::sync::Mutex;

use nestrbac_core::nested::Shift;
use nestrbac_core::node::{
    DepthMode, DepthNode, Hierarchy, Node, NodeData, NodeEdit, NodeId, ROOT_ID, ROOT_USER,
    RolePermission, Selector, UserId, UserRole,
};

use crate::traits::{
    AssignmentReader, AssignmentStore, BackendCapabilities, SnapshotStore, StorageError,
    TreeReader, TreeStore,
};

use queries::to_storage_error;

/// Largest value a Postgres `text` can hold, and so the ceiling for `string_agg`.
const MAX_TEXT_LENGTH: usize = 1 << 30;

const CAPABILITIES: BackendCapabilities = BackendCapabilities {
    ordered_aggregation: true,
    max_aggregate_length: Some(MAX_TEXT_LENGTH),
};

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    schema: String,
}

impl PostgresStore {
    pub fn new(pool: PgPool, schema: &str) -> Result<Self, StorageError> {
        migrations::validate_schema_name(schema)?;
        Ok(Self {
            pool,
            schema: schema.to_string(),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    async fn begin_structural(
        &self,
        hierarchy: Hierarchy,
    ) -> Result<Transaction<'static, Postgres>, StorageError> {
        let mut tx = self.pool.begin().await.map_err(to_storage_error)?;
        queries::lock_tree(&mut *tx, &self.schema, hierarchy).await?;
        Ok(tx)
    }

    async fn insert_at(
        &self,
        hierarchy: Hierarchy,
        anchor: &Selector,
        data: &NodeData,
        sibling: bool,
    ) -> Result<NodeId, StorageError> {
        let mut tx = self.begin_structural(hierarchy).await?;

        let target = queries::get_node(&mut *tx, &self.schema, hierarchy, anchor).await?;
        let (shift, slot) = match target {
            Some(node) if sibling && node.lft == 0 => {
                return Err(StorageError::SiblingOfRoot(hierarchy));
            }
            Some(node) if sibling => Shift::sibling_gap(node.rght),
            Some(node) => Shift::child_gap(node.rght),
            None => {
                let empty = queries::count_nodes(&mut *tx, &self.schema, hierarchy).await? == 0;
                match (sibling, empty) {
                    (false, true) => Shift::child_gap(0),
                    (true, false) => Shift::sibling_gap(0),
                    _ => {
                        return Err(StorageError::NodeNotFound {
                            hierarchy,
                            selector: anchor.clone(),
                        });
                    }
                }
            }
        };

        queries::apply_shift(&mut tx, &self.schema, hierarchy, shift).await?;
        let id = queries::insert_node(
            &mut *tx,
            &self.schema,
            hierarchy,
            slot,
            &data.title,
            &data.description,
        )
        .await?;

        tx.commit().await.map_err(to_storage_error)?;
        Ok(id)
    }
}

impl TreeReader for PostgresStore {
    async fn get(
        &self,
        hierarchy: Hierarchy,
        selector: &Selector,
    ) -> Result<Option<Node>, StorageError> {
        queries::get_node(&self.pool, &self.schema, hierarchy, selector).await
    }

    async fn count(&self, hierarchy: Hierarchy) -> Result<u64, StorageError> {
        queries::count_nodes(&self.pool, &self.schema, hierarchy).await
    }

    async fn children(
        &self,
        hierarchy: Hierarchy,
        selector: &Selector,
    ) -> Result<Option<Vec<Node>>, StorageError> {
        let rows = queries::descendants(
            &self.pool,
            &self.schema,
            hierarchy,
            selector,
            DepthMode::Relative,
            true,
        )
        .await?;
        Ok(non_empty(rows))
    }

    async fn descendants(
        &self,
        hierarchy: Hierarchy,
        selector: &Selector,
        mode: DepthMode,
    ) -> Result<Vec<DepthNode>, StorageError> {
        queries::descendants(&self.pool, &self.schema, hierarchy, selector, mode, false).await
    }

    async fn path(
        &self,
        hierarchy: Hierarchy,
        selector: &Selector,
    ) -> Result<Vec<Node>, StorageError> {
        queries::path(&self.pool, &self.schema, hierarchy, selector).await
    }

    async fn leaves(
        &self,
        hierarchy: Hierarchy,
        under: Option<&Selector>,
    ) -> Result<Vec<Node>, StorageError> {
        queries::leaves(&self.pool, &self.schema, hierarchy, under).await
    }

    async fn full_tree(&self, hierarchy: Hierarchy) -> Result<Vec<DepthNode>, StorageError> {
        queries::full_tree(&self.pool, &self.schema, hierarchy).await
    }

    async fn find_by_path(
        &self,
        hierarchy: Hierarchy,
        key: &str,
        leaf_title: &str,
    ) -> Result<Option<NodeId>, StorageError> {
        queries::find_by_path(&self.pool, &self.schema, hierarchy, key, leaf_title).await
    }

    fn capabilities(&self) -> BackendCapabilities {
        CAPABILITIES
    }
}

fn non_empty(rows: Vec<DepthNode>) -> Option<Vec<Node>> {
    if rows.is_empty() {
        return None;
    }
    Some(rows.into_iter().map(|d| d.node).collect())
}

impl TreeStore for PostgresStore {
    async fn insert_child(
        &self,
        hierarchy: Hierarchy,
        parent: &Selector,
        data: &NodeData,
    ) -> Result<NodeId, StorageError> {
        self.insert_at(hierarchy, parent, data, false).await
    }

    async fn insert_sibling(
        &self,
        hierarchy: Hierarchy,
        after: &Selector,
        data: &NodeData,
    ) -> Result<NodeId, StorageError> {
        self.insert_at(hierarchy, after, data, true).await
    }

    async fn delete(&self, hierarchy: Hierarchy, selector: &Selector) -> Result<u64, StorageError> {
        let mut tx = self.begin_structural(hierarchy).await?;

        let Some(target) = queries::get_node(&mut *tx, &self.schema, hierarchy, selector).await?
        else {
            return Ok(0);
        };

        let removed = queries::delete_node(&mut *tx, &self.schema, hierarchy, target.id).await?;
        queries::apply_shift(
            &mut tx,
            &self.schema,
            hierarchy,
            Shift::Promote {
                removed: target.interval(),
            },
        )
        .await?;

        tx.commit().await.map_err(to_storage_error)?;
        Ok(removed)
    }

    async fn delete_subtree(
        &self,
        hierarchy: Hierarchy,
        selector: &Selector,
    ) -> Result<u64, StorageError> {
        let mut tx = self.begin_structural(hierarchy).await?;

        let Some(target) = queries::get_node(&mut *tx, &self.schema, hierarchy, selector).await?
        else {
            return Ok(0);
        };
        let removed = target.interval();

        let count = queries::delete_range(&mut *tx, &self.schema, hierarchy, removed).await?;
        queries::apply_shift(&mut tx, &self.schema, hierarchy, Shift::Collapse { removed })
            .await?;

        tx.commit().await.map_err(to_storage_error)?;
        Ok(count)
    }

    async fn update(
        &self,
        hierarchy: Hierarchy,
        selector: &Selector,
        edit: &NodeEdit,
    ) -> Result<u64, StorageError> {
        queries::update_node(&self.pool, &self.schema, hierarchy, selector, edit).await
    }

    async fn reset(&self, hierarchy: Hierarchy) -> Result<u64, StorageError> {
        let mut tx = self.begin_structural(hierarchy).await?;

        // the root row survives, and with it the sentinel assignments
        let cleared = queries::clear_tree(&mut *tx, &self.schema, hierarchy).await?;
        let restored = queries::restore_root(&mut *tx, &self.schema, hierarchy).await?;
        queries::seed_root(&mut *tx, &self.schema, hierarchy).await?;
        let removed = cleared + restored;
        queries::sync_id_sequence(&mut *tx, &self.schema, hierarchy).await?;

        tx.commit().await.map_err(to_storage_error)?;
        Ok(removed)
    }
}

impl AssignmentReader for PostgresStore {
    async fn permissions_of(&self, role: NodeId) -> Result<Vec<RolePermission>, StorageError> {
        queries::role_permissions_where(&self.pool, &self.schema, "role_id", role).await
    }

    async fn roles_of(&self, permission: NodeId) -> Result<Vec<RolePermission>, StorageError> {
        queries::role_permissions_where(&self.pool, &self.schema, "permission_id", permission)
            .await
    }

    async fn permissions_of_any(&self, roles: &[NodeId]) -> Result<Vec<NodeId>, StorageError> {
        queries::permissions_of_any(&self.pool, &self.schema, roles).await
    }

    async fn roles_of_user(&self, user: UserId) -> Result<Vec<UserRole>, StorageError> {
        queries::roles_of_user(&self.pool, &self.schema, user).await
    }
}

impl AssignmentStore for PostgresStore {
    async fn assign_permission(
        &self,
        role: NodeId,
        permission: NodeId,
    ) -> Result<bool, StorageError> {
        queries::insert_role_permission(&self.pool, &self.schema, role, permission).await
    }

    async fn unassign_permission(
        &self,
        role: NodeId,
        permission: NodeId,
    ) -> Result<bool, StorageError> {
        let removed = queries::delete_assignments(
            &self.pool,
            &self.schema,
            "role_permissions",
            &[("role_id", role.value()), ("permission_id", permission.value())],
        )
        .await?;
        Ok(removed == 1)
    }

    async fn unassign_all_permissions(&self, role: NodeId) -> Result<u64, StorageError> {
        queries::delete_assignments(
            &self.pool,
            &self.schema,
            "role_permissions",
            &[("role_id", role.value())],
        )
        .await
    }

    async fn unassign_all_roles(&self, permission: NodeId) -> Result<u64, StorageError> {
        queries::delete_assignments(
            &self.pool,
            &self.schema,
            "role_permissions",
            &[("permission_id", permission.value())],
        )
        .await
    }

    async fn reset_permission_assignments(&self) -> Result<u64, StorageError> {
        let mut tx = self.pool.begin().await.map_err(to_storage_error)?;

        let removed =
            queries::delete_assignments(&mut *tx, &self.schema, "role_permissions", &[]).await?;
        queries::insert_role_permission(&mut *tx, &self.schema, ROOT_ID, ROOT_ID).await?;

        tx.commit().await.map_err(to_storage_error)?;
        Ok(removed)
    }

    async fn assign_user(&self, user: UserId, role: NodeId) -> Result<bool, StorageError> {
        queries::insert_user_role(&self.pool, &self.schema, user, role).await
    }

    async fn unassign_user(&self, user: UserId, role: NodeId) -> Result<bool, StorageError> {
        let removed = queries::delete_assignments(
            &self.pool,
            &self.schema,
            "user_roles",
            &[("user_id", user.value()), ("role_id", role.value())],
        )
        .await?;
        Ok(removed == 1)
    }

    async fn unassign_all_users(&self, role: NodeId) -> Result<u64, StorageError> {
        queries::delete_assignments(
            &self.pool,
            &self.schema,
            "user_roles",
            &[("role_id", role.value())],
        )
        .await
    }

    async fn reset_user_assignments(&self) -> Result<u64, StorageError> {
        let mut tx = self.pool.begin().await.map_err(to_storage_error)?;

        let removed =
            queries::delete_assignments(&mut *tx, &self.schema, "user_roles", &[]).await?;
        queries::insert_user_role(&mut *tx, &self.schema, ROOT_USER, ROOT_ID).await?;

        tx.commit().await.map_err(to_storage_error)?;
        Ok(removed)
    }
}

/// Reads inside one `REPEATABLE READ, READ ONLY` transaction. Rolled back on drop.
pub struct PostgresSnapshot {
    tx: Mutex<Transaction<'static, Postgres>>,
    schema: String,
}

impl SnapshotStore for PostgresStore {
    type Snapshot = PostgresSnapshot;

    async fn snapshot(&self) -> Result<PostgresSnapshot, StorageError> {
        let mut tx = self.pool.begin().await.map_err(to_storage_error)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(to_storage_error)?;

        Ok(PostgresSnapshot {
            tx: Mutex::new(tx),
            schema: self.schema.clone(),
        })
    }
}

impl TreeReader for PostgresSnapshot {
    async fn get(
        &self,
        hierarchy: Hierarchy,
        selector: &Selector,
    ) -> Result<Option<Node>, StorageError> {
        let mut tx = self.tx.lock().await;
        queries::get_node(&mut **tx, &self.schema, hierarchy, selector).await
    }

    async fn count(&self, hierarchy: Hierarchy) -> Result<u64, StorageError> {
        let mut tx = self.tx.lock().await;
        queries::count_nodes(&mut **tx, &self.schema, hierarchy).await
    }

    async fn children(
        &self,
        hierarchy: Hierarchy,
        selector: &Selector,
    ) -> Result<Option<Vec<Node>>, StorageError> {
        let mut tx = self.tx.lock().await;
        let rows = queries::descendants(
            &mut **tx,
            &self.schema,
            hierarchy,
            selector,
            DepthMode::Relative,
            true,
        )
        .await?;
        Ok(non_empty(rows))
    }

    async fn descendants(
        &self,
        hierarchy: Hierarchy,
        selector: &Selector,
        mode: DepthMode,
    ) -> Result<Vec<DepthNode>, StorageError> {
        let mut tx = self.tx.lock().await;
        queries::descendants(&mut **tx, &self.schema, hierarchy, selector, mode, false).await
    }

    async fn path(
        &self,
        hierarchy: Hierarchy,
        selector: &Selector,
    ) -> Result<Vec<Node>, StorageError> {
        let mut tx = self.tx.lock().await;
        queries::path(&mut **tx, &self.schema, hierarchy, selector).await
    }

    async fn leaves(
        &self,
        hierarchy: Hierarchy,
        under: Option<&Selector>,
    ) -> Result<Vec<Node>, StorageError> {
        let mut tx = self.tx.lock().await;
        queries::leaves(&mut **tx, &self.schema, hierarchy, under).await
    }

    async fn full_tree(&self, hierarchy: Hierarchy) -> Result<Vec<DepthNode>, StorageError> {
        let mut tx = self.tx.lock().await;
        queries::full_tree(&mut **tx, &self.schema, hierarchy).await
    }

    async fn find_by_path(
        &self,
        hierarchy: Hierarchy,
        key: &str,
        leaf_title: &str,
    ) -> Result<Option<NodeId>, StorageError> {
        let mut tx = self.tx.lock().await;
        queries::find_by_path(&mut **tx, &self.schema, hierarchy, key, leaf_title).await
    }

    fn capabilities(&self) -> BackendCapabilities {
        CAPABILITIES
    }
}

impl AssignmentReader for PostgresSnapshot {
    async fn permissions_of(&self, role: NodeId) -> Result<Vec<RolePermission>, StorageError> {
        let mut tx = self.tx.lock().await;
        queries::role_permissions_where(&mut **tx, &self.schema, "role_id", role).await
    }

    async fn roles_of(&self, permission: NodeId) -> Result<Vec<RolePermission>, StorageError> {
        let mut tx = self.tx.lock().await;
        queries::role_permissions_where(&mut **tx, &self.schema, "permission_id", permission)
            .await
    }

    async fn permissions_of_any(&self, roles: &[NodeId]) -> Result<Vec<NodeId>, StorageError> {
        let mut tx = self.tx.lock().await;
        queries::permissions_of_any(&mut **tx, &self.schema, roles).await
    }

    async fn roles_of_user(&self, user: UserId) -> Result<Vec<UserRole>, StorageError> {
        let mut tx = self.tx.lock().await;
        queries::roles_of_user(&mut **tx, &self.schema, user).await
    }
}
