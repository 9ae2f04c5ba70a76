use std::sync::Arc;

use nestrbac_core::engine::{AccessError, AccessEvaluator, GrantReader};
use nestrbac_core::node::{DepthMode, EntityRef, Hierarchy, NodeId, Selector, UserId};
use nestrbac_core::path::{PathError, PathLimits};
use nestrbac_storage::{AssignmentReader, SnapshotStore, StorageError, TreeReader};

use crate::error::RbacError;
use crate::lookup;

/// Serves the evaluator from one storage snapshot.
pub struct SnapshotGrants<R> {
    reader: R,
    limits: PathLimits,
}

impl<R: TreeReader + AssignmentReader> SnapshotGrants<R> {
    pub fn new(reader: R, limits: PathLimits) -> Self {
        Self { reader, limits }
    }
}

fn storage_error(e: StorageError) -> AccessError {
    AccessError::StorageError(e.to_string())
}

impl<R: TreeReader + AssignmentReader> GrantReader for SnapshotGrants<R> {
    async fn resolve(
        &self,
        hierarchy: Hierarchy,
        entity: &EntityRef,
    ) -> Result<Option<NodeId>, AccessError> {
        match lookup::resolve(&self.reader, hierarchy, self.limits, entity).await {
            Ok(id) => Ok(id),
            Err(RbacError::Path(PathError::InvalidPath(_))) => Ok(None),
            Err(RbacError::Path(e)) => Err(AccessError::Path(e)),
            Err(RbacError::Storage(StorageError::UnsupportedBackend(what))) => {
                Err(AccessError::UnsupportedBackend(what))
            }
            Err(e) => Err(AccessError::StorageError(e.to_string())),
        }
    }

    async fn direct_roles(&self, user: UserId) -> Result<Vec<NodeId>, AccessError> {
        let rows = self
            .reader
            .roles_of_user(user)
            .await
            .map_err(storage_error)?;
        Ok(rows.into_iter().map(|r| r.role_id).collect())
    }

    async fn subtree(&self, hierarchy: Hierarchy, id: NodeId) -> Result<Vec<NodeId>, AccessError> {
        let selector = Selector::ById(id);
        if self
            .reader
            .get(hierarchy, &selector)
            .await
            .map_err(storage_error)?
            .is_none()
        {
            return Ok(Vec::new());
        }

        let descendants = self
            .reader
            .descendants(hierarchy, &selector, DepthMode::Relative)
            .await
            .map_err(storage_error)?;

        let mut ids = Vec::with_capacity(descendants.len() + 1);
        ids.push(id);
        ids.extend(descendants.into_iter().map(|d| d.node.id));
        Ok(ids)
    }

    async fn ancestors(
        &self,
        hierarchy: Hierarchy,
        id: NodeId,
    ) -> Result<Vec<NodeId>, AccessError> {
        let path = self
            .reader
            .path(hierarchy, &Selector::ById(id))
            .await
            .map_err(storage_error)?;
        Ok(path.into_iter().map(|n| n.id).collect())
    }

    async fn granted_permissions(&self, roles: &[NodeId]) -> Result<Vec<NodeId>, AccessError> {
        self.reader
            .permissions_of_any(roles)
            .await
            .map_err(storage_error)
    }
}

pub(crate) type SnapshotEvaluator<S> = AccessEvaluator<SnapshotGrants<<S as SnapshotStore>::Snapshot>>;

/// Opens a snapshot and wraps it in an evaluator for one evaluation.
pub(crate) async fn evaluator<S: SnapshotStore>(
    store: &S,
    limits: PathLimits,
) -> Result<SnapshotEvaluator<S>, RbacError> {
    let snapshot = store.snapshot().await?;
    Ok(AccessEvaluator::new(Arc::new(SnapshotGrants::new(
        snapshot, limits,
    ))))
}
