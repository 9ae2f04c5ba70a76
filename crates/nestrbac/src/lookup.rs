use nestrbac_core::node::{EntityRef, Hierarchy, NodeId, Selector};
use nestrbac_core::path::{HierarchyPath, PathLimits};
use nestrbac_storage::{StorageError, TreeReader};

use crate::error::RbacError;

/// Numeric ids pass through unchecked; paths and titles are looked up.
pub(crate) async fn resolve<R: TreeReader>(
    reader: &R,
    hierarchy: Hierarchy,
    limits: PathLimits,
    entity: &EntityRef,
) -> Result<Option<NodeId>, RbacError> {
    match entity {
        EntityRef::Id(id) => Ok(Some(*id)),
        EntityRef::Path(raw) => {
            let path = HierarchyPath::parse(raw)?;
            path_id(reader, hierarchy, limits, &path).await
        }
        EntityRef::Title(title) => title_id(reader, hierarchy, title).await,
    }
}

pub(crate) async fn path_id<R: TreeReader>(
    reader: &R,
    hierarchy: Hierarchy,
    limits: PathLimits,
    path: &HierarchyPath,
) -> Result<Option<NodeId>, RbacError> {
    let capabilities = reader.capabilities();
    if !capabilities.ordered_aggregation {
        return Err(StorageError::UnsupportedBackend("ordered string aggregation".to_string()).into());
    }

    let key = path.lookup_key();
    limits.check(&key, capabilities.max_aggregate_length)?;

    Ok(reader.find_by_path(hierarchy, &key, path.leaf()).await?)
}

pub(crate) async fn title_id<R: TreeReader>(
    reader: &R,
    hierarchy: Hierarchy,
    title: &str,
) -> Result<Option<NodeId>, RbacError> {
    let node = reader.get(hierarchy, &Selector::title(title)).await?;
    Ok(node.map(|n| n.id))
}
