use nestrbac_core::nested;
use nestrbac_core::node::{Hierarchy, Node};

use crate::traits::{StorageError, TreeReader};

/// Checks the nested-set invariants of one hierarchy and returns its node count.
pub async fn verify_tree<S: TreeReader>(
    store: &S,
    hierarchy: Hierarchy,
) -> Result<usize, StorageError> {
    let rows = store.full_tree(hierarchy).await?;
    let nodes: Vec<Node> = rows.into_iter().map(|d| d.node).collect();

    if let Err(source) = nested::verify(&nodes) {
        tracing::warn!(%hierarchy, error = %source, "structural corruption detected");
        return Err(StorageError::StructuralCorruption { hierarchy, source });
    }

    Ok(nodes.len())
}
