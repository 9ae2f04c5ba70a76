use crate::node::{Node, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interval {
    pub lft: i64,
    pub rght: i64,
}

impl Interval {
    pub fn new(lft: i64, rght: i64) -> Self {
        Self { lft, rght }
    }

    pub fn width(&self) -> i64 {
        self.rght - self.lft + 1
    }

    pub fn descendant_count(&self) -> i64 {
        (self.rght - self.lft - 1) / 2
    }

    /// True when `other` lies inside this interval, bounds included.
    pub fn contains(&self, other: &Interval) -> bool {
        self.lft <= other.lft && other.rght <= self.rght
    }

    pub fn contains_boundary(&self, boundary: i64) -> bool {
        self.lft <= boundary && boundary <= self.rght
    }
}

/// Boundary rewrite applied to every surviving node by a structural mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shift {
    /// Makes room for a leaf at `[at, at + 1]`.
    OpenGap { at: i64 },
    /// Removes one node and promotes its children one level.
    Promote { removed: Interval },
    /// Removes a whole subtree.
    Collapse { removed: Interval },
}

impl Shift {
    /// Gap and slot for a new last child of the node whose right boundary is `parent_rght`.
    pub fn child_gap(parent_rght: i64) -> (Self, Interval) {
        Self::gap_at(parent_rght)
    }

    /// Gap and slot for a new sibling directly after the node whose right boundary is `target_rght`.
    pub fn sibling_gap(target_rght: i64) -> (Self, Interval) {
        Self::gap_at(target_rght + 1)
    }

    fn gap_at(at: i64) -> (Self, Interval) {
        (Self::OpenGap { at }, Interval::new(at, at + 1))
    }

    pub fn apply(&self, boundary: i64) -> i64 {
        match *self {
            Self::OpenGap { at } if boundary >= at => boundary + 2,
            Self::OpenGap { .. } => boundary,
            Self::Promote { removed } if boundary > removed.rght => boundary - 2,
            Self::Promote { removed } if boundary > removed.lft => boundary - 1,
            Self::Promote { .. } => boundary,
            Self::Collapse { removed } if boundary > removed.rght => boundary - removed.width(),
            Self::Collapse { .. } => boundary,
        }
    }

    pub fn apply_to(&self, node: &mut Node) {
        node.lft = self.apply(node.lft);
        node.rght = self.apply(node.rght);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Corruption {
    #[error("node {id} has inverted interval [{lft}, {rght}]")]
    InvertedInterval { id: NodeId, lft: i64, rght: i64 },

    #[error("node {id} partially overlaps node {other}")]
    Overlap { id: NodeId, other: NodeId },

    #[error("nodes {first} and {second} are both top-level")]
    MultipleRoots { first: NodeId, second: NodeId },

    #[error("node {id} spans {expected} descendants but contains {actual}")]
    DescendantMismatch {
        id: NodeId,
        expected: i64,
        actual: i64,
    },
}

/// Checks the boundary invariants of one whole tree.
pub fn verify<'a>(nodes: impl IntoIterator<Item = &'a Node>) -> Result<(), Corruption> {
    let mut sorted: Vec<&Node> = nodes.into_iter().collect();
    sorted.sort_by_key(|n| n.lft);

    for node in &sorted {
        if node.lft >= node.rght {
            return Err(Corruption::InvertedInterval {
                id: node.id,
                lft: node.lft,
                rght: node.rght,
            });
        }
    }

    let mut open: Vec<&Node> = Vec::new();
    let mut root: Option<NodeId> = None;
    for node in &sorted {
        while open.last().is_some_and(|top| top.rght < node.lft) {
            open.pop();
        }

        match open.last() {
            Some(top) if node.lft <= top.lft || node.rght >= top.rght => {
                return Err(Corruption::Overlap {
                    id: node.id,
                    other: top.id,
                });
            }
            Some(_) => {}
            None => {
                if let Some(first) = root {
                    return Err(Corruption::MultipleRoots {
                        first,
                        second: node.id,
                    });
                }
                root = Some(node.id);
            }
        }
        open.push(node);
    }

    let lfts: Vec<i64> = sorted.iter().map(|n| n.lft).collect();
    for (idx, node) in sorted.iter().enumerate() {
        let end = lfts.partition_point(|&l| l < node.rght);
        #[allow(clippy::cast_possible_wrap)]
        let actual = (end - idx - 1) as i64;
        let expected = node.descendant_count();
        if expected != actual || (node.rght - node.lft - 1) % 2 != 0 {
            return Err(Corruption::DescendantMismatch {
                id: node.id,
                expected,
                actual,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: i64, lft: i64, rght: i64) -> Node {
        Node {
            id: NodeId::new(id),
            lft,
            rght,
            title: format!("n{id}"),
            description: String::new(),
        }
    }

    // root[0,7] { a[1,4] { b[2,3] }, c[5,6] }
    fn sample() -> Vec<Node> {
        vec![node(1, 0, 7), node(2, 1, 4), node(3, 2, 3), node(4, 5, 6)]
    }

    fn apply(shift: Shift, nodes: &mut [Node]) {
        for n in nodes.iter_mut() {
            shift.apply_to(n);
        }
    }

    // 1. Well-formed tree verifies
    #[test]
    fn well_formed_tree_verifies() {
        assert_eq!(verify(&sample()), Ok(()));
    }

    // 2. Empty tree verifies
    #[test]
    fn empty_tree_verifies() {
        assert_eq!(verify(&[]), Ok(()));
    }

    // 3. Inverted interval detected
    #[test]
    fn inverted_interval_detected() {
        let nodes = vec![node(1, 0, 3), node(2, 2, 1)];

        assert!(matches!(
            verify(&nodes),
            Err(Corruption::InvertedInterval { .. })
        ));
    }

    // 4. Partial overlap detected
    #[test]
    fn partial_overlap_detected() {
        let nodes = vec![node(1, 0, 7), node(2, 1, 4), node(3, 3, 6)];

        assert_eq!(
            verify(&nodes),
            Err(Corruption::Overlap {
                id: NodeId::new(3),
                other: NodeId::new(2),
            })
        );
    }

    // 5. Second top-level node detected
    #[test]
    fn second_root_detected() {
        let nodes = vec![node(1, 0, 1), node(2, 2, 3)];

        assert!(matches!(
            verify(&nodes),
            Err(Corruption::MultipleRoots { .. })
        ));
    }

    // 6. Gap in boundaries breaks the descendant count
    #[test]
    fn boundary_gap_detected() {
        let nodes = vec![node(1, 0, 5), node(2, 1, 2)];

        assert!(matches!(
            verify(&nodes),
            Err(Corruption::DescendantMismatch { .. })
        ));
    }

    // 7. Child gap lands after existing children
    #[test]
    fn child_gap_appends_last_child() {
        let mut nodes = sample();
        let (shift, slot) = Shift::child_gap(7);
        apply(shift, &mut nodes);
        nodes.push(node(5, slot.lft, slot.rght));

        assert_eq!(slot, Interval::new(7, 8));
        assert_eq!(nodes[0].rght, 9);
        assert_eq!(verify(&nodes), Ok(()));
    }

    // 8. Nested child gap shifts right-hand nodes
    #[test]
    fn nested_child_gap_shifts_following_nodes() {
        let mut nodes = sample();
        let (shift, slot) = Shift::child_gap(4);
        apply(shift, &mut nodes);
        nodes.push(node(5, slot.lft, slot.rght));

        assert_eq!(slot, Interval::new(4, 5));
        assert_eq!((nodes[1].lft, nodes[1].rght), (1, 6));
        assert_eq!((nodes[3].lft, nodes[3].rght), (7, 8));
        assert_eq!(verify(&nodes), Ok(()));
    }

    // 9. Sibling gap follows target subtree
    #[test]
    fn sibling_gap_follows_target_subtree() {
        let mut nodes = sample();
        let (shift, slot) = Shift::sibling_gap(4);
        apply(shift, &mut nodes);
        nodes.push(node(5, slot.lft, slot.rght));

        assert_eq!(slot, Interval::new(5, 6));
        assert_eq!((nodes[3].lft, nodes[3].rght), (7, 8));
        assert_eq!(verify(&nodes), Ok(()));
    }

    // 10. Promote closes the gap and lifts children
    #[test]
    fn promote_lifts_children() {
        let mut nodes = sample();
        let removed = nodes.remove(1).interval();
        apply(Shift::Promote { removed }, &mut nodes);

        assert_eq!((nodes[0].lft, nodes[0].rght), (0, 5));
        assert_eq!((nodes[1].lft, nodes[1].rght), (1, 2));
        assert_eq!((nodes[2].lft, nodes[2].rght), (3, 4));
        assert_eq!(verify(&nodes), Ok(()));
    }

    // 11. Collapse removes the subtree width
    #[test]
    fn collapse_removes_subtree_width() {
        let mut nodes = sample();
        let removed = nodes[1].interval();
        nodes.retain(|n| !removed.contains_boundary(n.lft));
        apply(Shift::Collapse { removed }, &mut nodes);

        assert_eq!(nodes.len(), 2);
        assert_eq!((nodes[0].lft, nodes[0].rght), (0, 3));
        assert_eq!((nodes[1].lft, nodes[1].rght), (1, 2));
        assert_eq!(verify(&nodes), Ok(()));
    }

    // 12. Insert then promote round-trips
    #[test]
    fn insert_then_delete_round_trips() {
        let original = sample();
        let mut nodes = original.clone();
        let (shift, slot) = Shift::child_gap(4);
        apply(shift, &mut nodes);

        apply(Shift::Promote { removed: slot }, &mut nodes);

        assert_eq!(nodes, original);
    }

    #[test]
    fn interval_helpers() {
        let i = Interval::new(1, 6);

        assert_eq!(i.width(), 6);
        assert_eq!(i.descendant_count(), 2);
        assert!(i.contains(&Interval::new(2, 3)));
        assert!(!i.contains(&Interval::new(0, 3)));
    }
}
