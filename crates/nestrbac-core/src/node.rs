use std::fmt;

use chrono::{DateTime, Utc};

use crate::nested::Interval;

pub const ROOT_ID: NodeId = NodeId(1);
pub const ROOT_TITLE: &str = "root";
pub const ROOT_USER: UserId = UserId(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(i64);

impl NodeId {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl From<i64> for NodeId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identifier of an external user. Never interpreted, only matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(i64);

impl UserId {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hierarchy {
    Roles,
    Permissions,
}

impl Hierarchy {
    pub fn table(&self) -> &'static str {
        match self {
            Self::Roles => "roles",
            Self::Permissions => "permissions",
        }
    }

    pub fn entity(&self) -> &'static str {
        match self {
            Self::Roles => "role",
            Self::Permissions => "permission",
        }
    }
}

impl fmt::Display for Hierarchy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    pub lft: i64,
    pub rght: i64,
    pub title: String,
    pub description: String,
}

impl Node {
    pub fn interval(&self) -> Interval {
        Interval::new(self.lft, self.rght)
    }

    pub fn is_leaf(&self) -> bool {
        self.rght == self.lft + 1
    }

    pub fn descendant_count(&self) -> i64 {
        self.interval().descendant_count()
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{} [{}, {}]", self.title, self.id, self.lft, self.rght)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepthNode {
    pub node: Node,
    pub depth: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DepthMode {
    #[default]
    Relative,
    Absolute,
}

/// Title and description carried by a node that is about to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeData {
    pub title: String,
    pub description: String,
}

impl NodeData {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeEdit {
    pub title: Option<String>,
    pub description: Option<String>,
}

impl NodeEdit {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none()
    }
}

/// Identifies a single node. Title selectors resolve to the lowest matching id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    ById(NodeId),
    ByTitle(String),
}

impl Selector {
    pub fn title(title: impl Into<String>) -> Self {
        Self::ByTitle(title.into())
    }

    pub fn matches(&self, node: &Node) -> bool {
        match self {
            Self::ById(id) => node.id == *id,
            Self::ByTitle(title) => node.title == *title,
        }
    }
}

impl From<NodeId> for Selector {
    fn from(id: NodeId) -> Self {
        Self::ById(id)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ById(id) => write!(f, "id {id}"),
            Self::ByTitle(title) => write!(f, "title '{title}'"),
        }
    }
}

/// Caller-facing reference to a role or permission: a numeric id, a
/// `/`-rooted path or a bare title.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityRef {
    Id(NodeId),
    Path(String),
    Title(String),
}

impl EntityRef {
    pub fn parse(raw: &str) -> Self {
        if let Ok(id) = raw.trim().parse::<i64>() {
            return Self::Id(NodeId(id));
        }
        if raw.starts_with(crate::path::SEPARATOR) {
            return Self::Path(raw.to_string());
        }
        Self::Title(raw.to_string())
    }
}

impl From<NodeId> for EntityRef {
    fn from(id: NodeId) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for EntityRef {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Path(path) => f.write_str(path),
            Self::Title(title) => f.write_str(title),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolePermission {
    pub role_id: NodeId,
    pub permission_id: NodeId,
    pub assigned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRole {
    pub user_id: UserId,
    pub role_id: NodeId,
    pub assigned_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: i64, lft: i64, rght: i64, title: &str) -> Node {
        Node {
            id: NodeId::new(id),
            lft,
            rght,
            title: title.to_string(),
            description: String::new(),
        }
    }

    #[test]
    fn entity_ref_parses_numeric_id() {
        assert_eq!(EntityRef::parse("42"), EntityRef::Id(NodeId::new(42)));
    }

    #[test]
    fn entity_ref_parses_leading_separator_as_path() {
        assert_eq!(
            EntityRef::parse("/x/y"),
            EntityRef::Path("/x/y".to_string())
        );
    }

    #[test]
    fn entity_ref_falls_back_to_title() {
        assert_eq!(
            EntityRef::parse("editor"),
            EntityRef::Title("editor".to_string())
        );
    }

    #[test]
    fn leaf_and_descendant_count_follow_interval() {
        let parent = node(1, 0, 5, "root");
        let leaf = node(2, 1, 2, "a");

        assert!(!parent.is_leaf());
        assert_eq!(parent.descendant_count(), 2);
        assert!(leaf.is_leaf());
        assert_eq!(leaf.descendant_count(), 0);
    }

    #[test]
    fn selector_matches_by_id_or_title() {
        let n = node(3, 1, 2, "editor");

        assert!(Selector::ById(NodeId::new(3)).matches(&n));
        assert!(Selector::title("editor").matches(&n));
        assert!(!Selector::title("viewer").matches(&n));
    }

    #[test]
    fn empty_edit_is_detected() {
        assert!(NodeEdit::default().is_empty());
        assert!(
            !NodeEdit {
                title: Some("x".to_string()),
                description: None,
            }
            .is_empty()
        );
    }

    #[test]
    fn hierarchy_display_uses_table_name() {
        assert_eq!(Hierarchy::Roles.to_string(), "roles");
        assert_eq!(Hierarchy::Permissions.entity(), "permission");
    }

    #[test]
    fn node_display() {
        assert_eq!(node(2, 1, 2, "a").to_string(), "a#2 [1, 2]");
    }
}
