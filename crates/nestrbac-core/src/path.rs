use std::fmt;

use crate::node::ROOT_TITLE;

pub const SEPARATOR: char = '/';

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("invalid path '{0}': must start with '/' and contain no empty components")]
    InvalidPath(String),

    #[error("path of {length} bytes exceeds the reconstruction limit of {limit}")]
    PathTooLong { length: usize, limit: usize },
}

/// A `/`-rooted sequence of node titles below the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchyPath {
    components: Vec<String>,
}

impl HierarchyPath {
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let Some(rest) = raw.strip_prefix(SEPARATOR) else {
            return Err(PathError::InvalidPath(raw.to_string()));
        };
        let rest = rest.strip_suffix(SEPARATOR).unwrap_or(rest);
        if rest.is_empty() {
            return Ok(Self {
                components: Vec::new(),
            });
        }

        let components: Vec<String> = rest.split(SEPARATOR).map(str::to_string).collect();
        if components.iter().any(String::is_empty) {
            return Err(PathError::InvalidPath(raw.to_string()));
        }

        Ok(Self { components })
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    pub fn leaf(&self) -> &str {
        self.components.last().map_or(ROOT_TITLE, String::as_str)
    }

    /// Every cumulative prefix, shortest first: `/a`, `/a/b`, `/a/b/c`.
    pub fn prefixes(&self) -> impl Iterator<Item = HierarchyPath> + '_ {
        (1..=self.components.len()).map(|n| HierarchyPath {
            components: self.components[..n].to_vec(),
        })
    }

    /// The ancestor-title string a node at this path reconstructs to,
    /// including the root title: `root/a/b`.
    pub fn lookup_key(&self) -> String {
        let mut key = String::from(ROOT_TITLE);
        for component in &self.components {
            key.push(SEPARATOR);
            key.push_str(component);
        }
        key
    }
}

impl fmt::Display for HierarchyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.components.is_empty() {
            return write!(f, "{SEPARATOR}");
        }
        for component in &self.components {
            write!(f, "{SEPARATOR}{component}")?;
        }
        Ok(())
    }
}

/// Renders a root-first title chain as a path, dropping the root itself.
pub fn render_titles<'a>(titles: impl IntoIterator<Item = &'a str>) -> String {
    let rendered: String = titles
        .into_iter()
        .skip(1)
        .flat_map(|t| [SEPARATOR.to_string(), t.to_string()])
        .collect();
    if rendered.is_empty() {
        SEPARATOR.to_string()
    } else {
        rendered
    }
}

/// Upper bound on the reconstructed ancestor-title string. Checked before any
/// lookup so a truncating backend can never resolve the wrong node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathLimits {
    pub max_length: usize,
}

impl PathLimits {
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }

    pub fn effective(&self, backend_max: Option<usize>) -> usize {
        match backend_max {
            Some(backend) => self.max_length.min(backend),
            None => self.max_length,
        }
    }

    pub fn check(&self, key: &str, backend_max: Option<usize>) -> Result<(), PathError> {
        let limit = self.effective(backend_max);
        if key.len() > limit {
            return Err(PathError::PathTooLong {
                length: key.len(),
                limit,
            });
        }
        Ok(())
    }
}

impl Default for PathLimits {
    fn default() -> Self {
        Self::new(1_000_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_components() {
        let path = HierarchyPath::parse("/a/b/c").unwrap();

        assert_eq!(path.components(), ["a", "b", "c"]);
        assert_eq!(path.leaf(), "c");
    }

    #[test]
    fn trailing_separator_is_trimmed() {
        let path = HierarchyPath::parse("/a/b/").unwrap();

        assert_eq!(path.components(), ["a", "b"]);
    }

    #[test]
    fn missing_leading_separator_is_rejected() {
        let err = HierarchyPath::parse("a/b").unwrap_err();

        assert_eq!(err, PathError::InvalidPath("a/b".to_string()));
    }

    #[test]
    fn empty_component_is_rejected() {
        assert!(matches!(
            HierarchyPath::parse("/a//b"),
            Err(PathError::InvalidPath(_))
        ));
    }

    #[test]
    fn lone_separator_is_root() {
        let path = HierarchyPath::parse("/").unwrap();

        assert!(path.is_root());
        assert_eq!(path.leaf(), ROOT_TITLE);
        assert_eq!(path.lookup_key(), "root");
        assert_eq!(path.to_string(), "/");
    }

    #[test]
    fn lookup_key_prefixes_root_title() {
        let path = HierarchyPath::parse("/x/y").unwrap();

        assert_eq!(path.lookup_key(), "root/x/y");
    }

    #[test]
    fn prefixes_are_cumulative() {
        let path = HierarchyPath::parse("/a/b/c").unwrap();

        let rendered: Vec<String> = path.prefixes().map(|p| p.to_string()).collect();

        assert_eq!(rendered, ["/a", "/a/b", "/a/b/c"]);
    }

    #[test]
    fn render_titles_skips_root() {
        assert_eq!(render_titles(["root"]), "/");
        assert_eq!(render_titles(["root", "a", "b"]), "/a/b");
    }

    #[test]
    fn limit_uses_smaller_of_config_and_backend() {
        let limits = PathLimits::new(100);

        assert_eq!(limits.effective(None), 100);
        assert_eq!(limits.effective(Some(10)), 10);
        assert_eq!(limits.effective(Some(1_000)), 100);
    }

    #[test]
    fn overlong_key_is_rejected() {
        let limits = PathLimits::new(8);

        let err = limits.check("root/abcdef", None).unwrap_err();

        assert_eq!(
            err,
            PathError::PathTooLong {
                length: 11,
                limit: 8
            }
        );
        assert!(limits.check("root/ab", None).is_ok());
    }
}
