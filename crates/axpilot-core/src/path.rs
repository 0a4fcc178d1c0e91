//! Symbolic element paths.
//!
//! A path such as `"Project Toolbar/New"` names a traversal from the session
//! root down to a control. Each segment may carry a role constraint
//! (`"push button"`, `"menu item"`, ...) narrowing which same-named child
//! matches. Normalization makes paths that differ only in whitespace or empty
//! segments cache-equivalent.

use std::fmt;

/// One level of an [`ElementPath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathSegment {
    pub name: String,
    /// `None` matches by name only.
    pub role: Option<String>,
}

/// A normalized element path. Segment and role counts always agree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementPath {
    segments: Vec<PathSegment>,
}

impl ElementPath {
    /// Normalize a slash-delimited path and its role constraints.
    ///
    /// Segments are trimmed and empty ones dropped. Roles are paired by
    /// position with the surviving segments: a short list is padded with
    /// "unconstrained", extra entries are ignored, and empty or blank role
    /// strings count as unconstrained.
    pub fn parse<S: AsRef<str>>(path: &str, roles: &[Option<S>]) -> Self {
        let segments = path
            .split('/')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .enumerate()
            .map(|(i, name)| PathSegment {
                name: name.to_string(),
                role: roles
                    .get(i)
                    .and_then(|r| r.as_ref())
                    .map(|r| r.as_ref().trim())
                    .filter(|r| !r.is_empty())
                    .map(str::to_string),
            })
            .collect();
        Self { segments }
    }

    /// Path without any role constraints.
    pub fn unconstrained(path: &str) -> Self {
        Self::parse::<&str>(path, &[])
    }

    pub fn from_segments(segments: Vec<PathSegment>) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// The first `len` segments.
    pub fn prefix(&self, len: usize) -> ElementPath {
        ElementPath {
            segments: self.segments[..len.min(self.segments.len())].to_vec(),
        }
    }

    /// A new path with one more segment appended.
    pub fn child(&self, name: &str, role: Option<&str>) -> ElementPath {
        let mut segments = self.segments.clone();
        segments.extend(
            ElementPath::parse(name, &[role])
                .segments
                .into_iter(),
        );
        ElementPath { segments }
    }

    /// Role constraints in wire form, one per segment.
    pub fn roles(&self) -> Vec<Option<String>> {
        self.segments.iter().map(|s| s.role.clone()).collect()
    }

    /// Segment names joined with `/`, without roles.
    pub fn display_path(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl fmt::Display for ElementPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            f.write_str(&segment.name)?;
            if let Some(role) = &segment.role {
                write!(f, "[{}]", role)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trims_and_drops_empty_segments() {
        let path = ElementPath::unconstrained(" a //b/ ");
        let names: Vec<_> = path.segments().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_equivalent_paths_share_cache_key() {
        let roles = [Some("frame"), Some("push button")];
        assert_eq!(
            ElementPath::parse("a//b/", &roles),
            ElementPath::parse("a/b", &roles)
        );
    }

    #[test]
    fn test_roles_padded_to_segment_count() {
        let path = ElementPath::parse("a/b/c", &[Some("frame")]);
        assert_eq!(path.roles(), vec![Some("frame".to_string()), None, None]);
    }

    #[test]
    fn test_excess_roles_ignored() {
        let path = ElementPath::parse("a", &[Some("frame"), Some("menu")]);
        assert_eq!(path.len(), 1);
        assert_eq!(path.roles(), vec![Some("frame".to_string())]);
    }

    #[test]
    fn test_blank_role_is_unconstrained() {
        let with_blank = ElementPath::parse("a/b", &[Some(""), Some("  ")]);
        assert_eq!(with_blank, ElementPath::unconstrained("a/b"));
    }

    #[test]
    fn test_roles_differ_means_different_key() {
        assert_ne!(
            ElementPath::parse("a/b", &[None, Some("push button")]),
            ElementPath::unconstrained("a/b")
        );
    }

    #[test]
    fn test_prefix_and_child() {
        let path = ElementPath::parse("X/Y/Z", &[Some("frame")]);
        let prefix = path.prefix(2);
        assert_eq!(prefix.display_path(), "X/Y");
        assert_eq!(prefix.roles(), vec![Some("frame".to_string()), None]);

        let combo = ElementPath::parse("Dialog/Format", &[None, Some("combo box")]);
        let item = combo.child("PNG", Some("menu item"));
        assert_eq!(item.display_path(), "Dialog/Format/PNG");
        assert_eq!(
            item.roles(),
            vec![
                None,
                Some("combo box".to_string()),
                Some("menu item".to_string())
            ]
        );
    }

    #[test]
    fn test_display_includes_roles() {
        let path = ElementPath::parse("Toolbar/New", &[None, Some("push button")]);
        assert_eq!(path.to_string(), "Toolbar/New[push button]");
    }

    #[test]
    fn test_empty_path() {
        assert!(ElementPath::unconstrained(" / // ").is_empty());
    }
}
