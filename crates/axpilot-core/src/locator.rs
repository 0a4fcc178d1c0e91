//! Element Locator: resolves an [`ElementPath`] to a screen rectangle.
//!
//! Lookups consult the resolution cache first. A full-path hit returns
//! immediately; otherwise the deepest cached ancestor becomes the resume
//! point and only the remaining suffix is walked. Every node resolved along
//! the way is cached, so siblings under a common ancestor resume from it.
//!
//! Cached node references carry the tree generation they were obtained in.
//! A reference from an older generation is dropped and treated as a miss.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::cache::ResolutionCache;
use crate::error::ApiError;
use crate::geometry::Rectangle;
use crate::path::ElementPath;
use crate::tree::{NodeKey, UiTree};

/// Non-owning reference to a live tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeRef {
    pub key: NodeKey,
    pub generation: u64,
}

/// What the cache remembers about a resolved element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub rect: Rectangle,
    pub name: String,
    pub role: String,
    /// Present on the target side only.
    pub node: Option<NodeRef>,
}

impl CacheEntry {
    fn is_current(&self, generation: u64) -> bool {
        self.node.map_or(false, |n| n.generation == generation)
    }
}

/// A successfully resolved element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedElement {
    pub rect: Rectangle,
    pub name: String,
    pub role: String,
}

impl From<&CacheEntry> for ResolvedElement {
    fn from(entry: &CacheEntry) -> Self {
        Self {
            rect: entry.rect,
            name: entry.name.clone(),
            role: entry.role.clone(),
        }
    }
}

pub type ElementCache = ResolutionCache<ElementPath, CacheEntry>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocateError {
    #[error("element path is empty")]
    EmptyPath,

    /// `failed_path` runs up to and including the segment with no match;
    /// `resolved` is the longest prefix that did resolve.
    #[error("element not found: {failed_path}")]
    NotFound {
        failed_path: String,
        resolved: String,
        role: Option<String>,
    },

    #[error("element '{0}' has no position or size")]
    NoGeometry(String),
}

impl From<LocateError> for ApiError {
    fn from(err: LocateError) -> Self {
        match err {
            LocateError::EmptyPath => ApiError::empty_path(),
            LocateError::NotFound {
                failed_path,
                resolved,
                role,
            } => ApiError::element_not_found(&failed_path, &resolved, role.as_deref()),
            LocateError::NoGeometry(path) => {
                ApiError::internal(format!("Element '{}' reported no geometry", path))
            }
        }
    }
}

/// Resolve `path` below `root`, reading and filling `cache`.
pub fn resolve(
    tree: &dyn UiTree,
    root: NodeKey,
    cache: &mut ElementCache,
    path: &ElementPath,
) -> Result<ResolvedElement, LocateError> {
    if path.is_empty() {
        return Err(LocateError::EmptyPath);
    }
    let generation = tree.generation();

    if let Some(entry) = lookup_current(cache, path, generation) {
        debug!(path = %path, "Cache hit");
        return Ok(ResolvedElement::from(&entry));
    }

    let (mut current, start) = resume_point(cache, path, generation).unwrap_or((root, 0));
    debug!(path = %path, resume_depth = start, "Cache miss, walking suffix");

    let segments = path.segments();
    for (depth, segment) in segments.iter().enumerate().skip(start) {
        current = tree
            .find_child(current, &segment.name, segment.role.as_deref())
            .ok_or_else(|| LocateError::NotFound {
                failed_path: path.prefix(depth + 1).display_path(),
                resolved: path.prefix(depth).display_path(),
                role: segment.role.clone(),
            })?;

        let is_terminal = depth + 1 == segments.len();
        match describe(tree, current, generation) {
            Some(entry) if is_terminal => {
                let resolved = ResolvedElement::from(&entry);
                cache.put(path.clone(), entry);
                return Ok(resolved);
            }
            Some(entry) => {
                cache.put(path.prefix(depth + 1), entry);
            }
            None if is_terminal => return Err(LocateError::NoGeometry(path.display_path())),
            None => {}
        }
    }

    // Loop always returns on the terminal segment.
    Err(LocateError::NoGeometry(path.display_path()))
}

/// Cached entry for `key` if it is still valid for `generation`.
fn lookup_current(cache: &mut ElementCache, key: &ElementPath, generation: u64) -> Option<CacheEntry> {
    let entry = cache.get(key)?.clone();
    if entry.is_current(generation) {
        Some(entry)
    } else {
        cache.remove(key);
        None
    }
}

/// Deepest cached proper prefix of `path`, as (node, segments consumed).
fn resume_point(cache: &mut ElementCache, path: &ElementPath, generation: u64) -> Option<(NodeKey, usize)> {
    (1..path.len()).rev().find_map(|len| {
        let entry = lookup_current(cache, &path.prefix(len), generation)?;
        entry.node.map(|node| (node.key, len))
    })
}

fn describe(tree: &dyn UiTree, node: NodeKey, generation: u64) -> Option<CacheEntry> {
    let position = tree.position(node)?;
    let size = tree.size(node)?;
    Some(CacheEntry {
        rect: Rectangle::from_parts(position, size),
        name: tree.name(node).unwrap_or_default(),
        role: tree.role(node).unwrap_or_default(),
        node: Some(NodeRef {
            key: node,
            generation,
        }),
    })
}
