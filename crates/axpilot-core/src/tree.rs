//! Accessibility-tree collaborator interface and an in-memory fixture tree.
//!
//! The locator never walks a toolkit directly. It asks a [`UiTree`] for a
//! child by name and optional role, and for a node's position and size.
//! Node handles are opaque [`NodeKey`]s valid only for the tree generation
//! they were obtained in.

use std::collections::VecDeque;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::{Point, Size};

/// Opaque reference to a live tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeKey(pub u64);

/// The live UI tree the locator resolves paths against.
pub trait UiTree {
    /// The desktop root containing every application.
    fn root(&self) -> NodeKey;

    /// Top-level application node with the given name.
    fn application(&self, name: &str) -> Option<NodeKey>;

    /// Find a node below `parent` named `name`, optionally constrained to `role`.
    fn find_child(&self, parent: NodeKey, name: &str, role: Option<&str>) -> Option<NodeKey>;

    fn position(&self, node: NodeKey) -> Option<Point>;

    fn size(&self, node: NodeKey) -> Option<Size>;

    fn name(&self, node: NodeKey) -> Option<String>;

    fn role(&self, node: NodeKey) -> Option<String>;

    /// Advances whenever previously handed-out keys may no longer be valid.
    fn generation(&self) -> u64;

    /// Pick up external changes to the tree. Returns true if it changed.
    fn refresh(&mut self) -> bool {
        false
    }
}

/// Errors loading a fixture tree.
#[derive(Debug, Error)]
pub enum TreeError {
    #[error("failed to read tree file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid tree description: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Serialized description of a UI tree node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub name: String,
    pub role: String,
    #[serde(default)]
    pub x: u32,
    #[serde(default)]
    pub y: u32,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub children: Vec<NodeSpec>,
}

impl NodeSpec {
    pub fn new(name: &str, role: &str, bounds: [u32; 4]) -> Self {
        Self {
            name: name.to_string(),
            role: role.to_string(),
            x: bounds[0],
            y: bounds[1],
            width: bounds[2],
            height: bounds[3],
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<NodeSpec>) -> Self {
        self.children = children;
        self
    }
}

struct Node {
    name: String,
    role: String,
    position: Point,
    size: Size,
    children: Vec<usize>,
}

/// In-memory UI tree built from [`NodeSpec`]s.
///
/// Child lookup is a breadth-first search over all descendants of the
/// parent, so the shallowest match wins and ties go to document order.
/// Replacing the tree advances the generation, invalidating cached keys.
pub struct FixtureTree {
    nodes: Vec<Node>,
    generation: u64,
}

impl FixtureTree {
    /// Build a tree whose desktop root holds the given applications.
    pub fn new(applications: Vec<NodeSpec>) -> Self {
        let mut tree = Self {
            nodes: Vec::new(),
            generation: 0,
        };
        tree.build(applications);
        tree
    }

    /// Parse a JSON array of application nodes.
    pub fn from_json(json: &str) -> Result<Self, TreeError> {
        let applications: Vec<NodeSpec> = serde_json::from_str(json)?;
        Ok(Self::new(applications))
    }

    pub fn load(path: &Path) -> Result<Self, TreeError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Swap in a new tree, as if the UI had been rebuilt.
    pub fn replace(&mut self, applications: Vec<NodeSpec>) {
        self.build(applications);
        self.generation += 1;
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn build(&mut self, applications: Vec<NodeSpec>) {
        self.nodes.clear();
        self.nodes.push(Node {
            name: "main".to_string(),
            role: "desktop frame".to_string(),
            position: Point::new(0, 0),
            size: Size::new(0, 0),
            children: Vec::new(),
        });
        for app in applications {
            let id = self.insert(app);
            self.nodes[0].children.push(id);
        }
    }

    fn insert(&mut self, spec: NodeSpec) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node {
            name: spec.name,
            role: spec.role,
            position: Point::new(spec.x, spec.y),
            size: Size::new(spec.width, spec.height),
            children: Vec::new(),
        });
        for child in spec.children {
            let child_id = self.insert(child);
            self.nodes[id].children.push(child_id);
        }
        id
    }

    fn node(&self, key: NodeKey) -> Option<&Node> {
        usize::try_from(key.0).ok().and_then(|i| self.nodes.get(i))
    }
}

impl UiTree for FixtureTree {
    fn root(&self) -> NodeKey {
        NodeKey(0)
    }

    fn application(&self, name: &str) -> Option<NodeKey> {
        self.nodes[0]
            .children
            .iter()
            .copied()
            .find(|&id| self.nodes[id].name == name)
            .map(|id| NodeKey(id as u64))
    }

    fn find_child(&self, parent: NodeKey, name: &str, role: Option<&str>) -> Option<NodeKey> {
        let start = self.node(parent)?;
        let mut queue: VecDeque<usize> = start.children.iter().copied().collect();

        while let Some(id) = queue.pop_front() {
            let node = &self.nodes[id];
            if node.name == name && role.map_or(true, |r| node.role == r) {
                return Some(NodeKey(id as u64));
            }
            queue.extend(node.children.iter().copied());
        }
        None
    }

    fn position(&self, node: NodeKey) -> Option<Point> {
        self.node(node).map(|n| n.position)
    }

    fn size(&self, node: NodeKey) -> Option<Size> {
        self.node(node).map(|n| n.size)
    }

    fn name(&self, node: NodeKey) -> Option<String> {
        self.node(node).map(|n| n.name.clone())
    }

    fn role(&self, node: NodeKey) -> Option<String> {
        self.node(node).map(|n| n.role.clone())
    }

    fn generation(&self) -> u64 {
        self.generation
    }
}
