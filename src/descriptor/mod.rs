//! Parsed graph descriptor: an arena of nodes indexed by stable handles.
//!
//! Every candidate pipeline template is a tree of [`Node`]s. The tree is
//! immutable for the lifetime of the settings database; a resolution pass
//! that needs to mutate port attributes first deep-clones the template
//! forest (see [`SettingsDatabase::create_instance`](store::SettingsDatabase::create_instance)),
//! so concurrent configurations of cameras sharing the same settings never
//! observe each other's overrides.
//!
//! Ancestor and peer relations are plain [`NodeId`] handles into the arena,
//! never owning references, so a cloned forest stays self-contained.

mod store;

pub use store::{DescriptorStore, SettingsDatabase, Template, TemplateHandle};

use std::collections::BTreeMap;

/// The camera's declared operating mode, narrowing template eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigMode {
    /// Default preview/video operation.
    Normal,
    /// High-speed (slow motion) capture.
    HighSpeed,
    /// Dedicated still-capture operation.
    StillCapture,
}

impl ConfigMode {
    /// Parse a single mode token as found in a template's mode declaration.
    pub fn parse(token: &str) -> Option<ConfigMode> {
        match token.trim() {
            "NORMAL" | "normal" => Some(ConfigMode::Normal),
            "HIGH_SPEED" | "high_speed" => Some(ConfigMode::HighSpeed),
            "STILL_CAPTURE" | "still_capture" => Some(ConfigMode::StillCapture),
            _ => None,
        }
    }

    /// Parse the comma-separated set of supported modes declared by a
    /// template. Unknown tokens are ignored with a warning so a database
    /// authored for a newer HAL still loads.
    pub fn parse_set(declaration: &str) -> Vec<ConfigMode> {
        let mut modes = Vec::new();
        for token in declaration.split(',') {
            match ConfigMode::parse(token) {
                Some(mode) if !modes.contains(&mode) => modes.push(mode),
                Some(_) => {}
                None => tracing::warn!("ignoring unknown config mode token '{}'", token.trim()),
            }
        }
        modes
    }
}

/// Stable handle of a node inside one [`NodeForest`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    /// Get the underlying index.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Type tag of a descriptor node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// The physical capture source.
    Sensor,
    /// Test pattern generator capture source.
    Tpg,
    /// A cluster of kernels sharing an internal stream id.
    ProgramGroup,
    /// A data port on a stage.
    Port,
    /// A virtual sink, i.e. a client-visible output point.
    Sink,
    /// A fixed-function hardware block.
    HwBlock,
    /// One addressable processing unit inside a program group.
    Kernel,
    /// Anything else (containers, option lists, ...).
    Other,
}

/// One attribute value in a node's open attribute bag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    /// Integer attribute.
    Int(i64),
    /// String attribute.
    Str(String),
}

impl AttrValue {
    /// The integer value, if this attribute is an integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            AttrValue::Str(_) => None,
        }
    }

    /// The string value, if this attribute is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(v) => Some(v),
            AttrValue::Int(_) => None,
        }
    }

    /// Compare against a predicate value. Integer attributes match the
    /// decimal rendering of their value, mirroring the string-typed queries
    /// the settings database is written against.
    pub fn matches(&self, predicate: &str) -> bool {
        match self {
            AttrValue::Int(v) => predicate.parse::<i64>() == Ok(*v),
            AttrValue::Str(v) => v == predicate,
        }
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Str(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::Str(v)
    }
}

/// A node in a template's tree: type tag, name, parent handle and an open
/// attribute bag.
#[derive(Debug, Clone)]
pub struct Node {
    name: String,
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    attrs: BTreeMap<String, AttrValue>,
}

impl Node {
    /// The node's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The node's type tag.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Handle of the parent node, `None` for the root.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Child handles in document order.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

/// One template's node tree, backed by an arena.
///
/// `Clone` performs a deep copy: handles stay valid in the clone and the
/// clone owns its nodes outright.
#[derive(Debug, Clone)]
pub struct NodeForest {
    nodes: Vec<Node>,
    root: NodeId,
}

impl NodeForest {
    /// Create a forest holding a single root node.
    pub fn new(root_name: impl Into<String>) -> Self {
        let root = Node {
            name: root_name.into(),
            kind: NodeKind::Other,
            parent: None,
            children: Vec::new(),
            attrs: BTreeMap::new(),
        };
        Self { nodes: vec![root], root: NodeId(0) }
    }

    /// Handle of the root node.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Borrow a node.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    /// Add a child node under `parent` and return its handle.
    pub fn add_node(&mut self, parent: NodeId, kind: NodeKind, name: impl Into<String>) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            name: name.into(),
            kind,
            parent: Some(parent),
            children: Vec::new(),
            attrs: BTreeMap::new(),
        });
        self.nodes[parent.index()].children.push(id);
        id
    }

    /// Set (or create) an attribute on a node.
    pub fn set_attr(&mut self, id: NodeId, key: impl Into<String>, value: impl Into<AttrValue>) {
        self.nodes[id.index()].attrs.insert(key.into(), value.into());
    }

    /// Look up an attribute on a node.
    pub fn attr(&self, id: NodeId, key: &str) -> Option<&AttrValue> {
        self.nodes[id.index()].attrs.get(key)
    }

    /// Integer attribute lookup. Absent and non-integer attributes are both
    /// `None`; callers that must distinguish use [`attr`](Self::attr).
    pub fn attr_int(&self, id: NodeId, key: &str) -> Option<i64> {
        self.attr(id, key).and_then(AttrValue::as_int)
    }

    /// String attribute lookup.
    pub fn attr_str(&self, id: NodeId, key: &str) -> Option<&str> {
        self.attr(id, key).and_then(AttrValue::as_str)
    }

    /// Iterate all descendants of `id` (excluding `id` itself) in document
    /// order, i.e. depth-first following child order.
    pub fn descendants(&self, id: NodeId) -> Descendants<'_> {
        let mut stack = Vec::new();
        stack.extend(self.node(id).children().iter().rev().copied());
        Descendants { forest: self, stack }
    }

    /// First descendant of the root with the given name, in document order.
    pub fn find_by_name(&self, name: &str) -> Option<NodeId> {
        self.descendants(self.root).find(|&id| self.node(id).name() == name)
    }

    /// First descendant of the root with the given name and kind.
    pub fn find_by_name_and_kind(&self, name: &str, kind: NodeKind) -> Option<NodeId> {
        self.descendants(self.root)
            .find(|&id| self.node(id).kind() == kind && self.node(id).name() == name)
    }

    /// All descendants of the root with the given kind, in document order.
    pub fn nodes_of_kind(&self, kind: NodeKind) -> Vec<NodeId> {
        self.descendants(self.root).filter(|&id| self.node(id).kind() == kind).collect()
    }

    /// Resolve a `stage:port` style path from the root.
    ///
    /// Each segment names a child of the previously-resolved node; single
    /// segment paths resolve direct descendants by name anywhere under the
    /// root (virtual sinks are declared as such leaves).
    pub fn by_path(&self, path: &str) -> Option<NodeId> {
        let mut segments = path.split(':');
        let first = segments.next()?;
        let mut current = self.find_by_name(first)?;
        for segment in segments {
            current = self
                .node(current)
                .children()
                .iter()
                .copied()
                .find(|&c| self.node(c).name() == segment)?;
        }
        Some(current)
    }

    /// Full name of a node: `ancestor:name` when it has a parent below the
    /// root, plain `name` otherwise.
    pub fn full_name(&self, id: NodeId) -> String {
        match self.node(id).parent() {
            Some(parent) if parent != self.root => {
                format!("{}:{}", self.node(parent).name(), self.node(id).name())
            }
            _ => self.node(id).name().to_string(),
        }
    }
}

/// Document-order descendant iterator, see [`NodeForest::descendants`].
pub struct Descendants<'a> {
    forest: &'a NodeForest,
    stack: Vec<NodeId>,
}

impl Iterator for Descendants<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.stack.pop()?;
        self.stack.extend(self.forest.node(id).children().iter().rev().copied());
        Some(id)
    }
}
