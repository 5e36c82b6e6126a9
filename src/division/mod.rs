//! Administrative division tree
//!
//! This module models the administrative hierarchy that decides what gets
//! harvested: country → region → province → island → municipality → district.
//!
//! - **loader**: builds a [`DivisionTree`] from six flat datasets
//! - **traversal**: streams every node of a frozen tree (requires `retrieval`)
//!
//! # Architecture
//!
//! All nodes live in a single arena owned by the tree. Nodes refer to their
//! parent and children by [`NodeId`] (an arena index), so a node never owns
//! its relatives. Each level additionally keeps an `id -> NodeId` mapping used
//! to resolve parent identifiers while loading and to enumerate nodes later.
//!
//! ```text
//! ES                          (country)
//! └── CA02                    (region)
//!     └── 50                  (province)
//!         └── 50297           (municipality)
//!             └── 5029710     (district)
//! ```
//!
//! The path of a node is the slash-joined chain of identifiers from the root,
//! e.g. `ES/CA02/50/50297/5029710`. It is both the store partition key and the
//! URL component used to fetch that node's results document.

pub mod loader;
#[cfg(feature = "retrieval")]
pub mod traversal;

pub use loader::{
    DivisionSource, LoadSummary, RemoteDivisionSource, StaticDivisionSource, TreeLoadError,
    TreeLoader,
};
#[cfg(feature = "retrieval")]
pub use traversal::Traversal;

use anyhow::{anyhow, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Placeholder replaced by a node's path in the results URL template
pub const PATH_PLACEHOLDER: &str = "{path}";

// =============================================================================
// Level
// =============================================================================

/// Administrative level of a division
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Country,
    Region,
    Province,
    Island,
    Municipality,
    District,
}

impl Level {
    /// All levels, in mandatory resolution order
    pub const ALL: [Level; 6] = [
        Level::Country,
        Level::Region,
        Level::Province,
        Level::Island,
        Level::Municipality,
        Level::District,
    ];

    /// Position of the level in [`Level::ALL`]
    pub fn index(self) -> usize {
        match self {
            Level::Country => 0,
            Level::Region => 1,
            Level::Province => 2,
            Level::Island => 3,
            Level::Municipality => 4,
            Level::District => 5,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Level::Country => "country",
            Level::Region => "region",
            Level::Province => "province",
            Level::Island => "island",
            Level::Municipality => "municipality",
            Level::District => "district",
        }
    }

    /// File stem of the level's dataset as published by the results service
    pub fn dataset_stem(&self) -> &'static str {
        match self {
            Level::Country => "pais",
            Level::Region => "comunidad",
            Level::Province => "provincia",
            Level::Island => "islas",
            Level::Municipality => "municipio",
            Level::District => "distrito",
        }
    }

    /// Levels a record of this level may attach to, tried in order
    ///
    /// Countries are roots. Municipalities hang from a province, or from an
    /// island when the province lookup fails.
    pub fn parent_levels(&self) -> &'static [Level] {
        match self {
            Level::Country => &[],
            Level::Region => &[Level::Country],
            Level::Province => &[Level::Region],
            Level::Island => &[Level::Province],
            Level::Municipality => &[Level::Province, Level::Island],
            Level::District => &[Level::Municipality],
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// RawRecord
// =============================================================================

/// One row of a division dataset: `[id, name, parentId]`
///
/// Decoding is best-effort: strings are kept verbatim, numbers become their
/// decimal text, `null` or missing elements become empty strings, and extra
/// trailing elements are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "Vec<Value>")]
pub struct RawRecord {
    pub id: String,
    pub name: String,
    pub parent_id: String,
}

impl RawRecord {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        parent_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parent_id: parent_id.into(),
        }
    }
}

impl TryFrom<Vec<Value>> for RawRecord {
    type Error = String;

    fn try_from(row: Vec<Value>) -> Result<Self, Self::Error> {
        let field = |i: usize| -> Result<String, String> {
            match row.get(i) {
                None | Some(Value::Null) => Ok(String::new()),
                Some(Value::String(s)) => Ok(s.clone()),
                Some(Value::Number(n)) => Ok(n.to_string()),
                Some(Value::Bool(b)) => Ok(b.to_string()),
                Some(other) => Err(format!(
                    "unsupported value in division record column {}: {}",
                    i, other
                )),
            }
        };

        Ok(RawRecord {
            id: field(0)?,
            name: field(1)?,
            parent_id: field(2)?,
        })
    }
}

// =============================================================================
// Nodes
// =============================================================================

/// Index of a node inside the [`DivisionTree`] arena
///
/// Only meaningful for the tree that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

/// Tree node wrapping one [`RawRecord`]
#[derive(Debug, Clone)]
pub struct DivisionNode {
    id: String,
    name: String,
    level: Level,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl DivisionNode {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

/// Borrowed view of a node together with its tree
///
/// Gives access to the derived `path()` and `url()`, which need the ancestors.
#[derive(Clone, Copy)]
pub struct NodeRef<'a> {
    tree: &'a DivisionTree,
    id: NodeId,
}

impl<'a> NodeRef<'a> {
    pub fn node_id(&self) -> NodeId {
        self.id
    }

    pub fn id(&self) -> &'a str {
        self.tree.node(self.id).id()
    }

    pub fn name(&self) -> &'a str {
        self.tree.node(self.id).name()
    }

    pub fn level(&self) -> Level {
        self.tree.node(self.id).level()
    }

    pub fn parent(&self) -> Option<NodeRef<'a>> {
        self.tree.node(self.id).parent().map(|id| self.tree.get(id))
    }

    pub fn children(&self) -> impl Iterator<Item = NodeRef<'a>> + 'a {
        let tree = self.tree;
        tree.node(self.id).children().iter().map(move |&id| tree.get(id))
    }

    pub fn path(&self) -> String {
        self.tree.path(self.id)
    }

    pub fn url(&self) -> String {
        self.tree.url(self.id)
    }
}

impl fmt::Debug for NodeRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRef")
            .field("level", &self.level())
            .field("path", &self.path())
            .field("name", &self.name())
            .finish()
    }
}

// =============================================================================
// DivisionTree
// =============================================================================

/// Arena-backed forest of administrative divisions
///
/// Built once by the [`TreeLoader`] and then shared read-only. Each level keeps
/// its own `id -> node` mapping; a later record with a duplicate id replaces the
/// earlier one in that mapping.
#[derive(Debug, Clone)]
pub struct DivisionTree {
    nodes: Vec<DivisionNode>,
    levels: [HashMap<String, NodeId>; 6],
    url_template: String,
}

impl DivisionTree {
    /// Create an empty tree whose node URLs are rendered from `url_template`
    ///
    /// The template must contain the `{path}` placeholder.
    pub fn new(url_template: impl Into<String>) -> Result<Self> {
        let url_template = url_template.into();
        if !url_template.contains(PATH_PLACEHOLDER) {
            return Err(anyhow!(
                "URL template '{}' does not contain the {} placeholder",
                url_template,
                PATH_PLACEHOLDER
            ));
        }
        Ok(Self {
            nodes: Vec::new(),
            levels: Default::default(),
            url_template,
        })
    }

    /// Insert a record at `level`, under `parent` when given
    ///
    /// Parent consistency (the right level, an existing node) is the loader's
    /// responsibility.
    pub(crate) fn insert(
        &mut self,
        level: Level,
        record: RawRecord,
        parent: Option<NodeId>,
    ) -> NodeId {
        let node_id = NodeId(self.nodes.len());
        self.nodes.push(DivisionNode {
            id: record.id.clone(),
            name: record.name,
            level,
            parent,
            children: Vec::new(),
        });

        if let Some(parent_id) = parent {
            self.nodes[parent_id.0].children.push(node_id);
        }
        self.levels[level.index()].insert(record.id, node_id);

        node_id
    }

    /// Find a node by its identifier within one level
    pub fn lookup(&self, level: Level, id: &str) -> Option<NodeId> {
        self.levels[level.index()].get(id).copied()
    }

    /// Resolve a parent identifier for a record of `level`
    pub fn resolve_parent(&self, level: Level, parent_id: &str) -> Option<NodeId> {
        level
            .parent_levels()
            .iter()
            .find_map(|&parent_level| self.lookup(parent_level, parent_id))
    }

    pub fn node(&self, id: NodeId) -> &DivisionNode {
        &self.nodes[id.0]
    }

    pub fn get(&self, id: NodeId) -> NodeRef<'_> {
        NodeRef { tree: self, id }
    }

    /// Slash-joined identifier chain from the root down to `id`
    pub fn path(&self, id: NodeId) -> String {
        let mut items = vec![self.node(id).id.as_str()];
        let mut current = self.node(id).parent;
        while let Some(parent) = current {
            let node = self.node(parent);
            items.push(node.id.as_str());
            current = node.parent;
        }
        items.reverse();
        items.join("/")
    }

    /// Results URL for `id`, rendered from the tree's template
    pub fn url(&self, id: NodeId) -> String {
        self.url_template.replace(PATH_PLACEHOLDER, self.path(id).as_str())
    }

    pub fn url_template(&self) -> &str {
        &self.url_template
    }

    /// Node ids registered for one level, in no particular order
    pub fn level_nodes(&self, level: Level) -> impl Iterator<Item = NodeId> + '_ {
        self.levels[level.index()].values().copied()
    }

    /// Every registered node across all levels, in no particular order
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        Level::ALL
            .into_iter()
            .flat_map(move |level| self.level_nodes(level))
    }

    /// Root nodes (the country level)
    pub fn roots(&self) -> impl Iterator<Item = NodeRef<'_>> + '_ {
        self.level_nodes(Level::Country).map(move |id| self.get(id))
    }

    pub fn level_len(&self, level: Level) -> usize {
        self.levels[level.index()].len()
    }

    /// Number of registered (traversable) nodes
    pub fn len(&self) -> usize {
        self.levels.iter().map(|m| m.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = "http://results.test/{path}/info.json";

    fn sample_tree() -> (DivisionTree, NodeId, NodeId) {
        let mut tree = DivisionTree::new(TEMPLATE).unwrap();
        let es = tree.insert(Level::Country, RawRecord::new("ES", "España", ""), None);
        let ca = tree.insert(
            Level::Region,
            RawRecord::new("CA02", "Aragón", "ES"),
            Some(es),
        );
        let pr = tree.insert(
            Level::Province,
            RawRecord::new("50", "Zaragoza", "CA02"),
            Some(ca),
        );
        let mu = tree.insert(
            Level::Municipality,
            RawRecord::new("50297", "Zaragoza", "50"),
            Some(pr),
        );
        let di = tree.insert(
            Level::District,
            RawRecord::new("5029710", "Distrito 10", "50297"),
            Some(mu),
        );
        (tree, mu, di)
    }

    #[test]
    fn test_path_and_url() {
        let (tree, mu, di) = sample_tree();

        assert_eq!(tree.path(mu), "ES/CA02/50/50297");
        assert_eq!(tree.path(di), "ES/CA02/50/50297/5029710");
        assert_eq!(
            tree.url(di),
            "http://results.test/ES/CA02/50/50297/5029710/info.json"
        );

        let root = tree.roots().next().unwrap();
        assert_eq!(root.path(), "ES");
        assert!(root.parent().is_none());
    }

    #[test]
    fn test_node_ref_relations() {
        let (tree, mu, di) = sample_tree();

        let district = tree.get(di);
        assert_eq!(district.level(), Level::District);
        assert_eq!(district.name(), "Distrito 10");
        assert_eq!(district.parent().unwrap().node_id(), mu);

        let children: Vec<_> = tree.get(mu).children().map(|c| c.id()).collect();
        assert_eq!(children, vec!["5029710"]);
    }

    #[test]
    fn test_counts_and_enumeration() {
        let (tree, _, _) = sample_tree();

        assert_eq!(tree.len(), 5);
        assert_eq!(tree.level_len(Level::Island), 0);
        assert_eq!(tree.nodes().count(), 5);
        assert!(!tree.is_empty());
    }

    #[test]
    fn test_template_requires_placeholder() {
        assert!(DivisionTree::new("http://results.test/info.json").is_err());
    }

    #[test]
    fn test_resolve_parent_falls_back_to_island() {
        let mut tree = DivisionTree::new(TEMPLATE).unwrap();
        let es = tree.insert(Level::Country, RawRecord::new("ES", "España", ""), None);
        let ca = tree.insert(Level::Region, RawRecord::new("CA05", "Canarias", "ES"), Some(es));
        let pr = tree.insert(Level::Province, RawRecord::new("38", "Tenerife", "CA05"), Some(ca));
        let isl = tree.insert(Level::Island, RawRecord::new("381", "La Palma", "38"), Some(pr));

        assert_eq!(tree.resolve_parent(Level::Municipality, "38"), Some(pr));
        assert_eq!(tree.resolve_parent(Level::Municipality, "381"), Some(isl));
        assert_eq!(tree.resolve_parent(Level::District, "381"), None);
        assert_eq!(tree.resolve_parent(Level::Country, "anything"), None);
    }

    #[test]
    fn test_raw_record_decoding() {
        let rows: Vec<RawRecord> = serde_json::from_str(
            r#"[["ES", "España", null], ["50", "Zaragoza", "CA02", "extra"], [28, "Madrid"]]"#,
        )
        .unwrap();

        assert_eq!(rows[0], RawRecord::new("ES", "España", ""));
        assert_eq!(rows[1], RawRecord::new("50", "Zaragoza", "CA02"));
        assert_eq!(rows[2], RawRecord::new("28", "Madrid", ""));

        let bad: Result<Vec<RawRecord>, _> = serde_json::from_str(r#"[{"id": "ES"}]"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_level_names() {
        assert_eq!(Level::Municipality.dataset_stem(), "municipio");
        assert_eq!(Level::Island.to_string(), Level::Island.name());
        assert_eq!(Level::Municipality.parent_levels(), &[Level::Province, Level::Island]);
    }
}
