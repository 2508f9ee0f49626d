use std::collections::{BTreeMap, HashMap};

use crate::declaration::parse_inline;

/// Property name to raw value. Ordered so iteration and serialization are
/// deterministic.
pub type StyleMap = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Element { tag: String },
    Text(String),
}

/// Attribute names in insertion order, unique by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeMap {
    entries: Vec<(String, String)>,
}

impl AttributeMap {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(key, _)| *key == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Class tokens split once, in first-seen order without duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassList(Vec<String>);

impl ClassList {
    pub fn parse(raw: &str) -> Self {
        let mut list = ClassList::default();
        for token in raw.split_ascii_whitespace() {
            list.insert(token);
        }
        list
    }

    pub fn insert(&mut self, token: &str) {
        if !token.is_empty() && !self.contains(token) {
            self.0.push(token.to_string());
        }
    }

    pub fn contains(&self, token: &str) -> bool {
        self.0.iter().any(|c| c == token)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) attributes: AttributeMap,
    pub(crate) classes: ClassList,
    pub(crate) declared: StyleMap,
    pub(crate) computed: StyleMap,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    // Sibling positions, fixed when the node is appended.
    child_index: usize,
    element_index: usize,
    type_index: usize,
    prev_element: Option<NodeId>,
    // Child bookkeeping, kept up to date as children are appended.
    element_children: usize,
    last_element_child: Option<NodeId>,
    type_counts: HashMap<String, usize>,
}

impl Node {
    fn new(kind: NodeKind, parent: Option<NodeId>) -> Self {
        Self {
            kind,
            attributes: AttributeMap::default(),
            classes: ClassList::default(),
            declared: StyleMap::new(),
            computed: StyleMap::new(),
            parent,
            children: Vec::new(),
            child_index: 0,
            element_index: 0,
            type_index: 0,
            prev_element: None,
            element_children: 0,
            last_element_child: None,
            type_counts: HashMap::new(),
        }
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn tag(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Element { tag } => Some(tag),
            NodeKind::Text(_) => None,
        }
    }

    pub fn is_element(&self) -> bool {
        matches!(self.kind, NodeKind::Element { .. })
    }

    pub fn attributes(&self) -> &AttributeMap {
        &self.attributes
    }

    pub fn classes(&self) -> &ClassList {
        &self.classes
    }

    pub fn declared(&self) -> &StyleMap {
        &self.declared
    }

    pub fn computed(&self) -> &StyleMap {
        &self.computed
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

/// Arena that owns every node. Parent links are plain ids.
#[derive(Debug, Clone, Default)]
pub struct Tree {
    nodes: Vec<Node>,
    root: Option<NodeId>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an element under `parent`, or makes it the root when `parent`
    /// is `None`. Tags are stored lowercase.
    ///
    /// Panics if a second root is added.
    pub fn add_element(&mut self, parent: Option<NodeId>, tag: &str) -> NodeId {
        self.push(
            parent,
            NodeKind::Element {
                tag: tag.to_ascii_lowercase(),
            },
        )
    }

    /// Appends a text run under `parent`.
    pub fn add_text(&mut self, parent: NodeId, text: &str) -> NodeId {
        self.push(Some(parent), NodeKind::Text(text.to_string()))
    }

    fn push(&mut self, parent: Option<NodeId>, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        let mut node = Node::new(kind, parent);
        match parent {
            Some(parent_id) => {
                let parent_node = &mut self.nodes[parent_id.0];
                node.child_index = parent_node.children.len();
                if let NodeKind::Element { tag } = &node.kind {
                    node.element_index = parent_node.element_children;
                    node.prev_element = parent_node.last_element_child;
                    let count = parent_node.type_counts.entry(tag.clone()).or_insert(0);
                    node.type_index = *count;
                    *count += 1;
                    parent_node.element_children += 1;
                    parent_node.last_element_child = Some(id);
                }
                parent_node.children.push(id);
            }
            None => {
                assert!(self.root.is_none(), "tree already has a root");
                self.root = Some(id);
            }
        }
        self.nodes.push(node);
        id
    }

    /// Sets an attribute. `class` also refreshes the class list and `style`
    /// is parsed into the declared map as inline declarations.
    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) {
        let name = name.to_ascii_lowercase();
        let node = &mut self.nodes[id.0];
        match name.as_str() {
            "class" => node.classes = ClassList::parse(value),
            "style" => node.declared.extend(parse_inline(value)),
            _ => {}
        }
        node.attributes.insert(name, value);
    }

    pub fn set_inline_style(&mut self, id: NodeId, text: &str) {
        self.nodes[id.0].declared.extend(parse_inline(text));
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Panics if `id` belongs to another, larger tree.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    /// Panics on use if `id` belongs to another, larger tree.
    pub fn get(&self, id: NodeId) -> NodeRef<'_> {
        NodeRef { tree: self, id }
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(NodeId)
    }

    /// Document order, parents before children.
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let Some(root) = self.root else {
            return out;
        };
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            out.push(id);
            for child in self.nodes[id.0].children.iter().rev() {
                stack.push(*child);
            }
        }
        out
    }

    /// Element nodes in document order.
    pub fn elements(&self) -> Vec<NodeId> {
        self.preorder()
            .into_iter()
            .filter(|id| self.nodes[id.0].is_element())
            .collect()
    }

    pub fn find_by_tag(&self, tag: &str) -> Vec<NodeId> {
        self.preorder()
            .into_iter()
            .filter(|id| self.nodes[id.0].tag() == Some(tag))
            .collect()
    }

    pub fn find_by_path(&self, path: &str) -> Option<NodeId> {
        let paths = self.paths();
        self.preorder()
            .into_iter()
            .find(|id| paths[id.0] == path)
    }

    /// Every node's [`NodeRef::path`], indexed by `NodeId::index`. Built in
    /// one top-down pass.
    pub fn paths(&self) -> Vec<String> {
        let mut paths = vec![String::new(); self.nodes.len()];
        for id in self.preorder() {
            let node = self.get(id);
            let parent = match self.nodes[id.0].parent {
                Some(parent) => paths[parent.0].as_str(),
                None => "",
            };
            let path = format!("{parent}/{}", node.segment());
            paths[id.0] = path;
        }
        paths
    }
}

/// Read-only view of one node plus its tree context. Used by the
/// selector matcher on the sequential path and inside workers.
#[derive(Clone, Copy)]
pub struct NodeRef<'a> {
    tree: &'a Tree,
    id: NodeId,
}

impl<'a> NodeRef<'a> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn tree(&self) -> &'a Tree {
        self.tree
    }

    pub fn node(&self) -> &'a Node {
        self.tree.node(self.id)
    }

    pub fn tag(&self) -> Option<&'a str> {
        self.node().tag()
    }

    pub fn is_element(&self) -> bool {
        self.node().is_element()
    }

    pub fn attribute(&self, name: &str) -> Option<&'a str> {
        self.node().attributes.get(name)
    }

    pub fn element_id(&self) -> Option<&'a str> {
        self.attribute("id")
    }

    pub fn classes(&self) -> &'a ClassList {
        &self.node().classes
    }

    pub fn declared(&self) -> &'a StyleMap {
        &self.node().declared
    }

    pub fn parent(&self) -> Option<NodeRef<'a>> {
        self.node().parent.map(|id| self.tree.get(id))
    }

    pub fn is_root(&self) -> bool {
        self.node().parent.is_none()
    }

    pub fn children(self) -> impl Iterator<Item = NodeRef<'a>> + 'a {
        let tree = self.tree;
        self.node().children.iter().map(move |id| tree.get(*id))
    }

    pub fn ancestors(self) -> impl Iterator<Item = NodeRef<'a>> + 'a {
        std::iter::successors(self.parent(), |node| node.parent())
    }

    /// The nearest preceding element sibling.
    pub fn prev_element_sibling(&self) -> Option<NodeRef<'a>> {
        self.node().prev_element.map(|id| self.tree.get(id))
    }

    /// Preceding element siblings, nearest first.
    pub fn preceding_element_siblings(self) -> impl Iterator<Item = NodeRef<'a>> + 'a {
        std::iter::successors(self.prev_element_sibling(), |node| node.prev_element_sibling())
    }

    /// Zero-based position among element siblings.
    pub fn element_index(&self) -> usize {
        self.node().element_index
    }

    pub fn element_sibling_count(&self) -> usize {
        self.parent()
            .map(|parent| parent.node().element_children)
            .unwrap_or(1)
    }

    /// One-based (position, count) among element siblings sharing this tag.
    pub fn type_position(&self) -> (usize, usize) {
        let count = match (self.parent(), self.tag()) {
            (Some(parent), Some(tag)) => parent.node().type_counts.get(tag).copied().unwrap_or(1),
            _ => 1,
        };
        (self.node().type_index + 1, count)
    }

    /// Stable key: `/html` for the root, then `/{tag}[{element index}]` per
    /// level, e.g. `/html/body[1]/div[0]`. Text nodes use `#text[{child index}]`.
    pub fn path(&self) -> String {
        let mut segments: Vec<String> = vec![self.segment()];
        segments.extend(self.ancestors().map(|node| node.segment()));
        segments.reverse();
        format!("/{}", segments.join("/"))
    }

    fn segment(&self) -> String {
        match (self.is_root(), self.tag()) {
            (true, Some(tag)) => tag.to_string(),
            (true, None) => "#text".to_string(),
            (false, Some(tag)) => format!("{tag}[{}]", self.element_index()),
            (false, None) => format!("#text[{}]", self.node().child_index),
        }
    }
}

impl std::fmt::Debug for NodeRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRef")
            .field("id", &self.id)
            .field("tag", &self.tag())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Tree, NodeId, NodeId, NodeId) {
        let mut tree = Tree::new();
        let html = tree.add_element(None, "HTML");
        let body = tree.add_element(Some(html), "body");
        let _ = tree.add_text(body, "lead");
        let first = tree.add_element(Some(body), "p");
        let second = tree.add_element(Some(body), "div");
        tree.set_attribute(second, "class", "a b a");
        tree.set_attribute(second, "style", "color: red; margin: 1px");
        (tree, first, second, body)
    }

    #[test]
    fn class_list_is_deduplicated() {
        let (tree, _, second, _) = sample();
        let classes: Vec<&str> = tree.node(second).classes().iter().collect();
        assert_eq!(classes, ["a", "b"]);
    }

    #[test]
    fn style_attribute_populates_declared_longhands() {
        let (tree, _, second, _) = sample();
        let declared = tree.node(second).declared();
        assert_eq!(declared.get("color").map(String::as_str), Some("red"));
        assert_eq!(declared.get("margin-left").map(String::as_str), Some("1px"));
        assert!(tree.node(second).computed().is_empty());
    }

    #[test]
    fn paths_count_element_siblings_only() {
        let (tree, first, second, _) = sample();
        assert_eq!(tree.get(first).path(), "/html/body[0]/p[0]");
        assert_eq!(tree.get(second).path(), "/html/body[0]/div[1]");
        assert_eq!(tree.find_by_path("/html/body[0]/div[1]"), Some(second));
    }

    #[test]
    fn sibling_queries_skip_text() {
        let (tree, first, second, _) = sample();
        let prev: Vec<NodeId> = tree
            .get(second)
            .preceding_element_siblings()
            .map(|n| n.id())
            .collect();
        assert_eq!(prev, [first]);
        assert_eq!(tree.get(first).element_index(), 0);
        assert_eq!(tree.get(second).element_sibling_count(), 2);
    }

    #[test]
    fn preorder_visits_parents_first() {
        let (tree, first, second, body) = sample();
        let order = tree.preorder();
        let pos = |id: NodeId| order.iter().position(|x| *x == id).unwrap();
        assert!(pos(body) < pos(first));
        assert!(pos(first) < pos(second));
        assert_eq!(tree.elements().len(), 4);
    }

    #[test]
    fn sibling_positions_are_recorded_on_append() {
        let mut tree = Tree::new();
        let root = tree.add_element(None, "ul");
        let a = tree.add_element(Some(root), "li");
        let text = tree.add_text(root, "x");
        let b = tree.add_element(Some(root), "p");
        let c = tree.add_element(Some(root), "li");

        assert_eq!(tree.get(c).element_index(), 2);
        assert_eq!(tree.get(c).element_sibling_count(), 3);
        assert_eq!(tree.get(a).type_position(), (1, 2));
        assert_eq!(tree.get(c).type_position(), (2, 2));
        assert_eq!(tree.get(b).type_position(), (1, 1));
        assert_eq!(tree.get(root).type_position(), (1, 1));
        assert_eq!(tree.get(c).prev_element_sibling().map(|n| n.id()), Some(b));
        assert!(tree.get(a).prev_element_sibling().is_none());
        assert_eq!(tree.get(text).path(), "/ul/#text[1]");
    }

    #[test]
    fn paths_pass_agrees_with_single_lookups() {
        let (tree, _, second, _) = sample();
        let paths = tree.paths();
        for id in tree.ids() {
            assert_eq!(paths[id.index()], tree.get(id).path());
        }
        assert_eq!(paths[second.index()], "/html/body[0]/div[1]");
    }

    #[test]
    fn wide_parents_keep_exact_positions() {
        let mut tree = Tree::new();
        let root = tree.add_element(None, "ul");
        let items: Vec<NodeId> = (0..20_000).map(|_| tree.add_element(Some(root), "li")).collect();
        let last = tree.get(items[19_999]);
        assert_eq!(last.element_index(), 19_999);
        assert_eq!(last.type_position(), (20_000, 20_000));
        assert_eq!(last.preceding_element_siblings().count(), 19_999);
        let paths = tree.paths();
        assert_eq!(paths[items[12_345].index()], "/ul/li[12345]");
        assert_eq!(tree.find_by_path("/ul/li[19999]"), Some(items[19_999]));
    }
}
