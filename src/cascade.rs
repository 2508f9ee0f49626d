//! Sequential cascade and inheritance passes.
//!
//! Matching reads only selectors and tree structure, never declared styles,
//! so every node's match result can be computed against an immutable tree
//! and merged afterwards. The parallel layer relies on the same split.

use std::time::Instant;

use crate::debug::DebugLogger;
use crate::metrics::NodeTimings;
use crate::node::{NodeId, NodeKind, NodeRef, StyleMap, Tree};
use crate::perf::MetricsCollector;
use crate::rule_index::{RuleId, RuleIndex, RuleSet};

/// Inherited properties and their initial values. `None` means the property
/// has no fixed initial value and stays absent unless declared upstream.
pub const INHERITED_PROPERTIES: &[(&str, Option<&str>)] = &[
    ("font-family", None),
    ("font-size", None),
    ("font-style", Some("normal")),
    ("font-weight", Some("normal")),
    ("font-variant", Some("normal")),
    ("color", Some("#000000")),
    ("line-height", Some("1.2")),
    ("letter-spacing", Some("normal")),
    ("word-spacing", Some("normal")),
    ("text-align", Some("left")),
    ("text-indent", Some("0")),
    ("text-transform", Some("none")),
    ("white-space", Some("normal")),
    ("direction", Some("ltr")),
    ("list-style-type", Some("disc")),
    ("list-style-position", Some("outside")),
    ("list-style-image", None),
    ("border-collapse", Some("separate")),
    ("border-spacing", Some("2px")),
    ("caption-side", Some("top")),
    ("empty-cells", Some("show")),
    ("visibility", Some("visible")),
    ("cursor", None),
    ("quotes", None),
];

const NON_INHERITED_INITIAL: &[(&str, &str)] = &[
    ("display", "inline"),
    ("margin-top", "0"),
    ("margin-right", "0"),
    ("margin-bottom", "0"),
    ("margin-left", "0"),
    ("padding-top", "0"),
    ("padding-right", "0"),
    ("padding-bottom", "0"),
    ("padding-left", "0"),
    ("border-top-style", "none"),
    ("border-right-style", "none"),
    ("border-bottom-style", "none"),
    ("border-left-style", "none"),
    ("border-top-width", "medium"),
    ("border-right-width", "medium"),
    ("border-bottom-width", "medium"),
    ("border-left-width", "medium"),
    ("border-top-color", "currentcolor"),
    ("border-right-color", "currentcolor"),
    ("border-bottom-color", "currentcolor"),
    ("border-left-color", "currentcolor"),
    ("background-color", "transparent"),
    ("background-image", "none"),
    ("width", "auto"),
    ("height", "auto"),
    ("box-sizing", "content-box"),
    ("vertical-align", "baseline"),
    ("text-decoration", "none"),
    ("text-decoration-line", "none"),
    ("float", "none"),
    ("position", "static"),
    ("overflow", "visible"),
];

pub fn is_inherited(name: &str) -> bool {
    INHERITED_PROPERTIES.iter().any(|(prop, _)| *prop == name)
}

pub fn initial_value(name: &str) -> Option<&'static str> {
    if let Some((_, initial)) = INHERITED_PROPERTIES.iter().find(|(prop, _)| *prop == name) {
        return *initial;
    }
    NON_INHERITED_INITIAL
        .iter()
        .find(|(prop, _)| *prop == name)
        .map(|(_, value)| *value)
}

/// Matched rules for one node and the declarations they produce.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeCascade {
    /// Matching rules in cascade order (lowest precedence first).
    pub matched: Vec<RuleId>,
    /// Matched declarations folded in cascade order.
    pub declarations: StyleMap,
}

/// Work counters for a cascade run or a single chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CascadeStats {
    pub nodes: usize,
    pub elements: usize,
    pub candidates: usize,
    pub matches: usize,
}

impl CascadeStats {
    pub fn absorb(&mut self, other: &CascadeStats) {
        self.nodes += other.nodes;
        self.elements += other.elements;
        self.candidates += other.candidates;
        self.matches += other.matches;
    }
}

/// Match results for a run of nodes, in the order they were given.
#[derive(Debug, Clone, Default)]
pub(crate) struct MatchBatch {
    pub results: Vec<(NodeId, NodeCascade)>,
    pub stats: CascadeStats,
    pub timings: NodeTimings,
}

/// Steps 1 to 4 of the cascade for one node: candidates from the index,
/// filtered by the matcher, stably ordered by origin and specificity with
/// stylesheet order breaking ties, then folded so later entries overwrite.
pub fn cascade_node(rules: &RuleSet, index: &RuleIndex, node: NodeRef<'_>, stats: &mut CascadeStats) -> NodeCascade {
    stats.nodes += 1;
    if !node.is_element() {
        return NodeCascade::default();
    }
    stats.elements += 1;
    let candidates = index.candidates(node);
    stats.candidates += candidates.len();

    let mut matched: Vec<_> = candidates
        .into_iter()
        .filter_map(|id| rules.get(id))
        .filter(|rule| rule.matches(node))
        .collect();
    matched.sort_by_key(|rule| (rule.origin(), rule.specificity()));
    stats.matches += matched.len();

    let mut declarations = StyleMap::new();
    for rule in &matched {
        for (name, value) in rule.declarations() {
            declarations.insert(name.clone(), value.clone());
        }
    }
    NodeCascade {
        matched: matched.iter().map(|rule| rule.id()).collect(),
        declarations,
    }
}

/// Computes match results for `ids` against an immutable tree.
pub(crate) fn match_nodes(
    tree: &Tree,
    ids: &[NodeId],
    rules: &RuleSet,
    index: &RuleIndex,
    time_nodes: bool,
) -> MatchBatch {
    let mut batch = MatchBatch {
        results: Vec::with_capacity(ids.len()),
        ..MatchBatch::default()
    };
    for &id in ids {
        let start = time_nodes.then(Instant::now);
        let cascade = cascade_node(rules, index, tree.get(id), &mut batch.stats);
        if let Some(start) = start {
            batch.timings.record(start.elapsed().as_secs_f64() * 1000.0);
        }
        batch.results.push((id, cascade));
    }
    batch
}

/// Step 5: matched declarations land only where the node has nothing
/// declared yet, so inline declarations always win.
pub fn merge_declared(declared: &mut StyleMap, matched: StyleMap) {
    for (name, value) in matched {
        declared.entry(name).or_insert(value);
    }
}

pub(crate) fn merge_results(
    tree: &mut Tree,
    results: Vec<(NodeId, NodeCascade)>,
    debug: Option<&DebugLogger>,
) {
    for (id, cascade) in results {
        if let Some(debug) = debug {
            if tree.node(id).is_element() {
                let ids: Vec<usize> = cascade.matched.iter().map(|rule| rule.index()).collect();
                debug.log_node_matches(&tree.get(id).path(), &ids);
            }
        }
        merge_declared(&mut tree.node_mut(id).declared, cascade.declarations);
    }
}

/// Single-threaded cascade over the whole tree. This is the reference
/// behavior the parallel layer must reproduce.
pub fn apply_cascade(
    tree: &mut Tree,
    rules: &RuleSet,
    index: &RuleIndex,
    metrics: Option<&MetricsCollector>,
) -> CascadeStats {
    apply_cascade_with(tree, rules, index, metrics, None)
}

pub(crate) fn apply_cascade_with(
    tree: &mut Tree,
    rules: &RuleSet,
    index: &RuleIndex,
    metrics: Option<&MetricsCollector>,
    debug: Option<&DebugLogger>,
) -> CascadeStats {
    let ids = tree.preorder();
    let batch = match_nodes(tree, &ids, rules, index, metrics.is_some());
    if let Some(metrics) = metrics {
        metrics.record_nodes(&batch.timings);
    }
    merge_results(tree, batch.results, debug);
    batch.stats
}

/// Top-down inheritance. Writes every node's computed map exactly once.
pub fn apply_inheritance(tree: &mut Tree) {
    let empty = StyleMap::new();
    for id in tree.preorder() {
        let computed = {
            let node = tree.node(id);
            let parent = node.parent().map(|p| tree.node(p).computed()).unwrap_or(&empty);
            match node.kind() {
                NodeKind::Text(_) => parent.clone(),
                NodeKind::Element { .. } => compute_element(node.declared(), parent),
            }
        };
        tree.node_mut(id).computed = computed;
    }
}

fn compute_element(declared: &StyleMap, parent: &StyleMap) -> StyleMap {
    let mut computed = StyleMap::new();
    for (name, initial) in INHERITED_PROPERTIES {
        let value = match declared.get(*name) {
            Some(value) => resolve_keyword(name, value, parent),
            None => parent.get(*name).cloned().or_else(|| initial.map(str::to_string)),
        };
        if let Some(value) = value {
            computed.insert(name.to_string(), value);
        }
    }
    for (name, value) in declared {
        if is_inherited(name) {
            continue;
        }
        if let Some(value) = resolve_keyword(name, value, parent) {
            computed.insert(name.clone(), value);
        }
    }
    computed
}

/// Resolves `inherit`, `initial` and `unset`. Anything else passes through.
fn resolve_keyword(name: &str, value: &str, parent: &StyleMap) -> Option<String> {
    let from_parent = || {
        parent
            .get(name)
            .cloned()
            .or_else(|| initial_value(name).map(str::to_string))
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "inherit" => from_parent(),
        "initial" => initial_value(name).map(str::to_string),
        "unset" if is_inherited(name) => from_parent(),
        "unset" => initial_value(name).map(str::to_string),
        _ => Some(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule_index::Origin;

    fn run(tree: &mut Tree, css: &str) -> CascadeStats {
        let mut rules = RuleSet::new();
        rules.add_stylesheet(css, Origin::Author);
        let index = RuleIndex::build(&rules);
        let stats = apply_cascade(tree, &rules, &index, None);
        apply_inheritance(tree);
        stats
    }

    fn single_div(class: &str, style: Option<&str>) -> (Tree, NodeId) {
        let mut tree = Tree::new();
        let body = tree.add_element(None, "body");
        let div = tree.add_element(Some(body), "div");
        tree.set_attribute(div, "class", class);
        if let Some(style) = style {
            tree.set_attribute(div, "style", style);
        }
        (tree, div)
    }

    fn computed<'a>(tree: &'a Tree, id: NodeId, name: &str) -> Option<&'a str> {
        tree.node(id).computed().get(name).map(String::as_str)
    }

    #[test]
    fn class_beats_type() {
        let (mut tree, div) = single_div("x", None);
        run(&mut tree, "div {color:red} .x{color:blue}");
        assert_eq!(computed(&tree, div, "color"), Some("blue"));
    }

    #[test]
    fn type_after_class_still_loses() {
        let (mut tree, div) = single_div("x", None);
        run(&mut tree, ".x{color:blue} div {color:red}");
        assert_eq!(computed(&tree, div, "color"), Some("blue"));
    }

    #[test]
    fn inline_beats_everything() {
        let (mut tree, div) = single_div("x", Some("color:green"));
        run(&mut tree, "div {color:red} .x{color:blue} #y.x.x div.x { color: black }");
        assert_eq!(computed(&tree, div, "color"), Some("green"));
    }

    #[test]
    fn equal_specificity_later_rule_wins() {
        let (mut tree, div) = single_div("a b", None);
        run(&mut tree, ".a { color: red; margin-top: 1px } .b { color: blue }");
        assert_eq!(computed(&tree, div, "color"), Some("blue"));
        assert_eq!(computed(&tree, div, "margin-top"), Some("1px"));
    }

    #[test]
    fn group_specificity_is_the_max() {
        let (mut tree, div) = single_div("x", None);
        run(&mut tree, "div.x, p { color: red } .x { color: blue }");
        assert_eq!(computed(&tree, div, "color"), Some("red"));
    }

    #[test]
    fn inheritance_copies_only_inherited_properties() {
        let mut tree = Tree::new();
        let body = tree.add_element(None, "body");
        let section = tree.add_element(Some(body), "section");
        let span = tree.add_element(Some(section), "span");
        let text = tree.add_text(span, "hi");
        run(
            &mut tree,
            "body { color: navy; margin-top: 5px } section { font-family: Georgia; padding-left: 2px }",
        );
        assert_eq!(computed(&tree, span, "color"), Some("navy"));
        assert_eq!(computed(&tree, span, "font-family"), Some("Georgia"));
        assert_eq!(computed(&tree, span, "margin-top"), None);
        assert_eq!(computed(&tree, span, "padding-left"), None);
        assert_eq!(computed(&tree, section, "text-align"), Some("left"));
        assert_eq!(tree.node(text).computed(), tree.node(span).computed());
        assert!(tree.node(span).declared().is_empty());
    }

    #[test]
    fn inherit_and_initial_keywords() {
        let mut tree = Tree::new();
        let body = tree.add_element(None, "body");
        let div = tree.add_element(Some(body), "div");
        let p = tree.add_element(Some(div), "p");
        tree.set_attribute(div, "style", "margin-left: 3px; color: initial");
        tree.set_attribute(p, "style", "margin-left: inherit");
        run(&mut tree, "body { color: red }");
        assert_eq!(computed(&tree, div, "color"), Some("#000000"));
        assert_eq!(computed(&tree, p, "margin-left"), Some("3px"));
        assert_eq!(computed(&tree, p, "color"), Some("#000000"));
    }

    #[test]
    fn matched_rules_are_reported_in_cascade_order() {
        let (tree, div) = single_div("x", None);
        let mut rules = RuleSet::new();
        rules.add_stylesheet(".x { color: blue } div { color: red } * { color: gray }", Origin::Author);
        let index = RuleIndex::build(&rules);
        let mut stats = CascadeStats::default();
        let cascade = cascade_node(&rules, &index, tree.get(div), &mut stats);
        let order: Vec<usize> = cascade.matched.iter().map(|id| id.index()).collect();
        assert_eq!(order, vec![2, 1, 0]);
        assert_eq!(stats.matches, 3);
    }

    #[test]
    fn stats_count_elements_and_text() {
        let mut tree = Tree::new();
        let body = tree.add_element(None, "body");
        tree.add_text(body, "x");
        let stats = run(&mut tree, "body { color: red }");
        assert_eq!(stats.nodes, 2);
        assert_eq!(stats.elements, 1);
        assert_eq!(stats.matches, 1);
    }

    #[test]
    fn wide_lists_use_sibling_positions() {
        let mut tree = Tree::new();
        let list = tree.add_element(None, "ul");
        let items: Vec<NodeId> = (0..20_000)
            .map(|i| {
                let li = tree.add_element(Some(list), "li");
                if i % 1000 == 0 {
                    tree.add_text(list, " ");
                }
                li
            })
            .collect();
        let css = "li + li { margin-top: 1px } li:nth-child(2n) { color: red } \
                   li:last-of-type { color: blue } li:first-child { margin-top: 9px }";
        let stats = run(&mut tree, css);
        assert_eq!(stats.elements, 20_001);

        assert_eq!(computed(&tree, items[0], "margin-top"), Some("9px"));
        assert_eq!(computed(&tree, items[0], "color"), Some("#000000"));
        assert_eq!(computed(&tree, items[1], "margin-top"), Some("1px"));
        assert_eq!(computed(&tree, items[1], "color"), Some("red"));
        assert_eq!(computed(&tree, items[10_000], "color"), Some("#000000"));
        assert_eq!(computed(&tree, items[19_999], "color"), Some("blue"));
    }
}
