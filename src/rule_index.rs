use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::debug::DebugLogger;
use crate::declaration::{SkippedRule, parse_stylesheet};
use crate::node::{NodeRef, StyleMap};
use crate::selector::{SelectorList, Specificity};

/// Position of a rule in its [`RuleSet`]. Ordering follows stylesheet order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuleId(usize);

impl RuleId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Where a rule came from. User-agent rules lose to every author rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Origin {
    UserAgent,
    Author,
}

#[derive(Debug, Clone)]
pub struct Rule {
    id: RuleId,
    selector_text: String,
    selectors: SelectorList,
    declarations: StyleMap,
    specificity: Specificity,
    origin: Origin,
}

impl Rule {
    pub fn id(&self) -> RuleId {
        self.id
    }

    pub fn selector_text(&self) -> &str {
        &self.selector_text
    }

    pub fn selectors(&self) -> &SelectorList {
        &self.selectors
    }

    pub fn declarations(&self) -> &StyleMap {
        &self.declarations
    }

    pub fn specificity(&self) -> Specificity {
        self.specificity
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn matches(&self, node: NodeRef<'_>) -> bool {
        self.selectors.matches(node)
    }

    /// Cascade sort key: origin, then specificity, then source order.
    pub fn cascade_key(&self) -> (Origin, Specificity, RuleId) {
        (self.origin, self.specificity, self.id)
    }
}

const USER_AGENT_CSS: &str = r#"
body { font-size: 16px; line-height: 1.2; color: #000; margin: 8px; }
h1 { font-size: 2em; font-weight: bold; margin-top: 0.67em; margin-bottom: 0.67em; }
h2 { font-size: 1.5em; font-weight: bold; margin-top: 0.83em; margin-bottom: 0.83em; }
h3 { font-size: 1.17em; font-weight: bold; margin-top: 1em; margin-bottom: 1em; }
h4 { font-size: 1em; font-weight: bold; margin-top: 1.33em; margin-bottom: 1.33em; }
h5 { font-size: 0.83em; font-weight: bold; margin-top: 1.67em; margin-bottom: 1.67em; }
h6 { font-size: 0.67em; font-weight: bold; margin-top: 2.33em; margin-bottom: 2.33em; }
p { margin-top: 1em; margin-bottom: 1em; }
b, strong, th { font-weight: bold; }
i, em, cite, var, dfn { font-style: italic; }
u, ins { text-decoration: underline; }
s, strike, del { text-decoration: line-through; }
sub { vertical-align: sub; font-size: smaller; }
sup { vertical-align: super; font-size: smaller; }
pre, code, kbd, samp, tt { font-family: monospace; white-space: pre; }
span, a, em, strong, i, b, u, small, label, code, sub, sup { display: inline; }
img { display: inline-block; }
div, p, section, article, header, footer, aside, nav, main, blockquote,
h1, h2, h3, h4, h5, h6, ul, ol, dl, dt, dd, pre, hr { display: block; }
li { display: list-item; }
ul, ol { padding-left: 40px; margin-top: 1em; margin-bottom: 1em; }
table { display: table; border-collapse: separate; border-spacing: 2px; }
thead { display: table-header-group; }
tbody { display: table-row-group; }
tr { display: table-row; }
td, th { display: table-cell; padding: 1px; vertical-align: middle; }
th { text-align: center; }
"#;

/// Ordered rules from one or more stylesheets.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
    skipped: Vec<SkippedRule>,
    unparsed_selectors: usize,
    used_fallback: bool,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A ruleset seeded with the built-in user-agent defaults.
    pub fn with_user_agent_defaults() -> Self {
        let mut rules = Self::new();
        rules.add_stylesheet(USER_AGENT_CSS, Origin::UserAgent);
        rules
    }

    /// Appends every rule of `css` after the existing ones. Returns the
    /// number of rules added.
    pub fn add_stylesheet(&mut self, css: &str, origin: Origin) -> usize {
        self.add_stylesheet_with(css, origin, None)
    }

    pub(crate) fn add_stylesheet_with(
        &mut self,
        css: &str,
        origin: Origin,
        debug: Option<&DebugLogger>,
    ) -> usize {
        let parsed = parse_stylesheet(css);
        self.used_fallback |= parsed.used_fallback;
        if let Some(debug) = debug {
            for skipped in &parsed.skipped {
                debug.log_skipped_rule(&skipped.prelude, skipped.reason.as_str());
            }
        }
        for skipped in &parsed.skipped {
            log::debug!("skipped rule `{}`: {}", skipped.prelude, skipped.reason.as_str());
        }
        self.skipped.extend(parsed.skipped);

        let before = self.rules.len();
        for source in parsed.rules {
            let added = self.add_rule(&source.selector, source.declarations, origin);
            if let Some(debug) = debug {
                let specificity = added
                    .map(|id| self.rules[id.0].specificity)
                    .unwrap_or_default();
                debug.log_rule(&source.selector, added.is_some(), specificity);
            }
        }
        self.rules.len() - before
    }

    /// Adds a single rule. Returns `None` (and counts the selector as
    /// unparsed) when no member of the selector group parses or when there
    /// are no declarations.
    pub fn add_rule(&mut self, selector: &str, declarations: StyleMap, origin: Origin) -> Option<RuleId> {
        let Some(selectors) = SelectorList::parse(selector) else {
            log::debug!("unparsed selector `{selector}`");
            self.unparsed_selectors += 1;
            return None;
        };
        if selectors.unparsed() > 0 {
            log::debug!("dropped {} member(s) of `{selector}`", selectors.unparsed());
            self.unparsed_selectors += selectors.unparsed();
        }
        if declarations.is_empty() {
            return None;
        }
        let id = RuleId(self.rules.len());
        let specificity = selectors.specificity();
        self.rules.push(Rule {
            id,
            selector_text: selector.trim().to_string(),
            selectors,
            declarations,
            specificity,
            origin,
        });
        Some(id)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn get(&self, id: RuleId) -> Option<&Rule> {
        self.rules.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn skipped(&self) -> &[SkippedRule] {
        &self.skipped
    }

    pub fn unparsed_selectors(&self) -> usize {
        self.unparsed_selectors
    }

    /// True when any stylesheet needed the permissive fallback tokenizer.
    pub fn used_fallback(&self) -> bool {
        self.used_fallback
    }

    /// SHA-256 over origins, selectors and declarations in order. Two
    /// rulesets with equal fingerprints produce identical indexes.
    pub fn fingerprint(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        for rule in &self.rules {
            hasher.update([match rule.origin {
                Origin::UserAgent => 0u8,
                Origin::Author => 1u8,
            }]);
            hasher.update(rule.selector_text.as_bytes());
            hasher.update([0u8]);
            for (name, value) in &rule.declarations {
                hasher.update(name.as_bytes());
                hasher.update([b':']);
                hasher.update(value.as_bytes());
                hasher.update([0u8]);
            }
            hasher.update([0xffu8]);
        }
        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        out
    }
}

/// Candidate lookup over a [`RuleSet`].
///
/// Each selector-group member is filed under one feature of its subject
/// compound: its id if it has one, else its first class, else its type.
/// Members without such a feature land in the wildcard bucket (single
/// compound) or the complex bucket (with combinators), which are returned
/// for every element. A rule can only match a node whose features include
/// the key it was filed under, so the candidate set is always a superset of
/// the matching set.
#[derive(Debug, Clone, Default)]
pub struct RuleIndex {
    by_id: HashMap<String, Vec<RuleId>>,
    by_class: HashMap<String, Vec<RuleId>>,
    by_tag: HashMap<String, Vec<RuleId>>,
    wildcard: Vec<RuleId>,
    complex: Vec<RuleId>,
    rule_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexStats {
    pub ids: usize,
    pub classes: usize,
    pub tags: usize,
    pub wildcard: usize,
    pub complex: usize,
}

impl RuleIndex {
    pub fn build(rules: &RuleSet) -> Self {
        let mut index = RuleIndex {
            rule_count: rules.len(),
            ..Self::default()
        };
        for rule in rules.rules() {
            for member in rule.selectors().members() {
                let subject = member.subject();
                let bucket = if let Some(id) = subject.ids().first() {
                    index.by_id.entry(id.clone()).or_default()
                } else if let Some(class) = subject.classes().first() {
                    index.by_class.entry(class.clone()).or_default()
                } else if let Some(tag) = subject.tag() {
                    index.by_tag.entry(tag.to_string()).or_default()
                } else if member.is_complex() {
                    &mut index.complex
                } else {
                    &mut index.wildcard
                };
                if bucket.last() != Some(&rule.id()) {
                    bucket.push(rule.id());
                }
            }
        }
        index
    }

    /// Rules that may match `node`, in stylesheet order without duplicates.
    /// Text nodes have no candidates.
    pub fn candidates(&self, node: NodeRef<'_>) -> Vec<RuleId> {
        let Some(tag) = node.tag() else {
            return Vec::new();
        };
        let mut out: Vec<RuleId> = Vec::new();
        out.extend_from_slice(&self.wildcard);
        out.extend_from_slice(&self.complex);
        if let Some(rules) = self.by_tag.get(tag) {
            out.extend_from_slice(rules);
        }
        if let Some(id) = node.element_id() {
            if let Some(rules) = self.by_id.get(id) {
                out.extend_from_slice(rules);
            }
        }
        for class in node.classes().iter() {
            if let Some(rules) = self.by_class.get(class) {
                out.extend_from_slice(rules);
            }
        }
        out.sort_unstable();
        out.dedup();
        out
    }

    pub fn rule_count(&self) -> usize {
        self.rule_count
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            ids: self.by_id.values().map(Vec::len).sum(),
            classes: self.by_class.values().map(Vec::len).sum(),
            tags: self.by_tag.values().map(Vec::len).sum(),
            wildcard: self.wildcard.len(),
            complex: self.complex.len(),
        }
    }
}
