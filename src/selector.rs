use std::fmt;

use crate::declaration::split_top_level;
use crate::node::NodeRef;

/// (ids, classes + attributes + pseudo-classes, types + pseudo-elements).
/// Compares lexicographically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Specificity(pub u16, pub u16, pub u16);

impl Specificity {
    pub fn as_tuple(self) -> (u16, u16, u16) {
        (self.0, self.1, self.2)
    }

    fn add(self, other: Specificity) -> Specificity {
        Specificity(
            self.0.saturating_add(other.0),
            self.1.saturating_add(other.1),
            self.2.saturating_add(other.2),
        )
    }
}

impl fmt::Display for Specificity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{},{})", self.0, self.1, self.2)
    }
}

/// One compound selector such as `div.note#main[lang|=en]:first-child`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompoundSelector {
    pub(crate) tag: Option<String>,
    pub(crate) ids: Vec<String>,
    pub(crate) classes: Vec<String>,
    pub(crate) attrs: Vec<AttrSelector>,
    pub(crate) pseudos: Vec<PseudoClass>,
    pub(crate) pseudo_element: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PseudoClass {
    Root,
    FirstChild,
    LastChild,
    OnlyChild,
    FirstOfType,
    LastOfType,
    NthChild { a: i32, b: i32 },
    NthLastChild { a: i32, b: i32 },
    NthOfType { a: i32, b: i32 },
    Not(Box<CompoundSelector>),
    /// Needs interaction state. Never matches a static document.
    Dynamic(String),
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AttrSelector {
    name: String,
    op: AttrOp,
    value: Option<String>,
    case_insensitive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttrOp {
    Exists,
    Equals,
    Includes,
    DashMatch,
    Prefix,
    Suffix,
    Substring,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    Descendant,
    Child,
    AdjacentSibling,
    GeneralSibling,
}

/// Compound selectors joined by combinators, leftmost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplexSelector {
    parts: Vec<CompoundSelector>,
    combinators: Vec<Combinator>,
}

/// A comma-separated group. Members that failed to parse are dropped and
/// counted in `unparsed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorList {
    members: Vec<ComplexSelector>,
    unparsed: usize,
}

const DYNAMIC_PSEUDO_CLASSES: &[&str] = &[
    "hover",
    "focus",
    "focus-within",
    "focus-visible",
    "active",
    "visited",
    "link",
    "any-link",
    "enabled",
    "disabled",
    "checked",
    "target",
];

const LEGACY_PSEUDO_ELEMENTS: &[&str] = &["before", "after", "first-line", "first-letter"];

/// Parses and matches in one step. Unparseable selectors never match.
pub fn matches(selector: &str, node: NodeRef<'_>) -> bool {
    SelectorList::parse(selector)
        .map(|list| list.matches(node))
        .unwrap_or(false)
}

/// Specificity of a selector group: the maximum over its members. Members
/// that fail to parse count as (0,0,0).
pub fn calculate_specificity(selector: &str) -> Specificity {
    SelectorList::parse(selector)
        .map(|list| list.specificity())
        .unwrap_or_default()
}

impl SelectorList {
    /// Returns `None` when no member parses.
    pub fn parse(text: &str) -> Option<SelectorList> {
        let mut members = Vec::new();
        let mut unparsed = 0usize;
        for raw in split_top_level(text, ',') {
            if raw.trim().is_empty() {
                unparsed += 1;
                continue;
            }
            match parse_complex_selector(raw) {
                Some(member) => members.push(member),
                None => unparsed += 1,
            }
        }
        if members.is_empty() {
            None
        } else {
            Some(SelectorList { members, unparsed })
        }
    }

    pub fn matches(&self, node: NodeRef<'_>) -> bool {
        node.is_element() && self.members.iter().any(|member| member.matches(node))
    }

    pub fn specificity(&self) -> Specificity {
        self.members
            .iter()
            .map(ComplexSelector::specificity)
            .max()
            .unwrap_or_default()
    }

    pub fn members(&self) -> &[ComplexSelector] {
        &self.members
    }

    pub fn unparsed(&self) -> usize {
        self.unparsed
    }
}

fn next_candidate(combinator: Combinator, node: NodeRef<'_>) -> Option<NodeRef<'_>> {
    match combinator {
        Combinator::Child | Combinator::Descendant => node.parent(),
        Combinator::AdjacentSibling | Combinator::GeneralSibling => node.prev_element_sibling(),
    }
}

/// Outcome of matching the parts up to some index. The failure kinds tell
/// the caller how far back it has to go before retrying, which keeps deep
/// trees from backtracking over every ancestor for every part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchOutcome {
    Matched,
    /// Retry from the nearest `~` combinator to the right.
    RetrySibling,
    /// Retry from the nearest descendant combinator to the right.
    RetryAncestor,
    /// No remaining placement can match.
    Never,
}

impl ComplexSelector {
    pub fn matches(&self, node: NodeRef<'_>) -> bool {
        if self.parts.is_empty() {
            return false;
        }
        self.matches_at(self.parts.len() - 1, node) == MatchOutcome::Matched
    }

    /// Rightmost-first: `parts[idx]` must match `node` and everything to its
    /// left must match some ancestor or preceding sibling as the combinator
    /// requires.
    fn matches_at(&self, idx: usize, node: NodeRef<'_>) -> MatchOutcome {
        if !self.parts[idx].matches(node) {
            return MatchOutcome::RetrySibling;
        }
        if idx == 0 {
            return MatchOutcome::Matched;
        }
        let combinator = self.combinators[idx - 1];
        let exhausted = match combinator {
            Combinator::Child | Combinator::Descendant => MatchOutcome::Never,
            Combinator::AdjacentSibling | Combinator::GeneralSibling => MatchOutcome::RetryAncestor,
        };

        let mut candidate = next_candidate(combinator, node);
        while let Some(current) = candidate {
            let outcome = self.matches_at(idx - 1, current);
            match (outcome, combinator) {
                (MatchOutcome::Matched | MatchOutcome::Never, _) | (_, Combinator::AdjacentSibling) => return outcome,
                (_, Combinator::Child) => return MatchOutcome::RetryAncestor,
                (MatchOutcome::RetryAncestor, Combinator::GeneralSibling) => return outcome,
                _ => {}
            }
            candidate = next_candidate(combinator, current);
        }
        exhausted
    }

    pub fn specificity(&self) -> Specificity {
        self.parts
            .iter()
            .fold(Specificity::default(), |acc, part| acc.add(part.specificity()))
    }

    /// The compound the selector is about (the rightmost one).
    pub fn subject(&self) -> &CompoundSelector {
        &self.parts[self.parts.len() - 1]
    }

    pub fn is_complex(&self) -> bool {
        !self.combinators.is_empty()
    }

    pub fn combinators(&self) -> &[Combinator] {
        &self.combinators
    }
}

impl CompoundSelector {
    pub fn matches(&self, node: NodeRef<'_>) -> bool {
        let Some(tag) = node.tag() else {
            return false;
        };
        if self.pseudo_element.is_some() {
            return false;
        }
        if let Some(expected) = &self.tag {
            if expected != "*" && !expected.eq_ignore_ascii_case(tag) {
                return false;
            }
        }
        if !self.ids.is_empty() {
            let Some(id) = node.element_id() else {
                return false;
            };
            if self.ids.iter().any(|expected| expected != id) {
                return false;
            }
        }
        let classes = node.classes();
        if !self.classes.iter().all(|class| classes.contains(class)) {
            return false;
        }
        if !self.attrs.iter().all(|attr| attr.matches(node)) {
            return false;
        }
        self.pseudos.iter().all(|pseudo| pseudo.matches(node))
    }

    pub fn specificity(&self) -> Specificity {
        let mut spec = Specificity(
            self.ids.len() as u16,
            (self.classes.len() + self.attrs.len()) as u16,
            0,
        );
        if self.tag.as_deref().is_some_and(|tag| tag != "*") {
            spec.2 += 1;
        }
        if self.pseudo_element.is_some() {
            spec.2 += 1;
        }
        for pseudo in &self.pseudos {
            spec = match pseudo {
                PseudoClass::Not(inner) => spec.add(inner.specificity()),
                _ => spec.add(Specificity(0, 1, 0)),
            };
        }
        spec
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref().filter(|tag| *tag != "*")
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    fn is_empty(&self) -> bool {
        self.tag.is_none()
            && self.ids.is_empty()
            && self.classes.is_empty()
            && self.attrs.is_empty()
            && self.pseudos.is_empty()
            && self.pseudo_element.is_none()
    }
}

impl PseudoClass {
    fn matches(&self, node: NodeRef<'_>) -> bool {
        match self {
            PseudoClass::Root => node.is_root(),
            PseudoClass::FirstChild => node.element_index() == 0,
            PseudoClass::LastChild => node.element_index() + 1 == node.element_sibling_count(),
            PseudoClass::OnlyChild => node.element_sibling_count() == 1,
            PseudoClass::FirstOfType => node.type_position().0 == 1,
            PseudoClass::LastOfType => {
                let (pos, count) = node.type_position();
                pos == count
            }
            PseudoClass::NthChild { a, b } => nth_matches(*a, *b, node.element_index() + 1),
            PseudoClass::NthLastChild { a, b } => {
                let from_end = node.element_sibling_count() - node.element_index();
                nth_matches(*a, *b, from_end)
            }
            PseudoClass::NthOfType { a, b } => nth_matches(*a, *b, node.type_position().0),
            PseudoClass::Not(inner) => !inner.matches(node),
            PseudoClass::Dynamic(_) | PseudoClass::Unsupported(_) => false,
        }
    }
}

/// True when `position` is `a*n + b` for some `n >= 0`. Arithmetic is
/// widened to i64, so no formula can overflow.
fn nth_matches(a: i32, b: i32, position: usize) -> bool {
    let Ok(idx) = i64::try_from(position) else {
        return false;
    };
    let (a, b) = (i64::from(a), i64::from(b));
    let Some(diff) = idx.checked_sub(b) else {
        return false;
    };
    if a == 0 {
        return diff == 0;
    }
    diff % a == 0 && diff / a >= 0
}

impl AttrSelector {
    fn matches(&self, node: NodeRef<'_>) -> bool {
        let Some(actual) = node.attribute(&self.name) else {
            return false;
        };
        if self.op == AttrOp::Exists {
            return true;
        }
        let Some(expected) = self.value.as_deref() else {
            return false;
        };
        let (actual, expected) = if self.case_insensitive {
            (actual.to_lowercase(), expected.to_lowercase())
        } else {
            (actual.to_string(), expected.to_string())
        };
        // An empty value never matches the word and substring operators.
        if expected.is_empty() && matches!(self.op, AttrOp::Includes | AttrOp::Prefix | AttrOp::Suffix | AttrOp::Substring) {
            return false;
        }
        match self.op {
            AttrOp::Exists => true,
            AttrOp::Equals => actual == expected,
            AttrOp::Includes => actual.split_ascii_whitespace().any(|part| part == expected),
            AttrOp::DashMatch => actual == expected || actual.starts_with(&format!("{expected}-")),
            AttrOp::Prefix => actual.starts_with(&expected),
            AttrOp::Suffix => actual.ends_with(&expected),
            AttrOp::Substring => actual.contains(&expected),
        }
    }
}

fn parse_complex_selector(selector: &str) -> Option<ComplexSelector> {
    let selector = selector.trim();
    if selector.is_empty() {
        return None;
    }
    let mut parts: Vec<CompoundSelector> = Vec::new();
    let mut combinators: Vec<Combinator> = Vec::new();
    let mut buf = String::new();
    let mut pending: Option<Combinator> = None;
    let mut depth = 0usize;
    let mut in_quote: Option<char> = None;

    let flush = |buf: &mut String,
                 parts: &mut Vec<CompoundSelector>,
                 combinators: &mut Vec<Combinator>,
                 pending: &mut Option<Combinator>|
     -> Option<()> {
        let trimmed = buf.trim();
        if trimmed.is_empty() {
            buf.clear();
            return Some(());
        }
        let compound = parse_compound_selector(trimmed)?;
        if !parts.is_empty() {
            combinators.push(pending.take().unwrap_or(Combinator::Descendant));
        } else if pending.is_some() {
            return None;
        }
        parts.push(compound);
        buf.clear();
        Some(())
    };

    for ch in selector.chars() {
        if let Some(q) = in_quote {
            if ch == q {
                in_quote = None;
            }
            buf.push(ch);
            continue;
        }
        if depth > 0 {
            match ch {
                '(' | '[' => depth += 1,
                ')' | ']' => depth -= 1,
                '"' | '\'' => in_quote = Some(ch),
                _ => {}
            }
            buf.push(ch);
            continue;
        }
        let explicit = match ch {
            '>' => Some(Combinator::Child),
            '+' => Some(Combinator::AdjacentSibling),
            '~' => Some(Combinator::GeneralSibling),
            _ => None,
        };
        if let Some(combinator) = explicit {
            flush(&mut buf, &mut parts, &mut combinators, &mut pending)?;
            if matches!(pending, Some(c) if c != Combinator::Descendant) {
                return None;
            }
            pending = Some(combinator);
            continue;
        }
        if ch.is_whitespace() {
            if !buf.trim().is_empty() {
                flush(&mut buf, &mut parts, &mut combinators, &mut pending)?;
                pending = Some(Combinator::Descendant);
            }
            continue;
        }
        match ch {
            '(' | '[' => depth += 1,
            '"' | '\'' => in_quote = Some(ch),
            _ => {}
        }
        buf.push(ch);
    }
    if depth > 0 || in_quote.is_some() {
        return None;
    }
    flush(&mut buf, &mut parts, &mut combinators, &mut pending)?;
    if parts.is_empty() || matches!(pending, Some(c) if c != Combinator::Descendant) {
        return None;
    }

    Some(ComplexSelector { parts, combinators })
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_' || !c.is_ascii()
}

/// Reads an identifier starting at `*pos`, honoring backslash escapes.
fn read_ident(chars: &[char], pos: &mut usize) -> String {
    let mut out = String::new();
    while *pos < chars.len() {
        let c = chars[*pos];
        if c == '\\' && *pos + 1 < chars.len() {
            out.push(chars[*pos + 1]);
            *pos += 2;
            continue;
        }
        if !is_ident_char(c) {
            break;
        }
        out.push(c);
        *pos += 1;
    }
    out
}

/// Reads up to the bracket closing the one just consumed, skipping quoted
/// text. Leaves `*pos` after the closing bracket.
fn read_balanced(chars: &[char], pos: &mut usize, open: char, close: char) -> Option<String> {
    let mut depth = 1usize;
    let mut in_quote: Option<char> = None;
    let mut out = String::new();
    while *pos < chars.len() {
        let c = chars[*pos];
        *pos += 1;
        if let Some(q) = in_quote {
            if c == q {
                in_quote = None;
            }
            out.push(c);
            continue;
        }
        if c == '"' || c == '\'' {
            in_quote = Some(c);
        } else if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth == 0 {
                return Some(out);
            }
        }
        out.push(c);
    }
    None
}

fn parse_compound_selector(text: &str) -> Option<CompoundSelector> {
    let chars: Vec<char> = text.trim().chars().collect();
    let mut compound = CompoundSelector::default();
    let mut pos = 0usize;

    if chars.first() == Some(&'*') {
        compound.tag = Some("*".to_string());
        pos = 1;
    } else if chars.first().is_some_and(|c| is_ident_char(*c) || *c == '\\') {
        let tag = read_ident(&chars, &mut pos);
        compound.tag = Some(tag.to_ascii_lowercase());
    }

    while pos < chars.len() {
        let c = chars[pos];
        pos += 1;
        match c {
            '#' => {
                let id = read_ident(&chars, &mut pos);
                if id.is_empty() {
                    return None;
                }
                compound.ids.push(id);
            }
            '.' => {
                let class = read_ident(&chars, &mut pos);
                if class.is_empty() {
                    return None;
                }
                compound.classes.push(class);
            }
            '[' => {
                let inner = read_balanced(&chars, &mut pos, '[', ']')?;
                compound.attrs.push(parse_attr_selector(&inner)?);
            }
            ':' => {
                if compound.pseudo_element.is_some() {
                    return None;
                }
                let double = chars.get(pos) == Some(&':');
                if double {
                    pos += 1;
                }
                let name = read_ident(&chars, &mut pos).to_ascii_lowercase();
                if name.is_empty() {
                    return None;
                }
                let args = if chars.get(pos) == Some(&'(') {
                    pos += 1;
                    Some(read_balanced(&chars, &mut pos, '(', ')')?)
                } else {
                    None
                };
                if double || LEGACY_PSEUDO_ELEMENTS.contains(&name.as_str()) {
                    compound.pseudo_element = Some(name);
                } else {
                    compound.pseudos.push(parse_pseudo_class(&name, args.as_deref())?);
                }
            }
            _ => return None,
        }
    }

    if compound.is_empty() {
        return None;
    }
    Some(compound)
}

fn parse_attr_selector(raw: &str) -> Option<AttrSelector> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let ops = [
        ("~=", AttrOp::Includes),
        ("|=", AttrOp::DashMatch),
        ("^=", AttrOp::Prefix),
        ("$=", AttrOp::Suffix),
        ("*=", AttrOp::Substring),
        ("=", AttrOp::Equals),
    ];
    let split = raw.find('=').map(|eq| {
        let op_start = if eq > 0 {
            let prev = &raw[eq - 1..eq];
            if ops.iter().any(|(token, _)| token.len() == 2 && token.starts_with(prev)) {
                eq - 1
            } else {
                eq
            }
        } else {
            eq
        };
        let token = &raw[op_start..=eq];
        let op = ops
            .iter()
            .find(|(t, _)| *t == token)
            .map(|(_, op)| *op)
            .unwrap_or(AttrOp::Equals);
        (op_start, eq + 1, op)
    });

    let Some((name_end, value_start, op)) = split else {
        let name = raw.to_ascii_lowercase();
        if !name.chars().all(is_ident_char) {
            return None;
        }
        return Some(AttrSelector {
            name,
            op: AttrOp::Exists,
            value: None,
            case_insensitive: false,
        });
    };

    let name = raw[..name_end].trim().to_ascii_lowercase();
    if name.is_empty() || !name.chars().all(is_ident_char) {
        return None;
    }
    let rest = raw[value_start..].trim();
    let (value, flags) = match rest.chars().next() {
        Some(q @ ('"' | '\'')) => {
            let body = &rest[1..];
            let end = body.find(q)?;
            (body[..end].to_string(), body[end + 1..].trim())
        }
        _ => {
            let mut split = rest.splitn(2, char::is_whitespace);
            let value = split.next().unwrap_or("").to_string();
            if value.is_empty() {
                return None;
            }
            (value, split.next().unwrap_or("").trim())
        }
    };
    let case_insensitive = match flags {
        "" | "s" | "S" => false,
        "i" | "I" => true,
        _ => return None,
    };
    Some(AttrSelector {
        name,
        op,
        value: Some(value),
        case_insensitive,
    })
}

fn parse_pseudo_class(name: &str, args: Option<&str>) -> Option<PseudoClass> {
    if DYNAMIC_PSEUDO_CLASSES.contains(&name) {
        return Some(PseudoClass::Dynamic(name.to_string()));
    }
    let pseudo = match (name, args) {
        ("root", None) => PseudoClass::Root,
        ("first-child", None) => PseudoClass::FirstChild,
        ("last-child", None) => PseudoClass::LastChild,
        ("only-child", None) => PseudoClass::OnlyChild,
        ("first-of-type", None) => PseudoClass::FirstOfType,
        ("last-of-type", None) => PseudoClass::LastOfType,
        ("nth-child", Some(args)) => {
            let (a, b) = parse_nth_formula(args)?;
            PseudoClass::NthChild { a, b }
        }
        ("nth-last-child", Some(args)) => {
            let (a, b) = parse_nth_formula(args)?;
            PseudoClass::NthLastChild { a, b }
        }
        ("nth-of-type", Some(args)) => {
            let (a, b) = parse_nth_formula(args)?;
            PseudoClass::NthOfType { a, b }
        }
        ("not", Some(args)) => PseudoClass::Not(Box::new(parse_compound_selector(args)?)),
        _ => PseudoClass::Unsupported(name.to_string()),
    };
    Some(pseudo)
}

fn parse_nth_formula(raw: &str) -> Option<(i32, i32)> {
    let s: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase();
    match s.as_str() {
        "" => return None,
        "even" => return Some((2, 0)),
        "odd" => return Some((2, 1)),
        _ => {}
    }
    let Some(n_pos) = s.find('n') else {
        return Some((0, s.parse::<i32>().ok()?));
    };
    let (a_str, b_str) = s.split_at(n_pos);
    let b_str = &b_str[1..];
    let a = match a_str {
        "" | "+" => 1,
        "-" => -1,
        _ => a_str.parse::<i32>().ok()?,
    };
    let b = if b_str.is_empty() {
        0
    } else {
        b_str.strip_prefix('+').unwrap_or(b_str).parse::<i32>().ok()?
    };
    Some((a, b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeId, Tree};

    fn element(tree: &mut Tree, parent: NodeId, tag: &str, attrs: &[(&str, &str)]) -> NodeId {
        let id = tree.add_element(Some(parent), tag);
        for (name, value) in attrs {
            tree.set_attribute(id, name, value);
        }
        id
    }

    struct Fixture {
        tree: Tree,
        body: NodeId,
        section: NodeId,
        items: Vec<NodeId>,
        link: NodeId,
    }

    // <html><body><section id=main class="wide">
    //   <p class=a>..</p><p class="a b">..</p><div lang=en-US><a href=https://x.org/doc.pdf></a></div><p class=c>
    // </section></body></html>
    fn fixture() -> Fixture {
        let mut tree = Tree::new();
        let html = tree.add_element(None, "html");
        let body = element(&mut tree, html, "body", &[]);
        let section = element(&mut tree, body, "section", &[("id", "main"), ("class", "wide")]);
        let p1 = element(&mut tree, section, "p", &[("class", "a")]);
        tree.add_text(section, " ");
        let p2 = element(&mut tree, section, "p", &[("class", "a b")]);
        let div = element(&mut tree, section, "div", &[("lang", "en-US")]);
        let link = element(&mut tree, div, "a", &[("href", "https://x.org/doc.pdf")]);
        let p3 = element(&mut tree, section, "p", &[("class", "c")]);
        Fixture {
            tree,
            body,
            section,
            items: vec![p1, p2, div, p3],
            link,
        }
    }

    fn check(f: &Fixture, selector: &str, node: NodeId) -> bool {
        matches(selector, f.tree.get(node))
    }

    #[test]
    fn specificity_examples() {
        assert_eq!(calculate_specificity("div"), Specificity(0, 0, 1));
        assert_eq!(calculate_specificity(".foo"), Specificity(0, 1, 0));
        assert_eq!(calculate_specificity("#bar"), Specificity(1, 0, 0));
        assert_eq!(calculate_specificity("div.foo#bar"), Specificity(1, 1, 1));
        assert_eq!(calculate_specificity("a, div.x"), Specificity(0, 1, 1));
    }

    #[test]
    fn specificity_ignores_combinators_and_counts_each_part_once() {
        assert_eq!(calculate_specificity("ul > li + li"), Specificity(0, 0, 3));
        assert_eq!(calculate_specificity("#nav .item a[href]"), Specificity(1, 2, 1));
        assert_eq!(calculate_specificity("li:first-child::before"), Specificity(0, 1, 2));
        assert_eq!(calculate_specificity("p:not(.x)"), Specificity(0, 1, 1));
        assert_eq!(calculate_specificity("*"), Specificity(0, 0, 0));
        assert_eq!(calculate_specificity("a[title=\"x.y#z\"]"), Specificity(0, 1, 1));
        assert_eq!(calculate_specificity("!!"), Specificity(0, 0, 0));
    }

    #[test]
    fn simple_selectors() {
        let f = fixture();
        assert!(check(&f, "section", f.section));
        assert!(check(&f, "SECTION", f.section));
        assert!(check(&f, "#main", f.section));
        assert!(!check(&f, "#MAIN", f.section));
        assert!(check(&f, ".a.b", f.items[1]));
        assert!(!check(&f, ".a.b", f.items[0]));
        assert!(check(&f, "*", f.items[0]));
        assert!(check(&f, "p, .zzz", f.items[0]));
    }

    #[test]
    fn combinators() {
        let f = fixture();
        assert!(check(&f, "body p", f.items[0]));
        assert!(check(&f, "body > section > p", f.items[0]));
        assert!(!check(&f, "body > p", f.items[0]));
        assert!(check(&f, "p + p", f.items[1]));
        assert!(!check(&f, "p + p", f.items[0]));
        assert!(check(&f, ".a ~ .c", f.items[3]));
        assert!(!check(&f, "div + .a", f.items[3]));
        assert!(check(&f, "div + .c", f.items[3]));
        assert!(check(&f, "#main div a", f.link));
        assert!(check(&f, "section>div>a", f.link));
    }

    #[test]
    fn descendant_matching_backtracks() {
        let f = fixture();
        // The nearest `.wide`-free ancestor is `div`; the match has to keep
        // looking past it for `section.wide`.
        assert!(check(&f, "section.wide > div a", f.link));
        assert!(check(&f, "html .wide a", f.link));
        assert!(!check(&f, "p a", f.link));
    }

    #[test]
    fn attribute_operators() {
        let f = fixture();
        assert!(check(&f, "[lang]", f.items[2]));
        assert!(check(&f, "[lang|=en]", f.items[2]));
        assert!(check(&f, "[lang=\"en-us\" i]", f.items[2]));
        assert!(!check(&f, "[lang=\"en-us\"]", f.items[2]));
        assert!(check(&f, "a[href^=https]", f.link));
        assert!(check(&f, "a[href$='.pdf']", f.link));
        assert!(check(&f, "a[href*=\"x.org\"]", f.link));
        assert!(check(&f, "[class~=b]", f.items[1]));
        assert!(!check(&f, "[class~=a b]", f.items[1]));
    }

    #[test]
    fn structural_pseudo_classes_skip_text_nodes() {
        let f = fixture();
        assert!(check(&f, "p:first-child", f.items[0]));
        assert!(check(&f, ":last-child", f.items[3]));
        assert!(check(&f, "p:nth-child(even)", f.items[1]));
        assert!(check(&f, "p:nth-child(odd)", f.items[0]));
        assert!(check(&f, ":nth-child(2n+1)", f.items[2]));
        assert!(check(&f, "p:nth-of-type(3)", f.items[3]));
        assert!(check(&f, "p:last-of-type", f.items[3]));
        assert!(check(&f, "a:only-child", f.link));
        assert!(check(&f, ":nth-last-child(1)", f.items[3]));
        assert!(check(&f, "html:root", f.tree.root().unwrap()));
        assert!(!check(&f, ":root", f.body));
        assert!(check(&f, "p:not(.a)", f.items[3]));
    }

    #[test]
    fn dynamic_and_invalid_selectors_never_match() {
        let f = fixture();
        assert!(!check(&f, "a:hover", f.link));
        assert!(!check(&f, "a::before", f.link));
        assert!(!check(&f, "a:made-up", f.link));
        assert!(!check(&f, "> a", f.link));
        assert!(!check(&f, "a >", f.link));
        assert!(!check(&f, "a[href", f.link));
        assert!(SelectorList::parse("").is_none());
    }

    #[test]
    fn group_keeps_valid_members() {
        let list = SelectorList::parse("p, [[, .c").unwrap();
        assert_eq!(list.members().len(), 2);
        assert_eq!(list.unparsed(), 1);
    }

    #[test]
    fn nth_formulas() {
        assert_eq!(parse_nth_formula("even"), Some((2, 0)));
        assert_eq!(parse_nth_formula(" -n + 3 "), Some((-1, 3)));
        assert_eq!(parse_nth_formula("3"), Some((0, 3)));
        assert!(nth_matches(-1, 3, 2));
        assert!(!nth_matches(-1, 3, 4));
        assert!(nth_matches(2, 1, 5));
    }

    #[test]
    fn extreme_nth_formulas_do_not_overflow() {
        let f = fixture();
        assert!(check(&f, "p:nth-child(n-2147483648)", f.items[0]));
        assert!(check(&f, "p:nth-child(-n+2147483647)", f.items[0]));
        assert!(!check(&f, "p:nth-child(2147483647n-2147483648)", f.items[1]));
        assert!(!check(&f, "p:nth-last-child(-2147483648n+1)", f.items[0]));
        assert!(nth_matches(i32::MIN, 1, 1));
        assert!(!nth_matches(i32::MIN, i32::MAX, 1));
        assert!(!nth_matches(-1, i32::MIN, usize::MAX));
    }

    #[test]
    fn empty_attribute_values() {
        let mut tree = Tree::new();
        let html = tree.add_element(None, "html");
        let empty = element(&mut tree, html, "div", &[("title", ""), ("lang", "-x")]);
        let full = element(&mut tree, html, "div", &[("title", "a b")]);
        let node = |id| tree.get(id);

        assert!(matches("[title=\"\"]", node(empty)));
        assert!(matches("[title='']", node(empty)));
        assert!(!matches("[title=\"\"]", node(full)));
        assert!(matches("[lang|=\"\"]", node(empty)));
        for op in ["~=", "^=", "$=", "*="] {
            assert!(!matches(&format!("[title{op}\"\"]"), node(empty)), "{op}");
            assert!(!matches(&format!("[title{op}\"\"]"), node(full)), "{op}");
        }
        assert!(SelectorList::parse("[title=]").is_none());
    }

    #[test]
    fn deep_descendant_chains_stop_early() {
        let mut tree = Tree::new();
        let html = tree.add_element(None, "html");
        let mut current = element(&mut tree, html, "body", &[]);
        for _ in 0..200 {
            current = element(&mut tree, current, "div", &[]);
        }
        let deepest = tree.get(current);
        assert!(!matches("span div div div div div div div div div div", deepest));
        assert!(!matches("body > div div div div div div div div p div", deepest));
        assert!(matches("html div div div div div div div div div div", deepest));
        assert!(matches("body > div div div div div div div div div div", deepest));
    }

    #[test]
    fn sibling_and_ancestor_retries_combine() {
        // <body><div class=a><p/><p class=b><span/></p></div><div class=c><span id=t/></div></body>
        let mut tree = Tree::new();
        let html = tree.add_element(None, "html");
        let body = element(&mut tree, html, "body", &[]);
        let a = element(&mut tree, body, "div", &[("class", "a")]);
        element(&mut tree, a, "p", &[]);
        let pb = element(&mut tree, a, "p", &[("class", "b")]);
        element(&mut tree, pb, "span", &[]);
        let c = element(&mut tree, body, "div", &[("class", "c")]);
        let target = element(&mut tree, c, "span", &[("id", "t")]);
        let t = tree.get(target);

        assert!(matches(".a ~ .c > span", t));
        assert!(matches("body > .a + div span", t));
        assert!(matches("html .a ~ div > #t", t));
        assert!(!matches(".b ~ .c span", t));
        assert!(!matches(".a > span", t));
        assert!(!matches("p + .c span", t));
    }
}
