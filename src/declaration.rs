//! Declaration blocks and stylesheets.
//!
//! The primary pass uses `cssparser` and keeps each value as the raw text the
//! author wrote. When the primary pass recovers nothing from input that
//! clearly holds rules or declarations, a permissive splitter takes over.
//! Shorthands are expanded here so the rest of the crate only sees longhands.

use cssparser::AtRuleParser as CssAtRuleParser;
use cssparser::BasicParseErrorKind;
use cssparser::CowRcStr;
use cssparser::DeclarationParser as CssDeclarationParser;
use cssparser::ParseError;
use cssparser::Parser;
use cssparser::ParserInput;
use cssparser::ParserState;
use cssparser::QualifiedRuleParser as CssQualifiedRuleParser;
use cssparser::RuleBodyItemParser as CssRuleBodyItemParser;
use cssparser::RuleBodyParser as CssRuleBodyParser;
use cssparser::StyleSheetParser;

use crate::node::StyleMap;
use crate::types::SIDES;
use crate::units::parse_color;

/// One `(selector, declaration-map)` pair, in stylesheet order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRule {
    pub selector: String,
    pub declarations: StyleMap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Every selector in the group needs a dynamic state or a pseudo-element.
    DynamicSelector,
    AtRule(String),
    MediaNotApplicable,
    Malformed,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::DynamicSelector => "dynamic-selector",
            SkipReason::AtRule(_) => "at-rule",
            SkipReason::MediaNotApplicable => "media-not-applicable",
            SkipReason::Malformed => "malformed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRule {
    pub prelude: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedStylesheet {
    pub rules: Vec<SourceRule>,
    pub skipped: Vec<SkippedRule>,
    pub used_fallback: bool,
}

const DYNAMIC_PSEUDOS: &[&str] = &[
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

const PSEUDO_ELEMENTS: &[&str] = &[
    "before",
    "after",
    "first-line",
    "first-letter",
    "marker",
    "placeholder",
    "selection",
    "backdrop",
];

const BORDER_STYLES: &[&str] = &[
    "none", "hidden", "dotted", "dashed", "solid", "double", "groove", "ridge", "inset", "outset",
];

pub fn parse_stylesheet(css: &str) -> ParsedStylesheet {
    let mut top = TopLevelParser::default();
    let mut raw_rules: Vec<RawRule> = Vec::new();
    let mut malformed: Vec<SkippedRule> = Vec::new();
    {
        let mut input = ParserInput::new(css);
        let mut parser = Parser::new(&mut input);
        for item in StyleSheetParser::new(&mut parser, &mut top) {
            match item {
                Ok(rules) => raw_rules.extend(rules),
                Err((_, slice)) => malformed.push(SkippedRule {
                    prelude: prelude_excerpt(slice),
                    reason: SkipReason::Malformed,
                }),
            }
        }
    }
    top.skipped.append(&mut malformed);

    let mut sheet = ParsedStylesheet {
        skipped: top.skipped,
        ..ParsedStylesheet::default()
    };
    if raw_rules.is_empty() && looks_like_rules(css) {
        log::debug!("stylesheet primary pass found no rules; using permissive splitter");
        raw_rules = permissive_rules(css);
        sheet.used_fallback = true;
    }

    for raw in raw_rules {
        let prelude = strip_comments(&raw.prelude);
        let Some(selector) = static_selector(&prelude) else {
            sheet.skipped.push(SkippedRule {
                prelude: prelude.trim().to_string(),
                reason: SkipReason::DynamicSelector,
            });
            continue;
        };
        let mut declarations = StyleMap::new();
        for (name, value) in raw.declarations {
            insert_expanded(&mut declarations, &name, &value);
        }
        sheet.rules.push(SourceRule {
            selector,
            declarations,
        });
    }
    sheet
}

/// Parses a `style` attribute body into longhand declarations.
pub fn parse_inline(text: &str) -> StyleMap {
    let mut raw = {
        let mut input = ParserInput::new(text);
        let mut parser = Parser::new(&mut input);
        parse_declarations_from_block(&mut parser)
    };
    if raw.is_empty() && text.contains(':') {
        raw = permissive_declarations(text);
    }
    let mut out = StyleMap::new();
    for (name, value) in raw {
        insert_expanded(&mut out, &name, &value);
    }
    out
}

fn insert_expanded(map: &mut StyleMap, name: &str, value: &str) {
    for (longhand, longhand_value) in expand_shorthand(name, value) {
        map.insert(longhand, longhand_value);
    }
}

struct RawRule {
    prelude: String,
    declarations: Vec<(String, String)>,
}

/// Drops group members that can never apply to a static snapshot. Returns the
/// remaining members joined by `", "`, or `None` when nothing is left.
pub fn static_selector(prelude: &str) -> Option<String> {
    let members: Vec<&str> = split_top_level(prelude, ',')
        .into_iter()
        .map(str::trim)
        .filter(|member| !member.is_empty() && !needs_dynamic_state(member))
        .collect();
    if members.is_empty() {
        None
    } else {
        Some(members.join(", "))
    }
}

fn needs_dynamic_state(selector: &str) -> bool {
    let chars: Vec<char> = selector.chars().collect();
    let mut in_quote: Option<char> = None;
    let mut bracket = 0usize;
    let mut i = 0usize;
    while i < chars.len() {
        let ch = chars[i];
        if let Some(q) = in_quote {
            if ch == q {
                in_quote = None;
            }
            i += 1;
            continue;
        }
        match ch {
            '"' | '\'' => in_quote = Some(ch),
            '[' => bracket += 1,
            ']' => bracket = bracket.saturating_sub(1),
            ':' if bracket == 0 => {
                let double = chars.get(i + 1) == Some(&':');
                let start = if double { i + 2 } else { i + 1 };
                let mut end = start;
                while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '-') {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect::<String>().to_ascii_lowercase();
                if double || PSEUDO_ELEMENTS.contains(&name.as_str()) {
                    return true;
                }
                if DYNAMIC_PSEUDOS.contains(&name.as_str()) {
                    return true;
                }
                i = end;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    false
}

/// True when a media query list can apply to a printed snapshot.
/// Feature expressions are not evaluated.
pub fn media_applies(query_list: &str) -> bool {
    let query_list = query_list.trim();
    if query_list.is_empty() {
        return true;
    }
    split_top_level(query_list, ',').into_iter().any(|query| {
        let query = query.trim().to_ascii_lowercase();
        let (negated, rest) = match query.strip_prefix("not ") {
            Some(rest) => (true, rest.trim_start()),
            None => (false, query.as_str()),
        };
        let rest = rest.strip_prefix("only ").unwrap_or(rest).trim_start();
        let media_type = if rest.starts_with('(') {
            "all"
        } else {
            rest.split_whitespace().next().unwrap_or("all")
        };
        let matches = matches!(media_type, "all" | "print");
        matches != negated
    })
}

/// Expands a declaration into longhands. Unknown properties pass through.
pub fn expand_shorthand(name: &str, value: &str) -> Vec<(String, String)> {
    let tokens = split_value_tokens(value);
    if let [only] = tokens.as_slice() {
        let keyword = only.to_ascii_lowercase();
        if CSS_WIDE_KEYWORDS.contains(&keyword.as_str()) {
            if let Some(longhands) = shorthand_longhands(name) {
                return longhands.into_iter().map(|n| (n, keyword.clone())).collect();
            }
        }
    }
    match name {
        "margin" | "padding" => fan_out(&tokens, |side| format!("{name}-{side}")),
        "border-width" | "border-style" | "border-color" => {
            let kind = &name["border-".len()..];
            fan_out(&tokens, |side| format!("border-{side}-{kind}"))
        }
        "border" => {
            let parts = classify_border(&tokens);
            SIDES
                .iter()
                .flat_map(|side| border_side_longhands(side, &parts))
                .collect()
        }
        "border-top" | "border-right" | "border-bottom" | "border-left" => {
            let side = &name["border-".len()..];
            border_side_longhands(side, &classify_border(&tokens))
        }
        "border-radius" => {
            let horizontal = value.split('/').next().unwrap_or(value);
            let corners = ["top-left", "top-right", "bottom-right", "bottom-left"];
            let tokens = split_value_tokens(horizontal);
            match crate::types::Edges::from_fanout(&tokens) {
                Some(edges) => {
                    let values = [edges.top, edges.right, edges.bottom, edges.left];
                    corners
                        .iter()
                        .zip(values)
                        .map(|(corner, v)| (format!("border-{corner}-radius"), v))
                        .collect()
                }
                None => Vec::new(),
            }
        }
        "gap" => match tokens.as_slice() {
            [] => Vec::new(),
            [both] => vec![
                ("row-gap".to_string(), both.clone()),
                ("column-gap".to_string(), both.clone()),
            ],
            [row, column, ..] => vec![
                ("row-gap".to_string(), row.clone()),
                ("column-gap".to_string(), column.clone()),
            ],
        },
        "background" => vec![("background-color".to_string(), background_color(&tokens))],
        "font" => expand_font(&tokens),
        "list-style" => expand_list_style(&tokens),
        _ => vec![(name.to_string(), value.to_string())],
    }
}

const CSS_WIDE_KEYWORDS: &[&str] = &["inherit", "initial", "unset"];

/// Longhands a shorthand expands to, or `None` for anything else.
fn shorthand_longhands(name: &str) -> Option<Vec<String>> {
    let longhands = match name {
        "margin" | "padding" => per_side(|side| format!("{name}-{side}")),
        "border-width" | "border-style" | "border-color" => {
            let kind = &name["border-".len()..];
            per_side(|side| format!("border-{side}-{kind}"))
        }
        "border" => SIDES
            .iter()
            .flat_map(|side| ["width", "style", "color"].map(|kind| format!("border-{side}-{kind}")))
            .collect(),
        "border-top" | "border-right" | "border-bottom" | "border-left" => ["width", "style", "color"]
            .iter()
            .map(|kind| format!("{name}-{kind}"))
            .collect(),
        "border-radius" => ["top-left", "top-right", "bottom-right", "bottom-left"]
            .iter()
            .map(|corner| format!("border-{corner}-radius"))
            .collect(),
        "gap" => vec!["row-gap".to_string(), "column-gap".to_string()],
        "background" => vec!["background-color".to_string()],
        "font" => ["font-style", "font-variant", "font-weight", "font-size", "line-height", "font-family"]
            .iter()
            .map(|n| n.to_string())
            .collect(),
        "list-style" => ["list-style-type", "list-style-position", "list-style-image"]
            .iter()
            .map(|n| n.to_string())
            .collect(),
        _ => return None,
    };
    Some(longhands)
}

fn per_side(name_for: impl Fn(&str) -> String) -> Vec<String> {
    SIDES.iter().map(|side| name_for(side)).collect()
}

fn fan_out(tokens: &[String], name_for: impl Fn(&str) -> String) -> Vec<(String, String)> {
    let Some(edges) = crate::types::Edges::from_fanout(tokens) else {
        return Vec::new();
    };
    let values = [edges.top, edges.right, edges.bottom, edges.left];
    SIDES
        .iter()
        .zip(values)
        .map(|(side, v)| (name_for(side), v))
        .collect()
}

struct BorderParts {
    width: String,
    style: String,
    color: String,
}

fn classify_border(tokens: &[String]) -> BorderParts {
    let mut parts = BorderParts {
        width: "medium".to_string(),
        style: "none".to_string(),
        color: "currentcolor".to_string(),
    };
    for token in tokens {
        let lower = token.to_ascii_lowercase();
        if BORDER_STYLES.contains(&lower.as_str()) {
            parts.style = lower;
        } else if matches!(lower.as_str(), "thin" | "medium" | "thick") || looks_numeric(&lower) {
            parts.width = token.clone();
        } else {
            parts.color = token.clone();
        }
    }
    parts
}

fn border_side_longhands(side: &str, parts: &BorderParts) -> Vec<(String, String)> {
    vec![
        (format!("border-{side}-width"), parts.width.clone()),
        (format!("border-{side}-style"), parts.style.clone()),
        (format!("border-{side}-color"), parts.color.clone()),
    ]
}

fn looks_numeric(token: &str) -> bool {
    let body = token.strip_prefix(['+', '-']).unwrap_or(token);
    body.chars()
        .next()
        .map(|c| c.is_ascii_digit() || c == '.')
        .unwrap_or(false)
}

fn is_gradient(token: &str) -> bool {
    let lower = token.to_ascii_lowercase();
    ["linear-gradient(", "radial-gradient(", "conic-gradient(", "repeating-linear-gradient(", "repeating-radial-gradient("]
        .iter()
        .any(|prefix| lower.starts_with(prefix))
}

fn is_color_token(token: &str) -> bool {
    token.eq_ignore_ascii_case("currentcolor") || parse_color(token).is_some()
}

/// Picks the single solid color a `background` shorthand stands for. A
/// gradient contributes its first color stop.
fn background_color(tokens: &[String]) -> String {
    for token in tokens {
        if is_gradient(token) {
            let Some(open) = token.find('(') else {
                continue;
            };
            let inner = &token[open + 1..];
            let inner = inner.strip_suffix(')').unwrap_or(inner);
            for stop in split_top_level(inner, ',') {
                for part in split_value_tokens(stop) {
                    if is_color_token(&part) {
                        return part;
                    }
                }
            }
            continue;
        }
        if token.starts_with("url(") {
            continue;
        }
        if is_color_token(token) {
            return token.clone();
        }
    }
    "transparent".to_string()
}

fn expand_font(tokens: &[String]) -> Vec<(String, String)> {
    let names = [
        "font-style",
        "font-variant",
        "font-weight",
        "font-size",
        "line-height",
        "font-family",
    ];
    let mut style = "normal".to_string();
    let mut variant = "normal".to_string();
    let mut weight = "normal".to_string();
    let mut size: Option<String> = None;
    let mut line_height = "normal".to_string();
    let mut idx = 0usize;
    while idx < tokens.len() {
        let token = &tokens[idx];
        let lower = token.to_ascii_lowercase();
        idx += 1;
        match lower.as_str() {
            "normal" => continue,
            "italic" | "oblique" => style = lower,
            "small-caps" => variant = lower,
            "bold" | "bolder" | "lighter" => weight = lower,
            "100" | "200" | "300" | "400" | "500" | "600" | "700" | "800" | "900" => weight = lower,
            _ => {
                let (size_part, lh_part) = match token.split_once('/') {
                    Some((s, lh)) => (s.to_string(), Some(lh.to_string())),
                    None => (token.clone(), None),
                };
                size = Some(size_part);
                match lh_part {
                    Some(lh) if !lh.is_empty() => line_height = lh,
                    Some(_) => {
                        if let Some(next) = tokens.get(idx) {
                            line_height = next.clone();
                            idx += 1;
                        }
                    }
                    None => {
                        if let Some(next) = tokens.get(idx) {
                            if next == "/" {
                                if let Some(lh) = tokens.get(idx + 1) {
                                    line_height = lh.clone();
                                }
                                idx += 2;
                            } else if let Some(lh) = next.strip_prefix('/') {
                                line_height = lh.to_string();
                                idx += 1;
                            }
                        }
                    }
                }
                break;
            }
        }
    }

    let mut out = vec![
        ("font-style".to_string(), style),
        ("font-variant".to_string(), variant),
        ("font-weight".to_string(), weight),
    ];
    if let Some(size) = size {
        out.push(("font-size".to_string(), size));
        out.push(("line-height".to_string(), line_height));
    }
    if idx < tokens.len() {
        out.push(("font-family".to_string(), tokens[idx..].join(" ")));
    }
    out
}

fn expand_list_style(tokens: &[String]) -> Vec<(String, String)> {
    let mut kind = "disc".to_string();
    let mut position = "outside".to_string();
    let mut image = "none".to_string();
    for token in tokens {
        let lower = token.to_ascii_lowercase();
        if lower == "inside" || lower == "outside" {
            position = lower;
        } else if lower.starts_with("url(") {
            image = token.clone();
        } else {
            kind = lower;
        }
    }
    vec![
        ("list-style-type".to_string(), kind),
        ("list-style-position".to_string(), position),
        ("list-style-image".to_string(), image),
    ]
}

/// Splits a value on whitespace outside parentheses and quotes.
pub(crate) fn split_value_tokens(value: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut buf = String::new();
    let mut depth = 0usize;
    let mut in_quote: Option<char> = None;
    for ch in value.trim().chars() {
        if let Some(q) = in_quote {
            if ch == q {
                in_quote = None;
            }
            buf.push(ch);
            continue;
        }
        match ch {
            '"' | '\'' => {
                in_quote = Some(ch);
                buf.push(ch);
            }
            '(' => {
                depth += 1;
                buf.push(ch);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                buf.push(ch);
            }
            c if c.is_whitespace() && depth == 0 => {
                if !buf.is_empty() {
                    out.push(std::mem::take(&mut buf));
                }
            }
            _ => buf.push(ch),
        }
    }
    if !buf.is_empty() {
        out.push(buf);
    }
    out
}

/// Splits on `delim` outside parentheses, brackets and quotes.
pub(crate) fn split_top_level(input: &str, delim: char) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut in_quote: Option<char> = None;
    let mut start = 0usize;
    for (idx, ch) in input.char_indices() {
        if let Some(q) = in_quote {
            if ch == q {
                in_quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => in_quote = Some(ch),
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            c if c == delim && depth == 0 => {
                out.push(&input[start..idx]);
                start = idx + c.len_utf8();
            }
            _ => {}
        }
    }
    let tail = &input[start..];
    if depth == 0 && in_quote.is_none() {
        out.push(tail);
    } else {
        // Unbalanced tail: fall back to plain splitting so one bad piece
        // does not swallow the rest.
        out.extend(tail.split(delim));
    }
    out
}

pub(crate) fn strip_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("/*") {
        out.push_str(&rest[..start]);
        match rest[start + 2..].find("*/") {
            Some(end) => rest = &rest[start + 2 + end + 2..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Strips a trailing `!important` (any spacing or case). Precedence does not
/// change.
fn strip_important(value: &str) -> &str {
    let trimmed = value.trim_end();
    if let Some(bang) = trimmed.rfind('!') {
        if trimmed[bang + 1..].trim().eq_ignore_ascii_case("important") {
            return trimmed[..bang].trim_end();
        }
    }
    trimmed
}

fn normalize_declaration(name: &str, raw_value: &str) -> Option<(String, String)> {
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let name = if name.starts_with("--") {
        name.to_string()
    } else {
        name.to_ascii_lowercase()
    };
    let value = strip_comments(raw_value);
    let value = strip_important(&value).trim();
    if value.is_empty() {
        return None;
    }
    Some((name, value.to_string()))
}

fn prelude_excerpt(slice: &str) -> String {
    let head = slice.split('{').next().unwrap_or(slice).trim();
    head.chars().take(120).collect()
}

fn looks_like_rules(css: &str) -> bool {
    let stripped = strip_comments(css);
    match (stripped.find('{'), stripped.rfind('}')) {
        (Some(open), Some(close)) => open < close,
        _ => false,
    }
}

/// Brace-counting splitter for input the primary pass could not recover.
/// At-rules are dropped whole.
fn permissive_rules(css: &str) -> Vec<RawRule> {
    let text = strip_comments(css);
    let mut out = Vec::new();
    let mut prelude = String::new();
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '{' => {
                let mut depth = 1usize;
                let mut body = String::new();
                for c in chars.by_ref() {
                    match c {
                        '{' => depth += 1,
                        '}' => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                    body.push(c);
                }
                let selector = prelude.trim().to_string();
                prelude.clear();
                if selector.is_empty() || selector.starts_with('@') || body.contains('{') {
                    continue;
                }
                out.push(RawRule {
                    prelude: selector,
                    declarations: permissive_declarations(&body),
                });
            }
            ';' if prelude.trim_start().starts_with('@') => prelude.clear(),
            '}' => prelude.clear(),
            _ => prelude.push(ch),
        }
    }
    out
}

/// Splits on `;` then on the first `:`. Pieces without a name or value are
/// dropped.
pub(crate) fn permissive_declarations(text: &str) -> Vec<(String, String)> {
    split_top_level(text, ';')
        .into_iter()
        .filter_map(|piece| {
            let (name, value) = piece.split_once(':')?;
            normalize_declaration(name, value)
        })
        .collect()
}

/// Records property name and raw value text.
struct BodyDeclParser;

impl CssDeclarationParser<'_> for BodyDeclParser {
    type Declaration = Option<(String, String)>;
    type Error = ();

    fn parse_value<'input>(
        &mut self,
        name: CowRcStr<'input>,
        input: &mut Parser<'input, '_>,
        _decl_start: &ParserState,
    ) -> Result<Self::Declaration, ParseError<'input, Self::Error>> {
        let start = input.position();
        while input.next_including_whitespace_and_comments().is_ok() {}
        let raw = input.slice_from(start);
        Ok(normalize_declaration(&name, raw))
    }
}

impl CssAtRuleParser<'_> for BodyDeclParser {
    type Prelude = ();
    type AtRule = Option<(String, String)>;
    type Error = ();

    fn parse_prelude<'input>(
        &mut self,
        name: CowRcStr<'input>,
        input: &mut Parser<'input, '_>,
    ) -> Result<Self::Prelude, ParseError<'input, Self::Error>> {
        Err(input.new_error(BasicParseErrorKind::AtRuleInvalid(name)))
    }
}

impl CssQualifiedRuleParser<'_> for BodyDeclParser {
    type Prelude = ();
    type QualifiedRule = Option<(String, String)>;
    type Error = ();

    fn parse_prelude<'input>(
        &mut self,
        input: &mut Parser<'input, '_>,
    ) -> Result<Self::Prelude, ParseError<'input, Self::Error>> {
        Err(input.new_error(BasicParseErrorKind::QualifiedRuleInvalid))
    }
}

impl CssRuleBodyItemParser<'_, Option<(String, String)>, ()> for BodyDeclParser {
    fn parse_declarations(&self) -> bool {
        true
    }
    fn parse_qualified(&self) -> bool {
        false
    }
}

fn parse_declarations_from_block(block: &mut Parser) -> Vec<(String, String)> {
    let mut body = BodyDeclParser;
    CssRuleBodyParser::new(block, &mut body)
        .flatten()
        .flatten()
        .collect()
}

struct AtPrelude {
    name: String,
    text: String,
}

/// Produces style rules, flattening applicable `@media` blocks in place.
#[derive(Default)]
struct TopLevelParser {
    skipped: Vec<SkippedRule>,
}

impl CssAtRuleParser<'_> for TopLevelParser {
    type Prelude = AtPrelude;
    type AtRule = Vec<RawRule>;
    type Error = ();

    fn parse_prelude<'input>(
        &mut self,
        name: CowRcStr<'input>,
        input: &mut Parser<'input, '_>,
    ) -> Result<Self::Prelude, ParseError<'input, Self::Error>> {
        let start = input.position();
        while input.next_including_whitespace_and_comments().is_ok() {}
        Ok(AtPrelude {
            name: name.to_ascii_lowercase(),
            text: strip_comments(input.slice_from(start)).trim().to_string(),
        })
    }

    fn parse_block<'input>(
        &mut self,
        prelude: Self::Prelude,
        _state: &ParserState,
        input: &mut Parser<'input, '_>,
    ) -> Result<Self::AtRule, ParseError<'input, Self::Error>> {
        let applies = prelude.name == "media" && media_applies(&prelude.text);
        if !applies {
            let reason = if prelude.name == "media" {
                SkipReason::MediaNotApplicable
            } else {
                SkipReason::AtRule(prelude.name.clone())
            };
            self.skipped.push(SkippedRule {
                prelude: format!("@{} {}", prelude.name, prelude.text).trim().to_string(),
                reason,
            });
            while input.next().is_ok() {}
            return Ok(Vec::new());
        }

        let mut nested = TopLevelParser::default();
        let mut rules = Vec::new();
        let mut malformed = Vec::new();
        for item in StyleSheetParser::new(input, &mut nested) {
            match item {
                Ok(items) => rules.extend(items),
                Err((_, slice)) => malformed.push(SkippedRule {
                    prelude: prelude_excerpt(slice),
                    reason: SkipReason::Malformed,
                }),
            }
        }
        self.skipped.append(&mut nested.skipped);
        self.skipped.append(&mut malformed);
        Ok(rules)
    }

    fn rule_without_block(
        &mut self,
        prelude: Self::Prelude,
        _state: &ParserState,
    ) -> Result<Self::AtRule, Self::Error> {
        self.skipped.push(SkippedRule {
            prelude: format!("@{} {}", prelude.name, prelude.text).trim().to_string(),
            reason: SkipReason::AtRule(prelude.name),
        });
        Ok(Vec::new())
    }
}

impl CssQualifiedRuleParser<'_> for TopLevelParser {
    type Prelude = String;
    type QualifiedRule = Vec<RawRule>;
    type Error = ();

    fn parse_prelude<'input>(
        &mut self,
        input: &mut Parser<'input, '_>,
    ) -> Result<Self::Prelude, ParseError<'input, Self::Error>> {
        let start = input.state();
        while input.next_including_whitespace_and_comments().is_ok() {}
        Ok(input.slice_from(start.position()).trim().to_owned())
    }

    fn parse_block<'input>(
        &mut self,
        prelude: Self::Prelude,
        _state: &ParserState,
        input: &mut Parser<'input, '_>,
    ) -> Result<Self::QualifiedRule, ParseError<'input, Self::Error>> {
        Ok(vec![RawRule {
            prelude,
            declarations: parse_declarations_from_block(input),
        }])
    }
}
