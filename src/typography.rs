use crate::declaration::split_top_level;
use crate::node::{StyleMap, Tree};
use crate::types::{Color, Pt};
use crate::units::{DEFAULT_FONT_SIZE_PT, UnitContext, parse_color, parse_number_unit, resolve_font_size, resolve_length};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextAlignMode {
    #[default]
    Left,
    Center,
    Right,
    Justify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerticalAlignMode {
    #[default]
    Baseline,
    Top,
    Middle,
    Bottom,
    Sub,
    Super,
    TextTop,
    TextBottom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FontStyleMode {
    #[default]
    Normal,
    Italic,
    Oblique,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextTransformMode {
    #[default]
    None,
    Uppercase,
    Lowercase,
    Capitalize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextDecorationMode {
    #[default]
    None,
    Underline,
    Overline,
    LineThrough,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LineHeightSpec {
    /// Multiple of the font size.
    Multiple(f32),
    Absolute(Pt),
}

impl Default for LineHeightSpec {
    fn default() -> Self {
        LineHeightSpec::Multiple(1.2)
    }
}

impl LineHeightSpec {
    pub fn to_pt(self, font_size: Pt) -> Pt {
        match self {
            LineHeightSpec::Multiple(factor) => font_size * factor,
            LineHeightSpec::Absolute(pt) => pt,
        }
    }
}

/// Normalized text properties of one element.
#[derive(Debug, Clone, PartialEq)]
pub struct TextStyle {
    pub font_size: Pt,
    pub font_weight: u16,
    pub font_style: FontStyleMode,
    pub font_family: Vec<String>,
    pub line_height: LineHeightSpec,
    pub color: Color,
    pub background_color: Option<Color>,
    pub text_align: TextAlignMode,
    pub vertical_align: VerticalAlignMode,
    pub text_decoration: TextDecorationMode,
    pub text_transform: TextTransformMode,
}

impl TextStyle {
    /// Reads a computed style map. `font_size` comes from
    /// [`resolve_font_sizes`].
    pub fn resolve(style: &StyleMap, font_size: Pt) -> Self {
        let get = |name: &str| style.get(name).map(|v| v.trim().to_ascii_lowercase());
        TextStyle {
            font_size,
            font_weight: get("font-weight").map(|v| parse_font_weight(&v)).unwrap_or(400),
            font_style: match get("font-style").as_deref() {
                Some("italic") => FontStyleMode::Italic,
                Some(v) if v.starts_with("oblique") => FontStyleMode::Oblique,
                _ => FontStyleMode::Normal,
            },
            font_family: style
                .get("font-family")
                .map(|v| parse_font_family(v))
                .unwrap_or_default(),
            line_height: style
                .get("line-height")
                .map(|v| parse_line_height(v, font_size))
                .unwrap_or_default(),
            color: style.get("color").and_then(|v| parse_color(v)).unwrap_or(Color::BLACK),
            background_color: style.get("background-color").and_then(|v| {
                if v.trim().eq_ignore_ascii_case("transparent") {
                    None
                } else {
                    parse_color(v)
                }
            }),
            text_align: match get("text-align").as_deref() {
                Some("center") => TextAlignMode::Center,
                Some("right" | "end") => TextAlignMode::Right,
                Some("justify") => TextAlignMode::Justify,
                _ => TextAlignMode::Left,
            },
            vertical_align: match get("vertical-align").as_deref() {
                Some("top") => VerticalAlignMode::Top,
                Some("middle") => VerticalAlignMode::Middle,
                Some("bottom") => VerticalAlignMode::Bottom,
                Some("sub") => VerticalAlignMode::Sub,
                Some("super") => VerticalAlignMode::Super,
                Some("text-top") => VerticalAlignMode::TextTop,
                Some("text-bottom") => VerticalAlignMode::TextBottom,
                _ => VerticalAlignMode::Baseline,
            },
            text_decoration: get("text-decoration-line")
                .or_else(|| get("text-decoration"))
                .map(|v| parse_text_decoration(&v))
                .unwrap_or_default(),
            text_transform: match get("text-transform").as_deref() {
                Some("uppercase") => TextTransformMode::Uppercase,
                Some("lowercase") => TextTransformMode::Lowercase,
                Some("capitalize") => TextTransformMode::Capitalize,
                _ => TextTransformMode::None,
            },
        }
    }

    pub fn is_bold(&self) -> bool {
        self.font_weight >= 600
    }

    pub fn line_height_pt(&self) -> Pt {
        self.line_height.to_pt(self.font_size)
    }
}

/// Resolved font size per node, indexed by [`NodeId::index`].
///
/// A declared `font-size` resolves against the parent's resolved size;
/// otherwise the parent's size carries down. The root falls back to 12pt.
///
/// [`NodeId::index`]: crate::node::NodeId::index
pub fn resolve_font_sizes(tree: &Tree) -> Vec<Pt> {
    let default = Pt::from_f32(DEFAULT_FONT_SIZE_PT);
    let mut sizes = vec![default; tree.len()];
    let mut root_size: Option<Pt> = None;
    for id in tree.preorder() {
        let node = tree.node(id);
        let parent_size = node.parent().map(|p| sizes[p.index()]).unwrap_or(default);
        let declared = node.declared().get("font-size").map(|v| v.trim().to_ascii_lowercase());
        let size = match declared.as_deref() {
            None | Some("inherit") | Some("unset") => parent_size,
            Some("initial") => default,
            Some(raw) => {
                let mut ctx = UnitContext::new().with_parent_font_size(parent_size);
                ctx.root_font_size = root_size;
                resolve_font_size(raw, &ctx).unwrap_or(parent_size)
            }
        };
        if node.parent().is_none() {
            root_size = Some(size);
        }
        sizes[id.index()] = size;
    }
    sizes
}

/// normal 400, bold 700, bolder 900, lighter 300, numbers clamped to
/// 100..=900. Anything else is 400.
pub fn parse_font_weight(raw: &str) -> u16 {
    let raw = raw.trim().to_ascii_lowercase();
    match raw.as_str() {
        "normal" => 400,
        "bold" => 700,
        "bolder" => 900,
        "lighter" => 300,
        _ => raw
            .parse::<f32>()
            .map(|w| w.clamp(100.0, 900.0) as u16)
            .unwrap_or(400),
    }
}

pub fn parse_line_height(raw: &str, font_size: Pt) -> LineHeightSpec {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("normal") {
        return LineHeightSpec::Multiple(1.2);
    }
    match parse_number_unit(raw) {
        Some((value, unit)) if unit.is_empty() => LineHeightSpec::Multiple(value),
        Some(_) => {
            let ctx = UnitContext::new()
                .with_parent_font_size(font_size)
                .with_percentage_base(font_size);
            resolve_length(raw, &ctx)
                .map(LineHeightSpec::Absolute)
                .unwrap_or_default()
        }
        None => LineHeightSpec::default(),
    }
}

fn parse_text_decoration(raw: &str) -> TextDecorationMode {
    raw.split_whitespace()
        .find_map(|token| match token {
            "underline" => Some(TextDecorationMode::Underline),
            "overline" => Some(TextDecorationMode::Overline),
            "line-through" => Some(TextDecorationMode::LineThrough),
            "none" => Some(TextDecorationMode::None),
            _ => None,
        })
        .unwrap_or_default()
}

/// Splits a family list and strips quotes.
pub fn parse_font_family(raw: &str) -> Vec<String> {
    split_top_level(raw, ',')
        .into_iter()
        .map(|family| family.trim().trim_matches(|c| c == '"' || c == '\'').trim().to_string())
        .filter(|family| !family.is_empty())
        .collect()
}
