use lightningcss::traits::Parse;
use lightningcss::values::color::{CssColor, SRGB};

use crate::types::{Color, Pt};

pub const PX_TO_PT: f32 = 0.75;
pub const PT_PER_INCH: f32 = 72.0;
pub const PT_PER_CM: f32 = 28.35;
pub const PT_PER_MM: f32 = 2.835;
pub const PT_PER_PICA: f32 = 12.0;
pub const DEFAULT_FONT_SIZE_PT: f32 = 12.0;

/// Bases for relative units. Absent values fall back to
/// [`DEFAULT_FONT_SIZE_PT`] for font-relative units and 0 for percentages.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UnitContext {
    pub parent_font_size: Option<Pt>,
    pub root_font_size: Option<Pt>,
    pub percentage_base: Option<Pt>,
}

impl UnitContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parent_font_size(mut self, size: Pt) -> Self {
        self.parent_font_size = Some(size);
        self
    }

    pub fn with_root_font_size(mut self, size: Pt) -> Self {
        self.root_font_size = Some(size);
        self
    }

    pub fn with_percentage_base(mut self, base: Pt) -> Self {
        self.percentage_base = Some(base);
        self
    }

    fn parent_font_pt(&self) -> f32 {
        self.parent_font_size
            .map(Pt::to_f32)
            .unwrap_or(DEFAULT_FONT_SIZE_PT)
    }

    fn root_font_pt(&self) -> f32 {
        self.root_font_size
            .map(Pt::to_f32)
            .unwrap_or(DEFAULT_FONT_SIZE_PT)
    }
}

/// Mapping for `thin`, `medium` and `thick` border widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BorderWidthProfile {
    /// 1px, 3px, 5px.
    #[default]
    Css,
    /// 1px, 1px, 5px. Keeps default table borders thin.
    Compact,
}

impl BorderWidthProfile {
    pub fn keyword_px(self, keyword: &str) -> Option<f32> {
        match keyword.to_ascii_lowercase().as_str() {
            "thin" => Some(1.0),
            "medium" => Some(match self {
                BorderWidthProfile::Css => 3.0,
                BorderWidthProfile::Compact => 1.0,
            }),
            "thick" => Some(5.0),
            _ => None,
        }
    }
}

/// Splits `12.5px` into `(12.5, "px")`. The unit is lowercased and may be
/// empty. Returns `None` for anything that is not a plain number with an
/// optional alphabetic or `%` suffix.
pub fn parse_number_unit(raw: &str) -> Option<(f32, String)> {
    let raw = raw.trim();
    let split = raw
        .char_indices()
        .find(|(idx, c)| !(c.is_ascii_digit() || *c == '.' || (*idx == 0 && (*c == '+' || *c == '-'))))
        .map(|(idx, _)| idx)
        .unwrap_or(raw.len());
    let (number, unit) = raw.split_at(split);
    if number.is_empty() || number == "+" || number == "-" || number == "." {
        return None;
    }
    if !unit.chars().all(|c| c.is_ascii_alphabetic() || c == '%') {
        return None;
    }
    let value = number.parse::<f32>().ok()?;
    Some((value, unit.to_ascii_lowercase()))
}

/// Resolves a length to points. Unitless numbers are taken as points and
/// unknown units keep their number. Keywords such as `auto` give `None`.
pub fn resolve_length(raw: &str, ctx: &UnitContext) -> Option<Pt> {
    let (num, unit) = parse_number_unit(raw)?;
    let pt = match unit.as_str() {
        "" | "pt" => num,
        "px" => num * PX_TO_PT,
        "em" => num * ctx.parent_font_pt(),
        "rem" => num * ctx.root_font_pt(),
        "%" => {
            let base = ctx.percentage_base.map(Pt::to_f32).unwrap_or(0.0);
            base * num / 100.0
        }
        "in" => num * PT_PER_INCH,
        "cm" => num * PT_PER_CM,
        "mm" => num * PT_PER_MM,
        "pc" => num * PT_PER_PICA,
        _ => num,
    };
    Some(Pt::from_f32(pt))
}

pub fn resolve_border_width(raw: &str, ctx: &UnitContext, profile: BorderWidthProfile) -> Option<Pt> {
    match profile.keyword_px(raw.trim()) {
        Some(px) => Some(Pt::from_f32(px * PX_TO_PT)),
        None => resolve_length(raw, ctx),
    }
}

/// Resolves `font-size`, including absolute and relative keywords. Relative
/// units use the parent font size.
pub fn resolve_font_size(raw: &str, ctx: &UnitContext) -> Option<Pt> {
    let keyword_px = match raw.trim().to_ascii_lowercase().as_str() {
        "xx-small" => Some(9.0),
        "x-small" => Some(10.0),
        "small" => Some(13.0),
        "medium" => Some(16.0),
        "large" => Some(18.0),
        "x-large" => Some(24.0),
        "xx-large" => Some(32.0),
        "xxx-large" => Some(40.0),
        "smaller" => return Some(Pt::from_f32(ctx.parent_font_pt() / 1.2)),
        "larger" => return Some(Pt::from_f32(ctx.parent_font_pt() * 1.2)),
        _ => None,
    };
    if let Some(px) = keyword_px {
        return Some(Pt::from_f32(px * PX_TO_PT));
    }
    if raw.trim().ends_with('%') {
        let ctx = ctx.with_percentage_base(Pt::from_f32(ctx.parent_font_pt()));
        return resolve_length(raw, &ctx);
    }
    resolve_length(raw, ctx)
}

/// Parses any CSS color to RGB. Alpha is pre-blended over white.
/// `currentcolor` has no value on its own and returns `None`.
pub fn parse_color(raw: &str) -> Option<Color> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let color = CssColor::parse_string(raw).ok()?;
    css_color_to_color(&color)
}

fn css_color_to_color(color: &CssColor) -> Option<Color> {
    if let CssColor::RGBA(rgba) = color {
        let alpha = rgba.alpha as f32 / 255.0;
        let r = (rgba.red as f32 / 255.0) * alpha + (1.0 - alpha);
        let g = (rgba.green as f32 / 255.0) * alpha + (1.0 - alpha);
        let b = (rgba.blue as f32 / 255.0) * alpha + (1.0 - alpha);
        return Some(Color::rgb(r, g, b));
    }
    if let Ok(srgb) = SRGB::try_from(color) {
        return Some(Color::rgb(srgb.r, srgb.g, srgb.b));
    }
    None
}
