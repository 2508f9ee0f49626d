use crate::node::StyleMap;
use crate::types::{BoxSizingMode, Color, Edges, Pt, SIDES};
use crate::units::{BorderWidthProfile, PX_TO_PT, UnitContext, parse_color, resolve_border_width, resolve_length};

/// One side of a border.
#[derive(Debug, Clone, PartialEq)]
pub struct BorderEdge {
    /// Declared width, `medium` when absent.
    pub width: Pt,
    /// Lowercased style keyword, `none` when absent.
    pub style: String,
    pub color: Color,
}

impl BorderEdge {
    /// Present when wider than zero with a style other than `none` or `hidden`.
    pub fn is_present(&self) -> bool {
        self.width.is_positive() && !matches!(self.style.as_str(), "none" | "hidden")
    }

    /// Width that takes up space: zero for an absent border.
    pub fn used_width(&self) -> Pt {
        if self.is_present() { self.width } else { Pt::ZERO }
    }
}

/// Margin, border and padding resolved to points for one element.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxModel {
    pub margin: Edges<Pt>,
    pub padding: Edges<Pt>,
    pub border: Edges<BorderEdge>,
    /// `None` for `auto` or anything that does not resolve to a length.
    pub width: Option<Pt>,
    pub height: Option<Pt>,
    pub box_sizing: BoxSizingMode,
}

impl BoxModel {
    /// Resolves a computed style map. Lengths use `ctx`; border colors of
    /// `currentcolor` (or none declared) take the element's `color`.
    pub fn resolve(style: &StyleMap, ctx: &UnitContext, profile: BorderWidthProfile) -> Self {
        let length = |name: String| {
            style
                .get(&name)
                .and_then(|raw| resolve_length(raw, ctx))
                .unwrap_or(Pt::ZERO)
        };
        let current_color = style
            .get("color")
            .and_then(|raw| parse_color(raw))
            .unwrap_or(Color::BLACK);
        let medium = Pt::from_f32(profile.keyword_px("medium").unwrap_or(3.0) * PX_TO_PT);

        let border_side = |side: &str| {
            let width = style
                .get(&format!("border-{side}-width"))
                .and_then(|raw| resolve_border_width(raw, ctx, profile))
                .unwrap_or(medium);
            let style_keyword = style
                .get(&format!("border-{side}-style"))
                .map(|raw| raw.trim().to_ascii_lowercase())
                .unwrap_or_else(|| "none".to_string());
            let color = style
                .get(&format!("border-{side}-color"))
                .and_then(|raw| parse_color(raw))
                .unwrap_or(current_color);
            BorderEdge {
                width,
                style: style_keyword,
                color,
            }
        };

        let [top, right, bottom, left] = SIDES;
        let size = |name: &str| {
            style
                .get(name)
                .filter(|raw| !raw.trim().eq_ignore_ascii_case("auto"))
                .and_then(|raw| resolve_length(raw, ctx))
        };
        BoxModel {
            margin: Edges {
                top: length(format!("margin-{top}")),
                right: length(format!("margin-{right}")),
                bottom: length(format!("margin-{bottom}")),
                left: length(format!("margin-{left}")),
            },
            padding: Edges {
                top: length(format!("padding-{top}")),
                right: length(format!("padding-{right}")),
                bottom: length(format!("padding-{bottom}")),
                left: length(format!("padding-{left}")),
            },
            border: Edges {
                top: border_side(top),
                right: border_side(right),
                bottom: border_side(bottom),
                left: border_side(left),
            },
            width: size("width"),
            height: size("height"),
            box_sizing: match style.get("box-sizing").map(|v| v.trim().to_ascii_lowercase()).as_deref() {
                Some("border-box") => BoxSizingMode::BorderBox,
                _ => BoxSizingMode::ContentBox,
            },
        }
    }

    /// Widths of present borders; absent sides are zero.
    pub fn border_widths(&self) -> Edges<Pt> {
        self.border.map(BorderEdge::used_width)
    }

    pub fn has_border(&self) -> bool {
        self.border.top.is_present()
            || self.border.right.is_present()
            || self.border.bottom.is_present()
            || self.border.left.is_present()
    }

    /// Border-box width. A declared border-box size already includes padding
    /// and border.
    pub fn total_width(&self) -> Option<Pt> {
        let width = self.width?;
        Some(match self.box_sizing {
            BoxSizingMode::BorderBox => width,
            BoxSizingMode::ContentBox => width + self.padding.horizontal() + self.border_widths().horizontal(),
        })
    }

    pub fn total_height(&self) -> Option<Pt> {
        let height = self.height?;
        Some(match self.box_sizing {
            BoxSizingMode::BorderBox => height,
            BoxSizingMode::ContentBox => height + self.padding.vertical() + self.border_widths().vertical(),
        })
    }

    /// Content width, never negative.
    pub fn content_width(&self) -> Option<Pt> {
        let width = self.width?;
        Some(match self.box_sizing {
            BoxSizingMode::ContentBox => width,
            BoxSizingMode::BorderBox => {
                (width - self.padding.horizontal() - self.border_widths().horizontal()).max(Pt::ZERO)
            }
        })
    }

    pub fn content_height(&self) -> Option<Pt> {
        let height = self.height?;
        Some(match self.box_sizing {
            BoxSizingMode::ContentBox => height,
            BoxSizingMode::BorderBox => {
                (height - self.padding.vertical() - self.border_widths().vertical()).max(Pt::ZERO)
            }
        })
    }

    /// Left plus right margin, padding and border.
    pub fn horizontal_spacing(&self) -> Pt {
        self.margin.horizontal() + self.padding.horizontal() + self.border_widths().horizontal()
    }

    pub fn vertical_spacing(&self) -> Pt {
        self.margin.vertical() + self.padding.vertical() + self.border_widths().vertical()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::parse_inline;

    fn resolve(css: &str) -> BoxModel {
        BoxModel::resolve(&parse_inline(css), &UnitContext::new(), BorderWidthProfile::Css)
    }

    fn pt(v: f32) -> Pt {
        Pt::from_f32(v)
    }

    #[test]
    fn margin_fan_out() {
        let one = resolve("margin: 10px");
        assert_eq!(one.margin, Edges::all(pt(7.5)));

        let two = resolve("margin: 10px 20px");
        assert_eq!((two.margin.top, two.margin.bottom), (pt(7.5), pt(7.5)));
        assert_eq!((two.margin.left, two.margin.right), (pt(15.0), pt(15.0)));

        let three = resolve("margin: 10px 20px 30px");
        assert_eq!(three.margin.top, pt(7.5));
        assert_eq!((three.margin.left, three.margin.right), (pt(15.0), pt(15.0)));
        assert_eq!(three.margin.bottom, pt(22.5));

        let four = resolve("margin: 10pt 20pt 30pt 40pt");
        assert_eq!(
            four.margin,
            Edges {
                top: pt(10.0),
                right: pt(20.0),
                bottom: pt(30.0),
                left: pt(40.0),
            }
        );
    }

    #[test]
    fn border_presence() {
        assert!(!resolve("").has_border());
        assert!(!resolve("border-width: 2px").has_border());
        assert!(!resolve("border: 0 solid red").has_border());
        assert!(!resolve("border: 2px hidden red").has_border());
        let solid = resolve("border-bottom: 2px solid red");
        assert!(solid.has_border());
        assert!(solid.border.bottom.is_present());
        assert!(!solid.border.top.is_present());
        assert_eq!(solid.border.bottom.color.to_hex(), "#ff0000");
    }

    #[test]
    fn border_style_and_color_fan_out() {
        let model = resolve("border-style: solid dashed; border-color: red blue green; border-width: 1pt");
        assert_eq!(model.border.top.style, "solid");
        assert_eq!(model.border.left.style, "dashed");
        assert_eq!(model.border.right.color.to_hex(), "#0000ff");
        assert_eq!(model.border.bottom.color.to_hex(), "#008000");
        assert_eq!(model.border_widths(), Edges::all(pt(1.0)));
    }

    #[test]
    fn medium_border_follows_profile() {
        let style = parse_inline("border: solid");
        let css = BoxModel::resolve(&style, &UnitContext::new(), BorderWidthProfile::Css);
        let compact = BoxModel::resolve(&style, &UnitContext::new(), BorderWidthProfile::Compact);
        assert_eq!(css.border.top.width, pt(2.25));
        assert_eq!(compact.border.top.width, pt(0.75));
    }

    #[test]
    fn current_color_uses_element_color() {
        let model = resolve("color: #123456; border: 1pt solid currentcolor");
        assert_eq!(model.border.left.color.to_hex(), "#123456");
        let implicit = resolve("color: #654321; border-top: 1pt solid");
        assert_eq!(implicit.border.top.color.to_hex(), "#654321");
    }

    #[test]
    fn content_box_totals() {
        let model = resolve("width: 100pt; height: 50pt; padding: 5pt; border: 1pt solid black; margin: 2pt");
        assert_eq!(model.total_width(), Some(pt(112.0)));
        assert_eq!(model.total_height(), Some(pt(62.0)));
        assert_eq!(model.content_width(), Some(pt(100.0)));
        assert_eq!(model.horizontal_spacing(), pt(16.0));
        assert_eq!(model.vertical_spacing(), pt(16.0));
    }

    #[test]
    fn border_box_totals() {
        let model = resolve(
            "box-sizing: border-box; width: 100pt; padding: 0 10pt; border-left: 2pt solid black",
        );
        assert_eq!(model.total_width(), Some(pt(100.0)));
        assert_eq!(model.content_width(), Some(pt(78.0)));
        let tight = resolve("box-sizing: border-box; width: 5pt; padding: 10pt");
        assert_eq!(tight.content_width(), Some(Pt::ZERO));
    }

    #[test]
    fn auto_and_relative_sizes() {
        assert_eq!(resolve("width: auto").width, None);
        assert_eq!(resolve("width: auto").total_width(), None);
        let ctx = UnitContext::new()
            .with_parent_font_size(pt(16.0))
            .with_percentage_base(pt(400.0));
        let model = BoxModel::resolve(
            &parse_inline("width: 50%; margin-left: 2em"),
            &ctx,
            BorderWidthProfile::Css,
        );
        assert_eq!(model.width, Some(pt(200.0)));
        assert_eq!(model.margin.left, pt(32.0));
    }
}
