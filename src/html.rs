use kuchiki::traits::TendrilSink;
use kuchiki::{NodeData, NodeRef};

use crate::node::{NodeId, Tree};

/// Markup turned into a style tree plus the text of its `<style>` blocks in
/// document order.
#[derive(Debug, Clone, Default)]
pub struct HtmlDocument {
    pub tree: Tree,
    pub stylesheets: Vec<String>,
}

/// Elements whose text content is never rendered.
const RAW_TEXT_ELEMENTS: &[&str] = &["style", "script", "template", "noscript"];

/// Parses `html` with the HTML5 tree builder. Comments, doctypes and
/// whitespace-only text are dropped; `style` attributes land in the declared
/// map and `class` is split into tokens.
pub fn parse_document(html: &str) -> HtmlDocument {
    let document = kuchiki::parse_html().one(html);
    let mut out = HtmlDocument::default();
    let Some(root) = document
        .children()
        .find(|child| matches!(child.data(), NodeData::Element(_)))
    else {
        return out;
    };

    let mut stack: Vec<(NodeRef, Option<NodeId>)> = vec![(root, None)];
    while let Some((node, parent)) = stack.pop() {
        match node.data() {
            NodeData::Element(element) => {
                let tag = element.name.local.as_ref().to_ascii_lowercase();
                if parent.is_none() && out.tree.root().is_some() {
                    continue;
                }
                let id = out.tree.add_element(parent, &tag);
                {
                    let attrs = element.attributes.borrow();
                    for (name, attr) in attrs.map.iter() {
                        out.tree.set_attribute(id, name.local.as_ref(), &attr.value);
                    }
                }
                if RAW_TEXT_ELEMENTS.contains(&tag.as_str()) {
                    if tag == "style" {
                        out.stylesheets.push(node.text_contents());
                    }
                    continue;
                }
                let children: Vec<NodeRef> = node.children().collect();
                for child in children.into_iter().rev() {
                    stack.push((child, Some(id)));
                }
            }
            NodeData::Text(text) => {
                let text = text.borrow();
                if let Some(parent) = parent {
                    if !text.trim().is_empty() {
                        out.tree.add_text(parent, &text);
                    }
                }
            }
            _ => {}
        }
    }
    log::debug!(
        "parsed markup: {} nodes, {} style blocks",
        out.tree.len(),
        out.stylesheets.len()
    );
    out
}
