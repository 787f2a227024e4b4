//! Markdown document tree
//!
//! A small owned AST produced from pulldown-cmark events. The render
//! scheduler hands it to the preview, which walks it to find image nodes.

use crate::error::RenderError;
use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag};

/// Turns markdown text into a [`Document`]
pub trait MarkdownParser: Send + Sync {
    fn parse(&self, text: &str) -> Result<Document, RenderError>;
}

/// Kind of a node in the document tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Paragraph,
    Heading(u8),
    BlockQuote,
    CodeBlock { language: Option<String> },
    List { start: Option<u64> },
    Item,
    Table,
    TableHead,
    TableRow,
    TableCell,
    FootnoteDefinition(String),
    Emphasis,
    Strong,
    Strikethrough,
    Link { destination: String, title: String },
    /// An image; its children hold the alt text
    Image { destination: String, title: String },
    Text(String),
    Code(String),
    Html(String),
    FootnoteReference(String),
    TaskListMarker(bool),
    SoftBreak,
    HardBreak,
    Rule,
}

/// A node with its children
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub kind: NodeKind,
    pub children: Vec<Node>,
}

impl Node {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            children: Vec::new(),
        }
    }

    /// Concatenated text of this node and its descendants
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        match &self.kind {
            NodeKind::Text(text) | NodeKind::Code(text) => out.push_str(text),
            NodeKind::SoftBreak | NodeKind::HardBreak => out.push(' '),
            _ => {}
        }
        for child in &self.children {
            child.collect_text(out);
        }
    }
}

/// An image reference found in a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Destination as produced by the CommonMark parser
    pub destination: String,
    pub title: String,
    pub alt: String,
}

/// A parsed markdown document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    pub nodes: Vec<Node>,
    /// Length in bytes of the source text
    pub source_len: usize,
}

impl Document {
    /// All image references in document order
    pub fn images(&self) -> Vec<ImageReference> {
        let mut images = Vec::new();
        let mut stack: Vec<&Node> = self.nodes.iter().rev().collect();

        while let Some(node) = stack.pop() {
            if let NodeKind::Image { destination, title } = &node.kind {
                images.push(ImageReference {
                    destination: destination.clone(),
                    title: title.clone(),
                    alt: node.text_content(),
                });
            }
            stack.extend(node.children.iter().rev());
        }

        images
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// pulldown-cmark backed parser
#[derive(Debug, Clone)]
pub struct CommonMarkParser {
    options: Options,
}

impl CommonMarkParser {
    pub fn new() -> Self {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_FOOTNOTES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TASKLISTS);

        Self { options }
    }
}

impl Default for CommonMarkParser {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkdownParser for CommonMarkParser {
    fn parse(&self, text: &str) -> Result<Document, RenderError> {
        let mut roots = Vec::new();
        let mut stack: Vec<Node> = Vec::new();

        for event in Parser::new_ext(text, self.options) {
            match event {
                Event::Start(tag) => stack.push(Node::new(start_kind(tag))),
                Event::End(_) => {
                    let node = stack
                        .pop()
                        .ok_or_else(|| RenderError::Parse("unbalanced end tag".to_string()))?;
                    attach(&mut stack, &mut roots, node);
                }
                Event::Text(text) => leaf(&mut stack, &mut roots, NodeKind::Text(text.to_string())),
                Event::Code(code) => leaf(&mut stack, &mut roots, NodeKind::Code(code.to_string())),
                Event::Html(html) => leaf(&mut stack, &mut roots, NodeKind::Html(html.to_string())),
                Event::FootnoteReference(label) => {
                    leaf(&mut stack, &mut roots, NodeKind::FootnoteReference(label.to_string()))
                }
                Event::TaskListMarker(checked) => {
                    leaf(&mut stack, &mut roots, NodeKind::TaskListMarker(checked))
                }
                Event::SoftBreak => leaf(&mut stack, &mut roots, NodeKind::SoftBreak),
                Event::HardBreak => leaf(&mut stack, &mut roots, NodeKind::HardBreak),
                Event::Rule => leaf(&mut stack, &mut roots, NodeKind::Rule),
            }
        }

        if !stack.is_empty() {
            return Err(RenderError::Parse("unterminated element".to_string()));
        }

        Ok(Document {
            nodes: roots,
            source_len: text.len(),
        })
    }
}

fn start_kind(tag: Tag<'_>) -> NodeKind {
    match tag {
        Tag::Paragraph => NodeKind::Paragraph,
        Tag::Heading(level, _id, _classes) => NodeKind::Heading(match level {
            HeadingLevel::H1 => 1,
            HeadingLevel::H2 => 2,
            HeadingLevel::H3 => 3,
            HeadingLevel::H4 => 4,
            HeadingLevel::H5 => 5,
            HeadingLevel::H6 => 6,
        }),
        Tag::BlockQuote => NodeKind::BlockQuote,
        Tag::CodeBlock(kind) => NodeKind::CodeBlock {
            language: match kind {
                CodeBlockKind::Fenced(lang) if !lang.is_empty() => Some(lang.to_string()),
                _ => None,
            },
        },
        Tag::List(start) => NodeKind::List { start },
        Tag::Item => NodeKind::Item,
        Tag::FootnoteDefinition(label) => NodeKind::FootnoteDefinition(label.to_string()),
        Tag::Table(_) => NodeKind::Table,
        Tag::TableHead => NodeKind::TableHead,
        Tag::TableRow => NodeKind::TableRow,
        Tag::TableCell => NodeKind::TableCell,
        Tag::Emphasis => NodeKind::Emphasis,
        Tag::Strong => NodeKind::Strong,
        Tag::Strikethrough => NodeKind::Strikethrough,
        Tag::Link(_, destination, title) => NodeKind::Link {
            destination: destination.to_string(),
            title: title.to_string(),
        },
        Tag::Image(_, destination, title) => NodeKind::Image {
            destination: destination.to_string(),
            title: title.to_string(),
        },
    }
}

fn attach(stack: &mut [Node], roots: &mut Vec<Node>, node: Node) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => roots.push(node),
    }
}

fn leaf(stack: &mut [Node], roots: &mut Vec<Node>, kind: NodeKind) {
    attach(stack, roots, Node::new(kind));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Document {
        CommonMarkParser::new().parse(text).unwrap()
    }

    #[test]
    fn test_images_in_document_order() {
        let doc = parse("# Title\n\n![first](a.png) text ![second *bold*](<b c.png> \"T\")\n\n> ![third](https://example.com/c.png)\n");
        let images = doc.images();
        assert_eq!(images.len(), 3);
        assert_eq!(images[0].destination, "a.png");
        assert_eq!(images[0].alt, "first");
        assert_eq!(images[1].destination, "b c.png");
        assert_eq!(images[1].alt, "second bold");
        assert_eq!(images[1].title, "T");
        assert_eq!(images[2].destination, "https://example.com/c.png");
    }

    #[test]
    fn test_heading_and_paragraph_structure() {
        let doc = parse("## Hello\n\nworld");
        assert_eq!(doc.nodes.len(), 2);
        assert_eq!(doc.nodes[0].kind, NodeKind::Heading(2));
        assert_eq!(doc.nodes[0].text_content(), "Hello");
        assert_eq!(doc.nodes[1].kind, NodeKind::Paragraph);
        assert_eq!(doc.source_len, 15);
    }

    #[test]
    fn test_empty_document() {
        let doc = parse("");
        assert!(doc.is_empty());
        assert!(doc.images().is_empty());
    }

    #[test]
    fn test_image_inside_link_and_list() {
        let doc = parse("- [![badge](badge.svg)](https://ci.example.com)\n- item");
        let images = doc.images();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].destination, "badge.svg");
    }
}
