// Copyright 2026 WebHarvest Contributors
// SPDX-License-Identifier: Apache-2.0

//! HTML to plain text.
//!
//! Uses the `scraper` crate to parse the document, drops non-content
//! elements (`script`, `style`, `header`, `footer`, `nav`, `aside`, comments)
//! and emits one line per block-level element. Input without markup is only
//! whitespace-collapsed. Decoded text that would read as a tag (`&lt;div&gt;`)
//! comes out as `< div>`, so normalized text never looks like markup and
//! normalizing it again changes nothing.

use std::sync::OnceLock;

use regex::Regex;
use scraper::{ElementRef, Html, Node};

/// Elements removed together with their subtree.
const DROPPED: &[&str] = &[
    "script", "style", "noscript", "template", "header", "footer", "nav", "aside",
];

/// Elements that start and end a line.
const BLOCKS: &[&str] = &[
    "address", "article", "blockquote", "body", "br", "caption", "dd", "details", "dialog",
    "div", "dl", "dt", "fieldset", "figcaption", "figure", "form", "h1", "h2", "h3", "h4",
    "h5", "h6", "hr", "li", "main", "ol", "option", "p", "pre", "section", "summary", "table",
    "tbody", "tfoot", "thead", "title", "tr", "ul",
];

/// Cells are separated by a space within their row.
const CELLS: &[&str] = &["td", "th"];

fn markup_pattern() -> &'static Regex {
    static MARKUP: OnceLock<Regex> = OnceLock::new();
    MARKUP.get_or_init(|| {
        Regex::new(r"(?i)<(?:!--|!doctype|/?[a-z][a-z0-9-]*(?:\s[^>]*)?/?\s*>)")
            .expect("markup regex is valid")
    })
}

/// Whether the input looks like HTML rather than plain text.
pub fn has_markup(raw: &str) -> bool {
    markup_pattern().is_match(raw)
}

/// Normalize raw page content to block-ordered plain text.
pub fn normalize(raw: &str) -> String {
    if !has_markup(raw) {
        return tidy_lines(raw.lines());
    }
    let doc = Html::parse_document(raw);
    let mut lines = LineBuffer::default();
    walk(doc.root_element(), &mut lines);
    defuse_tags(tidy_lines(lines.finish().iter().map(String::as_str)))
}

/// Split `<` from the name of anything in the text that parses as a tag.
/// A tag name cannot follow whitespace, so the result has no markup left.
fn defuse_tags(mut text: String) -> String {
    while has_markup(&text) {
        text = markup_pattern()
            .replace_all(&text, |caps: &regex::Captures<'_>| format!("< {}", &caps[0][1..]))
            .into_owned();
    }
    text
}

/// Collapse whitespace runs in each line and drop empty lines.
fn tidy_lines<'a>(lines: impl Iterator<Item = &'a str>) -> String {
    lines
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Default)]
struct LineBuffer {
    lines: Vec<String>,
    current: String,
}

impl LineBuffer {
    fn push_text(&mut self, text: &str) {
        self.current.push_str(text);
    }

    fn push_space(&mut self) {
        self.current.push(' ');
    }

    fn break_line(&mut self) {
        if !self.current.trim().is_empty() {
            self.lines.push(std::mem::take(&mut self.current));
        } else {
            self.current.clear();
        }
    }

    fn finish(mut self) -> Vec<String> {
        self.break_line();
        self.lines
    }
}

fn walk(element: ElementRef<'_>, out: &mut LineBuffer) {
    let name = element.value().name();
    if DROPPED.contains(&name) {
        return;
    }
    let block = BLOCKS.contains(&name);
    let cell = CELLS.contains(&name);
    if block {
        out.break_line();
    }

    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_text(text),
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    walk(child_el, out);
                }
            }
            _ => {}
        }
    }

    if block {
        out.break_line();
    } else if cell {
        out.push_space();
    }
}
