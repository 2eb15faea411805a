// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Plain text, Markdown, HTML and source code

use encoding_rs::WINDOWS_1251;
use pulldown_cmark::{Event, Parser, Tag};
use scraper::{ElementRef, Html, Node};

/// Decode bytes as UTF-8, then Windows-1251, then Latin-1
pub fn decode_text(content: &[u8]) -> String {
    let content = content.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(content);
    if let Ok(text) = std::str::from_utf8(content) {
        return text.to_string();
    }
    if let Some(text) = WINDOWS_1251.decode_without_bom_handling_and_without_replacement(content) {
        return text.into_owned();
    }
    content.iter().map(|&b| b as char).collect()
}

/// Render Markdown to its visible text
pub fn markdown_to_text(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    for event in Parser::new(source) {
        match event {
            Event::Text(text) | Event::Code(text) => out.push_str(&text),
            Event::SoftBreak | Event::HardBreak => out.push('\n'),
            Event::End(Tag::Paragraph)
            | Event::End(Tag::Heading(..))
            | Event::End(Tag::Item)
            | Event::End(Tag::CodeBlock(_))
            | Event::End(Tag::BlockQuote)
            | Event::End(Tag::TableRow)
            | Event::End(Tag::TableHead) => out.push('\n'),
            Event::End(Tag::TableCell) => out.push('\t'),
            Event::Rule => out.push('\n'),
            _ => {}
        }
    }
    tidy_lines(&out)
}

/// Visible text of an HTML document, without script/style content
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut out = String::new();
    collect_visible(document.root_element(), &mut out);
    tidy_lines(&out)
}

const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "noscript", "template", "head"];
const BLOCK_ELEMENTS: &[&str] = &[
    "p", "div", "br", "li", "tr", "h1", "h2", "h3", "h4", "h5", "h6", "section", "article",
    "header", "footer", "pre", "blockquote", "table", "ul", "ol", "title",
];

fn collect_visible(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) => {
                let name = el.name();
                if HIDDEN_ELEMENTS.contains(&name) {
                    continue;
                }
                if let Some(child_el) = ElementRef::wrap(child) {
                    collect_visible(child_el, out);
                }
                if BLOCK_ELEMENTS.contains(&name) {
                    out.push('\n');
                } else if matches!(name, "td" | "th") {
                    out.push('\t');
                }
            }
            _ => {}
        }
    }
}

/// Title of an HTML page, if it has one
pub fn html_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = scraper::Selector::parse("title").ok()?;
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Source file with a language header
pub fn source_code(language: &str, content: &[u8]) -> String {
    format!("Language: {}\n\n{}", language, decode_text(content).trim_end())
}

/// Trim each line, collapse inner whitespace, drop blank lines
pub fn tidy_lines(text: &str) -> String {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
