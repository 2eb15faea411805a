// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Office containers read in-process: OOXML and OpenDocument text, spreadsheets

use std::io::{Cursor, Read};

use calamine::{open_workbook_auto_from_rs, Reader as _};
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::errors::{ExtractError, Result};

/// Largest XML part read out of an office container
const MAX_PART_SIZE: u64 = 64 * 1024 * 1024;

fn corrupt(what: &str, e: impl std::fmt::Display) -> ExtractError {
    ExtractError::CorruptInput(format!("{}: {}", what, e))
}

/// Which tags carry text and which close a line or a cell
struct XmlTextRules {
    /// Only text inside these elements is kept; all text when empty
    text_tags: &'static [&'static [u8]],
    line_end_tags: &'static [&'static [u8]],
    cell_end_tags: &'static [&'static [u8]],
    tab_tags: &'static [&'static [u8]],
    break_tags: &'static [&'static [u8]],
}

const WORD_RULES: XmlTextRules = XmlTextRules {
    text_tags: &[b"w:t"],
    line_end_tags: &[b"w:p", b"w:tr"],
    cell_end_tags: &[b"w:tc"],
    tab_tags: &[b"w:tab"],
    break_tags: &[b"w:br", b"w:cr"],
};

const DRAWING_RULES: XmlTextRules = XmlTextRules {
    text_tags: &[b"a:t"],
    line_end_tags: &[b"a:p", b"a:tr"],
    cell_end_tags: &[b"a:tc"],
    tab_tags: &[b"a:tab"],
    break_tags: &[b"a:br"],
};

const ODF_RULES: XmlTextRules = XmlTextRules {
    text_tags: &[],
    line_end_tags: &[b"text:p", b"text:h", b"table:table-row"],
    cell_end_tags: &[b"table:table-cell"],
    tab_tags: &[b"text:tab"],
    break_tags: &[b"text:line-break"],
};

fn xml_text(xml: &str, rules: &XmlTextRules) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    let mut out = String::new();
    let mut depth_in_text = 0usize;
    let mut depth_in_cell = 0usize;
    // ODF keeps everything inside office:body; metadata and styles live elsewhere.
    let keep_all = rules.text_tags.is_empty();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.name();
                if rules.text_tags.contains(&name.as_ref()) {
                    depth_in_text += 1;
                } else if rules.cell_end_tags.contains(&name.as_ref()) {
                    depth_in_cell += 1;
                }
            }
            Ok(Event::Empty(e)) => {
                let name = e.name();
                if rules.tab_tags.contains(&name.as_ref()) {
                    out.push('\t');
                } else if rules.break_tags.contains(&name.as_ref()) {
                    out.push('\n');
                } else if name.as_ref() == b"text:s" {
                    out.push(' ');
                }
            }
            Ok(Event::End(e)) => {
                let name = e.name();
                if rules.text_tags.contains(&name.as_ref()) {
                    depth_in_text = depth_in_text.saturating_sub(1);
                } else if rules.line_end_tags.contains(&name.as_ref()) {
                    // paragraphs inside a table cell stay on the row's line
                    out.push(if depth_in_cell > 0 { ' ' } else { '\n' });
                } else if rules.cell_end_tags.contains(&name.as_ref()) {
                    depth_in_cell = depth_in_cell.saturating_sub(1);
                    out.push('\t');
                }
            }
            Ok(Event::Text(t)) if keep_all || depth_in_text > 0 => {
                let s = t.unescape().map_err(|e| corrupt("office xml", e))?;
                out.push_str(&s);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(corrupt("office xml", e)),
        }
    }
    Ok(out)
}

type Container<'a> = ::zip::ZipArchive<Cursor<&'a [u8]>>;

fn open_container<'a>(content: &'a [u8], what: &str) -> Result<Container<'a>> {
    ::zip::ZipArchive::new(Cursor::new(content)).map_err(|e| corrupt(what, e))
}

/// Read one part, capped; `None` when the part does not exist
fn read_part(archive: &mut Container<'_>, name: &str) -> Result<Option<String>> {
    let mut file = match archive.by_name(name) {
        Ok(file) => file,
        Err(::zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(corrupt(name, e)),
    };
    if file.size() > MAX_PART_SIZE {
        return Err(ExtractError::PolicyViolation(format!(
            "office part {} declares {} bytes",
            name,
            file.size()
        )));
    }
    let mut xml = String::new();
    (&mut file)
        .take(MAX_PART_SIZE)
        .read_to_string(&mut xml)
        .map_err(|e| corrupt(name, e))?;
    Ok(Some(xml))
}

/// Parts matching `prefix<N>.xml`, ordered by N
fn numbered_parts(archive: &Container<'_>, prefix: &str) -> Vec<(u32, String)> {
    let mut parts: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| {
            let n = name.strip_prefix(prefix)?.strip_suffix(".xml")?.parse().ok()?;
            Some((n, name.to_string()))
        })
        .collect();
    parts.sort();
    parts
}

pub fn docx_to_text(content: &[u8]) -> Result<String> {
    let mut archive = open_container(content, "docx")?;
    let mut sections = Vec::new();
    let body = read_part(&mut archive, "word/document.xml")?
        .ok_or_else(|| ExtractError::CorruptInput("docx: missing word/document.xml".to_string()))?;
    sections.push(xml_text(&body, &WORD_RULES)?);

    for (_, part) in numbered_parts(&archive, "word/header") {
        if let Some(xml) = read_part(&mut archive, &part)? {
            sections.push(xml_text(&xml, &WORD_RULES)?);
        }
    }
    for (_, part) in numbered_parts(&archive, "word/footer") {
        if let Some(xml) = read_part(&mut archive, &part)? {
            sections.push(xml_text(&xml, &WORD_RULES)?);
        }
    }
    for extra in ["word/footnotes.xml", "word/endnotes.xml"] {
        if let Some(xml) = read_part(&mut archive, extra)? {
            sections.push(xml_text(&xml, &WORD_RULES)?);
        }
    }

    Ok(join_sections(sections.iter().map(|s| keep_cells(s))))
}

pub fn pptx_to_text(content: &[u8]) -> Result<String> {
    let mut archive = open_container(content, "pptx")?;
    let slides = numbered_parts(&archive, "ppt/slides/slide");
    if slides.is_empty() {
        return Err(ExtractError::CorruptInput("pptx: no slides".to_string()));
    }

    let mut sections = Vec::new();
    for (n, part) in slides {
        let mut block = format!("[Slide {}]", n);
        if let Some(xml) = read_part(&mut archive, &part)? {
            let text = keep_cells(&xml_text(&xml, &DRAWING_RULES)?);
            if !text.is_empty() {
                block.push('\n');
                block.push_str(&text);
            }
        }
        let notes_part = format!("ppt/notesSlides/notesSlide{}.xml", n);
        if let Some(xml) = read_part(&mut archive, &notes_part)? {
            let notes = keep_cells(&xml_text(&xml, &DRAWING_RULES)?);
            if !notes.is_empty() {
                block.push_str("\n[Speaker notes]\n");
                block.push_str(&notes);
            }
        }
        if block.contains('\n') {
            sections.push(block);
        }
    }
    Ok(sections.join("\n\n"))
}

/// ODT and ODP: paragraphs from `content.xml`
pub fn opendocument_to_text(content: &[u8]) -> Result<String> {
    let mut archive = open_container(content, "opendocument")?;
    let xml = read_part(&mut archive, "content.xml")?
        .ok_or_else(|| ExtractError::CorruptInput("opendocument: missing content.xml".to_string()))?;
    let body_start = xml.find("<office:body").unwrap_or(0);
    Ok(keep_cells(&xml_text(&xml[body_start..], &ODF_RULES)?))
}

/// Every sheet as `[Sheet: name]` followed by CSV rows
pub fn spreadsheet_to_text(content: &[u8]) -> Result<String> {
    let mut workbook =
        open_workbook_auto_from_rs(Cursor::new(content.to_vec())).map_err(|e| corrupt("spreadsheet", e))?;
    let mut sections = Vec::new();

    for name in workbook.sheet_names().to_owned() {
        let range = workbook
            .worksheet_range(&name)
            .map_err(|e| corrupt("spreadsheet", e))?;
        let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(Vec::new());
        for row in range.rows() {
            let cells: Vec<String> = row.iter().map(|c| c.to_string()).collect();
            if cells.iter().all(|c| c.trim().is_empty()) {
                continue;
            }
            writer
                .write_record(&cells)
                .map_err(|e| ExtractError::Internal(format!("csv write: {}", e)))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| ExtractError::Internal(format!("csv flush: {}", e)))?;
        sections.push(format!(
            "[Sheet: {}]\n{}",
            name,
            String::from_utf8_lossy(&bytes).trim_end()
        ));
    }
    Ok(sections.join("\n\n"))
}

/// Like [`tidy_lines`] but keeps tab-separated table cells
fn keep_cells(text: &str) -> String {
    text.lines()
        .map(|line| {
            line.split('\t')
                .map(|cell| cell.split_whitespace().collect::<Vec<_>>().join(" "))
                .collect::<Vec<_>>()
                .join("\t")
                .trim_end_matches('\t')
                .to_string()
        })
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn join_sections<I: IntoIterator<Item = String>>(sections: I) -> String {
    sections
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}
