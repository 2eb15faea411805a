// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! JSON, YAML, XML and CSV

use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::Value;

use super::text::decode_text;
use crate::errors::{ExtractError, Result};

/// One `path: value` line per non-empty scalar
pub fn flatten_value(value: &Value) -> String {
    let mut lines = Vec::new();
    flatten_into(value, String::new(), &mut lines);
    lines.join("\n")
}

fn flatten_into(value: &Value, path: String, lines: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let next = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", path, key)
                };
                flatten_into(child, next, lines);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                flatten_into(child, format!("{}[{}]", path, i), lines);
            }
        }
        Value::String(s) if !s.trim().is_empty() => lines.push(format!("{}: {}", path, s)),
        Value::Number(n) => lines.push(format!("{}: {}", path, n)),
        Value::Bool(b) => lines.push(format!("{}: {}", path, b)),
        _ => {}
    }
}

pub fn json_to_text(content: &[u8]) -> Result<String> {
    let value: Value = serde_json::from_str(&decode_text(content))
        .map_err(|e| ExtractError::CorruptInput(format!("json: {}", e)))?;
    Ok(flatten_value(&value))
}

pub fn yaml_to_text(content: &[u8]) -> Result<String> {
    let text = decode_text(content);
    let mut lines = Vec::new();
    for document in serde_yaml::Deserializer::from_str(&text) {
        let value = <Value as serde::Deserialize>::deserialize(document)
            .map_err(|e| ExtractError::CorruptInput(format!("yaml: {}", e)))?;
        let flat = flatten_value(&value);
        if !flat.is_empty() {
            lines.push(flat);
        }
    }
    Ok(lines.join("\n"))
}

/// Text and CDATA nodes, one per line
pub fn xml_to_text(content: &[u8]) -> Result<String> {
    let text = decode_text(content);
    let mut reader = Reader::from_str(&text);
    reader.trim_text(true);
    let mut lines = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Text(t)) => {
                let s = t
                    .unescape()
                    .map_err(|e| ExtractError::CorruptInput(format!("xml: {}", e)))?;
                if !s.trim().is_empty() {
                    lines.push(s.trim().to_string());
                }
            }
            Ok(Event::CData(c)) => {
                let s = String::from_utf8_lossy(&c).trim().to_string();
                if !s.is_empty() {
                    lines.push(s);
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(ExtractError::CorruptInput(format!("xml: {}", e))),
        }
    }
    Ok(lines.join("\n"))
}

/// Re-emit rows as normalized CSV
pub fn csv_to_text(content: &[u8]) -> Result<String> {
    let text = decode_text(content);
    let delimiter = sniff_delimiter(&text);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(text.as_bytes());
    let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(Vec::new());
    for record in reader.records() {
        let record = record.map_err(|e| ExtractError::CorruptInput(format!("csv: {}", e)))?;
        if record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        writer
            .write_record(record.iter().map(str::trim))
            .map_err(|e| ExtractError::Internal(format!("csv write: {}", e)))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| ExtractError::Internal(format!("csv flush: {}", e)))?;
    Ok(String::from_utf8_lossy(&bytes).trim_end().to_string())
}

fn sniff_delimiter(text: &str) -> u8 {
    let first = text.lines().next().unwrap_or_default();
    [b',', b';', b'\t', b'|']
        .into_iter()
        .max_by_key(|d| first.bytes().filter(|b| b == d).count())
        .filter(|d| first.as_bytes().contains(d))
        .unwrap_or(b',')
}
