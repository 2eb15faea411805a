// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Format dispatcher: bytes plus extension in, text out
//!
//! In-process parsers run on the blocking pool; PDF, OCR and legacy
//! documents go through the sandbox; archives are handed to the unpacker,
//! which calls back into this dispatcher for every member.

pub mod converters;
pub mod formats;
pub mod office;
pub mod structured;
pub mod text;
pub mod unit;
pub mod validation;

pub use converters::Converters;
pub use formats::{get_file_extension, is_supported_format, Format, SUPPORTED_FORMATS};
pub use unit::ExtractionUnit;
pub use validation::{safe_filename, sanitize_filename, validate_file_type};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::archive::{ArchiveJob, ArchiveUnpacker, MemberDispatcher};
use crate::config::ExtractionConfig;
use crate::errors::{ExtractError, Result};
use crate::sandbox::Sandbox;
use crate::scope::RequestScope;

#[derive(Debug, Clone)]
pub struct ContentExtractor {
    converters: Converters,
    unpacker: ArchiveUnpacker,
}

impl ContentExtractor {
    pub fn new(config: &ExtractionConfig, sandbox: Sandbox) -> Self {
        let stage_timeout = config.processing_timeout();
        Self {
            converters: Converters::new(sandbox.clone(), stage_timeout, config.ocr_languages.clone()),
            unpacker: ArchiveUnpacker::new(config.archive.clone(), sandbox, stage_timeout),
        }
    }

    pub fn unpacker(&self) -> &ArchiveUnpacker {
        &self.unpacker
    }

    /// Validate an uploaded or downloaded file and turn it into units.
    ///
    /// Archives expand to one unit per member; any other format gives a
    /// single unit. A file yielding no text at all is `EmptyInput`.
    pub async fn extract_units(
        &self,
        content: Vec<u8>,
        filename: &str,
        scope: &RequestScope,
    ) -> Result<Vec<ExtractionUnit>> {
        let filename = sanitize_filename(filename);
        let format = validate_file_type(&content, &filename)?;
        let ext = get_file_extension(&filename).unwrap_or_default();
        let size = content.len() as u64;
        info!(
            request = %scope.id,
            file = %safe_filename(&filename),
            ext = %ext,
            bytes = size,
            "extracting"
        );

        let units = match format {
            Format::Archive(archive) => {
                let job = ArchiveJob {
                    content,
                    logical_path: filename.clone(),
                    format: archive,
                };
                let outcome = self
                    .unpacker
                    .unpack(job, self.unpacker.top_level_budget(), self, scope)
                    .await?;
                debug!(consumed = outcome.consumed_bytes, "archive tree done");
                outcome.units
            }
            format => {
                let text = self.dispatch(content, format, scope).await?;
                if text.trim().is_empty() {
                    Vec::new()
                } else {
                    vec![ExtractionUnit::new(
                        filename.clone(),
                        filename.clone(),
                        size,
                        ext,
                        text,
                    )]
                }
            }
        };

        if units.is_empty() {
            return Err(ExtractError::EmptyInput(
                "no text could be extracted".to_string(),
            ));
        }
        Ok(units)
    }

    /// Text for one non-archive payload
    pub async fn dispatch(
        &self,
        content: Vec<u8>,
        format: Format,
        scope: &RequestScope,
    ) -> Result<String> {
        scope.check_cancelled()?;
        match format {
            Format::Pdf => self.converters.pdf_to_text(&content, scope).await,
            Format::Image => self.converters.image_to_text(&content, scope).await,
            Format::Doc => self.converters.doc_to_text(&content, scope).await,
            Format::Rtf => self.converters.rtf_to_text(&content, scope).await,
            Format::Archive(_) => Err(ExtractError::Internal(
                "archive routed to single-file dispatch".to_string(),
            )),
            format => tokio::task::spawn_blocking(move || parse_in_process(&content, format)).await?,
        }
    }
}

/// Handlers that need no external tool
fn parse_in_process(content: &[u8], format: Format) -> Result<String> {
    match format {
        Format::PlainText => Ok(text::decode_text(content).trim().to_string()),
        Format::Markdown => Ok(text::markdown_to_text(&text::decode_text(content))),
        Format::Html => Ok(text::html_to_text(&text::decode_text(content))),
        Format::SourceCode(language) => Ok(text::source_code(language, content)),
        Format::Json => structured::json_to_text(content),
        Format::Yaml => structured::yaml_to_text(content),
        Format::Xml => structured::xml_to_text(content),
        Format::Csv => structured::csv_to_text(content),
        Format::Docx => office::docx_to_text(content),
        Format::Pptx => office::pptx_to_text(content),
        Format::OpenDocument => office::opendocument_to_text(content),
        Format::Spreadsheet => office::spreadsheet_to_text(content),
        other => Err(ExtractError::Internal(format!(
            "{:?} needs an external converter",
            other
        ))),
    }
}

#[async_trait]
impl MemberDispatcher for ContentExtractor {
    async fn extract_member(
        &self,
        content: Vec<u8>,
        file_name: &str,
        format: Format,
        scope: &RequestScope,
    ) -> Result<String> {
        debug!(member = %safe_filename(file_name), ?format, "dispatching member");
        self.dispatch(content, format, scope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::office::tests::build_zip;

    fn extractor() -> ContentExtractor {
        ContentExtractor::new(&ExtractionConfig::default(), Sandbox::default())
    }

    #[tokio::test]
    async fn test_plain_text_unit() {
        let scope = RequestScope::new(None).unwrap();
        let units = extractor()
            .extract_units(b"hello world\n".to_vec(), "notes.txt", &scope)
            .await
            .unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].filename, "notes.txt");
        assert_eq!(units[0].path, "notes.txt");
        assert_eq!(units[0].kind, "txt");
        assert_eq!(units[0].text, "hello world");
        assert_eq!(units[0].size, 12);
    }

    #[tokio::test]
    async fn test_whitespace_only_file_is_empty_input() {
        let scope = RequestScope::new(None).unwrap();
        let result = extractor()
            .extract_units(b"   \n\n".to_vec(), "blank.txt", &scope)
            .await;
        assert!(matches!(result, Err(ExtractError::EmptyInput(_))));
    }

    #[tokio::test]
    async fn test_zip_members_get_logical_paths() {
        let scope = RequestScope::new(None).unwrap();
        let zip = build_zip(&[
            ("docs/a.txt", "alpha"),
            ("__MACOSX/._a.txt", "junk"),
            ("b.json", "{\"k\": \"v\"}"),
            ("c.exe", "MZ"),
        ]);
        let units = extractor()
            .extract_units(zip, "bundle.zip", &scope)
            .await
            .unwrap();
        let paths: Vec<&str> = units.iter().map(|u| u.path.as_str()).collect();
        assert_eq!(paths, vec!["bundle.zip/docs/a.txt", "bundle.zip/b.json"]);
        assert_eq!(units[1].text, "k: v");
    }

    #[tokio::test]
    async fn test_corrupt_member_is_skipped() {
        let scope = RequestScope::new(None).unwrap();
        let zip = build_zip(&[("bad.json", "{broken"), ("good.txt", "fine")]);
        let units = extractor()
            .extract_units(zip, "mixed.zip", &scope)
            .await
            .unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].filename, "good.txt");
    }
}
