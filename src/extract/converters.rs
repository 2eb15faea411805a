// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Formats handled by external binaries run through the sandbox

use std::time::Duration;

use tracing::debug;

use super::text::{decode_text, tidy_lines};
use crate::errors::{ExtractError, Result};
use crate::sandbox::{ProcessClass, Sandbox, SandboxOutput};
use crate::scope::RequestScope;

/// `pdftotext`, `tesseract`, `antiword` and `unrtf` behind one handle
#[derive(Debug, Clone)]
pub struct Converters {
    sandbox: Sandbox,
    timeout: Duration,
    ocr_languages: String,
}

impl Converters {
    pub fn new(sandbox: Sandbox, timeout: Duration, ocr_languages: impl Into<String>) -> Self {
        Self {
            sandbox,
            timeout,
            ocr_languages: ocr_languages.into(),
        }
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    /// One `[Page N]` section per page that has text
    pub async fn pdf_to_text(&self, content: &[u8], scope: &RequestScope) -> Result<String> {
        let output = self
            .run_on_file(ProcessClass::Pdf, content, ".pdf", scope, |input| {
                vec![
                    "pdftotext".into(),
                    "-layout".into(),
                    "-enc".into(),
                    "UTF-8".into(),
                    input.into(),
                    "-".into(),
                ]
            })
            .await?;
        Ok(split_pages(&output.stdout_lossy()))
    }

    pub async fn image_to_text(&self, content: &[u8], scope: &RequestScope) -> Result<String> {
        let languages = self.ocr_languages.clone();
        let output = self
            .run_on_file(ProcessClass::Ocr, content, ".img", scope, move |input| {
                vec![
                    "tesseract".into(),
                    input.into(),
                    "stdout".into(),
                    "-l".into(),
                    languages,
                ]
            })
            .await?;
        Ok(tidy_lines(&output.stdout_lossy()))
    }

    /// Legacy Word binary documents
    pub async fn doc_to_text(&self, content: &[u8], scope: &RequestScope) -> Result<String> {
        let output = self
            .run_on_file(ProcessClass::Office, content, ".doc", scope, |input| {
                vec!["antiword".into(), input.into()]
            })
            .await?;
        Ok(decode_text(&output.stdout).trim().to_string())
    }

    pub async fn rtf_to_text(&self, content: &[u8], scope: &RequestScope) -> Result<String> {
        let output = self
            .run_on_file(ProcessClass::Office, content, ".rtf", scope, |input| {
                vec!["unrtf".into(), "--text".into(), input.into()]
            })
            .await?;
        Ok(strip_unrtf_header(&decode_text(&output.stdout)))
    }

    /// Write `content` to a scratch file and run the tool on it
    async fn run_on_file<F>(
        &self,
        class: ProcessClass,
        content: &[u8],
        suffix: &str,
        scope: &RequestScope,
        command: F,
    ) -> Result<SandboxOutput>
    where
        F: FnOnce(&str) -> Vec<String>,
    {
        scope.check_cancelled()?;
        let input = tempfile::Builder::new()
            .prefix("in-")
            .suffix(suffix)
            .tempfile_in(scope.scratch_path())
            .map_err(|e| ExtractError::Internal(format!("converter input: {}", e)))?;
        tokio::fs::write(input.path(), content).await?;

        let argv = command(&input.path().to_string_lossy());
        let invocation = self
            .sandbox
            .invocation(class, argv, self.timeout)
            .working_dir(scope.scratch_path());
        debug!(tool = invocation.tool(), bytes = content.len(), "running converter");

        let output = self.sandbox.run(invocation).await?.success()?;
        Ok(output)
    }
}

/// `pdftotext` separates pages with form feeds
fn split_pages(raw: &str) -> String {
    raw.split('\x0c')
        .enumerate()
        .filter_map(|(i, page)| {
            let page = page.trim_end();
            let body = page.trim_start_matches('\n');
            if body.trim().is_empty() {
                None
            } else {
                Some(format!("[Page {}]\n{}", i + 1, body))
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// `unrtf --text` prefixes a `###` banner block
fn strip_unrtf_header(raw: &str) -> String {
    raw.lines()
        .filter(|line| !line.starts_with("###"))
        .skip_while(|line| line.trim() == "-----------------" || line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
