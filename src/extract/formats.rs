// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Extension to handler mapping

use crate::archive::ArchiveFormat;
use crate::archive::TarCompression;

/// Every format the dispatcher can turn into text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    PlainText,
    Markdown,
    Html,
    Json,
    Yaml,
    Xml,
    Csv,
    SourceCode(&'static str),
    Pdf,
    Image,
    Doc,
    Rtf,
    Docx,
    Pptx,
    OpenDocument,
    Spreadsheet,
    Archive(ArchiveFormat),
}

/// Extension groups reported by `/v1/supported-formats`
pub const SUPPORTED_FORMATS: &[(&str, &[&str])] = &[
    ("images_ocr", &["jpg", "jpeg", "png", "tiff", "tif", "bmp", "gif", "webp"]),
    ("documents", &["doc", "docx", "pdf", "rtf", "odt"]),
    ("spreadsheets", &["csv", "xls", "xlsx", "ods"]),
    ("presentations", &["pptx", "odp"]),
    ("structured_data", &["json", "xml", "yaml", "yml"]),
    (
        "source_code",
        &[
            "py", "js", "ts", "jsx", "tsx", "rs", "go", "java", "kt", "c", "h", "cpp", "hpp",
            "cs", "rb", "php", "swift", "scala", "sh", "sql", "css", "scss", "toml", "ini",
        ],
    ),
    ("other", &["txt", "html", "htm", "md", "markdown", "log"]),
    (
        "archives",
        &["zip", "tar", "tar.gz", "tar.bz2", "tar.xz", "7z", "rar"],
    ),
];

fn language_for(ext: &str) -> Option<&'static str> {
    Some(match ext {
        "py" => "Python",
        "js" | "jsx" => "JavaScript",
        "ts" | "tsx" => "TypeScript",
        "rs" => "Rust",
        "go" => "Go",
        "java" => "Java",
        "kt" => "Kotlin",
        "c" | "h" => "C",
        "cpp" | "hpp" => "C++",
        "cs" => "C#",
        "rb" => "Ruby",
        "php" => "PHP",
        "swift" => "Swift",
        "scala" => "Scala",
        "sh" => "Shell",
        "sql" => "SQL",
        "css" | "scss" => "CSS",
        "toml" => "TOML",
        "ini" => "INI",
        _ => return None,
    })
}

impl Format {
    /// Map a lowercase extension (as returned by [`get_file_extension`])
    pub fn from_extension(ext: &str) -> Option<Self> {
        if let Some(archive) = ArchiveFormat::from_extension(ext) {
            return Some(Format::Archive(archive));
        }
        if let Some(lang) = language_for(ext) {
            return Some(Format::SourceCode(lang));
        }
        Some(match ext {
            "txt" | "log" => Format::PlainText,
            "md" | "markdown" => Format::Markdown,
            "html" | "htm" => Format::Html,
            "json" => Format::Json,
            "yaml" | "yml" => Format::Yaml,
            "xml" => Format::Xml,
            "csv" => Format::Csv,
            "pdf" => Format::Pdf,
            "jpg" | "jpeg" | "png" | "tiff" | "tif" | "bmp" | "gif" | "webp" => Format::Image,
            "doc" => Format::Doc,
            "rtf" => Format::Rtf,
            "docx" => Format::Docx,
            "pptx" => Format::Pptx,
            "odt" | "odp" => Format::OpenDocument,
            "xlsx" | "xls" | "ods" => Format::Spreadsheet,
            _ => return None,
        })
    }

    pub fn is_archive(&self) -> bool {
        matches!(self, Format::Archive(_))
    }

    /// Formats whose bytes should be text, not a sniffable binary type
    pub fn is_text_like(&self) -> bool {
        matches!(
            self,
            Format::PlainText
                | Format::Markdown
                | Format::Html
                | Format::Json
                | Format::Yaml
                | Format::Xml
                | Format::Csv
                | Format::SourceCode(_)
        )
    }
}

/// Lowercase extension, recognizing compound tar suffixes
///
/// `report.TAR.GZ` and `report.tgz` both give `tar.gz`; a name without a dot
/// gives `None`.
pub fn get_file_extension(filename: &str) -> Option<String> {
    if !filename.contains('.') {
        return None;
    }
    let lower = filename.to_lowercase();
    for (suffixes, compound) in [
        ([".tar.gz", ".tgz"], "tar.gz"),
        ([".tar.bz2", ".tbz2"], "tar.bz2"),
        ([".tar.xz", ".txz"], "tar.xz"),
    ] {
        if suffixes.iter().any(|s| lower.ends_with(s)) {
            return Some(compound.to_string());
        }
    }
    lower
        .rsplit('.')
        .next()
        .filter(|ext| !ext.is_empty())
        .map(str::to_string)
}

pub fn is_supported_format(filename: &str) -> bool {
    get_file_extension(filename)
        .and_then(|ext| Format::from_extension(&ext))
        .is_some()
}

impl ArchiveFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        Some(match ext {
            "zip" => ArchiveFormat::Zip,
            "tar" => ArchiveFormat::Tar(TarCompression::None),
            "tar.gz" => ArchiveFormat::Tar(TarCompression::Gzip),
            "tar.bz2" => ArchiveFormat::Tar(TarCompression::Bzip2),
            "tar.xz" => ArchiveFormat::Tar(TarCompression::Xz),
            "7z" => ArchiveFormat::SevenZ,
            "rar" => ArchiveFormat::Rar,
            _ => return None,
        })
    }
}
