// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Nested containers, logical paths and member isolation

use std::io::{Cursor, Write};

use flate2::{write::GzEncoder, Compression};
use rag_extract::{
    config::ExtractionConfig, ContentExtractor, ExtractError, ExtractionUnit, RequestScope,
    Sandbox,
};
use zip::{write::SimpleFileOptions, ZipWriter};

fn build_zip(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in members {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Tar.gz whose member names are written raw, so `..` survives into the header
fn build_tar_gz(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (name, content) in members {
        let mut header = tar::Header::new_gnu();
        {
            let gnu = header.as_gnu_mut().unwrap();
            gnu.name[..name.len()].copy_from_slice(name.as_bytes());
        }
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        builder.append(&header, *content).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

fn extractor() -> ContentExtractor {
    ContentExtractor::new(&ExtractionConfig::default(), Sandbox::default())
}

fn paths(units: &[ExtractionUnit]) -> Vec<&str> {
    units.iter().map(|u| u.path.as_str()).collect()
}

#[tokio::test]
async fn test_nested_zip_paths_are_composed() {
    let inner = build_zip(&[("deep/readme.txt", b"inner text")]);
    let outer = build_zip(&[
        ("inner.zip", inner.as_slice()),
        ("top.md", b"# Title\n\nouter body"),
    ]);

    let scope = RequestScope::new(None).unwrap();
    let units = extractor()
        .extract_units(outer, "outer.zip", &scope)
        .await
        .unwrap();

    assert_eq!(
        paths(&units),
        vec!["outer.zip/inner.zip/deep/readme.txt", "outer.zip/top.md"]
    );
    assert_eq!(units[0].filename, "readme.txt");
    assert_eq!(units[0].kind, "txt");
    assert!(units[0].text.contains("inner text"));
    assert!(units[1].text.contains("outer body"));
}

#[tokio::test]
async fn test_depth_beyond_limit_rejects_tree() {
    // outer (0) -> l1 (1) -> l2 (2) -> l3 (3, refused)
    let l3 = build_zip(&[("a.txt", b"too deep")]);
    let l2 = build_zip(&[("l3.zip", l3.as_slice())]);
    let l1 = build_zip(&[("l2.zip", l2.as_slice())]);
    let outer = build_zip(&[("l1.zip", l1.as_slice()), ("ok.txt", b"fine")]);

    let scope = RequestScope::new(None).unwrap();
    let err = extractor()
        .extract_units(outer, "outer.zip", &scope)
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractError::PolicyViolation(_)));
    assert_eq!(err.status_code(), 413);
}

#[tokio::test]
async fn test_depth_within_limit_is_accepted() {
    let l2 = build_zip(&[("a.txt", b"two levels down")]);
    let l1 = build_zip(&[("l2.zip", l2.as_slice())]);
    let outer = build_zip(&[("l1.zip", l1.as_slice())]);

    let scope = RequestScope::new(None).unwrap();
    let units = extractor()
        .extract_units(outer, "outer.zip", &scope)
        .await
        .unwrap();
    assert_eq!(paths(&units), vec!["outer.zip/l1.zip/l2.zip/a.txt"]);
}

#[tokio::test]
async fn test_corrupt_member_is_skipped() {
    let outer = build_zip(&[
        ("broken.zip", b"PK\x03\x04 definitely not a zip"),
        ("data.json", br#"{"name": "kept"}"#),
        ("empty.txt", b""),
        ("binary.exe", b"MZ\x90\x00"),
    ]);

    let scope = RequestScope::new(None).unwrap();
    let units = extractor()
        .extract_units(outer, "bundle.zip", &scope)
        .await
        .unwrap();
    assert_eq!(paths(&units), vec!["bundle.zip/data.json"]);
    assert!(units[0].text.contains("name: kept"));
}

#[tokio::test]
async fn test_tar_gz_traversal_names_are_contained() {
    let archive = build_tar_gz(&[
        ("../../etc/passwd.txt", b"root:x:0:0"),
        ("./notes/a.txt", b"alpha"),
    ]);

    let scope = RequestScope::new(None).unwrap();
    let units = extractor()
        .extract_units(archive, "bundle.tar.gz", &scope)
        .await
        .unwrap();
    assert_eq!(
        paths(&units),
        vec!["bundle.tar.gz/etc/passwd.txt", "bundle.tar.gz/notes/a.txt"]
    );
    // Nothing escaped the scratch tree.
    assert!(!scope.scratch_path().join("../etc/passwd.txt").exists());
}

#[tokio::test]
async fn test_metadata_entries_are_filtered() {
    let outer = build_zip(&[
        (".DS_Store", b"junk"),
        ("__MACOSX/._a.txt", b"junk"),
        ("a.txt", b"real content"),
    ]);

    let scope = RequestScope::new(None).unwrap();
    let units = extractor()
        .extract_units(outer, "mac.zip", &scope)
        .await
        .unwrap();
    assert_eq!(paths(&units), vec!["mac.zip/a.txt"]);
}

#[tokio::test]
async fn test_archive_with_no_text_is_empty_input() {
    let outer = build_zip(&[("empty.txt", b"")]);
    let scope = RequestScope::new(None).unwrap();
    let err = extractor()
        .extract_units(outer, "nothing.zip", &scope)
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractError::EmptyInput(_)));
}
