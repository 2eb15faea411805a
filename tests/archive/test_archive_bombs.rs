// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Decompression bombs and lying headers are refused before any write

use std::io::{Cursor, Write};

use rag_extract::{
    archive::{self, ArchiveBudget, Staging, TarCompression},
    config::{ArchiveLimits, ExtractionConfig},
    ContentExtractor, ExtractError, RequestScope, Sandbox,
};
use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};

const CENTRAL_DIRECTORY_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x01, 0x02];
/// Uncompressed-size field within a central directory record
const CD_UNCOMPRESSED_SIZE_OFFSET: usize = 24;

fn build_zip(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, content) in members {
        writer.start_file(*name, options).unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Rewrite every central directory record to declare `size` bytes
fn patch_declared_size(zip: &mut [u8], size: u32) -> usize {
    let mut patched = 0;
    let mut i = 0;
    while i + CD_UNCOMPRESSED_SIZE_OFFSET + 4 <= zip.len() {
        if zip[i..i + 4] == CENTRAL_DIRECTORY_SIGNATURE {
            let at = i + CD_UNCOMPRESSED_SIZE_OFFSET;
            zip[at..at + 4].copy_from_slice(&size.to_le_bytes());
            patched += 1;
        }
        i += 1;
    }
    patched
}

fn extractor_with(archive: ArchiveLimits) -> ContentExtractor {
    let config = ExtractionConfig {
        archive,
        ..ExtractionConfig::default()
    };
    ContentExtractor::new(&config, Sandbox::default())
}

#[tokio::test]
async fn test_zip_declaring_a_gigabyte_is_refused() {
    let mut zip = build_zip(&[("a.txt", b"hello")]);
    assert_eq!(patch_declared_size(&mut zip, 1_000_000_000), 1);

    let scope = RequestScope::new(None).unwrap();
    let err = extractor_with(ArchiveLimits::default())
        .extract_units(zip, "bomb.zip", &scope)
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractError::PolicyViolation(_)));
    assert_eq!(err.status_code(), 413);
}

#[tokio::test]
async fn test_highly_compressible_member_over_budget() {
    let zeros = vec![0u8; 2 * 1024 * 1024];
    let zip = build_zip(&[("zeros.txt", zeros.as_slice())]);
    assert!(zip.len() < 64 * 1024);

    let limits = ArchiveLimits {
        max_extracted_size: 1024 * 1024,
        ..ArchiveLimits::default()
    };
    let scope = RequestScope::new(None).unwrap();
    let err = extractor_with(limits)
        .extract_units(zip, "zeros.zip", &scope)
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractError::PolicyViolation(_)));
}

#[tokio::test]
async fn test_budget_is_shared_across_nested_containers() {
    // Each level fits alone; together they exceed the tree-wide budget.
    let chunk = vec![b'a'; 400 * 1024];
    let inner = build_zip(&[("inner.txt", chunk.as_slice())]);
    let outer = build_zip(&[
        ("first.txt", chunk.as_slice()),
        ("second.txt", chunk.as_slice()),
        ("inner.zip", inner.as_slice()),
    ]);

    let limits = ArchiveLimits {
        max_extracted_size: 1024 * 1024,
        ..ArchiveLimits::default()
    };
    let scope = RequestScope::new(None).unwrap();
    let err = extractor_with(limits)
        .extract_units(outer, "tree.zip", &scope)
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractError::PolicyViolation(_)));
}

#[tokio::test]
async fn test_tar_header_declaring_a_gigabyte_is_refused() {
    let mut header = tar::Header::new_gnu();
    header.set_path("big.txt").unwrap();
    header.set_size(1_000_000_000);
    header.set_mode(0o644);
    header.set_entry_type(tar::EntryType::Regular);
    header.set_cksum();

    // Header only; the data the header promises never follows.
    let mut tar = header.as_bytes().to_vec();
    tar.extend_from_slice(&[0u8; 1024]);

    let scope = RequestScope::new(None).unwrap();
    let err = extractor_with(ArchiveLimits::default())
        .extract_units(tar, "bomb.tar", &scope)
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractError::PolicyViolation(_)));
}

#[tokio::test]
async fn test_oversized_container_is_refused() {
    let payload: Vec<u8> = (0..64 * 1024u32).flat_map(|i| i.to_le_bytes()).collect();
    let zip = build_zip(&[("noise.txt", payload.as_slice())]);

    let limits = ArchiveLimits {
        max_archive_size: 1024,
        ..ArchiveLimits::default()
    };
    let scope = RequestScope::new(None).unwrap();
    let err = extractor_with(limits)
        .extract_units(zip, "large.zip", &scope)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 413);
}

fn files_in(dir: &std::path::Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

/// Three honest 512-byte members against a 1 KiB budget
fn over_budget() -> (ArchiveBudget, Vec<u8>) {
    let limits = ArchiveLimits {
        max_extracted_size: 1024,
        ..ArchiveLimits::default()
    };
    (ArchiveBudget::top_level(&limits), vec![b'x'; 512])
}

#[test]
fn test_zip_refused_by_prescan_writes_nothing() {
    let (budget, chunk) = over_budget();
    let zip = build_zip(&[
        ("a.txt", chunk.as_slice()),
        ("b.txt", chunk.as_slice()),
        ("c.txt", chunk.as_slice()),
    ]);

    let scope = RequestScope::new(None).unwrap();
    let staging = Staging::for_job(&scope).unwrap();
    let err = archive::zip::expand(&zip, &staging, &budget).unwrap_err();
    assert!(matches!(err, ExtractError::PolicyViolation(_)));
    assert_eq!(files_in(staging.path()), 0);
}

#[test]
fn test_tar_refused_by_prescan_writes_nothing() {
    let (budget, chunk) = over_budget();
    let mut builder = tar::Builder::new(Vec::new());
    for name in ["a.txt", "b.txt", "c.txt"] {
        let mut header = tar::Header::new_gnu();
        header.set_size(chunk.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, chunk.as_slice()).unwrap();
    }
    let tar = builder.into_inner().unwrap();

    let scope = RequestScope::new(None).unwrap();
    let staging = Staging::for_job(&scope).unwrap();
    let err = archive::tar::expand(&tar, TarCompression::None, &staging, &budget).unwrap_err();
    assert!(matches!(err, ExtractError::PolicyViolation(_)));
    assert_eq!(files_in(staging.path()), 0);
}
