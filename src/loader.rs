//! Document loader: filesystem scan and per-format text extraction.
//!
//! [`scan_sources`] walks `sources.root`, applies the include/exclude
//! globs and returns files sorted by relative path. [`load_units`] turns a
//! file's bytes into ordered [`TextUnit`]s:
//!
//! | Extension | Source type | Units |
//! |-----------|-------------|-------|
//! | `.pdf` | paged | one per page, 1-based page numbers |
//! | `.docx` | flat | one, paragraphs separated by blank lines |
//! | anything else (`.md`, `.txt`, ...) | flat | one, strict UTF-8 |
//!
//! Every decode failure is a [`GroundworkError::Load`] for that file only.

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use groundwork_core::hash::hash_reader;
use groundwork_core::models::{SourceType, TextUnit};
use groundwork_core::GroundworkError;
use quick_xml::events::Event;
use walkdir::WalkDir;

use crate::config::SourcesConfig;

/// Maximum decompressed bytes read from `word/document.xml`.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

const DEFAULT_EXCLUDES: [&str; 3] = ["**/.git/**", "**/target/**", "**/node_modules/**"];

/// How a file's bytes are decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Text,
    Pdf,
    Docx,
}

impl DocumentFormat {
    pub fn for_path(path: &str) -> Self {
        let ext = Path::new(path)
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase());
        match ext.as_deref() {
            Some("pdf") => DocumentFormat::Pdf,
            Some("docx") => DocumentFormat::Docx,
            _ => DocumentFormat::Text,
        }
    }

    pub fn source_type(&self) -> SourceType {
        match self {
            DocumentFormat::Pdf => SourceType::Paged,
            DocumentFormat::Text | DocumentFormat::Docx => SourceType::Flat,
        }
    }
}

/// A file discovered by the scan.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFile {
    /// Relative to `sources.root`, `/`-separated.
    pub path: String,
    pub abs_path: PathBuf,
    pub format: DocumentFormat,
}

impl SourceFile {
    pub fn source_type(&self) -> SourceType {
        self.format.source_type()
    }
}

pub fn scan_sources(config: &SourcesConfig) -> Result<Vec<SourceFile>> {
    let root = &config.root;
    if !root.is_dir() {
        bail!("sources.root does not exist or is not a directory: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;
    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(config.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let abs = entry.path();
        let relative = abs.strip_prefix(root).unwrap_or(abs);
        let rel = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if exclude_set.is_match(&rel) || !include_set.is_match(&rel) {
            continue;
        }

        files.push(SourceFile {
            format: DocumentFormat::for_path(&rel),
            path: rel,
            abs_path: abs.to_path_buf(),
        });
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

fn load_error(path: &str, reason: impl ToString) -> GroundworkError {
    GroundworkError::Load {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

/// Content hash of a source file, streamed from disk.
pub fn hash_file(file: &SourceFile) -> Result<String, GroundworkError> {
    std::fs::File::open(&file.abs_path)
        .map(std::io::BufReader::new)
        .and_then(hash_reader)
        .map_err(|e| load_error(&file.path, e))
}

/// Read a source file's raw bytes.
pub fn read_bytes(file: &SourceFile) -> Result<Vec<u8>, GroundworkError> {
    std::fs::read(&file.abs_path).map_err(|e| load_error(&file.path, e))
}

/// Decode `bytes` into text units according to the file's format.
pub fn load_units(file: &SourceFile, bytes: &[u8]) -> Result<Vec<TextUnit>, GroundworkError> {
    match file.format {
        DocumentFormat::Text => decode_text(bytes)
            .map(|text| vec![TextUnit { text, page: None }])
            .map_err(|reason| load_error(&file.path, reason)),
        DocumentFormat::Docx => extract_docx(bytes)
            .map(|text| vec![TextUnit { text, page: None }])
            .map_err(|reason| load_error(&file.path, reason)),
        DocumentFormat::Pdf => {
            extract_pdf_pages(bytes).map_err(|reason| load_error(&file.path, reason))
        }
    }
}

fn decode_text(bytes: &[u8]) -> Result<String, String> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    String::from_utf8(bytes.to_vec()).map_err(|e| format!("invalid UTF-8: {}", e))
}

fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<TextUnit>, String> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| format!("PDF extraction failed: {}", e))?;
    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| TextUnit {
            text,
            page: Some(i as u32 + 1),
        })
        .collect())
}

fn extract_docx(bytes: &[u8]) -> Result<String, String> {
    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| e.to_string())?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| "word/document.xml not found".to_string())?;

    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| e.to_string())?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(format!(
            "word/document.xml exceeds size limit ({} bytes)",
            MAX_XML_ENTRY_BYTES
        ));
    }
    paragraphs_from_document_xml(&xml)
}

/// Concatenate `w:t` runs, one paragraph (`w:p`) per block.
fn paragraphs_from_document_xml(xml: &[u8]) -> Result<String, String> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                let text = te.unescape().map_err(|e| e.to_string())?;
                current.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let para = current.trim();
                    if !para.is_empty() {
                        paragraphs.push(para.to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }

    let tail = current.trim();
    if !tail.is_empty() {
        paragraphs.push(tail.to_string());
    }
    Ok(paragraphs.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;

    fn source(path: &str) -> SourceFile {
        SourceFile {
            path: path.to_string(),
            abs_path: PathBuf::from(path),
            format: DocumentFormat::for_path(path),
        }
    }

    fn docx_with_paragraphs(paragraphs: &[&str]) -> Vec<u8> {
        let body: String = paragraphs
            .iter()
            .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
            .collect();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
            body
        );
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn test_hash_file_streams_content() {
        let tmp = TempDir::new().unwrap();
        let abs = tmp.path().join("big.txt");
        let content = "All work and no play. ".repeat(10_000);
        fs::write(&abs, &content).unwrap();
        let file = SourceFile {
            path: "big.txt".to_string(),
            abs_path: abs,
            format: DocumentFormat::Text,
        };
        assert_eq!(
            hash_file(&file).unwrap(),
            groundwork_core::hash::hash_text(&content)
        );

        let missing = source("no/such/file.txt");
        assert!(matches!(
            hash_file(&missing),
            Err(GroundworkError::Load { path, .. }) if path == "no/such/file.txt"
        ));
    }

    #[test]
    fn test_format_by_extension() {
        assert_eq!(DocumentFormat::for_path("a/b.PDF"), DocumentFormat::Pdf);
        assert_eq!(DocumentFormat::for_path("x.docx"), DocumentFormat::Docx);
        assert_eq!(DocumentFormat::for_path("notes.md"), DocumentFormat::Text);
        assert_eq!(DocumentFormat::for_path("README"), DocumentFormat::Text);
        assert_eq!(DocumentFormat::Pdf.source_type(), SourceType::Paged);
        assert_eq!(DocumentFormat::Docx.source_type(), SourceType::Flat);
    }

    #[test]
    fn test_text_is_one_flat_unit() {
        let units = load_units(&source("a.md"), b"\xEF\xBB\xBFHello there.").unwrap();
        assert_eq!(
            units,
            vec![TextUnit {
                text: "Hello there.".to_string(),
                page: None
            }]
        );
    }

    #[test]
    fn test_invalid_utf8_is_load_error() {
        let err = load_units(&source("bad.txt"), &[0x66, 0xff, 0xfe]).unwrap_err();
        match err {
            GroundworkError::Load { path, reason } => {
                assert_eq!(path, "bad.txt");
                assert!(reason.contains("UTF-8"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_docx_paragraphs_become_blocks() {
        let bytes = docx_with_paragraphs(&["First paragraph.", "Second &amp; last."]);
        let units = load_units(&source("doc.docx"), &bytes).unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].text, "First paragraph.\n\nSecond & last.");
    }

    #[test]
    fn test_broken_binaries_are_load_errors() {
        assert!(matches!(
            load_units(&source("x.docx"), b"not a zip"),
            Err(GroundworkError::Load { .. })
        ));
        assert!(matches!(
            load_units(&source("x.pdf"), b"not a valid pdf"),
            Err(GroundworkError::Load { .. })
        ));
    }

    #[test]
    fn test_scan_applies_globs_and_default_excludes() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("guides/deep")).unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::create_dir_all(root.join("drafts")).unwrap();
        fs::write(root.join("b.md"), "b").unwrap();
        fs::write(root.join("a.txt"), "a").unwrap();
        fs::write(root.join("guides/deep/c.md"), "c").unwrap();
        fs::write(root.join("node_modules/pkg/readme.md"), "x").unwrap();
        fs::write(root.join("drafts/wip.md"), "x").unwrap();
        fs::write(root.join("image.png"), "x").unwrap();

        let config = SourcesConfig {
            root: root.to_path_buf(),
            include_globs: vec!["**/*.md".to_string(), "**/*.txt".to_string()],
            exclude_globs: vec!["drafts/**".to_string()],
            follow_symlinks: false,
        };
        let files = scan_sources(&config).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "b.md", "guides/deep/c.md"]);
    }

    #[test]
    fn test_scan_missing_root_fails() {
        let config = SourcesConfig {
            root: PathBuf::from("/definitely/not/here"),
            include_globs: vec!["**/*".to_string()],
            exclude_globs: vec![],
            follow_symlinks: false,
        };
        assert!(scan_sources(&config).is_err());
    }
}
