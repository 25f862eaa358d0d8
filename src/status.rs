//! Store overview for `gw status`.
//!
//! Reads the manifest and chunk store and prints what is indexed: file and
//! chunk counts, the chunking config in effect, semantic index provenance,
//! and a per-source-type breakdown.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use groundwork_core::models::SourceType;

use crate::config::Config;
use crate::storage::{self, StorePaths};

#[derive(Default)]
struct TypeStats {
    files: usize,
    chunks: usize,
}

pub fn run_status(config: &Config) -> Result<()> {
    let paths = StorePaths::new(&config.store.dir);

    println!("Groundwork store status");
    println!("=======================");
    println!();
    println!("  Store:       {}", paths.dir().display());

    let Some(manifest) = storage::load_manifest(&paths)? else {
        println!();
        println!("  Nothing ingested yet. Run `gw ingest`.");
        return Ok(());
    };
    let store = storage::load_chunk_store(&paths)?;

    println!(
        "  Size:        chunks {} / manifest {} / vectors {}",
        format_bytes(file_size(&paths.chunks())),
        format_bytes(file_size(&paths.manifest())),
        format_bytes(file_size(&paths.vectors()))
    );
    println!();
    println!("  Files:       {}", manifest.files.len());
    println!("  Chunks:      {}", store.len());
    println!(
        "  Chunking:    {} sentences, overlap {} (fingerprint {})",
        manifest.config.sent_window_size,
        manifest.config.sent_window_overlap,
        short_hash(&manifest.config.config_fingerprint)
    );
    match manifest.validate(&store) {
        Ok(()) => println!("  Consistency: ok"),
        Err(e) => println!("  Consistency: {} (next `gw ingest` rebuilds)", e),
    }

    if let Some(latest) = manifest.files.values().map(|e| e.updated_at.as_str()).max() {
        println!("  Last change: {}", format_relative(latest));
    }

    println!();
    match &manifest.semantic_index {
        Some(record) => {
            println!("  Semantic index:");
            println!("    model:     {}", record.model_identifier);
            println!("    dims:      {}", record.embedding_dim);
            println!(
                "    vectors:   {} / {}",
                record.vectors_count,
                store.len()
            );
            println!("    built:     {}", format_relative(&record.built_at));
            if record.config_fingerprint != manifest.config.config_fingerprint {
                println!("    note:      built under a different chunking config");
            }
        }
        None => println!("  Semantic index: none (lexical retrieval only)"),
    }

    let chunk_counts = store.counts_by_doc();
    let mut by_type: BTreeMap<&'static str, TypeStats> = BTreeMap::new();
    for chunk_doc in manifest.files.values() {
        let source_type = store
            .chunks_for_doc(&chunk_doc.doc_id)
            .next()
            .map(|c| c.source_type);
        let label = match source_type {
            Some(SourceType::Paged) => SourceType::Paged.as_str(),
            Some(SourceType::Flat) => SourceType::Flat.as_str(),
            None => "empty",
        };
        let stats = by_type.entry(label).or_default();
        stats.files += 1;
        stats.chunks += chunk_counts
            .get(chunk_doc.doc_id.as_str())
            .copied()
            .unwrap_or(0);
    }

    if !by_type.is_empty() {
        println!();
        println!("  By source type:");
        println!("  {:<10} {:>6} {:>8}", "TYPE", "FILES", "CHUNKS");
        println!("  {}", "-".repeat(26));
        for (label, stats) in &by_type {
            println!("  {:<10} {:>6} {:>8}", label, stats.files, stats.chunks);
        }
    }

    println!();
    Ok(())
}

fn file_size(path: &std::path::Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// "3 hours ago" for recent RFC 3339 timestamps, the date otherwise.
fn format_relative(rfc3339: &str) -> String {
    let Ok(ts) = DateTime::parse_from_rfc3339(rfc3339) else {
        return rfc3339.to_string();
    };
    let ts = ts.with_timezone(&Utc);
    let delta = (Utc::now() - ts).num_seconds();

    if delta < 0 {
        ts.format("%Y-%m-%d %H:%M").to_string()
    } else if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        ts.format("%Y-%m-%d %H:%M").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn test_format_relative() {
        let now = Utc::now().to_rfc3339();
        assert_eq!(format_relative(&now), "just now");
        assert_eq!(format_relative("not a date"), "not a date");
        assert_eq!(
            format_relative("2001-02-03T04:05:06Z"),
            "2001-02-03 04:05"
        );
    }
}
