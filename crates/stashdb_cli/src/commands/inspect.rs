//! Inspect command implementation.

use super::store;
use serde::Serialize;
use stashdb_storage::EncryptionKey;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store root.
    pub path: String,
    /// Current generation.
    pub version: u32,
    /// Binlog payload size in bytes.
    pub binlog_size: u64,
    /// Obsolete binlog bytes.
    pub binlog_excess: u64,
    /// Number of live values.
    pub entry_count: u64,
    /// Total size of live values in bytes.
    pub total_size: u64,
    /// Per-tag totals.
    pub tags: Vec<TagStats>,
}

/// Totals for a single tag.
#[derive(Debug, Serialize)]
pub struct TagStats {
    /// Tag.
    pub tag: u8,
    /// Number of values.
    pub count: u64,
    /// Total size in bytes.
    pub total_size: u64,
}

/// Runs the inspect command.
pub fn run(path: &Path, key: EncryptionKey, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path, key)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Collects the statistics of the store at `path`.
pub fn inspect(path: &Path, key: EncryptionKey) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let database = store::open(path, key)?;
    let display = path.display().to_string();
    let result = database.invoke(move |object| {
        let stats = object.current_stats();
        InspectResult {
            path: display,
            version: object.version(),
            binlog_size: object.binlog_size(),
            binlog_excess: object.binlog_excess(),
            entry_count: stats.full.count,
            total_size: stats.full.total_size,
            tags: stats
                .tagged
                .iter()
                .map(|(&tag, summary)| TagStats {
                    tag,
                    count: summary.count,
                    total_size: summary.total_size,
                })
                .collect(),
        }
    })?;
    Ok(result)
}

fn print_text_output(result: &InspectResult) {
    println!("Store: {}", result.path);
    println!("Generation: {}", result.version);
    println!();
    println!("Binlog:");
    println!("  Size: {} bytes", result.binlog_size);
    println!("  Obsolete: {} bytes", result.binlog_excess);
    println!();
    println!("Values:");
    println!("  Count: {}", result.entry_count);
    println!("  Total size: {} bytes", result.total_size);

    if !result.tags.is_empty() {
        println!();
        println!("{:>5} {:>10} {:>14}", "TAG", "COUNT", "BYTES");
        for tag in &result.tags {
            println!("{:>5} {:>10} {:>14}", tag.tag, tag.count, tag.total_size);
        }
    }
}
