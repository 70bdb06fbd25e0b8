//! Single value and clearing commands.

use super::{key::parse_key, store};
use stashdb_core::TaggedValue;
use stashdb_storage::EncryptionKey;
use std::fs;
use std::io::Write;
use std::path::Path;

/// Writes the value of `hex` to stdout.
pub fn get(path: &Path, key: EncryptionKey, hex: &str) -> Result<(), Box<dyn std::error::Error>> {
    let value_key = parse_key(hex)?;
    let database = store::open(path, key)?;
    let value = database.invoke(move |object| object.get(value_key))?;
    if value.bytes.is_empty() {
        return Err(format!("Key {value_key} not found").into());
    }
    tracing::debug!(key = %value_key, tag = value.tag, bytes = value.bytes.len(), "value read");
    std::io::stdout().write_all(&value.bytes)?;
    Ok(())
}

/// Stores the contents of `file` under `hex`.
pub fn put(
    path: &Path,
    key: EncryptionKey,
    hex: &str,
    file: &Path,
    tag: u8,
) -> Result<(), Box<dyn std::error::Error>> {
    let value_key = parse_key(hex)?;
    let bytes = fs::read(file).map_err(|e| format!("Failed to read {}: {e}", file.display()))?;
    let size = bytes.len();
    let database = store::open(path, key)?;
    database.invoke(move |object| object.put(value_key, TaggedValue::new(bytes, tag)))??;
    println!("Stored {size} bytes under {value_key} (tag {tag})");
    Ok(())
}

/// Removes `hex`.
pub fn remove(path: &Path, key: EncryptionKey, hex: &str) -> Result<(), Box<dyn std::error::Error>> {
    let value_key = parse_key(hex)?;
    let database = store::open(path, key)?;
    database.invoke(move |object| object.remove(value_key))??;
    println!("Removed {value_key}");
    Ok(())
}

/// Switches the store to a new, empty generation and waits for the old
/// one to be deleted.
pub fn clear(path: &Path, key: EncryptionKey) -> Result<(), Box<dyn std::error::Error>> {
    let database = store::open(path, key)?;
    let version = database.invoke(|object| object.clear().map(|()| object.version()))??;
    wait_for_cleaner(&database)?;
    println!("Cleared, now at generation {version}");
    Ok(())
}

/// Removes every value with `tag`.
pub fn clear_tag(path: &Path, key: EncryptionKey, tag: u8) -> Result<(), Box<dyn std::error::Error>> {
    let database = store::open(path, key)?;
    database.invoke(move |object| object.clear_by_tag(tag))??;
    wait_for_cleaner(&database)?;
    println!("Cleared tag {tag}");
    Ok(())
}

fn wait_for_cleaner(database: &stashdb_core::Database) -> Result<(), Box<dyn std::error::Error>> {
    let (sender, receiver) = std::sync::mpsc::channel();
    database.wait_for_cleaner(move || {
        let _ = sender.send(());
    });
    receiver
        .recv()
        .map_err(|_| "Store worker stopped unexpectedly")?;
    Ok(())
}
