//! Store key loading and key argument parsing.

use stashdb_core::Key;
use stashdb_storage::{random_salt, EncryptionKey, SALT_SIZE};
use std::fs;
use std::path::Path;

/// Name of the passphrase salt file in the store root.
pub const SALT_FILE: &str = "salt";

/// Loads the store key from `key_file`, or derives it from `passphrase`
/// and the store's salt file, creating the salt on first use.
pub fn load(
    root: &Path,
    key_file: Option<&Path>,
    passphrase: Option<&str>,
) -> Result<EncryptionKey, Box<dyn std::error::Error>> {
    if let Some(key_file) = key_file {
        let bytes = fs::read(key_file)
            .map_err(|e| format!("Failed to read key file {}: {e}", key_file.display()))?;
        return Ok(EncryptionKey::from_bytes(&bytes)?);
    }
    let passphrase = passphrase.ok_or("A key is required (--key-file or --passphrase)")?;
    let salt = load_salt(root)?;
    Ok(EncryptionKey::derive_from_passphrase(
        passphrase.as_bytes(),
        &salt,
    )?)
}

fn load_salt(root: &Path) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let path = root.join(SALT_FILE);
    match fs::read(&path) {
        Ok(salt) if salt.len() == SALT_SIZE => Ok(salt),
        Ok(salt) => Err(format!(
            "Salt file {} has {} bytes, expected {SALT_SIZE}",
            path.display(),
            salt.len()
        )
        .into()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            fs::create_dir_all(root)?;
            let salt = random_salt();
            fs::write(&path, salt)?;
            tracing::info!(path = %path.display(), "created passphrase salt");
            Ok(salt.to_vec())
        }
        Err(e) => Err(e.into()),
    }
}

/// Parses a key written as up to 32 hex digits.
pub fn parse_key(hex: &str) -> Result<Key, Box<dyn std::error::Error>> {
    let digits = hex.trim_start_matches("0x");
    if digits.is_empty() || digits.len() > 32 {
        return Err(format!("Invalid key {hex:?}: expected 1 to 32 hex digits").into());
    }
    let value =
        u128::from_str_radix(digits, 16).map_err(|e| format!("Invalid key {hex:?}: {e}"))?;
    Ok(Key::from(value))
}
