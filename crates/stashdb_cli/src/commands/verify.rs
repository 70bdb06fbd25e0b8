//! Verify command implementation.

use super::store;
use stashdb_core::Key;
use stashdb_storage::EncryptionKey;
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of values checked.
    pub checked: usize,
    /// Keys whose value is missing or fails its checksum.
    pub corrupt: Vec<Key>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.corrupt.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path, key: EncryptionKey) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying store at {}", path.display());
    println!();

    let result = verify(path, key)?;
    for key in &result.corrupt {
        println!("  corrupt: {key}");
    }
    println!("Checked {} values, {} corrupt", result.checked, result.corrupt.len());

    println!();
    if result.is_ok() {
        println!("✓ Store verification passed");
        Ok(())
    } else {
        println!("✗ Store verification failed");
        Err("Verification failed".into())
    }
}

/// Checks every live value of the store at `path`.
pub fn verify(path: &Path, key: EncryptionKey) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let database = store::open(path, key)?;
    let result = database.invoke(|object| {
        let mut result = VerifyResult::default();
        for key in object.keys() {
            result.checked += 1;
            if object.verify_value(key) != Some(true) {
                result.corrupt.push(key);
            }
        }
        result
    })?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stashdb_core::dir::StoreDir;
    use stashdb_core::{Database, Settings, TaggedValue};
    use std::fs;

    #[test]
    fn finds_missing_value_files() {
        let dir = tempfile::tempdir().unwrap();
        let key = EncryptionKey::generate();
        {
            let database = Database::new(dir.path(), Settings::default()).unwrap();
            let k = key.clone();
            database
                .invoke(move |object| {
                    object.open(k)?;
                    object.put(Key::from(1), TaggedValue::new(vec![1; 10], 0))?;
                    object.put(Key::from(2), TaggedValue::new(vec![2; 10], 0))
                })
                .unwrap()
                .unwrap();
        }
        assert!(verify(dir.path(), key.clone()).unwrap().is_ok());

        // Value files live in two-level hex directories under the generation.
        let generation = StoreDir::new(dir.path()).version_dir(0);
        let victim = fs::read_dir(&generation)
            .unwrap()
            .filter_map(Result::ok)
            .find(|entry| entry.path().is_dir())
            .unwrap();
        fs::remove_dir_all(victim.path()).unwrap();

        let result = verify(dir.path(), key).unwrap();
        assert_eq!(result.checked, 2);
        assert!(!result.corrupt.is_empty());
    }
}
