//! Store directory layout.
//!
//! ```text
//! <base>/
//! ├─ version               # 4-byte little-endian current generation
//! ├─ version.tmp           # Temporary file for atomic version writes
//! └─ <generation>/
//!    ├─ binlog             # Encrypted append-only log
//!    ├─ binlog-compact     # Compactor output being written
//!    ├─ binlog-ready       # Compacted log waiting to replace `binlog`
//!    └─ <ab>/<cdef012345>  # Encrypted value files, named by place
//! ```
//!
//! A generation directory other than the current one is garbage and is
//! removed by the cleaner.

use crate::types::PlaceId;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const VERSION_FILE: &str = "version";
const VERSION_TEMP: &str = "version.tmp";
const BINLOG_FILE: &str = "binlog";
const COMPACT_FILE: &str = "binlog-compact";
const READY_FILE: &str = "binlog-ready";

/// Paths of a store rooted at a base directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreDir {
    base: PathBuf,
}

impl StoreDir {
    /// Creates the layout for `base`. Nothing is touched on disk.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Returns the base directory.
    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Returns the path of the version file.
    #[must_use]
    pub fn version_path(&self) -> PathBuf {
        self.base.join(VERSION_FILE)
    }

    /// Returns the directory of a generation.
    #[must_use]
    pub fn version_dir(&self, version: u32) -> PathBuf {
        self.base.join(version.to_string())
    }

    /// Returns the binlog path of a generation.
    #[must_use]
    pub fn binlog_path(&self, version: u32) -> PathBuf {
        self.version_dir(version).join(BINLOG_FILE)
    }

    /// Returns the compactor output path of a generation.
    #[must_use]
    pub fn compact_path(&self, version: u32) -> PathBuf {
        self.version_dir(version).join(COMPACT_FILE)
    }

    /// Returns the path of a finished compaction awaiting the swap.
    #[must_use]
    pub fn ready_path(&self, version: u32) -> PathBuf {
        self.version_dir(version).join(READY_FILE)
    }

    /// Returns the value file path of a place within a generation.
    #[must_use]
    pub fn place_path(&self, version: u32, place: &PlaceId) -> PathBuf {
        self.version_dir(version).join(place.relative_path())
    }

    /// Reads the current generation.
    ///
    /// Returns `None` if the version file is missing or malformed.
    #[must_use]
    pub fn read_version(&self) -> Option<u32> {
        let bytes = fs::read(self.version_path()).ok()?;
        let raw: [u8; 4] = bytes.as_slice().try_into().ok()?;
        Some(u32::from_le_bytes(raw))
    }

    /// Writes the current generation atomically (temp file + rename).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or renamed.
    pub fn write_version(&self, version: u32) -> io::Result<()> {
        fs::create_dir_all(&self.base)?;
        let temp = self.base.join(VERSION_TEMP);
        {
            let mut file = fs::File::create(&temp)?;
            file.write_all(&version.to_le_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&temp, self.version_path())
    }

    /// Lists the generation directories present on disk, sorted.
    #[must_use]
    pub fn list_versions(&self) -> Vec<u32> {
        let Ok(entries) = fs::read_dir(&self.base) else {
            return Vec::new();
        };
        let mut versions: Vec<u32> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_ok_and(|kind| kind.is_dir()))
            .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
            .collect();
        versions.sort_unstable();
        versions
    }

    /// Returns the smallest generation without a directory on disk.
    #[must_use]
    pub fn find_available_version(&self) -> u32 {
        let existing = self.list_versions();
        (0..=u32::MAX)
            .find(|candidate| existing.binary_search(candidate).is_err())
            .unwrap_or(u32::MAX)
    }
}
