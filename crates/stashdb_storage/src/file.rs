//! Encrypted file primitive.
//!
//! Every file written by the cache store goes through [`EncryptedFile`].
//!
//! ## Layout
//!
//! ```text
//! | magic (8, plain) | salt (64, plain) | header (32, encrypted) | payload (encrypted) |
//! ```
//!
//! The header is `format (1) | reserved (7) | checksum (8) | reserved (16)`.
//! The checksum covers the salt and the header with a zeroed checksum field.
//! It is computed over plaintext and stored encrypted, so opening with a
//! different key produces a mismatch that is reported as
//! [`StorageError::WrongKey`] rather than as corruption.
//!
//! Payload offsets seen by callers start at zero right after the header.
//! All reads and writes are multiples of [`BLOCK_SIZE`].

use crate::encryption::{random_salt, CtrState, EncryptionKey, BLOCK_SIZE, SALT_SIZE};
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Plain prefix identifying an encrypted file.
pub const FILE_MAGIC: [u8; 8] = *b"STASHENC";

/// Size of the encrypted header in bytes.
pub const HEADER_SIZE: usize = 32;

/// Bytes preceding the payload on disk.
pub const PHYSICAL_HEADER_SIZE: u64 = (FILE_MAGIC.len() + SALT_SIZE + HEADER_SIZE) as u64;

/// The only header format understood by this version.
const FORMAT_0: u8 = 0;

/// How an [`EncryptedFile`] is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Read an existing file. No lock is taken.
    Read,
    /// Read an existing file and append to it, or start a fresh one if empty.
    /// Takes an exclusive advisory lock.
    ReadAppend,
    /// Truncate and start a fresh file. Takes an exclusive advisory lock.
    Write,
}

/// A single OS file with transparent block encryption.
///
/// # Example
///
/// ```no_run
/// use stashdb_storage::{EncryptedFile, EncryptionKey, Mode};
/// use std::path::Path;
///
/// let key = EncryptionKey::generate();
/// let mut file = EncryptedFile::open(Path::new("value"), Mode::Write, &key).unwrap();
/// file.write_with_padding(b"some bytes");
/// file.flush();
/// ```
pub struct EncryptedFile {
    path: PathBuf,
    file: File,
    state: CtrState,
    /// Payload offset of the next read or write.
    offset: u64,
    /// Payload size known to be on disk.
    data_size: u64,
    locked: bool,
}

impl EncryptedFile {
    /// Opens a file in the given mode.
    ///
    /// # Errors
    ///
    /// - [`StorageError::LockFailed`] if another handle holds the lock
    /// - [`StorageError::WrongKey`] if the header checksum does not match
    /// - [`StorageError::Failed`] if the header is truncated or of unknown format
    /// - [`StorageError::Io`] on other I/O failures
    pub fn open(path: &Path, mode: Mode, key: &EncryptionKey) -> StorageResult<Self> {
        let file = match mode {
            Mode::Read => File::open(path)?,
            Mode::ReadAppend | Mode::Write => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(false)
                    .open(path)?
            }
        };

        let locked = mode != Mode::Read;
        if locked && file.try_lock_exclusive().is_err() {
            return Err(StorageError::LockFailed);
        }

        let fresh = match mode {
            Mode::Write => {
                file.set_len(0)?;
                true
            }
            Mode::ReadAppend => file.metadata()?.len() == 0,
            Mode::Read => false,
        };

        let result = if fresh {
            Self::write_header(path, file, key)
        } else {
            Self::read_header(path, file, key)
        };
        let mut opened = result?;
        opened.locked = locked;

        if mode == Mode::ReadAppend {
            let end = opened.data_size;
            opened.seek(end);
        }
        Ok(opened)
    }

    fn write_header(path: &Path, mut file: File, key: &EncryptionKey) -> StorageResult<Self> {
        let salt = random_salt();
        let state = key.prepare_ctr_state(&salt);

        let mut header = [0u8; HEADER_SIZE];
        header[0] = FORMAT_0;
        let checksum = header_checksum(&salt, &header);
        header[8..16].copy_from_slice(&checksum.to_le_bytes());
        state.encrypt(&mut header, 0);

        file.seek(SeekFrom::Start(0))?;
        file.write_all(&FILE_MAGIC)?;
        file.write_all(&salt)?;
        file.write_all(&header)?;
        file.flush()?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            state,
            offset: 0,
            data_size: 0,
            locked: false,
        })
    }

    fn read_header(path: &Path, mut file: File, key: &EncryptionKey) -> StorageResult<Self> {
        let mut magic = [0u8; FILE_MAGIC.len()];
        let mut salt = [0u8; SALT_SIZE];
        let mut header = [0u8; HEADER_SIZE];

        file.seek(SeekFrom::Start(0))?;
        let complete = read_full(&mut file, &mut magic)?
            && read_full(&mut file, &mut salt)?
            && read_full(&mut file, &mut header)?;
        if !complete {
            return Err(StorageError::failed(format!(
                "truncated header in {}",
                path.display()
            )));
        }
        if magic != FILE_MAGIC {
            return Err(StorageError::failed(format!(
                "bad magic in {}",
                path.display()
            )));
        }

        let state = key.prepare_ctr_state(&salt);
        state.decrypt(&mut header, 0);

        let mut stored = [0u8; 8];
        stored.copy_from_slice(&header[8..16]);
        header[8..16].fill(0);
        if u64::from_le_bytes(stored) != header_checksum(&salt, &header) {
            return Err(StorageError::WrongKey);
        }
        if header[0] != FORMAT_0 {
            return Err(StorageError::failed(format!(
                "unknown format {} in {}",
                header[0],
                path.display()
            )));
        }

        let physical = file.metadata()?.len();
        let data_size = physical.saturating_sub(PHYSICAL_HEADER_SIZE);
        Ok(Self {
            path: path.to_path_buf(),
            file,
            state,
            offset: 0,
            data_size,
            locked: false,
        })
    }

    /// Returns the path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the payload size on disk, including any unaligned tail.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.data_size
    }

    /// Returns the payload offset of the next read or write.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Moves to a payload offset, rounded down to a block boundary.
    ///
    /// Returns false if the physical seek failed.
    pub fn seek(&mut self, offset: u64) -> bool {
        let aligned = offset - offset % BLOCK_SIZE as u64;
        match self.file.seek(SeekFrom::Start(PHYSICAL_HEADER_SIZE + aligned)) {
            Ok(_) => {
                self.offset = aligned;
                true
            }
            Err(error) => {
                tracing::warn!(path = %self.path.display(), %error, "seek failed");
                false
            }
        }
    }

    /// Reads block-aligned data into `buffer`.
    ///
    /// Returns the number of bytes read, always a multiple of [`BLOCK_SIZE`].
    /// A trailing partial block is left unread and the position is moved
    /// back to its start. Zero means end of file or an I/O failure.
    ///
    /// # Panics
    ///
    /// Panics if `buffer.len()` is not a multiple of [`BLOCK_SIZE`].
    pub fn read(&mut self, buffer: &mut [u8]) -> usize {
        assert!(buffer.len() % BLOCK_SIZE == 0, "unaligned read");

        let mut count = 0;
        while count < buffer.len() {
            match self.file.read(&mut buffer[count..]) {
                Ok(0) => break,
                Ok(read) => count += read,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => {
                    tracing::warn!(path = %self.path.display(), %error, "read failed");
                    break;
                }
            }
        }

        let back = count % BLOCK_SIZE;
        if back != 0 {
            count -= back;
            if self
                .file
                .seek(SeekFrom::Start(
                    PHYSICAL_HEADER_SIZE + self.offset + count as u64,
                ))
                .is_err()
            {
                return 0;
            }
        }
        if count > 0 {
            self.state
                .decrypt(&mut buffer[..count], HEADER_SIZE as u64 + self.offset);
            self.offset += count as u64;
        }
        count
    }

    /// Encrypts and writes block-aligned data.
    ///
    /// Returns the number of bytes durably placed in the file, a multiple of
    /// [`BLOCK_SIZE`]. On a short write the unwritten suffix of `data` is
    /// decrypted back to plaintext and the position stays at the end of what
    /// was written, so the next write replaces any torn block.
    ///
    /// # Panics
    ///
    /// Panics if `data.len()` is not a multiple of [`BLOCK_SIZE`].
    pub fn write(&mut self, data: &mut [u8]) -> usize {
        assert!(data.len() % BLOCK_SIZE == 0, "unaligned write");
        if data.is_empty() {
            return 0;
        }

        let start = self.offset;
        self.state.encrypt(data, HEADER_SIZE as u64 + start);

        let mut written = 0;
        while written < data.len() {
            match self.file.write(&data[written..]) {
                Ok(0) => break,
                Ok(count) => written += count,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => {
                    tracing::warn!(path = %self.path.display(), %error, "write failed");
                    break;
                }
            }
        }

        let aligned = written - written % BLOCK_SIZE;
        if aligned < data.len() {
            let offset = HEADER_SIZE as u64 + start + aligned as u64;
            self.state.decrypt(&mut data[aligned..], offset);
            if written != aligned {
                let _ = self.file.seek(SeekFrom::Start(
                    PHYSICAL_HEADER_SIZE + start + aligned as u64,
                ));
            }
        }
        // Callers always get their plaintext back.
        self.state.decrypt(&mut data[..aligned], HEADER_SIZE as u64 + start);

        self.offset = start + aligned as u64;
        self.data_size = self.data_size.max(self.offset);
        aligned
    }

    /// Writes `data` followed by zero padding up to a block boundary.
    ///
    /// Returns true if everything was written.
    pub fn write_with_padding(&mut self, data: &[u8]) -> bool {
        let mut buffer = data.to_vec();
        buffer.resize(padded_size(data.len()), 0);
        self.write(&mut buffer) == buffer.len()
    }

    /// Reads a value of exactly `size` bytes written by
    /// [`write_with_padding`](Self::write_with_padding).
    ///
    /// Returns `None` if the file is shorter than the padded size.
    pub fn read_with_padding(&mut self, size: usize) -> Option<Vec<u8>> {
        let mut buffer = vec![0u8; padded_size(size)];
        if self.read(&mut buffer) != buffer.len() {
            return None;
        }
        buffer.truncate(size);
        Some(buffer)
    }

    /// Discards the payload from `offset` onwards and moves there.
    ///
    /// Returns false on failure.
    pub fn truncate(&mut self, offset: u64) -> bool {
        let aligned = offset - offset % BLOCK_SIZE as u64;
        match self.file.set_len(PHYSICAL_HEADER_SIZE + aligned) {
            Ok(()) => {
                self.data_size = aligned;
                self.seek(aligned)
            }
            Err(error) => {
                tracing::warn!(path = %self.path.display(), %error, "truncate failed");
                false
            }
        }
    }

    /// Flushes written data to the OS.
    pub fn flush(&mut self) -> bool {
        self.file.flush().is_ok()
    }

    /// Syncs data and metadata to durable storage.
    pub fn sync(&mut self) -> bool {
        self.file.sync_all().is_ok()
    }
}

impl Drop for EncryptedFile {
    fn drop(&mut self) {
        if self.locked {
            let _ = self.file.flush();
            let _ = FileExt::unlock(&self.file);
        }
    }
}

impl std::fmt::Debug for EncryptedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedFile")
            .field("path", &self.path)
            .field("offset", &self.offset)
            .field("size", &self.data_size)
            .finish_non_exhaustive()
    }
}

/// Rounds `size` up to a whole number of blocks.
#[must_use]
pub const fn padded_size(size: usize) -> usize {
    size.div_ceil(BLOCK_SIZE) * BLOCK_SIZE
}

fn header_checksum(salt: &[u8; SALT_SIZE], header: &[u8; HEADER_SIZE]) -> u64 {
    let digest = Sha256::new()
        .chain_update(salt)
        .chain_update(header)
        .finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Like `read_exact`, but reports a short read as `Ok(false)`.
fn read_full(file: &mut File, buffer: &mut [u8]) -> io::Result<bool> {
    match file.read_exact(buffer) {
        Ok(()) => Ok(true),
        Err(error) if error.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(error) => Err(error),
    }
}
