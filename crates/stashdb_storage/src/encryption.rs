//! Master key handling and AES-256-CTR processing.
//!
//! ## Security Model
//!
//! - The application supplies a fixed-size master key; it is never stored
//! - Every file carries its own random salt
//! - The per-file cipher key and IV are derived from key halves and salt halves
//! - Payload is encrypted with AES-256 in counter mode, so any block-aligned
//!   span can be encrypted or decrypted independently given its offset
//!
//! ```text
//! cipher key = SHA-256(master[..128] || salt[..32])
//! iv         = SHA-256(master[128..] || salt[32..])[..16]
//! counter(n) = iv (big-endian u128) + n
//! ```

use crate::error::{StorageError, StorageResult};
use aes_gcm::aes::cipher::{BlockEncrypt, Key, KeyInit};
use aes_gcm::aes::{Aes256, Block};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of the master key in bytes.
pub const KEY_SIZE: usize = 256;
/// Size of the per-file salt in bytes.
pub const SALT_SIZE: usize = 64;
/// Cipher block size. Every encrypted span must be a multiple of it.
pub const BLOCK_SIZE: usize = 16;
/// Size of the derived AES-256 key in bytes.
pub const CIPHER_KEY_SIZE: usize = 32;
/// Size of the CTR initial counter block in bytes.
pub const IV_SIZE: usize = 16;

/// Master key for a cache store.
///
/// The key is automatically zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Generates a new random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice is not exactly [`KEY_SIZE`] bytes.
    pub fn from_bytes(bytes: &[u8]) -> StorageResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(StorageError::InvalidKeySize {
                expected: KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let mut key_bytes = [0u8; KEY_SIZE];
        key_bytes.copy_from_slice(bytes);
        Ok(Self { bytes: key_bytes })
    }

    /// Derives a key from a passphrase using HKDF-SHA256.
    ///
    /// HKDF is not a password hashing function. It is appropriate when the
    /// passphrase already has high entropy.
    ///
    /// # Errors
    ///
    /// Returns an error if the expansion fails.
    pub fn derive_from_passphrase(passphrase: &[u8], salt: &[u8]) -> StorageResult<Self> {
        use hkdf::Hkdf;

        let hk = Hkdf::<Sha256>::new(Some(salt), passphrase);
        let mut bytes = [0u8; KEY_SIZE];
        hk.expand(b"stashdb-master-key-v1", &mut bytes)
            .map_err(|_| StorageError::failed("HKDF expand failed"))?;
        Ok(Self { bytes })
    }

    /// Returns the key as a byte slice.
    ///
    /// Be careful with this method - don't log or serialize the result.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Derives the CTR context for a file with the given salt.
    #[must_use]
    pub fn prepare_ctr_state(&self, salt: &[u8; SALT_SIZE]) -> CtrState {
        let half_key = KEY_SIZE / 2;
        let half_salt = SALT_SIZE / 2;

        let key = Sha256::new()
            .chain_update(&self.bytes[..half_key])
            .chain_update(&salt[..half_salt])
            .finalize();
        let iv = Sha256::new()
            .chain_update(&self.bytes[half_key..])
            .chain_update(&salt[half_salt..])
            .finalize();

        let mut iv_bytes = [0u8; IV_SIZE];
        iv_bytes.copy_from_slice(&iv[..IV_SIZE]);
        CtrState::new(&key, iv_bytes)
    }
}

impl PartialEq for EncryptionKey {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for EncryptionKey {}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// AES-256-CTR context bound to one (cipher key, IV) pair.
///
/// Encryption and decryption are the same keystream XOR. The keystream
/// position is derived from the byte offset of the span, so spans can be
/// processed in any order.
#[derive(Clone)]
pub struct CtrState {
    cipher: Aes256,
    iv: [u8; IV_SIZE],
}

impl CtrState {
    fn new(key: &Key<Aes256>, iv: [u8; IV_SIZE]) -> Self {
        Self {
            cipher: Aes256::new(key),
            iv,
        }
    }

    /// Encrypts `data` in place as if it were located at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if `data.len()` or `offset` is not a multiple of [`BLOCK_SIZE`].
    pub fn encrypt(&self, data: &mut [u8], offset: u64) {
        self.process(data, offset);
    }

    /// Decrypts `data` in place as if it were located at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if `data.len()` or `offset` is not a multiple of [`BLOCK_SIZE`].
    pub fn decrypt(&self, data: &mut [u8], offset: u64) {
        self.process(data, offset);
    }

    fn process(&self, data: &mut [u8], offset: u64) {
        assert!(
            data.len() % BLOCK_SIZE == 0,
            "CTR span of {} bytes is not block aligned",
            data.len()
        );
        assert!(
            offset % BLOCK_SIZE as u64 == 0,
            "CTR offset {offset} is not block aligned"
        );

        let mut counter = u128::from_be_bytes(self.iv)
            .wrapping_add(u128::from(offset / BLOCK_SIZE as u64));
        for chunk in data.chunks_exact_mut(BLOCK_SIZE) {
            let mut keystream = Block::from(counter.to_be_bytes());
            self.cipher.encrypt_block(&mut keystream);
            for (byte, mask) in chunk.iter_mut().zip(keystream.iter()) {
                *byte ^= mask;
            }
            counter = counter.wrapping_add(1);
        }
    }
}

impl std::fmt::Debug for CtrState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CtrState").finish_non_exhaustive()
    }
}

/// Generates a fresh random salt.
#[must_use]
pub fn random_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}
