//! Core type definitions for stashdb.

use std::fmt;

/// Opaque 128-bit identifier of a cached value.
///
/// The caller derives it from whatever identity it needs (file id, URL
/// hash, ...). Keys are totally ordered by `(high, low)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key {
    /// High 64 bits.
    pub high: u64,
    /// Low 64 bits.
    pub low: u64,
}

impl Key {
    /// Size of an encoded key in bytes.
    pub const SIZE: usize = 16;

    /// Creates a key from its halves.
    #[must_use]
    pub const fn new(high: u64, low: u64) -> Self {
        Self { high, low }
    }

    /// Encodes the key as 16 little-endian bytes (`high` first).
    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[..8].copy_from_slice(&self.high.to_le_bytes());
        bytes[8..].copy_from_slice(&self.low.to_le_bytes());
        bytes
    }

    /// Decodes a key written by [`to_bytes`](Self::to_bytes).
    #[must_use]
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let mut high = [0u8; 8];
        let mut low = [0u8; 8];
        high.copy_from_slice(&bytes[..8]);
        low.copy_from_slice(&bytes[8..]);
        Self {
            high: u64::from_le_bytes(high),
            low: u64::from_le_bytes(low),
        }
    }
}

impl From<u128> for Key {
    fn from(value: u128) -> Self {
        Self {
            high: (value >> 64) as u64,
            low: value as u64,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}{:016x}", self.high, self.low)
    }
}

/// Random identifier of the file holding a value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlaceId(pub [u8; 7]);

impl PlaceId {
    /// Generates a random place.
    #[must_use]
    pub fn random() -> Self {
        use rand::RngCore;

        let mut bytes = [0u8; 7];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Relative path of the value file: first byte as a directory, the
    /// remaining six bytes as the file name, both in lowercase hex.
    #[must_use]
    pub fn relative_path(&self) -> String {
        let mut path = format!("{:02x}/", self.0[0]);
        for byte in &self.0[1..] {
            path.push_str(&format!("{byte:02x}"));
        }
        path
    }
}

impl fmt::Display for PlaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// A value together with its caller-assigned tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaggedValue {
    /// Value bytes. Empty means "absent".
    pub bytes: Vec<u8>,
    /// Caller-defined partition, e.g. "image" or "sticker".
    pub tag: u8,
}

impl TaggedValue {
    /// Creates a tagged value.
    #[must_use]
    pub fn new(bytes: Vec<u8>, tag: u8) -> Self {
        Self { bytes, tag }
    }
}
