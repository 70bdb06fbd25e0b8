//! Binlog record types and serialization.

use super::time::EstimatedTimePoint;
use crate::types::{Key, PlaceId};

/// Type tag of a single store record.
pub const STORE: u8 = 0x01;
/// Type tag of a bundle of store records.
pub const MULTI_STORE: u8 = 0x02;
/// Type tag of a bundle of removed keys.
pub const MULTI_REMOVE: u8 = 0x03;
/// Type tag of a bundle of accessed keys.
pub const MULTI_ACCESS: u8 = 0x04;

/// Exclusive upper bound on the number of parts in a bundle (24-bit count).
pub const BUNDLED_RECORDS_LIMIT: usize = 1 << 24;

/// Exclusive upper bound on the size of a value (24-bit size).
pub const DATA_SIZE_LIMIT: usize = 1 << 24;

/// Size of a bundle header in bytes.
pub const BUNDLE_HEADER_SIZE: usize = 16;

/// Size of the binlog header in bytes.
pub const BINLOG_HEADER_SIZE: usize = 16;

const STORE_SIZE: usize = 32;
const STORE_WITH_TIME_SIZE: usize = 48;
const FLAG_TRACK_TIME: u32 = 0x01;
const HEADER_FORMAT: u8 = 0;

/// Record layout selected by the binlog header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordFormat {
    /// Store records carry an estimated access time.
    pub track_time: bool,
}

impl RecordFormat {
    /// Creates a format.
    #[must_use]
    pub const fn new(track_time: bool) -> Self {
        Self { track_time }
    }

    /// Size of one store record (standalone or inside a bundle).
    #[must_use]
    pub const fn store_size(self) -> usize {
        if self.track_time {
            STORE_WITH_TIME_SIZE
        } else {
            STORE_SIZE
        }
    }

    /// Size of a bundle holding `count` parts of the given type.
    #[must_use]
    pub const fn bundle_size(self, record_type: u8, count: usize) -> usize {
        let part = if record_type == MULTI_STORE {
            self.store_size()
        } else {
            Key::SIZE
        };
        BUNDLE_HEADER_SIZE + part * count
    }
}

/// The binlog's own header, written as the first payload block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinlogHeader {
    /// Record layout of this binlog.
    pub format: RecordFormat,
    /// Unix time the binlog was created at.
    pub system_time: u32,
}

impl BinlogHeader {
    /// Encodes as `format | flags (3) | system time (4) | reserved (8)`.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; BINLOG_HEADER_SIZE] {
        let mut bytes = [0u8; BINLOG_HEADER_SIZE];
        bytes[0] = HEADER_FORMAT;
        let flags = if self.format.track_time {
            FLAG_TRACK_TIME
        } else {
            0
        };
        write_u24(&mut bytes[1..4], flags);
        bytes[4..8].copy_from_slice(&self.system_time.to_le_bytes());
        bytes
    }

    /// Decodes a header. Returns `None` for an unknown format or flags.
    #[must_use]
    pub fn from_bytes(bytes: &[u8; BINLOG_HEADER_SIZE]) -> Option<Self> {
        if bytes[0] != HEADER_FORMAT {
            return None;
        }
        let flags = read_u24(&bytes[1..4]);
        if flags & !FLAG_TRACK_TIME != 0 {
            return None;
        }
        Some(Self {
            format: RecordFormat::new(flags & FLAG_TRACK_TIME != 0),
            system_time: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        })
    }
}

/// Location and metadata of one stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreRecord {
    /// Key of the value.
    pub key: Key,
    /// Caller-assigned tag.
    pub tag: u8,
    /// Value size in bytes.
    pub size: u32,
    /// File holding the value.
    pub place: PlaceId,
    /// CRC-32 of the value.
    pub checksum: u32,
    /// Estimated time of the last access. Only encoded when tracking time.
    pub time: EstimatedTimePoint,
}

impl StoreRecord {
    fn encode_into(&self, format: RecordFormat, buf: &mut Vec<u8>) {
        buf.push(STORE);
        buf.push(self.tag);
        let mut size = [0u8; 3];
        write_u24(&mut size, self.size);
        buf.extend_from_slice(&size);
        buf.extend_from_slice(&self.place.0);
        buf.extend_from_slice(&self.checksum.to_le_bytes());
        buf.extend_from_slice(&self.key.to_bytes());
        if format.track_time {
            buf.extend_from_slice(&self.time.to_bytes());
            buf.extend_from_slice(&[0u8; 8]);
        }
    }

    fn decode(data: &[u8], format: RecordFormat) -> Option<Self> {
        if data.len() != format.store_size() || data[0] != STORE {
            return None;
        }
        let mut place = [0u8; 7];
        place.copy_from_slice(&data[5..12]);
        let time = if format.track_time {
            EstimatedTimePoint::from_bytes(&data[32..40])
        } else {
            EstimatedTimePoint::default()
        };
        Some(Self {
            key: read_key(&data[16..32]),
            tag: data[1],
            size: read_u24(&data[2..5]),
            place: PlaceId(place),
            checksum: u32::from_le_bytes([data[12], data[13], data[14], data[15]]),
            time,
        })
    }
}

/// A record appended to the binlog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinlogRecord {
    /// A value was written.
    Store(StoreRecord),
    /// Several values were written (compactor output).
    MultiStore(Vec<StoreRecord>),
    /// Keys were removed.
    MultiRemove(Vec<Key>),
    /// Keys were read at the given time.
    MultiAccess {
        /// Estimated access time.
        time: EstimatedTimePoint,
        /// Accessed keys.
        keys: Vec<Key>,
    },
}

impl BinlogRecord {
    /// Returns the record's type tag.
    #[must_use]
    pub fn record_type(&self) -> u8 {
        match self {
            Self::Store(_) => STORE,
            Self::MultiStore(_) => MULTI_STORE,
            Self::MultiRemove(_) => MULTI_REMOVE,
            Self::MultiAccess { .. } => MULTI_ACCESS,
        }
    }

    /// Returns the encoded size of the record.
    #[must_use]
    pub fn encoded_size(&self, format: RecordFormat) -> usize {
        match self {
            Self::Store(_) => format.store_size(),
            Self::MultiStore(parts) => format.bundle_size(MULTI_STORE, parts.len()),
            Self::MultiRemove(keys) | Self::MultiAccess { keys, .. } => {
                format.bundle_size(self.record_type(), keys.len())
            }
        }
    }

    /// Serializes the record. The result is a multiple of 16 bytes.
    #[must_use]
    pub fn encode(&self, format: RecordFormat) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_size(format));
        match self {
            Self::Store(store) => store.encode_into(format, &mut buf),
            Self::MultiStore(parts) => {
                push_bundle_header(&mut buf, MULTI_STORE, parts.len());
                buf.extend_from_slice(&[0u8; 12]);
                for part in parts {
                    part.encode_into(format, &mut buf);
                }
            }
            Self::MultiRemove(keys) => {
                push_bundle_header(&mut buf, MULTI_REMOVE, keys.len());
                buf.extend_from_slice(&[0u8; 12]);
                push_keys(&mut buf, keys);
            }
            Self::MultiAccess { time, keys } => {
                push_bundle_header(&mut buf, MULTI_ACCESS, keys.len());
                buf.extend_from_slice(&time.to_bytes());
                buf.extend_from_slice(&[0u8; 4]);
                push_keys(&mut buf, keys);
            }
        }
        debug_assert_eq!(buf.len(), self.encoded_size(format));
        buf
    }

    /// Deserializes a record of exactly the size reported by
    /// [`read_record_size`].
    ///
    /// Returns `None` if the bytes do not form a well-shaped record.
    #[must_use]
    pub fn decode(data: &[u8], format: RecordFormat) -> Option<Self> {
        let record_type = *data.first()?;
        match record_type {
            STORE => StoreRecord::decode(data, format).map(Self::Store),
            MULTI_STORE | MULTI_REMOVE | MULTI_ACCESS => {
                if data.len() < BUNDLE_HEADER_SIZE {
                    return None;
                }
                let count = read_u24(&data[1..4]) as usize;
                if data.len() != format.bundle_size(record_type, count) {
                    return None;
                }
                let body = &data[BUNDLE_HEADER_SIZE..];
                match record_type {
                    MULTI_STORE => body
                        .chunks_exact(format.store_size())
                        .map(|part| StoreRecord::decode(part, format))
                        .collect::<Option<Vec<_>>>()
                        .map(Self::MultiStore),
                    MULTI_REMOVE => Some(Self::MultiRemove(read_keys(body))),
                    _ => Some(Self::MultiAccess {
                        time: EstimatedTimePoint::from_bytes(&data[4..12]),
                        keys: read_keys(body),
                    }),
                }
            }
            _ => None,
        }
    }
}

/// Result of inspecting the start of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordSize {
    /// Not enough bytes to tell yet.
    Unknown,
    /// The record has an unknown type or an absurd count.
    Invalid,
    /// The record occupies this many bytes.
    Size(usize),
}

/// Determines the size of the record starting at `data[0]`.
#[must_use]
pub fn read_record_size(data: &[u8], format: RecordFormat, max_bundled: usize) -> RecordSize {
    let Some(&record_type) = data.first() else {
        return RecordSize::Unknown;
    };
    match record_type {
        STORE => RecordSize::Size(format.store_size()),
        MULTI_STORE | MULTI_REMOVE | MULTI_ACCESS => {
            if data.len() < 4 {
                return RecordSize::Unknown;
            }
            let count = read_u24(&data[1..4]) as usize;
            if count == 0 || count > max_bundled {
                RecordSize::Invalid
            } else {
                RecordSize::Size(format.bundle_size(record_type, count))
            }
        }
        _ => RecordSize::Invalid,
    }
}

fn push_bundle_header(buf: &mut Vec<u8>, record_type: u8, count: usize) {
    buf.push(record_type);
    let mut bytes = [0u8; 3];
    write_u24(&mut bytes, u32::try_from(count).unwrap_or(u32::MAX));
    buf.extend_from_slice(&bytes);
}

fn push_keys(buf: &mut Vec<u8>, keys: &[Key]) {
    for key in keys {
        buf.extend_from_slice(&key.to_bytes());
    }
}

fn read_keys(body: &[u8]) -> Vec<Key> {
    body.chunks_exact(Key::SIZE).map(read_key).collect()
}

fn read_key(bytes: &[u8]) -> Key {
    let mut raw = [0u8; Key::SIZE];
    raw.copy_from_slice(bytes);
    Key::from_bytes(&raw)
}

fn write_u24(out: &mut [u8], value: u32) {
    out.copy_from_slice(&value.to_le_bytes()[..3]);
}

fn read_u24(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0])
}
