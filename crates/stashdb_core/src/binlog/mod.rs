//! Binlog: the append-only encrypted log behind the in-memory index.
//!
//! Every mutation of the store appends a record; opening a store replays
//! the binlog front to back to rebuild the key → location map.
//!
//! ## Record Format
//!
//! Each record starts with a one-byte type tag and has a size that is a
//! multiple of the cipher block (16 bytes):
//!
//! ```text
//! Store         | 0x01 | tag | size (3) | place (7) | checksum (4) | key (16) | [time (8) | reserved (8)]
//! MultiStore    | 0x02 | count (3) | reserved (12) | count × Store
//! MultiRemove   | 0x03 | count (3) | reserved (12) | count × key (16)
//! MultiAccess   | 0x04 | count (3) | time (8) | reserved (4) | count × key (16)
//! ```
//!
//! The bracketed time suffix is present when the binlog header has the
//! "track estimated time" flag.
//!
//! ## Recovery Policy
//!
//! Replay stops at the first record that is truncated, carries an unknown
//! type, declares an absurd bundle count, or is rejected by its handler.
//! Everything before it is kept; everything after it is treated as a torn
//! tail and discarded so that later appends are not lost behind garbage.

mod reader;
mod record;
mod time;

pub use reader::{BinlogReader, ReadOutcome};
pub use record::{
    read_record_size, BinlogHeader, BinlogRecord, RecordFormat, RecordSize, StoreRecord,
    BINLOG_HEADER_SIZE, BUNDLED_RECORDS_LIMIT, BUNDLE_HEADER_SIZE, DATA_SIZE_LIMIT,
    MULTI_ACCESS, MULTI_REMOVE, MULTI_STORE, STORE,
};
pub use time::{system_clock, unixtime, Clock, EstimatedTimePoint, MAX_TIME_ADVANCEMENT};
