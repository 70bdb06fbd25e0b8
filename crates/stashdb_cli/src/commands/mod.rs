//! CLI command implementations.

pub mod dump_binlog;
pub mod inspect;
pub mod key;
pub mod store;
pub mod values;
pub mod verify;
