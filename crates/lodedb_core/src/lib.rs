//! # lodedb Core
//!
//! Crash-safe record file store for lodedb.
//!
//! This crate persists variable-length binary records in a single file,
//! assigns each a stable logical identifier, reuses the slots of removed
//! records, and survives process crashes without losing index
//! integrity. It is the storage layer a graph database builds its nodes
//! and edges on.
//!
//! Three components compose bottom-up:
//!
//! - [`ByteStream`] - a seekable, position-tracked binary channel over a
//!   storage backend
//! - [`Wal`] - a pre-image write-ahead log that makes every index
//!   mutation atomic with respect to crashes
//! - [`RecordIndex`] - the table mapping logical ids to byte ranges,
//!   with a free list for id reuse and reconstruction-by-scan on open
//!
//! [`RecordStore`] ties the three together behind the store's lock file
//! and adds the payload operations callers actually use.
//!
//! ## Example
//!
//! ```rust
//! use lodedb_core::RecordStore;
//!
//! let mut store = RecordStore::open_in_memory().unwrap();
//!
//! let id = store.insert(b"node payload").unwrap();
//! assert!(store.contains(id));
//! assert_eq!(store.read(id).unwrap(), b"node payload");
//!
//! store.remove(id).unwrap();
//! // Removed ids are reused by later insertions.
//! assert_eq!(store.insert(b"replacement").unwrap(), id);
//! ```
//!
//! ## Concurrency
//!
//! A store instance assumes a single writer. An advisory lock file
//! keeps other processes out; mutation from multiple threads on the
//! same instance must be synchronized externally.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod paths;
mod records;
mod store;
mod stream;
mod types;
mod wal;

pub use config::Config;
pub use error::{CoreError, CoreResult};
pub use paths::StorePaths;
pub use records::{IndexEntry, RecordIndex, ENTRY_SIZE, INVALID_INDEX, INVALID_SIZE};
pub use store::RecordStore;
pub use stream::ByteStream;
pub use types::RecordId;
pub use wal::{Wal, WalEntry};
