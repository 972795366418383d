//! Write-ahead log for crash recovery.
//!
//! The WAL makes every index-table and count mutation atomic with respect
//! to crashes. Before the record index overwrites a byte range of the data
//! stream, it logs the range's **pre-image** here; if the process dies
//! before the operation commits, the next open rolls the half-applied
//! operation back by replaying the pre-images.
//!
//! ## WAL File Format
//!
//! ```text
//! | magic "LWAL" (4) | version (2) | committed (8) |   <- header
//! | pos (8) | stream_size (8) | len (4) | data | crc32 (4) |  <- entry *
//! ```
//!
//! `committed` is the number of fully durable entries. It is bumped only
//! after an entry is flushed, and zeroed by [`Wal::commit`] when the
//! operation's writes have all reached the data stream.
//!
//! ## Recovery Policy
//!
//! On open, the log distinguishes **tolerated** and **fatal** conditions:
//!
//! - Tolerated (treated as a clean log): a missing or empty log file; a
//!   header-only torn write; trailing bytes past the last committed entry.
//!   These are crashes that happened outside a protected mutation.
//! - Fatal (`WalCorruption` / `ChecksumMismatch`): bad magic, unsupported
//!   version, fewer decodable entries than `committed`, or a CRC failure
//!   in a committed entry. These mean the log cannot be trusted to undo a
//!   mutation that *was* in flight, so the store must not open.
//!
//! Entries are undone newest-first: each restores its pre-image bytes and
//! shrinks the stream back to the size recorded at logging time.

mod entry;

pub use entry::{WalEntry, WAL_HEADER_SIZE, WAL_MAGIC, WAL_VERSION};

use crate::error::{CoreError, CoreResult};
use crate::stream::ByteStream;
use entry::WAL_COMMITTED_OFFSET;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Log stream plus the in-memory mirror of its committed entry count.
struct LogState {
    stream: ByteStream,
    committed: u64,
}

/// Pre-image undo log guarding the data stream.
///
/// The `Wal` borrows a shared handle to the data stream so it can capture
/// pre-images in [`Wal::record_log`] and write them back during recovery.
/// It owns its log stream exclusively.
pub struct Wal {
    log: Mutex<LogState>,
    data: Arc<Mutex<ByteStream>>,
    sync_on_write: bool,
}

impl Wal {
    /// Opens the log and recovers the data stream if a previous session
    /// died mid-mutation.
    ///
    /// Recovery runs here, before the record index reconstructs itself,
    /// so the index only ever scans an internally consistent stream.
    ///
    /// # Errors
    ///
    /// Returns `WalCorruption`/`ChecksumMismatch` when the log exists but
    /// cannot be trusted (see the module docs for the recovery policy),
    /// or a storage error if the underlying files fail.
    pub fn open(
        log_backend: Box<dyn lodedb_storage::StorageBackend>,
        data: Arc<Mutex<ByteStream>>,
        sync_on_write: bool,
    ) -> CoreResult<Self> {
        let mut log = ByteStream::new(log_backend);
        let size = log.size()?;

        if size < WAL_HEADER_SIZE {
            // Nothing was ever committed: either a fresh store or a crash
            // before the header write completed.
            if size > 0 {
                warn!(size, "reinitializing torn WAL header");
            }
            log.truncate(0)?;
            write_header(&mut log, 0)?;
            log.flush()?;

            let wal = Self {
                log: Mutex::new(LogState {
                    stream: log,
                    committed: 0,
                }),
                data,
                sync_on_write,
            };
            return Ok(wal);
        }

        log.reset();
        let magic = log.read_bytes(4)?;
        if magic != WAL_MAGIC {
            return Err(CoreError::wal_corruption("bad WAL magic"));
        }
        let version_bytes = log.read_bytes(2)?;
        let version = u16::from_le_bytes([version_bytes[0], version_bytes[1]]);
        if version != WAL_VERSION {
            return Err(CoreError::wal_corruption(format!(
                "unsupported WAL version {version}"
            )));
        }
        let committed = log.read_i64()?;
        if committed < 0 {
            return Err(CoreError::wal_corruption("negative committed entry count"));
        }

        let wal = Self {
            log: Mutex::new(LogState {
                stream: log,
                committed: committed as u64,
            }),
            data,
            sync_on_write,
        };

        if committed > 0 {
            wal.replay()?;
        } else {
            // Clean close; drop any torn tail past the header.
            let mut state = wal.log.lock();
            state.stream.truncate(WAL_HEADER_SIZE)?;
            debug!("write-ahead log is clean");
        }

        Ok(wal)
    }

    /// Captures the pre-image of `[pos, pos + len)` of the data stream.
    ///
    /// Must be called, and must complete, before those bytes are
    /// overwritten. The entry is durable when this returns: it is flushed
    /// before the committed count that makes it visible to recovery.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the data stream cannot be read or the
    /// log cannot be appended.
    pub fn record_log(&self, pos: u64, len: u64) -> CoreResult<()> {
        let (stream_size, pre_image) = {
            let mut data = self.data.lock();
            let size = data.size()?;
            if pos < size {
                let capture = (size - pos).min(len) as usize;
                data.seek(pos);
                (size, data.read_bytes(capture)?)
            } else {
                (size, Vec::new())
            }
        };

        let entry = WalEntry {
            pos,
            stream_size,
            data: pre_image,
        };

        let mut state = self.log.lock();
        let end = state.stream.size()?;
        state.stream.seek(end);
        state.stream.write_bytes(&entry.encode())?;
        state.stream.flush()?;

        // Only a flushed entry may be counted; recovery trusts `committed`.
        state.committed += 1;
        let committed = state.committed;
        state.stream.seek(WAL_COMMITTED_OFFSET);
        state.stream.write_i64(committed as i64)?;
        state.stream.flush()?;
        if self.sync_on_write {
            state.stream.sync()?;
        }

        Ok(())
    }

    /// Marks the current operation complete and empties the log.
    ///
    /// Called by the record index at the end of every public mutation;
    /// the zeroed log is the clean-close marker recovery looks for.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the log cannot be reset.
    pub fn commit(&self) -> CoreResult<()> {
        let mut state = self.log.lock();
        state.committed = 0;
        state.stream.seek(WAL_COMMITTED_OFFSET);
        state.stream.write_i64(0)?;
        state.stream.truncate(WAL_HEADER_SIZE)?;
        state.stream.flush()?;
        if self.sync_on_write {
            state.stream.sync()?;
        }
        Ok(())
    }

    /// Number of entries logged for the operation in flight.
    #[must_use]
    pub fn pending_entries(&self) -> u64 {
        self.log.lock().committed
    }

    /// Undoes every committed entry, newest first, then resets the log.
    fn replay(&self) -> CoreResult<()> {
        let entries = {
            let mut state = self.log.lock();
            let size = state.stream.size()?;
            state.stream.seek(WAL_HEADER_SIZE);
            let raw = state
                .stream
                .read_bytes((size - WAL_HEADER_SIZE) as usize)?;

            let mut entries = Vec::with_capacity(state.committed as usize);
            let mut offset = 0;
            for _ in 0..state.committed {
                let (entry, consumed) = WalEntry::decode(&raw[offset..])?;
                offset += consumed;
                entries.push(entry);
            }
            entries
        };

        info!(entries = entries.len(), "replaying write-ahead log");

        {
            let mut data = self.data.lock();
            for entry in entries.iter().rev() {
                if !entry.data.is_empty() {
                    data.seek(entry.pos);
                    data.write_bytes(&entry.data)?;
                }
                if data.size()? > entry.stream_size {
                    data.truncate(entry.stream_size)?;
                }
            }
            data.flush()?;
            data.sync()?;
        }

        self.commit()
    }
}

impl std::fmt::Debug for Wal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wal")
            .field("sync_on_write", &self.sync_on_write)
            .finish_non_exhaustive()
    }
}

/// Writes the header fields at the start of the log stream.
fn write_header(log: &mut ByteStream, committed: i64) -> CoreResult<()> {
    log.reset();
    log.write_bytes(&WAL_MAGIC)?;
    log.write_bytes(&WAL_VERSION.to_le_bytes())?;
    log.write_i64(committed)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lodedb_storage::InMemoryBackend;

    fn data_stream(contents: &[u8]) -> Arc<Mutex<ByteStream>> {
        Arc::new(Mutex::new(ByteStream::new(Box::new(
            InMemoryBackend::with_data(contents.to_vec()),
        ))))
    }

    fn open_wal(data: &Arc<Mutex<ByteStream>>) -> Wal {
        Wal::open(Box::new(InMemoryBackend::new()), Arc::clone(data), false).unwrap()
    }

    #[test]
    fn fresh_log_is_clean() {
        let data = data_stream(b"");
        let wal = open_wal(&data);
        assert_eq!(wal.pending_entries(), 0);
    }

    #[test]
    fn record_log_captures_pre_image() {
        let data = data_stream(b"hello world");
        let wal = open_wal(&data);

        wal.record_log(0, 5).unwrap();
        assert_eq!(wal.pending_entries(), 1);

        // Overwrite the protected range, then simulate recovery by hand.
        {
            let mut stream = data.lock();
            stream.seek(0);
            stream.write_bytes(b"HELLO").unwrap();
        }
        wal.replay().unwrap();

        let mut stream = data.lock();
        stream.reset();
        assert_eq!(stream.read_bytes(11).unwrap(), b"hello world");
    }

    #[test]
    fn commit_empties_the_log() {
        let data = data_stream(b"some bytes");
        let wal = open_wal(&data);

        wal.record_log(0, 4).unwrap();
        wal.record_log(4, 4).unwrap();
        wal.commit().unwrap();

        assert_eq!(wal.pending_entries(), 0);
    }

    #[test]
    fn replay_undoes_growth() {
        let data = data_stream(b"12345678");
        let wal = open_wal(&data);

        // Protect an append past the current end, then grow the stream.
        wal.record_log(8, 16).unwrap();
        {
            let mut stream = data.lock();
            stream.seek(8);
            stream.write_bytes(&[0xAB; 16]).unwrap();
        }

        wal.replay().unwrap();
        assert_eq!(data.lock().size().unwrap(), 8);
    }

    #[test]
    fn reopen_with_uncommitted_entries_recovers() {
        let data = data_stream(b"original");

        // First session: log a pre-image, clobber the range, "crash"
        // without committing by capturing the raw log bytes.
        let log_bytes = {
            let wal = open_wal(&data);
            wal.record_log(0, 8).unwrap();
            {
                let mut stream = data.lock();
                stream.seek(0);
                stream.write_bytes(b"CLOBBERD").unwrap();
            }
            let mut state = wal.log.lock();
            let size = state.stream.size().unwrap();
            state.stream.reset();
            state.stream.read_bytes(size as usize).unwrap()
        };

        // Second session: reopening with the dirty log restores the data.
        let wal = Wal::open(
            Box::new(InMemoryBackend::with_data(log_bytes)),
            Arc::clone(&data),
            false,
        )
        .unwrap();
        assert_eq!(wal.pending_entries(), 0);

        let mut stream = data.lock();
        stream.reset();
        assert_eq!(stream.read_bytes(8).unwrap(), b"original");
    }

    #[test]
    fn clean_log_discards_torn_tail() {
        let data = data_stream(b"data");

        // committed = 0 but stray bytes follow the header.
        let mut log = ByteStream::new(Box::new(InMemoryBackend::new()));
        write_header(&mut log, 0).unwrap();
        log.seek(WAL_HEADER_SIZE);
        log.write_bytes(&[0xFF; 7]).unwrap();

        let mut raw = Vec::new();
        let size = log.size().unwrap();
        log.reset();
        raw.extend(log.read_bytes(size as usize).unwrap());

        let wal = Wal::open(
            Box::new(InMemoryBackend::with_data(raw)),
            Arc::clone(&data),
            false,
        )
        .unwrap();
        assert_eq!(wal.pending_entries(), 0);
        assert_eq!(wal.log.lock().stream.size().unwrap(), WAL_HEADER_SIZE);
    }

    #[test]
    fn bad_magic_is_fatal() {
        let data = data_stream(b"");
        let mut raw = b"XXXX".to_vec();
        raw.extend_from_slice(&WAL_VERSION.to_le_bytes());
        raw.extend_from_slice(&0i64.to_le_bytes());

        let result = Wal::open(
            Box::new(InMemoryBackend::with_data(raw)),
            Arc::clone(&data),
            false,
        );
        assert!(matches!(result, Err(CoreError::WalCorruption { .. })));
    }

    #[test]
    fn committed_count_beyond_entries_is_fatal() {
        let data = data_stream(b"");
        let mut raw = WAL_MAGIC.to_vec();
        raw.extend_from_slice(&WAL_VERSION.to_le_bytes());
        raw.extend_from_slice(&3i64.to_le_bytes()); // claims 3 entries, has none

        let result = Wal::open(
            Box::new(InMemoryBackend::with_data(raw)),
            Arc::clone(&data),
            false,
        );
        assert!(matches!(result, Err(CoreError::WalCorruption { .. })));
    }

    #[test]
    fn torn_header_reinitializes() {
        let data = data_stream(b"");
        let backend = InMemoryBackend::with_data(b"LW".to_vec());
        let wal = Wal::open(Box::new(backend), Arc::clone(&data), false).unwrap();
        assert_eq!(wal.pending_entries(), 0);
    }
}
