//! Record store facade: files, recovery, and payload operations.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::paths::StorePaths;
use crate::records::{IndexEntry, RecordIndex, ENTRY_SIZE, INVALID_INDEX};
use crate::stream::ByteStream;
use crate::types::RecordId;
use crate::wal::Wal;
use lodedb_storage::{FileBackend, InMemoryBackend, StorageBackend};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// A crash-safe store of variable-length binary records.
///
/// `RecordStore` is the entry point of this crate. It owns the store's
/// lock, data stream, write-ahead log, and record index, and exposes the
/// operations the layer above builds graph records on: allocating and
/// removing ids, reading and writing payload bytes, and enumerating
/// records in logical or physical order.
///
/// Every mutation is protected by the write-ahead log: the pre-image of
/// each overwritten byte range is durable before the range is touched,
/// and an operation interrupted by a crash is rolled back on the next
/// open. The store assumes a single writer; an advisory lock file keeps
/// other processes out for its lifetime.
///
/// # Example
///
/// ```rust
/// use lodedb_core::RecordStore;
///
/// let mut store = RecordStore::open_in_memory().unwrap();
///
/// let id = store.insert(b"hello").unwrap();
/// assert_eq!(store.read(id).unwrap(), b"hello");
///
/// store.remove(id).unwrap();
/// assert!(!store.contains(id));
/// ```
pub struct RecordStore {
    /// Store configuration.
    config: Config,
    /// File paths and the exclusive lock. `None` for in-memory stores.
    paths: Option<StorePaths>,
    /// The data stream; shared with the WAL for pre-image capture.
    data: Arc<Mutex<ByteStream>>,
    /// Pre-image undo log.
    wal: Arc<Wal>,
    /// Logical id table and free list.
    index: RecordIndex,
}

impl RecordStore {
    /// Opens a record store at the given path with default configuration.
    ///
    /// The data file, its write-ahead log (`<path>.wal`), and its lock
    /// file (`<path>.lock`) are created if missing. If the previous
    /// session died mid-mutation, the WAL rolls the half-applied
    /// operation back before the index is rebuilt.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Another process holds the store's lock (`StoreLocked`)
    /// - The persisted index cannot be rebuilt (`CorruptedIndex`)
    /// - The WAL cannot be trusted (`WalCorruption`)
    /// - I/O errors occur
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens a record store at the given path with custom configuration.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use lodedb_core::{Config, RecordStore};
    /// use std::path::Path;
    ///
    /// let config = Config::new().create_if_missing(false);
    /// let store = RecordStore::open_with_config(Path::new("records.db"), config);
    /// ```
    ///
    /// # Errors
    ///
    /// As [`RecordStore::open`]; additionally fails with `InvalidFormat`
    /// when the store does not exist and `create_if_missing` is off.
    pub fn open_with_config(path: &Path, config: Config) -> CoreResult<Self> {
        let paths = StorePaths::acquire(path, config.create_if_missing)?;
        let data = Box::new(FileBackend::open(paths.data_path())?);
        let log = Box::new(FileBackend::open(&paths.wal_path())?);

        let store = Self::build(config, Some(paths), data, log)?;
        info!(
            path = %path.display(),
            records = store.count(),
            "record store opened"
        );
        Ok(store)
    }

    /// Opens an ephemeral in-memory store.
    ///
    /// Nothing is persisted and no lock is taken. Intended for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if initialization fails.
    pub fn open_in_memory() -> CoreResult<Self> {
        let data = Box::new(InMemoryBackend::new());
        let log = Box::new(InMemoryBackend::new());
        Self::build(Config::default(), None, data, log)
    }

    fn build(
        config: Config,
        paths: Option<StorePaths>,
        data_backend: Box<dyn StorageBackend>,
        log_backend: Box<dyn StorageBackend>,
    ) -> CoreResult<Self> {
        let data = Arc::new(Mutex::new(ByteStream::new(data_backend)));
        // WAL recovery must finish before the index scans the stream.
        let wal = Arc::new(Wal::open(
            log_backend,
            Arc::clone(&data),
            config.sync_on_write,
        )?);
        let index = RecordIndex::open(Arc::clone(&data), Arc::clone(&wal))?;

        Ok(Self {
            config,
            paths,
            data,
            wal,
            index,
        })
    }

    /// Returns the store's configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the path of the data file, or `None` for in-memory stores.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.paths.as_ref().map(StorePaths::data_path)
    }

    /// Allocates a new empty record and returns its id.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the stream or the log cannot be
    /// written.
    pub fn create(&mut self) -> CoreResult<RecordId> {
        self.index.create()
    }

    /// Inserts a record with the given payload and returns its id.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the stream or the log cannot be
    /// written.
    pub fn insert(&mut self, payload: &[u8]) -> CoreResult<RecordId> {
        let id = self.index.create()?;
        if !payload.is_empty() {
            self.fill_new_record(id, payload)?;
        }
        Ok(id)
    }

    /// Reads a record's whole payload.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` if `id` is not live, or a storage error if
    /// the stream cannot be read.
    pub fn read(&self, id: RecordId) -> CoreResult<Vec<u8>> {
        let size = self.index.size(id)? as u64;
        self.read_at(id, 0, size)
    }

    /// Reads `len` payload bytes starting `offset` bytes into the record.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` if `id` is not live,
    /// `PositionOutOfBounds` if the range exceeds the record, or a
    /// storage error if the stream cannot be read.
    pub fn read_at(&self, id: RecordId, offset: u64, len: u64) -> CoreResult<Vec<u8>> {
        let pos = self.index.position(id)? as u64;
        let size = self.index.size(id)? as u64;
        if offset.saturating_add(len) > size {
            return Err(self.position_error(id, pos, size, offset.saturating_add(len)));
        }

        let mut data = self.data.lock();
        data.seek(pos + offset);
        data.read_bytes(len as usize)
    }

    /// Writes `bytes` starting `offset` bytes into the record.
    ///
    /// The record grows when the write reaches past its current end:
    /// in place when it is the stream tail, otherwise by relocating the
    /// record to the end of the stream and abandoning the old copy.
    /// `offset` may be at most the record's current size.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` if `id` is not live,
    /// `PositionOutOfBounds` if `offset` exceeds the record's size, or a
    /// storage error if the stream or the log cannot be written.
    pub fn write_at(&mut self, id: RecordId, offset: u64, bytes: &[u8]) -> CoreResult<()> {
        let pos = self.index.position(id)? as u64;
        let size = self.index.size(id)? as u64;
        if offset > size {
            return Err(self.position_error(id, pos, size, offset));
        }

        let end_needed = offset + bytes.len() as u64;
        if end_needed <= size {
            self.wal.record_log(pos + offset, bytes.len() as u64)?;
            let mut data = self.data.lock();
            data.seek(pos + offset);
            data.write_bytes(bytes)?;
            data.flush()?;
        } else if self.index.is_last(id)? {
            let header = IndexEntry::new(id.as_u64() as i64, end_needed as i64);
            self.index.write_header(pos - ENTRY_SIZE, header)?;
            self.wal.record_log(pos + offset, bytes.len() as u64)?;
            {
                let mut data = self.data.lock();
                data.seek(pos + offset);
                data.write_bytes(bytes)?;
                data.flush()?;
            }
            self.index.set_size(id, end_needed as i64)?;
        } else {
            self.relocate(id, end_needed, Some((offset, bytes)))?;
        }

        self.wal.commit()
    }

    /// Resizes a record to `new_size` bytes.
    ///
    /// Growth zero-fills the new bytes; shrinking discards the tail. The
    /// stream tail is resized in place, other records are relocated,
    /// since a record's on-disk span must always match its declared
    /// size.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` if `id` is not live, or a storage error if
    /// the stream or the log cannot be written.
    pub fn resize(&mut self, id: RecordId, new_size: u64) -> CoreResult<()> {
        let pos = self.index.position(id)? as u64;
        let old_size = self.index.size(id)? as u64;
        if new_size == old_size {
            return Ok(());
        }

        if self.index.is_last(id)? {
            let header = IndexEntry::new(id.as_u64() as i64, new_size as i64);
            self.index.write_header(pos - ENTRY_SIZE, header)?;
            if new_size < old_size {
                self.wal.record_log(pos + new_size, old_size - new_size)?;
                let mut data = self.data.lock();
                data.truncate(pos + new_size)?;
                data.flush()?;
            } else {
                self.wal.record_log(pos + old_size, new_size - old_size)?;
                let mut data = self.data.lock();
                data.seek(pos + old_size);
                data.write_bytes(&vec![0u8; (new_size - old_size) as usize])?;
                data.flush()?;
            }
            self.index.set_size(id, new_size as i64)?;
        } else {
            self.relocate(id, new_size, None)?;
        }

        self.wal.commit()
    }

    /// Removes a record; see [`RecordIndex::remove`].
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` if `id` is not live, or a storage error if
    /// the stream or the log cannot be written.
    pub fn remove(&mut self, id: RecordId) -> CoreResult<()> {
        self.index.remove(id)
    }

    /// Removes every record, resetting the store to its freshly created
    /// state.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the stream or the log cannot be
    /// written.
    pub fn clear(&mut self) -> CoreResult<()> {
        debug!("clearing record store");
        let size = self.data.lock().size()?;
        self.wal.record_log(0, size)?;
        {
            let mut data = self.data.lock();
            data.truncate(0)?;
            data.reset();
            data.write_i64(0)?;
            data.flush()?;
        }
        self.index.clear();
        self.wal.commit()
    }

    /// Returns `true` if `id` names a live record.
    #[must_use]
    pub fn contains(&self, id: RecordId) -> bool {
        self.index.contains(id)
    }

    /// Returns the number of live records.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.index.count()
    }

    /// Returns a record's payload size; see [`RecordIndex::size`].
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` if `id` is not live.
    pub fn size(&self, id: RecordId) -> CoreResult<i64> {
        self.index.size(id)
    }

    /// Returns a record's payload position; see [`RecordIndex::position`].
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` if `id` is not live.
    pub fn position(&self, id: RecordId) -> CoreResult<i64> {
        self.index.position(id)
    }

    /// Replaces a slot's entry; see [`RecordIndex::set_record`].
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` if `id` is outside the table.
    pub fn set_record(&mut self, id: RecordId, entry: IndexEntry) -> CoreResult<()> {
        self.index.set_record(id, entry)
    }

    /// Updates a record's declared size; see [`RecordIndex::set_size`].
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` if `id` is not live.
    pub fn set_size(&mut self, id: RecordId, size: i64) -> CoreResult<()> {
        self.index.set_size(id, size)
    }

    /// Returns the live ids in ascending id order.
    #[must_use]
    pub fn indexes(&self) -> Vec<RecordId> {
        self.index.indexes()
    }

    /// Returns all slot ids sorted by physical position; see
    /// [`RecordIndex::sorted_indexes`].
    #[must_use]
    pub fn sorted_indexes(&self) -> Vec<RecordId> {
        self.index.sorted_indexes()
    }

    /// Returns `true` if the record ends at end-of-stream.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the stream size cannot be read.
    pub fn is_last(&self, id: RecordId) -> CoreResult<bool> {
        self.index.is_last(id)
    }

    /// Writes the payload of a freshly created record.
    ///
    /// The record was just appended, so its header is the stream tail;
    /// the header's final size and the payload go out under one logged
    /// pre-image, making the fill atomic.
    fn fill_new_record(&mut self, id: RecordId, payload: &[u8]) -> CoreResult<()> {
        let pos = self.index.position(id)? as u64;
        let header_pos = pos - ENTRY_SIZE;

        self.wal
            .record_log(header_pos, ENTRY_SIZE + payload.len() as u64)?;
        {
            let mut data = self.data.lock();
            data.seek(header_pos);
            IndexEntry::new(id.as_u64() as i64, payload.len() as i64).write_to(&mut data)?;
            data.write_bytes(payload)?;
            data.flush()?;
        }
        self.index.set_size(id, payload.len() as i64)?;
        self.wal.commit()
    }

    /// Moves a record to the end of the stream with `new_size` bytes.
    ///
    /// The preserved prefix of the old payload is copied over, grown
    /// bytes are zero-filled, and `splice` (payload offset, bytes) is
    /// applied on top. The old copy's header is invalidated so a future
    /// scan binds the id to the new location; its bytes are abandoned
    /// until the slot space is reused.
    fn relocate(
        &mut self,
        id: RecordId,
        new_size: u64,
        splice: Option<(u64, &[u8])>,
    ) -> CoreResult<()> {
        let old_pos = self.index.position(id)? as u64;
        let old_size = self.index.size(id)? as u64;
        debug!(%id, old_size, new_size, "relocating record");

        let mut payload = {
            let keep = old_size.min(new_size) as usize;
            let mut data = self.data.lock();
            data.seek(old_pos);
            data.read_bytes(keep)?
        };
        payload.resize(new_size as usize, 0);
        if let Some((offset, bytes)) = splice {
            payload[offset as usize..offset as usize + bytes.len()].copy_from_slice(bytes);
        }

        let end = self.data.lock().size()?;
        // The new copy lands past the current end; its undo is plain
        // truncation.
        self.wal.record_log(end, ENTRY_SIZE + new_size)?;
        {
            let mut data = self.data.lock();
            data.seek(end);
            IndexEntry::new(id.as_u64() as i64, new_size as i64).write_to(&mut data)?;
            data.write_bytes(&payload)?;
            data.flush()?;
        }

        let old_header = IndexEntry::new(INVALID_INDEX, -(old_size as i64));
        self.index.write_header(old_pos - ENTRY_SIZE, old_header)?;
        self.index
            .set_record(id, IndexEntry::new((end + ENTRY_SIZE) as i64, new_size as i64))
    }

    fn position_error(&self, id: RecordId, pos: u64, size: u64, requested: u64) -> CoreError {
        CoreError::PositionOutOfBounds {
            id: id.as_u64(),
            position: (pos + requested) as i64,
            start: pos as i64,
            end: (pos + size) as i64,
        }
    }
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("path", &self.path())
            .field("records", &self.count())
            .finish_non_exhaustive()
    }
}
