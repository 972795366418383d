//! Record index table, free list, and reconstruction.

use crate::error::{CoreError, CoreResult};
use crate::records::entry::{IndexEntry, ENTRY_SIZE, INVALID_INDEX, INVALID_SIZE};
use crate::stream::ByteStream;
use crate::types::RecordId;
use crate::wal::Wal;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Size of the slot count persisted at the start of the data stream.
const COUNT_SIZE: u64 = 8;

/// Maps logical record ids to byte ranges of the data stream.
///
/// The index owns a flat table of [`IndexEntry`] slots addressed by id.
/// Ids are stable: a slot stays bound to its id until the record is
/// removed, after which the slot is threaded onto a singly linked free
/// list (through its repurposed `pos` field) and handed out again by a
/// later [`RecordIndex::create`].
///
/// Every structural mutation logs a pre-image through the write-ahead
/// log before touching the data stream, so a crash mid-update is rolled
/// back on the next open. On open of a non-empty stream the table is
/// rebuilt by scanning the self-describing record headers in physical
/// order.
///
/// The index assumes single-writer access; it provides no internal
/// locking of its own state.
pub struct RecordIndex {
    /// Shared handle to the data stream; also held by the WAL.
    data: Arc<Mutex<ByteStream>>,
    /// Pre-image log protecting every mutation below.
    wal: Arc<Wal>,
    /// Slot table, indexed by logical id. Never reordered or compacted.
    table: Vec<IndexEntry>,
    /// Head of the free list, or [`INVALID_INDEX`] when no slot is free.
    free_head: i64,
    /// Number of currently live records.
    live_count: u64,
}

impl RecordIndex {
    /// Opens the index over the given data stream.
    ///
    /// An empty stream is initialized with a zero slot count; a non-empty
    /// stream is scanned to rebuild the table and free list. The WAL must
    /// already have run its recovery pass so the stream is consistent.
    ///
    /// # Errors
    ///
    /// Returns `CorruptedIndex` if the persisted slot count is negative
    /// or the structural scan fails, and a storage error if the stream
    /// cannot be read or initialized.
    pub fn open(data: Arc<Mutex<ByteStream>>, wal: Arc<Wal>) -> CoreResult<Self> {
        let mut index = Self {
            data,
            wal,
            table: Vec::new(),
            free_head: INVALID_INDEX,
            live_count: 0,
        };

        let size = {
            let mut stream = index.data.lock();
            let size = stream.size()?;
            if size == 0 {
                stream.reset();
                stream.write_i64(0)?;
                stream.flush()?;
            }
            size
        };

        if size != 0 {
            index.load_records()?;
            debug!(
                slots = index.table.len(),
                live = index.live_count,
                "record index loaded"
            );
        }

        Ok(index)
    }

    /// Allocates a new logical id and returns it.
    ///
    /// The id is popped from the free list when one is available,
    /// otherwise the table grows by one slot and the new slot count is
    /// persisted. Either way a zero-size self-describing header is
    /// appended to the stream, leaving the record valid for immediate
    /// reads and writes.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the stream or the log cannot be
    /// written.
    pub fn create(&mut self) -> CoreResult<RecordId> {
        let end = self.data.lock().size()?;
        let entry = IndexEntry::new((end + ENTRY_SIZE) as i64, 0);

        let id = if self.free_head == INVALID_INDEX {
            let id = self.table.len();
            self.table.push(entry);
            self.save_count()?;
            id
        } else {
            let id = self.free_head as usize;
            self.free_head = self.table[id].pos;
            self.table[id] = entry;
            id
        };

        self.write_header(end, IndexEntry::new(id as i64, 0))?;
        self.live_count += 1;
        self.wal.commit()?;
        Ok(RecordId::new(id as u64))
    }

    /// Removes a record and pushes its slot onto the free list.
    ///
    /// When the record is the stream tail, its header and payload bytes
    /// are reclaimed by truncation. Otherwise the payload is abandoned in
    /// place and only the on-disk header is invalidated; the space is
    /// reused when a later allocation overwrites it.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` if `id` is not live, or a storage error if
    /// the stream or the log cannot be written.
    pub fn remove(&mut self, id: RecordId) -> CoreResult<()> {
        let entry = self.live_entry(id)?;
        let header_pos = entry.pos as u64 - ENTRY_SIZE;

        if self.is_last(id)? {
            self.wal.record_log(header_pos, ENTRY_SIZE + entry.size as u64)?;
            let mut stream = self.data.lock();
            stream.truncate(header_pos)?;
            stream.flush()?;
        } else {
            self.write_header(header_pos, IndexEntry::new(INVALID_INDEX, -entry.size))?;
        }

        let idx = id.as_u64() as usize;
        self.table[idx] = IndexEntry::new(self.free_head, INVALID_SIZE);
        self.free_head = idx as i64;
        self.live_count -= 1;
        self.wal.commit()
    }

    /// Returns `true` if `id` names a live record.
    #[must_use]
    pub fn contains(&self, id: RecordId) -> bool {
        self.get_live(id).is_some()
    }

    /// Returns the number of live records.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.live_count
    }

    /// Returns the payload size of a live record.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` if `id` is not live.
    pub fn size(&self, id: RecordId) -> CoreResult<i64> {
        self.live_entry(id).map(|entry| entry.size)
    }

    /// Returns the payload position of a live record in the stream.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` if `id` is not live.
    pub fn position(&self, id: RecordId) -> CoreResult<i64> {
        self.live_entry(id).map(|entry| entry.pos)
    }

    /// Replaces a slot's entry without touching the stream.
    ///
    /// The caller is responsible for keeping the on-disk payload
    /// consistent with the entry it installs.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` if `id` is outside the table.
    pub fn set_record(&mut self, id: RecordId, entry: IndexEntry) -> CoreResult<()> {
        let slot = self
            .table
            .get_mut(id.as_u64() as usize)
            .ok_or_else(|| CoreError::out_of_range(id.as_u64()))?;
        *slot = entry;
        Ok(())
    }

    /// Updates a live record's declared size without touching the stream.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` if `id` is not live.
    pub fn set_size(&mut self, id: RecordId, size: i64) -> CoreResult<()> {
        let slot = self
            .table
            .get_mut(id.as_u64() as usize)
            .filter(|entry| entry.is_valid())
            .ok_or_else(|| CoreError::out_of_range(id.as_u64()))?;
        slot.size = size;
        Ok(())
    }

    /// Returns the live ids in ascending id order.
    #[must_use]
    pub fn indexes(&self) -> Vec<RecordId> {
        self.table
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.is_valid())
            .map(|(id, _)| RecordId::new(id as u64))
            .collect()
    }

    /// Returns every slot id, live and free, sorted by ascending `pos`.
    ///
    /// Live slots sort by their physical payload position; free slots
    /// sort by their repurposed next pointer and therefore cluster at
    /// the front. Used for physical-order iteration.
    #[must_use]
    pub fn sorted_indexes(&self) -> Vec<RecordId> {
        let mut ids: Vec<usize> = (0..self.table.len()).collect();
        ids.sort_by_key(|&id| self.table[id].pos);
        ids.into_iter().map(|id| RecordId::new(id as u64)).collect()
    }

    /// Returns `true` if the record's payload ends at end-of-stream.
    ///
    /// The stream tail can be resized or removed in place instead of
    /// being abandoned and relocated. Free and unknown ids are never
    /// last.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the stream size cannot be read.
    pub fn is_last(&self, id: RecordId) -> CoreResult<bool> {
        let Some(entry) = self.get_live(id) else {
            return Ok(false);
        };
        Ok(self.data.lock().size()? == entry.end() as u64)
    }

    /// Empties the table and free list.
    ///
    /// In-memory only; used when the store is recreated from scratch and
    /// the stream is reset separately.
    pub fn clear(&mut self) {
        self.table.clear();
        self.free_head = INVALID_INDEX;
        self.live_count = 0;
    }

    /// Writes a record header at `header_pos`, pre-image logged.
    pub(crate) fn write_header(&self, header_pos: u64, header: IndexEntry) -> CoreResult<()> {
        self.wal.record_log(header_pos, ENTRY_SIZE)?;
        let mut stream = self.data.lock();
        stream.seek(header_pos);
        header.write_to(&mut stream)?;
        stream.flush()?;
        Ok(())
    }

    /// Persists the table length at the start of the stream, pre-image
    /// logged.
    fn save_count(&self) -> CoreResult<()> {
        self.wal.record_log(0, COUNT_SIZE)?;
        let mut stream = self.data.lock();
        stream.reset();
        stream.write_i64(self.table.len() as i64)?;
        stream.flush()?;
        Ok(())
    }

    fn get_live(&self, id: RecordId) -> Option<IndexEntry> {
        self.table
            .get(id.as_u64() as usize)
            .filter(|entry| entry.is_valid())
            .copied()
    }

    fn live_entry(&self, id: RecordId) -> CoreResult<IndexEntry> {
        self.get_live(id)
            .ok_or_else(|| CoreError::out_of_range(id.as_u64()))
    }

    /// Rebuilds the table from the stream, surfacing every failure as a
    /// single `CorruptedIndex` error.
    fn load_records(&mut self) -> CoreResult<()> {
        self.create_table()
            .and_then(|()| self.scan_records())
            .map(|()| self.build_free_list())
            .map_err(|err| match err {
                err @ CoreError::CorruptedIndex { .. } => err,
                other => {
                    CoreError::corrupted_index(format!("invalid or corrupted file data: {other}"))
                }
            })
    }

    /// Reads the persisted slot count and pre-sizes the table with free
    /// slots.
    fn create_table(&mut self) -> CoreResult<()> {
        let count = {
            let mut stream = self.data.lock();
            stream.reset();
            stream.read_i64()?
        };
        if count < 0 {
            return Err(CoreError::corrupted_index(format!(
                "negative slot count {count}"
            )));
        }
        self.table = vec![IndexEntry::default(); count as usize];
        Ok(())
    }

    /// Scans the self-describing headers in physical order, binding each
    /// live record to its slot.
    fn scan_records(&mut self) -> CoreResult<()> {
        let data = Arc::clone(&self.data);
        let mut stream = data.lock();
        let size = stream.size()?;
        stream.seek(COUNT_SIZE);

        while stream.pos() < size {
            let header = IndexEntry::read_from(&mut stream)?;
            let payload_pos = stream.pos();

            // A negative id is an invalidated zero-size record: free.
            if header.is_valid() && header.pos >= 0 {
                let id = header.pos as usize;
                let slot = self.table.get_mut(id).ok_or_else(|| {
                    CoreError::corrupted_index(format!("record id {id} exceeds the slot count"))
                })?;
                if !slot.is_valid() {
                    self.live_count += 1;
                }
                *slot = IndexEntry::new(payload_pos as i64, header.size);
            }

            // Free slots still reserve their payload space on disk.
            let next = payload_pos + header.size.unsigned_abs();
            if next > size {
                return Err(CoreError::corrupted_index(format!(
                    "record payload at {payload_pos} extends past the end of the stream"
                )));
            }
            stream.seek(next);
        }

        Ok(())
    }

    /// Threads every slot not bound by the scan onto the free list.
    ///
    /// Runs in descending id order so the head ends up being the lowest
    /// free id, giving deterministic lowest-first reuse after a reopen.
    fn build_free_list(&mut self) {
        for id in (0..self.table.len()).rev() {
            if !self.table[id].is_valid() {
                self.table[id].pos = self.free_head;
                self.free_head = id as i64;
            }
        }
    }
}

impl std::fmt::Debug for RecordIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordIndex")
            .field("slots", &self.table.len())
            .field("live_count", &self.live_count)
            .field("free_head", &self.free_head)
            .finish_non_exhaustive()
    }
}
