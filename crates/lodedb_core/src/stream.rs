//! Seekable, position-tracked binary channel over a storage backend.

use crate::error::CoreResult;
use lodedb_storage::StorageBackend;

/// A seekable binary stream with typed reads and writes.
///
/// `ByteStream` owns a [`StorageBackend`] and tracks a cursor position.
/// Every read and write operates at the cursor and advances it by the
/// number of bytes transferred. Values are encoded little-endian.
///
/// Reads past the end of the stream fail; writes at or past the end
/// extend it.
///
/// # Example
///
/// ```rust
/// use lodedb_core::ByteStream;
/// use lodedb_storage::InMemoryBackend;
///
/// let mut stream = ByteStream::new(Box::new(InMemoryBackend::new()));
/// stream.write_i64(-42).unwrap();
/// stream.reset();
/// assert_eq!(stream.read_i64().unwrap(), -42);
/// ```
pub struct ByteStream {
    backend: Box<dyn StorageBackend>,
    pos: u64,
}

impl ByteStream {
    /// Creates a stream over the given backend with the cursor at 0.
    #[must_use]
    pub fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self { backend, pos: 0 }
    }

    /// Moves the cursor to `pos`.
    ///
    /// Seeking past the end is allowed; a subsequent write extends the
    /// stream, a subsequent read fails.
    pub fn seek(&mut self, pos: u64) {
        self.pos = pos;
    }

    /// Moves the cursor back to the start of the stream.
    pub fn reset(&mut self) {
        self.pos = 0;
    }

    /// Returns the current cursor position.
    #[must_use]
    pub fn pos(&self) -> u64 {
        self.pos
    }

    /// Returns the current size of the stream in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot report its size.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Reads a little-endian `i64` at the cursor.
    ///
    /// # Errors
    ///
    /// Fails if fewer than 8 bytes remain.
    pub fn read_i64(&mut self) -> CoreResult<i64> {
        let bytes = self.read_bytes(8)?;
        let arr: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "truncated i64 read")
        })?;
        Ok(i64::from_le_bytes(arr))
    }

    /// Writes a little-endian `i64` at the cursor.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend write fails.
    pub fn write_i64(&mut self, value: i64) -> CoreResult<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Reads `len` raw bytes at the cursor.
    ///
    /// # Errors
    ///
    /// Fails if the range extends past the end of the stream.
    pub fn read_bytes(&mut self, len: usize) -> CoreResult<Vec<u8>> {
        let data = self.backend.read_at(self.pos, len)?;
        self.pos += len as u64;
        Ok(data)
    }

    /// Writes raw bytes at the cursor, extending the stream if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend write fails.
    pub fn write_bytes(&mut self, data: &[u8]) -> CoreResult<()> {
        self.backend.write_at(self.pos, data)?;
        self.pos += data.len() as u64;
        Ok(())
    }

    /// Truncates the stream to `size`, clamping the cursor.
    ///
    /// # Errors
    ///
    /// Returns an error if `size` exceeds the current stream size.
    pub fn truncate(&mut self, size: u64) -> CoreResult<()> {
        self.backend.truncate(size)?;
        if self.pos > size {
            self.pos = size;
        }
        Ok(())
    }

    /// Flushes pending writes to the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub fn flush(&mut self) -> CoreResult<()> {
        Ok(self.backend.flush()?)
    }

    /// Syncs data and metadata to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    pub fn sync(&mut self) -> CoreResult<()> {
        Ok(self.backend.sync()?)
    }
}

impl std::fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteStream")
            .field("pos", &self.pos)
            .finish_non_exhaustive()
    }
}
