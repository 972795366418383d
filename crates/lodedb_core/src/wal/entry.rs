//! WAL entry type and serialization.

use crate::error::{CoreError, CoreResult};

/// Magic bytes identifying a WAL file.
pub const WAL_MAGIC: [u8; 4] = *b"LWAL";

/// Current WAL format version.
pub const WAL_VERSION: u16 = 1;

/// Size of the WAL file header:
/// magic (4) + version (2) + committed entry count (8) = 14 bytes.
pub const WAL_HEADER_SIZE: u64 = 14;

/// Offset of the committed entry count within the header.
pub const WAL_COMMITTED_OFFSET: u64 = 6;

/// Fixed part of a serialized entry:
/// pos (8) + stream_size (8) + data_len (4) = 20 bytes, plus a 4-byte CRC
/// after the data.
const ENTRY_FIXED_SIZE: usize = 20;
const CRC_SIZE: usize = 4;

/// A pre-image captured before a range of the data stream is overwritten.
///
/// Undoing an entry restores `data` at `pos` and shrinks the stream back
/// to `stream_size` if it grew past it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalEntry {
    /// Start of the protected byte range in the data stream.
    pub pos: u64,
    /// Size of the data stream when the range was logged.
    pub stream_size: u64,
    /// Pre-image of `[pos, min(pos + len, stream_size))`.
    ///
    /// Empty when the protected write lies entirely past the old end of
    /// the stream (undo is then just the truncation).
    pub data: Vec<u8>,
}

impl WalEntry {
    /// Serializes the entry.
    ///
    /// ```text
    /// | pos (8) | stream_size (8) | data_len (4) | data (N) | crc32 (4) |
    /// ```
    ///
    /// The CRC covers everything before it.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ENTRY_FIXED_SIZE + self.data.len() + CRC_SIZE);

        buf.extend_from_slice(&self.pos.to_le_bytes());
        buf.extend_from_slice(&self.stream_size.to_le_bytes());
        buf.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.data);

        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());

        buf
    }

    /// Deserializes one entry from the front of `data`.
    ///
    /// Returns the entry and the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// Returns `WalCorruption` on a truncated entry and `ChecksumMismatch`
    /// when the stored CRC does not match the recomputed one.
    pub fn decode(data: &[u8]) -> CoreResult<(Self, usize)> {
        if data.len() < ENTRY_FIXED_SIZE + CRC_SIZE {
            return Err(CoreError::wal_corruption("truncated WAL entry header"));
        }

        let pos = u64::from_le_bytes(
            data[0..8]
                .try_into()
                .map_err(|_| CoreError::wal_corruption("invalid pos"))?,
        );
        let stream_size = u64::from_le_bytes(
            data[8..16]
                .try_into()
                .map_err(|_| CoreError::wal_corruption("invalid stream size"))?,
        );
        let data_len = u32::from_le_bytes(
            data[16..20]
                .try_into()
                .map_err(|_| CoreError::wal_corruption("invalid data length"))?,
        ) as usize;

        let total = ENTRY_FIXED_SIZE + data_len + CRC_SIZE;
        if data.len() < total {
            return Err(CoreError::wal_corruption("truncated WAL entry payload"));
        }

        let stored_crc = u32::from_le_bytes(
            data[total - CRC_SIZE..total]
                .try_into()
                .map_err(|_| CoreError::wal_corruption("invalid crc"))?,
        );
        let computed_crc = crc32fast::hash(&data[..total - CRC_SIZE]);
        if stored_crc != computed_crc {
            return Err(CoreError::ChecksumMismatch {
                expected: stored_crc,
                actual: computed_crc,
            });
        }

        let payload = data[ENTRY_FIXED_SIZE..ENTRY_FIXED_SIZE + data_len].to_vec();

        Ok((
            Self {
                pos,
                stream_size,
                data: payload,
            },
            total,
        ))
    }

    /// Returns the serialized size of this entry.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        ENTRY_FIXED_SIZE + self.data.len() + CRC_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_roundtrip() {
        let entry = WalEntry {
            pos: 24,
            stream_size: 120,
            data: vec![0xCA, 0xFE, 0xBA, 0xBE],
        };

        let encoded = entry.encode();
        assert_eq!(encoded.len(), entry.encoded_size());

        let (decoded, consumed) = WalEntry::decode(&encoded).unwrap();
        assert_eq!(decoded, entry);
        assert_eq!(consumed, encoded.len());
    }

    #[test]
    fn empty_pre_image_roundtrip() {
        let entry = WalEntry {
            pos: 16,
            stream_size: 16,
            data: Vec::new(),
        };

        let (decoded, _) = WalEntry::decode(&entry.encode()).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn decode_consumes_one_entry_of_many() {
        let first = WalEntry {
            pos: 0,
            stream_size: 8,
            data: vec![1, 2, 3],
        };
        let second = WalEntry {
            pos: 8,
            stream_size: 8,
            data: Vec::new(),
        };

        let mut buf = first.encode();
        buf.extend_from_slice(&second.encode());

        let (decoded, consumed) = WalEntry::decode(&buf).unwrap();
        assert_eq!(decoded, first);

        let (decoded, _) = WalEntry::decode(&buf[consumed..]).unwrap();
        assert_eq!(decoded, second);
    }

    #[test]
    fn detect_corruption() {
        let entry = WalEntry {
            pos: 4,
            stream_size: 32,
            data: vec![9; 10],
        };

        let mut encoded = entry.encode();
        encoded[21] ^= 0xFF;

        let result = WalEntry::decode(&encoded);
        assert!(matches!(result, Err(CoreError::ChecksumMismatch { .. })));
    }

    #[test]
    fn truncated_entry_fails() {
        let entry = WalEntry {
            pos: 4,
            stream_size: 32,
            data: vec![9; 10],
        };

        let encoded = entry.encode();
        let result = WalEntry::decode(&encoded[..encoded.len() - 1]);
        assert!(matches!(result, Err(CoreError::WalCorruption { .. })));
    }
}
