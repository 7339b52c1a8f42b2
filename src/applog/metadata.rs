//! Log metadata header
//!
//! A small ordered key/value table serialized at the head of every
//! segment file. Layout (big-endian):
//! - magic (4 bytes)
//! - entry count (2 bytes)
//! - per entry: key length (2 bytes), key bytes, value (8 bytes)
//! - crc32 of all preceding bytes (4 bytes)

use std::collections::BTreeMap;
use std::io;

/// Metadata magic bytes "AHTM"
const METADATA_MAGIC: [u8; 4] = *b"AHTM";

/// CRC32 algorithm for header integrity
const CRC_ALGORITHM: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISCSI);

/// Key for the format version
pub const META_VERSION: &str = "VERSION";

/// Key for the segment rollover threshold
pub const META_FILE_SIZE: &str = "FILE_SIZE";

/// Ordered key → integer metadata table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: BTreeMap<String, u64>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an integer value under `key`, replacing any previous value.
    pub fn put_int(&mut self, key: &str, value: u64) -> &mut Self {
        self.entries.insert(key.to_string(), value);
        self
    }

    /// Look up the integer recorded under `key`.
    pub fn get_int(&self, key: &str) -> Option<u64> {
        self.entries.get(key).copied()
    }

    /// Serialize with trailing CRC.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + 2 + self.entries.len() * 16 + 4);
        buf.extend_from_slice(&METADATA_MAGIC);
        buf.extend_from_slice(&(self.entries.len() as u16).to_be_bytes());

        for (key, value) in &self.entries {
            buf.extend_from_slice(&(key.len() as u16).to_be_bytes());
            buf.extend_from_slice(key.as_bytes());
            buf.extend_from_slice(&value.to_be_bytes());
        }

        let crc = CRC_ALGORITHM.checksum(&buf);
        buf.extend_from_slice(&crc.to_be_bytes());
        buf
    }

    /// Deserialize and validate magic and CRC.
    ///
    /// # Errors
    ///
    /// Returns `InvalidData` if the buffer is malformed or the checksum
    /// does not match.
    pub fn from_bytes(bytes: &[u8]) -> io::Result<Self> {
        if bytes.len() < 4 + 2 + 4 {
            return Err(malformed("metadata too short"));
        }

        let (body, crc_bytes) = bytes.split_at(bytes.len() - 4);
        let stored_crc = u32::from_be_bytes(crc_bytes.try_into().unwrap());
        if CRC_ALGORITHM.checksum(body) != stored_crc {
            return Err(malformed("metadata checksum mismatch"));
        }

        if body[..4] != METADATA_MAGIC {
            return Err(malformed("bad metadata magic"));
        }

        let count = u16::from_be_bytes(body[4..6].try_into().unwrap()) as usize;
        let mut entries = BTreeMap::new();
        let mut pos = 6;

        for _ in 0..count {
            if body.len() < pos + 2 {
                return Err(malformed("truncated metadata entry"));
            }
            let key_len =
                u16::from_be_bytes(body[pos..pos + 2].try_into().unwrap()) as usize;
            pos += 2;

            if body.len() < pos + key_len + 8 {
                return Err(malformed("truncated metadata entry"));
            }
            let key = std::str::from_utf8(&body[pos..pos + key_len])
                .map_err(|_| malformed("metadata key is not utf-8"))?
                .to_string();
            pos += key_len;

            let value = u64::from_be_bytes(body[pos..pos + 8].try_into().unwrap());
            pos += 8;

            entries.insert(key, value);
        }

        if pos != body.len() {
            return Err(malformed("trailing bytes after metadata entries"));
        }

        Ok(Self { entries })
    }
}

fn malformed(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let mut meta = Metadata::new();
        meta.put_int(META_VERSION, 1).put_int(META_FILE_SIZE, 1 << 20);

        let bytes = meta.to_bytes();
        let restored = Metadata::from_bytes(&bytes).unwrap();

        assert_eq!(restored, meta);
        assert_eq!(restored.get_int(META_VERSION), Some(1));
        assert_eq!(restored.get_int(META_FILE_SIZE), Some(1 << 20));
        assert_eq!(restored.get_int("MISSING"), None);
    }

    #[test]
    fn test_empty_roundtrip() {
        let meta = Metadata::new();
        let restored = Metadata::from_bytes(&meta.to_bytes()).unwrap();
        assert_eq!(restored, meta);
    }

    #[test]
    fn test_put_replaces() {
        let mut meta = Metadata::new();
        meta.put_int("K", 1);
        meta.put_int("K", 2);
        assert_eq!(meta.get_int("K"), Some(2));
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut meta = Metadata::new();
        meta.put_int(META_VERSION, 1);
        let mut bytes = meta.to_bytes();
        bytes[0] = b'X';
        assert!(Metadata::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_rejects_corrupted_body() {
        let mut meta = Metadata::new();
        meta.put_int(META_FILE_SIZE, 4096);
        let mut bytes = meta.to_bytes();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        assert!(Metadata::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_rejects_truncation() {
        let mut meta = Metadata::new();
        meta.put_int(META_FILE_SIZE, 4096);
        let bytes = meta.to_bytes();
        assert!(Metadata::from_bytes(&bytes[..bytes.len() - 1]).is_err());
        assert!(Metadata::from_bytes(&[]).is_err());
    }
}
