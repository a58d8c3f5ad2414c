//! Checksum helpers shared by the WAL and on-disk snapshot codec.

use crc32fast::Hasher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumType {
    Crc32c,
    /// No verification — tests only.
    None,
}

impl Default for ChecksumType {
    fn default() -> Self {
        Self::Crc32c
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChecksumError {
    #[error("checksum mismatch: expected {expected:#x}, got {actual:#x} over {data_len} bytes")]
    Mismatch { expected: u32, actual: u32, data_len: usize },
}

pub struct Checksum;

impl Checksum {
    pub fn compute(checksum_type: ChecksumType, data: &[u8]) -> u32 {
        match checksum_type {
            ChecksumType::Crc32c => {
                let mut hasher = Hasher::new();
                hasher.update(data);
                hasher.finalize()
            }
            ChecksumType::None => 0,
        }
    }

    pub fn verify(checksum_type: ChecksumType, data: &[u8], expected: u32) -> Result<(), ChecksumError> {
        if checksum_type == ChecksumType::None {
            return Ok(());
        }
        let actual = Self::compute(checksum_type, data);
        if actual != expected {
            return Err(ChecksumError::Mismatch { expected, actual, data_len: data.len() });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let data = b"tinysql wal record";
        let sum = Checksum::compute(ChecksumType::Crc32c, data);
        assert!(Checksum::verify(ChecksumType::Crc32c, data, sum).is_ok());
    }

    #[test]
    fn test_mismatch_detected() {
        let data = b"tinysql wal record";
        let sum = Checksum::compute(ChecksumType::Crc32c, data);
        assert!(Checksum::verify(ChecksumType::Crc32c, b"corrupted data!!", sum).is_err());
    }
}
