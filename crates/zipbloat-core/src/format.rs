//! Low-level ZIP record layout.
//!
//! This module holds the signatures, fixed field offsets and little-endian
//! field helpers shared by the assembler, the rewriter and the readers.
//!
//! ## Record Overview
//!
//! Every record starts with a 4-byte little-endian signature:
//! - `50 4B 03 04`: local file header (30-byte prefix, name, extra, data)
//! - `50 4B 01 02`: central directory record (46-byte prefix, name, extra, comment)
//! - `50 4B 05 06`: end of central directory (22-byte prefix, comment)

use crate::error::{Error, Result};
use bytes::Buf;

/// Fixed prefix length of a local file header
pub const LOCAL_HEADER_LEN: usize = 30;

/// Fixed prefix length of a central directory record
pub const CENTRAL_HEADER_LEN: usize = 46;

/// Fixed prefix length of the end of central directory record
pub const EOCD_LEN: usize = 22;

/// Largest value a 16-bit length field can carry
pub const MAX_NAME_LEN: usize = u16::MAX as usize;

/// General purpose flag: sizes and CRC follow the data in a descriptor
pub const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;

/// General purpose flag: name is UTF-8
pub const FLAG_UTF8: u16 = 1 << 11;

/// Compression method: DEFLATE
pub const METHOD_DEFLATE: u16 = 8;

/// Compression method: stored
pub const METHOD_STORED: u16 = 0;

/// Version needed to extract (2.0, DEFLATE)
pub const VERSION_NEEDED: u16 = 20;

/// DOS date for 1980-01-01, the earliest representable day
pub const DOS_DATE_EPOCH: u16 = (1 << 5) | 1;

/// Field offsets inside the local file header prefix
pub mod local {
    /// General purpose bit flag
    pub const FLAGS: usize = 6;
    /// Compression method
    pub const METHOD: usize = 8;
    /// CRC-32 of the uncompressed data
    pub const CRC32: usize = 14;
    /// Compressed size
    pub const COMPRESSED_SIZE: usize = 18;
    /// Uncompressed size
    pub const UNCOMPRESSED_SIZE: usize = 22;
    /// File name length
    pub const NAME_LEN: usize = 26;
    /// Extra field length
    pub const EXTRA_LEN: usize = 28;
}

/// Field offsets inside the central directory record prefix
pub mod central {
    /// General purpose bit flag
    pub const FLAGS: usize = 8;
    /// Compression method
    pub const METHOD: usize = 10;
    /// CRC-32 of the uncompressed data
    pub const CRC32: usize = 16;
    /// Compressed size
    pub const COMPRESSED_SIZE: usize = 20;
    /// Uncompressed size
    pub const UNCOMPRESSED_SIZE: usize = 24;
    /// File name length
    pub const NAME_LEN: usize = 28;
    /// Extra field length
    pub const EXTRA_LEN: usize = 30;
    /// File comment length
    pub const COMMENT_LEN: usize = 32;
    /// Offset of the matching local file header
    pub const LOCAL_HEADER_OFFSET: usize = 42;
}

/// Field offsets inside the end of central directory prefix
pub mod eocd {
    /// Number of central directory records on this disk
    pub const ENTRIES_ON_DISK: usize = 8;
    /// Total number of central directory records
    pub const ENTRIES_TOTAL: usize = 10;
    /// Size of the central directory in bytes
    pub const DIRECTORY_SIZE: usize = 12;
    /// Offset of the start of the central directory
    pub const DIRECTORY_OFFSET: usize = 16;
    /// Archive comment length
    pub const COMMENT_LEN: usize = 20;
}

/// Record signatures recognized by the scanner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Signature {
    /// Local file header
    LocalFileHeader = 0x0403_4b50,
    /// Central directory record
    CentralDirectory = 0x0201_4b50,
    /// End of central directory record
    EndOfCentralDirectory = 0x0605_4b50,
}

impl Signature {
    /// The signature as it appears on disk
    pub const fn magic(self) -> [u8; 4] {
        (self as u32).to_le_bytes()
    }

    /// Look at the four bytes at `offset` and return the signature they spell, if any
    pub fn peek(data: &[u8], offset: usize) -> Option<Self> {
        read_u32(data, offset)
            .ok()
            .and_then(|value| Self::try_from(value).ok())
    }

    /// Fails unless the record at `offset` starts with this signature
    pub fn expect_at(self, data: &[u8], offset: usize) -> Result<()> {
        let found = data.get(offset..offset.saturating_add(4)).unwrap_or(&[]);
        if found == self.magic() {
            return Ok(());
        }
        Err(Error::malformed(
            offset,
            format!("expected {:02X?} ({:?}), found {:02X?}", self.magic(), self, found),
        ))
    }
}

impl TryFrom<u32> for Signature {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0x0403_4b50 => Ok(Signature::LocalFileHeader),
            0x0201_4b50 => Ok(Signature::CentralDirectory),
            0x0605_4b50 => Ok(Signature::EndOfCentralDirectory),
            _ => Err(Error::malformed(0, format!("unknown signature: {:#010x}", value))),
        }
    }
}

/// Borrow `len` bytes at `offset`, failing with the record context when they are missing
pub fn slice<'a>(data: &'a [u8], offset: usize, len: usize, what: &str) -> Result<&'a [u8]> {
    offset
        .checked_add(len)
        .and_then(|end| data.get(offset..end))
        .ok_or_else(|| {
            Error::malformed(
                offset,
                format!(
                    "truncated {}: need {} bytes, have {}",
                    what,
                    len,
                    data.len().saturating_sub(offset)
                ),
            )
        })
}

/// Decode a little-endian `u16` at `offset`
pub fn read_u16(data: &[u8], offset: usize) -> Result<u16> {
    let mut field = slice(data, offset, 2, "u16 field")?;
    Ok(field.get_u16_le())
}

/// Decode a little-endian `u32` at `offset`
pub fn read_u32(data: &[u8], offset: usize) -> Result<u32> {
    let mut field = slice(data, offset, 4, "u32 field")?;
    Ok(field.get_u32_le())
}

/// Overwrite a little-endian `u16` inside an already emitted record
pub fn patch_u16(record: &mut [u8], offset: usize, value: u16) {
    record[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

/// Overwrite a little-endian `u32` inside an already emitted record
pub fn patch_u32(record: &mut [u8], offset: usize, value: u32) {
    record[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Length of a name as it goes into a 16-bit length field
pub fn name_len(name: &[u8]) -> Result<u16> {
    u16::try_from(name.len()).map_err(|_| Error::NameTooLong {
        len: name.len(),
        max: MAX_NAME_LEN,
    })
}

/// Narrow a size or offset to its 32-bit field
pub fn to_u32(field: &'static str, value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::overflow(field, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_magic() {
        assert_eq!(Signature::LocalFileHeader.magic(), [0x50, 0x4B, 0x03, 0x04]);
        assert_eq!(Signature::CentralDirectory.magic(), [0x50, 0x4B, 0x01, 0x02]);
        assert_eq!(
            Signature::EndOfCentralDirectory.magic(),
            [0x50, 0x4B, 0x05, 0x06]
        );
    }

    #[test]
    fn test_signature_peek() {
        let data = [0x00, 0x50, 0x4B, 0x01, 0x02, 0x50, 0x4B];
        assert_eq!(Signature::peek(&data, 0), None);
        assert_eq!(Signature::peek(&data, 1), Some(Signature::CentralDirectory));
        // Only three bytes left
        assert_eq!(Signature::peek(&data, 4), None);
        assert_eq!(Signature::peek(&data, 100), None);
    }

    #[test]
    fn test_signature_conversion() {
        assert_eq!(
            Signature::try_from(0x0605_4b50).unwrap(),
            Signature::EndOfCentralDirectory
        );
        assert!(Signature::try_from(0x0807_4b50).is_err());
    }

    #[test]
    fn test_expect_at_reports_found_bytes() {
        let err = Signature::LocalFileHeader
            .expect_at(b"PK\x05\x06rest", 0)
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("offset 0"));
        assert!(message.contains("05, 06"));
    }

    #[test]
    fn test_read_little_endian() {
        let data = [0x34, 0x12, 0x78, 0x56, 0x34, 0x12];
        assert_eq!(read_u16(&data, 0).unwrap(), 0x1234);
        assert_eq!(read_u32(&data, 2).unwrap(), 0x1234_5678);
        assert!(read_u32(&data, 4).is_err());
        assert!(read_u16(&data, usize::MAX).is_err());
    }

    #[test]
    fn test_patch_fields() {
        let mut record = [0u8; 8];
        patch_u16(&mut record, 0, 0xBEEF);
        patch_u32(&mut record, 2, 0xDEAD_BEEF);
        assert_eq!(record, [0xEF, 0xBE, 0xEF, 0xBE, 0xAD, 0xDE, 0, 0]);
    }

    #[test]
    fn test_name_len_limit() {
        assert_eq!(name_len(b"T-0").unwrap(), 3);
        let long = vec![b'a'; MAX_NAME_LEN + 1];
        assert!(matches!(
            name_len(&long),
            Err(Error::NameTooLong { len, .. }) if len == MAX_NAME_LEN + 1
        ));
    }

    #[test]
    fn test_to_u32_overflow() {
        assert_eq!(to_u32("size", 7).unwrap(), 7);
        assert!(matches!(
            to_u32("size", u64::from(u32::MAX) + 1),
            Err(Error::ArchiveOverflow { field: "size", .. })
        ));
    }
}
