//! Read-only views of an archive.
//!
//! Two readers are modeled, matching the two ways unzip tools find entries:
//!
//! - [`read_central_directory`] locates the trailer and walks the central
//!   directory, the way random-access readers list an archive.
//! - [`read_local_headers`] walks local file headers from offset 0 using the
//!   sizes they carry, the way streaming readers do.
//!
//! Both readers work on borrowed bytes and never allocate entry data;
//! [`extract`] inflates a single entry on demand.

use crate::error::{Error, Result};
use crate::format::{
    self, central, eocd, local, Signature, CENTRAL_HEADER_LEN, EOCD_LEN, FLAG_DATA_DESCRIPTOR,
    LOCAL_HEADER_LEN, METHOD_DEFLATE, METHOD_STORED,
};
use flate2::read::DeflateDecoder;
use std::io::Read;

/// One record of the central directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CentralEntry {
    /// Entry name
    pub name: String,
    /// Offset of the record itself
    pub record_offset: usize,
    /// Compression method
    pub method: u16,
    /// CRC-32 of the uncompressed data
    pub crc32: u32,
    /// Compressed size
    pub compressed_size: u32,
    /// Uncompressed size
    pub uncompressed_size: u32,
    /// Offset of the local file header this record points at
    pub local_header_offset: u32,
}

/// The directory-based view of an archive
#[derive(Debug, Clone)]
pub struct CentralDirectory {
    /// Offset of the end of central directory record
    pub trailer_offset: usize,
    /// Entry count on this disk, as declared by the trailer
    pub declared_entries_on_disk: u16,
    /// Total entry count, as declared by the trailer
    pub declared_entries: u16,
    /// Directory size, as declared by the trailer
    pub size: u32,
    /// Directory offset, as declared by the trailer
    pub offset: u32,
    /// Records found inside the declared directory region
    pub entries: Vec<CentralEntry>,
}

impl CentralDirectory {
    /// Entry names in directory order
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// Sum of all uncompressed sizes the directory advertises
    pub fn declared_uncompressed_size(&self) -> u64 {
        self.entries
            .iter()
            .map(|e| u64::from(e.uncompressed_size))
            .sum()
    }
}

/// One local file header, as seen by a streaming reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalHeader {
    /// Entry name stored in the local header
    pub name: String,
    /// Offset of the header
    pub offset: usize,
    /// Offset of the compressed data
    pub data_offset: usize,
    /// Compressed size
    pub compressed_size: u32,
    /// Uncompressed size
    pub uncompressed_size: u32,
}

/// Find the end of central directory record by scanning backwards
pub fn find_trailer(data: &[u8]) -> Result<usize> {
    if data.len() < EOCD_LEN {
        return Err(Error::malformed(
            0,
            format!("{} bytes is too short for an archive", data.len()),
        ));
    }

    // The trailer may be followed by a comment of up to 64 KiB
    let search_start = data.len().saturating_sub(EOCD_LEN + format::MAX_NAME_LEN);
    (search_start..=data.len() - EOCD_LEN)
        .rev()
        .find(|&offset| Signature::peek(data, offset) == Some(Signature::EndOfCentralDirectory))
        .ok_or_else(|| Error::malformed(data.len(), "end of central directory not found"))
}

/// Read the central directory the way a random-access reader does
pub fn read_central_directory(data: &[u8]) -> Result<CentralDirectory> {
    let trailer_offset = find_trailer(data)?;
    let trailer = format::slice(data, trailer_offset, EOCD_LEN, "end of central directory")?;

    let size = format::read_u32(trailer, eocd::DIRECTORY_SIZE)?;
    let offset = format::read_u32(trailer, eocd::DIRECTORY_OFFSET)?;
    let start = offset as usize;
    let end = start
        .checked_add(size as usize)
        .filter(|&end| end <= trailer_offset)
        .ok_or_else(|| {
            Error::malformed(
                trailer_offset,
                format!("central directory {}+{} overruns the trailer", offset, size),
            )
        })?;

    let mut entries = Vec::new();
    let mut position = start;
    while position < end {
        Signature::CentralDirectory.expect_at(data, position)?;
        let record = format::slice(data, position, CENTRAL_HEADER_LEN, "central directory record")?;

        let name_len = format::read_u16(record, central::NAME_LEN)? as usize;
        let extra_len = format::read_u16(record, central::EXTRA_LEN)? as usize;
        let comment_len = format::read_u16(record, central::COMMENT_LEN)? as usize;
        let name = format::slice(data, position + CENTRAL_HEADER_LEN, name_len, "entry name")?;

        entries.push(CentralEntry {
            name: String::from_utf8_lossy(name).into_owned(),
            record_offset: position,
            method: format::read_u16(record, central::METHOD)?,
            crc32: format::read_u32(record, central::CRC32)?,
            compressed_size: format::read_u32(record, central::COMPRESSED_SIZE)?,
            uncompressed_size: format::read_u32(record, central::UNCOMPRESSED_SIZE)?,
            local_header_offset: format::read_u32(record, central::LOCAL_HEADER_OFFSET)?,
        });

        position += CENTRAL_HEADER_LEN + name_len + extra_len + comment_len;
    }

    if position != end {
        return Err(Error::malformed(
            position,
            format!("last central directory record ends past {}", end),
        ));
    }

    Ok(CentralDirectory {
        trailer_offset,
        declared_entries_on_disk: format::read_u16(trailer, eocd::ENTRIES_ON_DISK)?,
        declared_entries: format::read_u16(trailer, eocd::ENTRIES_TOTAL)?,
        size,
        offset,
        entries,
    })
}

/// Parse the local file header at `offset`
pub fn read_local_header(data: &[u8], offset: usize) -> Result<LocalHeader> {
    Signature::LocalFileHeader.expect_at(data, offset)?;
    let header = format::slice(data, offset, LOCAL_HEADER_LEN, "local file header")?;

    let flags = format::read_u16(header, local::FLAGS)?;
    if flags & FLAG_DATA_DESCRIPTOR != 0 {
        return Err(Error::malformed(
            offset,
            "local header defers its sizes to a data descriptor",
        ));
    }

    let name_len = format::read_u16(header, local::NAME_LEN)? as usize;
    let extra_len = format::read_u16(header, local::EXTRA_LEN)? as usize;
    let name = format::slice(data, offset + LOCAL_HEADER_LEN, name_len, "entry name")?;
    let compressed_size = format::read_u32(header, local::COMPRESSED_SIZE)?;
    let data_offset = offset + LOCAL_HEADER_LEN + name_len + extra_len;
    format::slice(data, data_offset, compressed_size as usize, "entry data")?;

    Ok(LocalHeader {
        name: String::from_utf8_lossy(name).into_owned(),
        offset,
        data_offset,
        compressed_size,
        uncompressed_size: format::read_u32(header, local::UNCOMPRESSED_SIZE)?,
    })
}

/// Walk local headers from the start of the archive the way a streaming reader does
pub fn read_local_headers(data: &[u8]) -> Result<Vec<LocalHeader>> {
    let mut headers = Vec::new();
    let mut position = 0;

    while Signature::peek(data, position) == Some(Signature::LocalFileHeader) {
        let header = read_local_header(data, position)?;
        position = header.data_offset + header.compressed_size as usize;
        headers.push(header);
    }

    Ok(headers)
}

/// Inflate the data of a directory entry through the local header it points at.
///
/// Output is capped at the advertised uncompressed size, so a lying entry
/// cannot make this allocate more than it declares.
pub fn extract(data: &[u8], entry: &CentralEntry) -> Result<Vec<u8>> {
    let header = read_local_header(data, entry.local_header_offset as usize)?;
    let compressed = format::slice(
        data,
        header.data_offset,
        entry.compressed_size as usize,
        "entry data",
    )?;

    let limit = u64::from(entry.uncompressed_size);
    let contents = match entry.method {
        METHOD_STORED => compressed.to_vec(),
        METHOD_DEFLATE => {
            let mut contents = Vec::with_capacity(entry.uncompressed_size as usize);
            DeflateDecoder::new(compressed)
                .take(limit + 1)
                .read_to_end(&mut contents)?;
            contents
        }
        other => {
            return Err(Error::malformed(
                entry.record_offset,
                format!("unsupported compression method {}", other),
            ))
        }
    };

    if contents.len() as u64 != limit {
        return Err(Error::malformed(
            header.data_offset,
            format!(
                "entry '{}' inflates to {} bytes, directory says {}",
                entry.name,
                contents.len(),
                limit
            ),
        ));
    }
    if crc32fast::hash(&contents) != entry.crc32 {
        return Err(Error::malformed(
            header.data_offset,
            format!("CRC-32 mismatch for entry '{}'", entry.name),
        ));
    }

    Ok(contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::{assemble, ExtraEntry};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_find_trailer() {
        let data = assemble("T-0", 8, &[]).unwrap();
        assert_eq!(find_trailer(&data).unwrap(), data.len() - EOCD_LEN);
        assert!(find_trailer(&data[..10]).is_err());
        assert!(find_trailer(&[0u8; 64]).is_err());
    }

    #[test]
    fn test_streaming_reader_stops_at_directory() {
        let extras = vec![ExtraEntry::new("PK\x05\x06.txt", b"PK\x01\x02PK\x05\x06".to_vec())];
        let data = assemble("T-0", 8, &extras).unwrap();

        let headers = read_local_headers(&data).unwrap();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0].offset, 0);
        assert_eq!(headers[1].name, "PK\x05\x06.txt");

        let directory = read_central_directory(&data).unwrap();
        let end_of_data = headers[1].data_offset + headers[1].compressed_size as usize;
        assert_eq!(directory.offset as usize, end_of_data);
    }

    #[test]
    fn test_directory_overrun_is_malformed() {
        let mut data = assemble("T-0", 8, &[]).unwrap();
        let trailer = data.len() - EOCD_LEN;
        format::patch_u32(&mut data[trailer..], eocd::DIRECTORY_SIZE, 10_000);
        assert!(matches!(
            read_central_directory(&data),
            Err(Error::MalformedArchive { .. })
        ));
    }

    #[test]
    fn test_extract_detects_crc_mismatch() {
        let data = assemble("T-0", 8, &[]).unwrap();
        let mut directory = read_central_directory(&data).unwrap();
        directory.entries[0].crc32 ^= 1;
        assert!(extract(&data, &directory.entries[0]).is_err());
    }

    #[test]
    fn test_extract_caps_output_at_declared_size() {
        let data = assemble("T-0", 4096, &[]).unwrap();
        let mut directory = read_central_directory(&data).unwrap();
        directory.entries[0].uncompressed_size = 16;
        let err = extract(&data, &directory.entries[0]).unwrap_err();
        assert!(err.to_string().contains("17 bytes"));
    }
}
