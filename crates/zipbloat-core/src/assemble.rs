//! Archive assembly.
//!
//! Builds the plain, standards-valid archive the rewriter starts from: the
//! template entry first, then the caller's extra entries in order. Every entry
//! is DEFLATE-compressed at the highest level and carries its sizes in the
//! local header, so no data descriptors are written.

use crate::error::{Error, Result};
use crate::format::{
    self, Signature, DOS_DATE_EPOCH, FLAG_UTF8, METHOD_DEFLATE, VERSION_NEEDED,
};
use crate::MAX_ENTRIES;
use bytes::BufMut;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use tracing::{debug, trace};

/// Size of the zero block fed to the compressor when streaming the template
const ZERO_CHUNK: usize = 64 * 1024;

/// A caller-supplied entry merged into the archive unmodified
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraEntry {
    /// Entry name as stored in the archive
    pub name: String,
    /// Uncompressed entry contents
    pub data: Vec<u8>,
}

impl ExtraEntry {
    /// Creates a new extra entry
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Reads a file into an entry named after the file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| Error::file_read(path, e))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::configuration(format!("'{}' has no file name", path.display())))?;
        Ok(Self { name, data })
    }
}

/// Incremental writer for the initial archive
#[derive(Debug, Default)]
pub struct ArchiveAssembler {
    out: Vec<u8>,
    directory: Vec<u8>,
    names: HashSet<String>,
    entries: usize,
}

impl ArchiveAssembler {
    /// Creates an empty assembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries added so far
    pub fn len(&self) -> usize {
        self.entries
    }

    /// Returns true if no entry has been added
    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Adds an entry holding `size` zero bytes.
    ///
    /// The zeros are streamed through the compressor, so only the compressed
    /// stream is held in memory.
    pub fn add_zeroed(&mut self, name: &str, size: u64) -> Result<()> {
        self.claim_name(name)?;

        let chunk = vec![0u8; ZERO_CHUNK.min(size as usize)];
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
        let mut crc = crc32fast::Hasher::new();
        let mut remaining = size;

        while remaining > 0 {
            let n = remaining.min(chunk.len() as u64) as usize;
            encoder.write_all(&chunk[..n])?;
            crc.update(&chunk[..n]);
            remaining -= n as u64;
        }

        let compressed = encoder.finish()?;
        self.push_entry(name, &compressed, crc.finalize(), size)
    }

    /// Adds an entry with the given contents
    pub fn add_entry(&mut self, name: &str, data: &[u8]) -> Result<()> {
        self.claim_name(name)?;

        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(data)?;
        let compressed = encoder.finish()?;

        self.push_entry(name, &compressed, crc32fast::hash(data), data.len() as u64)
    }

    /// Writes the central directory and trailer and returns the archive bytes
    pub fn finish(mut self) -> Result<Vec<u8>> {
        let count = u16::try_from(self.entries)
            .ok()
            .filter(|&count| usize::from(count) <= MAX_ENTRIES)
            .ok_or(Error::TooManyEntries {
                requested: self.entries,
                max: MAX_ENTRIES,
            })?;

        let directory_offset = format::to_u32("central directory offset", self.out.len() as u64)?;
        let directory_size = format::to_u32("central directory size", self.directory.len() as u64)?;

        self.out.reserve(self.directory.len() + format::EOCD_LEN);
        self.out.put_slice(&self.directory);

        self.out.put_u32_le(Signature::EndOfCentralDirectory as u32);
        self.out.put_u16_le(0); // this disk
        self.out.put_u16_le(0); // directory disk
        self.out.put_u16_le(count);
        self.out.put_u16_le(count);
        self.out.put_u32_le(directory_size);
        self.out.put_u32_le(directory_offset);
        self.out.put_u16_le(0); // comment

        debug!(
            "Assembled {} entries into {} bytes (directory {} bytes at {})",
            self.entries,
            self.out.len(),
            directory_size,
            directory_offset
        );
        Ok(self.out)
    }

    fn claim_name(&mut self, name: &str) -> Result<()> {
        format::name_len(name.as_bytes())?;
        if !self.names.insert(name.to_owned()) {
            return Err(Error::name_collision(name));
        }
        Ok(())
    }

    fn push_entry(&mut self, name: &str, compressed: &[u8], crc: u32, size: u64) -> Result<()> {
        let name = name.as_bytes();
        let name_len = format::name_len(name)?;
        let offset = format::to_u32("local header offset", self.out.len() as u64)?;
        let compressed_size = format::to_u32("compressed size", compressed.len() as u64)?;
        let uncompressed_size = format::to_u32("uncompressed size", size)?;

        self.out
            .reserve(format::LOCAL_HEADER_LEN + name.len() + compressed.len());
        self.out.put_u32_le(Signature::LocalFileHeader as u32);
        self.out.put_u16_le(VERSION_NEEDED);
        self.out.put_u16_le(FLAG_UTF8);
        self.out.put_u16_le(METHOD_DEFLATE);
        self.out.put_u16_le(0); // time
        self.out.put_u16_le(DOS_DATE_EPOCH);
        self.out.put_u32_le(crc);
        self.out.put_u32_le(compressed_size);
        self.out.put_u32_le(uncompressed_size);
        self.out.put_u16_le(name_len);
        self.out.put_u16_le(0); // extra
        self.out.put_slice(name);
        self.out.put_slice(compressed);

        self.directory.put_u32_le(Signature::CentralDirectory as u32);
        self.directory.put_u16_le(VERSION_NEEDED); // made by
        self.directory.put_u16_le(VERSION_NEEDED);
        self.directory.put_u16_le(FLAG_UTF8);
        self.directory.put_u16_le(METHOD_DEFLATE);
        self.directory.put_u16_le(0); // time
        self.directory.put_u16_le(DOS_DATE_EPOCH);
        self.directory.put_u32_le(crc);
        self.directory.put_u32_le(compressed_size);
        self.directory.put_u32_le(uncompressed_size);
        self.directory.put_u16_le(name_len);
        self.directory.put_u16_le(0); // extra
        self.directory.put_u16_le(0); // comment
        self.directory.put_u16_le(0); // disk
        self.directory.put_u16_le(0); // internal attributes
        self.directory.put_u32_le(0); // external attributes
        self.directory.put_u32_le(offset);
        self.directory.put_slice(name);

        self.entries += 1;
        trace!(
            "Added entry {} at {}: {} -> {} bytes",
            String::from_utf8_lossy(name),
            offset,
            size,
            compressed_size
        );
        Ok(())
    }
}

/// Builds the archive holding the zero-filled template entry followed by the
/// extra entries
pub fn assemble(template_name: &str, file_size: u64, extras: &[ExtraEntry]) -> Result<Vec<u8>> {
    let mut assembler = ArchiveAssembler::new();
    assembler.add_zeroed(template_name, file_size)?;
    for entry in extras {
        assembler.add_entry(&entry.name, &entry.data)?;
    }
    assembler.finish()
}
