//! # zipbloat-core
//!
//! A library for building ZIP archives that are small on disk but whose central
//! directory advertises a huge number of entries.
//!
//! This crate provides the core functionality for:
//! - Assembling a plain archive from a zero-filled template entry and extra entries
//! - Rewriting that archive in a single pass so one stored payload backs many
//!   directory records
//! - Hiding entry names from streaming readers behind a camouflage name
//! - Reading archives the way streaming and directory-based readers do
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`assemble`]: Initial archive construction
//! - [`rewrite`]: Local header, central directory and trailer rewriting
//! - [`generator`]: Configuration and the end-to-end pipeline
//! - [`inspect`]: Streaming and directory-based readers
//! - [`format`]: Record signatures and field layout
//! - [`error`]: Error types and handling
//!
//! ## Example
//!
//! ```
//! use zipbloat_core::{ExtraEntry, Generator, GeneratorConfig, PatternNamer};
//! use zipbloat_core::inspect::read_central_directory;
//!
//! let config = GeneratorConfig::new(1000, 1024 * 1024)?.fake_entry_name("FakedEntryName")?;
//! let generator = Generator::new(PatternNamer::new("T-{}.class"), config);
//!
//! let archive = generator.create(&[ExtraEntry::new("readme.txt", b"hello".to_vec())])?;
//!
//! let directory = read_central_directory(&archive)?;
//! assert_eq!(directory.entries.len(), 1001);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Extensibility
//!
//! The [`EntryNamer`] trait lets callers choose the generated entry names;
//! any `Fn(usize) -> String` closure implements it.
//!

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod assemble;
pub mod error;
pub mod format;
pub mod generator;
pub mod inspect;
pub mod namer;
pub mod rewrite;

// Re-export primary types for convenience
pub use assemble::{ArchiveAssembler, ExtraEntry};
pub use error::{Error, Result};
pub use generator::{BombReport, Generator, GeneratorConfig};
pub use namer::{EntryNamer, PatternNamer};
pub use rewrite::{EntryCountMode, RewriteStats, Rewriter};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum number of entries in one archive.
///
/// The trailer counts entries in 16 bits and `0xFFFF` marks a ZIP64 archive.
pub const MAX_ENTRIES: usize = 0xFFFE;

/// Maximum template payload size.
///
/// Sizes are stored in 32-bit fields; the margin keeps clear of the
/// `0xFFFFFFFF` ZIP64 sentinel.
pub const MAX_FILE_SIZE: u64 = u32::MAX as u64 - 2;
