//! zipbloat - Build and inspect ZIP archives whose directory outgrows their payload
//!
//! The `create` command stores one zero-filled template entry and lists it
//! under many names in the central directory. The `inspect` command shows an
//! archive the way streaming and directory-based readers see it.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn, Level};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;
use zipbloat_core::inspect::{read_central_directory, read_local_headers};
use zipbloat_core::{
    EntryCountMode, ExtraEntry, Generator, GeneratorConfig, PatternNamer, MAX_ENTRIES,
};

/// Template sizes above this get a warning about run time and memory
const LARGE_TEMPLATE: u64 = 512 * 1024 * 1024;

/// Build and inspect ZIP archives whose central directory outgrows their payload
#[derive(Parser, Debug)]
#[command(name = "zipbloat")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate an archive
    Create(CreateArgs),
    /// Show the streaming and directory views of an archive
    Inspect(InspectArgs),
}

#[derive(Args, Debug)]
struct CreateArgs {
    /// Output archive path
    #[arg(short, long)]
    output: PathBuf,

    /// Number of directory entries backed by the template payload
    #[arg(short = 'n', long, default_value = "1000", env = "ZIPBLOAT_COUNT")]
    count: usize,

    /// Uncompressed template size (accepts K, M and G suffixes)
    #[arg(short, long, default_value = "1M", value_parser = parse_size)]
    size: u64,

    /// Entry name pattern; `{}` is replaced by the entry index
    #[arg(long, default_value = "{}")]
    name_pattern: String,

    /// Name shown to streaming readers for every entry after the first
    #[arg(long)]
    fake_name: Option<String>,

    #[command(flatten)]
    sources: EntrySources,

    /// Write zero into the trailer's entry counts, like the original tool
    #[arg(long)]
    legacy_zero_count: bool,

    /// Overwrite an existing output file
    #[arg(long)]
    force: bool,

    /// Dry run - build the archive but don't write it
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args, Debug)]
struct EntrySources {
    /// File to include as a real entry (repeatable)
    #[arg(short = 'a', long = "add", value_name = "FILE")]
    files: Vec<PathBuf>,

    /// Directory whose files are included as real entries (repeatable)
    #[arg(long = "add-dir", value_name = "DIR")]
    directories: Vec<PathBuf>,
}

#[derive(Args, Debug)]
struct InspectArgs {
    /// Archive to inspect
    file: PathBuf,

    /// Number of names to print per view (0 = all)
    #[arg(long, default_value = "10")]
    limit: usize,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .init();

    match &cli.command {
        Command::Create(args) => create(args),
        Command::Inspect(args) => inspect(args),
    }
}

/// Generate an archive and write it out
fn create(args: &CreateArgs) -> Result<()> {
    if args.output.exists() && !args.force && !args.dry_run {
        bail!(
            "File already exists: {} (use --force to overwrite)",
            args.output.display()
        );
    }
    if args.size > LARGE_TEMPLATE {
        warn!(
            "Compressing a {} template dominates run time and memory; entry count barely matters",
            human_size(args.size)
        );
    }

    let extras = collect_extras(&args.sources)?;
    info!("Collected {} extra entries", extras.len());

    let mut config = GeneratorConfig::new(args.count, args.size)
        .with_context(|| format!("Invalid settings (at most {} entries)", MAX_ENTRIES))?;
    if let Some(ref fake_name) = args.fake_name {
        config = config.fake_entry_name(fake_name.as_str())?;
    }
    if args.legacy_zero_count {
        config = config.entry_count(EntryCountMode::Zeroed);
    }

    let generator = Generator::new(PatternNamer::new(&args.name_pattern), config);
    let (archive, report) = generator
        .create_with_report(&extras)
        .context("Failed to generate archive")?;

    let fingerprint = blake3::hash(&archive).to_hex();
    let summary = format!(
        "{} bytes, {} entries advertising {} (x{:.0}), blake3 {}",
        archive.len(),
        report.directory_entries,
        human_size(report.declared_uncompressed),
        report.amplification(),
        &fingerprint[..16]
    );

    if args.dry_run {
        println!("Would write {}: {}", args.output.display(), summary);
        return Ok(());
    }

    write_archive(&args.output, &archive)?;
    println!("Wrote {}: {}", args.output.display(), summary);
    Ok(())
}

/// Print both reader views of an archive
fn inspect(args: &InspectArgs) -> Result<()> {
    trace!("Reading {}", args.file.display());
    let data = fs::read(&args.file)
        .with_context(|| format!("Failed to read input file: {}", args.file.display()))?;

    let directory = read_central_directory(&data)
        .with_context(|| format!("Failed to read central directory: {}", args.file.display()))?;
    let locals = read_local_headers(&data)
        .with_context(|| format!("Failed to walk local headers: {}", args.file.display()))?;

    println!("Archive: {} ({} bytes)", args.file.display(), data.len());
    println!(
        "Directory: {} records ({} declared), {} bytes at offset {}",
        directory.entries.len(),
        directory.declared_entries,
        directory.size,
        directory.offset
    );
    println!(
        "Advertised uncompressed size: {}",
        human_size(directory.declared_uncompressed_size())
    );
    println!("Local headers: {}", locals.len());

    print_names("Streaming view", locals.iter().map(|h| h.name.as_str()), args.limit);
    print_names("Directory view", directory.names().into_iter(), args.limit);
    Ok(())
}

fn print_names<'a>(title: &str, names: impl ExactSizeIterator<Item = &'a str>, limit: usize) {
    let total = names.len();
    println!("{}:", title);
    let shown = if limit == 0 { total } else { limit.min(total) };
    for name in names.take(shown) {
        println!("  {}", name);
    }
    if shown < total {
        println!("  ... {} more", total - shown);
    }
}

/// Read every extra entry named on the command line
fn collect_extras(sources: &EntrySources) -> Result<Vec<ExtraEntry>> {
    let mut extras = Vec::new();

    for file in &sources.files {
        if !file.is_file() {
            bail!("Input path is not a file: {}", file.display());
        }
        let entry = ExtraEntry::from_path(file)?;
        debug!("Adding {} as '{}'", file.display(), entry.name);
        extras.push(entry);
    }

    for directory in &sources.directories {
        if !directory.is_dir() {
            bail!("Path is not a directory: {}", directory.display());
        }

        for entry in WalkDir::new(directory)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !path.is_file() || is_hidden(path) {
                continue;
            }

            let name = entry_name(directory, path)?;
            let data = fs::read(path)
                .with_context(|| format!("Failed to read input file: {}", path.display()))?;
            debug!("Adding {} as '{}'", path.display(), name);
            extras.push(ExtraEntry::new(name, data));
        }
    }

    Ok(extras)
}

/// Archive name of `path`: relative to `root`, `/`-separated
fn entry_name(root: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(root)
        .with_context(|| format!("{} is outside {}", path.display(), root.display()))?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

/// Parse a byte count with an optional K/M/G suffix (powers of 1024)
fn parse_size(value: &str) -> std::result::Result<u64, String> {
    let value = value.trim();
    let (digits, shift) = match value.char_indices().last() {
        Some((i, 'k' | 'K')) => (&value[..i], 10),
        Some((i, 'm' | 'M')) => (&value[..i], 20),
        Some((i, 'g' | 'G')) => (&value[..i], 30),
        _ => (value, 0),
    };
    let base: u64 = digits
        .trim()
        .parse()
        .map_err(|e| format!("invalid size '{}': {}", value, e))?;
    base.checked_mul(1 << shift)
        .ok_or_else(|| format!("size '{}' is too large", value))
}

/// Format a byte count for humans
fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Write the archive to disk
fn write_archive(output_path: &Path, archive: &[u8]) -> Result<()> {
    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let mut file = fs::File::create(output_path)
        .with_context(|| format!("Failed to create file: {}", output_path.display()))?;

    file.write_all(archive)
        .with_context(|| format!("Failed to write file: {}", output_path.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1024").unwrap(), 1024);
        assert_eq!(parse_size("4K").unwrap(), 4096);
        assert_eq!(parse_size("1m").unwrap(), 1 << 20);
        assert_eq!(parse_size(" 2G ").unwrap(), 2 << 30);
        assert!(parse_size("lots").is_err());
        assert!(parse_size("").is_err());
        assert!(parse_size("99999999999999G").is_err());
    }

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(1536), "1.5 KiB");
        assert_eq!(human_size(3 << 30), "3.0 GiB");
    }

    #[test]
    fn test_entry_name_uses_forward_slashes() {
        let root = Path::new("/tmp/input");
        let path = root.join("nested").join("file.txt");
        assert_eq!(entry_name(root, &path).unwrap(), "nested/file.txt");
        assert!(entry_name(root, Path::new("/elsewhere/x")).is_err());
    }

    #[test]
    fn test_collect_extras_from_directory() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir(root.join("sub")).unwrap();
        fs::write(root.join("b.txt"), b"b").unwrap();
        fs::write(root.join("sub").join("a.txt"), b"a").unwrap();
        fs::write(root.join(".hidden"), b"h").unwrap();

        let sources = EntrySources {
            files: Vec::new(),
            directories: vec![root.to_path_buf()],
        };
        let extras = collect_extras(&sources).unwrap();
        let names: Vec<&str> = extras.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["b.txt", "sub/a.txt"]);
        assert_eq!(extras[1].data, b"a");
    }

    #[test]
    fn test_create_writes_archive() {
        let temp_dir = TempDir::new().unwrap();
        let output = temp_dir.path().join("out").join("bomb.zip");
        let args = CreateArgs {
            output: output.clone(),
            count: 25,
            size: 4096,
            name_pattern: "T-{}.bin".to_string(),
            fake_name: Some("FakedEntryName".to_string()),
            sources: EntrySources {
                files: Vec::new(),
                directories: Vec::new(),
            },
            legacy_zero_count: false,
            force: false,
            dry_run: false,
        };
        create(&args).unwrap();

        let data = fs::read(&output).unwrap();
        let directory = read_central_directory(&data).unwrap();
        assert_eq!(directory.entries.len(), 25);
        assert_eq!(directory.entries[24].name, "T-24.bin");

        // A second run without --force must not clobber the file
        assert!(create(&args).is_err());
    }

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
