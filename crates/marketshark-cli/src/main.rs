//! marketshark - Decode captured marketplace traffic offline
//!
//! This tool replays TCP segment dumps through the reassembly engine and
//! protocol decoder, printing each recovered marketplace response. Dumps
//! are produced by a capture collaborator; one segment per line:
//!
//! ```text
//! # ack seq next_seq payload
//! 3735928559 1000 1460 0102...0d18
//! ```
//!
//! Payload hex may carry the `aa:bb:cc` colon separators some capture
//! tools emit.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, ValueEnum};
use marketshark_core::{MarketplaceResponse, RawSegment, ReassemblerConfig, StreamDecoder};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn, Level};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

/// Decode captured marketplace traffic offline
#[derive(Parser, Debug)]
#[command(name = "marketshark")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    input: InputMode,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output format
    #[arg(long, value_enum, default_value = "summary")]
    format: OutputFormat,

    /// Skip responses whose reconstructed buffer was already seen
    #[arg(long)]
    dedup: bool,

    /// Upper bound on concurrently pending reassembly buckets
    #[arg(long, default_value = "64")]
    max_pending: usize,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct InputMode {
    /// Path to a single segment dump to replay
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Path to a directory of segment dumps to replay
    #[arg(short, long)]
    directory: Option<PathBuf>,
}

/// Output format for decoded responses
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable per-response summary
    Summary,
    /// Full decoded structure as JSON
    Json,
}

/// Tracks seen buffers and counters across a replay session
#[derive(Default)]
struct ReplayRegistry {
    /// blake3 hashes of reconstructed buffers already printed
    seen: HashSet<[u8; 32]>,
    stats: ReplayStats,
}

#[derive(Default)]
struct ReplayStats {
    files: usize,
    segments: u64,
    messages: u64,
    duplicates: u64,
    failures: u64,
}

impl ReplayRegistry {
    fn new() -> Self {
        Self::default()
    }

    /// Returns false if the buffer was already seen in this session
    fn first_sighting(&mut self, buffer: &[u8]) -> bool {
        self.seen.insert(*blake3::hash(buffer).as_bytes())
    }

    fn print_summary(&self) {
        info!(
            "Summary: {} file(s), {} segments, {} messages decoded, {} duplicates skipped, {} decode failures",
            self.stats.files,
            self.stats.segments,
            self.stats.messages,
            self.stats.duplicates,
            self.stats.failures
        );
    }
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

    // Dispatch based on input mode
    if let Some(ref file) = cli.input.file {
        process_single_file(&cli, file)
    } else if let Some(ref directory) = cli.input.directory {
        process_directory(&cli, directory)
    } else {
        bail!("Either --file or --directory must be specified")
    }
}

/// Replay a single segment dump
fn process_single_file(cli: &Cli, file: &Path) -> Result<()> {
    if !file.exists() {
        bail!("Input file does not exist: {}", file.display());
    }
    if !file.is_file() {
        bail!("Input path is not a file: {}", file.display());
    }

    let mut registry = ReplayRegistry::new();
    replay_dump(cli, file, &mut registry)?;
    registry.print_summary();

    Ok(())
}

/// Replay a directory of segment dumps recursively
fn process_directory(cli: &Cli, directory: &Path) -> Result<()> {
    if !directory.exists() {
        bail!("Directory does not exist: {}", directory.display());
    }
    if !directory.is_dir() {
        bail!("Path is not a directory: {}", directory.display());
    }

    info!("Replaying dumps under: {}", directory.display());

    let mut registry = ReplayRegistry::new();

    for entry in WalkDir::new(directory)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();

        if !path.is_file() {
            continue;
        }

        // Skip hidden files
        if path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with('.'))
            .unwrap_or(false)
        {
            continue;
        }

        debug!("Replaying dump: {}", path.display());
        if let Err(e) = replay_dump(cli, path, &mut registry) {
            // Log error but continue with other files
            warn!("Error replaying {}: {}", path.display(), e);
        }
    }

    registry.print_summary();

    Ok(())
}

/// Feed one dump file through a fresh pipeline.
///
/// Each dump is an independent capture session, so ack numbers from
/// different files never share a bucket; the dedup registry spans the
/// whole run.
fn replay_dump(cli: &Cli, path: &Path, registry: &mut ReplayRegistry) -> Result<()> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read dump file: {}", path.display()))?;

    let config = ReassemblerConfig::new().max_pending_buckets(cli.max_pending);
    let mut decoder = StreamDecoder::with_config(config);
    registry.stats.files += 1;

    for (lineno, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let segment = parse_segment(line)
            .with_context(|| format!("{}:{}", path.display(), lineno + 1))?;
        registry.stats.segments += 1;

        let Some(completed) = decoder.push(segment) else {
            continue;
        };

        match completed.response {
            Ok(response) => {
                if cli.dedup && !registry.first_sighting(&completed.buffer) {
                    trace!(len = completed.buffer.len(), "duplicate response skipped");
                    registry.stats.duplicates += 1;
                    continue;
                }
                registry.stats.messages += 1;
                print_response(cli.format, &response)?;
            }
            Err(_) => {
                // Already logged by the pipeline with buffer context.
                registry.stats.failures += 1;
            }
        }
    }

    let pending = decoder.pending_buckets();
    if pending > 0 {
        warn!(
            "{} bucket(s) still waiting for segments at end of {}",
            pending,
            path.display()
        );
    }

    Ok(())
}

/// Parse one dump line: `ack seq next_seq hexpayload`
fn parse_segment(line: &str) -> Result<RawSegment> {
    let mut fields = line.split_whitespace();

    let ack = fields
        .next()
        .context("missing ack field")?
        .parse()
        .context("invalid ack")?;
    let seq = fields
        .next()
        .context("missing seq field")?
        .parse()
        .context("invalid seq")?;
    let next_seq = fields
        .next()
        .context("missing next_seq field")?
        .parse()
        .context("invalid next_seq")?;
    let payload = decode_hex(fields.next().context("missing payload field")?)?;

    if fields.next().is_some() {
        bail!("trailing fields after payload");
    }

    Ok(RawSegment {
        ack,
        seq,
        next_seq,
        payload: payload.into(),
    })
}

/// Decode a hex payload, tolerating `aa:bb:cc` colon separators
fn decode_hex(hex: &str) -> Result<Vec<u8>> {
    let hex = hex.replace(':', "");
    if !hex.is_ascii() {
        bail!("non-ASCII characters in hex payload");
    }
    if hex.len() % 2 != 0 {
        bail!("odd-length hex payload");
    }

    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .with_context(|| format!("invalid hex byte at position {}", i))
        })
        .collect()
}

/// Print one decoded response in the requested format
fn print_response(format: OutputFormat, response: &MarketplaceResponse) -> Result<()> {
    match format {
        OutputFormat::Summary => {
            println!(
                "page {}/{} - {} item(s)",
                response.page_number,
                response.total_pages,
                response.items.len()
            );
            for item in &response.items {
                println!(
                    "  {:<28} {:<10} x{:<3} {:>8} coins  {} propertie(s), expires in {}ms",
                    item.name,
                    item.rarity,
                    item.stack_count,
                    item.price,
                    item.properties.len(),
                    item.expires_in_ms
                );
            }
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(response)
                .context("Failed to serialize response")?;
            println!("{}", json);
        }
    }
    Ok(())
}
