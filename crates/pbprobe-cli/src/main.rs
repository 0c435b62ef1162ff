//! pbprobe - Decode and re-encode Protocol Buffer payloads without a schema
//!
//! `decode` turns captured wire bytes into JSON keyed by
//! `"<field-number>/<type>"`; `encode` turns such JSON back into bytes.

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use clap::{Args, Parser, Subcommand, ValueEnum};
use pbprobe_core::{Decoder, DecoderConfig, FloatRounding, Message};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn, Level};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

/// Decode and re-encode Protocol Buffer payloads without a .proto definition
#[derive(Parser, Debug)]
#[command(name = "pbprobe")]
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
    /// Decode wire bytes into JSON
    Decode(DecodeArgs),
    /// Encode JSON back into wire bytes
    Encode(EncodeArgs),
}

#[derive(Args, Debug)]
struct DecodeArgs {
    #[command(flatten)]
    input: InputMode,

    /// How the input bytes are represented
    #[arg(long, value_enum, default_value = "raw")]
    input_format: PayloadFormat,

    /// Keep full float precision instead of rounding to 5 decimals
    #[arg(long)]
    exact_floats: bool,

    /// Print JSON on a single line
    #[arg(long)]
    compact: bool,

    /// Output file (single input) or directory (directory input)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Overwrite existing files
    #[arg(long)]
    force: bool,
}

#[derive(Args, Debug)]
#[group(required = false, multiple = false)]
struct InputMode {
    /// Payload file to decode (reads stdin when no input is given)
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Directory of captured payloads to decode
    #[arg(short, long)]
    directory: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct EncodeArgs {
    /// JSON file to encode (reads stdin when omitted)
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// How the output bytes are represented
    #[arg(long, value_enum, default_value = "raw")]
    output_format: PayloadFormat,

    /// Output file (writes stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Overwrite existing files
    #[arg(long)]
    force: bool,
}

/// Representation of a binary payload on disk or on a pipe
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PayloadFormat {
    /// Bytes as-is
    Raw,
    /// Standard base64, whitespace ignored
    Base64,
    /// Hexadecimal pairs, whitespace ignored
    Hex,
}

#[derive(Debug, Default)]
struct DirectoryStats {
    decoded: usize,
    not_protobuf: usize,
    written: usize,
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
        .with_writer(io::stderr)
        .init();

    match &cli.command {
        Command::Decode(args) => run_decode(args),
        Command::Encode(args) => run_encode(args),
    }
}

fn run_decode(args: &DecodeArgs) -> Result<()> {
    let decoder = decoder_for(args);

    if let Some(ref directory) = args.input.directory {
        let stats = decode_directory(&decoder, args, directory)?;
        info!(
            "Summary: {} decoded, {} not protobuf, {} written",
            stats.decoded, stats.not_protobuf, stats.written
        );
        return Ok(());
    }

    let raw = read_input(args.input.file.as_deref())?;
    let data = parse_payload(&raw, args.input_format)?;
    trace!("Decoding {} bytes", data.len());

    let message = decoder
        .decode(&data)
        .context("Input is not a decodable protobuf message")?;

    let mut rendered = render_json(&message, args.compact)?;
    rendered.push('\n');
    write_output(args.output.as_deref(), rendered.as_bytes(), args.force)
}

fn run_encode(args: &EncodeArgs) -> Result<()> {
    let raw = read_input(args.file.as_deref())?;
    let json = pbprobe_core::parse_json(&raw).context("Input is not valid JSON")?;

    let message = Message::from_json(&json).context("JSON does not describe a message")?;
    let bytes = pbprobe_core::encode(&message).context("Failed to encode message")?;
    debug!("Encoded {} bytes", bytes.len());

    write_output(
        args.output.as_deref(),
        &format_payload(&bytes, args.output_format),
        args.force,
    )
}

fn decoder_for(args: &DecodeArgs) -> Decoder {
    let rounding = if args.exact_floats {
        FloatRounding::Exact
    } else {
        FloatRounding::default()
    };
    Decoder::with_config(DecoderConfig::new().float_rounding(rounding))
}

/// Decode every payload under a directory, writing `<name>.json` next to
/// it or under the output directory with the same relative layout
fn decode_directory(
    decoder: &Decoder,
    args: &DecodeArgs,
    directory: &Path,
) -> Result<DirectoryStats> {
    if !directory.is_dir() {
        bail!("Path is not a directory: {}", directory.display());
    }

    info!("Scanning directory: {}", directory.display());
    let output_root = args.output.as_deref().unwrap_or(directory);
    let mut stats = DirectoryStats::default();

    for entry in WalkDir::new(directory)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();

        if !path.is_file() || is_hidden(path) || has_extension(path, "json") {
            continue;
        }

        let data = fs::read(path)
            .with_context(|| format!("Failed to read input file: {}", path.display()))
            .and_then(|raw| parse_payload(&raw, args.input_format));

        let message = match data.map(|data| decoder.decode(&data)) {
            Ok(Ok(message)) => message,
            Ok(Err(e)) => {
                debug!("Not protobuf: {}: {}", path.display(), e);
                stats.not_protobuf += 1;
                continue;
            }
            Err(e) => {
                warn!("Skipping {}: {:#}", path.display(), e);
                continue;
            }
        };
        stats.decoded += 1;

        let relative = path.strip_prefix(directory).unwrap_or(path);
        let target = json_path_for(&output_root.join(relative));

        let mut rendered = render_json(&message, args.compact)?;
        rendered.push('\n');

        match write_file(&target, rendered.as_bytes(), args.force) {
            Ok(()) => {
                info!("Wrote {}", target.display());
                stats.written += 1;
            }
            Err(e) => warn!("Failed to write {}: {:#}", target.display(), e),
        }
    }

    Ok(stats)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}

/// `capture.bin` -> `capture.bin.json`
fn json_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".json");
    path.with_file_name(name)
}

fn render_json(message: &Message, compact: bool) -> Result<String> {
    let json = message
        .to_json()
        .context("Message cannot be represented as JSON")?;
    let rendered = if compact {
        serde_json::to_string(&json)
    } else {
        serde_json::to_string_pretty(&json)
    };
    rendered.context("Failed to render JSON")
}

fn read_input(file: Option<&Path>) -> Result<Vec<u8>> {
    match file {
        Some(path) => {
            trace!("Reading {}", path.display());
            fs::read(path).with_context(|| format!("Failed to read input file: {}", path.display()))
        }
        None => {
            let mut buf = Vec::new();
            io::stdin()
                .read_to_end(&mut buf)
                .context("Failed to read stdin")?;
            Ok(buf)
        }
    }
}

/// Turn the textual payload representations back into bytes
fn parse_payload(raw: &[u8], format: PayloadFormat) -> Result<Vec<u8>> {
    let compact = || -> Vec<u8> {
        raw.iter()
            .copied()
            .filter(|b| !b.is_ascii_whitespace())
            .collect()
    };

    match format {
        PayloadFormat::Raw => Ok(raw.to_vec()),
        PayloadFormat::Base64 => STANDARD
            .decode(compact())
            .context("Input is not valid base64"),
        PayloadFormat::Hex => decode_hex(&compact()),
    }
}

fn decode_hex(text: &[u8]) -> Result<Vec<u8>> {
    if text.len() % 2 != 0 {
        bail!("Hex input has an odd number of digits");
    }

    text.chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|digits| u8::from_str_radix(digits, 16).ok())
                .with_context(|| format!("Invalid hex digits: {:?}", String::from_utf8_lossy(pair)))
        })
        .collect()
}

fn format_payload(bytes: &[u8], format: PayloadFormat) -> Vec<u8> {
    match format {
        PayloadFormat::Raw => bytes.to_vec(),
        PayloadFormat::Base64 => format!("{}\n", STANDARD.encode(bytes)).into_bytes(),
        PayloadFormat::Hex => {
            let mut hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
            hex.push('\n');
            hex.into_bytes()
        }
    }
}

fn write_output(output: Option<&Path>, content: &[u8], force: bool) -> Result<()> {
    match output {
        Some(path) => write_file(path, content, force),
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(content).context("Failed to write stdout")?;
            stdout.flush().context("Failed to flush stdout")
        }
    }
}

/// Write a file, refusing to clobber an existing one unless forced
fn write_file(output_path: &Path, content: &[u8], force: bool) -> Result<()> {
    // Create parent directories
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    if output_path.exists() && !force {
        bail!(
            "File already exists: {} (use --force to overwrite)",
            output_path.display()
        );
    }

    let mut file = fs::File::create(output_path)
        .with_context(|| format!("Failed to create file: {}", output_path.display()))?;

    file.write_all(content)
        .with_context(|| format!("Failed to write file: {}", output_path.display()))?;

    Ok(())
}
