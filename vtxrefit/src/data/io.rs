use std::error::Error;
use std::fs;
use std::io;
use std::io::{Read, Write};
use std::path::Path;

use tracing::info;
use vtxcore::data::event::EventRecord;
use vtxcore::refit::producer::EventOutput;

/// Compression level used for every zstd file written here.
pub const ZSTD_LEVEL: i32 = 3;

/// Decompresses a ZSTD compressed byte array
///
/// # Arguments
///
/// * `compressed_data` - A byte slice that holds the compressed data
///
/// # Returns
///
/// * `decompressed_data` - A vector of u8 that holds the decompressed data
///
pub fn zstd_decompress(compressed_data: &[u8]) -> io::Result<Vec<u8>> {
    let mut decoder = zstd::Decoder::new(compressed_data)?;
    let mut decompressed_data = Vec::new();
    decoder.read_to_end(&mut decompressed_data)?;
    Ok(decompressed_data)
}

/// Compresses a byte array using ZSTD
///
/// # Arguments
///
/// * `decompressed_data` - A byte slice that holds the decompressed data
///
/// # Returns
///
/// * `compressed_data` - A vector of u8 that holds the compressed data
///
pub fn zstd_compress(decompressed_data: &[u8], compression_level: i32) -> io::Result<Vec<u8>> {
    let mut encoder = zstd::Encoder::new(Vec::new(), compression_level)?;
    encoder.write_all(decompressed_data)?;
    let compressed_data = encoder.finish()?;
    Ok(compressed_data)
}

/// On-disk layout of a file, derived from its name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileFormat {
    /// A single JSON array.
    Json,
    /// One JSON document per line.
    JsonLines,
    /// bincode, outputs only.
    Bincode,
}

/// Format and compression of `path`: `events.jsonl.zst` is `(JsonLines, true)`.
pub fn detect_format(path: &Path) -> Result<(FileFormat, bool), Box<dyn Error>> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| format!("invalid file name: {}", path.display()))?;

    let (inner, compressed) = match name.strip_suffix(".zst") {
        Some(inner) => (inner, true),
        None => (name, false),
    };

    let format = match inner.rsplit('.').next() {
        Some("json") => FileFormat::Json,
        Some("jsonl") => FileFormat::JsonLines,
        Some("bin") => FileFormat::Bincode,
        _ => return Err(format!("unsupported file extension: {}", name).into()),
    };
    Ok((format, compressed))
}

/// Parses events from decompressed text.
pub fn parse_events(text: &str, format: FileFormat) -> Result<Vec<EventRecord>, Box<dyn Error>> {
    match format {
        FileFormat::Json => Ok(serde_json::from_str(text)?),
        FileFormat::JsonLines => {
            let mut events = Vec::new();
            for (number, line) in text.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let event = serde_json::from_str(line)
                    .map_err(|e| format!("line {}: {}", number + 1, e))?;
                events.push(event);
            }
            Ok(events)
        }
        FileFormat::Bincode => Err("events are not read from bincode".into()),
    }
}

pub fn read_events(path: &Path) -> Result<Vec<EventRecord>, Box<dyn Error>> {
    let (format, compressed) = detect_format(path)?;
    let mut bytes = fs::read(path)?;
    if compressed {
        bytes = zstd_decompress(&bytes)?;
    }
    let text = String::from_utf8(bytes)?;
    let events = parse_events(&text, format)?;
    info!(path = %path.display(), events = events.len(), "events read");
    Ok(events)
}

fn write_bytes(path: &Path, bytes: Vec<u8>, compressed: bool) -> Result<(), Box<dyn Error>> {
    let bytes = if compressed { zstd_compress(&bytes, ZSTD_LEVEL)? } else { bytes };
    fs::write(path, bytes)?;
    Ok(())
}

pub fn write_events(path: &Path, events: &[EventRecord]) -> Result<(), Box<dyn Error>> {
    let (format, compressed) = detect_format(path)?;
    let bytes = match format {
        FileFormat::Json => serde_json::to_vec_pretty(events)?,
        FileFormat::JsonLines => {
            let mut buffer = Vec::new();
            for event in events {
                serde_json::to_writer(&mut buffer, event)?;
                buffer.push(b'\n');
            }
            buffer
        }
        FileFormat::Bincode => return Err("events are not written as bincode".into()),
    };
    write_bytes(path, bytes, compressed)?;
    info!(path = %path.display(), events = events.len(), "events written");
    Ok(())
}

pub fn write_outputs(path: &Path, outputs: &[EventOutput]) -> Result<(), Box<dyn Error>> {
    let (format, compressed) = detect_format(path)?;
    let bytes = match format {
        FileFormat::Json => serde_json::to_vec_pretty(outputs)?,
        FileFormat::JsonLines => {
            let mut buffer = Vec::new();
            for output in outputs {
                serde_json::to_writer(&mut buffer, output)?;
                buffer.push(b'\n');
            }
            buffer
        }
        FileFormat::Bincode => bincode::encode_to_vec(outputs, bincode::config::standard())?,
    };
    write_bytes(path, bytes, compressed)?;
    info!(path = %path.display(), outputs = outputs.len(), "outputs written");
    Ok(())
}

pub fn read_outputs(path: &Path) -> Result<Vec<EventOutput>, Box<dyn Error>> {
    let (format, compressed) = detect_format(path)?;
    let mut bytes = fs::read(path)?;
    if compressed {
        bytes = zstd_decompress(&bytes)?;
    }
    match format {
        FileFormat::Json => Ok(serde_json::from_slice(&bytes)?),
        FileFormat::JsonLines => {
            let text = String::from_utf8(bytes)?;
            let mut outputs = Vec::new();
            for line in text.lines().filter(|l| !l.trim().is_empty()) {
                outputs.push(serde_json::from_str(line)?);
            }
            Ok(outputs)
        }
        FileFormat::Bincode => {
            let (outputs, _): (Vec<EventOutput>, usize) =
                bincode::decode_from_slice(&bytes, bincode::config::standard())?;
            Ok(outputs)
        }
    }
}
