//! Line-delimited JSON record files.
//!
//! Ingestion writes `chunks.jsonl`/`sections.jsonl`; every build writes
//! row-aligned copies next to its vector indexes. Records are validated
//! here, at the boundary, so the retrieval path can trust them.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use manual_core::{Chunk, ManualError, Result, Section};

/// Parse line-delimited records, skipping blank lines.
pub fn parse_jsonl<T: DeserializeOwned>(bytes: &[u8], path: &Path) -> Result<Vec<T>> {
    Ok(parse_numbered(bytes, path)?
        .into_iter()
        .map(|(_, record)| record)
        .collect())
}

/// Parse records paired with their 1-based line number in the file.
fn parse_numbered<T: DeserializeOwned>(bytes: &[u8], path: &Path) -> Result<Vec<(usize, T)>> {
    let text = std::str::from_utf8(bytes).map_err(|e| ManualError::InvalidRecord {
        path: path.to_path_buf(),
        line: 0,
        reason: format!("not valid UTF-8: {}", e),
    })?;

    let mut records = Vec::new();
    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(line).map_err(|e| ManualError::InvalidRecord {
            path: path.to_path_buf(),
            line: i + 1,
            reason: e.to_string(),
        })?;
        records.push((i + 1, record));
    }
    Ok(records)
}

/// Write records one per line and return the blake3 hex digest of the bytes written.
pub fn write_jsonl<T: Serialize>(path: &Path, records: &[T]) -> Result<String> {
    let mut hasher = blake3::Hasher::new();
    let mut file = BufWriter::new(fs::File::create(path)?);

    for record in records {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        hasher.update(&line);
        file.write_all(&line)?;
    }

    file.flush()?;
    file.get_ref().sync_all()?;
    Ok(digest_hex(hasher.finalize()))
}

/// Blake3 hex digest of a byte slice.
pub fn digest(bytes: &[u8]) -> String {
    digest_hex(blake3::hash(bytes))
}

fn digest_hex(hash: blake3::Hash) -> String {
    hex::encode(hash.as_bytes())
}

/// Load chunk records produced by ingestion.
///
/// Fails with `MissingInput` when the file is absent or holds no records.
pub fn load_chunks(path: &Path) -> Result<Vec<Chunk>> {
    if !path.is_file() {
        return Err(ManualError::MissingInput {
            path: path.to_path_buf(),
        });
    }

    let bytes = fs::read(path)?;
    let numbered: Vec<(usize, Chunk)> = parse_numbered(&bytes, path)?;
    if numbered.is_empty() {
        return Err(ManualError::MissingInput {
            path: path.to_path_buf(),
        });
    }

    let chunks = validate_all(path, numbered, Chunk::validate)?;
    debug!("Loaded {} chunk records from {:?}", chunks.len(), path);
    Ok(chunks)
}

/// Load section records produced by ingestion. Absent file means no sections.
pub fn load_sections(path: &Path) -> Result<Vec<Section>> {
    if !path.is_file() {
        return Ok(Vec::new());
    }

    let bytes = fs::read(path)?;
    let numbered: Vec<(usize, Section)> = parse_numbered(&bytes, path)?;
    let sections = validate_all(path, numbered, Section::validate)?;
    debug!("Loaded {} section records from {:?}", sections.len(), path);
    Ok(sections)
}

fn validate_all<T>(
    path: &Path,
    numbered: Vec<(usize, T)>,
    check: impl Fn(&T) -> std::result::Result<(), String>,
) -> Result<Vec<T>> {
    numbered
        .into_iter()
        .map(|(line, record)| {
            check(&record).map_err(|reason| ManualError::InvalidRecord {
                path: path.to_path_buf(),
                line,
                reason,
            })?;
            Ok(record)
        })
        .collect()
}
