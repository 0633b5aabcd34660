//! JSON-lines source files.
//!
//! Each non-blank line holds one record. A line that does not parse becomes an
//! acquisition error for that record alone, so the corpus build skips it and
//! carries on.

use std::io::BufRead;
use std::path::Path;

use anyhow::Context;
use medrag_retrieval::RagError;
use serde::de::DeserializeOwned;

/// Parse JSON-lines from `reader`. `origin` names the source in error records.
pub fn parse_lines<T: DeserializeOwned>(
    reader: impl BufRead,
    origin: &str,
) -> std::io::Result<Vec<Result<T, RagError>>> {
    let mut records = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed = serde_json::from_str(&line).map_err(|e| RagError::Acquisition {
            record: format!("{origin}:{}", idx + 1),
            message: e.to_string(),
        });
        records.push(parsed);
    }
    Ok(records)
}

/// Read a JSON-lines file.
///
/// # Errors
///
/// Fails only if the file cannot be opened or read; malformed lines are
/// returned as per-record errors.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<Result<T, RagError>>> {
    let file = std::fs::File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    parse_lines(std::io::BufReader::new(file), &path.display().to_string())
        .with_context(|| format!("cannot read {}", path.display()))
}
