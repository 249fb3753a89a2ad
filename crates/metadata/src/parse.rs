use crate::record::PackageRecord;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("tool output is not a package record: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("package record has no backing directory")]
    Empty,
}

/// Decodes one `go list -e -json` record.
///
/// Strict about the top-level shape (must be a JSON object with the
/// tool's field names), lenient about everything inside it. A record
/// whose `Dir` is absent or empty is unusable and rejected here rather
/// than letting a dirless tree through.
pub fn parse_record(raw: &[u8]) -> Result<PackageRecord, ParseError> {
    let record: PackageRecord = serde_json::from_slice(raw)?;
    if !record.is_usable() {
        return Err(ParseError::Empty);
    }
    Ok(record)
}
