use parley_core::Envelope;

use crate::error::StoreError;

/// Get a required column value from a row, returning CorruptRow on failure.
pub fn get<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Parse a stored document into an envelope.
pub fn parse_envelope(raw: &str) -> Result<Envelope, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::CorruptRow {
        table: "documents",
        column: "doc",
        detail: format!("invalid envelope: {e}"),
    })
}
