//! SQL identifier validation
//!
//! Table, schema and column names are interpolated into SQL text, so every name is checked
//! against `[A-Za-z_][A-Za-z0-9_]*` (at most 63 bytes, the Postgres limit) and then quoted.

use retail_common::{EtlError, Result};

pub const MAX_IDENTIFIER_LEN: usize = 63;

pub fn validate_identifier(name: &str) -> Result<&str> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if !valid_start || !valid_rest || name.len() > MAX_IDENTIFIER_LEN {
        return Err(EtlError::Config(format!("invalid SQL identifier '{}'", name)));
    }
    Ok(name)
}

/// Validate and double-quote an identifier, preserving its case
pub fn quote_identifier(name: &str) -> Result<String> {
    validate_identifier(name).map(|n| format!("\"{}\"", n))
}
