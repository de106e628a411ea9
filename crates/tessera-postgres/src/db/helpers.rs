//! Identifier quoting, validation and parameter renumbering.

use super::types::AggregateFunction;
use crate::{Result, TesseraError};
use unicode_normalization::UnicodeNormalization;

/// Quotes a SQL identifier.
///
/// Handles schema-qualified names by quoting each part separately.
pub fn quote_identifier(name: &str) -> String {
    if name.contains('.') {
        name.split('.')
            .map(|part| format!("\"{}\"", part))
            .collect::<Vec<_>>()
            .join(".")
    } else {
        format!("\"{}\"", name)
    }
}

/// Quotes a `table.column` reference; a schema-qualified table keeps its
/// parts quoted separately.
pub fn quote_column(table: &str, column: &str) -> String {
    format!("{}.{}", quote_identifier(table), quote_identifier(column))
}

/// Validates a SQL identifier (table/column name).
///
/// Supports both simple identifiers and schema-qualified names (e.g., "public.users").
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(TesseraError::configuration("Identifier cannot be empty"));
    }

    if name.contains('.') {
        let parts: Vec<&str> = name.split('.').collect();

        // Only allow schema.table format (two parts)
        if parts.len() != 2 {
            return Err(TesseraError::configuration(format!(
                "Invalid schema-qualified identifier '{}': must be in format 'schema.table'",
                name
            )));
        }

        for part in parts {
            validate_identifier_part(part)?;
        }

        return Ok(());
    }

    validate_identifier_part(name)
}

/// Validates a single part of an identifier (no dots allowed).
pub fn validate_identifier_part(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(TesseraError::configuration("Identifier part cannot be empty"));
    }

    // Normalize to NFKC to prevent Unicode confusables
    let name = name.nfkc().collect::<String>();

    // PostgreSQL limit is 63 bytes per part
    if name.len() > 63 {
        return Err(TesseraError::configuration(format!(
            "Identifier '{}' exceeds maximum length of 63",
            name
        )));
    }

    let first_char = name.chars().next().ok_or_else(|| {
        TesseraError::configuration(format!("Identifier '{}' is empty or invalid", name))
    })?;
    if !first_char.is_ascii_alphabetic() && first_char != '_' {
        return Err(TesseraError::configuration(format!(
            "Identifier '{}' must start with a letter or underscore",
            name
        )));
    }

    for ch in name.chars() {
        if !ch.is_ascii_alphanumeric() && ch != '_' {
            return Err(TesseraError::configuration(format!(
                "Identifier '{}' contains invalid character '{}'",
                name, ch
            )));
        }
    }

    let name_lower = name.to_lowercase();
    if name_lower.starts_with("pg_") || name_lower == "information_schema" {
        return Err(TesseraError::configuration(format!(
            "Access to system catalog '{}' is not allowed",
            name
        )));
    }

    Ok(())
}

/// Rejects raw SQL snippets that could terminate or comment out a statement.
///
/// Model declarations (on-clauses, access rules, computed expressions) are
/// trusted code, but a stray `;` or comment marker breaks every query that
/// embeds them.
pub fn validate_sql_snippet(what: &str, sql: &str) -> Result<()> {
    if sql.trim().is_empty() {
        return Err(TesseraError::configuration(format!("{} cannot be empty", what)));
    }
    if sql.contains(';') || sql.contains("--") || sql.contains("/*") {
        return Err(TesseraError::configuration(format!(
            "{} '{}' must be a single SQL expression",
            what, sql
        )));
    }
    Ok(())
}

/// Adjusts parameter indices in SQL by adding an offset.
///
/// Fragments are written with local `$1..$n` placeholders; this renumbers
/// them when a fragment is appended after `offset` existing parameters.
pub fn adjust_param_indices(sql: &str, offset: usize) -> String {
    if offset == 0 {
        return sql.to_string();
    }

    let mut result = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' {
            result.push(ch);
            continue;
        }

        let mut num_str = String::new();
        while let Some(&next_ch) = chars.peek() {
            if !next_ch.is_ascii_digit() {
                break;
            }
            num_str.push(next_ch);
            chars.next();
        }

        result.push('$');
        match num_str.parse::<usize>() {
            Ok(num) => result.push_str(&(num + offset).to_string()),
            Err(_) => result.push_str(&num_str),
        }
    }

    result
}

/// Replaces every `$1` placeholder with the literal `NULL`.
///
/// Used for access rules of anonymous requests, where a typed NULL
/// parameter would not compare with every key type.
pub fn inline_null_param(sql: &str) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' {
            result.push(ch);
            continue;
        }

        let mut num_str = String::new();
        while let Some(&next_ch) = chars.peek() {
            if !next_ch.is_ascii_digit() {
                break;
            }
            num_str.push(next_ch);
            chars.next();
        }

        if num_str == "1" {
            result.push_str("NULL");
        } else {
            result.push('$');
            result.push_str(&num_str);
        }
    }

    result
}

/// Builds the SQL for an aggregate function.
pub fn build_aggregate_sql(func: &AggregateFunction) -> String {
    match func {
        AggregateFunction::CountColumn(col) => format!("COUNT({})", col.to_sql()),
        AggregateFunction::CountDistinct(col) => format!("COUNT(DISTINCT {})", col.to_sql()),
        AggregateFunction::Sum(col) => format!("SUM({})", col.to_sql()),
        AggregateFunction::Avg(col) => format!("AVG({})", col.to_sql()),
        AggregateFunction::Min(col) => format!("MIN({})", col.to_sql()),
        AggregateFunction::Max(col) => format!("MAX({})", col.to_sql()),
    }
}
