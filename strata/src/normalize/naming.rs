//! Naming convention applied to every table and column the unpacker emits.
//!
//! Identifiers are converted to snake case and restricted to ASCII letters,
//! digits and underscores. Nested paths are joined with a double underscore,
//! so column names collapse runs of underscores to a single one to keep them
//! from being mistaken for path separators.

use crate::error::{ErrorKind, StrataResult};
use crate::bail;

/// Separator between path segments in derived table and column names.
pub const PATH_SEPARATOR: &str = "__";

/// Normalizes `name` into a valid table identifier.
///
/// Non-alphanumeric characters become underscores, camel case becomes snake
/// case, leading digits are escaped with an underscore and runs of three or
/// more underscores collapse to two.
pub fn normalize_table_name(name: &str) -> StrataResult<String> {
    if name.is_empty() {
        bail!(ErrorKind::InvalidData, "Table names cannot be empty");
    }

    let sanitized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    let mut snake = camel_to_snake(&sanitized);
    if snake.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        snake.insert(0, '_');
    }

    Ok(collapse_underscores(&snake, 2))
}

/// Normalizes `name` into a valid column identifier.
///
/// Same as [`normalize_table_name`] but all underscore runs collapse to a
/// single underscore, so a column can never contain [`PATH_SEPARATOR`].
pub fn normalize_column_name(name: &str) -> StrataResult<String> {
    Ok(collapse_underscores(&normalize_table_name(name)?, 1))
}

/// Joins normalized path segments into a derived name.
pub fn make_path(elems: &[&str]) -> String {
    elems.join(PATH_SEPARATOR)
}

/// Splits a derived name back into its path segments.
pub fn break_path(path: &str) -> Vec<&str> {
    path.split(PATH_SEPARATOR).collect()
}

fn camel_to_snake(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_ascii_lowercase());
            if prev.is_ascii_lowercase() || prev.is_ascii_digit() || (next_is_lower && prev != '_')
            {
                out.push('_');
            }
        }
        out.push(c.to_ascii_lowercase());
    }
    out
}

fn collapse_underscores(name: &str, max_run: usize) -> String {
    let mut out = String::with_capacity(name.len());
    let mut run = 0;
    for c in name.chars() {
        if c == '_' {
            run += 1;
            if run <= max_run {
                out.push(c);
            }
        } else {
            run = 0;
            out.push(c);
        }
    }
    out
}
