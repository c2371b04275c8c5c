//! Key and value rules shared by the layer format and the shell filters

use crate::error::{Error, Result};

/// Characters that may never appear in a key.
const INVALID_KEY_CHARS: &[char] = &[
    '!', '"', '§', '$', '%', '&', '(', ')', '[', ']', '{', '}', '=', '?', '`', '+', '#', '\'',
    ',', ';', '<', '>', '\\',
];

const UMLAUTS: &[char] = &['Ä', 'ä', 'Ö', 'ö', 'Ü', 'ü', 'ß'];

const TRUE_WORDS: &[&str] = &["yes", "true", "1", "enable", "enabled", "on"];
const FALSE_WORDS: &[&str] = &["no", "false", "0", "disable", "disabled", "off"];

/// Check that `key` can be stored in a layer file and used in assignments.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::invalid_key(key, "key is empty"));
    }
    if key.trim() != key {
        return Err(Error::invalid_key(key, "leading or trailing whitespace"));
    }
    if let Some(c) = key.chars().find(|c| c.is_control()) {
        return Err(Error::invalid_key(key, format!("control character {c:?}")));
    }
    if let Some(c) = key.chars().find(|c| INVALID_KEY_CHARS.contains(c)) {
        return Err(Error::invalid_key(key, format!("invalid character {c:?}")));
    }
    if let Some(c) = key.chars().find(|c| UMLAUTS.contains(c)) {
        return Err(Error::invalid_key(key, format!("umlaut {c:?}")));
    }
    // Would be ambiguous with the `key: value` separator.
    if key.contains(": ") || key.ends_with(':') {
        return Err(Error::invalid_key(key, "contains the ': ' separator"));
    }
    Ok(())
}

/// Values are stored one per line.
pub fn validate_value(key: &str, value: &str) -> Result<()> {
    if value.contains(['\r', '\n']) {
        return Err(Error::InvalidValue {
            key: key.to_string(),
            reason: "line breaks are not allowed".into(),
        });
    }
    Ok(())
}

/// Turn a key into a valid shell variable name.
///
/// Every character outside `[A-Za-z0-9_]` becomes `_`, and a leading digit is
/// prefixed with `_`.
pub fn shell_escape_key(key: &str) -> String {
    let mut escaped = String::with_capacity(key.len() + 1);
    if key.starts_with(|c: char| c.is_ascii_digit()) {
        escaped.push('_');
    }
    escaped.extend(key.chars().map(|c| {
        if c.is_ascii_alphanumeric() || c == '_' {
            c
        } else {
            '_'
        }
    }));
    escaped
}

/// Quote a value for POSIX shells.
///
/// Values made only of characters with no special meaning are left as they
/// are; everything else is wrapped in single quotes.
pub fn shell_quote(value: &str) -> String {
    if value.is_empty() {
        return "''".to_string();
    }
    let safe = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "@%_+=:,./-".contains(c));
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r#"'"'"'"#))
    }
}

pub fn is_true_value(value: &str) -> bool {
    let lower = value.to_lowercase();
    TRUE_WORDS.contains(&lower.as_str())
}

pub fn is_false_value(value: &str) -> bool {
    let lower = value.to_lowercase();
    FALSE_WORDS.contains(&lower.as_str())
}
