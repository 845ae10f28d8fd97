//! Line grammar of settings documents
//!
//! ```text
//! # comment
//! MCU=atmega16
//! summary=first line\nsecond line
//! CKSEL=0x0F
//! ```

use core::ops::Range;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::descriptor::FuseType;
use crate::values::ByteValues;

/// Key naming the MCU
pub const MCU_KEY: &str = "MCU";

/// Key holding the free-text comment
pub const SUMMARY_KEY: &str = "summary";

static PROPERTY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(\w+)\s*=(.*)$").unwrap());
static COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*#.*$").unwrap());

/// Classification of one line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line<'a> {
    /// Empty or whitespace only
    Blank,
    /// `# ...`
    Comment,
    /// `KEY=VALUE`; ranges are relative to the line start
    Property {
        /// Key text
        key: &'a str,
        /// Key position
        key_range: Range<usize>,
        /// Value with surrounding whitespace removed
        value: &'a str,
        /// Value position, empty right after `=` when there is no value
        value_range: Range<usize>,
    },
    /// Anything else
    Garbage,
}

/// Classify a line (without terminator)
pub fn classify(line: &str) -> Line<'_> {
    if line.trim().is_empty() {
        return Line::Blank;
    }
    if COMMENT.is_match(line) {
        return Line::Comment;
    }
    let Some(caps) = PROPERTY.captures(line) else {
        return Line::Garbage;
    };
    let (Some(key), Some(raw)) = (caps.get(1), caps.get(2)) else {
        return Line::Garbage;
    };

    let raw_text = raw.as_str();
    let value = raw_text.trim();
    let value_range = if value.is_empty() {
        raw.start()..raw.start()
    } else {
        let lead = raw_text.len() - raw_text.trim_start().len();
        let start = raw.start() + lead;
        start..start + value.len()
    };

    Line::Property {
        key: key.as_str(),
        key_range: key.range(),
        value,
        value_range,
    }
}

/// Parse a decimal, `0x` hexadecimal or `0`-prefixed octal literal
pub fn parse_int_literal(text: &str) -> Option<i64> {
    let text = text.trim();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };

    // from_str_radix accepts a sign of its own, which must not follow ours
    if !digits.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return None;
    }

    let magnitude = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        i64::from_str_radix(hex, 16).ok()?
    } else if digits.len() > 1 && digits.starts_with('0') {
        i64::from_str_radix(&digits[1..], 8).ok()?
    } else {
        digits.parse::<i64>().ok()?
    };

    Some(if negative { -magnitude } else { magnitude })
}

/// Escape a comment for the `summary` line
///
/// Backslashes are doubled and newlines become `\n`. Values are trimmed
/// when a document is parsed, so leading and trailing whitespace of a
/// comment does not survive a round trip.
pub fn escape_summary(comment: &str) -> String {
    comment
        .replace("\r\n", "\n")
        .replace('\\', "\\\\")
        .replace('\n', "\\n")
}

/// Undo [`escape_summary`]
///
/// Unknown escapes and a trailing lone backslash are kept as written.
pub fn unescape_summary(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Format a bitfield value the way documents store it
pub fn format_value(value: i16) -> String {
    format!("0x{:02X}", value)
}

/// Render a complete document for a model
///
/// Only bitfields whose byte is set are written, in catalog order. Bits
/// that no bitfield covers are not written, so they read back as 0.
pub fn render(model: &ByteValues) -> String {
    let descriptor = model.descriptor();
    let what = match model.fuse_type() {
        FuseType::Fuse => "Fuse",
        FuseType::Lockbits => "Lock bit",
    };

    let mut out = format!("# {} settings for {}\n", what, descriptor.name);
    out.push_str(&format!("{}={}\n", MCU_KEY, descriptor.mcu_id));
    if !model.comment().is_empty() {
        out.push_str(&format!("{}={}\n", SUMMARY_KEY, escape_summary(model.comment())));
    }
    for name in model.bitfield_names() {
        match model.get_named_value(name) {
            Ok(value) if value >= 0 => {
                out.push_str(&format!("{}={}\n", name, format_value(value)));
            }
            _ => {}
        }
    }
    out
}
