//! Byte quantity formatting and parsing for the command line.

use crate::error::{MfsError, Result};

/// Unit family for [`format_bytes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    /// Powers of 1024: `B`, `KiB`, `MiB`, ...
    Binary,
    /// Powers of 1000: `bit`, `kbit`, `Mbit`, ...
    Decimal,
}

const BINARY_SUFFIXES: [&str; 9] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB", "ZiB", "YiB"];
const DECIMAL_SUFFIXES: [&str; 9] = [
    "bit", "kbit", "Mbit", "Gbit", "Tbit", "Pbit", "Ebit", "Zbit", "Ybit",
];

/// Format `value` with two decimals in the largest unit that keeps it below
/// the base. Values beyond the last unit yield `"NotSupported"`.
pub fn format_bytes(value: f64, unit: Unit) -> String {
    let (base, suffixes) = match unit {
        Unit::Binary => (1024.0, &BINARY_SUFFIXES),
        Unit::Decimal => (1000.0, &DECIMAL_SUFFIXES),
    };

    let mut value = value;
    for suffix in suffixes.iter() {
        if value < base {
            return format!("{:.2} {}", value, suffix);
        }
        value /= base;
    }
    "NotSupported".to_string()
}

/// Parse a byte quantity such as `512`, `2.45M` or `1Ti`.
///
/// A suffix from `BKMGTPEZY` scales by powers of 1000; following it with `i`
/// scales by powers of 1024 instead. Matching is case-insensitive and the
/// result is truncated to whole bytes.
pub fn parse_bytes(input: &str) -> Result<u64> {
    const SUFFIXES: &str = "BKMGTPEZY";

    let normalized = input.trim().to_ascii_uppercase();
    let digits = normalized
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(normalized.len());
    let invalid = || MfsError::InvalidArgument(format!("unrecognized byte quantity {:?}", input));

    let number: f64 = normalized[..digits].parse().map_err(|_| invalid())?;
    let suffix = &normalized.as_bytes()[digits..];

    let (index, base) = match suffix {
        [] => return Ok(number as u64),
        [unit] => (SUFFIXES.find(char::from(*unit)), 1000f64),
        [unit, b'I'] => (SUFFIXES.find(char::from(*unit)), 1024f64),
        _ => (None, 0f64),
    };
    let index = index.ok_or_else(invalid)?;

    Ok((number * base.powi(index as i32)) as u64)
}

/// Render the master's scaled directory size encoding.
///
/// Directory lengths arrive as `k * 1_000_000 + hundredths`, where `k`
/// selects the unit from bytes up to EiB.
pub fn format_dir_size(size: u64) -> String {
    const UNITS: [&str; 7] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];

    let scale = (size / 1_000_000).min(6);
    let value = size - scale * 1_000_000;
    format!("{:.2} {}", value as f64 / 100.0, UNITS[scale as usize])
}
