//! Human-readable byte sizes for config values ("256MB", "500KB").

use thiserror::Error;

const KB: usize = 1024;
const MB: usize = 1024 * KB;
const GB: usize = 1024 * MB;

/// Error parsing a size string.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid size '{input}': expected a byte count or a number with KB, MB or GB")]
pub struct SizeParseError {
    input: String,
}

/// Parse a size into bytes.
///
/// Accepts a bare byte count or a number followed by `K`/`KB`, `M`/`MB`,
/// `G`/`GB` (binary multiples, case-insensitive, spaces allowed).
///
/// ```
/// use texfetch::config::parse_size;
///
/// assert_eq!(parse_size("600").unwrap(), 600);
/// assert_eq!(parse_size("500KB").unwrap(), 500 * 1024);
/// assert_eq!(parse_size("2 gb").unwrap(), 2 * 1024 * 1024 * 1024);
/// ```
pub fn parse_size(s: &str) -> Result<usize, SizeParseError> {
    let error = || SizeParseError {
        input: s.to_string(),
    };

    let trimmed = s.trim();
    let upper = trimmed.to_ascii_uppercase();
    let upper = upper.strip_suffix('B').unwrap_or(&upper);

    let (digits, multiplier) = match upper.chars().last() {
        Some('K') => (&upper[..upper.len() - 1], KB),
        Some('M') => (&upper[..upper.len() - 1], MB),
        Some('G') => (&upper[..upper.len() - 1], GB),
        Some(_) => (upper, 1),
        None => return Err(error()),
    };

    let count: usize = digits.trim().parse().map_err(|_| error())?;
    count.checked_mul(multiplier).ok_or_else(error)
}

/// Format bytes with the largest unit that divides them evenly.
///
/// ```
/// use texfetch::config::format_size;
///
/// assert_eq!(format_size(256 * 1024 * 1024), "256MB");
/// assert_eq!(format_size(1500), "1500");
/// ```
pub fn format_size(bytes: usize) -> String {
    match bytes {
        0 => "0".to_string(),
        b if b % GB == 0 => format!("{}GB", b / GB),
        b if b % MB == 0 => format!("{}MB", b / MB),
        b if b % KB == 0 => format!("{}KB", b / KB),
        b => b.to_string(),
    }
}
