//! Human-readable byte sizes for the config file.

use thiserror::Error;

const KB: usize = 1024;
const MB: usize = 1024 * KB;
const GB: usize = 1024 * MB;

/// A size string that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid size '{input}' - expected format like '64MB', '512KB', or '1GB'")]
pub struct SizeParseError {
    pub input: String,
}

/// Parses a size such as `64MB`, `512 kb` or `1048576` into bytes.
///
/// Suffixes `K`/`KB`, `M`/`MB` and `G`/`GB` are accepted in any case.
pub fn parse_size(input: &str) -> Result<usize, SizeParseError> {
    let error = || SizeParseError {
        input: input.to_string(),
    };

    let trimmed = input.trim().to_ascii_uppercase();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, suffix) = trimmed.split_at(split);

    if digits.is_empty() {
        return Err(error());
    }
    let value: usize = digits.parse().map_err(|_| error())?;

    let multiplier = match suffix.trim() {
        "" => 1,
        "K" | "KB" => KB,
        "M" | "MB" => MB,
        "G" | "GB" => GB,
        _ => return Err(error()),
    };

    value.checked_mul(multiplier).ok_or_else(error)
}

/// Formats bytes using the largest suffix that divides them exactly.
pub fn format_size(bytes: usize) -> String {
    if bytes >= GB && bytes % GB == 0 {
        format!("{}GB", bytes / GB)
    } else if bytes >= MB && bytes % MB == 0 {
        format!("{}MB", bytes / MB)
    } else if bytes >= KB && bytes % KB == 0 {
        format!("{}KB", bytes / KB)
    } else {
        bytes.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_suffixes() {
        assert_eq!(parse_size("4096").unwrap(), 4096);
        assert_eq!(parse_size("512KB").unwrap(), 512 * 1024);
        assert_eq!(parse_size("512k").unwrap(), 512 * 1024);
        assert_eq!(parse_size("64MB").unwrap(), 64 * 1024 * 1024);
        assert_eq!(parse_size("64 mb").unwrap(), 64 * 1024 * 1024);
        assert_eq!(parse_size(" 2G ").unwrap(), 2 * 1024 * 1024 * 1024);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_size("").is_err());
        assert!(parse_size("MB").is_err());
        assert!(parse_size("1.5MB").is_err());
        assert!(parse_size("-1KB").is_err());
        assert!(parse_size("10TB").is_err());
    }

    #[test]
    fn test_parse_overflow() {
        let huge = format!("{}GB", usize::MAX);
        assert!(parse_size(&huge).is_err());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(64 * 1024 * 1024), "64MB");
        assert_eq!(format_size(1024 * 1024 * 1024), "1GB");
        assert_eq!(format_size(1536 * 1024), "1536KB");
        assert_eq!(format_size(1000), "1000");
    }

    #[test]
    fn test_format_then_parse_preserves_value() {
        for bytes in [0, 1000, 4096, 3 * 1024 * 1024, 5 * 1024 * 1024 * 1024] {
            assert_eq!(parse_size(&format_size(bytes)).unwrap(), bytes);
        }
    }
}
