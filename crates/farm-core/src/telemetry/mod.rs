//! Parsers for raw host dumps: `/proc` files, `df` tables, cgroup files and
//! the task tracking file.
//!
//! Every parser fails fast. Malformed input yields a [`ParseError`] carrying
//! the offending text, never a partial result.

pub mod cpuinfo;
pub mod cpuset;
pub mod df;
pub mod kernel_config;
pub mod meminfo;
pub mod memory_stat;
pub mod procstat;
pub mod track;

use crate::error::ParseError;

/// Lenient integer read: `None` when the token is not a non-negative integer.
pub(crate) fn to_u64(token: &str) -> Option<u64> {
    token.trim().parse().ok()
}

/// Non-blank lines of `text`, runs of newlines collapsed.
pub(crate) fn content_lines(text: &str) -> impl Iterator<Item = &str> {
    text.split('\n').filter(|line| !line.trim().is_empty())
}

/// Split `line` into `n` leading whitespace-separated fields plus the
/// remainder, which may itself contain whitespace.
pub(crate) fn split_leading<'a>(
    what: &'static str,
    line: &'a str,
    n: usize,
) -> Result<(Vec<&'a str>, &'a str), ParseError> {
    let mut rest = line.trim();
    let mut fields = Vec::with_capacity(n);
    for _ in 0..n {
        let end = rest
            .find(char::is_whitespace)
            .ok_or_else(|| ParseError::new(what, format!("expected more than {} fields", n), line))?;
        fields.push(&rest[..end]);
        rest = rest[end..].trim_start();
    }
    if rest.is_empty() {
        return Err(ParseError::new(what, "missing trailing field", line));
    }
    Ok((fields, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_leading_keeps_remainder() {
        let (fields, rest) = split_leading("x", "  1   2  ext4   /mnt/with space ", 3).unwrap();
        assert_eq!(fields, vec!["1", "2", "ext4"]);
        assert_eq!(rest, "/mnt/with space");
    }

    #[test]
    fn test_split_leading_rejects_short_lines() {
        assert!(split_leading("x", "1 2 ext4", 3).is_err());
        assert!(split_leading("x", "1 2", 3).is_err());
    }
}
