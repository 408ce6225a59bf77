//! Framed text returned by a single remote invocation.
//!
//! A blob is a sequence of records:
//!
//! ```text
//! !KEY          marker line, the whole line (with the '!') is the key
//! N             number of value lines that follow
//! line 1        N lines, joined with '\n'
//! ...
//! ```
//!
//! Values may contain blank lines or anything else; the count delimits them.

use crate::error::ParseError;
use std::collections::HashMap;

const WHAT: &str = "framed output";

/// Decoded key/value records. Keys keep their leading `!`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frames {
    values: HashMap<String, String>,
}

impl Frames {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Like [`get`](Self::get), but a missing key is a parse error.
    pub fn require(&self, key: &str) -> Result<&str, ParseError> {
        self.get(key)
            .ok_or_else(|| ParseError::new(WHAT, format!("missing {}", key), ""))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_map(self) -> HashMap<String, String> {
        self.values
    }
}

pub fn decode(text: &str) -> Result<Frames, ParseError> {
    let mut lines: Vec<&str> = text.split('\n').collect();
    // A terminating newline is not an extra empty line.
    if text.ends_with('\n') {
        lines.pop();
    }
    if text.is_empty() {
        lines.clear();
    }

    let mut values = HashMap::new();
    let mut idx = 0;
    while idx < lines.len() {
        let marker = lines[idx];
        if !marker.starts_with('!') {
            return Err(ParseError::new(WHAT, format!("expected marker at line {}", idx + 1), text));
        }
        let count_line = lines
            .get(idx + 1)
            .ok_or_else(|| ParseError::new(WHAT, format!("missing line count for {}", marker), text))?;
        let count: usize = count_line.trim().parse().map_err(|_| {
            ParseError::new(WHAT, format!("bad line count '{}' for {}", count_line, marker), text)
        })?;
        let start = idx + 2;
        let end = start
            .checked_add(count)
            .filter(|end| *end <= lines.len())
            .ok_or_else(|| ParseError::new(WHAT, format!("{} promises {} lines", marker, count), text))?;
        let value = lines[start..end].join("\n");
        if values.insert(marker.to_string(), value).is_some() {
            return Err(ParseError::new(WHAT, format!("duplicate entry {}", marker), text));
        }
        idx = end;
    }
    Ok(Frames { values })
}

/// Encode one record. `key` must start with `!` and hold no newline.
pub fn encode_record(out: &mut String, key: &str, value: &str) {
    debug_assert!(key.starts_with('!') && !key.contains('\n'));
    let count = if value.is_empty() { 0 } else { value.split('\n').count() };
    out.push_str(key);
    out.push('\n');
    out.push_str(&count.to_string());
    out.push('\n');
    if count > 0 {
        out.push_str(value);
        out.push('\n');
    }
}

pub fn encode<'a>(records: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let mut out = String::new();
    for (key, value) in records {
        encode_record(&mut out, key, value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode() {
        let frames = decode("!A\n3\nline1\nline1 2\nline1 2 3\n!OUTPUT 2\n2\naaa\nbb").unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames.get("!A"), Some("line1\nline1 2\nline1 2 3"));
        assert_eq!(frames.get("!OUTPUT 2"), Some("aaa\nbb"));
    }

    #[test]
    fn test_decode_empty() {
        assert!(decode("").unwrap().is_empty());
    }

    #[test]
    fn test_decode_zero_line_value() {
        let frames = decode("!PIDS\n0\n!STATE\n1\nCREATED\n").unwrap();
        assert_eq!(frames.get("!PIDS"), Some(""));
        assert_eq!(frames.get("!STATE"), Some("CREATED"));
    }

    #[test]
    fn test_short_value_fails() {
        assert!(decode("!A\n4\nline1\nline1 2\nline1 2 3").is_err());
    }

    #[test]
    fn test_missing_count_fails() {
        assert!(decode("!A").is_err());
        assert!(decode("!A\nthree\na\nb\nc").is_err());
    }

    #[test]
    fn test_stray_line_fails() {
        assert!(decode("garbage\n!A\n0").is_err());
    }

    #[test]
    fn test_duplicate_key_fails() {
        let err = decode("!A\n1\nx\n!A\n1\ny\n").unwrap_err();
        assert!(err.reason.contains("duplicate"));
    }

    #[test]
    fn test_round_trip_with_blank_lines() {
        let values = [
            ("!KERNEL_CONFIGS", "CONFIG_A=y\n\n# comment\n\nCONFIG_B=m"),
            ("!EMPTY", ""),
            ("!NEWLINE", "\n"),
            ("!LOOKS_LIKE_MARKER", "!NOT_A_KEY\n2"),
        ];
        let blob = encode(values.iter().copied());
        let decoded = decode(&blob).unwrap().into_map();
        assert_eq!(decoded.len(), values.len());
        for (key, value) in values {
            assert_eq!(decoded.get(key).map(String::as_str), Some(value), "{}", key);
        }
    }

    #[test]
    fn test_require() {
        let frames = decode("!A\n1\nx").unwrap();
        assert_eq!(frames.require("!A").unwrap(), "x");
        assert!(frames.require("!B").is_err());
    }
}
