use super::{content_lines, to_u64};
use crate::error::ParseError;

/// Totals from a memory cgroup's `memory.stat`, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStat {
    pub rss: u64,
    pub cache: u64,
    /// Absent when the kernel was built without swap accounting
    /// (CONFIG_MEMCG_SWAP_ENABLED).
    pub swap: Option<u64>,
}

pub fn parse(text: &str) -> Result<MemoryStat, ParseError> {
    let mut cache = None;
    let mut rss = None;
    let mut swap = None;

    for line in content_lines(text) {
        let mut words = line.split_whitespace();
        let (Some(key), Some(value)) = (words.next(), words.next()) else {
            continue;
        };
        match key {
            "total_cache" => cache = to_u64(value),
            "total_rss" => rss = to_u64(value),
            "total_swap" => {
                let value = to_u64(value).ok_or_else(|| {
                    ParseError::new("cgroup memory stat", format!("bad total_swap '{}'", value), text)
                })?;
                swap = Some(value);
            }
            _ => {}
        }
    }

    Ok(MemoryStat {
        rss: rss.ok_or_else(|| ParseError::new("cgroup memory stat", "missing total_rss", text))?,
        cache: cache.ok_or_else(|| ParseError::new("cgroup memory stat", "missing total_cache", text))?,
        swap,
    })
}
