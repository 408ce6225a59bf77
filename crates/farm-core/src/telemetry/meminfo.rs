use super::{content_lines, to_u64};
use crate::error::ParseError;

/// The `/proc/meminfo` fields the executor reports. Values are in
/// kilobytes, exactly as the kernel prints them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemInfo {
    pub mem_total_kb: u64,
    pub mem_available_kb: u64,
    pub swap_total_kb: u64,
    pub swap_free_kb: u64,
}

pub fn parse(text: &str) -> Result<MemInfo, ParseError> {
    let mut mem_total = None;
    let mut mem_available = None;
    let mut swap_total = None;
    let mut swap_free = None;

    for line in content_lines(text) {
        let mut words = line
            .split(|c: char| c == ':' || c.is_whitespace())
            .filter(|w| !w.is_empty());
        let (Some(key), Some(value)) = (words.next(), words.next()) else {
            continue;
        };
        match key {
            "MemTotal" => mem_total = to_u64(value),
            "MemAvailable" => mem_available = to_u64(value),
            "SwapTotal" => swap_total = to_u64(value),
            "SwapFree" => swap_free = to_u64(value),
            _ => {}
        }
    }

    let missing = |key: &str| ParseError::new("meminfo", format!("missing or invalid {}", key), text);
    Ok(MemInfo {
        mem_total_kb: mem_total.ok_or_else(|| missing("MemTotal"))?,
        mem_available_kb: mem_available.ok_or_else(|| missing("MemAvailable"))?,
        swap_total_kb: swap_total.ok_or_else(|| missing("SwapTotal"))?,
        swap_free_kb: swap_free.ok_or_else(|| missing("SwapFree"))?,
    })
}
