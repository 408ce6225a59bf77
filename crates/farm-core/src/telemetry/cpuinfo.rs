use super::to_u64;
use crate::error::ParseError;
use std::collections::BTreeSet;

/// One processor block of `/proc/cpuinfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuInfoEntry {
    pub physical_id: u64,
    pub core_id: u64,
    pub processor: u64,
    pub model: String,
    pub flags: BTreeSet<String>,
}

/// Parse `/proc/cpuinfo`: blocks separated by blank lines, `key : value`
/// lines inside each block.
pub fn parse(text: &str) -> Result<Vec<CpuInfoEntry>, ParseError> {
    text.split("\n\n")
        .filter(|block| !block.trim().is_empty())
        .map(parse_block)
        .collect()
}

fn parse_block(block: &str) -> Result<CpuInfoEntry, ParseError> {
    let mut physical_id = None;
    let mut core_id = None;
    let mut processor = None;
    let mut model = None;
    let mut flags = None;

    for line in block.lines() {
        let Some((key, val)) = line.split_once(':') else {
            continue;
        };
        let val = val.trim();
        match key.trim() {
            "physical id" => physical_id = to_u64(val),
            "core id" => core_id = to_u64(val),
            "processor" => processor = to_u64(val),
            "model name" => model = Some(val.to_string()),
            "flags" => flags = Some(val.split_whitespace().map(str::to_string).collect()),
            _ => {}
        }
    }

    let missing = |key: &str| ParseError::new("cpuinfo block", format!("missing or invalid '{}'", key), block);
    Ok(CpuInfoEntry {
        physical_id: physical_id.ok_or_else(|| missing("physical id"))?,
        core_id: core_id.ok_or_else(|| missing("core id"))?,
        processor: processor.ok_or_else(|| missing("processor"))?,
        model: model.unwrap_or_default(),
        flags: flags.unwrap_or_default(),
    })
}
