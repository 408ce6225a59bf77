use super::{content_lines, split_leading, to_u64};
use crate::error::ParseError;

/// One row of `df --output=used,avail,fstype,target -B1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DfEntry {
    /// `None` when df printed a placeholder such as `-`.
    pub used: Option<u64>,
    pub available: Option<u64>,
    pub fs_type: String,
    pub target: String,
}

/// Parse a df table. The first line is a header and is discarded.
pub fn parse(text: &str) -> Result<Vec<DfEntry>, ParseError> {
    content_lines(text)
        .skip(1)
        .map(|line| {
            let (fields, target) = split_leading("df output", line, 3)?;
            Ok(DfEntry {
                used: to_u64(fields[0]),
                available: to_u64(fields[1]),
                fs_type: fields[2].to_string(),
                target: target.to_string(),
            })
        })
        .collect()
}
