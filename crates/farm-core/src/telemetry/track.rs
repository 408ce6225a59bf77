use super::{content_lines, split_leading};
use crate::error::ParseError;

/// One line of the host's tracking file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackEntry {
    /// Percent-encoded task id.
    pub id: String,
    pub boot_time: u64,
    pub directory: String,
}

/// Parse `<id> <boot time> <directory>` lines. The directory is the rest of
/// the line. An empty file is an empty list.
pub fn parse(text: &str) -> Result<Vec<TrackEntry>, ParseError> {
    content_lines(text)
        .map(|line| {
            let (fields, directory) = split_leading("tracking line", line, 2)?;
            let boot_time = fields[1].parse::<u64>().map_err(|_| {
                ParseError::new("tracking line", format!("bad boot time '{}'", fields[1]), line)
            })?;
            Ok(TrackEntry {
                id: fields[0].to_string(),
                boot_time,
                directory: directory.to_string(),
            })
        })
        .collect()
}
