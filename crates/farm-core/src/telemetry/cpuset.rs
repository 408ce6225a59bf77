use crate::error::ParseError;
use std::collections::BTreeSet;

/// Largest span a single `start-end` range may cover.
const MAX_RANGE_SPAN: u64 = 2048;

/// Expand a cpuset list such as `0,2-4,7` into cpu indices.
pub fn parse(text: &str) -> Result<BTreeSet<u64>, ParseError> {
    let mut ret = BTreeSet::new();
    for token in text.trim().split(',') {
        let token = token.trim();
        let bad = |reason: &str| ParseError::new("cpuset list", format!("{} in '{}'", reason, token), text);
        match token.split_once('-') {
            None => {
                ret.insert(token.parse::<u64>().map_err(|_| bad("bad cpu index"))?);
            }
            Some((start, end)) => {
                let start: u64 = start.trim().parse().map_err(|_| bad("bad range start"))?;
                let end: u64 = end.trim().parse().map_err(|_| bad("bad range end"))?;
                if start > end {
                    return Err(bad("range start after end"));
                }
                if end - start >= MAX_RANGE_SPAN {
                    return Err(bad("range too wide"));
                }
                ret.extend(start..=end);
            }
        }
    }
    Ok(ret)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixed_list() {
        let cpus = parse("0,2-4,7\n").unwrap();
        assert_eq!(cpus.into_iter().collect::<Vec<_>>(), vec![0, 2, 3, 4, 7]);
    }

    #[test]
    fn test_single_range() {
        assert_eq!(parse("0-3").unwrap().len(), 4);
        assert_eq!(parse("5-5").unwrap().len(), 1);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(parse("").is_err());
        assert!(parse("4-2").is_err());
        assert!(parse("0-2048").is_err());
        assert!(parse("a").is_err());
        assert!(parse("1,,2").is_err());
        assert!(parse("-1").is_err());
    }

    #[test]
    fn test_widest_range_allowed() {
        assert_eq!(parse("0-2047").unwrap().len(), 2048);
    }
}
