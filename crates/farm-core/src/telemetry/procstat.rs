use super::content_lines;
use crate::error::ParseError;

/// Cumulative per-cpu jiffies from a `cpuN` line of `/proc/stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub processor: u64,
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
}

impl CpuTimes {
    fn busy(&self) -> u128 {
        u128::from(self.user) + u128::from(self.nice) + u128::from(self.system)
    }
}

/// Parse the per-cpu lines of `/proc/stat`. The aggregate `cpu` line and
/// every other line are skipped.
pub fn parse(text: &str) -> Result<Vec<CpuTimes>, ParseError> {
    let mut ret = Vec::new();
    for line in content_lines(text) {
        let Some(processor) = per_cpu_index(line) else {
            continue;
        };
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 5 {
            return Err(ParseError::new("proc stat line", "expected at least 5 fields", line));
        }
        let num = |idx: usize| {
            fields[idx]
                .parse::<u64>()
                .map_err(|_| ParseError::new("proc stat line", format!("bad counter '{}'", fields[idx]), line))
        };
        let times = CpuTimes {
            processor,
            user: num(1)?,
            nice: num(2)?,
            system: num(3)?,
            idle: num(4)?,
        };
        let total = [times.user, times.nice, times.system, times.idle]
            .into_iter()
            .try_fold(0u64, u64::checked_add);
        if total.is_none() {
            return Err(ParseError::new("proc stat line", "counters overflow", line));
        }
        ret.push(times);
    }
    Ok(ret)
}

/// `Some(n)` for lines shaped like `cpu<n> ...`.
fn per_cpu_index(line: &str) -> Option<u64> {
    let rest = line.strip_prefix("cpu")?;
    let digits_end = rest.find(|c: char| !c.is_ascii_digit())?;
    if digits_end == 0 || !rest[digits_end..].starts_with(char::is_whitespace) {
        return None;
    }
    rest[..digits_end].parse().ok()
}

/// Busy share of the interval between two samples of the same processor.
///
/// A zero-length interval reports 0.0.
pub fn cpu_usage(first: &CpuTimes, second: &CpuTimes) -> f64 {
    let busy = second.busy().saturating_sub(first.busy());
    let idle = u128::from(second.idle.saturating_sub(first.idle));
    let total = busy + idle;
    if total == 0 {
        return 0.0;
    }
    (busy as f64 / total as f64).clamp(0.0, 1.0)
}
