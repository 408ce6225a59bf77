use crate::error::ValidationError;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Boot timestamp of a host, in seconds since the epoch.
///
/// An executor is bound to exactly one boot of its host. Any later operation
/// that sees a different boot time fails with a reboot error.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BootTime(pub u64);

impl BootTime {
    pub fn as_secs(&self) -> u64 {
        self.0
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        let secs = i64::try_from(self.0).ok()?;
        Utc.timestamp_opt(secs, 0).single()
    }
}

impl fmt::Display for BootTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Mount {
    pub target: String,
    pub used: u64,
    pub available: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Processor {
    physical_id: u64,
    core_id: u64,
    processor_id: u64,
    model: String,
    flags: BTreeSet<String>,
    usage: f64,
}

impl Processor {
    pub fn new(
        physical_id: u64,
        core_id: u64,
        processor_id: u64,
        model: String,
        flags: BTreeSet<String>,
        usage: f64,
    ) -> Result<Self, ValidationError> {
        if !(0.0..=1.0).contains(&usage) {
            return Err(ValidationError::Argument(format!(
                "processor {} usage {} outside [0, 1]",
                processor_id, usage
            )));
        }
        Ok(Self {
            physical_id,
            core_id,
            processor_id,
            model,
            flags,
            usage,
        })
    }

    pub fn physical_id(&self) -> u64 {
        self.physical_id
    }

    pub fn core_id(&self) -> u64 {
        self.core_id
    }

    pub fn processor_id(&self) -> u64 {
        self.processor_id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn flags(&self) -> &BTreeSet<String> {
        &self.flags
    }

    pub fn usage(&self) -> f64 {
        self.usage
    }
}

/// Host-wide memory, in bytes.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct GlobalMemory {
    pub mem_total: u64,
    pub mem_free: u64,
    pub swap_total: u64,
    pub swap_free: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HostCheckResult {
    system: String,
    swap_enabled: bool,
    mounts: Vec<Mount>,
    processors: Vec<Processor>,
    memory: GlobalMemory,
    tasks: Vec<String>,
}

impl HostCheckResult {
    /// `tasks` must hold distinct, non-empty ids.
    pub fn new(
        system: String,
        swap_enabled: bool,
        mounts: Vec<Mount>,
        processors: Vec<Processor>,
        memory: GlobalMemory,
        tasks: Vec<String>,
    ) -> Result<Self, ValidationError> {
        let mut seen = BTreeSet::new();
        for id in &tasks {
            if id.is_empty() {
                return Err(ValidationError::TaskId("tracked task id is empty".into()));
            }
            if !seen.insert(id.as_str()) {
                return Err(ValidationError::TaskId(format!("tracked task '{}' listed twice", id)));
            }
        }
        Ok(Self {
            system,
            swap_enabled,
            mounts,
            processors,
            memory,
            tasks,
        })
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    pub fn swap_enabled(&self) -> bool {
        self.swap_enabled
    }

    pub fn mounts(&self) -> &[Mount] {
        &self.mounts
    }

    pub fn processors(&self) -> &[Processor] {
        &self.processors
    }

    pub fn memory(&self) -> &GlobalMemory {
        &self.memory
    }

    pub fn tasks(&self) -> &[String] {
        &self.tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> GlobalMemory {
        GlobalMemory {
            mem_total: 1,
            mem_free: 1,
            swap_total: 0,
            swap_free: 0,
        }
    }

    #[test]
    fn test_tracked_tasks_must_be_distinct_and_non_empty() {
        let ok = HostCheckResult::new("Linux".into(), false, vec![], vec![], memory(), vec!["a".into(), "b".into()]);
        assert!(ok.is_ok());
        let dup = HostCheckResult::new("Linux".into(), false, vec![], vec![], memory(), vec!["a".into(), "a".into()]);
        assert!(dup.is_err());
        let empty = HostCheckResult::new("Linux".into(), false, vec![], vec![], memory(), vec![String::new()]);
        assert!(empty.is_err());
    }

    #[test]
    fn test_processor_usage_range() {
        assert!(Processor::new(0, 0, 0, "x".into(), BTreeSet::new(), 1.0).is_ok());
        assert!(Processor::new(0, 0, 0, "x".into(), BTreeSet::new(), 1.5).is_err());
        assert!(Processor::new(0, 0, 0, "x".into(), BTreeSet::new(), f64::NAN).is_err());
    }

    #[test]
    fn test_boot_time_as_datetime() {
        let bt = BootTime(1_700_000_000);
        assert_eq!(bt.as_datetime().unwrap().timestamp(), 1_700_000_000);
    }
}
