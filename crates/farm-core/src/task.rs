use crate::error::ValidationError;
use crate::host::Mount;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Length of one CFS scheduling period. One period is one whole CPU.
pub const CFS_PERIOD: u64 = 100_000;

/// Check a remote absolute path: no trailing `/`, no `/../` or `/./`, no NUL.
pub fn validate_path(path: &str) -> Result<(), ValidationError> {
    let reject = |reason| {
        Err(ValidationError::Path {
            path: path.to_string(),
            reason,
        })
    };
    if path.trim().is_empty() {
        return reject("must not be blank");
    }
    if !path.starts_with('/') {
        return reject("must be absolute");
    }
    if path.ends_with('/') {
        return reject("must not end with /");
    }
    if path.contains("/../") {
        return reject("must not traverse up");
    }
    if path.contains("/./") {
        return reject("must not self-reference");
    }
    if path.contains('\0') {
        return reject("must not contain NUL");
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ValidationError::TaskId("must not be blank".into()));
        }
        Ok(Self(id))
    }

    /// Recover an id from its percent-encoded wire form.
    pub fn decode(encoded: &str) -> Result<Self, ValidationError> {
        let decoded = urlencoding::decode(encoded)
            .map_err(|e| ValidationError::TaskId(format!("'{}': {}", encoded, e)))?;
        Self::new(decoded.into_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Percent-encoded form used in script arguments and the tracking file.
    /// Never contains whitespace.
    pub fn encoded(&self) -> String {
        urlencoding::encode(&self.0).into_owned()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Created,
    Allocated,
    Started,
}

impl TaskState {
    /// Parse the state marker written by the host scripts.
    pub fn from_marker(s: &str) -> Option<Self> {
        match s.trim() {
            "CREATED" => Some(TaskState::Created),
            "ALLOCATED" => Some(TaskState::Allocated),
            "STARTED" => Some(TaskState::Started),
            _ => None,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Created => write!(f, "CREATED"),
            TaskState::Allocated => write!(f, "ALLOCATED"),
            TaskState::Started => write!(f, "STARTED"),
        }
    }
}

/// What to run, as whom, and where. Immutable once built.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TaskConfiguration {
    work_path: String,
    user: String,
    command: Vec<String>,
}

impl TaskConfiguration {
    pub fn new(
        work_path: impl Into<String>,
        user: impl Into<String>,
        command: Vec<String>,
    ) -> Result<Self, ValidationError> {
        let work_path = work_path.into();
        let user = user.into();
        validate_path(&work_path)?;
        if user.trim().is_empty() {
            return Err(ValidationError::Configuration("user must not be blank".into()));
        }
        match command.first() {
            None => return Err(ValidationError::Configuration("command must not be empty".into())),
            Some(program) if program.is_empty() => {
                return Err(ValidationError::Configuration(
                    "command program must not be empty".into(),
                ))
            }
            Some(_) => {}
        }
        Ok(Self {
            work_path,
            user,
            command,
        })
    }

    pub fn work_path(&self) -> &str {
        &self.work_path
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }
}

/// cgroup-style resource bounds for an allocated task.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TaskResourceAllocation {
    cpu_affinity: BTreeSet<u64>,
    scheduler_slice: u64,
    memory_limit: u64,
    disk_limit: u64,
}

impl TaskResourceAllocation {
    /// `scheduler_slice` is in CFS units and must lie in
    /// `1..=cpu_affinity.len() * CFS_PERIOD`.
    pub fn new(
        cpu_affinity: BTreeSet<u64>,
        scheduler_slice: u64,
        memory_limit: u64,
        disk_limit: u64,
    ) -> Result<Self, ValidationError> {
        if cpu_affinity.is_empty() {
            return Err(ValidationError::Allocation("cpu affinity must not be empty".into()));
        }
        if scheduler_slice == 0 {
            return Err(ValidationError::Allocation("scheduler slice must be positive".into()));
        }
        let max_slice = u64::try_from(cpu_affinity.len())
            .ok()
            .and_then(|n| n.checked_mul(CFS_PERIOD))
            .ok_or_else(|| ValidationError::Allocation("scheduler slice bound overflows".into()))?;
        if scheduler_slice > max_slice {
            return Err(ValidationError::Allocation(format!(
                "scheduler slice {} exceeds {} for {} cpu(s)",
                scheduler_slice,
                max_slice,
                cpu_affinity.len()
            )));
        }
        Ok(Self {
            cpu_affinity,
            scheduler_slice,
            memory_limit,
            disk_limit,
        })
    }

    pub fn cpu_affinity(&self) -> &BTreeSet<u64> {
        &self.cpu_affinity
    }

    pub fn scheduler_slice(&self) -> u64 {
        self.scheduler_slice
    }

    pub fn memory_limit(&self) -> u64 {
        self.memory_limit
    }

    pub fn disk_limit(&self) -> u64 {
        self.disk_limit
    }

    /// Comma separated cpu list, the form cpuset.cpus accepts.
    pub fn cpu_list(&self) -> String {
        self.cpu_affinity
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Memory charged to a task's cgroup, in bytes.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct TaskMemory {
    pub rss: u64,
    pub cache: u64,
    pub swap: u64,
}

/// Snapshot of one task, re-derived from the host on every check.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TaskCheckResult {
    state: TaskState,
    configuration: TaskConfiguration,
    resource_allocation: Option<TaskResourceAllocation>,
    session_id: Option<u32>,
    pids: Option<BTreeSet<u32>>,
    exit_code: Option<i32>,
    disk: Option<Mount>,
    memory: Option<TaskMemory>,
}

impl TaskCheckResult {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: TaskState,
        configuration: TaskConfiguration,
        resource_allocation: Option<TaskResourceAllocation>,
        session_id: Option<u32>,
        pids: Option<BTreeSet<u32>>,
        exit_code: Option<i32>,
        disk: Option<Mount>,
        memory: Option<TaskMemory>,
    ) -> Result<Self, ValidationError> {
        if (state == TaskState::Created) != resource_allocation.is_none() {
            return Err(ValidationError::Allocation(format!(
                "task in state {} {} a resource allocation",
                state,
                if resource_allocation.is_some() { "must not have" } else { "requires" }
            )));
        }
        Ok(Self {
            state,
            configuration,
            resource_allocation,
            session_id,
            pids,
            exit_code,
            disk,
            memory,
        })
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn configuration(&self) -> &TaskConfiguration {
        &self.configuration
    }

    pub fn resource_allocation(&self) -> Option<&TaskResourceAllocation> {
        self.resource_allocation.as_ref()
    }

    pub fn session_id(&self) -> Option<u32> {
        self.session_id
    }

    pub fn pids(&self) -> Option<&BTreeSet<u32>> {
        self.pids.as_ref()
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn disk(&self) -> Option<&Mount> {
        self.disk.as_ref()
    }

    pub fn memory(&self) -> Option<&TaskMemory> {
        self.memory.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpus(ids: &[u64]) -> BTreeSet<u64> {
        ids.iter().copied().collect()
    }

    #[test]
    fn test_validate_path() {
        assert!(validate_path("/a/b").is_ok());
        assert!(validate_path("/").is_err());
        assert!(validate_path("/a/../b").is_err());
        assert!(validate_path("/a/./b").is_err());
        assert!(validate_path("a/b").is_err());
        assert!(validate_path("/a/b/").is_err());
        assert!(validate_path("/a/\0b").is_err());
        assert!(validate_path("").is_err());
    }

    #[test]
    fn test_allocation_slice_bound() {
        assert!(TaskResourceAllocation::new(cpus(&[0]), 1, 0, 0).is_ok());
        assert!(TaskResourceAllocation::new(cpus(&[0]), CFS_PERIOD, 0, 0).is_ok());
        assert!(TaskResourceAllocation::new(cpus(&[0]), CFS_PERIOD + 1, 0, 0).is_err());
        assert!(TaskResourceAllocation::new(cpus(&[0, 3, 5]), 3 * CFS_PERIOD, 0, 0).is_ok());
        assert!(TaskResourceAllocation::new(cpus(&[0, 3, 5]), 3 * CFS_PERIOD + 1, 0, 0).is_err());
    }

    #[test]
    fn test_allocation_rejects_empty_and_zero() {
        assert!(TaskResourceAllocation::new(BTreeSet::new(), 1, 0, 0).is_err());
        assert!(TaskResourceAllocation::new(cpus(&[1]), 0, 0, 0).is_err());
    }

    #[test]
    fn test_cpu_list_is_sorted() {
        let res = TaskResourceAllocation::new(cpus(&[7, 2, 0]), 1000, 0, 0).unwrap();
        assert_eq!(res.cpu_list(), "0,2,7");
    }

    #[test]
    fn test_configuration_rules() {
        let cmd = vec!["blender".to_string(), "-b".to_string()];
        assert!(TaskConfiguration::new("/work/job1", "render", cmd.clone()).is_ok());
        assert!(TaskConfiguration::new("/work/job1/", "render", cmd.clone()).is_err());
        assert!(TaskConfiguration::new("/work/job1", " ", cmd).is_err());
        assert!(TaskConfiguration::new("/work/job1", "render", vec![]).is_err());
        assert!(TaskConfiguration::new("/work/job1", "render", vec![String::new()]).is_err());
    }

    #[test]
    fn test_task_id_encoding_has_no_whitespace() {
        let id = TaskId::new("shot 12/frame#4").unwrap();
        let encoded = id.encoded();
        assert!(!encoded.contains(char::is_whitespace));
        assert_eq!(TaskId::decode(&encoded).unwrap(), id);
        assert!(TaskId::new("   ").is_err());
    }

    #[test]
    fn test_check_result_allocation_matches_state() {
        let cfg = TaskConfiguration::new("/w", "u", vec!["true".into()]).unwrap();
        let res = TaskResourceAllocation::new(cpus(&[0]), 100, 0, 0).unwrap();
        assert!(TaskCheckResult::new(TaskState::Created, cfg.clone(), None, None, None, None, None, None).is_ok());
        assert!(TaskCheckResult::new(TaskState::Created, cfg.clone(), Some(res.clone()), None, None, None, None, None).is_err());
        assert!(TaskCheckResult::new(TaskState::Allocated, cfg.clone(), None, None, None, None, None, None).is_err());
        assert!(TaskCheckResult::new(TaskState::Started, cfg, Some(res), None, None, None, None, None).is_ok());
    }

    #[test]
    fn test_state_markers() {
        assert_eq!(TaskState::from_marker("ALLOCATED"), Some(TaskState::Allocated));
        assert_eq!(TaskState::from_marker("running"), None);
        assert_eq!(TaskState::Started.to_string(), "STARTED");
    }
}
