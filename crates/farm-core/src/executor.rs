use crate::config::ExecutorSettings;
use crate::error::{ExecutorError, ParseError, ValidationError};
use crate::framing::{self, Frames};
use crate::host::{BootTime, GlobalMemory, HostCheckResult, Mount, Processor};
use crate::script::Operation;
use crate::task::{
    validate_path, TaskCheckResult, TaskConfiguration, TaskId, TaskMemory,
    TaskResourceAllocation, TaskState, CFS_PERIOD,
};
use crate::telemetry::{cpuinfo, cpuset, df, kernel_config, meminfo, memory_stat, procstat, track};
use crate::transport::{ExecuteRequest, Transport};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tracing::{debug, info, warn};

/// Task lifecycle on one host boot.
///
/// Implementations hold no task state between calls; every result is
/// re-derived from the host.
#[async_trait::async_trait]
pub trait Executor: Send + Sync {
    /// Boot of the host this executor is bound to.
    fn boot_time(&self) -> BootTime;

    /// New task in CREATED. Fails with `TaskIdConflict` if the id is taken.
    async fn create_task(&self, id: &TaskId, configuration: &TaskConfiguration) -> Result<(), ExecutorError>;

    /// Remove a CREATED task entirely.
    async fn destroy_task(&self, id: &TaskId) -> Result<(), ExecutorError>;

    /// CREATED to ALLOCATED: cgroups plus a fresh mounted disk image.
    async fn allocate_task(&self, id: &TaskId, allocation: &TaskResourceAllocation) -> Result<(), ExecutorError>;

    /// ALLOCATED to CREATED. The disk image is deleted.
    async fn deallocate_task(&self, id: &TaskId) -> Result<(), ExecutorError>;

    /// Resize an ALLOCATED task in place, keeping its disk contents.
    async fn reallocate_task(&self, id: &TaskId, allocation: &TaskResourceAllocation) -> Result<(), ExecutorError>;

    async fn backup_task_disk(&self, id: &TaskId, path: &str) -> Result<(), ExecutorError>;

    async fn restore_task_disk(&self, id: &TaskId, path: &str) -> Result<(), ExecutorError>;

    /// Stream a byte range of a file on the task's mounted disk into `sink`.
    async fn download_task_file(
        &self,
        id: &TaskId,
        path: &str,
        offset: u64,
        limit: u64,
        timeout: Duration,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<(), ExecutorError>;

    /// ALLOCATED to STARTED.
    async fn start_task(&self, id: &TaskId) -> Result<(), ExecutorError>;

    /// STARTED to ALLOCATED.
    async fn stop_task(&self, id: &TaskId) -> Result<(), ExecutorError>;

    async fn check_task(&self, id: &TaskId) -> Result<TaskCheckResult, ExecutorError>;

    async fn check_host(&self) -> Result<HostCheckResult, ExecutorError>;
}

/// Which script exit codes a call site maps to typed errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expected {
    pub task_id: bool,
    pub task_state: bool,
}

impl Expected {
    pub const NONE: Expected = Expected { task_id: false, task_state: false };
    pub const ID: Expected = Expected { task_id: true, task_state: false };
    pub const ID_AND_STATE: Expected = Expected { task_id: true, task_state: true };
}

pub const EXIT_OK: i32 = 0;
pub const EXIT_CRITICAL: i32 = 1;
pub const EXIT_BAD_TASK_ID: i32 = 2;
pub const EXIT_BAD_TASK_STATE: i32 = 3;
pub const EXIT_RECOVERY_ERROR: i32 = 4;

/// Map a script exit code to the caller-facing error.
pub fn translate_exit(
    code: i32,
    stderr: &str,
    expected: Expected,
    id: Option<&TaskId>,
) -> Result<(), ExecutorError> {
    let id = || id.map(|id| id.to_string()).unwrap_or_default();
    match code {
        EXIT_OK => Ok(()),
        EXIT_CRITICAL => Err(ExecutorError::Critical { stderr: stderr.to_string() }),
        EXIT_BAD_TASK_ID if expected.task_id => Err(ExecutorError::TaskIdConflict(id())),
        EXIT_BAD_TASK_STATE if expected.task_state => Err(ExecutorError::TaskState(id())),
        code => Err(ExecutorError::Unrecognized {
            code,
            stderr: stderr.to_string(),
        }),
    }
}

/// Executor driving one host through a [`Transport`].
pub struct HostExecutor {
    transport: Arc<dyn Transport>,
    boot_time: BootTime,
    settings: ExecutorSettings,
}

impl HostExecutor {
    /// Run crash recovery and bind to the host's current boot.
    ///
    /// Tasks tracked under an earlier boot get their cgroups and mounts
    /// rebuilt; tasks that were running come back ALLOCATED. Partial
    /// recovery is logged, not raised.
    pub async fn connect(transport: Arc<dyn Transport>, settings: ExecutorSettings) -> Result<Self, ExecutorError> {
        let operation = Operation::Recover;
        debug!(operation = %operation, "running recovery");
        let output = transport
            .execute(ExecuteRequest {
                timeout: settings.recovery_timeout(),
                expected_boot_time: None,
                stdout_limit: settings.stdout_limit,
                stderr_limit: settings.stderr_limit,
                bundle: operation.bundle(),
                args: Vec::new(),
            })
            .await?;

        match output.exit_code {
            EXIT_OK => {}
            EXIT_RECOVERY_ERROR => warn!(boot_time = %output.boot_time, stderr = %output.stderr.trim(), "partial recovery"),
            code => translate_exit(code, &output.stderr, Expected::NONE, None)?,
        }
        info!(boot_time = %output.boot_time, "executor bound to host boot");

        Ok(Self {
            transport,
            boot_time: output.boot_time,
            settings,
        })
    }

    /// Bind to a boot time already known to have been recovered.
    pub fn resume(transport: Arc<dyn Transport>, boot_time: BootTime, settings: ExecutorSettings) -> Self {
        Self {
            transport,
            boot_time,
            settings,
        }
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    async fn run(
        &self,
        operation: Operation,
        id: Option<&TaskId>,
        params: Vec<String>,
        expected: Expected,
    ) -> Result<String, ExecutorError> {
        debug!(operation = %operation, task = ?id.map(TaskId::as_str), "remote invocation");
        let output = self
            .transport
            .execute(ExecuteRequest {
                timeout: self.settings.operation_timeout(),
                expected_boot_time: Some(self.boot_time),
                stdout_limit: self.settings.stdout_limit,
                stderr_limit: self.settings.stderr_limit,
                bundle: operation.bundle(),
                args: params,
            })
            .await?;
        if output.exit_code != EXIT_OK {
            debug!(operation = %operation, code = output.exit_code, stderr = %output.stderr.trim(), "remote failure");
        }
        translate_exit(output.exit_code, &output.stderr, expected, id)?;
        Ok(output.stdout)
    }

    async fn transition(
        &self,
        operation: Operation,
        id: &TaskId,
        extra: Vec<String>,
    ) -> Result<(), ExecutorError> {
        let mut params = vec![id.encoded()];
        params.extend(extra);
        self.run(operation, Some(id), params, Expected::ID_AND_STATE).await?;
        info!(operation = %operation, task = %id, "task updated");
        Ok(())
    }
}

fn allocation_params(allocation: &TaskResourceAllocation) -> Vec<String> {
    vec![
        allocation.cpu_list(),
        allocation.scheduler_slice().to_string(),
        CFS_PERIOD.to_string(),
        allocation.memory_limit().to_string(),
        allocation.disk_limit().to_string(),
    ]
}

#[async_trait::async_trait]
impl Executor for HostExecutor {
    fn boot_time(&self) -> BootTime {
        self.boot_time
    }

    async fn create_task(&self, id: &TaskId, configuration: &TaskConfiguration) -> Result<(), ExecutorError> {
        let mut params = vec![
            id.encoded(),
            configuration.work_path().to_string(),
            configuration.user().to_string(),
        ];
        params.extend(configuration.command().iter().cloned());
        self.run(Operation::Create, Some(id), params, Expected::ID).await?;
        info!(task = %id, work_path = configuration.work_path(), "task created");
        Ok(())
    }

    async fn destroy_task(&self, id: &TaskId) -> Result<(), ExecutorError> {
        self.transition(Operation::Destroy, id, Vec::new()).await
    }

    async fn allocate_task(&self, id: &TaskId, allocation: &TaskResourceAllocation) -> Result<(), ExecutorError> {
        self.transition(Operation::Allocate, id, allocation_params(allocation)).await
    }

    async fn deallocate_task(&self, id: &TaskId) -> Result<(), ExecutorError> {
        self.transition(Operation::Deallocate, id, Vec::new()).await
    }

    async fn reallocate_task(&self, id: &TaskId, allocation: &TaskResourceAllocation) -> Result<(), ExecutorError> {
        self.transition(Operation::Reallocate, id, allocation_params(allocation)).await
    }

    async fn backup_task_disk(&self, id: &TaskId, path: &str) -> Result<(), ExecutorError> {
        validate_path(path)?;
        self.transition(Operation::BackupDisk, id, vec![path.to_string()]).await
    }

    async fn restore_task_disk(&self, id: &TaskId, path: &str) -> Result<(), ExecutorError> {
        validate_path(path)?;
        self.transition(Operation::RestoreDisk, id, vec![path.to_string()]).await
    }

    async fn download_task_file(
        &self,
        id: &TaskId,
        path: &str,
        offset: u64,
        limit: u64,
        timeout: Duration,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<(), ExecutorError> {
        validate_path(path)?;
        if offset.checked_add(limit).is_none() {
            return Err(ValidationError::Argument(format!("offset {} + limit {} overflows", offset, limit)).into());
        }

        let check = self.check_task(id).await?;
        let disk = check.disk().ok_or_else(|| ExecutorError::TaskState(id.to_string()))?;
        let remote_path = format!("{}{}", disk.target.trim_end_matches('/'), path);
        debug!(task = %id, path = %remote_path, offset, limit, "downloading task file");
        self.transport.pipe(timeout, &remote_path, offset, limit, sink).await?;
        Ok(())
    }

    async fn start_task(&self, id: &TaskId) -> Result<(), ExecutorError> {
        self.transition(Operation::Start, id, Vec::new()).await
    }

    async fn stop_task(&self, id: &TaskId) -> Result<(), ExecutorError> {
        self.transition(Operation::Stop, id, Vec::new()).await
    }

    async fn check_task(&self, id: &TaskId) -> Result<TaskCheckResult, ExecutorError> {
        let stdout = self
            .run(Operation::Check, Some(id), vec![id.encoded()], Expected::ID)
            .await?;
        parse_task_check(&framing::decode(&stdout)?)
    }

    async fn check_host(&self) -> Result<HostCheckResult, ExecutorError> {
        let stdout = self.run(Operation::CheckHost, None, Vec::new(), Expected::NONE).await?;
        parse_host_check(&framing::decode(&stdout)?)
    }
}

fn parse_number<T: std::str::FromStr>(what: &'static str, text: &str) -> Result<T, ParseError> {
    text.trim()
        .parse()
        .map_err(|_| ParseError::new(what, "not a number", text))
}

/// Assemble a task snapshot from the records of a task check.
pub fn parse_task_check(frames: &Frames) -> Result<TaskCheckResult, ExecutorError> {
    let state_text = frames.require("!STATE")?;
    let state = TaskState::from_marker(state_text)
        .ok_or_else(|| ParseError::new("task state", "unknown state", state_text))?;

    let mut command = Vec::new();
    while let Some(arg) = frames.get(&format!("!WORKCMD{}", command.len())) {
        command.push(arg.to_string());
    }
    let configuration = TaskConfiguration::new(frames.require("!WORKDIR")?, frames.require("!WORKUSER")?, command)?;

    let resource_allocation = match frames.get("!CPUS") {
        None => None,
        Some(cpus) => {
            let period: u64 = parse_number("cpu period", frames.require("!CPU_PERIOD")?)?;
            if period != CFS_PERIOD {
                return Err(ParseError::new("cpu period", format!("expected {}", CFS_PERIOD), period.to_string()).into());
            }
            Some(TaskResourceAllocation::new(
                cpuset::parse(cpus)?,
                parse_number("cpu quota", frames.require("!CPU_QUOTA")?)?,
                parse_number("memory size", frames.require("!MEMORY_SIZE")?)?,
                parse_number("disk size", frames.require("!DISK_SIZE")?)?,
            )?)
        }
    };

    let session_id = frames
        .get("!RUN_SID")
        .map(|sid| parse_number::<u32>("session id", sid))
        .transpose()?;
    let pids = frames
        .get("!RUN_PIDS")
        .map(|text| {
            text.split('\n')
                .filter(|line| !line.trim().is_empty())
                .map(|pid| parse_number::<u32>("process id", pid))
                .collect::<Result<BTreeSet<_>, _>>()
        })
        .transpose()?;
    let exit_code = frames
        .get("!EXITCODE")
        .map(|code| parse_number::<i32>("exit code", code))
        .transpose()?;

    let disk = match frames.get("!DF") {
        None => None,
        Some(text) => {
            let entry = df::parse(text)?
                .into_iter()
                .next()
                .ok_or_else(|| ParseError::new("task disk usage", "no mount listed", text))?;
            match (entry.used, entry.available) {
                (Some(used), Some(available)) => Some(Mount {
                    target: entry.target,
                    used,
                    available,
                }),
                _ => return Err(ParseError::new("task disk usage", "usage not reported", text).into()),
            }
        }
    };

    let memory = frames
        .get("!CGROUP_MEM_STAT")
        .map(memory_stat::parse)
        .transpose()?
        .map(|stat| TaskMemory {
            rss: stat.rss,
            cache: stat.cache,
            swap: stat.swap.unwrap_or(0),
        });

    Ok(TaskCheckResult::new(
        state,
        configuration,
        resource_allocation,
        session_id,
        pids,
        exit_code,
        disk,
        memory,
    )?)
}

fn kb_to_bytes(what: &'static str, kb: u64) -> Result<u64, ParseError> {
    kb.checked_mul(1024)
        .ok_or_else(|| ParseError::new(what, "overflows in bytes", kb.to_string()))
}

/// Assemble a host snapshot from the records of a host check.
pub fn parse_host_check(frames: &Frames) -> Result<HostCheckResult, ExecutorError> {
    let system = frames.require("!UNAME")?.trim().to_string();

    let configs = kernel_config::parse(frames.require("!KERNEL_CONFIGS")?)?;
    let swap_enabled = kernel_config::is_enabled(&configs, "CONFIG_MEMCG_SWAP_ENABLED");

    let mounts = df::parse(frames.require("!DF")?)?
        .into_iter()
        .filter_map(|entry| match (entry.used, entry.available) {
            (Some(used), Some(available)) => Some(Mount {
                target: entry.target,
                used,
                available,
            }),
            _ => None,
        })
        .collect();

    let usable = cpuset::parse(frames.require("!CGROUP_CPUSET")?)?;
    let first = procstat::parse(frames.require("!PROCSTAT1")?)?;
    let second = procstat::parse(frames.require("!PROCSTAT2")?)?;
    let lookup = |samples: &[procstat::CpuTimes], processor: u64, which: &'static str| {
        samples
            .iter()
            .find(|t| t.processor == processor)
            .copied()
            .ok_or_else(|| ParseError::new(which, format!("no sample for cpu{}", processor), ""))
    };

    let mut processors = Vec::new();
    for entry in cpuinfo::parse(frames.require("!CPUINFO")?)? {
        if !usable.contains(&entry.processor) {
            continue;
        }
        let before = lookup(&first, entry.processor, "first cpu sample")?;
        let after = lookup(&second, entry.processor, "second cpu sample")?;
        processors.push(Processor::new(
            entry.physical_id,
            entry.core_id,
            entry.processor,
            entry.model,
            entry.flags,
            procstat::cpu_usage(&before, &after),
        )?);
    }

    let info = meminfo::parse(frames.require("!MEMINFO")?)?;
    let memory = GlobalMemory {
        mem_total: kb_to_bytes("MemTotal", info.mem_total_kb)?,
        mem_free: kb_to_bytes("MemAvailable", info.mem_available_kb)?,
        swap_total: kb_to_bytes("SwapTotal", info.swap_total_kb)?,
        swap_free: kb_to_bytes("SwapFree", info.swap_free_kb)?,
    };

    let tasks = track::parse(frames.require("!TASKS")?)?
        .into_iter()
        .map(|entry| TaskId::decode(&entry.id).map(|id| id.as_str().to_string()))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(HostCheckResult::new(system, swap_enabled, mounts, processors, memory, tasks)?)
}
