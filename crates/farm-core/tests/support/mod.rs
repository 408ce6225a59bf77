//! In-memory host that answers script bundles the way the real scripts do.

#![allow(dead_code)]

use farm_core::error::TransportError;
use farm_core::framing;
use farm_core::host::BootTime;
use farm_core::script::Operation;
use farm_core::task::TaskState;
use farm_core::transport::{ExecuteOutput, ExecuteRequest, StatResult, Transport};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};

#[derive(Debug, Clone)]
struct SimTask {
    boot: u64,
    work_path: String,
    user: String,
    command: Vec<String>,
    state: TaskState,
    /// cpus, quota, period, memory, disk
    resources: Option<[String; 5]>,
    sid: Option<u32>,
    pids: Vec<u32>,
    exit_code: Option<i32>,
    disk_files: HashMap<String, Vec<u8>>,
}

impl SimTask {
    fn disk_size(&self) -> u64 {
        self.resources
            .as_ref()
            .and_then(|r| r[4].parse().ok())
            .unwrap_or(0)
    }
}

#[derive(Debug, Default)]
struct SimState {
    boot: u64,
    tasks: BTreeMap<String, SimTask>,
    backups: HashMap<String, HashMap<String, Vec<u8>>>,
    next_sid: u32,
    operations: Vec<Operation>,
    recovery_exit: i32,
    recovery_stderr: String,
    stalled: Option<Operation>,
}

pub struct SimHost {
    state: Mutex<SimState>,
}

impl SimHost {
    pub fn new(boot: u64) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SimState {
                boot,
                next_sid: 1000,
                ..SimState::default()
            }),
        })
    }

    pub fn reboot(&self, boot: u64) {
        let mut state = self.state.lock().unwrap();
        state.boot = boot;
        for task in state.tasks.values_mut() {
            task.pids.clear();
        }
    }

    pub fn set_recovery_result(&self, exit_code: i32, stderr: &str) {
        let mut state = self.state.lock().unwrap();
        state.recovery_exit = exit_code;
        state.recovery_stderr = stderr.to_string();
    }

    /// Bundles of `operation` never answer; callers see their own timeout.
    pub fn stall(&self, operation: Operation) {
        self.state.lock().unwrap().stalled = Some(operation);
    }

    /// The task's command ends on its own.
    pub fn finish_process(&self, id: &str, exit_code: i32) {
        let mut state = self.state.lock().unwrap();
        let task = state.tasks.get_mut(&encode(id)).unwrap();
        task.pids.clear();
        task.exit_code = Some(exit_code);
    }

    pub fn write_task_file(&self, id: &str, path: &str, data: &[u8]) {
        let mut state = self.state.lock().unwrap();
        let task = state.tasks.get_mut(&encode(id)).unwrap();
        task.disk_files.insert(path.to_string(), data.to_vec());
    }

    pub fn task_file(&self, id: &str, path: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        state.tasks.get(&encode(id))?.disk_files.get(path).cloned()
    }

    pub fn operations(&self) -> Vec<Operation> {
        self.state.lock().unwrap().operations.clone()
    }

    fn run(state: &mut SimState, operation: Operation, params: &[String]) -> (i32, String, String) {
        let ok = |stdout: String| (0, stdout, String::new());
        let fail = |code: i32, msg: &str| (code, String::new(), msg.to_string());

        match operation {
            Operation::Recover => {
                let boot = state.boot;
                for task in state.tasks.values_mut().filter(|t| t.boot != boot) {
                    task.sid = None;
                    task.pids.clear();
                    if task.state == TaskState::Started {
                        task.state = TaskState::Allocated;
                    }
                    task.boot = boot;
                }
                (state.recovery_exit, String::new(), state.recovery_stderr.clone())
            }
            Operation::CheckHost => ok(host_check_output(state)),
            Operation::Create => {
                let id = params[0].clone();
                if state.tasks.contains_key(&id) {
                    return fail(2, "Task already exists");
                }
                let task = SimTask {
                    boot: state.boot,
                    work_path: params[1].clone(),
                    user: params[2].clone(),
                    command: params[3..].to_vec(),
                    state: TaskState::Created,
                    resources: None,
                    sid: None,
                    pids: Vec::new(),
                    exit_code: None,
                    disk_files: HashMap::new(),
                };
                state.tasks.insert(id, task);
                ok(String::new())
            }
            _ => {
                let next_sid = state.next_sid;
                let Some(task) = state.tasks.get_mut(&params[0]) else {
                    return fail(2, "Unknown task");
                };
                let require = |task: &SimTask, want: TaskState| task.state == want;
                match operation {
                    Operation::Destroy => {
                        if !require(task, TaskState::Created) {
                            return fail(3, "bad state");
                        }
                        state.tasks.remove(&params[0]);
                    }
                    Operation::Allocate => {
                        if !require(task, TaskState::Created) {
                            return fail(3, "bad state");
                        }
                        task.resources = Some(resources(&params[1..]));
                        task.disk_files.clear();
                        task.state = TaskState::Allocated;
                    }
                    Operation::Reallocate => {
                        if !require(task, TaskState::Allocated) {
                            return fail(3, "bad state");
                        }
                        task.resources = Some(resources(&params[1..]));
                    }
                    Operation::Deallocate => {
                        if !require(task, TaskState::Allocated) {
                            return fail(3, "bad state");
                        }
                        task.resources = None;
                        task.disk_files.clear();
                        task.state = TaskState::Created;
                    }
                    Operation::BackupDisk => {
                        if !require(task, TaskState::Allocated) {
                            return fail(3, "bad state");
                        }
                        let files = task.disk_files.clone();
                        state.backups.insert(params[1].clone(), files);
                    }
                    Operation::RestoreDisk => {
                        if !require(task, TaskState::Allocated) {
                            return fail(3, "bad state");
                        }
                        let Some(files) = state.backups.get(&params[1]) else {
                            return fail(1, "No backup");
                        };
                        task.disk_files = files.clone();
                    }
                    Operation::Start => {
                        if !require(task, TaskState::Allocated) {
                            return fail(3, "bad state");
                        }
                        task.sid = Some(next_sid);
                        task.pids = vec![next_sid, next_sid + 1];
                        task.exit_code = None;
                        task.state = TaskState::Started;
                        state.next_sid += 10;
                    }
                    Operation::Stop => {
                        if !require(task, TaskState::Started) {
                            return fail(3, "bad state");
                        }
                        if !task.pids.is_empty() {
                            task.pids.clear();
                            task.exit_code.get_or_insert(143);
                        }
                        task.state = TaskState::Allocated;
                    }
                    Operation::Check => return ok(task_check_output(task)),
                    Operation::Recover | Operation::CheckHost | Operation::Create => unreachable!(),
                }
                ok(String::new())
            }
        }
    }

    fn find_file(&self, path: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        state.tasks.values().find_map(|task| {
            if task.state == TaskState::Created || task.disk_size() == 0 {
                return None;
            }
            let relative = path.strip_prefix(&task.work_path)?;
            task.disk_files.get(relative).cloned()
        })
    }
}

fn encode(id: &str) -> String {
    urlencoding::encode(id).into_owned()
}

fn resources(params: &[String]) -> [String; 5] {
    [
        params[0].clone(),
        params[1].clone(),
        params[2].clone(),
        params[3].clone(),
        params[4].clone(),
    ]
}

fn task_check_output(task: &SimTask) -> String {
    let mut records: Vec<(String, String)> = vec![
        ("!STATE".into(), task.state.to_string()),
        ("!WORKDIR".into(), task.work_path.clone()),
        ("!WORKUSER".into(), task.user.clone()),
    ];
    for (i, arg) in task.command.iter().enumerate() {
        records.push((format!("!WORKCMD{}", i), arg.clone()));
    }
    if let Some(r) = &task.resources {
        for (key, value) in ["!CPUS", "!CPU_QUOTA", "!CPU_PERIOD", "!MEMORY_SIZE", "!DISK_SIZE"]
            .iter()
            .zip(r.iter())
        {
            records.push((key.to_string(), value.clone()));
        }
    }
    if let Some(sid) = task.sid {
        records.push(("!RUN_SID".into(), sid.to_string()));
        let pids: Vec<String> = task.pids.iter().map(u32::to_string).collect();
        records.push(("!RUN_PIDS".into(), pids.join("\n")));
    }
    if let Some(code) = task.exit_code {
        records.push(("!EXITCODE".into(), code.to_string()));
    }
    if task.state != TaskState::Created && task.disk_size() > 0 {
        let used: usize = task.disk_files.values().map(Vec::len).sum();
        records.push((
            "!DF".into(),
            format!(
                "        Used        Avail Type Mounted on\n{} {} ext4 {}",
                used,
                task.disk_size() - used as u64,
                task.work_path
            ),
        ));
    }
    if task.state != TaskState::Created {
        records.push(("!CGROUP_MEM_STAT".into(), "total_cache 8192\ntotal_rss 4096".into()));
    }
    framing::encode(records.iter().map(|(k, v)| (k.as_str(), v.as_str())))
}

fn host_check_output(state: &SimState) -> String {
    let tracked: Vec<String> = state
        .tasks
        .iter()
        .map(|(id, task)| format!("{} {} /var/lib/farm-host/tasks/{}", id, task.boot, id))
        .collect();
    let tracked = tracked.join("\n");
    framing::encode([
        ("!UNAME", "Linux sim 5.15.0-generic #1 SMP x86_64 GNU/Linux"),
        ("!KERNEL_CONFIGS", "# generated\nCONFIG_MEMCG=y\n\n# CONFIG_MEMCG_SWAP_ENABLED is not set"),
        ("!DF", "Used Avail Type Mounted on\n1000 9000 ext4 /\n- - proc /proc"),
        ("!CGROUP_CPUSET", "0-1"),
        ("!PROCSTAT1", "cpu  200 0 100 1700\ncpu0 100 0 50 850\ncpu1 100 0 50 850\nbtime 1"),
        ("!PROCSTAT2", "cpu  400 0 200 3400\ncpu0 200 0 100 1700\ncpu1 200 0 100 1700\nbtime 1"),
        (
            "!CPUINFO",
            "processor\t: 0\nphysical id\t: 0\ncore id\t\t: 0\nmodel name\t: Sim CPU\nflags\t\t: fpu sse2\n\n\
processor\t: 1\nphysical id\t: 0\ncore id\t\t: 1\nmodel name\t: Sim CPU\nflags\t\t: fpu sse2\n",
        ),
        ("!MEMINFO", "MemTotal:       16384 kB\nMemFree:         1024 kB\nMemAvailable:    8192 kB\nSwapTotal:          0 kB\nSwapFree:           0 kB"),
        ("!TASKS", tracked.as_str()),
    ])
}

#[async_trait::async_trait]
impl Transport for SimHost {
    async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteOutput, TransportError> {
        let stalled = self.state.lock().unwrap().stalled == Some(request.bundle.operation());
        if stalled {
            tokio::time::sleep(request.timeout).await;
            return Err(TransportError::Timeout);
        }
        let mut state = self.state.lock().unwrap();
        if let Some(expected) = request.expected_boot_time {
            if expected.as_secs() != state.boot {
                return Err(TransportError::BootTimeChanged {
                    expected: expected.as_secs(),
                    actual: state.boot,
                });
            }
        }
        let operation = request.bundle.operation();
        assert_eq!(request.bundle.primary(), operation.primary());
        state.operations.push(operation);
        let (exit_code, stdout, stderr) = Self::run(&mut state, operation, &request.args);
        if stdout.len() > request.stdout_limit || stderr.len() > request.stderr_limit {
            return Err(TransportError::StreamLimitExceeded);
        }
        Ok(ExecuteOutput {
            exit_code,
            stdout,
            stderr,
            boot_time: BootTime(state.boot),
        })
    }

    async fn upload(&self, _timeout: Duration, _data: &[u8], _path: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn download(&self, _timeout: Duration, path: &str, offset: u64, len: u64) -> Result<Vec<u8>, TransportError> {
        let data = self.find_file(path).ok_or_else(|| TransportError::NotRegularFile(path.to_string()))?;
        let start = offset as usize;
        let end = start + len as usize;
        data.get(start..end)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| TransportError::Protocol("short read".into()))
    }

    async fn pipe(
        &self,
        _timeout: Duration,
        path: &str,
        offset: u64,
        limit: u64,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<(), TransportError> {
        let data = self.find_file(path).ok_or_else(|| TransportError::NotRegularFile(path.to_string()))?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
        let end = usize::try_from(offset.saturating_add(limit)).unwrap_or(usize::MAX).min(data.len());
        sink.write_all(&data[start..end]).await?;
        sink.flush().await?;
        Ok(())
    }

    async fn stat(&self, _timeout: Duration, path: &str) -> Result<Option<StatResult>, TransportError> {
        Ok(self.find_file(path).map(|data| StatResult {
            uid: 0,
            gid: 0,
            len: data.len() as u64,
            mode: 0o100644,
        }))
    }

    async fn delete(&self, _timeout: Duration, _path: &str) -> Result<(), TransportError> {
        Ok(())
    }
}
