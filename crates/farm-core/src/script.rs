//! Remote script manifest and bundle composition.
//!
//! Every remote operation runs the lock wrapper with the fragments of one
//! [`Operation`] as positional arguments, followed by the operation params.
//! The fragments themselves are opaque payload compiled into the binary.

use std::fmt;

/// A named shell fragment embedded at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment {
    pub name: &'static str,
    pub body: &'static str,
}

macro_rules! fragment {
    ($name:literal) => {
        Fragment {
            name: $name,
            body: include_str!(concat!("../scripts/", $name, ".sh")),
        }
    };
}

/// Host-wide lock wrapper. Takes `[count, fragments..., params...]`.
pub const BASE_LOCK: Fragment = fragment!("base_lock");
/// Root escalation and boot time header, run by every transport.
pub const ROOT_RUN: Fragment = fragment!("root_run");
/// Paths, exit codes and the framed `emit` helper; part of every bundle.
pub const WORK_COMMON: Fragment = fragment!("work_common");

const HOST_BOOT_RESTORE: Fragment = fragment!("host_boot_restore");
const HOST_STATE_INFO: Fragment = fragment!("host_state_info");
const TASK_CREATE: Fragment = fragment!("task_create");
const TASK_DESTROY: Fragment = fragment!("task_destroy");
const TASK_RES_ALLOC: Fragment = fragment!("task_res_alloc");
const TASK_RES_DEALLOC: Fragment = fragment!("task_res_dealloc");
const TASK_RES_REALLOC: Fragment = fragment!("task_res_realloc");
const TASK_RES_REPAIR: Fragment = fragment!("task_res_repair");
const TASK_DISK_BACKUP: Fragment = fragment!("task_disk_backup");
const TASK_DISK_RESTORE: Fragment = fragment!("task_disk_restore");
const TASK_START: Fragment = fragment!("task_start");
const TASK_STOP: Fragment = fragment!("task_stop");
const TASK_CHECK: Fragment = fragment!("task_check");

const WORK_TRACK_ADD: Fragment = fragment!("work_track_add");
const WORK_TRACK_CHECK: Fragment = fragment!("work_track_check");
const WORK_TRACK_REMOVE: Fragment = fragment!("work_track_remove");
const WORK_STATE_SET: Fragment = fragment!("work_state_set");
const WORK_STATE_CHECK: Fragment = fragment!("work_state_check");
const WORK_RESOURCES: Fragment = fragment!("work_resources");
const WORK_WORKDIR_CREATE: Fragment = fragment!("work_workdir_create");
const WORK_WORKDIR_DELETE: Fragment = fragment!("work_workdir_delete");
const WORK_CGROUP_CREATE: Fragment = fragment!("work_cgroup_create");
const WORK_CGROUP_DELETE: Fragment = fragment!("work_cgroup_delete");
const WORK_IMAGE_CREATE: Fragment = fragment!("work_image_create");
const WORK_IMAGE_DELETE: Fragment = fragment!("work_image_delete");
const WORK_IMAGE_MOUNT: Fragment = fragment!("work_image_mount");
const WORK_IMAGE_UNMOUNT: Fragment = fragment!("work_image_unmount");
const WORK_IMAGE_REPAIR: Fragment = fragment!("work_image_repair");
const WORK_IMAGE_RESIZE: Fragment = fragment!("work_image_resize");
const WORK_IMAGE_BACKUP: Fragment = fragment!("work_image_backup");
const WORK_IMAGE_RECOVER: Fragment = fragment!("work_image_recover");
const WORK_PROCESS_START: Fragment = fragment!("work_process_start");
const WORK_PROCESS_STOP: Fragment = fragment!("work_process_stop");
const WORK_PROCESS_INFO: Fragment = fragment!("work_process_info");

/// Remote operations and the fragments each one needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Recover,
    CheckHost,
    Create,
    Destroy,
    Allocate,
    Deallocate,
    Reallocate,
    BackupDisk,
    RestoreDisk,
    Start,
    Stop,
    Check,
}

impl Operation {
    pub const ALL: [Operation; 12] = [
        Operation::Recover,
        Operation::CheckHost,
        Operation::Create,
        Operation::Destroy,
        Operation::Allocate,
        Operation::Deallocate,
        Operation::Reallocate,
        Operation::BackupDisk,
        Operation::RestoreDisk,
        Operation::Start,
        Operation::Stop,
        Operation::Check,
    ];

    pub fn primary(self) -> Fragment {
        match self {
            Operation::Recover => HOST_BOOT_RESTORE,
            Operation::CheckHost => HOST_STATE_INFO,
            Operation::Create => TASK_CREATE,
            Operation::Destroy => TASK_DESTROY,
            Operation::Allocate => TASK_RES_ALLOC,
            Operation::Deallocate => TASK_RES_DEALLOC,
            Operation::Reallocate => TASK_RES_REALLOC,
            Operation::BackupDisk => TASK_DISK_BACKUP,
            Operation::RestoreDisk => TASK_DISK_RESTORE,
            Operation::Start => TASK_START,
            Operation::Stop => TASK_STOP,
            Operation::Check => TASK_CHECK,
        }
    }

    pub fn subroutines(self) -> &'static [Fragment] {
        match self {
            Operation::Recover => &[
                TASK_RES_REPAIR,
                WORK_TRACK_ADD,
                WORK_TRACK_REMOVE,
                WORK_STATE_SET,
                WORK_RESOURCES,
                WORK_CGROUP_CREATE,
                WORK_IMAGE_MOUNT,
                WORK_IMAGE_REPAIR,
            ],
            Operation::CheckHost => &[],
            Operation::Create => &[
                WORK_TRACK_ADD,
                WORK_TRACK_CHECK,
                WORK_TRACK_REMOVE,
                WORK_STATE_SET,
                WORK_WORKDIR_CREATE,
                WORK_WORKDIR_DELETE,
            ],
            Operation::Destroy => &[
                WORK_TRACK_CHECK,
                WORK_TRACK_REMOVE,
                WORK_STATE_CHECK,
                WORK_PROCESS_STOP,
                WORK_IMAGE_UNMOUNT,
                WORK_IMAGE_DELETE,
                WORK_CGROUP_DELETE,
                WORK_WORKDIR_DELETE,
            ],
            Operation::Allocate => &[
                WORK_TRACK_CHECK,
                WORK_STATE_SET,
                WORK_STATE_CHECK,
                WORK_RESOURCES,
                WORK_CGROUP_CREATE,
                WORK_CGROUP_DELETE,
                WORK_IMAGE_CREATE,
                WORK_IMAGE_DELETE,
                WORK_IMAGE_MOUNT,
                WORK_IMAGE_UNMOUNT,
            ],
            Operation::Deallocate => &[
                WORK_TRACK_CHECK,
                WORK_STATE_SET,
                WORK_STATE_CHECK,
                WORK_RESOURCES,
                WORK_IMAGE_UNMOUNT,
                WORK_IMAGE_DELETE,
                WORK_CGROUP_DELETE,
            ],
            Operation::Reallocate => &[
                WORK_TRACK_CHECK,
                WORK_STATE_CHECK,
                WORK_RESOURCES,
                WORK_CGROUP_CREATE,
                WORK_IMAGE_MOUNT,
                WORK_IMAGE_UNMOUNT,
                WORK_IMAGE_REPAIR,
                WORK_IMAGE_RESIZE,
            ],
            Operation::BackupDisk => &[
                WORK_TRACK_CHECK,
                WORK_STATE_CHECK,
                WORK_IMAGE_MOUNT,
                WORK_IMAGE_UNMOUNT,
                WORK_IMAGE_BACKUP,
            ],
            Operation::RestoreDisk => &[
                WORK_TRACK_CHECK,
                WORK_STATE_CHECK,
                WORK_IMAGE_MOUNT,
                WORK_IMAGE_UNMOUNT,
                WORK_IMAGE_REPAIR,
                WORK_IMAGE_RESIZE,
                WORK_IMAGE_RECOVER,
            ],
            Operation::Start => &[
                WORK_TRACK_CHECK,
                WORK_STATE_SET,
                WORK_STATE_CHECK,
                WORK_PROCESS_START,
                WORK_PROCESS_STOP,
            ],
            Operation::Stop => &[
                WORK_TRACK_CHECK,
                WORK_STATE_SET,
                WORK_STATE_CHECK,
                WORK_PROCESS_STOP,
            ],
            Operation::Check => &[WORK_TRACK_CHECK, WORK_PROCESS_INFO],
        }
    }

    pub fn name(self) -> &'static str {
        self.primary().name
    }

    pub fn bundle(self) -> ScriptBundle {
        ScriptBundle::new(self)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered fragments for one invocation: lock wrapper, primary, subroutines,
/// then the common fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptBundle {
    operation: Operation,
    fragments: Vec<Fragment>,
}

impl ScriptBundle {
    fn new(operation: Operation) -> Self {
        let mut fragments = Vec::with_capacity(operation.subroutines().len() + 2);
        fragments.push(operation.primary());
        fragments.extend_from_slice(operation.subroutines());
        fragments.push(WORK_COMMON);
        Self { operation, fragments }
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// The script that is actually executed.
    pub fn lock(&self) -> Fragment {
        BASE_LOCK
    }

    pub fn primary(&self) -> Fragment {
        self.fragments[0]
    }

    /// Primary first, then subroutines and the common fragment.
    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    /// Positional arguments for the lock wrapper: fragment count, fragment
    /// bodies, then `params`.
    pub fn render_args(&self, params: &[String]) -> Vec<String> {
        let mut args = Vec::with_capacity(1 + self.fragments.len() + params.len());
        args.push(self.fragments.len().to_string());
        args.extend(self.fragments.iter().map(|f| f.body.to_string()));
        args.extend(params.iter().cloned());
        args
    }
}

/// Single-quote a string for a POSIX shell.
pub fn shell_escape(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// `/bin/bash <script> 'arg'...` with every piece escaped.
pub fn command_line(script_path: &str, args: &[String]) -> String {
    let mut line = String::from("/bin/bash ");
    line.push_str(&shell_escape(script_path));
    for arg in args {
        line.push(' ');
        line.push_str(&shell_escape(arg));
    }
    line
}
