//! Channel to one remote host. Implemented by `farm-ssh` and `farm-local`.

use crate::error::TransportError;
use crate::host::BootTime;
use crate::script::ScriptBundle;
use std::time::Duration;
use tokio::io::AsyncWrite;

#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub timeout: Duration,
    /// `None` accepts whatever boot the host reports.
    pub expected_boot_time: Option<BootTime>,
    pub stdout_limit: usize,
    pub stderr_limit: usize,
    pub bundle: ScriptBundle,
    /// Operation params, passed to the primary fragment's `main`.
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteOutput {
    pub exit_code: i32,
    pub stdout: String,
    /// Without the boot time header.
    pub stderr: String,
    pub boot_time: BootTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatResult {
    pub uid: u32,
    pub gid: u32,
    pub len: u64,
    pub mode: u32,
}

const S_IFMT: u32 = 0o170000;
const S_IFREG: u32 = 0o100000;

impl StatResult {
    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }

    pub fn is_regular_file(&self) -> bool {
        self.mode & S_IFMT == S_IFREG
    }
}

#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Run a script bundle as root. Fails with `BootTimeChanged` when an
    /// expected boot time is given and the host reports another one, and
    /// with `StreamLimitExceeded` when either output outgrows its limit.
    async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteOutput, TransportError>;

    /// Write `data` to `path`, truncating whatever was there.
    async fn upload(&self, timeout: Duration, data: &[u8], path: &str) -> Result<(), TransportError>;

    /// Read exactly `len` bytes starting at `offset`.
    async fn download(
        &self,
        timeout: Duration,
        path: &str,
        offset: u64,
        len: u64,
    ) -> Result<Vec<u8>, TransportError>;

    /// Stream the bytes `[offset, offset + limit)` into `sink`; fewer when
    /// the file ends first.
    async fn pipe(
        &self,
        timeout: Duration,
        path: &str,
        offset: u64,
        limit: u64,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<(), TransportError>;

    async fn stat(&self, timeout: Duration, path: &str) -> Result<Option<StatResult>, TransportError>;

    async fn delete(&self, timeout: Duration, path: &str) -> Result<(), TransportError>;
}

/// Strip the two header lines the root-run wrapper writes to stderr.
///
/// Returns the reported boot time and the remaining stderr.
pub fn split_boot_header(
    expected: Option<BootTime>,
    stderr: &str,
) -> Result<(BootTime, String), TransportError> {
    let mut parts = stderr.splitn(3, '\n');
    let status = parts.next().unwrap_or_default().trim();
    let boot = parts
        .next()
        .map(str::trim)
        .ok_or_else(|| TransportError::Protocol(format!("missing boot time header: {}", stderr)))?;
    let boot = boot
        .parse::<u64>()
        .map(BootTime)
        .map_err(|_| TransportError::Protocol(format!("bad boot time '{}'", boot)))?;
    let rest = parts.next().unwrap_or_default().to_string();

    match (status, expected) {
        ("BootUpdate", Some(expected)) => Err(TransportError::BootTimeChanged {
            expected: expected.as_secs(),
            actual: boot.as_secs(),
        }),
        ("Ok", Some(expected)) if expected != boot => Err(TransportError::BootTimeChanged {
            expected: expected.as_secs(),
            actual: boot.as_secs(),
        }),
        ("Ok", _) => Ok((boot, rest)),
        _ => Err(TransportError::Protocol(format!("unexpected header: {}", stderr))),
    }
}

/// Expected boot time as the root-run wrapper's first argument.
pub fn boot_time_arg(expected: Option<BootTime>) -> String {
    expected.map_or_else(|| "-1".to_string(), |b| b.as_secs().to_string())
}
