use farm_core::error::TransportError;
use farm_core::script::ROOT_RUN;
use farm_core::transport::{self, ExecuteOutput, ExecuteRequest, StatResult, Transport};
use std::io::{ErrorKind, SeekFrom};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

/// Transport to the machine this process runs on.
pub struct LocalTransport {
    temp_dir: PathBuf,
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::with_temp_dir(std::env::temp_dir())
    }

    /// Scripts are staged in `temp_dir` for the duration of each call.
    pub fn with_temp_dir(temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
        }
    }

    fn temp_path(&self) -> PathBuf {
        self.temp_dir.join(format!("farm-{}", uuid::Uuid::new_v4()))
    }

    async fn run(&self, request: &ExecuteRequest, root_run: &Path, script: &Path) -> Result<ExecuteOutput, TransportError> {
        tokio::fs::write(root_run, ROOT_RUN.body).await?;
        tokio::fs::write(script, request.bundle.lock().body).await?;

        let mut child = Command::new("/bin/bash")
            .arg(root_run)
            .arg(transport::boot_time_arg(request.expected_boot_time))
            .arg("/bin/bash")
            .arg(script)
            .args(request.bundle.render_args(&request.args))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Protocol("stdout not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TransportError::Protocol("stderr not captured".into()))?;
        let (stdout, stderr) = tokio::try_join!(
            read_limited(stdout, request.stdout_limit),
            // The boot header rides on stderr.
            read_limited(stderr, request.stderr_limit.saturating_add(64)),
        )?;
        let status = child.wait().await?;
        let exit_code = status
            .code()
            .ok_or_else(|| TransportError::Protocol(format!("script terminated by signal: {}", status)))?;

        let (boot_time, stderr) = transport::split_boot_header(request.expected_boot_time, &stderr)?;
        if stderr.len() > request.stderr_limit {
            return Err(TransportError::StreamLimitExceeded);
        }
        Ok(ExecuteOutput {
            exit_code,
            stdout,
            stderr,
            boot_time,
        })
    }
}

async fn read_limited(reader: impl AsyncRead + Unpin, limit: usize) -> Result<String, TransportError> {
    let mut buf = Vec::new();
    reader.take(limit as u64 + 1).read_to_end(&mut buf).await?;
    if buf.len() > limit {
        return Err(TransportError::StreamLimitExceeded);
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

async fn open_regular(path: &str) -> Result<File, TransportError> {
    let file = File::open(path).await?;
    let meta = file.metadata().await?;
    if !meta.is_file() {
        return Err(TransportError::NotRegularFile(path.to_string()));
    }
    Ok(file)
}

async fn with_timeout<T>(
    timeout: Duration,
    fut: impl std::future::Future<Output = Result<T, TransportError>>,
) -> Result<T, TransportError> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| TransportError::Timeout)?
}

#[async_trait::async_trait]
impl Transport for LocalTransport {
    async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteOutput, TransportError> {
        let root_run = self.temp_path();
        let script = self.temp_path();
        debug!("Executing {} locally", request.bundle.operation());

        let result = with_timeout(request.timeout, self.run(&request, &root_run, &script)).await;

        for path in [&root_run, &script] {
            if let Err(e) = tokio::fs::remove_file(path).await {
                if e.kind() != ErrorKind::NotFound {
                    warn!("Failed to remove {}: {}", path.display(), e);
                }
            }
        }
        result
    }

    async fn upload(&self, timeout: Duration, data: &[u8], path: &str) -> Result<(), TransportError> {
        with_timeout(timeout, async { Ok::<_, TransportError>(tokio::fs::write(path, data).await?) }).await
    }

    async fn download(
        &self,
        timeout: Duration,
        path: &str,
        offset: u64,
        len: u64,
    ) -> Result<Vec<u8>, TransportError> {
        with_timeout(timeout, async {
            let mut file = open_regular(path).await?;
            let len = usize::try_from(len)
                .map_err(|_| TransportError::Protocol(format!("download of {} bytes too large", len)))?;
            file.seek(SeekFrom::Start(offset)).await?;
            let mut buf = vec![0u8; len];
            file.read_exact(&mut buf).await.map_err(|e| match e.kind() {
                ErrorKind::UnexpectedEof => {
                    TransportError::Protocol(format!("{} holds fewer than {} bytes past {}", path, len, offset))
                }
                _ => TransportError::Io(e),
            })?;
            Ok::<_, TransportError>(buf)
        })
        .await
    }

    async fn pipe(
        &self,
        timeout: Duration,
        path: &str,
        offset: u64,
        limit: u64,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<(), TransportError> {
        with_timeout(timeout, async {
            let mut file = open_regular(path).await?;
            file.seek(SeekFrom::Start(offset)).await?;
            let mut window = file.take(limit);
            tokio::io::copy(&mut window, &mut *sink).await?;
            sink.flush().await?;
            Ok::<_, TransportError>(())
        })
        .await
    }

    async fn stat(&self, timeout: Duration, path: &str) -> Result<Option<StatResult>, TransportError> {
        with_timeout(timeout, async {
            match tokio::fs::metadata(path).await {
                Ok(meta) => Ok(Some(StatResult {
                    uid: meta.uid(),
                    gid: meta.gid(),
                    len: meta.len(),
                    mode: meta.mode(),
                })),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                Err(e) => Err(TransportError::Io(e)),
            }
        })
        .await
    }

    async fn delete(&self, timeout: Duration, path: &str) -> Result<(), TransportError> {
        with_timeout(timeout, async { Ok::<_, TransportError>(tokio::fs::remove_file(path).await?) }).await
    }
}
