use farm_core::config::HostConfig;
use farm_core::error::TransportError;
use farm_core::script::{self, ROOT_RUN};
use farm_core::transport::{self, ExecuteOutput, ExecuteRequest, StatResult, Transport};
use ssh2::{ErrorCode, Session, Sftp};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::net::TcpStream;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// libssh2's LIBSSH2_ERROR_TIMEOUT.
const SESSION_TIMEOUT: i32 = -9;
/// LIBSSH2_FX_NO_SUCH_FILE.
const SFTP_NO_SUCH_FILE: i32 = 2;

const PIPE_CHUNK: usize = 64 * 1024;
const PIPE_DEPTH: usize = 4;
const IDLE_POLL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone)]
struct SshTarget {
    host: String,
    port: u16,
    user: String,
    key_path: Option<String>,
    password: Option<String>,
}

/// Transport to a host over SSH. Scripts run through an exec channel, files
/// move over SFTP. Each call opens its own session on a blocking worker.
pub struct SshTransport {
    target: SshTarget,
}

impl SshTransport {
    pub fn new(config: &HostConfig) -> Result<Self, TransportError> {
        let host = config
            .host
            .clone()
            .ok_or_else(|| TransportError::Connection(format!("host '{}' requires 'host'", config.name)))?;
        let user = config
            .user
            .clone()
            .ok_or_else(|| TransportError::Connection(format!("host '{}' requires 'user'", config.name)))?;
        Ok(Self {
            target: SshTarget {
                host,
                port: config.ssh_port(),
                user,
                key_path: config.key_path.clone(),
                password: config.password.clone(),
            },
        })
    }

    /// Run `job` against a fresh session on a blocking thread, bounded by
    /// `timeout`.
    async fn blocking<T, F>(&self, timeout: Duration, job: F) -> Result<T, TransportError>
    where
        T: Send + 'static,
        F: FnOnce(&Session) -> Result<T, TransportError> + Send + 'static,
    {
        let target = self.target.clone();
        let worker = tokio::task::spawn_blocking(move || {
            let sess = connect(&target, timeout)?;
            job(&sess)
        });
        match tokio::time::timeout(timeout, worker).await {
            Err(_) => Err(TransportError::Timeout),
            Ok(Err(e)) => Err(TransportError::Protocol(format!("SSH worker failed: {}", e))),
            Ok(Ok(result)) => result,
        }
    }
}

fn connect(target: &SshTarget, timeout: Duration) -> Result<Session, TransportError> {
    debug!("Connecting to {}@{}:{}", target.user, target.host, target.port);
    let tcp = TcpStream::connect((target.host.as_str(), target.port)).map_err(|e| {
        TransportError::Connection(format!("TCP connect to {}:{}: {}", target.host, target.port, e))
    })?;

    let mut sess = Session::new().map_err(|e| TransportError::Connection(format!("Session::new: {}", e)))?;
    sess.set_tcp_stream(tcp);
    sess.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));
    sess.handshake().map_err(ssh_error)?;

    if let Some(key_path) = &target.key_path {
        sess.userauth_pubkey_file(&target.user, None, Path::new(key_path), None)
            .map_err(|e| TransportError::Connection(format!("Pubkey auth: {}", e)))?;
    } else if let Some(password) = &target.password {
        sess.userauth_password(&target.user, password)
            .map_err(|e| TransportError::Connection(format!("Password auth: {}", e)))?;
    } else {
        sess.userauth_agent(&target.user)
            .map_err(|e| TransportError::Connection(format!("Agent auth: {}", e)))?;
    }

    if !sess.authenticated() {
        return Err(TransportError::Connection("Authentication failed".into()));
    }
    Ok(sess)
}

fn ssh_error(e: ssh2::Error) -> TransportError {
    match e.code() {
        ErrorCode::Session(SESSION_TIMEOUT) => TransportError::Timeout,
        _ => TransportError::Protocol(e.to_string()),
    }
}

fn io_error(e: std::io::Error) -> TransportError {
    match e.kind() {
        ErrorKind::TimedOut | ErrorKind::WouldBlock => TransportError::Timeout,
        _ => TransportError::Io(e),
    }
}

fn write_file(sftp: &Sftp, path: &str, data: &[u8]) -> Result<(), TransportError> {
    let mut file = sftp.create(Path::new(path)).map_err(ssh_error)?;
    file.write_all(data).map_err(io_error)?;
    Ok(())
}

fn open_regular(sftp: &Sftp, path: &str) -> Result<ssh2::File, TransportError> {
    let mut file = sftp.open(Path::new(path)).map_err(ssh_error)?;
    let stat = file.stat().map_err(ssh_error)?;
    if !stat.is_file() {
        return Err(TransportError::NotRegularFile(path.to_string()));
    }
    Ok(file)
}

/// Outcome of one non-blocking read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Data,
    Idle,
    Eof,
}

/// Append one read of `reader` to `into`, failing once it holds more than
/// `limit` bytes.
fn pump(reader: &mut impl Read, into: &mut Vec<u8>, limit: usize, buf: &mut [u8]) -> Result<Flow, TransportError> {
    match reader.read(buf) {
        Ok(0) => Ok(Flow::Eof),
        Ok(n) => {
            into.extend_from_slice(&buf[..n]);
            if into.len() > limit {
                return Err(TransportError::StreamLimitExceeded);
            }
            Ok(Flow::Data)
        }
        Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => Ok(Flow::Idle),
        Err(e) => Err(io_error(e)),
    }
}

/// Drain stdout and stderr side by side so a chatty stream never stalls the
/// remote end behind a full channel window.
fn drain_streams(
    mut stdout: impl Read,
    mut stderr: impl Read,
    stdout_limit: usize,
    stderr_limit: usize,
    deadline: Instant,
) -> Result<(String, String), TransportError> {
    let mut out = Vec::new();
    let mut err = Vec::new();
    let mut out_flow = Flow::Idle;
    let mut err_flow = Flow::Idle;
    let mut buf = vec![0u8; PIPE_CHUNK];

    while out_flow != Flow::Eof || err_flow != Flow::Eof {
        if out_flow != Flow::Eof {
            out_flow = pump(&mut stdout, &mut out, stdout_limit, &mut buf)?;
        }
        if err_flow != Flow::Eof {
            err_flow = pump(&mut stderr, &mut err, stderr_limit, &mut buf)?;
        }
        if out_flow != Flow::Data && err_flow != Flow::Data {
            if Instant::now() >= deadline {
                return Err(TransportError::Timeout);
            }
            std::thread::sleep(IDLE_POLL);
        }
    }
    Ok((
        String::from_utf8_lossy(&out).into_owned(),
        String::from_utf8_lossy(&err).into_owned(),
    ))
}

/// Copy at most `limit` bytes of `reader` into `send`, chunk by chunk.
fn copy_window(
    reader: impl Read,
    limit: u64,
    mut send: impl FnMut(&[u8]) -> Result<(), TransportError>,
) -> Result<(), TransportError> {
    let mut window = reader.take(limit);
    let mut buf = vec![0u8; PIPE_CHUNK];
    loop {
        let n = window.read(&mut buf).map_err(io_error)?;
        if n == 0 {
            return Ok(());
        }
        send(&buf[..n])?;
    }
}

fn remove_temp_files(sftp: &Sftp, paths: &[&str]) {
    for path in paths {
        if let Err(e) = sftp.unlink(Path::new(path)) {
            warn!("Failed to remove {}: {}", path, e);
        }
    }
}

fn execute_blocking(sess: &Session, request: ExecuteRequest) -> Result<ExecuteOutput, TransportError> {
    let sftp = sess.sftp().map_err(ssh_error)?;
    let root_run = format!("/tmp/farm-{}", uuid::Uuid::new_v4());
    let script = format!("/tmp/farm-{}", uuid::Uuid::new_v4());
    let run = format!("/tmp/farm-{}", uuid::Uuid::new_v4());

    let mut args = vec![
        transport::boot_time_arg(request.expected_boot_time),
        "/bin/bash".to_string(),
        script.clone(),
    ];
    args.extend(request.bundle.render_args(&request.args));
    let command = script::command_line(&root_run, &args);

    let result = (|| {
        write_file(&sftp, &root_run, ROOT_RUN.body.as_bytes())?;
        write_file(&sftp, &script, request.bundle.lock().body.as_bytes())?;
        write_file(&sftp, &run, command.as_bytes())?;

        let mut channel = sess.channel_session().map_err(ssh_error)?;
        channel
            .exec(&format!("/bin/bash {}", script::shell_escape(&run)))
            .map_err(ssh_error)?;
        sess.set_blocking(false);
        let drained = drain_streams(
            channel.stream(0),
            // The boot header rides on stderr.
            channel.stderr(),
            request.stdout_limit,
            request.stderr_limit.saturating_add(64),
            Instant::now() + request.timeout,
        );
        sess.set_blocking(true);
        let (stdout, stderr) = drained?;
        channel.wait_close().map_err(ssh_error)?;
        let exit_code = channel.exit_status().map_err(ssh_error)?;
        Ok::<_, TransportError>((exit_code, stdout, stderr))
    })();
    remove_temp_files(&sftp, &[&root_run, &script, &run]);

    let (exit_code, stdout, stderr) = result?;
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

fn stream_file(
    sess: &Session,
    path: &str,
    offset: u64,
    limit: u64,
    tx: &mpsc::Sender<Result<Vec<u8>, TransportError>>,
) -> Result<(), TransportError> {
    let sftp = sess.sftp().map_err(ssh_error)?;
    let mut file = open_regular(&sftp, path)?;
    file.seek(SeekFrom::Start(offset)).map_err(io_error)?;
    copy_window(file, limit, |chunk| {
        tx.blocking_send(Ok(chunk.to_vec()))
            .map_err(|_| TransportError::Protocol("pipe receiver closed".into()))
    })
}

#[async_trait::async_trait]
impl Transport for SshTransport {
    async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteOutput, TransportError> {
        let timeout = request.timeout;
        let operation = request.bundle.operation();
        debug!("Executing {} on {}", operation, self.target.host);
        let output = self.blocking(timeout, move |sess| execute_blocking(sess, request)).await?;
        debug!(
            "{} on {} exited {} (boot {})",
            operation, self.target.host, output.exit_code, output.boot_time
        );
        Ok(output)
    }

    async fn upload(&self, timeout: Duration, data: &[u8], path: &str) -> Result<(), TransportError> {
        let data = data.to_vec();
        let path = path.to_string();
        info!("Uploading {} bytes to {}:{}", data.len(), self.target.host, path);
        self.blocking(timeout, move |sess| {
            let sftp = sess.sftp().map_err(ssh_error)?;
            write_file(&sftp, &path, &data)
        })
        .await
    }

    async fn download(
        &self,
        timeout: Duration,
        path: &str,
        offset: u64,
        len: u64,
    ) -> Result<Vec<u8>, TransportError> {
        let path = path.to_string();
        let len = usize::try_from(len)
            .map_err(|_| TransportError::Protocol(format!("download of {} bytes too large", len)))?;
        self.blocking(timeout, move |sess| {
            let sftp = sess.sftp().map_err(ssh_error)?;
            let mut file = open_regular(&sftp, &path)?;
            file.seek(SeekFrom::Start(offset)).map_err(io_error)?;
            let mut buf = vec![0u8; len];
            file.read_exact(&mut buf).map_err(|e| match e.kind() {
                ErrorKind::UnexpectedEof => {
                    TransportError::Protocol(format!("{} holds fewer than {} bytes past {}", path, len, offset))
                }
                _ => io_error(e),
            })?;
            Ok(buf)
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
        let (tx, mut rx) = mpsc::channel(PIPE_DEPTH);
        let target = self.target.clone();
        let path = path.to_string();
        tokio::task::spawn_blocking(move || {
            let result = connect(&target, timeout).and_then(|sess| stream_file(&sess, &path, offset, limit, &tx));
            if let Err(e) = result {
                // The receiver is gone when the caller already timed out.
                let _ = tx.blocking_send(Err(e));
            }
        });

        let forward = async {
            while let Some(chunk) = rx.recv().await {
                sink.write_all(&chunk?).await?;
            }
            sink.flush().await?;
            Ok::<_, TransportError>(())
        };
        tokio::time::timeout(timeout, forward)
            .await
            .map_err(|_| TransportError::Timeout)?
    }

    async fn stat(&self, timeout: Duration, path: &str) -> Result<Option<StatResult>, TransportError> {
        let path = path.to_string();
        self.blocking(timeout, move |sess| {
            let sftp = sess.sftp().map_err(ssh_error)?;
            match sftp.stat(Path::new(&path)) {
                Ok(stat) => Ok(Some(StatResult {
                    uid: stat.uid.unwrap_or(0),
                    gid: stat.gid.unwrap_or(0),
                    len: stat.size.unwrap_or(0),
                    mode: stat.perm.unwrap_or(0),
                })),
                Err(e) if e.code() == ErrorCode::SFTP(SFTP_NO_SUCH_FILE) => Ok(None),
                Err(e) => Err(ssh_error(e)),
            }
        })
        .await
    }

    async fn delete(&self, timeout: Duration, path: &str) -> Result<(), TransportError> {
        let path = path.to_string();
        self.blocking(timeout, move |sess| {
            let sftp = sess.sftp().map_err(ssh_error)?;
            sftp.unlink(Path::new(&path)).map_err(ssh_error)
        })
        .await
    }
}
