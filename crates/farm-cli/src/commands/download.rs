use farm_core::executor::Executor;
use farm_core::task::TaskId;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWrite;

/// Copy a file from the task disk to `output`, or stdout.
pub async fn run(
    executor: &dyn Executor,
    id: &TaskId,
    path: &str,
    offset: u64,
    limit: u64,
    timeout: Duration,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let mut sink: Box<dyn AsyncWrite + Unpin + Send> = match output {
        Some(file) => Box::new(tokio::fs::File::create(file).await?),
        None => Box::new(tokio::io::stdout()),
    };
    executor
        .download_task_file(id, path, offset, limit, timeout, sink.as_mut())
        .await?;
    Ok(())
}
