use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use commands::task;
use farm_core::executor::Executor;
use farm_core::task::{TaskId, TaskResourceAllocation};
use farm_core::Config;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod commands;
mod dispatch;

#[derive(Parser)]
#[command(name = "farm-host")]
#[command(about = "Drive render tasks on farm hosts", long_about = None)]
struct Cli {
    /// Config file (default: ~/.config/renderfarm/hosts.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Boot time from an earlier session; skips recovery
    #[arg(long, global = true)]
    boot_time: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

/// Host and task addressed by a task command.
#[derive(Args)]
struct Target {
    /// Host name from the config
    host: String,

    /// Task ID
    task_id: String,
}

#[derive(Args)]
struct Allocation {
    /// CPU list, e.g. 0-3,8
    #[arg(long)]
    cpus: String,

    /// CFS quota per 100000 period
    #[arg(long)]
    slice: u64,

    /// Memory limit in bytes (0 = unbounded)
    #[arg(long, default_value = "0")]
    memory: u64,

    /// Disk image size in bytes (0 = no disk)
    #[arg(long, default_value = "0")]
    disk: u64,
}

impl Allocation {
    fn build(&self) -> Result<TaskResourceAllocation> {
        task::allocation(&self.cpus, self.slice, self.memory, self.disk)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show or initialize the config file
    Config {
        /// Print the config path only
        #[arg(long)]
        path: bool,

        /// Write a sample config
        #[arg(long)]
        init: bool,
    },

    /// List configured hosts
    Hosts {
        /// Only hosts carrying these labels
        #[arg(short, long)]
        label: Vec<String>,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Report hardware, usage and tracked tasks of a host
    CheckHost {
        host: String,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Register a task
    Create {
        #[command(flatten)]
        target: Target,

        /// Working directory of the task
        #[arg(long)]
        work_path: String,

        /// User the command runs as
        #[arg(long)]
        user: String,

        /// Program and arguments
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Remove a task and everything it owns
    Destroy {
        #[command(flatten)]
        target: Target,
    },

    /// Reserve cgroups and disk for a task
    Allocate {
        #[command(flatten)]
        target: Target,

        #[command(flatten)]
        allocation: Allocation,
    },

    /// Change the resources of an allocated task
    Reallocate {
        #[command(flatten)]
        target: Target,

        #[command(flatten)]
        allocation: Allocation,
    },

    /// Release the resources of a task
    Deallocate {
        #[command(flatten)]
        target: Target,
    },

    /// Launch the task command
    Start {
        #[command(flatten)]
        target: Target,
    },

    /// Terminate the task command
    Stop {
        #[command(flatten)]
        target: Target,
    },

    /// Show task state and usage
    Check {
        #[command(flatten)]
        target: Target,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Copy the task disk image to a host path
    Backup {
        #[command(flatten)]
        target: Target,

        /// Absolute path on the host
        path: String,
    },

    /// Replace the task disk image from a host path
    Restore {
        #[command(flatten)]
        target: Target,

        /// Absolute path on the host
        path: String,
    },

    /// Read a file from the task disk
    Download {
        #[command(flatten)]
        target: Target,

        /// Absolute path inside the task disk
        path: String,

        #[arg(long, default_value = "0")]
        offset: u64,

        /// Maximum bytes to copy
        #[arg(long, default_value = "1073741824")]
        limit: u64,

        /// Write here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long, default_value = "600000")]
        timeout_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let boot_time = cli.boot_time;

    match cli.command {
        Commands::Config { path, init } => commands::config::run(&config_path, path, init).await?,
        Commands::Hosts { label, json } => {
            let config = Config::load_or_empty(&config_path)?;
            commands::hosts(&config, &label, json).await?;
        }
        Commands::CheckHost { host, json } => {
            let config = Config::load_or_empty(&config_path)?;
            let executor = dispatch::create_executor(&config, &host, boot_time).await?;
            commands::check_host(executor.as_ref(), json).await?;
        }
        Commands::Create { target, work_path, user, command } => {
            let (id, executor) = open(&config_path, boot_time, &target).await?;
            task::create(executor.as_ref(), &id, &work_path, &user, command).await?;
        }
        Commands::Destroy { target } => {
            let (id, executor) = open(&config_path, boot_time, &target).await?;
            task::destroy(executor.as_ref(), &id).await?;
        }
        Commands::Allocate { target, allocation } => {
            let res = allocation.build()?;
            let (id, executor) = open(&config_path, boot_time, &target).await?;
            task::allocate(executor.as_ref(), &id, res).await?;
        }
        Commands::Reallocate { target, allocation } => {
            let res = allocation.build()?;
            let (id, executor) = open(&config_path, boot_time, &target).await?;
            task::reallocate(executor.as_ref(), &id, res).await?;
        }
        Commands::Deallocate { target } => {
            let (id, executor) = open(&config_path, boot_time, &target).await?;
            task::deallocate(executor.as_ref(), &id).await?;
        }
        Commands::Start { target } => {
            let (id, executor) = open(&config_path, boot_time, &target).await?;
            task::start(executor.as_ref(), &id).await?;
        }
        Commands::Stop { target } => {
            let (id, executor) = open(&config_path, boot_time, &target).await?;
            task::stop(executor.as_ref(), &id).await?;
        }
        Commands::Check { target, json } => {
            let (id, executor) = open(&config_path, boot_time, &target).await?;
            commands::check(executor.as_ref(), &id, json).await?;
        }
        Commands::Backup { target, path } => {
            let (id, executor) = open(&config_path, boot_time, &target).await?;
            task::backup(executor.as_ref(), &id, &path).await?;
        }
        Commands::Restore { target, path } => {
            let (id, executor) = open(&config_path, boot_time, &target).await?;
            task::restore(executor.as_ref(), &id, &path).await?;
        }
        Commands::Download { target, path, offset, limit, output, timeout_ms } => {
            let (id, executor) = open(&config_path, boot_time, &target).await?;
            commands::download(
                executor.as_ref(),
                &id,
                &path,
                offset,
                limit,
                Duration::from_millis(timeout_ms),
                output.as_deref(),
            )
            .await?;
        }
    }

    Ok(())
}

/// Validate the task id, then connect to its host.
async fn open(config_path: &Path, boot_time: Option<u64>, target: &Target) -> Result<(TaskId, Box<dyn Executor>)> {
    let id = TaskId::new(target.task_id.as_str())?;
    let config = Config::load_or_empty(config_path)?;
    let executor = dispatch::create_executor(&config, &target.host, boot_time).await?;
    Ok((id, executor))
}
