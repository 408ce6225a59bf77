pub mod config;
pub mod error;
pub mod executor;
pub mod framing;
pub mod host;
pub mod script;
pub mod task;
pub mod telemetry;
pub mod transport;

pub use config::{Config, ExecutorSettings, HostConfig, HostType};
pub use error::{ExecutorError, ParseError, TransportError, ValidationError};
pub use executor::{Executor, HostExecutor};
pub use host::{BootTime, HostCheckResult};
pub use script::{Operation, ScriptBundle};
pub use task::{TaskCheckResult, TaskConfiguration, TaskId, TaskResourceAllocation, TaskState};
pub use transport::{ExecuteOutput, ExecuteRequest, StatResult, Transport};
