mod support;

#[cfg(test)]
mod tests {
    use super::support::SimHost;
    use farm_core::config::ExecutorSettings;
    use farm_core::error::ExecutorError;
    use farm_core::executor::{Executor, HostExecutor};
    use farm_core::host::BootTime;
    use farm_core::script::Operation;
    use farm_core::task::{TaskConfiguration, TaskId, TaskResourceAllocation, TaskState};
    use std::collections::BTreeSet;

    const BOOT: u64 = 1_700_000_000;

    fn job() -> TaskId {
        TaskId::new("job1").unwrap()
    }

    async fn started_task(host: &std::sync::Arc<SimHost>) -> HostExecutor {
        let executor = HostExecutor::connect(host.clone(), ExecutorSettings::default())
            .await
            .unwrap();
        let config = TaskConfiguration::new("/work/job1", "render", vec!["sleep".into(), "60".into()]).unwrap();
        let cpus: BTreeSet<u64> = [0].into_iter().collect();
        let allocation = TaskResourceAllocation::new(cpus, 100_000, 0, 1 << 20).unwrap();
        executor.create_task(&job(), &config).await.unwrap();
        executor.allocate_task(&job(), &allocation).await.unwrap();
        executor.start_task(&job()).await.unwrap();
        executor
    }

    #[tokio::test]
    async fn test_reboot_makes_executor_stale() {
        let host = SimHost::new(BOOT);
        let executor = started_task(&host).await;
        host.reboot(BOOT + 600);

        match executor.check_task(&job()).await {
            Err(ExecutorError::Rebooted { expected, actual }) => {
                assert_eq!(expected, BOOT);
                assert_eq!(actual, BOOT + 600);
            }
            other => panic!("expected reboot error, got {:?}", other.map(|c| c.state())),
        }
        assert!(matches!(executor.check_host().await, Err(ExecutorError::Rebooted { .. })));
        assert!(matches!(executor.stop_task(&job()).await, Err(ExecutorError::Rebooted { .. })));
    }

    #[tokio::test]
    async fn test_reconnect_recovers_started_task() {
        let host = SimHost::new(BOOT);
        started_task(&host).await;
        host.reboot(BOOT + 600);

        let executor = HostExecutor::connect(host.clone(), ExecutorSettings::default())
            .await
            .unwrap();
        assert_eq!(executor.boot_time(), BootTime(BOOT + 600));

        let check = executor.check_task(&job()).await.unwrap();
        assert_eq!(check.state(), TaskState::Allocated);
        assert!(check.session_id().is_none());
        assert!(check.disk().is_some());
        executor.start_task(&job()).await.unwrap();
    }

    #[tokio::test]
    async fn test_partial_recovery_is_not_fatal() {
        let host = SimHost::new(BOOT);
        host.set_recovery_result(4, "Unable to recover task job1");
        let executor = HostExecutor::connect(host.clone(), ExecutorSettings::default()).await;
        assert!(executor.is_ok());
    }

    #[tokio::test]
    async fn test_critical_recovery_aborts() {
        let host = SimHost::new(BOOT);
        host.set_recovery_result(1, "disk full");
        assert!(matches!(
            HostExecutor::connect(host.clone(), ExecutorSettings::default()).await,
            Err(ExecutorError::Critical { stderr }) if stderr == "disk full"
        ));

        host.set_recovery_result(9, "");
        assert!(matches!(
            HostExecutor::connect(host.clone(), ExecutorSettings::default()).await,
            Err(ExecutorError::Unrecognized { code: 9, .. })
        ));
    }

    #[tokio::test]
    async fn test_resume_skips_recovery() {
        let host = SimHost::new(BOOT);
        let executor = HostExecutor::resume(host.clone(), BootTime(BOOT), ExecutorSettings::default());
        executor.check_host().await.unwrap();
        assert_eq!(host.operations(), vec![Operation::CheckHost]);

        let stale = HostExecutor::resume(host.clone(), BootTime(BOOT - 1), ExecutorSettings::default());
        assert!(matches!(stale.check_host().await, Err(ExecutorError::Rebooted { .. })));
    }

    #[tokio::test]
    async fn test_output_limit_is_enforced() {
        let host = SimHost::new(BOOT);
        let settings = ExecutorSettings {
            stdout_limit: 16,
            ..ExecutorSettings::default()
        };
        let executor = HostExecutor::connect(host.clone(), settings).await.unwrap();
        assert!(matches!(executor.check_host().await, Err(ExecutorError::StreamLimitExceeded)));
    }
}
