use farm_core::executor::Executor;
use farm_core::task::{TaskConfiguration, TaskId, TaskResourceAllocation};
use farm_core::telemetry::cpuset;

pub async fn create(
    executor: &dyn Executor,
    id: &TaskId,
    work_path: &str,
    user: &str,
    command: Vec<String>,
) -> anyhow::Result<()> {
    let configuration = TaskConfiguration::new(work_path, user, command)?;
    executor.create_task(id, &configuration).await?;
    println!("Task {} created.", id);
    Ok(())
}

/// Build an allocation from CLI arguments. `cpus` takes the cpuset list
/// syntax, e.g. `0-3,8`.
pub fn allocation(cpus: &str, slice: u64, memory: u64, disk: u64) -> anyhow::Result<TaskResourceAllocation> {
    Ok(TaskResourceAllocation::new(cpuset::parse(cpus)?, slice, memory, disk)?)
}

pub async fn allocate(executor: &dyn Executor, id: &TaskId, allocation: TaskResourceAllocation) -> anyhow::Result<()> {
    executor.allocate_task(id, &allocation).await?;
    println!("Task {} allocated on cpus {}.", id, allocation.cpu_list());
    Ok(())
}

pub async fn reallocate(executor: &dyn Executor, id: &TaskId, allocation: TaskResourceAllocation) -> anyhow::Result<()> {
    executor.reallocate_task(id, &allocation).await?;
    println!("Task {} reallocated on cpus {}.", id, allocation.cpu_list());
    Ok(())
}

pub async fn deallocate(executor: &dyn Executor, id: &TaskId) -> anyhow::Result<()> {
    executor.deallocate_task(id).await?;
    println!("Task {} deallocated.", id);
    Ok(())
}

pub async fn destroy(executor: &dyn Executor, id: &TaskId) -> anyhow::Result<()> {
    executor.destroy_task(id).await?;
    println!("Task {} destroyed.", id);
    Ok(())
}

pub async fn start(executor: &dyn Executor, id: &TaskId) -> anyhow::Result<()> {
    executor.start_task(id).await?;
    println!("Task {} started.", id);
    Ok(())
}

pub async fn stop(executor: &dyn Executor, id: &TaskId) -> anyhow::Result<()> {
    executor.stop_task(id).await?;
    println!("Task {} stopped.", id);
    Ok(())
}

pub async fn backup(executor: &dyn Executor, id: &TaskId, path: &str) -> anyhow::Result<()> {
    executor.backup_task_disk(id, path).await?;
    println!("Disk of task {} backed up to {}.", id, path);
    Ok(())
}

pub async fn restore(executor: &dyn Executor, id: &TaskId, path: &str) -> anyhow::Result<()> {
    executor.restore_task_disk(id, path).await?;
    println!("Disk of task {} restored from {}.", id, path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_from_args() {
        let res = allocation("0-1,4", 250_000, 1 << 30, 0).unwrap();
        assert_eq!(res.cpu_list(), "0,1,4");
        assert!(allocation("0", 200_000, 0, 0).is_err());
        assert!(allocation("x", 1, 0, 0).is_err());
    }
}
