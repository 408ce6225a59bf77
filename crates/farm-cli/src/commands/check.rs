use farm_core::executor::Executor;
use farm_core::task::{TaskCheckResult, TaskId};

pub async fn run(executor: &dyn Executor, id: &TaskId, json: bool) -> anyhow::Result<()> {
    let check = executor.check_task(id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&check)?);
    } else {
        print_task(id, &check);
    }
    Ok(())
}

fn print_task(id: &TaskId, check: &TaskCheckResult) {
    let cfg = check.configuration();
    println!("Task:      {}", id);
    println!("State:     {}", check.state());
    println!("Work path: {}", cfg.work_path());
    println!("User:      {}", cfg.user());
    println!("Command:   {}", cfg.command().join(" "));

    if let Some(res) = check.resource_allocation() {
        println!("CPUs:      {} (slice {})", res.cpu_list(), res.scheduler_slice());
        println!("Memory:    {} bytes", res.memory_limit());
        println!("Disk:      {} bytes", res.disk_limit());
    }
    if let Some(sid) = check.session_id() {
        println!("Session:   {}", sid);
    }
    if let Some(pids) = check.pids() {
        let pids: Vec<String> = pids.iter().map(u32::to_string).collect();
        println!("PIDs:      {}", if pids.is_empty() { "-".to_string() } else { pids.join(", ") });
    }
    if let Some(code) = check.exit_code() {
        println!("Exit:      {}", code);
    }
    if let Some(disk) = check.disk() {
        println!("Mounted:   {} (used {}, avail {})", disk.target, disk.used, disk.available);
    }
    if let Some(mem) = check.memory() {
        println!("Usage:     rss {} cache {} swap {}", mem.rss, mem.cache, mem.swap);
    }
}
