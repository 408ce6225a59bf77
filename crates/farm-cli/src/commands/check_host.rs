use farm_core::executor::Executor;
use farm_core::host::HostCheckResult;

pub async fn run(executor: &dyn Executor, json: bool) -> anyhow::Result<()> {
    let host = executor.check_host().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&host)?);
    } else {
        print_host(executor, &host);
    }
    Ok(())
}

fn print_host(executor: &dyn Executor, host: &HostCheckResult) {
    let boot = executor.boot_time();
    println!("System:  {}", host.system());
    match boot.as_datetime() {
        Some(at) => {
            let up = chrono::Utc::now().signed_duration_since(at);
            println!(
                "Booted:  {} ({}, up {}h {:02}m)",
                at.to_rfc3339(),
                boot,
                up.num_hours(),
                up.num_minutes() % 60
            );
        }
        None => println!("Booted:  {}", boot),
    }
    println!("Swap accounting: {}", if host.swap_enabled() { "enabled" } else { "disabled" });

    let mem = host.memory();
    println!(
        "Memory:  {} MiB free of {} MiB, swap {} MiB free of {} MiB",
        mem.mem_free >> 20,
        mem.mem_total >> 20,
        mem.swap_free >> 20,
        mem.swap_total >> 20
    );

    println!("CPUs:");
    for p in host.processors() {
        println!(
            "  cpu{:<4} socket {:<3} core {:<4} {:>5.1}%  {}",
            p.processor_id(),
            p.physical_id(),
            p.core_id(),
            p.usage() * 100.0,
            p.model()
        );
    }

    println!("Mounts:");
    for m in host.mounts() {
        println!("  {:<30} used {:>14}  avail {:>14}", m.target, m.used, m.available);
    }

    println!("Tasks:   {}", host.tasks().len());
    for id in host.tasks() {
        println!("  - {}", id);
    }
}
