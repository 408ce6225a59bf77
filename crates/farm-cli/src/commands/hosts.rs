use farm_core::config::Config;

pub async fn run(config: &Config, labels: &[String], json: bool) -> anyhow::Result<()> {
    let hosts = config.find_by_labels(labels);
    if hosts.is_empty() {
        println!("No hosts configured.");
        println!("Run `farm-host config --init` to create a sample config.");
        return Ok(());
    }

    if json {
        let entries: Vec<serde_json::Value> = hosts
            .iter()
            .map(|h| {
                serde_json::json!({
                    "name": h.name,
                    "type": h.host_type.to_string(),
                    "host": h.host,
                    "labels": h.labels,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        println!("{:<15} {:<8} {:<20} {}", "NAME", "TYPE", "HOST", "LABELS");
        println!("{}", "-".repeat(60));
        for h in hosts {
            println!(
                "{:<15} {:<8} {:<20} {}",
                h.name,
                h.host_type,
                h.host.as_deref().unwrap_or("-"),
                h.labels.join(", "),
            );
        }
    }

    Ok(())
}
