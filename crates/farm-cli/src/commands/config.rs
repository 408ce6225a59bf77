use farm_core::Config;
use std::path::Path;

const SAMPLE_CONFIG: &str = r#"# Render farm host executor configuration

hosts:
  - name: farm01
    type: ssh
    host: 192.168.0.21
    user: farm
    key_path: ~/.ssh/farm_ed25519
    labels:
      - blender
      - gpu

  - name: farm02
    type: ssh
    host: 192.168.0.22
    port: 2222
    user: farm
    labels:
      - blender

  - name: workstation
    type: local
    labels:
      - preview

defaults:
  operation_timeout_ms: 60000
  recovery_timeout_ms: 60000
  stdout_limit: 1048576
  stderr_limit: 1048576
"#;

pub async fn run(config_path: &Path, path: bool, init: bool) -> anyhow::Result<()> {
    if path {
        println!("{}", config_path.display());
        return Ok(());
    }

    if init {
        if config_path.exists() {
            println!("Config already exists at: {}", config_path.display());
            println!("Remove it first if you want to reinitialize.");
            return Ok(());
        }

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(config_path, SAMPLE_CONFIG)?;
        println!("Sample config written to: {}", config_path.display());
        return Ok(());
    }

    println!("Config path: {}", config_path.display());
    if config_path.exists() {
        let config = Config::load_from(config_path)?;
        println!("Hosts:       {}", config.hosts.len());
        for h in &config.hosts {
            println!("  - {} ({})", h.name, h.host_type);
        }
        println!(
            "Timeouts:    {} ms per operation, {} ms for recovery",
            config.defaults.operation_timeout_ms, config.defaults.recovery_timeout_ms
        );
    } else {
        println!("Status:      not found");
        println!("Run `farm-host config --init` to create one.");
    }

    Ok(())
}
