use crate::error::ParseError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelConfigEntry {
    pub key: String,
    pub value: String,
}

/// Parse a kernel build config (`/boot/config-*`, `/proc/config.gz`).
/// Comments, blank lines and lines without `=` are skipped.
pub fn parse(text: &str) -> Result<Vec<KernelConfigEntry>, ParseError> {
    let entries = text
        .lines()
        .map(|line| line.split_once('#').map_or(line, |(before, _)| before).trim())
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| KernelConfigEntry {
            key: key.to_string(),
            value: value.to_string(),
        })
        .collect();
    Ok(entries)
}

/// True when `key` is set to `y`.
pub fn is_enabled(entries: &[KernelConfigEntry], key: &str) -> bool {
    entries.iter().any(|e| e.key == key && e.value == "y")
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = "#
# Automatically generated file; DO NOT EDIT.
# Linux/x86 4.15.0 Kernel Configuration
CONFIG_64BIT=y
CONFIG_X86_64=y

# CONFIG_MEMCG_SWAP_ENABLED is not set
CONFIG_DEFAULT_HOSTNAME=\"(none)\"
not a config line
CONFIG_MEMCG=y
";

    #[test]
    fn test_parse() {
        let entries = parse(CONFIG).unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].key, "CONFIG_64BIT");
        assert_eq!(entries[2].value, "\"(none)\"");
        assert!(is_enabled(&entries, "CONFIG_MEMCG"));
        assert!(!is_enabled(&entries, "CONFIG_MEMCG_SWAP_ENABLED"));
    }

    #[test]
    fn test_empty() {
        assert!(parse("").unwrap().is_empty());
    }
}
