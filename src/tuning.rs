//! Auto-tuning module
//!
//! Detects hardware capabilities and calculates server settings, then
//! merges them with the configured overrides into the option files written
//! to the instance's include directory.

use std::collections::BTreeMap;

use sysinfo::System;

use crate::config::TuningConfig;

/// Name of the option file holding the `[mysqld]` tuning values
pub const TUNING_FILE: &str = "tuning.cnf";

/// Name of the option file holding log retention settings
pub const LOGGING_FILE: &str = "logging.cnf";

/// Tuned configuration values based on hardware detection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunedConfig {
    /// Maximum client connections
    pub max_connections: u32,
    /// InnoDB buffer pool size in MB
    pub innodb_buffer_pool_mb: u64,
    /// InnoDB buffer pool instances
    pub innodb_buffer_pool_instances: u64,
    /// Detected CPU cores
    pub detected_cores: usize,
    /// Detected RAM in MB
    pub detected_ram_mb: u64,
}

impl Default for TunedConfig {
    fn default() -> Self {
        tune_for(4, 8192)
    }
}

/// Detect the number of available CPU cores
pub fn detect_cpu_cores() -> usize {
    let sys = System::new_all();
    sys.cpus().len().max(1)
}

/// Detect total RAM in megabytes
pub fn detect_ram_mb() -> u64 {
    let sys = System::new_all();
    sys.total_memory() / 1024 / 1024
}

/// Auto-tune based on detected hardware
pub fn auto_tune() -> TunedConfig {
    let config = tune_for(detect_cpu_cores(), detect_ram_mb());

    tracing::info!(
        cores = config.detected_cores,
        ram_mb = config.detected_ram_mb,
        max_connections = config.max_connections,
        buffer_pool_mb = config.innodb_buffer_pool_mb,
        buffer_pool_instances = config.innodb_buffer_pool_instances,
        "Auto-tuned server settings based on hardware"
    );

    config
}

/// Calculate settings for the given hardware
///
/// Allocation strategy:
/// - InnoDB buffer pool gets 70% of RAM (min 128 MB)
/// - One buffer pool instance per GB of pool, between 1 and 8
/// - 50 connections per core, between 100 and 1000
pub fn tune_for(cores: usize, ram_mb: u64) -> TunedConfig {
    let cores = cores.max(1);

    let innodb_buffer_pool_mb = (ram_mb * 70 / 100).max(128);
    let innodb_buffer_pool_instances = (innodb_buffer_pool_mb / 1024).clamp(1, 8);
    let max_connections = (cores as u32).saturating_mul(50).clamp(100, 1000);

    TunedConfig {
        max_connections,
        innodb_buffer_pool_mb,
        innodb_buffer_pool_instances,
        detected_cores: cores,
        detected_ram_mb: ram_mb,
    }
}

/// Option files to write, keyed by file name, then section, then option
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TuningSet {
    files: BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>,
}

impl TuningSet {
    /// Set an option in a file section
    pub fn set(&mut self, file: &str, section: &str, key: &str, value: impl ToString) {
        self.files
            .entry(file.to_string())
            .or_default()
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    /// Look up an option
    pub fn get(&self, file: &str, section: &str, key: &str) -> Option<&str> {
        self.files
            .get(file)?
            .get(section)?
            .get(key)
            .map(String::as_str)
    }

    /// Render every file as `(file name, content)`
    pub fn render(&self) -> Vec<(String, String)> {
        self.files
            .iter()
            .map(|(file, sections)| {
                let mut out = String::from("# Managed by myconverge\n");
                for (section, options) in sections {
                    out.push_str(&format!("\n[{}]\n", section));
                    for (key, value) in options {
                        out.push_str(&format!("{} = {}\n", key, value));
                    }
                }
                (file.clone(), out)
            })
            .collect()
    }
}

/// Merge the fixed customizations, configured values and tuned values.
///
/// Explicit configuration always wins over tuned values.
pub fn build_tuning_set(config: &TuningConfig, tuned: Option<&TunedConfig>) -> TuningSet {
    let mut set = TuningSet::default();

    set.set(TUNING_FILE, "mysqld", "innodb_log_files_in_group", 2);

    if let Some(tuned) = tuned.filter(|_| config.auto) {
        set.set(TUNING_FILE, "mysqld", "max_connections", tuned.max_connections);
        set.set(
            TUNING_FILE,
            "mysqld",
            "innodb_buffer_pool_size",
            format!("{}M", tuned.innodb_buffer_pool_mb),
        );
        set.set(
            TUNING_FILE,
            "mysqld",
            "innodb_buffer_pool_instances",
            tuned.innodb_buffer_pool_instances,
        );
    }

    if let Some(max_connections) = config.max_connections {
        set.set(TUNING_FILE, "mysqld", "max_connections", max_connections);
    }

    if let Some(days) = config.expire_logs_days {
        set.set(LOGGING_FILE, "mysqld", "expire_logs_days", days);
    }

    for (key, value) in &config.overrides {
        set.set(TUNING_FILE, "mysqld", key, value);
    }

    set
}

/// Get a human-readable summary of the tuned configuration
pub fn tuning_summary(config: &TunedConfig) -> String {
    format!(
        "Detected: {} cores, {} MB RAM\n\
         MySQL: max_connections={}, innodb_buffer_pool_size={}M, innodb_buffer_pool_instances={}",
        config.detected_cores,
        config.detected_ram_mb,
        config.max_connections,
        config.innodb_buffer_pool_mb,
        config.innodb_buffer_pool_instances,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_tune_returns_sensible_values() {
        let config = auto_tune();

        assert!(config.max_connections >= 100);
        assert!(config.max_connections <= 1000);
        assert!(config.innodb_buffer_pool_mb >= 128);
        assert!((1..=8).contains(&config.innodb_buffer_pool_instances));
    }

    #[test]
    fn test_detection_returns_positive_values() {
        let cores = detect_cpu_cores();
        let ram = detect_ram_mb();

        assert!(cores >= 1);
        assert!(ram > 0);
    }

    #[test]
    fn test_tune_for_known_hardware() {
        let tuned = tune_for(8, 16384);
        assert_eq!(tuned.max_connections, 400);
        assert_eq!(tuned.innodb_buffer_pool_mb, 11468);
        assert_eq!(tuned.innodb_buffer_pool_instances, 8);

        let small = tune_for(0, 256);
        assert_eq!(small.detected_cores, 1);
        assert_eq!(small.max_connections, 100);
        assert_eq!(small.innodb_buffer_pool_mb, 179);
        assert_eq!(small.innodb_buffer_pool_instances, 1);
    }

    #[test]
    fn test_explicit_values_override_tuned() {
        let config = TuningConfig {
            max_connections: Some(42),
            expire_logs_days: Some(3),
            ..Default::default()
        };
        let set = build_tuning_set(&config, Some(&tune_for(4, 4096)));

        assert_eq!(set.get(TUNING_FILE, "mysqld", "innodb_log_files_in_group"), Some("2"));
        assert_eq!(set.get(TUNING_FILE, "mysqld", "max_connections"), Some("42"));
        assert_eq!(set.get(LOGGING_FILE, "mysqld", "expire_logs_days"), Some("3"));
        assert_eq!(
            set.get(TUNING_FILE, "mysqld", "innodb_buffer_pool_size"),
            Some("2867M")
        );
    }

    #[test]
    fn test_manual_tuning_renders_only_tuning_file() {
        let config = TuningConfig {
            auto: false,
            ..Default::default()
        };
        let files = build_tuning_set(&config, Some(&TunedConfig::default())).render();

        assert_eq!(files.len(), 1);
        let (name, content) = &files[0];
        assert_eq!(name, TUNING_FILE);
        assert!(content.contains("[mysqld]\ninnodb_log_files_in_group = 2\n"));
        assert!(!content.contains("max_connections"));
    }
}
