//! # Monitor Configuration Check
//!
//! Loads the layered configuration the pipeline would start with, validates
//! it and prints a summary.
//!
//! ```bash
//! check_config                  # ./config, environment from VITALS_ENV
//! check_config config/ test     # explicit directory and environment
//! check_config --json           # print the merged configuration as JSON
//! ```

use anyhow::Context;
use std::path::PathBuf;
use vitals_core::config::{ConfigManager, LogFormat, LoggingConfig};
use vitals_core::logging::init_structured_logging;

fn main() -> anyhow::Result<()> {
    let mut json = false;
    let mut positional = Vec::new();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--json" => json = true,
            _ => positional.push(arg),
        }
    }

    init_structured_logging(&LoggingConfig {
        level: Some("warn".to_string()),
        format: LogFormat::Pretty,
    });

    let config_dir = positional.first().map(PathBuf::from);
    let environment = positional
        .get(1)
        .cloned()
        .unwrap_or_else(ConfigManager::detect_environment);

    let manager = ConfigManager::load_from_directory_with_env(config_dir, &environment)
        .with_context(|| format!("configuration for environment '{environment}' is invalid"))?;
    let config = manager.config();

    if json {
        println!("{}", serde_json::to_string_pretty(config)?);
        return Ok(());
    }

    println!("Configuration valid for environment '{}'", manager.environment());
    if let Some(dir) = manager.config_directory() {
        println!("  directory:            {}", dir.display());
    }
    println!("  device:               {}", config.device.device_id);
    println!("  vitals capacity:      {}", config.cache.vitals_capacity);
    println!("  waveform window:      {}s", config.cache.waveform_window_seconds);
    println!("  alarm thresholds:     {}", config.alarms.thresholds.len());
    for threshold in &config.alarms.thresholds {
        println!(
            "    {:<18} low={:<8} high={:<8} priority={}",
            threshold.vital.to_string(),
            threshold.low.map_or("-".to_string(), |v| v.to_string()),
            threshold.high.map_or("-".to_string(), |v| v.to_string()),
            threshold.priority
        );
    }
    println!("  hysteresis samples:   {}", config.alarms.hysteresis_samples);
    println!(
        "  flush:                every {}s or {} records, chunks of {}",
        config.persistence.flush_interval_seconds,
        config.persistence.flush_threshold,
        config.persistence.chunk_size
    );
    println!(
        "  retention:            vitals {}d, alarms {}d, ceiling {} bytes",
        config.retention.vitals_retention_days,
        config.retention.alarms_retention_days,
        config.retention.size_ceiling_bytes
    );
    println!("  storage backend:      {:?}", config.storage.backend);
    println!(
        "  telemetry:            {}",
        if config.telemetry.enabled {
            format!("every {}s", config.telemetry.cadence_seconds)
        } else {
            "disabled".to_string()
        }
    );
    Ok(())
}
