//! Configuration loading

use tracing::info;

use crate::{Config, Error, Result};

/// Load configuration from config file or environment variables
///
/// Config file search order:
/// 1. `HUDDLE_CONFIG_PATH` environment variable (explicit path)
/// 2. ./config.yaml (current working directory)
/// 3. /config/config.yaml (container mount path)
/// 4. Fall back to environment variables only
pub fn load_config() -> Result<Config> {
    let config_path = std::env::var("HUDDLE_CONFIG_PATH")
        .ok()
        .filter(|p| std::path::Path::new(p).exists())
        .or_else(|| existing("config.yaml"))
        .or_else(|| existing("/config/config.yaml"));

    load_config_from(config_path.as_deref())
}

/// Load and validate configuration from an explicit (optional) file
pub fn load_config_from(path: Option<&str>) -> Result<Config> {
    // Logging is not up yet, so report through stderr
    let config = match path {
        Some(path) => {
            eprintln!("Loading config from {path}");
            Config::from_file(path)?
        }
        None => {
            eprintln!("No config file found, using environment variables");
            Config::from_env()?
        }
    };

    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("Config validation error: {error}");
        }
        return Err(Error::Internal(format!(
            "Configuration validation failed with {} error(s): {}",
            errors.len(),
            errors.join("; ")
        )));
    }

    info!("Configuration loaded and validated successfully");
    Ok(config)
}

fn existing(path: &str) -> Option<String> {
    std::path::Path::new(path)
        .exists()
        .then(|| path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_invalid_file_fails_validation() {
        let mut file = tempfile::Builder::new()
            .suffix(".yaml")
            .tempfile()
            .unwrap();
        writeln!(file, "media:\n  rtc_min_port: 30000\n  rtc_max_port: 20000\n").unwrap();

        let err = load_config_from(file.path().to_str()).unwrap_err();
        assert!(err.to_string().contains("port range"));
    }

    #[test]
    fn test_valid_file_loads() {
        let mut file = tempfile::Builder::new()
            .suffix(".yaml")
            .tempfile()
            .unwrap();
        writeln!(file, "logging:\n  format: json\n").unwrap();

        let config = load_config_from(file.path().to_str()).unwrap();
        assert_eq!(config.logging.format, "json");
    }
}
