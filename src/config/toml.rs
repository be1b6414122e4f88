//! TOML configuration file parsing

use super::{validator, Config, ConfigFile};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Parse TOML configuration file
pub fn parse_toml_file(path: &Path) -> Result<ConfigFile> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_toml_string(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse TOML configuration from string
pub fn parse_toml_string(contents: &str) -> Result<ConfigFile> {
    let config: ConfigFile = ::toml::from_str(contents)
        .context("Failed to parse TOML configuration")?;

    Ok(config)
}

/// Read, parse and validate a run description
///
/// Validation failures keep their [`ConfigError`](crate::error::ConfigError)
/// as the root cause so callers can map them to an exit status.
pub fn load_config(path: &Path) -> Result<Config> {
    let file = parse_toml_file(path)?;
    let config = validator::resolve(&file)
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_toml_string() {
        let config = parse_toml_string(
            r#"
            [jobs.one]
            target = "/tmp/one"
            size = 4096
            "#,
        )
        .unwrap();
        assert_eq!(config.jobs.len(), 1);
        assert!(config.order.is_none());
    }

    #[test]
    fn test_parse_toml_rejects_garbage() {
        assert!(parse_toml_string("[jobs.one\ntarget =").is_err());
    }

    #[test]
    fn test_load_config() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("t.dat");

        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            order = "w,barrier,r"

            [global]
            size = "1m"
            runtime = "2s"
            target = "{}"

            [jobs.w]
            access = "100:write:64k"

            [jobs.r]
            access = "100:randread:4k"
            iodepth = 4
            "#,
            target.display()
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.jobs.len(), 2);
        assert_eq!(config.order.len(), 2);
        let r = config.job("r").unwrap();
        assert_eq!(r.iodepth, 4);
        assert_eq!(r.size, 1 << 20);
        assert_eq!(r.target, target);
    }

    #[test]
    fn test_load_config_keeps_config_error() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "[jobs.a]\ntarget = \"/tmp/a\"\nsize = 4096\niodepth = 0\n").unwrap();

        let err = load_config(file.path()).unwrap_err();
        assert!(err.downcast_ref::<ConfigError>().is_some());
    }

    #[test]
    fn test_missing_file() {
        assert!(parse_toml_file(Path::new("/nonexistent/iodrive.toml")).is_err());
    }
}
