//! Engine configuration loader.
//!
//! Reads `config.toml` from the data directory (`~/.autopilot/` by default)
//! into [`EngineConfig`]. A missing file yields the defaults; an unreadable
//! or malformed one yields the defaults with a warning.

use std::path::{Path, PathBuf};

use autopilot_types::config::EngineConfig;

/// Resolve the data directory.
///
/// Priority:
/// 1. `AUTOPILOT_DATA_DIR` environment variable
/// 2. `~/.autopilot`
/// 3. `./.autopilot`
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("AUTOPILOT_DATA_DIR") {
        return PathBuf::from(dir);
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".autopilot");
    }
    PathBuf::from(".autopilot")
}

/// Load `{data_dir}/config.toml`, clamped with [`EngineConfig::normalized`].
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => config.normalized(),
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            EngineConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_engine_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config, EngineConfig::default());
    }

    #[tokio::test]
    async fn test_load_engine_config_valid_toml_is_normalized() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            r#"
concurrency_limit = 0
max_retries = 5
backoff_secs = []

[gate]
denied_orgs = ["org_frozen"]
"#,
        )
        .await
        .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.concurrency_limit, 1);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.backoff_secs, vec![1, 4, 16]);
        assert_eq!(config.gate.denied_orgs, vec!["org_frozen"]);
    }

    #[tokio::test]
    async fn test_load_engine_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "concurrency_limit = \"many\"")
            .await
            .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_resolve_data_dir_ends_with_autopilot_dir() {
        if std::env::var("AUTOPILOT_DATA_DIR").is_err() {
            assert!(resolve_data_dir().ends_with(".autopilot"));
        }
    }
}
