use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::PathBuf;
use std::time::Duration;

use plate_core::db::DEFAULT_BUSY_TIMEOUT;

pub struct Config {
    pub db_path: PathBuf,
    pub data_dir: PathBuf,
    pub busy_timeout: Duration,
}

impl Config {
    /// Resolve paths from the platform data directory. `PLATE_DB` overrides
    /// the database file and `PLATE_BUSY_TIMEOUT_MS` the SQLite busy timeout.
    pub fn load() -> Result<Self> {
        let proj_dirs =
            ProjectDirs::from("", "", "plate").context("Could not determine home directory")?;

        Self::resolve(
            proj_dirs.data_dir().to_path_buf(),
            std::env::var("PLATE_DB").ok(),
            std::env::var("PLATE_BUSY_TIMEOUT_MS").ok(),
        )
    }

    fn resolve(
        data_dir: PathBuf,
        db_override: Option<String>,
        busy_timeout_ms: Option<String>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let db_path = match db_override.filter(|p| !p.trim().is_empty()) {
            Some(path) => PathBuf::from(path),
            None => data_dir.join("plate.db"),
        };

        let busy_timeout = match busy_timeout_ms {
            Some(raw) => {
                let ms: u64 = raw.trim().parse().with_context(|| {
                    format!("Invalid PLATE_BUSY_TIMEOUT_MS '{raw}'. Use a number of milliseconds")
                })?;
                Duration::from_millis(ms)
            }
            None => DEFAULT_BUSY_TIMEOUT,
        };

        Ok(Config {
            db_path,
            data_dir,
            busy_timeout,
        })
    }

    /// Load the API key from disk, or generate a new one.
    ///
    /// Returns `(key, newly_created)`.
    pub fn load_or_create_api_key(&self) -> Result<(String, bool)> {
        use rand::Rng;
        use std::fmt::Write;

        let path = self.data_dir.join("api_key");

        if path.exists() {
            let key = std::fs::read_to_string(&path).context("Failed to read API key file")?;
            let key = key.trim().to_string();
            if !key.is_empty() {
                return Ok((key, false));
            }
        }

        let bytes: [u8; 32] = rand::rng().random();
        let key = bytes
            .iter()
            .fold(String::with_capacity(64), |mut acc: String, b| {
                let _ = write!(acc, "{b:02x}");
                acc
            });
        std::fs::write(&path, &key).context("Failed to write API key file")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .context("Failed to set API key file permissions")?;
        }
        eprintln!("Generated new API key: {key}");
        eprintln!("Send it as: Authorization: Bearer {key}");
        Ok((key, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        let config = Config::resolve(data_dir.clone(), None, None).unwrap();
        assert!(data_dir.is_dir());
        assert_eq!(config.db_path, data_dir.join("plate.db"));
        assert_eq!(config.busy_timeout, DEFAULT_BUSY_TIMEOUT);
    }

    #[test]
    fn test_resolve_env_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::resolve(
            dir.path().to_path_buf(),
            Some("/tmp/elsewhere.db".to_string()),
            Some("250".to_string()),
        )
        .unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/elsewhere.db"));
        assert_eq!(config.busy_timeout, Duration::from_millis(250));

        assert!(
            Config::resolve(dir.path().to_path_buf(), None, Some("soon".to_string())).is_err()
        );
    }

    #[test]
    fn test_api_key_is_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::resolve(dir.path().to_path_buf(), None, None).unwrap();

        let (key, created) = config.load_or_create_api_key().unwrap();
        assert!(created);
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));

        let (again, created) = config.load_or_create_api_key().unwrap();
        assert!(!created);
        assert_eq!(again, key);
    }
}
