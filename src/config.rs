// Process configuration, read once at startup from the environment.

use std::env;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::strategy::StrategyVariant;

const DEFAULT_PORT: u16 = 5000;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Working area for in-flight job files. Wiped of leftovers at startup.
    pub scratch_dir: PathBuf,
    pub strategy: StrategyVariant,
    pub cookies_path: PathBuf,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let port = env::var("PORT")
            .ok()
            .and_then(|raw| match raw.parse::<u16>() {
                Ok(port) => Some(port),
                Err(_) => {
                    warn!(value = %raw, "invalid PORT, using default");
                    None
                }
            })
            .unwrap_or(DEFAULT_PORT);

        let scratch_dir = env::var("TUBEFETCH_SCRATCH_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| env::temp_dir().join("tubefetch"));

        let strategy = env::var("TUBEFETCH_STRATEGY")
            .ok()
            .and_then(|raw| match raw.parse::<StrategyVariant>() {
                Ok(variant) => Some(variant),
                Err(_) => {
                    warn!(value = %raw, "unknown strategy, using default");
                    None
                }
            })
            .unwrap_or_default();

        let cookies_path = env::var("TUBEFETCH_COOKIES")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::config_dir()
                    .unwrap_or_else(env::temp_dir)
                    .join("tubefetch")
                    .join("cookies.txt")
            });

        Self {
            port,
            scratch_dir,
            strategy,
            cookies_path,
        }
    }

    /// Creates the scratch directory and sweeps anything a previous run left
    /// behind. Jobs never resume across restarts, so leftovers are garbage.
    pub fn prepare_scratch(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.scratch_dir)?;

        let mut swept = 0usize;
        for entry in std::fs::read_dir(&self.scratch_dir)? {
            let entry = entry?;
            let path = entry.path();
            let removed = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            match removed {
                Ok(()) => swept += 1,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "could not sweep leftover")
                }
            }
        }
        if swept > 0 {
            info!(count = swept, dir = %self.scratch_dir.display(), "swept stale job files");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_scratch_sweeps_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("scratch");
        std::fs::create_dir_all(scratch.join("job-old")).unwrap();
        std::fs::write(scratch.join("job-old").join("stale.mp4"), b"x").unwrap();
        std::fs::write(scratch.join("orphan.jpg"), b"x").unwrap();

        let config = ServerConfig {
            port: 0,
            scratch_dir: scratch.clone(),
            strategy: StrategyVariant::default(),
            cookies_path: PathBuf::from("/nonexistent/cookies.txt"),
        };
        config.prepare_scratch().unwrap();

        assert!(scratch.is_dir());
        assert_eq!(std::fs::read_dir(&scratch).unwrap().count(), 0);
    }

    #[test]
    fn test_prepare_scratch_creates_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("nested").join("scratch");

        let config = ServerConfig {
            port: 0,
            scratch_dir: scratch.clone(),
            strategy: StrategyVariant::default(),
            cookies_path: PathBuf::from("/nonexistent/cookies.txt"),
        };
        config.prepare_scratch().unwrap();
        assert!(scratch.is_dir());
    }
}
