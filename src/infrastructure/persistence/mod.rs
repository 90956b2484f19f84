//! JSON-file persistence for [`TradingState`], using an
//! atomic-write-then-rename so a crash mid-write never corrupts the
//! on-disk snapshot.

use crate::domain::state::TradingState;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

pub struct StatePersistence {
    file_path: PathBuf,
}

impl StatePersistence {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self { file_path: file_path.into() }
    }

    pub async fn load(&self) -> Result<Option<TradingState>> {
        if !self.file_path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.file_path)
            .await
            .with_context(|| format!("reading state file {:?}", self.file_path))?;
        let state: TradingState =
            serde_json::from_str(&content).context("parsing persisted trading state")?;
        info!(path = ?self.file_path, "loaded persisted trading state");
        Ok(Some(state))
    }

    /// Writes a `.bak` copy of the existing file (if any) before atomically
    /// replacing it, so a crash mid-write never leaves the caller with no
    /// readable snapshot at all.
    pub async fn save(&self, state: &TradingState) -> Result<()> {
        if self.file_path.exists() {
            let backup = backup_path(&self.file_path);
            fs::copy(&self.file_path, &backup).await.context("writing state backup")?;
        }
        let content = serde_json::to_string_pretty(state).context("serializing trading state")?;
        let temp_path = self.file_path.with_extension("tmp");
        fs::write(&temp_path, content).await.context("writing temp state file")?;
        fs::rename(&temp_path, &self.file_path).await.context("renaming temp state file")?;
        info!(path = ?self.file_path, "persisted trading state");
        Ok(())
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut backup = path.as_os_str().to_owned();
    backup.push(".bak");
    PathBuf::from(backup)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_trading_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let persistence = StatePersistence::new(&path);

        let mut state = TradingState::default();
        state.total_pnl = 42.0;
        persistence.save(&state).await.unwrap();

        let loaded = persistence.load().await.unwrap().unwrap();
        assert_eq!(loaded.total_pnl, 42.0);
    }

    #[tokio::test]
    async fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let persistence = StatePersistence::new(&path);
        assert!(persistence.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn a_backup_copy_is_written_before_the_second_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let persistence = StatePersistence::new(&path);

        persistence.save(&TradingState::default()).await.unwrap();
        persistence.save(&TradingState::default()).await.unwrap();

        assert!(backup_path(&path).exists());
    }
}
