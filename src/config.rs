use crate::{
    domain::{BoardConfig, PositionPolicy},
    error::{BoardError, Result},
    storage::PositionStore,
};
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::fs;

/// Which backend persists the board
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
    /// JSON document under `<root>/.taskboard/`
    File { root: PathBuf },
    /// SQLite database file
    Sqlite { path: PathBuf },
    /// Throwaway SQLite database
    SqliteInMemory,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::File {
            root: PathBuf::from("."),
        }
    }
}

impl StorageConfig {
    /// Builds the configured backend; it still needs `initialize()`
    pub fn open_store(&self) -> Result<Arc<dyn PositionStore>> {
        match self {
            Self::File { root } => open_file_store(root),
            Self::Sqlite { path } => open_sqlite_store(Some(path)),
            Self::SqliteInMemory => open_sqlite_store(None),
        }
    }
}

#[cfg(feature = "file-storage")]
fn open_file_store(root: &Path) -> Result<Arc<dyn PositionStore>> {
    Ok(Arc::new(crate::storage::FileStore::new(root)))
}

#[cfg(not(feature = "file-storage"))]
fn open_file_store(_root: &Path) -> Result<Arc<dyn PositionStore>> {
    Err(BoardError::ConfigError(
        "file storage is not enabled in this build".to_string(),
    ))
}

#[cfg(feature = "sqlite-storage")]
fn open_sqlite_store(path: Option<&Path>) -> Result<Arc<dyn PositionStore>> {
    let store = match path {
        Some(path) => crate::storage::SqliteStore::open(path)?,
        None => crate::storage::SqliteStore::open_in_memory()?,
    };
    Ok(Arc::new(store))
}

#[cfg(not(feature = "sqlite-storage"))]
fn open_sqlite_store(_path: Option<&Path>) -> Result<Arc<dyn PositionStore>> {
    Err(BoardError::ConfigError(
        "sqlite storage is not enabled in this build".to_string(),
    ))
}

fn default_seed() -> Option<BoardConfig> {
    Some(BoardConfig::default())
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub positions: PositionPolicy,
    /// Board created when the store holds no boards; `null` disables seeding
    #[serde(default = "default_seed")]
    pub seed: Option<BoardConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            positions: PositionPolicy::default(),
            seed: default_seed(),
        }
    }
}

impl EngineConfig {
    /// Loads a JSON config file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).await.map_err(|err| {
            BoardError::ConfigError(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        serde_json::from_str(contents)
            .map_err(|err| BoardError::ConfigError(format!("invalid config: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = EngineConfig::from_json("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.positions, PositionPolicy::Clamp);
        assert_eq!(config.seed, Some(BoardConfig::default()));
    }

    #[test]
    fn test_parse_full_config() {
        let config = EngineConfig::from_json(
            r#"{
                "storage": { "backend": "sqlite", "path": "data/kanban.sqlite" },
                "positions": "strict",
                "seed": null
            }"#,
        )
        .unwrap();

        assert_eq!(
            config.storage,
            StorageConfig::Sqlite {
                path: PathBuf::from("data/kanban.sqlite")
            }
        );
        assert_eq!(config.positions, PositionPolicy::Strict);
        assert_eq!(config.seed, None);
    }

    #[test]
    fn test_invalid_config_is_config_error() {
        let err = EngineConfig::from_json(r#"{ "storage": { "backend": "mongo" } }"#).unwrap_err();
        assert!(matches!(err, BoardError::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("taskboard.json");
        tokio::fs::write(&path, r#"{ "storage": { "backend": "sqlite_in_memory" } }"#)
            .await
            .unwrap();

        let config = EngineConfig::load(&path).await.unwrap();
        assert_eq!(config.storage, StorageConfig::SqliteInMemory);
        #[cfg(feature = "sqlite-storage")]
        assert!(config.storage.open_store().is_ok());
        #[cfg(not(feature = "sqlite-storage"))]
        assert!(matches!(
            config.storage.open_store(),
            Err(BoardError::ConfigError(_))
        ));

        let missing = EngineConfig::load(temp_dir.path().join("missing.json")).await;
        assert!(matches!(missing, Err(BoardError::ConfigError(_))));
    }
}
