use rollcall_core::{EncodingStore, StoreError, ThresholdError, Thresholds};
use rollcall_store::{DirEncodingStore, SqliteEncodingStore};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

const DEFAULT_CONFIG_FILE: &str = "rollcall.toml";
const DEFAULT_CONFLICT_RETRIES: usize = 5;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error(transparent)]
    Thresholds(#[from] ThresholdError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Sqlite,
    Dir,
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "dir" => Ok(Self::Dir),
            other => Err(format!("unknown store kind {other:?}")),
        }
    }
}

/// Values from `rollcall.toml`; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    store: Option<StoreKind>,
    db_path: Option<PathBuf>,
    encodings_dir: Option<PathBuf>,
    training_dir: Option<PathBuf>,
    roster_path: Option<PathBuf>,
    dedup_threshold: Option<f32>,
    match_tolerance: Option<f32>,
    build_workers: Option<usize>,
    conflict_retries: Option<usize>,
}

/// CLI configuration: defaults, then the TOML file, then `ROLLCALL_*` variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Which encoding store backend to open.
    pub store: StoreKind,
    /// SQLite database file (sqlite backend).
    pub db_path: PathBuf,
    /// Root directory of JSON records (dir backend).
    pub encodings_dir: PathBuf,
    /// Reference images, laid out as `<group>/<person>/<image>`.
    pub training_dir: PathBuf,
    /// TOML roster file; without one the roster is everyone with encodings.
    pub roster_path: Option<PathBuf>,
    pub thresholds: Thresholds,
    /// Concurrent per-person builder tasks.
    pub build_workers: usize,
    /// Save attempts per person before giving up on a contended record.
    pub conflict_retries: usize,
}

impl Config {
    /// Load from `$ROLLCALL_CONFIG` (or `./rollcall.toml` if present) and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let env = |key: &str| std::env::var(key).ok();
        let file = match env("ROLLCALL_CONFIG") {
            Some(path) => Some(PathBuf::from(path)),
            None => Some(PathBuf::from(DEFAULT_CONFIG_FILE)).filter(|p| p.exists()),
        };
        let file = match file {
            Some(path) => read_file(&path)?,
            None => FileConfig::default(),
        };
        Self::resolve(file, env)
    }

    fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let data_dir = env("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let path_var = |key: &str, fallback: PathBuf| env(key).map(PathBuf::from).unwrap_or(fallback);

        let thresholds = Thresholds {
            dedup_threshold: parsed(&env, "ROLLCALL_DEDUP_THRESHOLD")
                .or(file.dedup_threshold)
                .unwrap_or(rollcall_core::DEFAULT_DEDUP_THRESHOLD),
            match_tolerance: parsed(&env, "ROLLCALL_MATCH_TOLERANCE")
                .or(file.match_tolerance)
                .unwrap_or(rollcall_core::DEFAULT_MATCH_TOLERANCE),
        };
        thresholds.validate()?;

        let default_workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        Ok(Self {
            store: parsed(&env, "ROLLCALL_STORE")
                .or(file.store)
                .unwrap_or(StoreKind::Sqlite),
            db_path: path_var(
                "ROLLCALL_DB_PATH",
                file.db_path.unwrap_or_else(|| data_dir.join("encodings.db")),
            ),
            encodings_dir: path_var(
                "ROLLCALL_ENCODINGS_DIR",
                file.encodings_dir.unwrap_or_else(|| data_dir.join("encodings")),
            ),
            training_dir: path_var(
                "ROLLCALL_TRAINING_DIR",
                file.training_dir.unwrap_or_else(|| PathBuf::from("training")),
            ),
            roster_path: env("ROLLCALL_ROSTER_PATH")
                .map(PathBuf::from)
                .or(file.roster_path),
            thresholds,
            build_workers: parsed(&env, "ROLLCALL_BUILD_WORKERS")
                .or(file.build_workers)
                .unwrap_or(default_workers)
                .max(1),
            conflict_retries: parsed(&env, "ROLLCALL_CONFLICT_RETRIES")
                .or(file.conflict_retries)
                .unwrap_or(DEFAULT_CONFLICT_RETRIES)
                .max(1),
        })
    }

    pub fn open_store(&self) -> Result<Arc<dyn EncodingStore>, StoreError> {
        Ok(match self.store {
            StoreKind::Sqlite => Arc::new(SqliteEncodingStore::open(&self.db_path)?),
            StoreKind::Dir => Arc::new(DirEncodingStore::open(&self.encodings_dir)?),
        })
    }
}

#[cfg(test)]
impl Config {
    /// Defaults with every path under `root` and a single worker.
    pub(crate) fn load_defaults_for_test(root: &Path) -> Self {
        let home = root.display().to_string();
        let mut config = Self::resolve(FileConfig::default(), |key: &str| {
            (key == "HOME").then(|| home.clone())
        })
        .unwrap_or_else(|e| panic!("default config rejected: {e}"));
        config.training_dir = root.to_path_buf();
        config.build_workers = 1;
        config
    }
}

fn parsed<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    env(key).and_then(|v| v.parse().ok())
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::resolve(FileConfig::default(), env_of(&[("HOME", "/home/t")])).unwrap();
        assert_eq!(config.store, StoreKind::Sqlite);
        assert_eq!(config.db_path, PathBuf::from("/home/t/.local/share/rollcall/encodings.db"));
        assert_eq!(config.training_dir, PathBuf::from("training"));
        assert_eq!(config.thresholds, Thresholds::default());
        assert_eq!(config.conflict_retries, 5);
        assert!(config.build_workers >= 1);
        assert!(config.roster_path.is_none());
    }

    #[test]
    fn test_xdg_data_home() {
        let config = Config::resolve(FileConfig::default(), env_of(&[("XDG_DATA_HOME", "/data")])).unwrap();
        assert_eq!(config.encodings_dir, PathBuf::from("/data/rollcall/encodings"));
    }

    #[test]
    fn test_file_then_env_layering() {
        let file: FileConfig = toml::from_str(
            r#"
            store = "dir"
            dedup_threshold = 0.4
            match_tolerance = 0.55
            build_workers = 3
            roster_path = "rosters.toml"
            "#,
        )
        .unwrap();
        let env = env_of(&[("ROLLCALL_MATCH_TOLERANCE", "0.45"), ("ROLLCALL_BUILD_WORKERS", "8")]);

        let config = Config::resolve(file, env).unwrap();
        assert_eq!(config.store, StoreKind::Dir);
        assert_eq!(config.thresholds.dedup_threshold, 0.4);
        assert_eq!(config.thresholds.match_tolerance, 0.45);
        assert_eq!(config.build_workers, 8);
        assert_eq!(config.roster_path, Some(PathBuf::from("rosters.toml")));
    }

    #[test]
    fn test_unparseable_env_falls_back() {
        let file: FileConfig = toml::from_str("dedup_threshold = 0.3").unwrap();
        let env = env_of(&[("ROLLCALL_DEDUP_THRESHOLD", "lots"), ("ROLLCALL_STORE", "mongo")]);
        let config = Config::resolve(file, env).unwrap();
        assert_eq!(config.thresholds.dedup_threshold, 0.3);
        assert_eq!(config.store, StoreKind::Sqlite);
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let env = env_of(&[("ROLLCALL_MATCH_TOLERANCE", "-1")]);
        assert!(matches!(
            Config::resolve(FileConfig::default(), env),
            Err(ConfigError::Thresholds(_))
        ));
    }

    #[test]
    fn test_unknown_file_key_rejected() {
        assert!(toml::from_str::<FileConfig>("tolerance = 0.5").is_err());
    }

    #[test]
    fn test_read_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(read_file(&missing), Err(ConfigError::Read { .. })));

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "store = [").unwrap();
        assert!(matches!(read_file(&bad), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_open_dir_store() {
        let dir = tempfile::tempdir().unwrap();
        let env = env_of(&[
            ("ROLLCALL_STORE", "dir"),
            ("ROLLCALL_ENCODINGS_DIR", dir.path().join("enc").to_str().unwrap()),
        ]);
        let config = Config::resolve(FileConfig::default(), env).unwrap();
        let store = config.open_store().unwrap();
        assert!(store.list_persons(&"g".into()).unwrap().is_empty());
        assert!(dir.path().join("enc").is_dir());
    }
}
