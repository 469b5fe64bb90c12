//! Persisted core option overrides
//!
//! Each core gets one flat TOML table at `<options_dir>/<core>.toml`. Only
//! values that differ from the core's declared default are written back.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use retrohost_shared::VariableInfo;
use thiserror::Error;

/// Option key to chosen value
pub type Overrides = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize options: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone)]
pub struct OptionStore {
    dir: PathBuf,
}

impl OptionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, core: &str) -> PathBuf {
        self.dir.join(format!("{core}.toml"))
    }

    /// Stored overrides for `core`; empty when nothing was saved
    pub fn load(&self, core: &str) -> Result<Overrides, OptionsError> {
        let path = self.path_for(core);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Overrides::new()),
            Err(source) => return Err(OptionsError::Io { path, source }),
        };
        toml::from_str(&content).map_err(|source| OptionsError::Parse { path, source })
    }

    /// Persist the overrides that differ from the declared defaults.
    ///
    /// Keys the core never declared are kept as-is, since their default is
    /// unknown. Returns the number of entries written.
    pub fn save(
        &self,
        core: &str,
        overrides: &Overrides,
        declared: &[VariableInfo],
    ) -> Result<usize, OptionsError> {
        let kept: Overrides = overrides
            .iter()
            .filter(|(key, value)| {
                declared
                    .iter()
                    .find(|var| &var.key == *key)
                    .is_none_or(|var| var.default_value != **value)
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let path = self.path_for(core);
        if kept.is_empty() {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => return Err(OptionsError::Io { path, source }),
            }
            tracing::debug!(core, "No option overrides to store");
            return Ok(0);
        }

        let content = toml::to_string(&kept)?;
        std::fs::create_dir_all(&self.dir).map_err(|source| OptionsError::Io {
            path: self.dir.clone(),
            source,
        })?;
        std::fs::write(&path, content).map_err(|source| OptionsError::Io {
            path: path.clone(),
            source,
        })?;
        tracing::info!(core, count = kept.len(), "Saved option overrides");
        Ok(kept.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn declared(key: &str, default: &str) -> VariableInfo {
        VariableInfo {
            key: key.into(),
            description: "Test option".into(),
            options: vec![default.into(), "other".into()],
            default_value: default.into(),
            value: default.into(),
        }
    }

    fn overrides(pairs: &[(&str, &str)]) -> Overrides {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = OptionStore::new(dir.path());
        assert!(store.load("snes9x").unwrap().is_empty());
    }

    #[test]
    fn test_save_skips_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = OptionStore::new(dir.path().join("core-options"));
        let values = overrides(&[("palette", "cool"), ("region", "auto"), ("later", "x")]);
        let vars = [declared("palette", "warm"), declared("region", "auto")];

        assert_eq!(store.save("stub", &values, &vars).unwrap(), 2);
        let loaded = store.load("stub").unwrap();
        assert_eq!(loaded, overrides(&[("later", "x"), ("palette", "cool")]));
    }

    #[test]
    fn test_save_all_defaults_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = OptionStore::new(dir.path());
        let vars = [declared("palette", "warm")];

        store
            .save("stub", &overrides(&[("palette", "cool")]), &vars)
            .unwrap();
        assert!(store.path_for("stub").exists());

        let written = store
            .save("stub", &overrides(&[("palette", "warm")]), &vars)
            .unwrap();
        assert_eq!(written, 0);
        assert!(!store.path_for("stub").exists());
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = OptionStore::new(dir.path());
        std::fs::write(store.path_for("stub"), "palette = [").unwrap();
        assert!(matches!(
            store.load("stub"),
            Err(OptionsError::Parse { .. })
        ));
    }
}
