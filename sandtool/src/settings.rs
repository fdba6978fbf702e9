use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dirs::home_dir;
use sandstone::compile::Backend;
use sandstone::operations::OperationTable;
use sandstone::sbpl::Parameters;
use serde::{Deserialize, Serialize};
use tracing::{Level, debug, instrument};

/// Defaults read from `~/.sandstone/settings.json`. Command line flags win.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct SandtoolSettings {
    /// Compiler backend used when `--backend` is not given.
    #[serde(default)]
    pub backend: Backend,

    /// Operation table file used when `--operations` is not given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operations: Option<PathBuf>,

    /// Parameters applied before any `--param` flags.
    #[serde(default)]
    pub parameters: Parameters,
}

impl SandtoolSettings {
    /// `$SANDSTONE_HOME`, else `~/.sandstone`.
    pub fn settings_dir() -> Result<PathBuf> {
        if let Some(dir) = std::env::var_os("SANDSTONE_HOME") {
            return Ok(PathBuf::from(dir));
        }
        home_dir()
            .map(|home| home.join(".sandstone"))
            .context("$HOME is not set; set SANDSTONE_HOME instead")
    }

    pub fn settings_file() -> Result<PathBuf> {
        Ok(Self::settings_dir()?.join("settings.json"))
    }

    /// Load the settings file, falling back to defaults when it is missing.
    #[instrument(level = Level::TRACE)]
    pub fn load() -> Result<Self> {
        match Self::settings_file() {
            Ok(path) => Self::load_from(&path),
            Err(e) => {
                debug!(error = %e, "no settings directory, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "settings file not found, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let settings = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        debug!(path = %path.display(), "loaded settings");
        Ok(settings)
    }

    pub fn backend(&self, flag: Option<Backend>) -> Backend {
        flag.unwrap_or(self.backend)
    }

    /// The table named by `flag`, else the configured one, else the built-in table.
    pub fn operation_table(&self, flag: Option<&Path>) -> Result<OperationTable> {
        match flag.or(self.operations.as_deref()) {
            Some(path) => OperationTable::load(path)
                .with_context(|| format!("failed to load operation table {}", path.display())),
            None => Ok(OperationTable::default()),
        }
    }

    /// Configured parameters overlaid with the command line assignments.
    pub fn parameters(&self, flags: &[(String, String)]) -> Parameters {
        let flags: Parameters = flags.iter().cloned().collect();
        self.parameters.merged(&flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = SandtoolSettings::load_from(&dir.path().join("settings.json")).unwrap();
        assert_eq!(settings, SandtoolSettings::default());
        assert_eq!(settings.backend, Backend::Builtin);
    }

    #[test]
    fn loads_json_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"backend": "native", "parameters": {"HOME": "/Users/me"}}"#,
        )
        .unwrap();

        let settings = SandtoolSettings::load_from(&path).unwrap();
        assert_eq!(settings.backend, Backend::Native);
        assert_eq!(settings.parameters.get("HOME"), Some("/Users/me"));
        assert!(settings.operations.is_none());
    }

    #[test]
    fn malformed_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = SandtoolSettings::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("failed to parse"));
    }

    #[test]
    fn flags_override_settings() {
        let settings = SandtoolSettings {
            backend: Backend::Native,
            parameters: Parameters::new().with("HOME", "/a").with("TMP", "/tmp"),
            ..Default::default()
        };
        assert_eq!(settings.backend(Some(Backend::Builtin)), Backend::Builtin);
        assert_eq!(settings.backend(None), Backend::Native);

        let params = settings.parameters(&[("HOME".into(), "/b".into())]);
        assert_eq!(params.get("HOME"), Some("/b"));
        assert_eq!(params.get("TMP"), Some("/tmp"));
    }

    #[test]
    fn operation_table_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ops.txt");
        std::fs::write(&path, "default\nfile-read*\nfile-read-data\n").unwrap();

        let settings = SandtoolSettings {
            operations: Some(path),
            ..Default::default()
        };
        assert_eq!(settings.operation_table(None).unwrap().len(), 3);
        assert_eq!(
            SandtoolSettings::default().operation_table(None).unwrap(),
            OperationTable::default()
        );
    }
}
