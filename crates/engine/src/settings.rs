use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use crate::error::{
    CreateSettingsDirectorySnafu, EngineResult, ExtractSettingsSnafu, RenameSettingsSnafu,
    SerializeSettingsSnafu, WriteSettingsSnafu,
};

pub const SETTINGS_DIRECTORY_NAME: &str = "confab";
pub const SETTINGS_FILE_NAME: &str = "engine.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Logs every mutation with its payload at info level.
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_true")]
    pub flag_ragged_tables: bool,
    #[serde(default = "default_true")]
    pub flag_ragged_grids: bool,
    /// Marks live response items for screen-reader announcement.
    #[serde(default = "default_true")]
    pub announce_responses: bool,
    /// Replaces UUIDv7 ids with `{prefix}-{n}`; read once when the engine is built.
    #[serde(default)]
    pub id_prefix: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            debug: false,
            flag_ragged_tables: true,
            flag_ragged_grids: true,
            announce_responses: true,
            id_prefix: None,
        }
    }
}

impl EngineSettings {
    pub fn normalized(mut self) -> Self {
        self.id_prefix = self
            .id_prefix
            .map(|prefix| prefix.trim().to_string())
            .filter(|prefix| !prefix.is_empty());
        self
    }

    pub fn with_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.id_prefix = Some(prefix.into());
        self.normalized()
    }
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<EngineSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".confab"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_disk(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<EngineSettings> {
        self.settings.load_full()
    }

    /// Handle shared with engines so updates apply to their next mutation.
    pub fn shared(&self) -> Arc<ArcSwap<EngineSettings>> {
        Arc::clone(&self.settings)
    }

    /// Publishes `settings` and writes them to disk when they differ from what is on disk.
    ///
    /// Returns whether the file was written.
    pub fn update(&self, settings: EngineSettings) -> EngineResult<bool> {
        let settings = settings.normalized();
        let stale = !self.config_path.exists() || *self.settings.load_full() != settings;
        if stale {
            self.write_atomically(&settings)?;
        }
        self.settings.store(Arc::new(settings));
        Ok(stale)
    }

    /// Strict variant of the startup load: surfaces extraction errors instead of defaulting.
    pub fn read_file(path: &Path) -> EngineResult<EngineSettings> {
        let figment = Figment::from(Serialized::defaults(EngineSettings::default()))
            .merge(Json::file(path));

        figment
            .extract::<EngineSettings>()
            .map(EngineSettings::normalized)
            .context(ExtractSettingsSnafu {
                stage: "extract-engine-settings",
                path: path.to_path_buf(),
            })
    }

    fn load_from_disk(path: &Path) -> EngineSettings {
        if !path.exists() {
            tracing::info!(path = %path.display(), "no engine settings file; using defaults");
            return EngineSettings::default();
        }

        Self::read_file(path).unwrap_or_else(|error| {
            tracing::warn!(
                path = %path.display(),
                %error,
                "unreadable engine settings; using defaults"
            );
            EngineSettings::default()
        })
    }

    fn write_atomically(&self, settings: &EngineSettings) -> EngineResult<()> {
        if let Some(directory) = self
            .config_path
            .parent()
            .filter(|directory| !directory.as_os_str().is_empty())
        {
            std::fs::create_dir_all(directory).context(CreateSettingsDirectorySnafu {
                stage: "ensure-engine-settings-directory",
                path: directory.to_path_buf(),
            })?;
        }

        let mut encoded = serde_json::to_vec_pretty(settings).context(SerializeSettingsSnafu {
            stage: "encode-engine-settings",
        })?;
        encoded.push(b'\n');

        let staging = self.staging_path();
        std::fs::write(&staging, &encoded).context(WriteSettingsSnafu {
            stage: "stage-engine-settings",
            path: staging.clone(),
        })?;
        std::fs::rename(&staging, &self.config_path).context(RenameSettingsSnafu {
            stage: "commit-engine-settings",
            from: staging,
            to: self.config_path.clone(),
        })?;

        tracing::info!(
            path = %self.config_path.display(),
            bytes = encoded.len(),
            "persisted engine settings"
        );
        Ok(())
    }

    /// Sibling of the settings file, unique per process.
    fn staging_path(&self) -> PathBuf {
        let mut name = self
            .config_path
            .file_name()
            .map(OsString::from)
            .unwrap_or_else(|| OsString::from(SETTINGS_FILE_NAME));
        name.push(format!(".{}.tmp", std::process::id()));
        self.config_path.with_file_name(name)
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("confab-settings-{}-{name}", std::process::id()))
            .join(SETTINGS_FILE_NAME)
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let store = SettingsStore::new(scratch_path("missing"));
        assert_eq!(*store.settings(), EngineSettings::default());
    }

    #[test]
    fn partial_file_merges_over_defaults() {
        let path = scratch_path("partial");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{ "debug": true, "id_prefix": "  qa " }"#).unwrap();

        let settings = SettingsStore::read_file(&path).unwrap();
        assert!(settings.debug);
        assert!(settings.flag_ragged_tables);
        assert_eq!(settings.id_prefix.as_deref(), Some("qa"));

        std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }

    #[test]
    fn malformed_file_is_an_extract_error_but_load_defaults() {
        let path = scratch_path("malformed");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{ "debug": "loud" }"#).unwrap();

        let error = SettingsStore::read_file(&path).unwrap_err();
        assert!(matches!(error, EngineError::ExtractSettings { .. }));
        assert_eq!(*SettingsStore::new(path.clone()).settings(), EngineSettings::default());

        std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }

    #[test]
    fn update_persists_publishes_and_skips_unchanged_writes() {
        let path = scratch_path("update");
        let store = SettingsStore::new(path.clone());
        let shared = store.shared();
        let quiet = EngineSettings {
            announce_responses: false,
            ..EngineSettings::default()
        };

        assert!(store.update(quiet.clone()).unwrap());
        assert!(!shared.load().announce_responses);
        assert!(!SettingsStore::read_file(&path).unwrap().announce_responses);

        assert!(!store.update(quiet).unwrap());
        let leftovers = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);

        std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }
}
