#![forbid(unsafe_code)]

//! The YAML configuration file: process settings under `configuration` and
//! user presets under `presets`.

use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde_yaml::{Mapping, Value as Yaml};

use crate::preset::PresetRegistry;
use crate::validators::{Mode, StrictDict, Validator};

pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";
pub const DEFAULT_WORKING_DIRECTORY: &str = ".ytdl-sub-working-directory";

const CONFIGURATION_KEYS: &[&str] = &[
    "working_directory",
    "umask",
    "lock_directory",
    "ffmpeg_path",
    "ffprobe_path",
    "dl_aliases",
    "persist_logs",
    "experimental",
];

pub fn default_ffmpeg_path() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from("ffmpeg.exe")
    } else {
        PathBuf::from("/usr/bin/ffmpeg")
    }
}

pub fn default_ffprobe_path() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from("ffprobe.exe")
    } else {
        PathBuf::from("/usr/bin/ffprobe")
    }
}

/// Where debug logs of finished subscriptions are kept.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistLogs {
    pub logs_directory: PathBuf,
    pub keep_successful_logs: bool,
}

impl Validator for PersistLogs {
    fn validate_in(mode: Mode, name: &str, value: &Yaml) -> crate::validators::ValidationResult<Self> {
        let dict = StrictDict::new(mode, name, value, &["logs_directory"], &["keep_successful_logs"])?;
        Ok(PersistLogs {
            logs_directory: PathBuf::from(dict.required::<String>("logs_directory")?),
            keep_successful_logs: dict.optional_or("keep_successful_logs", true)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub path: PathBuf,
    pub working_directory: PathBuf,
    pub umask: Option<String>,
    pub lock_directory: PathBuf,
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub dl_aliases: BTreeMap<String, String>,
    pub persist_logs: Option<PersistLogs>,
    /// Names of enabled experimental features.
    pub experimental: BTreeSet<String>,
    /// The `presets` mapping as written.
    pub presets: Yaml,
}

impl Config {
    /// Bundled presets plus the ones defined in this config.
    pub fn preset_registry(&self) -> crate::error::Result<PresetRegistry> {
        let mut registry = PresetRegistry::bundled()?;
        if !self.presets.is_null() {
            registry.add_all(&self.presets, "presets")?;
        }
        Ok(registry)
    }
}

/// Settings that win over the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// An explicitly requested config file must exist.
    pub config_path: Option<PathBuf>,
    pub working_directory: Option<PathBuf>,
}

pub fn load_config(overrides: ConfigOverrides) -> Result<Config> {
    let (path, explicit) = match &overrides.config_path {
        Some(path) => (path.clone(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
    };
    let document = read_config_file(&path, explicit)?;
    build_config_with_overrides(&path, &document, env_var_string, overrides)
}

/// Reads the YAML document at `path`; a missing default file is an empty
/// document.
pub fn read_config_file(path: &Path, explicit: bool) -> Result<Yaml> {
    if !path.exists() {
        if explicit {
            bail!("config file {} does not exist", path.display());
        }
        return Ok(Yaml::Null);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    serde_yaml::from_str(&content).with_context(|| format!("Parsing {}", path.display()))
}

#[cfg(test)]
fn build_config(
    path: &Path,
    document: &Yaml,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<Config> {
    build_config_with_overrides(path, document, env_lookup, ConfigOverrides::default())
}

fn build_config_with_overrides(
    path: &Path,
    document: &Yaml,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: ConfigOverrides,
) -> Result<Config> {
    let empty = Yaml::Mapping(Mapping::new());
    let document = if document.is_null() { &empty } else { document };
    let root = StrictDict::new(Mode::Full, "", document, &[], &["configuration", "presets"])?;
    let section = root.get("configuration").unwrap_or(&empty);
    let configuration = StrictDict::new(Mode::Full, "configuration", section, &[], CONFIGURATION_KEYS)?;

    let file_path = |key: &str| -> Result<Option<String>> {
        Ok(configuration.optional::<String>(key)?)
    };
    let working_directory = overrides
        .working_directory
        .map(|path| path.to_string_lossy().into_owned())
        .or_else(|| env_lookup("YTDL_SUB_WORKING_DIRECTORY"))
        .or(file_path("working_directory")?)
        .unwrap_or_else(|| DEFAULT_WORKING_DIRECTORY.to_string());
    let ffmpeg_path = lookup_value("YTDL_SUB_FFMPEG_PATH", file_path("ffmpeg_path")?, &env_lookup)
        .map(PathBuf::from)
        .unwrap_or_else(default_ffmpeg_path);
    let ffprobe_path = lookup_value("YTDL_SUB_FFPROBE_PATH", file_path("ffprobe_path")?, &env_lookup)
        .map(PathBuf::from)
        .unwrap_or_else(default_ffprobe_path);
    let lock_directory = file_path("lock_directory")?
        .map(PathBuf::from)
        .unwrap_or_else(env::temp_dir);

    let experimental: BTreeMap<String, bool> =
        configuration.optional_or("experimental", BTreeMap::new())?;

    Ok(Config {
        path: path.to_path_buf(),
        working_directory: PathBuf::from(working_directory),
        umask: file_path("umask")?,
        lock_directory,
        ffmpeg_path,
        ffprobe_path,
        dl_aliases: configuration.optional_or("dl_aliases", BTreeMap::new())?,
        persist_logs: configuration.optional("persist_logs")?,
        experimental: experimental
            .into_iter()
            .filter(|(_, enabled)| *enabled)
            .map(|(feature, _)| feature)
            .collect(),
        presets: root.get("presets").cloned().unwrap_or(Yaml::Null),
    })
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_value: Option<String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or(file_value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn config_from(contents: &str) -> Result<Config> {
        let file = make_config(contents);
        let document = read_config_file(file.path(), true)?;
        build_config(file.path(), &document, |_| None)
    }

    #[test]
    fn missing_default_config_uses_defaults() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let document = read_config_file(&dir.path().join(DEFAULT_CONFIG_PATH), false)?;
        let config = build_config(Path::new(DEFAULT_CONFIG_PATH), &document, |_| None)?;
        assert_eq!(config.working_directory, PathBuf::from(DEFAULT_WORKING_DIRECTORY));
        assert_eq!(config.ffmpeg_path, default_ffmpeg_path());
        assert_eq!(config.lock_directory, env::temp_dir());
        assert!(config.dl_aliases.is_empty());
        assert!(config.persist_logs.is_none());
        Ok(())
    }

    #[test]
    fn explicit_missing_config_fails() {
        let dir = tempfile::tempdir().unwrap();
        let error = read_config_file(&dir.path().join("nope.yaml"), true).unwrap_err();
        assert!(error.to_string().contains("does not exist"));
    }

    #[test]
    fn reads_configuration_block() -> anyhow::Result<()> {
        let config = config_from(
            "configuration:
  working_directory: /tmp/work
  umask: '002'
  ffmpeg_path: /opt/ffmpeg
  dl_aliases:
    mv: '--preset \"Jellyfin Music Videos\"'
  persist_logs:
    logs_directory: /logs
  experimental:
    keep_max_files: true
    other: false
",
        )?;
        assert_eq!(config.working_directory, PathBuf::from("/tmp/work"));
        assert_eq!(config.umask.as_deref(), Some("002"));
        assert_eq!(config.ffmpeg_path, PathBuf::from("/opt/ffmpeg"));
        assert_eq!(config.dl_aliases["mv"], "--preset \"Jellyfin Music Videos\"");
        assert_eq!(
            config.persist_logs,
            Some(PersistLogs {
                logs_directory: PathBuf::from("/logs"),
                keep_successful_logs: true,
            })
        );
        assert_eq!(config.experimental, BTreeSet::from(["keep_max_files".to_string()]));
        Ok(())
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let error = config_from("configuration:\n  working_dir: /x\n").unwrap_err();
        assert!(error.to_string().contains("working_dir"));
    }

    #[test]
    fn overrides_then_env_then_file() -> anyhow::Result<()> {
        let file = make_config("configuration:\n  working_directory: /file\n  ffmpeg_path: /file/ffmpeg\n");
        let document = read_config_file(file.path(), true)?;
        let env = |key: &str| match key {
            "YTDL_SUB_WORKING_DIRECTORY" => Some("/env".to_string()),
            "YTDL_SUB_FFMPEG_PATH" => Some("/env/ffmpeg".to_string()),
            _ => None,
        };
        let config = build_config(file.path(), &document, env)?;
        assert_eq!(config.working_directory, PathBuf::from("/env"));
        assert_eq!(config.ffmpeg_path, PathBuf::from("/env/ffmpeg"));

        let config = build_config_with_overrides(
            file.path(),
            &document,
            env,
            ConfigOverrides {
                working_directory: Some(PathBuf::from("/cli")),
                ..ConfigOverrides::default()
            },
        )?;
        assert_eq!(config.working_directory, PathBuf::from("/cli"));
        Ok(())
    }

    #[test]
    fn custom_presets_join_the_bundled_ones() -> anyhow::Result<()> {
        let config = config_from(
            "presets:\n  mine:\n    preset: Jellyfin TV Show by Date\n    overrides:\n      tv_show_name: Mine\n",
        )?;
        let registry = config.preset_registry()?;
        assert!(registry.contains("mine"));
        assert!(registry.contains("Jellyfin TV Show by Date"));

        let clash = config_from("presets:\n  Single:\n    overrides: {}\n")?;
        assert!(clash.preset_registry().is_err());
        Ok(())
    }
}
