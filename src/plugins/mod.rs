//! Plugins: option blocks of a preset that hook into the entry pipeline.
//!
//! Every plugin declares the phases it takes part in ([`PluginOperation`]),
//! a priority within each phase and the variables it adds. The executor
//! never inspects a plugin beyond this interface.

mod audio_extract;
mod chapters;
mod date_range;
mod download;
mod embed_thumbnail;
mod file_convert;
mod filter;
mod format;
mod match_filters;
mod nfo_tags;
mod split_by_chapters;
mod subtitles;
mod tags;
mod ytdl_options;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde_json::Map as JsonMap;
use serde_yaml::Value as Yaml;

use crate::entries::{Entry, entry_variables};
use crate::error::Result;
use crate::ffmpeg::Transcoder;
use crate::file_handler::OutputWriter;
use crate::script::{Script, Value};
use crate::transaction_log::FileMetadata;
use crate::validators::{
    Mode, OverridesStringFormatter, StrictDict, StringFormatter, ValidationError,
    ValidationResult, Validator,
};

pub use date_range::parse_relative_date;
pub use download::{DownloadOptions, DownloadUrl};

pub const MODIFY_ENTRY_FIRST: i32 = 0;
pub const MODIFY_ENTRY_SPLIT: i32 = 5;

/// Pipeline phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PluginOperation {
    Downloader,
    ModifyEntryMetadata,
    ModifyEntry,
    PostProcess,
    /// Once per subscription, after every entry.
    PostProcessSubscription,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginKind {
    Base,
    /// Maps one entry to zero or more children.
    Split,
}

/// Order within a phase; lower runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PluginPriority {
    pub modify_entry_metadata: i32,
    pub modify_entry: i32,
    pub post_process: i32,
}

impl Default for PluginPriority {
    fn default() -> Self {
        PluginPriority {
            modify_entry_metadata: 0,
            modify_entry: MODIFY_ENTRY_FIRST,
            post_process: 0,
        }
    }
}

impl PluginPriority {
    pub fn of(&self, operation: PluginOperation) -> i32 {
        match operation {
            PluginOperation::Downloader => 0,
            PluginOperation::ModifyEntryMetadata => self.modify_entry_metadata,
            PluginOperation::ModifyEntry => self.modify_entry,
            PluginOperation::PostProcess | PluginOperation::PostProcessSubscription => {
                self.post_process
            }
        }
    }
}

/// What a plugin sees while it runs.
pub struct PluginContext<'a> {
    pub script: &'a Script,
    pub transcoder: &'a dyn Transcoder,
    pub working_directory: &'a Path,
    pub dry_run: bool,
}

impl PluginContext<'_> {
    pub fn overlay(&self, entry: &Entry) -> BTreeMap<String, Value> {
        entry_variables(entry)
    }

    pub fn resolve(&self, formatter: &StringFormatter, entry: &Entry) -> Result<String> {
        Ok(formatter.resolve_string(self.script, &self.overlay(entry))?)
    }

    pub fn resolve_value(&self, formatter: &StringFormatter, entry: &Entry) -> Result<Value> {
        Ok(formatter.resolve(self.script, &self.overlay(entry))?)
    }
}

pub trait Plugin: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    fn operations(&self) -> &'static [PluginOperation];

    fn kind(&self) -> PluginKind {
        PluginKind::Base
    }

    fn priority(&self) -> PluginPriority {
        PluginPriority::default()
    }

    /// Names this plugin binds on entries and the phase they appear in.
    fn added_variables(&self) -> Vec<(String, PluginOperation)> {
        Vec::new()
    }

    /// Entry formatters and the phase they are evaluated in.
    fn formatters(&self) -> Vec<(&StringFormatter, PluginOperation)> {
        Vec::new()
    }

    /// Formatters evaluated before any entry exists.
    fn overrides_formatters(&self) -> Vec<&OverridesStringFormatter> {
        Vec::new()
    }

    fn as_downloader(&self) -> Option<&DownloadOptions> {
        None
    }

    /// Options passed through to the fetcher.
    fn ytdl_options(&self, _script: &Script) -> Result<JsonMap<String, serde_json::Value>> {
        Ok(JsonMap::new())
    }

    /// `None` drops the entry.
    fn modify_entry_metadata(&self, entry: Entry, _ctx: &PluginContext<'_>) -> Result<Option<Entry>> {
        Ok(Some(entry))
    }

    /// `None` drops the entry.
    fn modify_entry(&self, entry: Entry, _ctx: &PluginContext<'_>) -> Result<Option<Entry>> {
        Ok(Some(entry))
    }

    fn split_entry(&self, entry: Entry, _ctx: &PluginContext<'_>) -> Result<Vec<Entry>> {
        Ok(vec![entry])
    }

    /// Runs on a downloaded entry whose media sits at `entry.file_path()`.
    fn post_process_entry(
        &self,
        _entry: &Entry,
        _ctx: &PluginContext<'_>,
        _output: &mut OutputWriter<'_>,
    ) -> Result<Option<FileMetadata>> {
        Ok(None)
    }

    /// Runs for plugins declaring [`PluginOperation::PostProcessSubscription`].
    fn post_process_subscription(
        &self,
        _ctx: &PluginContext<'_>,
        _output: &mut OutputWriter<'_>,
    ) -> Result<()> {
        Ok(())
    }
}

type Constructor = fn(Mode, &str, &Yaml) -> ValidationResult<Box<dyn Plugin>>;

fn construct<P: Plugin + Validator + 'static>(
    mode: Mode,
    name: &str,
    value: &Yaml,
) -> ValidationResult<Box<dyn Plugin>> {
    Ok(Box::new(P::validate_in(mode, name, value)?))
}

/// Every plugin key in registration order. Ties in priority keep this order.
static REGISTRY: &[(&str, Constructor)] = &[
    ("download", construct::<download::DownloadPlugin>),
    ("ytdl_options", construct::<ytdl_options::YtdlOptionsPlugin>),
    ("format", construct::<format::FormatPlugin>),
    ("match_filters", construct::<match_filters::MatchFiltersPlugin>),
    ("date_range", construct::<date_range::DateRangePlugin>),
    ("filter_include", construct::<filter::FilterIncludePlugin>),
    ("filter_exclude", construct::<filter::FilterExcludePlugin>),
    ("chapters", construct::<chapters::ChaptersPlugin>),
    ("audio_extract", construct::<audio_extract::AudioExtractPlugin>),
    ("file_convert", construct::<file_convert::FileConvertPlugin>),
    ("split_by_chapters", construct::<split_by_chapters::SplitByChaptersPlugin>),
    ("subtitles", construct::<subtitles::SubtitlesPlugin>),
    ("music_tags", construct::<tags::MusicTagsPlugin>),
    ("video_tags", construct::<tags::VideoTagsPlugin>),
    ("embed_thumbnail", construct::<embed_thumbnail::EmbedThumbnailPlugin>),
    ("nfo_tags", construct::<nfo_tags::NfoTagsPlugin>),
    ("output_directory_nfo_tags", construct::<nfo_tags::OutputDirectoryNfoTagsPlugin>),
];

pub fn plugin_keys() -> impl Iterator<Item = &'static str> {
    REGISTRY.iter().map(|(key, _)| *key)
}

/// The plugins a preset enables, in registration order.
#[derive(Debug, Default)]
pub struct PluginSet {
    plugins: Vec<Box<dyn Plugin>>,
}

impl PluginSet {
    /// Builds every plugin whose key appears in `dict`.
    pub fn from_dict(dict: &StrictDict<'_>) -> ValidationResult<Self> {
        let mut plugins: Vec<Box<dyn Plugin>> = Vec::new();
        for (key, constructor) in REGISTRY {
            if let Some(value) = dict.get(key) {
                plugins.push(constructor(dict.mode(), &dict.child_name(key), value)?);
            }
        }
        let splits: Vec<&str> = plugins
            .iter()
            .filter(|plugin| plugin.kind() == PluginKind::Split)
            .map(|plugin| plugin.name())
            .collect();
        if splits.len() > 1 {
            return Err(ValidationError::new(
                dict.name(),
                format!(
                    "only one plugin that splits entries may be used, found: {}",
                    splits.join(", ")
                ),
            ));
        }
        Ok(PluginSet { plugins })
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Plugin> {
        self.plugins.iter().map(|plugin| plugin.as_ref())
    }

    pub fn downloader(&self) -> Option<&DownloadOptions> {
        self.iter().find_map(Plugin::as_downloader)
    }

    /// Plugins taking part in `operation`, sorted by priority. The sort is
    /// stable, so equal priorities keep registration order.
    pub fn ordered(&self, operation: PluginOperation) -> Vec<&dyn Plugin> {
        let mut selected: Vec<&dyn Plugin> = self
            .iter()
            .filter(|plugin| plugin.operations().contains(&operation))
            .collect();
        selected.sort_by_key(|plugin| plugin.priority().of(operation));
        selected
    }

    pub fn split_plugin(&self) -> Option<&dyn Plugin> {
        self.iter().find(|plugin| plugin.kind() == PluginKind::Split)
    }

    pub fn added_variables(&self) -> Vec<(String, PluginOperation)> {
        self.iter().flat_map(|plugin| plugin.added_variables()).collect()
    }

    /// Fetcher options from every plugin; later plugins win on conflicts.
    pub fn ytdl_options(&self, script: &Script) -> Result<JsonMap<String, serde_json::Value>> {
        let mut merged = JsonMap::new();
        for plugin in self.iter() {
            merged.extend(plugin.ytdl_options(script)?);
        }
        Ok(merged)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub fn yaml(text: &str) -> Yaml {
        serde_yaml::from_str(text).unwrap()
    }

    pub fn entry(dir: &Path, metadata: serde_json::Value) -> Entry {
        Entry::new(metadata, dir).unwrap()
    }

    /// A script where every entry variable is declared.
    pub fn script_with(overrides: &[(&str, &str)]) -> Script {
        let mut script = Script::new();
        script.declare(crate::entries::entry_variable_names());
        script.add(overrides.iter().copied()).unwrap();
        script
    }
}
