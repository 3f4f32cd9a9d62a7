use serde_json::{Map as JsonMap, Value as Json};
use serde_yaml::Value as Yaml;

use super::audio_extract::convert_entry;
use super::{Plugin, PluginContext, PluginOperation};
use crate::entries::Entry;
use crate::error::Result;
use crate::script::Script;
use crate::validators::{
    Mode, OverridesStringFormatter, StrictDict, ValidationError, ValidationResult, Validator,
};

const TARGETS: &[&str] = &[
    "avi", "flv", "mkv", "mov", "mp4", "webm", "aac", "flac", "m4a", "mp3", "ogg", "opus", "wav",
];

/// Converts the downloaded media to another container, either through the
/// fetcher's remuxer or a direct transcoder run.
#[derive(Debug)]
pub struct FileConvertPlugin {
    convert_to: String,
    convert_with: String,
    ffmpeg_post_process_args: Option<OverridesStringFormatter>,
}

impl Validator for FileConvertPlugin {
    fn validate_in(mode: Mode, name: &str, value: &Yaml) -> ValidationResult<Self> {
        let dict = StrictDict::new(
            mode,
            name,
            value,
            &["convert_to"],
            &["convert_with", "ffmpeg_post_process_args"],
        )?;
        let plugin = FileConvertPlugin {
            convert_to: match dict.get("convert_to") {
                Some(_) => dict.select("convert_to", TARGETS, "")?,
                None => String::new(),
            },
            convert_with: dict.select("convert_with", &["yt-dlp", "ffmpeg"], "yt-dlp")?,
            ffmpeg_post_process_args: dict.optional("ffmpeg_post_process_args")?,
        };
        if plugin.convert_with != "ffmpeg" && plugin.ffmpeg_post_process_args.is_some() {
            return Err(ValidationError::new(
                dict.child_name("ffmpeg_post_process_args"),
                "can only be used with convert_with: ffmpeg",
            ));
        }
        Ok(plugin)
    }
}

impl Plugin for FileConvertPlugin {
    fn name(&self) -> &'static str {
        "file_convert"
    }

    fn operations(&self) -> &'static [PluginOperation] {
        &[PluginOperation::ModifyEntry]
    }

    fn overrides_formatters(&self) -> Vec<&OverridesStringFormatter> {
        self.ffmpeg_post_process_args.iter().collect()
    }

    fn ytdl_options(&self, _script: &Script) -> Result<JsonMap<String, Json>> {
        let mut options = JsonMap::new();
        if self.convert_with == "yt-dlp" && !self.convert_to.is_empty() {
            options.insert("remux_video".into(), Json::String(self.convert_to.clone()));
        }
        Ok(options)
    }

    fn modify_entry(&self, mut entry: Entry, ctx: &PluginContext<'_>) -> Result<Option<Entry>> {
        if self.convert_to.is_empty() || entry.ext() == self.convert_to {
            return Ok(Some(entry));
        }
        let extra_args = match &self.ffmpeg_post_process_args {
            Some(args) => args.resolve(ctx.script)?.split_whitespace().map(str::to_string).collect(),
            None => Vec::new(),
        };
        convert_entry(&mut entry, ctx, &self.convert_to, &extra_args)?;
        Ok(Some(entry))
    }
}
