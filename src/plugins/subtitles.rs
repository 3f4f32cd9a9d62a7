use serde_json::{Map as JsonMap, Value as Json};
use serde_yaml::Value as Yaml;
use tracing::debug;

use super::{Plugin, PluginContext, PluginOperation};
use crate::entries::{Entry, sanitize_filename};
use crate::error::Result;
use crate::file_handler::OutputWriter;
use crate::script::{Script, Value};
use crate::transaction_log::FileMetadata;
use crate::validators::{Mode, StrictDict, StringFormatter, ValidationError, ValidationResult, Validator};

const SUBTITLE_TYPES: &[&str] = &["srt", "vtt", "ass", "lrc"];

#[derive(Debug)]
pub struct SubtitlesPlugin {
    subtitles_name: Option<StringFormatter>,
    subtitles_type: String,
    embed_subtitles: bool,
    languages: Vec<String>,
    allow_auto_generated_subtitles: bool,
}

impl Validator for SubtitlesPlugin {
    fn validate_in(mode: Mode, name: &str, value: &Yaml) -> ValidationResult<Self> {
        let dict = StrictDict::new(
            mode,
            name,
            value,
            &[],
            &[
                "subtitles_name",
                "subtitles_type",
                "embed_subtitles",
                "languages",
                "allow_auto_generated_subtitles",
            ],
        )?;
        let plugin = SubtitlesPlugin {
            subtitles_name: dict.optional("subtitles_name")?,
            subtitles_type: dict.select("subtitles_type", SUBTITLE_TYPES, "srt")?,
            embed_subtitles: dict.optional_or("embed_subtitles", false)?,
            languages: dict.optional_or("languages", vec!["en".to_string()])?,
            allow_auto_generated_subtitles: dict.optional_or("allow_auto_generated_subtitles", false)?,
        };
        if mode == Mode::Full && plugin.subtitles_name.is_none() && !plugin.embed_subtitles {
            return Err(ValidationError::new(
                name,
                "must define either subtitles_name or embed_subtitles",
            ));
        }
        Ok(plugin)
    }
}

impl SubtitlesPlugin {
    fn overlay_with_lang(&self, ctx: &PluginContext<'_>, entry: &Entry, lang: &str) -> std::collections::BTreeMap<String, Value> {
        let mut overlay = ctx.overlay(entry);
        overlay.insert("lang".into(), Value::string(lang));
        overlay.insert("lang_sanitized".into(), Value::string(sanitize_filename(lang)));
        overlay
    }
}

impl Plugin for SubtitlesPlugin {
    fn name(&self) -> &'static str {
        "subtitles"
    }

    fn operations(&self) -> &'static [PluginOperation] {
        &[PluginOperation::PostProcess]
    }

    fn added_variables(&self) -> Vec<(String, PluginOperation)> {
        vec![("lang".to_string(), PluginOperation::PostProcess)]
    }

    fn formatters(&self) -> Vec<(&StringFormatter, PluginOperation)> {
        self.subtitles_name
            .iter()
            .map(|formatter| (formatter, PluginOperation::PostProcess))
            .collect()
    }

    fn ytdl_options(&self, _script: &Script) -> Result<JsonMap<String, Json>> {
        let mut options = JsonMap::new();
        options.insert("writesubtitles".into(), Json::Bool(true));
        options.insert(
            "subtitleslangs".into(),
            Json::Array(self.languages.iter().cloned().map(Json::String).collect()),
        );
        options.insert("convert_subs".into(), Json::String(self.subtitles_type.clone()));
        if self.allow_auto_generated_subtitles {
            options.insert("writeautomaticsub".into(), Json::Bool(true));
        }
        if self.embed_subtitles {
            options.insert("embed_subtitles".into(), Json::Bool(true));
        }
        Ok(options)
    }

    fn post_process_entry(
        &self,
        entry: &Entry,
        ctx: &PluginContext<'_>,
        output: &mut OutputWriter<'_>,
    ) -> Result<Option<FileMetadata>> {
        let mut found = Vec::new();
        for lang in &self.languages {
            let source = ctx
                .working_directory
                .join(format!("{}.{lang}.{}", entry.uid(), self.subtitles_type));
            if !source.is_file() && !ctx.dry_run {
                debug!("No {lang} subtitles for '{}'", entry.title());
                continue;
            }
            found.push(lang.clone());
            if let Some(formatter) = &self.subtitles_name {
                let relative = formatter.resolve_string(ctx.script, &self.overlay_with_lang(ctx, entry, lang))?;
                output.save_copy(&source, &relative, None)?;
            }
        }
        if found.is_empty() {
            return Ok(None);
        }
        let mut pairs = vec![("languages", found.join(", "))];
        if self.embed_subtitles {
            pairs.push(("embedded", "True".to_string()));
        }
        Ok(Some(FileMetadata::from_pairs("Subtitles", pairs)))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::json;
    use tempfile::tempdir;

    use super::super::testing::{entry, yaml};
    use super::*;
    use crate::entries::entry_variable_names;
    use crate::ffmpeg::testing::RecordingTranscoder;
    use crate::file_handler::FileHandler;
    use crate::transaction_log::TransactionLog;

    #[test]
    fn requires_a_destination() {
        let error = SubtitlesPlugin::validate("subtitles", &yaml("{languages: [en]}")).unwrap_err();
        assert!(error.message().contains("subtitles_name"));
        assert!(SubtitlesPlugin::partial_validate("subtitles", &yaml("{languages: [en]}")).is_ok());
    }

    #[test]
    fn saves_each_available_language() -> anyhow::Result<()> {
        let work = tempdir()?;
        let out = tempdir()?;
        fs::write(work.path().join("abc.en.srt"), "1\n00:00 --> 00:01\nhi\n")?;
        let mut script = Script::new();
        script.declare(entry_variable_names());
        script.declare(["lang", "lang_sanitized"]);
        let plugin = SubtitlesPlugin::validate(
            "subtitles",
            &yaml("{subtitles_name: '{title_sanitized}.{lang}.srt', languages: [en, de]}"),
        )?;
        let transcoder = RecordingTranscoder::default();
        let ctx = PluginContext {
            script: &script,
            transcoder: &transcoder,
            working_directory: work.path(),
            dry_run: false,
        };
        let mut log = TransactionLog::new(out.path());
        let mut writer = OutputWriter::new(FileHandler::new(false), out.path(), &mut log);
        let item = entry(work.path(), json!({"id": "abc", "title": "A/B"}));
        let metadata = plugin.post_process_entry(&item, &ctx, &mut writer)?;
        assert_eq!(metadata.map(|m| m.lines().to_vec()), Some(vec![
            "Subtitles".to_string(),
            "  languages: en".to_string(),
        ]));
        assert!(out.path().join("A⧸B.en.srt").is_file());
        assert_eq!(plugin.ytdl_options(&script)?["subtitleslangs"], json!(["en", "de"]));
        Ok(())
    }
}
