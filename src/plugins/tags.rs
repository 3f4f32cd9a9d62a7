use serde_yaml::Value as Yaml;

use super::{Plugin, PluginContext, PluginOperation};
use crate::entries::Entry;
use crate::error::{Error, Result};
use crate::ffmpeg;
use crate::file_handler::OutputWriter;
use crate::transaction_log::FileMetadata;
use crate::validators::{DictFormatter, Mode, StringFormatter, ValidationResult, Validator};

fn embed(
    tags: &DictFormatter,
    title: &str,
    entry: &Entry,
    ctx: &PluginContext<'_>,
) -> Result<Option<FileMetadata>> {
    let resolved = tags.resolve(ctx.script, &ctx.overlay(entry))?;
    if resolved.is_empty() {
        return Ok(None);
    }
    if !ctx.dry_run {
        let file = entry.file_path();
        if !file.is_file() {
            return Err(Error::FileNotDownloaded(file));
        }
        ffmpeg::embed_tags(ctx.transcoder, &file, &resolved)?;
    }
    Ok(Some(FileMetadata::from_pairs(title, resolved)))
}

fn tag_formatters(tags: &DictFormatter) -> Vec<(&StringFormatter, PluginOperation)> {
    tags.iter()
        .map(|(_, formatter)| (formatter, PluginOperation::PostProcess))
        .collect()
}

/// Audio tags such as artist, album and track number.
#[derive(Debug)]
pub struct MusicTagsPlugin {
    tags: DictFormatter,
}

impl Validator for MusicTagsPlugin {
    fn validate_in(mode: Mode, name: &str, value: &Yaml) -> ValidationResult<Self> {
        Ok(MusicTagsPlugin {
            tags: DictFormatter::validate_in(mode, name, value)?,
        })
    }
}

impl Plugin for MusicTagsPlugin {
    fn name(&self) -> &'static str {
        "music_tags"
    }

    fn operations(&self) -> &'static [PluginOperation] {
        &[PluginOperation::PostProcess]
    }

    fn formatters(&self) -> Vec<(&StringFormatter, PluginOperation)> {
        tag_formatters(&self.tags)
    }

    fn post_process_entry(
        &self,
        entry: &Entry,
        ctx: &PluginContext<'_>,
        _output: &mut OutputWriter<'_>,
    ) -> Result<Option<FileMetadata>> {
        embed(&self.tags, "Music Tags", entry, ctx)
    }
}

/// Container tags for video files.
#[derive(Debug)]
pub struct VideoTagsPlugin {
    tags: DictFormatter,
}

impl Validator for VideoTagsPlugin {
    fn validate_in(mode: Mode, name: &str, value: &Yaml) -> ValidationResult<Self> {
        Ok(VideoTagsPlugin {
            tags: DictFormatter::validate_in(mode, name, value)?,
        })
    }
}

impl Plugin for VideoTagsPlugin {
    fn name(&self) -> &'static str {
        "video_tags"
    }

    fn operations(&self) -> &'static [PluginOperation] {
        &[PluginOperation::PostProcess]
    }

    fn formatters(&self) -> Vec<(&StringFormatter, PluginOperation)> {
        tag_formatters(&self.tags)
    }

    fn post_process_entry(
        &self,
        entry: &Entry,
        ctx: &PluginContext<'_>,
        _output: &mut OutputWriter<'_>,
    ) -> Result<Option<FileMetadata>> {
        embed(&self.tags, "Video Tags", entry, ctx)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::json;
    use tempfile::tempdir;

    use super::super::testing::{entry, script_with, yaml};
    use super::*;
    use crate::ffmpeg::testing::RecordingTranscoder;
    use crate::file_handler::FileHandler;
    use crate::transaction_log::TransactionLog;

    #[test]
    fn embeds_resolved_tags() -> anyhow::Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("abc.mp3"), "audio")?;
        let script = script_with(&[("album", "Greatest")]);
        let transcoder = RecordingTranscoder::default();
        let ctx = PluginContext {
            script: &script,
            transcoder: &transcoder,
            working_directory: dir.path(),
            dry_run: false,
        };
        let plugin = MusicTagsPlugin::validate(
            "music_tags",
            &yaml("{title: '{title}', album: '{album}', track: '{playlist_index}'}"),
        )?;
        let mut log = TransactionLog::new(dir.path());
        let mut writer = OutputWriter::new(FileHandler::new(false), dir.path(), &mut log);
        let item = entry(dir.path(), json!({"id": "abc", "title": "Song", "ext": "mp3"}));
        let metadata = plugin.post_process_entry(&item, &ctx, &mut writer)?;
        assert_eq!(
            metadata.map(|m| m.lines().to_vec()),
            Some(vec![
                "Music Tags".to_string(),
                "  title: Song".to_string(),
                "  album: Greatest".to_string(),
                "  track: 1".to_string(),
            ])
        );
        let calls = transcoder.calls.lock();
        assert!(calls[0].contains(&"album=Greatest".to_string()));
        Ok(())
    }

    #[test]
    fn dry_run_only_reports() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let script = script_with(&[]);
        let transcoder = RecordingTranscoder::default();
        let ctx = PluginContext {
            script: &script,
            transcoder: &transcoder,
            working_directory: dir.path(),
            dry_run: true,
        };
        let plugin = VideoTagsPlugin::validate("video_tags", &yaml("{title: '{title}'}"))?;
        let mut log = TransactionLog::new(dir.path());
        let mut writer = OutputWriter::new(FileHandler::new(true), dir.path(), &mut log);
        let item = entry(dir.path(), json!({"id": "abc", "title": "Clip"}));
        assert!(plugin.post_process_entry(&item, &ctx, &mut writer)?.is_some());
        assert!(transcoder.calls.lock().is_empty());
        Ok(())
    }
}
