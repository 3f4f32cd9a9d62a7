use std::path::Path;

use serde_json::{Map as JsonMap, Value as Json};
use serde_yaml::Value as Yaml;
use tracing::debug;

use super::{Plugin, PluginContext, PluginOperation};
use crate::entries::Entry;
use crate::error::{Error, Result};
use crate::ffmpeg;
use crate::script::{Script, Value};
use crate::validators::{Mode, StrictDict, ValidationResult, Validator};

const CODECS: &[&str] = &["best", "aac", "alac", "flac", "m4a", "mp3", "opus", "vorbis", "wav"];

/// File extension produced for an audio codec.
fn codec_extension(codec: &str) -> Option<&'static str> {
    Some(match codec {
        "aac" | "alac" | "m4a" => "m4a",
        "flac" => "flac",
        "mp3" => "mp3",
        "opus" => "opus",
        "vorbis" => "ogg",
        "wav" => "wav",
        _ => return None,
    })
}

/// Replaces `entry`'s media with a converted copy carrying `ext`.
pub(super) fn convert_entry(
    entry: &mut Entry,
    ctx: &PluginContext<'_>,
    ext: &str,
    extra_args: &[String],
) -> Result<()> {
    let source = entry.file_path();
    entry.add_variables([("ext", Value::string(ext))]);
    let target = entry.file_path();
    if ctx.dry_run || source == target {
        return Ok(());
    }
    if !source.is_file() {
        return Err(Error::FileNotDownloaded(source));
    }
    debug!("Converting {} to {}", source.display(), target.display());
    ffmpeg::convert(ctx.transcoder, &source, &target, extra_args)?;
    std::fs::remove_file(&source).map_err(Error::from)
}

fn actual_extension(path: &Path) -> Option<String> {
    path.extension().map(|ext| ext.to_string_lossy().into_owned())
}

/// Extracts audio from the download, keeping only the audio track.
#[derive(Debug)]
pub struct AudioExtractPlugin {
    codec: String,
    quality: Option<f64>,
}

impl Validator for AudioExtractPlugin {
    fn validate_in(mode: Mode, name: &str, value: &Yaml) -> ValidationResult<Self> {
        let dict = StrictDict::new(mode, name, value, &[], &["codec", "quality"])?;
        Ok(AudioExtractPlugin {
            codec: dict.select("codec", CODECS, "best")?,
            quality: dict.optional("quality")?,
        })
    }
}

impl Plugin for AudioExtractPlugin {
    fn name(&self) -> &'static str {
        "audio_extract"
    }

    fn operations(&self) -> &'static [PluginOperation] {
        &[PluginOperation::ModifyEntry]
    }

    fn ytdl_options(&self, _script: &Script) -> Result<JsonMap<String, Json>> {
        let mut options = JsonMap::new();
        options.insert("extract_audio".into(), Json::Bool(true));
        options.insert("audio_format".into(), Json::String(self.codec.clone()));
        if let Some(quality) = self.quality {
            options.insert("audio_quality".into(), Json::from(quality));
        }
        Ok(options)
    }

    fn modify_entry(&self, mut entry: Entry, ctx: &PluginContext<'_>) -> Result<Option<Entry>> {
        let Some(ext) = codec_extension(&self.codec) else {
            return Ok(Some(entry));
        };
        if actual_extension(&entry.file_path()).as_deref() == Some(ext) {
            return Ok(Some(entry));
        }
        convert_entry(&mut entry, ctx, ext, &["-vn".to_string()])?;
        Ok(Some(entry))
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

    #[test]
    fn converts_when_fetcher_kept_the_video() -> anyhow::Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("abc.webm"), "video")?;
        let script = script_with(&[]);
        let transcoder = RecordingTranscoder::default();
        let ctx = PluginContext {
            script: &script,
            transcoder: &transcoder,
            working_directory: dir.path(),
            dry_run: false,
        };
        let plugin = AudioExtractPlugin::validate("audio_extract", &yaml("{codec: mp3, quality: 128}"))?;
        let item = entry(dir.path(), json!({"id": "abc", "ext": "webm"}));
        let item = plugin.modify_entry(item, &ctx)?.unwrap();
        assert_eq!(item.ext(), "mp3");
        assert!(dir.path().join("abc.mp3").exists());
        assert!(!dir.path().join("abc.webm").exists());
        assert_eq!(plugin.ytdl_options(&script)?["audio_format"], json!("mp3"));
        Ok(())
    }

    #[test]
    fn best_codec_keeps_extension() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let script = script_with(&[]);
        let transcoder = RecordingTranscoder::default();
        let ctx = PluginContext {
            script: &script,
            transcoder: &transcoder,
            working_directory: dir.path(),
            dry_run: false,
        };
        let plugin = AudioExtractPlugin::validate("audio_extract", &yaml("{}"))?;
        let item = entry(dir.path(), json!({"id": "abc", "ext": "opus"}));
        assert_eq!(plugin.modify_entry(item, &ctx)?.unwrap().ext(), "opus");
        assert!(transcoder.calls.lock().is_empty());
        Ok(())
    }
}
