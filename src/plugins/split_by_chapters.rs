use anyhow::anyhow;
use serde_yaml::Value as Yaml;
use tracing::info;

use super::{MODIFY_ENTRY_SPLIT, Plugin, PluginContext, PluginKind, PluginOperation, PluginPriority};
use crate::entries::Entry;
use crate::error::{Error, Result};
use crate::ffmpeg;
use crate::script::Value;
use crate::validators::{Mode, StrictDict, ValidationResult, Validator};

const ADDED: &[&str] = &["chapter_title", "chapter_index", "chapter_index_padded", "chapter_count"];

fn chapter_variables(title: &str, index: usize, count: usize) -> [(&'static str, Value); 4] {
    [
        ("chapter_title", Value::string(title)),
        ("chapter_index", Value::Integer(index as i64)),
        ("chapter_index_padded", Value::string(format!("{index:02}"))),
        ("chapter_count", Value::Integer(count as i64)),
    ]
}

/// Splits an entry into one child per chapter.
#[derive(Debug)]
pub struct SplitByChaptersPlugin {
    when_no_chapters: String,
}

impl Validator for SplitByChaptersPlugin {
    fn validate_in(mode: Mode, name: &str, value: &Yaml) -> ValidationResult<Self> {
        let dict = StrictDict::new(mode, name, value, &["when_no_chapters"], &[])?;
        Ok(SplitByChaptersPlugin {
            when_no_chapters: dict.select("when_no_chapters", &["pass", "drop", "error"], "pass")?,
        })
    }
}

impl Plugin for SplitByChaptersPlugin {
    fn name(&self) -> &'static str {
        "split_by_chapters"
    }

    fn operations(&self) -> &'static [PluginOperation] {
        &[PluginOperation::ModifyEntry]
    }

    fn kind(&self) -> PluginKind {
        PluginKind::Split
    }

    fn priority(&self) -> PluginPriority {
        PluginPriority {
            modify_entry: MODIFY_ENTRY_SPLIT,
            ..PluginPriority::default()
        }
    }

    fn added_variables(&self) -> Vec<(String, PluginOperation)> {
        ADDED
            .iter()
            .map(|name| (name.to_string(), PluginOperation::ModifyEntry))
            .collect()
    }

    fn split_entry(&self, mut entry: Entry, ctx: &PluginContext<'_>) -> Result<Vec<Entry>> {
        let chapters = entry.chapters();
        if chapters.is_empty() {
            return match self.when_no_chapters.as_str() {
                "drop" => {
                    info!("Dropping '{}', it has no chapters", entry.title());
                    Ok(Vec::new())
                }
                "error" => Err(Error::Other(anyhow!(
                    "Tried to split '{}' by chapters but it has no chapters",
                    entry.title()
                ))),
                _ => {
                    let title = entry.title();
                    entry.add_variables(chapter_variables(&title, 1, 1));
                    Ok(vec![entry])
                }
            };
        }

        let source = entry.file_path();
        if !ctx.dry_run && !source.is_file() {
            return Err(Error::FileNotDownloaded(source));
        }
        let count = chapters.len();
        let mut children = Vec::with_capacity(count);
        for (position, chapter) in chapters.iter().enumerate() {
            let index = position + 1;
            let mut child = entry.clone();
            child.set_file_stem(format!("{}___{index}", entry.uid()));
            child.add_variables(chapter_variables(&chapter.title, index, count));
            if !ctx.dry_run {
                ffmpeg::cut(
                    ctx.transcoder,
                    &source,
                    chapter.start_time,
                    chapter.end_time,
                    &child.file_path(),
                )?;
            }
            children.push(child);
        }
        if !ctx.dry_run {
            std::fs::remove_file(&source)?;
        }
        Ok(children)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::json;
    use tempfile::tempdir;

    use super::super::testing::{entry, script_with, yaml};
    use super::*;
    use crate::entries::entry_variables;
    use crate::ffmpeg::testing::RecordingTranscoder;

    fn chaptered(dir: &std::path::Path) -> Entry {
        entry(
            dir,
            json!({"id": "abc", "title": "Album", "ext": "mp3", "chapters": [
                {"start_time": 0.0, "end_time": 61.5, "title": "Track One"},
                {"start_time": 61.5, "end_time": 130.0, "title": "Track Two"}
            ]}),
        )
    }

    #[test]
    fn splits_into_one_child_per_chapter() -> anyhow::Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("abc.mp3"), "audio")?;
        let script = script_with(&[]);
        let transcoder = RecordingTranscoder::default();
        let ctx = PluginContext {
            script: &script,
            transcoder: &transcoder,
            working_directory: dir.path(),
            dry_run: false,
        };
        let plugin = SplitByChaptersPlugin::validate("split_by_chapters", &yaml("{when_no_chapters: pass}"))?;
        let children = plugin.split_entry(chaptered(dir.path()), &ctx)?;
        assert_eq!(children.len(), 2);
        assert!(dir.path().join("abc___2.mp3").exists());
        assert!(!dir.path().join("abc.mp3").exists());

        let second = entry_variables(&children[1]);
        assert_eq!(second["chapter_title"], Value::string("Track Two"));
        assert_eq!(second["chapter_index_padded"], Value::string("02"));
        assert_eq!(second["chapter_count"], Value::Integer(2));
        assert_eq!(second["uid"], Value::string("abc"));
        let calls = transcoder.calls.lock();
        assert!(calls[1].contains(&"61.500".to_string()));
        Ok(())
    }

    #[test]
    fn no_chapters_policy() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let script = script_with(&[]);
        let transcoder = RecordingTranscoder::default();
        let ctx = PluginContext {
            script: &script,
            transcoder: &transcoder,
            working_directory: dir.path(),
            dry_run: false,
        };
        let plain = || entry(dir.path(), json!({"id": "x", "title": "Single"}));
        let pass = SplitByChaptersPlugin::validate("s", &yaml("{when_no_chapters: pass}"))?;
        let drop = SplitByChaptersPlugin::validate("s", &yaml("{when_no_chapters: drop}"))?;
        let error = SplitByChaptersPlugin::validate("s", &yaml("{when_no_chapters: error}"))?;
        let passed = pass.split_entry(plain(), &ctx)?;
        assert_eq!(entry_variables(&passed[0])["chapter_title"], Value::string("Single"));
        assert!(drop.split_entry(plain(), &ctx)?.is_empty());
        assert!(error.split_entry(plain(), &ctx).is_err());
        assert!(SplitByChaptersPlugin::validate("s", &yaml("{}")).is_err());
        Ok(())
    }
}
