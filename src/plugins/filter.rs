use serde_yaml::Value as Yaml;
use tracing::info;

use super::{Plugin, PluginContext, PluginOperation};
use crate::entries::Entry;
use crate::error::Result;
use crate::script::Value;
use crate::validators::{Mode, StringFormatter, ValidationError, ValidationResult, Validator};

fn evaluate(formatter: &StringFormatter, entry: &Entry, ctx: &PluginContext<'_>) -> Result<bool> {
    match ctx.resolve_value(formatter, entry)? {
        Value::Boolean(flag) => Ok(flag),
        Value::String(text) if text.eq_ignore_ascii_case("true") => Ok(true),
        Value::String(text) if text.eq_ignore_ascii_case("false") => Ok(false),
        other => Err(ValidationError::new(
            formatter.name(),
            format!(
                "filter must evaluate to a boolean, got {} '{}'",
                other.type_name(),
                other.to_display_string()
            ),
        )
        .into()),
    }
}

/// Keeps an entry only when every formatter is true.
#[derive(Debug)]
pub struct FilterIncludePlugin {
    filters: Vec<StringFormatter>,
}

impl Validator for FilterIncludePlugin {
    fn validate_in(mode: Mode, name: &str, value: &Yaml) -> ValidationResult<Self> {
        Ok(FilterIncludePlugin {
            filters: Vec::validate_in(mode, name, value)?,
        })
    }
}

impl Plugin for FilterIncludePlugin {
    fn name(&self) -> &'static str {
        "filter_include"
    }

    fn operations(&self) -> &'static [PluginOperation] {
        &[PluginOperation::ModifyEntryMetadata]
    }

    fn formatters(&self) -> Vec<(&StringFormatter, PluginOperation)> {
        self.filters
            .iter()
            .map(|filter| (filter, PluginOperation::ModifyEntryMetadata))
            .collect()
    }

    fn modify_entry_metadata(&self, entry: Entry, ctx: &PluginContext<'_>) -> Result<Option<Entry>> {
        for filter in &self.filters {
            if !evaluate(filter, &entry, ctx)? {
                info!("Filtering '{}' from filter_include: {}", entry.title(), filter.source());
                return Ok(None);
            }
        }
        Ok(Some(entry))
    }
}

/// Drops an entry when any formatter is true.
#[derive(Debug)]
pub struct FilterExcludePlugin {
    filters: Vec<StringFormatter>,
}

impl Validator for FilterExcludePlugin {
    fn validate_in(mode: Mode, name: &str, value: &Yaml) -> ValidationResult<Self> {
        Ok(FilterExcludePlugin {
            filters: Vec::validate_in(mode, name, value)?,
        })
    }
}

impl Plugin for FilterExcludePlugin {
    fn name(&self) -> &'static str {
        "filter_exclude"
    }

    fn operations(&self) -> &'static [PluginOperation] {
        &[PluginOperation::ModifyEntryMetadata]
    }

    fn formatters(&self) -> Vec<(&StringFormatter, PluginOperation)> {
        self.filters
            .iter()
            .map(|filter| (filter, PluginOperation::ModifyEntryMetadata))
            .collect()
    }

    fn modify_entry_metadata(&self, entry: Entry, ctx: &PluginContext<'_>) -> Result<Option<Entry>> {
        for filter in &self.filters {
            if evaluate(filter, &entry, ctx)? {
                info!("Filtering '{}' from filter_exclude: {}", entry.title(), filter.source());
                return Ok(None);
            }
        }
        Ok(Some(entry))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use super::super::testing::{entry, script_with, yaml};
    use super::*;
    use crate::ffmpeg::testing::RecordingTranscoder;

    #[test]
    fn include_and_exclude() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let script = script_with(&[]);
        let transcoder = RecordingTranscoder::default();
        let ctx = PluginContext {
            script: &script,
            transcoder: &transcoder,
            working_directory: dir.path(),
            dry_run: false,
        };
        let include = FilterIncludePlugin::validate(
            "filter_include",
            &yaml(r#"["{%contains(title, 'Podcast')}", "{%gt(duration, 60)}"]"#),
        )?;
        let exclude = FilterExcludePlugin::validate("filter_exclude", &yaml(r#""{%contains(%lower(title), 'short')}""#))?;

        let keep = entry(dir.path(), json!({"id": "a", "title": "Podcast 1", "duration": 3600}));
        let short = entry(dir.path(), json!({"id": "b", "title": "Podcast Short", "duration": 3600}));
        let brief = entry(dir.path(), json!({"id": "c", "title": "Podcast 2", "duration": 30}));

        let keep = include.modify_entry_metadata(keep, &ctx)?;
        assert!(keep.is_some());
        assert!(exclude.modify_entry_metadata(short, &ctx)?.is_none());
        assert!(include.modify_entry_metadata(brief, &ctx)?.is_none());
        Ok(())
    }

    #[test]
    fn non_boolean_filter_is_an_error() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let script = script_with(&[]);
        let transcoder = RecordingTranscoder::default();
        let ctx = PluginContext {
            script: &script,
            transcoder: &transcoder,
            working_directory: dir.path(),
            dry_run: false,
        };
        let include = FilterIncludePlugin::validate("filter_include", &yaml("'{title}'"))?;
        let item = entry(dir.path(), json!({"id": "a", "title": "x"}));
        assert!(include.modify_entry_metadata(item, &ctx).is_err());
        Ok(())
    }
}
