use serde_json::{Map as JsonMap, Value as Json};
use serde_yaml::Value as Yaml;

use super::{Plugin, PluginOperation};
use crate::error::Result;
use crate::script::Script;
use crate::validators::{Mode, OverridesStringFormatter, ValidationResult, Validator};

/// yt-dlp format selector, e.g. `bv*+ba/b`.
#[derive(Debug)]
pub struct FormatPlugin {
    format: OverridesStringFormatter,
}

impl Validator for FormatPlugin {
    fn validate_in(mode: Mode, name: &str, value: &Yaml) -> ValidationResult<Self> {
        Ok(FormatPlugin {
            format: OverridesStringFormatter::validate_in(mode, name, value)?,
        })
    }
}

impl Plugin for FormatPlugin {
    fn name(&self) -> &'static str {
        "format"
    }

    fn operations(&self) -> &'static [PluginOperation] {
        &[]
    }

    fn overrides_formatters(&self) -> Vec<&OverridesStringFormatter> {
        vec![&self.format]
    }

    fn ytdl_options(&self, script: &Script) -> Result<JsonMap<String, Json>> {
        let mut options = JsonMap::new();
        options.insert("format".to_string(), Json::String(self.format.resolve(script)?));
        Ok(options)
    }
}
