use serde_json::{Map as JsonMap, Value as Json};
use serde_yaml::Value as Yaml;

use super::{Plugin, PluginOperation};
use crate::error::Result;
use crate::script::Script;
use crate::validators::{Mode, ValidationError, ValidationResult, Validator};

/// Opaque options handed to the fetcher as-is.
#[derive(Debug)]
pub struct YtdlOptionsPlugin {
    options: JsonMap<String, Json>,
}

impl Validator for YtdlOptionsPlugin {
    fn validate_in(_: Mode, name: &str, value: &Yaml) -> ValidationResult<Self> {
        match serde_json::to_value(value) {
            Ok(Json::Object(options)) => Ok(YtdlOptionsPlugin { options }),
            Ok(_) => Err(ValidationError::new(name, "should be of type object")),
            Err(error) => Err(ValidationError::new(name, error.to_string())),
        }
    }
}

impl Plugin for YtdlOptionsPlugin {
    fn name(&self) -> &'static str {
        "ytdl_options"
    }

    fn operations(&self) -> &'static [PluginOperation] {
        &[]
    }

    fn ytdl_options(&self, _script: &Script) -> Result<JsonMap<String, Json>> {
        Ok(self.options.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::yaml;
    use super::*;

    #[test]
    fn passes_options_through() -> anyhow::Result<()> {
        let plugin = YtdlOptionsPlugin::validate("ytdl_options", &yaml("{cookiefile: c.txt, max_downloads: 3}"))?;
        let options = plugin.ytdl_options(&Script::new())?;
        assert_eq!(options["cookiefile"], serde_json::json!("c.txt"));
        assert_eq!(options["max_downloads"], serde_json::json!(3));
        assert!(YtdlOptionsPlugin::validate("ytdl_options", &yaml("[1]")).is_err());
        Ok(())
    }
}
