use serde_json::{Map as JsonMap, Value as Json};
use serde_yaml::Value as Yaml;

use super::{Plugin, PluginOperation};
use crate::error::Result;
use crate::script::Script;
use crate::validators::{Mode, OverridesStringFormatter, StrictDict, ValidationResult, Validator};

/// yt-dlp match filters; an entry passing any one of them is kept.
#[derive(Debug)]
pub struct MatchFiltersPlugin {
    filters: Vec<OverridesStringFormatter>,
}

impl Validator for MatchFiltersPlugin {
    fn validate_in(mode: Mode, name: &str, value: &Yaml) -> ValidationResult<Self> {
        let dict = StrictDict::new(mode, name, value, &[], &["filters"])?;
        Ok(MatchFiltersPlugin {
            filters: dict.optional_or("filters", Vec::new())?,
        })
    }
}

impl Plugin for MatchFiltersPlugin {
    fn name(&self) -> &'static str {
        "match_filters"
    }

    fn operations(&self) -> &'static [PluginOperation] {
        &[]
    }

    fn overrides_formatters(&self) -> Vec<&OverridesStringFormatter> {
        self.filters.iter().collect()
    }

    fn ytdl_options(&self, script: &Script) -> Result<JsonMap<String, Json>> {
        let mut options = JsonMap::new();
        let filters = self
            .filters
            .iter()
            .map(|filter| Ok(Json::String(filter.resolve(script)?)))
            .collect::<Result<Vec<_>>>()?;
        if !filters.is_empty() {
            options.insert("match_filter".to_string(), Json::Array(filters));
        }
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::yaml;
    use super::*;

    #[test]
    fn filters_become_a_list() -> anyhow::Result<()> {
        let plugin = MatchFiltersPlugin::validate(
            "match_filters",
            &yaml("{filters: ['!is_live', 'duration > 60']}"),
        )?;
        let options = plugin.ytdl_options(&Script::new())?;
        assert_eq!(options["match_filter"], serde_json::json!(["!is_live", "duration > 60"]));

        let empty = MatchFiltersPlugin::validate("match_filters", &yaml("{}"))?;
        assert!(empty.ytdl_options(&Script::new())?.is_empty());
        Ok(())
    }
}
