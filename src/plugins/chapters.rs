use serde_json::{Map as JsonMap, Value as Json};
use serde_yaml::Value as Yaml;

use super::{Plugin, PluginOperation};
use crate::error::Result;
use crate::script::Script;
use crate::validators::{Mode, StrictDict, ValidationError, ValidationResult, Validator, select};

const SPONSORBLOCK_CATEGORIES: &[&str] = &[
    "all",
    "sponsor",
    "intro",
    "outro",
    "selfpromo",
    "preview",
    "filler",
    "interaction",
    "music_offtopic",
    "poi_highlight",
    "chapter",
];

fn categories(dict: &StrictDict<'_>, key: &str) -> ValidationResult<Vec<String>> {
    let Some(value) = dict.get(key) else {
        return Ok(Vec::new());
    };
    let name = dict.child_name(key);
    let items: Vec<Yaml> = match value {
        Yaml::Sequence(items) => items.clone(),
        single => vec![single.clone()],
    };
    items
        .iter()
        .enumerate()
        .map(|(index, item)| select(&format!("{name}[{index}]"), item, SPONSORBLOCK_CATEGORIES))
        .collect()
}

/// Chapter embedding and SponsorBlock handling, done by the fetcher.
#[derive(Debug)]
pub struct ChaptersPlugin {
    embed_chapters: bool,
    sponsorblock_categories: Vec<String>,
    remove_sponsorblock_categories: Vec<String>,
    remove_chapters_regex: Vec<String>,
    force_key_frames: bool,
}

impl Validator for ChaptersPlugin {
    fn validate_in(mode: Mode, name: &str, value: &Yaml) -> ValidationResult<Self> {
        let dict = StrictDict::new(
            mode,
            name,
            value,
            &[],
            &[
                "embed_chapters",
                "sponsorblock_categories",
                "remove_sponsorblock_categories",
                "remove_chapters_regex",
                "force_key_frames",
            ],
        )?;
        let plugin = ChaptersPlugin {
            embed_chapters: dict.optional_or("embed_chapters", true)?,
            sponsorblock_categories: categories(&dict, "sponsorblock_categories")?,
            remove_sponsorblock_categories: categories(&dict, "remove_sponsorblock_categories")?,
            remove_chapters_regex: dict.optional_or("remove_chapters_regex", Vec::new())?,
            force_key_frames: dict.optional_or("force_key_frames", false)?,
        };
        for regex in &plugin.remove_chapters_regex {
            if let Err(error) = regex::Regex::new(regex) {
                return Err(ValidationError::new(dict.child_name("remove_chapters_regex"), error.to_string()));
            }
        }
        let marks_all = plugin.sponsorblock_categories.iter().any(|category| category == "all");
        if !marks_all
            && let Some(unmarked) = plugin
                .remove_sponsorblock_categories
                .iter()
                .find(|category| *category != "all" && !plugin.sponsorblock_categories.contains(category))
        {
            return Err(ValidationError::new(
                dict.child_name("remove_sponsorblock_categories"),
                format!("'{unmarked}' must also be listed in sponsorblock_categories"),
            ));
        }
        Ok(plugin)
    }
}

fn strings(values: &[String]) -> Json {
    Json::Array(values.iter().cloned().map(Json::String).collect())
}

impl Plugin for ChaptersPlugin {
    fn name(&self) -> &'static str {
        "chapters"
    }

    fn operations(&self) -> &'static [PluginOperation] {
        &[]
    }

    fn ytdl_options(&self, _script: &Script) -> Result<JsonMap<String, Json>> {
        let mut options = JsonMap::new();
        if self.embed_chapters {
            options.insert("embed_chapters".into(), Json::Bool(true));
        }
        if !self.sponsorblock_categories.is_empty() {
            options.insert("sponsorblock_mark".into(), strings(&self.sponsorblock_categories));
        }
        if !self.remove_sponsorblock_categories.is_empty() {
            options.insert("sponsorblock_remove".into(), strings(&self.remove_sponsorblock_categories));
        }
        if !self.remove_chapters_regex.is_empty() {
            options.insert("remove_chapters".into(), strings(&self.remove_chapters_regex));
        }
        if self.force_key_frames {
            options.insert("force_keyframes_at_cuts".into(), Json::Bool(true));
        }
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::super::testing::yaml;
    use super::*;

    #[test]
    fn builds_sponsorblock_options() -> anyhow::Result<()> {
        let plugin = ChaptersPlugin::validate(
            "chapters",
            &yaml("{sponsorblock_categories: [sponsor, intro], remove_sponsorblock_categories: sponsor, remove_chapters_regex: ['^Ad']}"),
        )?;
        let options = plugin.ytdl_options(&Script::new())?;
        assert_eq!(options["embed_chapters"], json!(true));
        assert_eq!(options["sponsorblock_mark"], json!(["sponsor", "intro"]));
        assert_eq!(options["sponsorblock_remove"], json!(["sponsor"]));
        assert_eq!(options["remove_chapters"], json!(["^Ad"]));
        Ok(())
    }

    #[test]
    fn removed_categories_must_be_marked() {
        let error = ChaptersPlugin::validate(
            "chapters",
            &yaml("{sponsorblock_categories: [intro], remove_sponsorblock_categories: [outro]}"),
        )
        .unwrap_err();
        assert_eq!(error.path(), "chapters.remove_sponsorblock_categories");
        assert!(ChaptersPlugin::validate("chapters", &yaml("{sponsorblock_categories: [bogus]}")).is_err());
    }
}
