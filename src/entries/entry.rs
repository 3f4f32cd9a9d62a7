use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value as Json};

use super::sanitize::escape_braces;
use crate::error::{Error, Result};
use crate::script::Value;

/// One chapter as reported in `chapters` metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Chapter {
    pub start_time: f64,
    pub end_time: f64,
    pub title: String,
}

/// A media item moving through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    metadata: Map<String, Json>,
    working_directory: PathBuf,
    additional_variables: BTreeMap<String, Value>,
    /// Working file stem; split children get their own.
    file_stem: Option<String>,
}

fn escape_json(value: Json) -> Json {
    match value {
        Json::String(text) => Json::String(escape_braces(&text)),
        Json::Array(items) => Json::Array(items.into_iter().map(escape_json).collect()),
        Json::Object(map) => Json::Object(
            map.into_iter()
                .map(|(key, value)| (key, escape_json(value)))
                .collect(),
        ),
        other => other,
    }
}

fn json_to_string(value: &Json) -> Option<String> {
    match value {
        Json::String(text) => Some(text.clone()),
        Json::Number(number) => Some(number.to_string()),
        Json::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

impl Entry {
    /// Wraps fetcher metadata. The payload must be an object with an `id`.
    pub fn new(metadata: Json, working_directory: impl Into<PathBuf>) -> Result<Self> {
        let Json::Object(metadata) = escape_json(metadata) else {
            return Err(Error::Fetcher("entry metadata is not a JSON object".to_string()));
        };
        let has_id = metadata.get("id").and_then(json_to_string).is_some_and(|id| !id.is_empty());
        if !has_id {
            return Err(Error::Fetcher("entry metadata has no 'id'".to_string()));
        }
        Ok(Entry {
            metadata,
            working_directory: working_directory.into(),
            additional_variables: BTreeMap::new(),
            file_stem: None,
        })
    }

    pub fn metadata(&self) -> &Map<String, Json> {
        &self.metadata
    }

    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    pub fn get(&self, key: &str) -> Option<&Json> {
        self.metadata.get(key).filter(|value| !value.is_null())
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key).and_then(json_to_string)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            Json::Number(number) => number
                .as_i64()
                .or_else(|| number.as_f64().map(|float| float as i64)),
            Json::String(text) => text.parse().ok(),
            _ => None,
        }
    }

    pub fn uid(&self) -> String {
        self.get_str("id").unwrap_or_default()
    }

    pub fn title(&self) -> String {
        self.get_str("title").unwrap_or_else(|| self.uid())
    }

    pub fn extractor(&self) -> String {
        self.get_str("extractor")
            .or_else(|| self.get_str("ie_key"))
            .unwrap_or_else(|| "generic".to_string())
    }

    /// Extractor name in the lower-case form yt-dlp writes to its archives.
    pub fn archive_extractor(&self) -> String {
        self.get_str("extractor_key")
            .unwrap_or_else(|| self.extractor())
            .to_lowercase()
    }

    /// `YYYYMMDD`, if the fetcher reported one.
    pub fn upload_date(&self) -> Option<String> {
        self.get_str("upload_date").filter(|date| date.len() == 8)
    }

    /// Media extension, honouring plugins that changed it.
    pub fn ext(&self) -> String {
        match self.additional_variables.get("ext") {
            Some(value) => value.to_display_string(),
            None => self.get_str("ext").unwrap_or_else(|| "mp4".to_string()),
        }
    }

    pub fn file_stem(&self) -> String {
        self.file_stem.clone().unwrap_or_else(|| self.uid())
    }

    pub fn set_file_stem(&mut self, stem: impl Into<String>) {
        self.file_stem = Some(stem.into());
    }

    /// Downloaded media file in the working directory.
    pub fn file_path(&self) -> PathBuf {
        self.working_directory
            .join(format!("{}.{}", self.file_stem(), self.ext()))
    }

    pub fn info_json_path(&self) -> PathBuf {
        self.working_directory
            .join(format!("{}.info.json", self.uid()))
    }

    /// Thumbnail written next to the media, whichever image format it came in.
    pub fn thumbnail_path(&self) -> Option<PathBuf> {
        ["jpg", "webp", "png", "jpeg"]
            .iter()
            .map(|ext| self.working_directory.join(format!("{}.{ext}", self.uid())))
            .find(|path| path.is_file())
    }

    pub fn is_downloaded(&self) -> bool {
        self.file_path().is_file()
    }

    pub fn additional_variables(&self) -> &BTreeMap<String, Value> {
        &self.additional_variables
    }

    pub fn add_variables<S: Into<String>>(&mut self, values: impl IntoIterator<Item = (S, Value)>) {
        for (name, value) in values {
            self.additional_variables.insert(name.into(), value);
        }
    }

    pub fn chapters(&self) -> Vec<Chapter> {
        let Some(Json::Array(items)) = self.get("chapters") else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|item| {
                Some(Chapter {
                    start_time: item.get("start_time")?.as_f64()?,
                    end_time: item.get("end_time")?.as_f64()?,
                    title: item
                        .get("title")
                        .and_then(Json::as_str)
                        .unwrap_or_default()
                        .to_string(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn requires_an_id() {
        assert!(Entry::new(json!({"title": "x"}), "/tmp").is_err());
        assert!(Entry::new(json!([1, 2]), "/tmp").is_err());
        assert!(Entry::new(json!({"id": 12}), "/tmp").is_ok());
    }

    #[test]
    fn braces_in_metadata_are_escaped() -> anyhow::Result<()> {
        let entry = Entry::new(
            json!({"id": "a", "title": "{bad}", "tags": ["{x}"]}),
            "/tmp",
        )?;
        assert_eq!(entry.title(), "｛bad｝");
        assert_eq!(entry.get("tags"), Some(&json!(["｛x｝"])));
        Ok(())
    }

    #[test]
    fn ext_follows_added_variables() -> anyhow::Result<()> {
        let mut entry = Entry::new(json!({"id": "abc", "ext": "webm"}), "/work")?;
        assert_eq!(entry.file_path(), PathBuf::from("/work/abc.webm"));
        entry.add_variables([("ext", Value::string("mp3"))]);
        assert_eq!(entry.file_path(), PathBuf::from("/work/abc.mp3"));
        entry.set_file_stem("abc___1");
        assert_eq!(entry.file_path(), PathBuf::from("/work/abc___1.mp3"));
        Ok(())
    }

    #[test]
    fn reads_chapters() -> anyhow::Result<()> {
        let entry = Entry::new(
            json!({"id": "a", "chapters": [
                {"start_time": 0.0, "end_time": 10.5, "title": "Intro"},
                {"start_time": 10.5, "end_time": 20.0}
            ]}),
            "/tmp",
        )?;
        let chapters = entry.chapters();
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].title, "Intro");
        assert_eq!(chapters[1].end_time, 20.0);
        Ok(())
    }

    #[test]
    fn archive_extractor_is_lower_case() -> anyhow::Result<()> {
        let entry = Entry::new(json!({"id": "a", "extractor": "youtube", "extractor_key": "Youtube"}), "/tmp")?;
        assert_eq!(entry.archive_extractor(), "youtube");
        Ok(())
    }
}
