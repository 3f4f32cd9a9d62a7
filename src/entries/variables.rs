//! The variable set every entry exposes to formatters.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, NaiveDate, Utc};

use super::entry::Entry;
use super::sanitize::sanitize_filename;
use crate::script::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    String,
    Integer,
    Map,
}

use VariableKind::{Integer, Map, String as Str};

const DATE_FAMILY: &[(&str, VariableKind)] = &[
    ("", Str),
    ("year", Integer),
    ("year_truncated", Integer),
    ("month", Integer),
    ("month_padded", Str),
    ("day", Integer),
    ("day_padded", Str),
    ("day_of_year", Integer),
    ("day_of_year_padded", Str),
    ("date_standardized", Str),
];

const PLAIN: &[(&str, VariableKind)] = &[
    ("uid", Str),
    ("extractor", Str),
    ("extractor_key", Str),
    ("title", Str),
    ("webpage_url", Str),
    ("ext", Str),
    ("thumbnail_ext", Str),
    ("info_json_ext", Str),
    ("description", Str),
    ("uploader", Str),
    ("uploader_id", Str),
    ("uploader_url", Str),
    ("channel", Str),
    ("channel_id", Str),
    ("duration", Integer),
    ("epoch", Integer),
    ("epoch_date", Str),
    ("playlist_uid", Str),
    ("playlist_title", Str),
    ("playlist_index", Integer),
    ("playlist_index_padded", Str),
    ("playlist_count", Integer),
    ("playlist_webpage_url", Str),
    ("source_uid", Str),
    ("source_title", Str),
    ("entry_metadata", Map),
    ("download_index", Integer),
    ("upload_date_index", Integer),
];

/// Name of a date-family member, e.g. `upload` + `month_padded`.
fn date_name(prefix: &str, suffix: &str) -> String {
    if suffix.is_empty() {
        format!("{prefix}_date")
    } else {
        format!("{prefix}_{suffix}")
    }
}

/// Every entry variable with its kind, excluding `_sanitized` twins.
pub fn entry_variable_kinds() -> Vec<(String, VariableKind)> {
    let mut out: Vec<(String, VariableKind)> = PLAIN
        .iter()
        .map(|(name, kind)| (name.to_string(), *kind))
        .collect();
    for prefix in ["upload", "release"] {
        for (suffix, kind) in DATE_FAMILY {
            out.push((date_name(prefix, suffix), *kind));
        }
    }
    out
}

/// Every name an entry binds, including `_sanitized` twins.
pub fn entry_variable_names() -> Vec<String> {
    with_sanitized_names(entry_variable_kinds())
}

/// Adds the `_sanitized` twin of every string name.
pub fn with_sanitized_names(kinds: Vec<(String, VariableKind)>) -> Vec<String> {
    let mut names = Vec::with_capacity(kinds.len() * 2);
    for (name, kind) in kinds {
        if kind == Str {
            names.push(format!("{name}_sanitized"));
        }
        names.push(name);
    }
    names
}

fn insert_date_family(out: &mut BTreeMap<String, Value>, prefix: &str, date: &str) {
    let parsed = NaiveDate::parse_from_str(date, "%Y%m%d")
        .unwrap_or_else(|_| DateTime::<Utc>::UNIX_EPOCH.date_naive());
    let year = i64::from(parsed.year());
    let ordinal = i64::from(parsed.ordinal());
    let values = [
        ("", Value::string(parsed.format("%Y%m%d").to_string())),
        ("year", Value::Integer(year)),
        ("year_truncated", Value::Integer(year % 100)),
        ("month", Value::Integer(i64::from(parsed.month()))),
        ("month_padded", Value::string(format!("{:02}", parsed.month()))),
        ("day", Value::Integer(i64::from(parsed.day()))),
        ("day_padded", Value::string(format!("{:02}", parsed.day()))),
        ("day_of_year", Value::Integer(ordinal)),
        ("day_of_year_padded", Value::string(format!("{ordinal:03}"))),
        ("date_standardized", Value::string(parsed.format("%Y-%m-%d").to_string())),
    ];
    for (suffix, value) in values {
        out.insert(date_name(prefix, suffix), value);
    }
}

/// Computes the variables of `entry`, plugin-added ones included, with a
/// `_sanitized` twin for every string.
pub fn entry_variables(entry: &Entry) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    let text = |key: &str| entry.get_str(key).unwrap_or_default();
    let uid = entry.uid();

    out.insert("uid".to_string(), Value::string(&uid));
    out.insert("extractor".to_string(), Value::string(entry.extractor()));
    out.insert(
        "extractor_key".to_string(),
        Value::string(entry.get_str("extractor_key").unwrap_or_else(|| entry.extractor())),
    );
    out.insert("title".to_string(), Value::string(entry.title()));
    out.insert("webpage_url".to_string(), Value::string(text("webpage_url")));
    out.insert("ext".to_string(), Value::string(entry.ext()));
    out.insert("thumbnail_ext".to_string(), Value::string("jpg"));
    out.insert("info_json_ext".to_string(), Value::string("info.json"));
    for key in ["description", "uploader", "uploader_id", "uploader_url"] {
        out.insert(key.to_string(), Value::string(text(key)));
    }
    let channel = entry.get_str("channel").unwrap_or_else(|| text("uploader"));
    let channel_id = entry.get_str("channel_id").unwrap_or_else(|| text("uploader_id"));
    out.insert("channel".to_string(), Value::string(channel));
    out.insert("channel_id".to_string(), Value::string(channel_id));
    out.insert(
        "duration".to_string(),
        Value::Integer(entry.get_i64("duration").unwrap_or(0)),
    );

    let epoch = entry
        .get_i64("epoch")
        .or_else(|| entry.get_i64("timestamp"))
        .unwrap_or(0);
    let epoch_date = DateTime::from_timestamp(epoch, 0)
        .map(|moment| moment.format("%Y%m%d").to_string())
        .unwrap_or_else(|| "19700101".to_string());
    out.insert("epoch".to_string(), Value::Integer(epoch));
    out.insert("epoch_date".to_string(), Value::string(&epoch_date));

    let upload_date = entry.upload_date().unwrap_or(epoch_date);
    let release_date = entry
        .get_str("release_date")
        .filter(|date| date.len() == 8)
        .unwrap_or_else(|| upload_date.clone());
    insert_date_family(&mut out, "upload", &upload_date);
    insert_date_family(&mut out, "release", &release_date);

    let playlist_uid = entry.get_str("playlist_id").unwrap_or_else(|| uid.clone());
    let playlist_title = entry.get_str("playlist_title").unwrap_or_else(|| entry.title());
    let playlist_index = entry.get_i64("playlist_index").unwrap_or(1);
    let playlist_count = entry
        .get_i64("playlist_count")
        .or_else(|| entry.get_i64("n_entries"))
        .unwrap_or(1);
    let playlist_url = entry
        .get_str("playlist_webpage_url")
        .unwrap_or_else(|| text("webpage_url"));
    out.insert("playlist_uid".to_string(), Value::string(&playlist_uid));
    out.insert("playlist_title".to_string(), Value::string(&playlist_title));
    out.insert("playlist_index".to_string(), Value::Integer(playlist_index));
    out.insert(
        "playlist_index_padded".to_string(),
        Value::string(format!("{playlist_index:02}")),
    );
    out.insert("playlist_count".to_string(), Value::Integer(playlist_count));
    out.insert("playlist_webpage_url".to_string(), Value::string(playlist_url));
    out.insert(
        "source_uid".to_string(),
        Value::string(entry.get_str("source_id").unwrap_or(playlist_uid)),
    );
    out.insert(
        "source_title".to_string(),
        Value::string(entry.get_str("source_title").unwrap_or(playlist_title)),
    );
    out.insert(
        "entry_metadata".to_string(),
        Value::from_json(&serde_json::Value::Object(entry.metadata().clone())),
    );
    out.insert("download_index".to_string(), Value::Integer(1));
    out.insert("upload_date_index".to_string(), Value::Integer(1));

    for (name, value) in entry.additional_variables() {
        out.insert(name.clone(), value.clone());
    }

    let sanitized: Vec<(String, Value)> = out
        .iter()
        .filter(|(name, _)| !name.ends_with("_sanitized"))
        .filter_map(|(name, value)| {
            let text = value.as_str()?;
            Some((format!("{name}_sanitized"), Value::string(sanitize_filename(text))))
        })
        .collect();
    out.extend(sanitized);
    out
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn entry(metadata: serde_json::Value) -> Entry {
        Entry::new(metadata, "/work").unwrap()
    }

    #[test]
    fn derives_upload_date_family() {
        let variables = entry_variables(&entry(json!({
            "id": "abc",
            "title": "A/B",
            "upload_date": "20210305",
        })));
        assert_eq!(variables["upload_year"], Value::Integer(2021));
        assert_eq!(variables["upload_year_truncated"], Value::Integer(21));
        assert_eq!(variables["upload_month_padded"], Value::string("03"));
        assert_eq!(variables["upload_day_padded"], Value::string("05"));
        assert_eq!(variables["upload_day_of_year"], Value::Integer(64));
        assert_eq!(variables["upload_day_of_year_padded"], Value::string("064"));
        assert_eq!(variables["upload_date_standardized"], Value::string("2021-03-05"));
        assert_eq!(variables["release_date"], Value::string("20210305"));
        assert_eq!(variables["title_sanitized"], Value::string("A⧸B"));
    }

    #[test]
    fn playlist_fields_have_defaults() {
        let variables = entry_variables(&entry(json!({"id": "abc", "title": "T"})));
        assert_eq!(variables["playlist_index"], Value::Integer(1));
        assert_eq!(variables["playlist_index_padded"], Value::string("01"));
        assert_eq!(variables["playlist_uid"], Value::string("abc"));
        assert_eq!(variables["source_title"], Value::string("T"));
        assert_eq!(variables["upload_date"], Value::string("19700101"));
    }

    #[test]
    fn null_metadata_becomes_empty_string() {
        let variables = entry_variables(&entry(json!({"id": "abc", "description": null})));
        assert_eq!(variables["description"], Value::string(""));
    }

    #[test]
    fn added_variables_override_and_get_twins() {
        let mut item = entry(json!({"id": "abc", "ext": "webm"}));
        item.add_variables([
            ("ext", Value::string("mp3")),
            ("chapter_title", Value::string("Part: One")),
        ]);
        let variables = entry_variables(&item);
        assert_eq!(variables["ext"], Value::string("mp3"));
        assert_eq!(variables["chapter_title_sanitized"], Value::string("Part： One"));
    }

    #[test]
    fn declared_names_cover_computed_ones() {
        let names = entry_variable_names();
        let variables = entry_variables(&entry(json!({"id": "abc"})));
        for name in variables.keys() {
            assert!(names.contains(name), "{name} is not declared");
        }
        assert_eq!(names.len(), variables.len());
    }
}
