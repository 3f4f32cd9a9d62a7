//! Translation of fetcher options into yt-dlp command-line flags.

use serde_json::{Map as JsonMap, Value as Json};
use tracing::warn;

/// Options passed to the fetcher, keyed the way yt-dlp's Python API names
/// them (e.g. `break_on_reject`, `subtitleslangs`).
pub type FetchOptions = JsonMap<String, Json>;

/// Option key that carries the yt-dlp archive file path.
pub const DOWNLOAD_ARCHIVE: &str = "download_archive";

fn scalar(value: &Json) -> Option<String> {
    match value {
        Json::String(text) => Some(text.clone()),
        Json::Number(number) => Some(number.to_string()),
        Json::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn joined(value: &Json, separator: &str) -> Option<String> {
    match value {
        Json::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(scalar).collect();
            Some(parts.join(separator))
        }
        other => scalar(other),
    }
}

fn push_each(args: &mut Vec<String>, flag: &str, value: &Json) {
    match value {
        Json::Array(items) => {
            for item in items.iter().filter_map(scalar) {
                args.push(flag.to_string());
                args.push(item);
            }
        }
        other => {
            if let Some(item) = scalar(other) {
                args.push(flag.to_string());
                args.push(item);
            }
        }
    }
}

fn push_switch(args: &mut Vec<String>, on: &str, off: Option<&str>, value: &Json) {
    match value {
        Json::Bool(true) => args.push(on.to_string()),
        Json::Bool(false) => {
            if let Some(off) = off {
                args.push(off.to_string());
            }
        }
        _ => {}
    }
}

/// Flags for one option. Unknown keys become `--key-with-dashes`.
fn push_option(args: &mut Vec<String>, key: &str, value: &Json) {
    match key {
        "format" => push_each(args, "--format", value),
        "match_filter" => push_each(args, "--match-filters", value),
        "break_on_reject" => push_switch(args, "--break-match-filters", None, value),
        "break_on_existing" => push_switch(args, "--break-on-existing", None, value),
        "embed_chapters" => push_switch(args, "--embed-chapters", Some("--no-embed-chapters"), value),
        "sponsorblock_mark" | "sponsorblock_remove" => {
            if let Some(categories) = joined(value, ",") {
                args.push(format!("--{}", key.replace('_', "-")));
                args.push(categories);
            }
        }
        "remove_chapters" => push_each(args, "--remove-chapters", value),
        "force_keyframes_at_cuts" => push_switch(args, "--force-keyframes-at-cuts", None, value),
        "extract_audio" => push_switch(args, "--extract-audio", None, value),
        "writesubtitles" => push_switch(args, "--write-subs", Some("--no-write-subs"), value),
        "writeautomaticsub" => push_switch(args, "--write-auto-subs", Some("--no-write-auto-subs"), value),
        "embed_subtitles" => push_switch(args, "--embed-subs", None, value),
        "subtitleslangs" => {
            if let Some(languages) = joined(value, ",") {
                args.push("--sub-langs".into());
                args.push(languages);
            }
        }
        "cookiefile" => push_each(args, "--cookies", value),
        DOWNLOAD_ARCHIVE => push_each(args, "--download-archive", value),
        _ => {
            let flag = format!("--{}", key.replace('_', "-"));
            match value {
                Json::Bool(true) => args.push(flag),
                Json::Bool(false) => args.push(format!("--no-{}", key.replace('_', "-"))),
                Json::Null => {}
                Json::Object(_) => warn!("Ignoring ytdl option '{key}': nested options are not supported"),
                other => push_each(args, &flag, other),
            }
        }
    }
}

/// Every option as flags, in key order.
pub fn to_cli_args(options: &FetchOptions) -> Vec<String> {
    let mut args = Vec::new();
    for (key, value) in options {
        push_option(&mut args, key, value);
    }
    args
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn args(value: Json) -> Vec<String> {
        match value {
            Json::Object(options) => to_cli_args(&options),
            _ => Vec::new(),
        }
    }

    #[test]
    fn known_options_map_to_flags() {
        assert_eq!(
            args(json!({
                "format": "best",
                "match_filter": ["!is_live", "duration>60"],
                "subtitleslangs": ["en", "de"],
                "embed_chapters": false,
                "sponsorblock_remove": ["sponsor", "intro"]
            })),
            [
                "--no-embed-chapters",
                "--format",
                "best",
                "--match-filters",
                "!is_live",
                "--match-filters",
                "duration>60",
                "--sponsorblock-remove",
                "sponsor,intro",
                "--sub-langs",
                "en,de",
            ]
            .map(String::from)
        );
    }

    #[test]
    fn unknown_options_use_dashed_keys() {
        assert_eq!(
            args(json!({"max_downloads": 20, "ignoreerrors": true, "no_thing": null, "check_formats": false})),
            ["--no-check-formats", "--ignoreerrors", "--max-downloads", "20"].map(String::from)
        );
    }
}
