//! [`Fetcher`] backed by the `yt-dlp` executable.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Context;
use serde_json::{Map, Value as Json};
use tracing::{debug, info};

use super::options::{DOWNLOAD_ARCHIVE, FetchOptions, to_cli_args};
use super::{DownloadedFiles, Fetcher};
use crate::archive::load_ytdl_archive;
use crate::entries::Entry;
use crate::error::{Error, Result};

const PLAYLIST_FIELDS: &[(&str, &str)] = &[
    ("playlist_id", "id"),
    ("playlist_title", "title"),
    ("playlist_webpage_url", "webpage_url"),
];

const SIDECAR_EXTENSIONS: &[&str] = &[
    "json", "jpg", "jpeg", "webp", "png", "part", "ytdl", "srt", "vtt", "ass", "lrc", "nfo",
];

/// Expands playlist results into their entries, top-level playlist first.
/// Entries receive `playlist_*` fields from their direct parent and
/// `source_*` fields from the outermost result.
pub fn flatten_playlist(result: Json) -> Vec<Json> {
    fn visit(node: Json, source: &Map<String, Json>, out: &mut Vec<Json>) {
        let Json::Object(mut object) = node else {
            return;
        };
        let is_playlist = object.get("_type").and_then(Json::as_str) == Some("playlist");
        if !is_playlist {
            out.push(Json::Object(object));
            return;
        }
        let entries = match object.remove("entries") {
            Some(Json::Array(entries)) => entries,
            _ => Vec::new(),
        };
        let entries: Vec<Json> = entries.into_iter().filter(|entry| !entry.is_null()).collect();
        let count = entries.len();
        for (index, entry) in entries.into_iter().enumerate() {
            let mut entry = entry;
            if let Json::Object(fields) = &mut entry {
                for (target, field) in PLAYLIST_FIELDS {
                    if let Some(value) = object.get(*field) {
                        fields.entry(*target).or_insert_with(|| value.clone());
                    }
                }
                fields.entry("playlist_index").or_insert_with(|| Json::from(index + 1));
                fields.entry("playlist_count").or_insert_with(|| Json::from(count));
                for (target, field) in [("source_id", "id"), ("source_title", "title")] {
                    if let Some(value) = source.get(field) {
                        fields.entry(target).or_insert_with(|| value.clone());
                    }
                }
            }
            visit(entry, source, out);
        }
    }

    let source = match &result {
        Json::Object(object) => object.clone(),
        _ => Map::new(),
    };
    let mut out = Vec::new();
    visit(result, &source, &mut out);
    out
}

/// Runs yt-dlp for metadata and downloads.
#[derive(Debug, Clone)]
pub struct YtDlp {
    program: PathBuf,
}

impl Default for YtDlp {
    fn default() -> Self {
        YtDlp::with_program("yt-dlp")
    }
}

impl YtDlp {
    /// Looks `yt-dlp` up on `PATH`.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        YtDlp {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn run(&self, args: &[String], label: &str) -> Result<Vec<u8>> {
        debug!("Running {} {}", self.program.display(), args.join(" "));
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .with_context(|| format!("running yt-dlp for {label}"))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Fetcher(format!(
                "yt-dlp failed for {label} ({}): {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(output.stdout)
    }
}

/// The single media file yt-dlp left for `uid`, whatever its extension.
fn find_media(working_directory: &Path, uid: &str) -> Result<Option<PathBuf>> {
    let prefix = format!("{uid}.");
    let mut found = None;
    for item in fs::read_dir(working_directory)
        .with_context(|| format!("listing {}", working_directory.display()))?
    {
        let path = item?.path();
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        let Some(rest) = name.strip_prefix(&prefix) else {
            continue;
        };
        // `uid.en.srt`, `uid.info.json` and similar carry a second dot.
        if rest.contains('.') || SIDECAR_EXTENSIONS.contains(&rest) {
            continue;
        }
        found = Some(path);
        break;
    }
    Ok(found)
}

impl Fetcher for YtDlp {
    fn extract_metadata(
        &self,
        url: &str,
        options: &FetchOptions,
        working_directory: &Path,
    ) -> Result<Vec<Json>> {
        let mut args: Vec<String> = ["--dump-single-json", "--skip-download", "--no-warnings", "--no-progress"]
            .map(String::from)
            .to_vec();
        args.extend(to_cli_args(options));
        args.push(url.to_string());
        let stdout = self.run(&args, url)?;
        let result: Json = serde_json::from_slice(&stdout)
            .with_context(|| format!("parsing yt-dlp metadata for {url}"))?;

        let archived = match options.get(DOWNLOAD_ARCHIVE).and_then(Json::as_str) {
            Some(path) => load_ytdl_archive(Path::new(path))?,
            None => Default::default(),
        };
        let mut entries = Vec::new();
        for entry in flatten_playlist(result) {
            let Some(id) = entry.get("id").and_then(Json::as_str) else {
                continue;
            };
            if archived.contains(id) {
                debug!("Skipping archived entry {id}");
                continue;
            }
            let info_path = working_directory.join(format!("{id}.info.json"));
            fs::write(&info_path, serde_json::to_vec(&entry)?)
                .with_context(|| format!("writing {}", info_path.display()))?;
            entries.push(entry);
        }
        info!("Found {} new entries for {url}", entries.len());
        Ok(entries)
    }

    fn download(&self, entry: &Entry, options: &FetchOptions) -> Result<DownloadedFiles> {
        let working_directory = entry.working_directory();
        let info_path = entry.info_json_path();
        if !info_path.is_file() {
            fs::write(&info_path, serde_json::to_vec(entry.metadata())?)
                .with_context(|| format!("writing {}", info_path.display()))?;
        }
        let output = working_directory.join(format!("{}.%(ext)s", entry.uid()));
        let mut args: Vec<String> = vec![
            "--load-info-json".into(),
            info_path.to_string_lossy().into_owned(),
            "--output".into(),
            output.to_string_lossy().into_owned(),
            "--write-thumbnail".into(),
            "--no-progress".into(),
        ];
        args.extend(
            to_cli_args(options)
                .into_iter()
                .filter(|arg| arg != "--break-match-filters"),
        );
        self.run(&args, &entry.uid())?;

        let media = find_media(working_directory, &entry.uid())?
            .ok_or_else(|| Error::FileNotDownloaded(entry.file_path()))?;
        Ok(DownloadedFiles {
            media,
            thumbnail: entry.thumbnail_path(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;
    #[cfg(unix)]
    use std::os::unix::fs::PermissionsExt;

    /// A shell script standing in for yt-dlp: prints a two-entry playlist
    /// for metadata requests and writes `.mkv`/`.webp` files for downloads.
    fn scripted_ytdlp(dir: &Path) -> anyhow::Result<YtDlp> {
        let script_path = dir.join("yt-dlp");
        let script = r#"#!/usr/bin/env bash
set -eu
args=("$@")
output=""
while [[ $# -gt 0 ]]; do
  case "$1" in
    --output)
      shift
      output="$1"
      ;;
  esac
  shift
done

if printf '%s\n' "${args[@]}" | grep -q -- '--dump-single-json'; then
  cat <<'JSON'
{
  "_type": "playlist",
  "id": "PL1",
  "title": "Uploads",
  "webpage_url": "https://example.com/playlist",
  "entries": [
    {"id": "alpha", "title": "Alpha", "ext": "webm", "upload_date": "20240101", "extractor_key": "Youtube"},
    null,
    {"id": "beta", "title": "Beta", "ext": "webm", "upload_date": "20240102", "extractor_key": "Youtube"}
  ]
}
JSON
  exit 0
fi

if printf '%s\n' "${args[@]}" | grep -q -- '--load-info-json'; then
  base="${output%.%(ext)s}"
  echo "video" > "$base.mkv"
  echo "thumb" > "$base.webp"
  exit 0
fi

echo "unexpected arguments" >&2
exit 2
"#;
        fs::write(&script_path, script)?;
        #[cfg(unix)]
        {
            let mut perms = fs::metadata(&script_path)?.permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&script_path, perms)?;
        }
        Ok(YtDlp::with_program(script_path))
    }

    #[test]
    fn flatten_adds_playlist_fields() {
        let entries = flatten_playlist(json!({
            "_type": "playlist", "id": "chan", "title": "Channel",
            "entries": [
                {"_type": "playlist", "id": "tab", "title": "Videos", "entries": [{"id": "a"}, {"id": "b"}]},
                {"id": "c", "playlist_index": 9}
            ]
        }));
        let ids: Vec<&str> = entries.iter().filter_map(|entry| entry["id"].as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
        assert_eq!(entries[1]["playlist_id"], json!("tab"));
        assert_eq!(entries[1]["playlist_index"], json!(2));
        assert_eq!(entries[1]["source_title"], json!("Channel"));
        assert_eq!(entries[2]["playlist_index"], json!(9));
        assert_eq!(entries[2]["playlist_count"], json!(2));
    }

    #[cfg(unix)]
    #[test]
    fn extracts_and_skips_archived_entries() -> anyhow::Result<()> {
        let tools = tempdir()?;
        let work = tempdir()?;
        let fetcher = scripted_ytdlp(tools.path())?;
        let archive = work.path().join("ytdl-archive.txt");
        fs::write(&archive, "youtube alpha\n")?;
        let mut options = FetchOptions::new();
        options.insert(DOWNLOAD_ARCHIVE.into(), json!(archive.to_string_lossy()));

        let entries = fetcher.extract_metadata("https://example.com/playlist", &options, work.path())?;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["id"], json!("beta"));
        assert_eq!(entries[0]["playlist_count"], json!(2));
        assert!(work.path().join("beta.info.json").is_file());
        assert!(!work.path().join("alpha.info.json").exists());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn download_finds_media_with_actual_extension() -> anyhow::Result<()> {
        let tools = tempdir()?;
        let work = tempdir()?;
        let fetcher = scripted_ytdlp(tools.path())?;
        let entry = Entry::new(json!({"id": "beta", "title": "Beta", "ext": "webm"}), work.path())?;
        let files = fetcher.download(&entry, &FetchOptions::new())?;
        assert_eq!(files.media, work.path().join("beta.mkv"));
        assert_eq!(files.thumbnail, Some(work.path().join("beta.webp")));
        assert!(work.path().join("beta.info.json").is_file());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn failures_carry_stderr() -> anyhow::Result<()> {
        let tools = tempdir()?;
        let error = scripted_ytdlp(tools.path())?
            .run(&["--bogus".to_string()], "bogus")
            .unwrap_err();
        assert!(error.to_string().contains("unexpected arguments"));
        Ok(())
    }

    #[test]
    fn missing_program_is_reported() {
        let fetcher = YtDlp::with_program("/nonexistent/yt-dlp");
        assert_eq!(YtDlp::new().program(), Path::new("yt-dlp"));
        let error = fetcher.run(&["--version".to_string()], "version").unwrap_err();
        assert!(format!("{error:#}").contains("running yt-dlp for version"));
    }
}
