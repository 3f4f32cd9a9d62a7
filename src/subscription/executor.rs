//! Runs one subscription end to end: fetch metadata, filter, download,
//! modify, post-process, save, archive.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use chrono::{Local, NaiveDate};
use parking_lot::Mutex;
use serde_json::Value as Json;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::Subscription;
use crate::archive::DownloadArchive;
use crate::downloader::{DOWNLOAD_ARCHIVE, FetchOptions, Fetcher};
use crate::entries::{Entry, entry_variable_names, sanitize_filename, truncate_to_bytes};
use crate::error::{Error, Result};
use crate::ffmpeg::{self, Transcoder};
use crate::file_handler::{FileHandler, OutputWriter};
use crate::plugins::{PluginContext, PluginKind, PluginOperation, parse_relative_date};
use crate::preset::{OutputOptions, Preset};
use crate::script::{Script, Value};
use crate::system::{check_interrupted, lock_working_directory};
use crate::transaction_log::{FileMetadata, TransactionLog};
use crate::validators::{
    OverridesStringFormatter, StringFormatter, ValidationError, ValidationResult,
};

const FILE_NAME_MAX_BYTES: usize = 255;
const THUMBNAIL_SUFFIX: &str = "-thumb.jpg";
const YTDL_ARCHIVE_NAME: &str = "ytdl-archive.txt";
const TAIL_INTERVAL: Duration = Duration::from_millis(100);

/// Truncates the last component of `relative` so that neither it nor its
/// `-thumb.jpg` sibling exceeds the file-name byte limit. Directories and the
/// extension are kept whole.
pub fn fit_file_name(relative: &str) -> String {
    let (directory, base) = match relative.rsplit_once('/') {
        Some((directory, base)) => (Some(directory), base),
        None => (None, relative),
    };
    let (stem, suffix) = match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, format!(".{ext}")),
        _ => (base, String::new()),
    };
    let reserved = suffix.len().max(THUMBNAIL_SUFFIX.len());
    let stem = truncate_to_bytes(stem, "", FILE_NAME_MAX_BYTES.saturating_sub(reserved));
    match directory {
        Some(directory) => format!("{directory}/{stem}{suffix}"),
        None => format!("{stem}{suffix}"),
    }
}

/// Fails when a formatter uses a plugin variable that only exists in a
/// later phase than the one the formatter is evaluated in.
fn check_phase(
    script: &Script,
    formatter: &StringFormatter,
    phase: PluginOperation,
    added: &[(String, PluginOperation)],
) -> ValidationResult<()> {
    let needed = script.unresolved_dependencies(formatter.tree());
    for (variable, available) in added {
        let used = needed.contains(variable) || needed.contains(&format!("{variable}_sanitized"));
        if used && *available > phase {
            return Err(ValidationError::new(
                formatter.name(),
                format!("'{variable}' is not available yet, it is only defined after this field is evaluated"),
            ));
        }
    }
    Ok(())
}

/// Builds the script of a subscription: built-in and user overrides plus
/// their `_sanitized` twins, checked against every formatter the preset
/// evaluates, with everything entry-independent already resolved.
pub fn build_script(
    name: &str,
    value: Option<&str>,
    preset: &Preset,
    experimental: &BTreeSet<String>,
) -> Result<Script> {
    let plugins = preset.plugins();
    let output_options = preset.output_options();
    let added = plugins.added_variables();
    let mut entry_names: BTreeSet<String> = entry_variable_names().into_iter().collect();
    for (variable, _) in &added {
        entry_names.insert(format!("{variable}_sanitized"));
        entry_names.insert(variable.clone());
    }

    let mut script = Script::new();
    script.declare(entry_names.iter().cloned());
    let mut builtins = vec![("subscription_name".to_string(), Value::string(name))];
    if let Some(value) = value {
        builtins.push(("subscription_value".to_string(), Value::string(value)));
    }

    let overrides = preset.overrides();
    let mut definitions: Vec<(String, String)> = overrides
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    let defined: BTreeSet<String> = definitions.iter().map(|(key, _)| key.clone()).collect();
    let twins: Vec<(String, String)> = builtins
        .iter()
        .map(|(key, _)| key.as_str())
        .chain(overrides.variable_names())
        .map(|key| (format!("{key}_sanitized"), format!("{{%sanitize(%string({key}))}}")))
        .filter(|(twin, _)| !defined.contains(twin))
        .collect();
    definitions.extend(twins);
    script.bind(builtins);
    script.add(definitions)?;

    for plugin in plugins.iter() {
        for (formatter, phase) in plugin.formatters() {
            formatter.check(&script)?;
            check_phase(&script, formatter, phase, &added)?;
        }
        for formatter in plugin.overrides_formatters() {
            formatter.check(&script, &entry_names)?;
        }
    }
    for formatter in output_options.entry_formatters() {
        formatter.check(&script)?;
    }
    for formatter in output_options.overrides_formatters() {
        formatter.check(&script, &entry_names)?;
    }
    if output_options.keep_max_files.is_some() && !experimental.contains("keep_max_files") {
        return Err(Error::ExperimentalFeatureNotEnabled("keep_max_files".to_string()));
    }

    script.resolve_in_place(&BTreeSet::new())?;
    Ok(script)
}

/// Settings shared by every subscription of one invocation.
#[derive(Debug, Clone, Default)]
pub struct RunSettings {
    pub working_directory: PathBuf,
    pub lock_directory: PathBuf,
    pub dry_run: bool,
    /// Enabled experimental features.
    pub experimental: BTreeSet<String>,
}

/// Logs entries as their metadata lands in the working directory, while
/// the fetcher is still busy with the rest.
#[derive(Debug, Default)]
struct MetadataTailer {
    stop: AtomicBool,
    seen: Mutex<BTreeSet<PathBuf>>,
}

impl MetadataTailer {
    fn watch(&self, directory: &Path) {
        while !self.stop.load(Ordering::Acquire) {
            self.scan(directory);
            thread::sleep(TAIL_INTERVAL);
        }
    }

    fn scan(&self, directory: &Path) {
        for item in WalkDir::new(directory).max_depth(1).into_iter().filter_map(|item| item.ok()) {
            let path = item.path();
            if !path.to_string_lossy().ends_with(".info.json") {
                continue;
            }
            if !self.seen.lock().insert(path.to_path_buf()) {
                continue;
            }
            let title = fs::read(path)
                .ok()
                .and_then(|bytes| serde_json::from_slice::<Json>(&bytes).ok())
                .and_then(|json| json.get("title").and_then(Json::as_str).map(str::to_string));
            match title {
                Some(title) => info!("Found '{title}'"),
                None => debug!("Found {}", path.display()),
            }
        }
    }

    fn finish(&self) -> usize {
        self.stop.store(true, Ordering::Release);
        self.seen.lock().len()
    }
}

/// The download archive file of a preset, inside its output directory.
pub fn archive_path(preset: &Preset, script: &Script) -> Result<PathBuf> {
    let output_options = preset.output_options();
    let output_directory = PathBuf::from(output_options.output_directory.resolve(script)?);
    Ok(output_directory.join(output_options.download_archive_name.resolve(script)?))
}

pub struct Executor<'a> {
    fetcher: &'a dyn Fetcher,
    transcoder: &'a dyn Transcoder,
    settings: &'a RunSettings,
}

impl<'a> Executor<'a> {
    pub fn new(fetcher: &'a dyn Fetcher, transcoder: &'a dyn Transcoder, settings: &'a RunSettings) -> Self {
        Executor {
            fetcher,
            transcoder,
            settings,
        }
    }

    /// Runs `subscription` and returns what changed in its output directory.
    pub fn run(&self, subscription: &Subscription) -> Result<TransactionLog> {
        let name = subscription.name();
        let preset = subscription.preset();
        let script = build_script(name, subscription.value(), preset, &self.settings.experimental)?;
        let output_directory = PathBuf::from(preset.output_options().output_directory.resolve(&script)?);

        fs::create_dir_all(&self.settings.working_directory).with_context(|| {
            format!("creating working directory {}", self.settings.working_directory.display())
        })?;
        let _lock = lock_working_directory(&self.settings.lock_directory, &self.settings.working_directory)?;
        let working_directory = self.settings.working_directory.join(sanitize_filename(name));
        fs::create_dir_all(&working_directory)
            .with_context(|| format!("creating {}", working_directory.display()))?;

        let result = self.run_locked(preset, &script, &output_directory, &working_directory);
        if let Err(error) = fs::remove_dir_all(&working_directory) {
            warn!("Could not clean up {}: {error}", working_directory.display());
        }
        result
    }

    fn context<'c>(&'c self, script: &'c Script, working_directory: &'c Path) -> PluginContext<'c> {
        PluginContext {
            script,
            transcoder: self.transcoder,
            working_directory,
            dry_run: self.settings.dry_run,
        }
    }

    fn run_locked(
        &self,
        preset: &Preset,
        script: &Script,
        output_directory: &Path,
        working_directory: &Path,
    ) -> Result<TransactionLog> {
        let output_options = preset.output_options();
        let maintain_archive = output_options.maintain_download_archive.resolve(script)?;
        let archive_path = archive_path(preset, script)?;
        let mut archive = if maintain_archive {
            DownloadArchive::load(&archive_path)?
        } else {
            DownloadArchive::new(&archive_path)
        };

        let mut options = preset.plugins().ytdl_options(script)?;
        if maintain_archive && self.fetcher.supports_download_archive() {
            let ytdl_archive = working_directory.join(YTDL_ARCHIVE_NAME);
            archive.write_ytdl_archive(&ytdl_archive)?;
            options.insert(
                DOWNLOAD_ARCHIVE.to_string(),
                Json::String(ytdl_archive.display().to_string()),
            );
        }
        if options.contains_key("writesubtitles") && !self.fetcher.supports_subtitles() {
            warn!("The fetcher cannot download subtitles, they will be skipped");
        }

        let persist_archive = maintain_archive && !self.settings.dry_run;
        let mut log = TransactionLog::new(output_directory);
        let tailer = MetadataTailer::default();
        thread::scope(|scope| {
            scope.spawn(|| tailer.watch(working_directory));
            let outcome = {
                let mut writer = OutputWriter::new(
                    FileHandler::new(self.settings.dry_run),
                    output_directory,
                    &mut log,
                );
                self.process(
                    preset,
                    script,
                    &options,
                    &mut archive,
                    persist_archive,
                    &mut writer,
                    working_directory,
                )
            };
            let seen = tailer.finish();
            debug!("Saw metadata of {seen} entries in {}", working_directory.display());
            outcome
        })?;

        if persist_archive {
            archive.save()?;
        }
        Ok(log)
    }

    fn process(
        &self,
        preset: &Preset,
        script: &Script,
        options: &FetchOptions,
        archive: &mut DownloadArchive,
        persist_archive: bool,
        writer: &mut OutputWriter<'_>,
        working_directory: &Path,
    ) -> Result<()> {
        let ctx = self.context(script, working_directory);
        if let Some(downloader) = preset.plugins().downloader() {
            for url in downloader.urls() {
                let target = url.url.resolve(script)?;
                if target.trim().is_empty() {
                    debug!("Skipping an empty url");
                    continue;
                }
                info!("Fetching metadata for {target}");
                for metadata in self.fetcher.extract_metadata(&target, options, working_directory)? {
                    check_interrupted()?;
                    let mut entry = Entry::new(metadata, working_directory)?;
                    let uid = entry.uid();
                    if archive.contains(&uid) {
                        debug!("Skipping '{uid}', it is already archived");
                        continue;
                    }
                    let variables = url.variables.resolve(script, &ctx.overlay(&entry))?;
                    entry.add_variables(
                        variables
                            .into_iter()
                            .map(|(variable, value)| (variable, Value::string(value))),
                    );
                    self.process_entry(entry, preset, &ctx, options, archive, writer)
                        .map_err(|error| error.context(format!("entry '{uid}'")))?;
                    // Files of this entry are already in place.
                    if persist_archive {
                        archive.save()?;
                    }
                }
            }
        }

        for plugin in preset.plugins().ordered(PluginOperation::PostProcessSubscription) {
            plugin.post_process_subscription(&ctx, writer)?;
        }
        writer.take_written();
        self.apply_retention(preset.output_options(), script, archive, writer)
    }

    fn process_entry(
        &self,
        mut entry: Entry,
        preset: &Preset,
        ctx: &PluginContext<'_>,
        options: &FetchOptions,
        archive: &mut DownloadArchive,
        writer: &mut OutputWriter<'_>,
    ) -> Result<()> {
        let uid = entry.uid();
        let title = entry.title();
        let upload_date = entry
            .upload_date()
            .and_then(|date| NaiveDate::parse_from_str(&date, "%Y%m%d").ok())
            .unwrap_or_else(|| Local::now().date_naive());
        entry.add_variables([
            ("download_index", Value::Integer(archive.len() as i64 + 1)),
            ("upload_date_index", Value::Integer(archive.count_on(upload_date) as i64 + 1)),
        ]);

        for plugin in preset.plugins().ordered(PluginOperation::ModifyEntryMetadata) {
            match plugin.modify_entry_metadata(entry, ctx)? {
                Some(kept) => entry = kept,
                None => {
                    info!("Skipping '{title}', filtered out by {}", plugin.name());
                    return Ok(());
                }
            }
        }

        if self.settings.dry_run {
            info!("Would download '{title}'");
        } else {
            info!("Downloading '{title}'");
            let files = self.fetcher.download(&entry, options)?;
            if let Some(ext) = files.media.extension() {
                entry.add_variables([("ext", Value::string(ext.to_string_lossy()))]);
            }
        }

        let mut entries = vec![entry];
        for plugin in preset.plugins().ordered(PluginOperation::ModifyEntry) {
            let mut next = Vec::with_capacity(entries.len());
            for entry in entries {
                match plugin.kind() {
                    PluginKind::Split => next.extend(plugin.split_entry(entry, ctx)?),
                    PluginKind::Base => next.extend(plugin.modify_entry(entry, ctx)?),
                }
            }
            entries = next;
        }

        for entry in &entries {
            let written = self.save_entry(entry, preset, ctx, writer)?;
            archive.record(&uid, &entry.archive_extractor(), upload_date, written);
        }
        Ok(())
    }

    /// Post-processes one final entry and saves its files. Returns the output
    /// paths written for it.
    fn save_entry(
        &self,
        entry: &Entry,
        preset: &Preset,
        ctx: &PluginContext<'_>,
        writer: &mut OutputWriter<'_>,
    ) -> Result<Vec<String>> {
        let mut metadata: Option<FileMetadata> = None;
        for plugin in preset.plugins().ordered(PluginOperation::PostProcess) {
            if let Some(found) = plugin.post_process_entry(entry, ctx, writer)? {
                metadata.get_or_insert_with(FileMetadata::default).extend(found);
            }
        }

        let output_options = preset.output_options();
        let file_name = fit_file_name(&ctx.resolve(&output_options.file_name, entry)?);
        writer.save_file(&entry.file_path(), &file_name, metadata)?;

        if let Some(thumbnail_name) = &output_options.thumbnail_name {
            let relative = fit_file_name(&ctx.resolve(thumbnail_name, entry)?);
            self.save_thumbnail(entry, &relative, writer)?;
        }
        if let Some(info_json_name) = &output_options.info_json_name {
            let relative = fit_file_name(&ctx.resolve(info_json_name, entry)?);
            let source = entry
                .working_directory()
                .join(format!("{}.entry.json", entry.file_stem()));
            if !self.settings.dry_run {
                fs::write(&source, serde_json::to_vec_pretty(entry.metadata())?)
                    .with_context(|| format!("writing {}", source.display()))?;
            }
            writer.save_file(&source, &relative, None)?;
        }
        Ok(writer.take_written())
    }

    /// Copies the entry's thumbnail, converting it when the requested name
    /// has another image extension. Split children share one thumbnail, so
    /// the source stays in place.
    fn save_thumbnail(&self, entry: &Entry, relative: &str, writer: &mut OutputWriter<'_>) -> Result<()> {
        let Some(source) = entry.thumbnail_path() else {
            if self.settings.dry_run {
                let expected = entry.working_directory().join(format!("{}.jpg", entry.uid()));
                return writer.save_copy(&expected, relative, None);
            }
            warn!("No thumbnail was downloaded for '{}'", entry.title());
            return Ok(());
        };
        let extension = |path: &Path| {
            path.extension()
                .map(|ext| ext.to_string_lossy().to_lowercase())
        };
        match extension(Path::new(relative)) {
            Some(wanted) if extension(source.as_path()).as_deref() != Some(wanted.as_str()) => {
                let converted = entry
                    .working_directory()
                    .join(format!("{}.converted.{wanted}", entry.file_stem()));
                if !self.settings.dry_run {
                    ffmpeg::convert_image(self.transcoder, &source, &converted)?;
                }
                writer.save_file(&converted, relative, None)
            }
            _ => writer.save_copy(&source, relative, None),
        }
    }

    /// Deletes the files of archived entries outside the `keep_files` window
    /// or beyond `keep_max_files`.
    fn apply_retention(
        &self,
        output_options: &OutputOptions,
        script: &Script,
        archive: &mut DownloadArchive,
        writer: &mut OutputWriter<'_>,
    ) -> Result<()> {
        if !output_options.keeps_files() {
            return Ok(());
        }
        let today = Local::now().date_naive();
        let date = |formatter: &Option<OverridesStringFormatter>| -> Result<Option<NaiveDate>> {
            let Some(formatter) = formatter else {
                return Ok(None);
            };
            let text = formatter.resolve(script)?;
            match parse_relative_date(&text, today) {
                Some(date) => Ok(Some(date)),
                None => Err(ValidationError::new(
                    formatter.formatter().name(),
                    format!("'{text}' is not a date"),
                )
                .into()),
            }
        };
        let before = date(&output_options.keep_files_before)?;
        let after = date(&output_options.keep_files_after)?;

        let mut stale: BTreeSet<String> = archive.outside_range(before, after).into_iter().collect();
        if let Some(keep) = &output_options.keep_max_files
            && let Ok(keep) = usize::try_from(keep.resolve(script)?)
            && keep > 0
        {
            stale.extend(archive.beyond_newest(keep));
        }

        for uid in stale {
            let Some(entry) = archive.remove(&uid) else {
                continue;
            };
            info!("Removing the files of '{uid}', it is outside the retention window");
            for file in &entry.file_names {
                writer.remove_file(file)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;
    use serde_yaml::Value as Yaml;
    use tempfile::tempdir;

    use super::*;
    use crate::archive::load_ytdl_archive;
    use crate::downloader::DownloadedFiles;
    use crate::ffmpeg::testing::RecordingTranscoder;
    use crate::validators::Validator;

    /// Serves a fixed set of entries and writes fake media on download.
    #[derive(Default)]
    struct MemoryFetcher {
        entries: Mutex<Vec<Json>>,
        downloads: Mutex<Vec<String>>,
        /// Downloads of this uid fail.
        broken: Mutex<Option<String>>,
    }

    impl MemoryFetcher {
        fn with(entries: Vec<Json>) -> Self {
            MemoryFetcher {
                entries: Mutex::new(entries),
                ..Self::default()
            }
        }
    }

    impl Fetcher for MemoryFetcher {
        fn extract_metadata(
            &self,
            _url: &str,
            options: &FetchOptions,
            _working_directory: &Path,
        ) -> Result<Vec<Json>> {
            let archived = match options.get(DOWNLOAD_ARCHIVE).and_then(Json::as_str) {
                Some(path) => load_ytdl_archive(Path::new(path))?,
                None => BTreeSet::new(),
            };
            Ok(self
                .entries
                .lock()
                .iter()
                .filter(|entry| !archived.contains(entry["id"].as_str().unwrap_or_default()))
                .cloned()
                .collect())
        }

        fn download(&self, entry: &Entry, _options: &FetchOptions) -> Result<DownloadedFiles> {
            if self.broken.lock().as_deref() == Some(entry.uid().as_str()) {
                return Err(Error::Fetcher(format!("{} is unavailable", entry.uid())));
            }
            self.downloads.lock().push(entry.uid());
            let media = entry.working_directory().join(format!("{}.mp4", entry.uid()));
            fs::write(&media, format!("media of {}", entry.uid()))?;
            let thumbnail = entry.working_directory().join(format!("{}.webp", entry.uid()));
            fs::write(&thumbnail, "image")?;
            Ok(DownloadedFiles {
                media,
                thumbnail: Some(thumbnail),
            })
        }
    }

    fn video(id: &str, title: &str, upload_date: &str) -> Json {
        json!({"id": id, "title": title, "ext": "mp4", "upload_date": upload_date, "extractor": "youtube"})
    }

    fn settings(root: &Path, dry_run: bool) -> RunSettings {
        RunSettings {
            working_directory: root.join("work"),
            lock_directory: root.join("locks"),
            dry_run,
            experimental: BTreeSet::new(),
        }
    }

    fn subscription(output: &Path, extra: &str) -> anyhow::Result<Subscription> {
        let text = format!(
            "download: 'https://example.com/channel'
output_options:
  output_directory: '{{out}}'
  file_name: '{{title_sanitized}}.{{ext}}'
  thumbnail_name: '{{title_sanitized}}-thumb.jpg'
  info_json_name: '{{title_sanitized}}.info.json'
{extra}
overrides:
  out: '{}'
",
            output.display()
        );
        let value: Yaml = serde_yaml::from_str(&text)?;
        Ok(Subscription::new("Channel", None, Preset::validate("Channel", &value)?))
    }

    fn snapshot(directory: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
        WalkDir::new(directory)
            .into_iter()
            .filter_map(|item| item.ok())
            .filter(|item| item.file_type().is_file())
            .map(|item| (item.path().to_path_buf(), fs::read(item.path()).unwrap_or_default()))
            .collect()
    }

    #[test]
    fn fits_long_names_with_room_for_thumbnails() {
        let long = "a".repeat(300);
        let fitted = fit_file_name(&format!("Show/Season 1/{long}.mp4"));
        let (directory, base) = fitted.rsplit_once('/').unwrap();
        assert_eq!(directory, "Show/Season 1");
        assert!(base.ends_with(".mp4"));
        assert_eq!(base.len(), FILE_NAME_MAX_BYTES - THUMBNAIL_SUFFIX.len() + ".mp4".len());
        assert_eq!(fit_file_name("short.mp4"), "short.mp4");
    }

    #[test]
    fn second_run_changes_nothing() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let output = dir.path().join("out");
        let fetcher = MemoryFetcher::with(vec![video("abc", "First Video", "20240102")]);
        let transcoder = RecordingTranscoder::default();
        let settings = settings(dir.path(), false);
        let subscription = subscription(&output, "")?;
        let executor = Executor::new(&fetcher, &transcoder, &settings);

        let first = executor.run(&subscription)?;
        let created: Vec<&str> = first.created().keys().map(String::as_str).collect();
        assert_eq!(
            created,
            ["First Video-thumb.jpg", "First Video.info.json", "First Video.mp4"]
        );
        assert_eq!(fs::read_to_string(output.join("First Video.mp4"))?, "media of abc");
        assert_eq!(fs::read_to_string(output.join("First Video-thumb.jpg"))?, "transcoded");
        let archive = DownloadArchive::load(output.join(".ytdl-sub-Channel-download-archive.json"))?;
        assert_eq!(archive.get("abc").map(|entry| entry.file_names.len()), Some(3));
        assert!(!settings.working_directory.join("Channel").exists());

        let second = executor.run(&subscription)?;
        assert!(second.is_empty());
        assert_eq!(*fetcher.downloads.lock(), ["abc"]);
        Ok(())
    }

    #[test]
    fn archive_lives_in_the_output_directory() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let output = dir.path().join("out");
        let subscription = subscription(&output, "")?;
        let script = build_script("Channel", None, subscription.preset(), &BTreeSet::new())?;
        assert_eq!(
            archive_path(subscription.preset(), &script)?,
            output.join(".ytdl-sub-Channel-download-archive.json")
        );
        Ok(())
    }

    #[test]
    fn finished_entries_stay_archived_when_a_later_one_fails() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let output = dir.path().join("out");
        let fetcher = MemoryFetcher::with(vec![
            video("one", "One", "20240102"),
            video("two", "Two", "20240103"),
        ]);
        *fetcher.broken.lock() = Some("two".to_string());
        let transcoder = RecordingTranscoder::default();
        let settings = settings(dir.path(), false);
        let subscription = subscription(&output, "")?;
        let executor = Executor::new(&fetcher, &transcoder, &settings);

        let error = executor.run(&subscription).unwrap_err();
        assert!(format!("{error:#}").contains("entry 'two'"));
        assert!(output.join("One.mp4").is_file());
        let archive = DownloadArchive::load(output.join(".ytdl-sub-Channel-download-archive.json"))?;
        assert!(archive.contains("one"));
        assert!(!archive.contains("two"));

        *fetcher.broken.lock() = None;
        let retry = executor.run(&subscription)?;
        let created: Vec<&str> = retry.created().keys().map(String::as_str).collect();
        assert_eq!(created, ["Two-thumb.jpg", "Two.info.json", "Two.mp4"]);
        assert_eq!(*fetcher.downloads.lock(), ["one", "two"]);
        Ok(())
    }

    #[test]
    fn dry_runs_leave_the_output_untouched() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let output = dir.path().join("out");
        let fetcher = MemoryFetcher::with(vec![video("abc", "First Video", "20240102")]);
        let transcoder = RecordingTranscoder::default();
        let subscription = subscription(&output, "")?;
        let real = settings(dir.path(), false);
        Executor::new(&fetcher, &transcoder, &real).run(&subscription)?;

        fetcher.entries.lock().push(video("def", "Second Video", "20240103"));
        let before = snapshot(&output);
        let dry = settings(dir.path(), true);
        let executor = Executor::new(&fetcher, &transcoder, &dry);
        let first = executor.run(&subscription)?;
        let second = executor.run(&subscription)?;

        assert_eq!(snapshot(&output), before);
        assert_eq!(first, second);
        let created: Vec<&str> = first.created().keys().map(String::as_str).collect();
        assert_eq!(
            created,
            ["Second Video-thumb.jpg", "Second Video.info.json", "Second Video.mp4"]
        );
        assert_eq!(*fetcher.downloads.lock(), ["abc"]);
        Ok(())
    }

    #[test]
    fn retention_removes_archived_files_outside_the_window() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let output = dir.path().join("out");
        let fetcher = MemoryFetcher::with(vec![
            video("old", "Old Video", "20230105"),
            video("new", "New Video", "20240102"),
        ]);
        let transcoder = RecordingTranscoder::default();
        let settings = settings(dir.path(), false);
        Executor::new(&fetcher, &transcoder, &settings).run(&subscription(&output, "")?)?;
        assert!(output.join("Old Video.mp4").is_file());

        let keeping = subscription(&output, "  keep_files_after: '20240101'")?;
        let log = Executor::new(&fetcher, &transcoder, &settings).run(&keeping)?;
        let removed: Vec<&str> = log.removed().iter().map(String::as_str).collect();
        assert_eq!(
            removed,
            ["Old Video-thumb.jpg", "Old Video.info.json", "Old Video.mp4"]
        );
        assert!(!output.join("Old Video.mp4").exists());
        assert!(output.join("New Video.mp4").is_file());
        Ok(())
    }

    #[test]
    fn splits_fan_out_into_children() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let output = dir.path().join("out");
        let mut album = video("abc", "Album", "20240102");
        album["chapters"] = json!([
            {"start_time": 0.0, "end_time": 60.0, "title": "Intro"},
            {"start_time": 60.0, "end_time": 120.0, "title": "Outro"}
        ]);
        let fetcher = MemoryFetcher::with(vec![album]);
        let transcoder = RecordingTranscoder::default();
        let settings = settings(dir.path(), false);
        let text = format!(
            "download: 'https://example.com/album'
split_by_chapters: {{when_no_chapters: pass}}
output_options:
  output_directory: '{}'
  file_name: '{{chapter_index_padded}} - {{chapter_title_sanitized}}.{{ext}}'
",
            output.display()
        );
        let value: Yaml = serde_yaml::from_str(&text)?;
        let preset = Preset::validate("Album", &value)?;
        let log = Executor::new(&fetcher, &transcoder, &settings).run(&Subscription::new("Album", None, preset))?;
        let created: Vec<&str> = log.created().keys().map(String::as_str).collect();
        assert_eq!(created, ["01 - Intro.mp4", "02 - Outro.mp4"]);
        assert_eq!(transcoder.calls.lock().len(), 2);
        Ok(())
    }

    #[test]
    fn keep_max_files_is_experimental() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let subscription = subscription(dir.path(), "  keep_max_files: 2")?;
        let preset = subscription.preset();
        let error = build_script("Channel", None, preset, &BTreeSet::new()).unwrap_err();
        assert!(matches!(error, Error::ExperimentalFeatureNotEnabled(_)));
        let enabled = BTreeSet::from(["keep_max_files".to_string()]);
        assert!(build_script("Channel", None, preset, &enabled).is_ok());
        Ok(())
    }

    #[test]
    fn scripts_know_subscription_overrides() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let subscription = subscription(dir.path(), "")?;
        let script = build_script("AC/DC", Some("https://x"), subscription.preset(), &BTreeSet::new())?;
        assert_eq!(script.get("subscription_name_sanitized"), Some(&Value::string("AC⧸DC")));
        assert_eq!(script.get("subscription_value"), Some(&Value::string("https://x")));
        Ok(())
    }

    #[test]
    fn formatters_cannot_use_variables_from_later_phases() -> anyhow::Result<()> {
        let value: Yaml = serde_yaml::from_str(
            "{download: x, split_by_chapters: {when_no_chapters: pass},
              filter_include: ['{%eq(chapter_index, 1)}'],
              output_options: {output_directory: /m, file_name: f}}",
        )?;
        let preset = Preset::validate("sub", &value)?;
        let error = build_script("sub", None, &preset, &BTreeSet::new()).unwrap_err();
        assert!(error.to_string().contains("'chapter_index' is not available yet"));
        Ok(())
    }
}
