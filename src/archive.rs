//! Per-subscription download archive.
//!
//! The archive maps every entry a subscription produced to the files it left
//! in the output directory. It is the source of truth for incremental runs:
//! archived ids are skipped by the fetcher and retention policies only ever
//! delete files recorded here.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Result;

fn serialize_date<S: Serializer>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&date.format("%Y-%m-%d").to_string())
}

/// Reads ISO dates, and `YYYYMMDD` as written by older versions.
fn deserialize_date<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDate, D::Error> {
    let text = String::deserialize(deserializer)?;
    parse_archive_date(&text)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid archive date '{text}'")))
}

pub fn parse_archive_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(text, "%Y%m%d"))
        .ok()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub entry_id: String,
    pub extractor: String,
    #[serde(serialize_with = "serialize_date", deserialize_with = "deserialize_date")]
    pub upload_date: NaiveDate,
    #[serde(default)]
    pub file_names: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadArchive {
    path: PathBuf,
    entries: BTreeMap<String, ArchiveEntry>,
}

impl DownloadArchive {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DownloadArchive {
            path: path.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Reads the archive at `path`; a missing file is an empty archive.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self::new(path));
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("reading download archive {}", path.display()))?;
        let entries = if raw.trim().is_empty() {
            BTreeMap::new()
        } else {
            serde_json::from_str(&raw)
                .with_context(|| format!("parsing download archive {}", path.display()))?
        };
        Ok(DownloadArchive { path, entries })
    }

    /// Writes through a temp file and rename so a crash keeps the old archive.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let payload = serde_json::to_string_pretty(&self.entries)?;
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, payload)
            .with_context(|| format!("writing {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.entries.contains_key(uid)
    }

    pub fn get(&self, uid: &str) -> Option<&ArchiveEntry> {
        self.entries.get(uid)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &ArchiveEntry)> {
        self.entries.iter().map(|(uid, entry)| (uid.as_str(), entry))
    }

    /// Records that `uid` produced `file_names`, merging with earlier runs.
    pub fn record(
        &mut self,
        uid: &str,
        extractor: &str,
        upload_date: NaiveDate,
        file_names: impl IntoIterator<Item = String>,
    ) {
        let entry = self
            .entries
            .entry(uid.to_string())
            .or_insert_with(|| ArchiveEntry {
                entry_id: uid.to_string(),
                extractor: extractor.to_string(),
                upload_date,
                file_names: BTreeSet::new(),
            });
        entry.upload_date = upload_date;
        entry.file_names.extend(file_names);
    }

    pub fn remove(&mut self, uid: &str) -> Option<ArchiveEntry> {
        self.entries.remove(uid)
    }

    /// Number of archived entries uploaded on `date`.
    pub fn count_on(&self, date: NaiveDate) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.upload_date == date)
            .count()
    }

    /// Entries uploaded outside `[after, before]`.
    pub fn outside_range(&self, before: Option<NaiveDate>, after: Option<NaiveDate>) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, entry)| {
                before.is_some_and(|before| entry.upload_date > before)
                    || after.is_some_and(|after| entry.upload_date < after)
            })
            .map(|(uid, _)| uid.clone())
            .collect()
    }

    /// Oldest entries beyond the newest `keep`.
    pub fn beyond_newest(&self, keep: usize) -> Vec<String> {
        let mut by_date: Vec<(&String, &ArchiveEntry)> = self.entries.iter().collect();
        by_date.sort_by(|(left_uid, left), (right_uid, right)| {
            right
                .upload_date
                .cmp(&left.upload_date)
                .then_with(|| left_uid.cmp(right_uid))
        });
        by_date
            .into_iter()
            .skip(keep)
            .map(|(uid, _)| uid.clone())
            .collect()
    }

    /// Writes the ids in yt-dlp's own archive format (`<extractor> <id>` per
    /// line) so the fetcher can skip them during extraction.
    pub fn write_ytdl_archive(&self, path: &Path) -> Result<()> {
        let mut file = File::create(path)
            .with_context(|| format!("creating yt-dlp archive {}", path.display()))?;
        for (uid, entry) in &self.entries {
            writeln!(file, "{} {}", entry.extractor, uid)
                .with_context(|| format!("writing archive entry for {uid}"))?;
        }
        Ok(())
    }
}

/// Subscription name to the archive file it reads and writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveIndex {
    paths: BTreeMap<String, PathBuf>,
}

impl ArchiveIndex {
    pub fn insert(&mut self, subscription: impl Into<String>, path: impl Into<PathBuf>) {
        self.paths.insert(subscription.into(), path.into());
    }

    pub fn path_of(&self, subscription: &str) -> Option<&Path> {
        self.paths.get(subscription).map(PathBuf::as_path)
    }

    /// Subscriptions sharing the archive at `path`.
    pub fn subscriptions_at(&self, path: &Path) -> Vec<&str> {
        self.paths
            .iter()
            .filter(|(_, archive)| archive.as_path() == path)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.paths.iter().map(|(name, path)| (name.as_str(), path.as_path()))
    }
}

/// Ids listed in a yt-dlp archive file.
pub fn load_ytdl_archive(path: &Path) -> Result<BTreeSet<String>> {
    if !path.exists() {
        return Ok(BTreeSet::new());
    }
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut ids = BTreeSet::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if let Some(id) = line.split_whitespace().last()
            && !id.is_empty()
        {
            ids.insert(id.to_owned());
        }
    }
    Ok(ids)
}
