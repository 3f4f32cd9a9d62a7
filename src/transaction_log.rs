//! Record of the files a run created, modified or removed.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Write as _};
use std::path::{Path, PathBuf};

/// Human-readable notes attached to an output file, e.g. embedded tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileMetadata {
    lines: Vec<String>,
}

impl FileMetadata {
    pub fn new(line: impl Into<String>) -> Self {
        FileMetadata {
            lines: vec![line.into()],
        }
    }

    /// A titled block of `key: value` lines.
    pub fn from_pairs<K: fmt::Display, V: fmt::Display>(
        title: &str,
        pairs: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        let mut lines = vec![title.to_string()];
        lines.extend(pairs.into_iter().map(|(key, value)| format!("  {key}: {value}")));
        FileMetadata { lines }
    }

    pub fn extend(&mut self, other: FileMetadata) {
        self.lines.extend(other.lines);
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionLog {
    output_directory: PathBuf,
    created: BTreeMap<String, FileMetadata>,
    modified: BTreeMap<String, FileMetadata>,
    removed: BTreeSet<String>,
}

impl TransactionLog {
    pub fn new(output_directory: impl Into<PathBuf>) -> Self {
        TransactionLog {
            output_directory: output_directory.into(),
            ..Self::default()
        }
    }

    pub fn output_directory(&self) -> &Path {
        &self.output_directory
    }

    pub fn add_created(&mut self, relative: impl Into<String>, metadata: Option<FileMetadata>) {
        self.created
            .insert(relative.into(), metadata.unwrap_or_default());
    }

    pub fn add_modified(&mut self, relative: impl Into<String>, metadata: Option<FileMetadata>) {
        self.modified
            .insert(relative.into(), metadata.unwrap_or_default());
    }

    pub fn add_removed(&mut self, relative: impl Into<String>) {
        let relative = relative.into();
        self.created.remove(&relative);
        self.modified.remove(&relative);
        self.removed.insert(relative);
    }

    pub fn created(&self) -> &BTreeMap<String, FileMetadata> {
        &self.created
    }

    pub fn modified(&self) -> &BTreeMap<String, FileMetadata> {
        &self.modified
    }

    pub fn removed(&self) -> &BTreeSet<String> {
        &self.removed
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    fn write_section(
        out: &mut String,
        heading: &str,
        files: impl Iterator<Item = (String, Option<FileMetadata>)>,
    ) {
        let mut files = files.peekable();
        if files.peek().is_none() {
            return;
        }
        let _ = writeln!(out, "{heading}:");
        let _ = writeln!(out, "{}", "-".repeat(40));
        for (path, metadata) in files {
            let _ = writeln!(out, "  {path}");
            for line in metadata.iter().flat_map(FileMetadata::lines) {
                let _ = writeln!(out, "    {line}");
            }
        }
    }

    /// The report printed after each subscription.
    pub fn to_output_message(&self) -> String {
        if self.is_empty() {
            return format!("No files changed in {}", self.output_directory.display());
        }
        let mut out = format!("Output directory: {}\n", self.output_directory.display());
        Self::write_section(
            &mut out,
            "Files created",
            self.created.iter().map(|(path, metadata)| (path.clone(), Some(metadata.clone()))),
        );
        Self::write_section(
            &mut out,
            "Files modified",
            self.modified.iter().map(|(path, metadata)| (path.clone(), Some(metadata.clone()))),
        );
        Self::write_section(
            &mut out,
            "Files removed",
            self.removed.iter().map(|path| (path.clone(), None)),
        );
        out.trim_end().to_string()
    }
}

impl fmt::Display for TransactionLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_output_message())
    }
}
