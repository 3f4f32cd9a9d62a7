//! Moving finished files from the working directory into the output
//! directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::error::Result;
use crate::transaction_log::{FileMetadata, TransactionLog};

/// Filesystem operations that become no-ops in a dry run.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileHandler {
    dry_run: bool,
}

impl FileHandler {
    pub fn new(dry_run: bool) -> Self {
        FileHandler { dry_run }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn copy(&self, source: &Path, destination: &Path) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }
        create_parent(destination)?;
        fs::copy(source, destination).with_context(|| {
            format!("copying {} to {}", source.display(), destination.display())
        })?;
        Ok(())
    }

    /// Renames when possible and falls back to copy + delete across devices.
    pub fn move_file(&self, source: &Path, destination: &Path) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }
        create_parent(destination)?;
        if fs::rename(source, destination).is_err() {
            fs::copy(source, destination).with_context(|| {
                format!("moving {} to {}", source.display(), destination.display())
            })?;
            fs::remove_file(source)
                .with_context(|| format!("removing {}", source.display()))?;
        }
        Ok(())
    }

    pub fn delete(&self, path: &Path) -> Result<()> {
        if self.dry_run || !path.exists() {
            return Ok(());
        }
        fs::remove_file(path).with_context(|| format!("deleting {}", path.display()))?;
        Ok(())
    }
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    Ok(())
}

/// Same bytes on both sides.
pub fn same_contents(left: &Path, right: &Path) -> Result<bool> {
    let left = fs::read(left).with_context(|| format!("reading {}", left.display()))?;
    let right = fs::read(right).with_context(|| format!("reading {}", right.display()))?;
    Ok(blake3::hash(&left) == blake3::hash(&right))
}

/// Saves files of one subscription into its output directory, logging each
/// change and remembering what was written for the archive.
#[derive(Debug)]
pub struct OutputWriter<'a> {
    handler: FileHandler,
    output_directory: PathBuf,
    log: &'a mut TransactionLog,
    written: Vec<String>,
}

impl<'a> OutputWriter<'a> {
    pub fn new(handler: FileHandler, output_directory: impl Into<PathBuf>, log: &'a mut TransactionLog) -> Self {
        OutputWriter {
            handler,
            output_directory: output_directory.into(),
            log,
            written: Vec::new(),
        }
    }

    pub fn output_directory(&self) -> &Path {
        &self.output_directory
    }

    pub fn handler(&self) -> FileHandler {
        self.handler
    }

    /// Moves `source` to `relative` under the output directory. Identical
    /// existing files are left alone and not logged.
    pub fn save_file(
        &mut self,
        source: &Path,
        relative: &str,
        metadata: Option<FileMetadata>,
    ) -> Result<()> {
        self.save(source, relative, metadata, false)
    }

    /// Like [`OutputWriter::save_file`] but leaves `source` in place, for
    /// files shared by several entries.
    pub fn save_copy(
        &mut self,
        source: &Path,
        relative: &str,
        metadata: Option<FileMetadata>,
    ) -> Result<()> {
        self.save(source, relative, metadata, true)
    }

    fn save(
        &mut self,
        source: &Path,
        relative: &str,
        metadata: Option<FileMetadata>,
        keep_source: bool,
    ) -> Result<()> {
        let destination = self.output_directory.join(relative);
        self.written.push(relative.to_string());
        if destination.is_file() && source.is_file() {
            if same_contents(source, &destination)? {
                debug!("{} is unchanged", destination.display());
                if !keep_source {
                    self.handler.delete(source)?;
                }
                return Ok(());
            }
            self.log.add_modified(relative, metadata);
        } else if destination.is_file() {
            // Nothing new in a dry run: the source was never downloaded.
            return Ok(());
        } else {
            self.log.add_created(relative, metadata);
        }
        if keep_source {
            self.handler.copy(source, &destination)
        } else {
            self.handler.move_file(source, &destination)
        }
    }

    /// Deletes an output file that an earlier run created.
    pub fn remove_file(&mut self, relative: &str) -> Result<()> {
        let path = self.output_directory.join(relative);
        if path.exists() {
            self.handler.delete(&path)?;
            self.log.add_removed(relative);
        }
        Ok(())
    }

    /// Relative names written since the last call.
    pub fn take_written(&mut self) -> Vec<String> {
        std::mem::take(&mut self.written)
    }
}
