//! The fetcher capability and its yt-dlp implementation.

mod options;
mod ytdlp;

use std::path::{Path, PathBuf};

use serde_json::Value as Json;

use crate::entries::Entry;
use crate::error::Result;

pub use options::{DOWNLOAD_ARCHIVE, FetchOptions, to_cli_args};
pub use ytdlp::{YtDlp, flatten_playlist};

/// Files a download produced in the working directory.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadedFiles {
    pub media: PathBuf,
    pub thumbnail: Option<PathBuf>,
}

/// Source of entry metadata and media.
pub trait Fetcher {
    /// Metadata of every entry behind `url`, in the order the site lists
    /// them. Playlists are flattened.
    fn extract_metadata(
        &self,
        url: &str,
        options: &FetchOptions,
        working_directory: &Path,
    ) -> Result<Vec<Json>>;

    /// Downloads `entry` into its working directory.
    fn download(&self, entry: &Entry, options: &FetchOptions) -> Result<DownloadedFiles>;

    /// Whether the [`DOWNLOAD_ARCHIVE`] option is honoured during extraction.
    fn supports_download_archive(&self) -> bool {
        true
    }

    fn supports_subtitles(&self) -> bool {
        true
    }
}
