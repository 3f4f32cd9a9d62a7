use serde_yaml::Value as Yaml;
use tracing::warn;

use super::{Plugin, PluginContext, PluginOperation};
use crate::entries::Entry;
use crate::error::{Error, Result};
use crate::ffmpeg;
use crate::file_handler::OutputWriter;
use crate::transaction_log::FileMetadata;
use crate::validators::{Mode, ValidationResult, Validator};

/// Attaches the entry's thumbnail to the media file as cover art.
#[derive(Debug)]
pub struct EmbedThumbnailPlugin {
    enabled: bool,
}

impl Validator for EmbedThumbnailPlugin {
    fn validate_in(mode: Mode, name: &str, value: &Yaml) -> ValidationResult<Self> {
        Ok(EmbedThumbnailPlugin {
            enabled: bool::validate_in(mode, name, value)?,
        })
    }
}

impl Plugin for EmbedThumbnailPlugin {
    fn name(&self) -> &'static str {
        "embed_thumbnail"
    }

    fn operations(&self) -> &'static [PluginOperation] {
        &[PluginOperation::PostProcess]
    }

    fn post_process_entry(
        &self,
        entry: &Entry,
        ctx: &PluginContext<'_>,
        _output: &mut OutputWriter<'_>,
    ) -> Result<Option<FileMetadata>> {
        if !self.enabled {
            return Ok(None);
        }
        if ctx.dry_run {
            return Ok(Some(FileMetadata::new("Thumbnail embedded")));
        }
        let Some(thumbnail) = entry.thumbnail_path() else {
            warn!("No thumbnail found for '{}', skipping embed", entry.title());
            return Ok(None);
        };
        let file = entry.file_path();
        if !file.is_file() {
            return Err(Error::FileNotDownloaded(file));
        }
        let is_jpg = thumbnail
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"));
        if is_jpg {
            ffmpeg::embed_thumbnail(ctx.transcoder, &file, &thumbnail)?;
        } else {
            let converted = ctx
                .working_directory
                .join(format!("{}.embed.jpg", entry.file_stem()));
            ffmpeg::convert_image(ctx.transcoder, &thumbnail, &converted)?;
            ffmpeg::embed_thumbnail(ctx.transcoder, &file, &converted)?;
            std::fs::remove_file(&converted)?;
        }
        Ok(Some(FileMetadata::new("Thumbnail embedded")))
    }
}
