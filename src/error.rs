use std::path::PathBuf;

use thiserror::Error;

use crate::script::ScriptError;
use crate::validators::ValidationError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Every failure the pipeline can surface to the user.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Cycle detected within these presets: {0}")]
    PresetCycle(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error("File not downloaded: {}", .0.display())]
    FileNotDownloaded(PathBuf),
    #[error("{0}")]
    RegexNoMatch(String),
    #[error(
        "The feature '{0}' is experimental. Set `configuration.experimental.{0}: True` to enable it"
    )]
    ExperimentalFeatureNotEnabled(String),
    #[error("Working directory {} is in use by another ytdl-sub process", .0.display())]
    Locked(PathBuf),
    #[error("Interrupted by user")]
    Interrupted,
    #[error("Fetcher failed: {0}")]
    Fetcher(String),
    #[error("Transcoder failed: {0}")]
    Transcoder(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Prefixes the message with the subscription or entry it happened in.
    pub fn context(self, context: impl std::fmt::Display) -> Self {
        Error::Other(anyhow::Error::new(self).context(context.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_keep_their_message() {
        let error: Error = ValidationError::new("presets.tv.output_options", "is required").into();
        assert_eq!(
            error.to_string(),
            "Validation error in presets.tv.output_options: is required"
        );
    }

    #[test]
    fn context_wraps_message() {
        let error = Error::Interrupted.context("subscription 'news'");
        assert_eq!(format!("{error:#}"), "subscription 'news': Interrupted by user");
    }
}
