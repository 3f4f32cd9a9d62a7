//! Canned ffmpeg invocations used by the post-processing plugins.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Context;
use tracing::debug;

use crate::error::{Error, Result};

/// Runs a transcoder with the given arguments.
pub trait Transcoder {
    fn run(&self, args: &[String]) -> Result<()>;

    /// Scratch path next to `target`: `name.tmp.ext`.
    fn tmp_file_path(&self, target: &Path) -> PathBuf {
        let stem = target
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = match target.extension() {
            Some(ext) => format!("{stem}.tmp.{}", ext.to_string_lossy()),
            None => format!("{stem}.tmp"),
        };
        target.with_file_name(name)
    }
}

#[derive(Debug, Clone)]
pub struct Ffmpeg {
    ffmpeg_path: PathBuf,
    ffprobe_path: PathBuf,
}

impl Ffmpeg {
    pub fn new(ffmpeg_path: impl Into<PathBuf>, ffprobe_path: impl Into<PathBuf>) -> Self {
        Ffmpeg {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
        }
    }

    pub fn ffmpeg_path(&self) -> &Path {
        &self.ffmpeg_path
    }

    pub fn ffprobe_path(&self) -> &Path {
        &self.ffprobe_path
    }
}

impl Transcoder for Ffmpeg {
    fn run(&self, args: &[String]) -> Result<()> {
        debug!("Running {} {}", self.ffmpeg_path.display(), args.join(" "));
        let output = Command::new(&self.ffmpeg_path)
            .args(["-loglevel", "error", "-y"])
            .args(args)
            .output()
            .with_context(|| format!("running {}", self.ffmpeg_path.display()))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(Error::Transcoder(format!(
                "{} exited with {}: {}",
                self.ffmpeg_path.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Runs `args` writing to a scratch file, then replaces `file` with it.
/// `args` receives the scratch path as its output.
fn rewrite_in_place(
    transcoder: &dyn Transcoder,
    file: &Path,
    args: impl FnOnce(&Path) -> Vec<String>,
) -> Result<()> {
    let tmp = transcoder.tmp_file_path(file);
    transcoder.run(&args(&tmp))?;
    fs::rename(&tmp, file)
        .with_context(|| format!("replacing {} with {}", file.display(), tmp.display()))?;
    Ok(())
}

/// Writes container-level metadata tags into `file`.
pub fn embed_tags(transcoder: &dyn Transcoder, file: &Path, tags: &[(String, String)]) -> Result<()> {
    rewrite_in_place(transcoder, file, |tmp| {
        let mut args = vec!["-i".to_string(), path_arg(file), "-map".into(), "0".into()];
        args.extend(["-dn".to_string(), "-c".into(), "copy".into()]);
        for (key, value) in tags {
            args.push("-metadata".into());
            args.push(format!("{key}={value}"));
        }
        args.push(path_arg(tmp));
        args
    })
}

/// Attaches `thumbnail` as cover art.
pub fn embed_thumbnail(transcoder: &dyn Transcoder, file: &Path, thumbnail: &Path) -> Result<()> {
    rewrite_in_place(transcoder, file, |tmp| {
        let mut args = vec!["-i".to_string(), path_arg(file), "-i".into(), path_arg(thumbnail)];
        for arg in ["-map", "0", "-map", "1", "-c", "copy", "-disposition:v:1", "attached_pic"] {
            args.push(arg.to_string());
        }
        args.push(path_arg(tmp));
        args
    })
}

/// Converts an image, e.g. a webp thumbnail to jpg.
pub fn convert_image(transcoder: &dyn Transcoder, source: &Path, target: &Path) -> Result<()> {
    transcoder.run(&[
        "-i".to_string(),
        path_arg(source),
        "-bsf:v".to_string(),
        "mjpeg2jpeg".to_string(),
        path_arg(target),
    ])
}

/// Copies the `[start, end)` section of `source` into `target` without
/// re-encoding.
pub fn cut(
    transcoder: &dyn Transcoder,
    source: &Path,
    start: f64,
    end: f64,
    target: &Path,
) -> Result<()> {
    transcoder.run(&[
        "-i".to_string(),
        path_arg(source),
        "-ss".to_string(),
        format!("{start:.3}"),
        "-to".to_string(),
        format!("{end:.3}"),
        "-map".to_string(),
        "0".to_string(),
        "-c".to_string(),
        "copy".to_string(),
        path_arg(target),
    ])
}

/// Converts `source` into `target` with extra user arguments.
pub fn convert(
    transcoder: &dyn Transcoder,
    source: &Path,
    target: &Path,
    extra_args: &[String],
) -> Result<()> {
    let mut args = vec!["-i".to_string(), path_arg(source)];
    args.extend(extra_args.iter().cloned());
    args.push(path_arg(target));
    transcoder.run(&args)
}

#[cfg(test)]
pub(crate) mod testing {
    use parking_lot::Mutex;

    use super::*;

    /// Records invocations and creates the output file, which is always the
    /// last argument.
    #[derive(Debug, Default)]
    pub struct RecordingTranscoder {
        pub calls: Mutex<Vec<Vec<String>>>,
    }

    impl Transcoder for RecordingTranscoder {
        fn run(&self, args: &[String]) -> Result<()> {
            self.calls.lock().push(args.to_vec());
            if let Some(output) = args.last() {
                fs::write(output, "transcoded")?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingTranscoder;
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn tmp_path_keeps_extension() {
        let transcoder = RecordingTranscoder::default();
        assert_eq!(
            transcoder.tmp_file_path(Path::new("/w/abc.mp4")),
            PathBuf::from("/w/abc.tmp.mp4")
        );
    }

    #[test]
    fn embed_tags_replaces_file() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let file = dir.path().join("a.mp3");
        fs::write(&file, "original")?;
        let transcoder = RecordingTranscoder::default();
        embed_tags(&transcoder, &file, &[("artist".into(), "Someone".into())])?;
        assert_eq!(fs::read_to_string(&file)?, "transcoded");
        let calls = transcoder.calls.lock();
        assert!(calls[0].contains(&"artist=Someone".to_string()));
        assert!(!dir.path().join("a.tmp.mp3").exists());
        Ok(())
    }

    #[test]
    fn failing_binary_is_a_transcoder_error() {
        let ffmpeg = Ffmpeg::new("/nonexistent/ffmpeg", "/nonexistent/ffprobe");
        assert!(ffmpeg.run(&["-version".to_string()]).is_err());
    }
}
