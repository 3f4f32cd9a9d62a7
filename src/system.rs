//! Process-level plumbing: the working-directory lock, umask, external
//! program checks and Ctrl-C handling.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, bail};
use tracing::warn;

use crate::error::{Error, Result};

static HANDLER_INSTALLED: AtomicBool = AtomicBool::new(false);
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Runs `<program> <version_flag>` to fail loudly when ffmpeg or yt-dlp is
/// missing.
pub fn ensure_program_available(program: impl AsRef<Path>, version_flag: &str) -> anyhow::Result<()> {
    let program = program.as_ref();
    let status = Command::new(program)
        .arg(version_flag)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match status {
        Ok(status) if status.success() => Ok(()),
        Ok(_) => bail!("{} is installed but returned a failure status", program.display()),
        Err(err) => bail!("{} is not installed or not in PATH: {}", program.display(), err),
    }
}

/// Applies an octal umask such as `002`.
pub fn apply_umask(octal: &str) -> anyhow::Result<()> {
    let bits = u32::from_str_radix(octal.trim(), 8)
        .with_context(|| format!("umask '{octal}' is not an octal number"))?;
    #[cfg(unix)]
    {
        use nix::sys::stat::{Mode, umask};
        umask(Mode::from_bits_truncate(bits as nix::libc::mode_t));
    }
    #[cfg(not(unix))]
    warn!("umask {bits:o} is ignored on this platform");
    Ok(())
}

/// Exclusive claim on a working directory, released on drop.
pub struct WorkingDirectoryLock {
    path: PathBuf,
    #[cfg(unix)]
    _lock: nix::fcntl::Flock<File>,
    #[cfg(not(unix))]
    _file: File,
}

impl std::fmt::Debug for WorkingDirectoryLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkingDirectoryLock").field("path", &self.path).finish()
    }
}

impl WorkingDirectoryLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Lock file for `working_directory` inside `lock_directory`, named after a
/// hash of the working directory's path.
pub fn lock_file_path(lock_directory: &Path, working_directory: &Path) -> PathBuf {
    let absolute = fs::canonicalize(working_directory).unwrap_or_else(|_| working_directory.to_path_buf());
    let hash = blake3::hash(absolute.to_string_lossy().as_bytes()).to_hex();
    lock_directory.join(format!("ytdl-sub-{}.lock", &hash[..16]))
}

/// Takes the lock for `working_directory`, failing immediately with
/// [`Error::Locked`] when another process holds it.
pub fn lock_working_directory(lock_directory: &Path, working_directory: &Path) -> Result<WorkingDirectoryLock> {
    fs::create_dir_all(lock_directory)
        .with_context(|| format!("creating lock directory {}", lock_directory.display()))?;
    let path = lock_file_path(lock_directory, working_directory);
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)
        .with_context(|| format!("opening lock file {}", path.display()))?;

    #[cfg(unix)]
    {
        use nix::fcntl::{Flock, FlockArg};
        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => Ok(WorkingDirectoryLock { path, _lock: lock }),
            Err((_, nix::errno::Errno::EWOULDBLOCK)) => Err(Error::Locked(working_directory.to_path_buf())),
            Err((_, errno)) => Err(anyhow::Error::new(errno)
                .context(format!("locking {}", path.display()))
                .into()),
        }
    }
    #[cfg(not(unix))]
    {
        Ok(WorkingDirectoryLock { path, _file: file })
    }
}

/// Installs the Ctrl-C handler once. The first interrupt stops the run
/// between entries; a second one exits immediately.
pub fn install_interrupt_handler() -> anyhow::Result<()> {
    if HANDLER_INSTALLED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }
    ctrlc::set_handler(|| {
        if INTERRUPTED.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
        warn!("Interrupt received, stopping after the current entry");
    })
    .context("installing the Ctrl-C handler")
}

pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Fails with [`Error::Interrupted`] once Ctrl-C was pressed.
pub fn check_interrupted() -> Result<()> {
    if interrupted() {
        Err(Error::Interrupted)
    } else {
        Ok(())
    }
}
