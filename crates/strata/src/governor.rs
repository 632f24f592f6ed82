//! Process-wide open-file accounting and quota-aware opens.
//!
//! The governor is advisory and self-healing: rather than pre-computing an
//! exact bound it keeps a safety margin below the OS open-file limit, and
//! when the file table fills anyway it trades idle groups for fresh ones.

use crate::error::{ArchiveError, Result};
use crate::stream::DataStream;
use std::fs::{DirBuilder, File, OpenOptions};
use std::io;
use std::path::Path;
use tracing::{debug, warn};

/// Safety margin kept between the engine's open-file count and the quota.
pub const OPEN_FILE_MARGIN: usize = 10;

/// Quota assumed when the OS limit cannot be determined.
const FALLBACK_QUOTA: u64 = 1024;

/// Tracks the files this engine holds open and evicts idle groups when the
/// count approaches the process quota.
///
/// Each engine owns its governor, so independent engines (and tests) never
/// share accounting state.
#[derive(Debug)]
pub struct FileGovernor {
    quota: Option<u64>,
    target: Option<u64>,
    open_count: usize,
}

impl FileGovernor {
    /// Creates a governor. A `target` raises the process soft limit toward
    /// that many open files on first use, capped at the hard limit.
    pub fn new(target: Option<u64>) -> Self {
        Self {
            quota: None,
            target,
            open_count: 0,
        }
    }

    /// Number of files currently held open through this governor.
    pub fn open_count(&self) -> usize {
        self.open_count
    }

    /// The open-file ceiling, initialized from the OS limit on first use.
    pub fn quota(&mut self) -> u64 {
        if let Some(quota) = self.quota {
            return quota;
        }
        let quota = init_quota(self.target);
        debug!(quota, "open file quota initialized");
        self.quota = Some(quota);
        quota
    }

    /// Overrides the quota. For embedders with their own limit accounting
    /// and for tests.
    pub fn set_quota(&mut self, quota: u64) {
        self.quota = Some(quota);
    }

    /// Runs one idle-eviction sweep over `stream`, keeping the open-file
    /// count consistent with the handles closed.
    ///
    /// Returns the number of file handles closed.
    pub(crate) fn sweep_idle(&mut self, stream: &mut DataStream, timeout_secs: i64) -> usize {
        let closed = stream.close_idle(timeout_secs);
        self.open_count = self.open_count.saturating_sub(closed);
        closed
    }

    /// Releases accounting for `closed` handles closed outside a sweep.
    pub(crate) fn release(&mut self, closed: usize) {
        self.open_count = self.open_count.saturating_sub(closed);
    }

    /// Opens the stream file at `path` (create-if-absent, append), creating
    /// missing parent directories.
    ///
    /// When the open-file count is within [`OPEN_FILE_MARGIN`] of the quota,
    /// idle groups of `stream` are evicted first. If the OS still refuses
    /// the open with a full file table and no eviction has run this call,
    /// eviction is retried once before giving up.
    pub(crate) fn open(&mut self, stream: &mut DataStream, path: &Path) -> Result<File> {
        let quota = self.quota();
        let mut evicted = false;
        if (self.open_count + OPEN_FILE_MARGIN) as u64 > quota {
            debug!(quota, "maximum open archive files reached, closing idle stream files");
            self.evict_for_space(stream);
            evicted = true;
        }

        create_parent_dirs(path)?;

        match open_append(path) {
            Ok(file) => {
                self.open_count += 1;
                Ok(file)
            }
            Err(err) if is_file_table_full(&err) && !evicted => {
                warn!(path = %path.display(), "file table full, evicting idle streams and retrying");
                self.evict_for_space(stream);
                match open_append(path) {
                    Ok(file) => {
                        self.open_count += 1;
                        Ok(file)
                    }
                    Err(err) => {
                        warn!(path = %path.display(), %err, "cannot open data stream file");
                        Err(ArchiveError::io(path, err))
                    }
                }
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "cannot open data stream file");
                Err(ArchiveError::io(path, err))
            }
        }
    }

    /// Sweeps with a shrinking timeout until a sweep closes at least one
    /// file or the timeout goes negative.
    fn evict_for_space(&mut self, stream: &mut DataStream) {
        let mut timeout = i64::from(stream.config().idle_timeout_secs);
        loop {
            let closed = self.sweep_idle(stream, timeout);
            if closed > 0 || timeout < 0 {
                break;
            }
            timeout = timeout / 2 - 1;
        }
    }
}

impl Default for FileGovernor {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Creates any missing parent directories of `path`. Directories get full
/// permissions (modulo umask); a component that exists as a non-directory
/// fails the call.
fn create_parent_dirs(path: &Path) -> Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() || parent.is_dir() {
        return Ok(());
    }
    debug!(dir = %parent.display(), "creating directory");
    let mut builder = DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o777);
    }
    builder
        .create(parent)
        .map_err(|err| ArchiveError::io(parent, err))
}

fn open_append(path: &Path) -> io::Result<File> {
    let mut opts = OpenOptions::new();
    opts.read(true).append(true).create(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o666);
    }
    opts.open(path)
}

fn is_file_table_full(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        matches!(err.raw_os_error(), Some(code) if code == libc::EMFILE || code == libc::ENFILE)
    }
    #[cfg(not(unix))]
    {
        let _ = err;
        false
    }
}

#[cfg(unix)]
fn init_quota(target: Option<u64>) -> u64 {
    let mut rlim = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: plain out-parameter syscall on a local struct.
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut rlim) } != 0 {
        warn!("getrlimit failed to report the open file limit, assuming {FALLBACK_QUOTA}");
        return FALLBACK_QUOTA;
    }

    let soft = rlim.rlim_cur as u64;
    match target {
        Some(target) if target > soft => {
            let raised = target.min(rlim.rlim_max as u64);
            rlim.rlim_cur = raised as libc::rlim_t;
            debug!(limit = raised, "raising open file limit");
            // SAFETY: the new soft limit never exceeds the hard limit.
            if unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &rlim) } != 0 {
                warn!("setrlimit failed to raise the open file limit");
                return soft;
            }
            raised
        }
        _ => soft,
    }
}

#[cfg(not(unix))]
fn init_quota(target: Option<u64>) -> u64 {
    target.unwrap_or(FALLBACK_QUOTA)
}
