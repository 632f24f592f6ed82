//! The archive engine: record-to-file routing, coverage guarding, and
//! retrying writes.
//!
//! # Control flow
//!
//! Each record moves through the same stations, fully and synchronously,
//! before the next record is taken:
//!
//! ```text
//! expand template → resolve group → coverage guard → retrying write
//!                   (resurrect, sweep idle, open)     (bookkeeping)
//! ```
//!
//! Resolving marks the group as in-service so the idle sweep that runs on
//! every lookup can never evict the group being serviced; the mark is
//! restored on every exit path, including suppressed writes and errors.
//!
//! # Example
//!
//! ```rust,ignore
//! use strata::{Archiver, DataStream, StreamConfig};
//!
//! let mut archiver = Archiver::new(codec);
//! let mut stream = DataStream::new("/archive/%n.%s.%l.%c.%Y.%j", StreamConfig::default());
//!
//! for record in feed {
//!     archiver.process(&mut stream, &record, 0)?;
//! }
//! archiver.shutdown(&mut stream);
//! ```

use crate::error::{ArchiveError, Result};
use crate::governor::FileGovernor;
use crate::pattern::{self, StreamPath};
use crate::record::{Record, RecordCodec, RecordKind};
use crate::stream::{Coverage, DataStream, StreamGroup};
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

/// Bounded number of attempts to push one record to the OS.
pub const WRITE_RETRY_LIMIT: usize = 10;

/// The archiving engine.
///
/// Owns the process-wide open-file governor and the codec used to recover
/// coverage state from pre-existing files. One engine services any number
/// of [`DataStream`] definitions; a failure in one definition's processing
/// never affects the others.
pub struct Archiver<C> {
    governor: FileGovernor,
    codec: C,
}

impl<C: RecordCodec> Archiver<C> {
    /// Creates an engine whose open-file quota follows the OS soft limit.
    pub fn new(codec: C) -> Self {
        Self {
            governor: FileGovernor::new(None),
            codec,
        }
    }

    /// Creates an engine that raises the process open-file limit toward
    /// `target` on first use.
    pub fn with_open_file_target(codec: C, target: u64) -> Self {
        Self {
            governor: FileGovernor::new(Some(target)),
            codec,
        }
    }

    /// The engine's open-file governor.
    pub fn governor(&self) -> &FileGovernor {
        &self.governor
    }

    /// Mutable access to the governor, for quota overrides.
    pub fn governor_mut(&mut self) -> &mut FileGovernor {
        &mut self.governor
    }

    /// Archives one record into `stream`.
    ///
    /// Directories and files are created as needed; existing files are
    /// appended to. A `suffix` greater than zero requests a sibling
    /// `.<suffix>` file for collision avoidance. Records rejected by the
    /// coverage guard are skipped silently and report success.
    ///
    /// # Errors
    ///
    /// Formatting and I/O failures abort this record only; the group is
    /// left recoverable, so the next record may retry the open.
    pub fn process(&mut self, stream: &mut DataStream, record: &Record, suffix: u64) -> Result<()> {
        let sp = pattern::expand(stream.template(), record, suffix)?;
        let result = self.service(stream, record, &sp);
        // The in-service mark must not outlive the call, whichever way it ended.
        if let Some(group) = stream.group_mut(&sp.key) {
            group.touch();
        }
        result
    }

    /// Closes every group of `stream` and releases its open-file
    /// accounting. Called once per archive definition at program exit.
    pub fn shutdown(&mut self, stream: &mut DataStream) {
        debug!(template = stream.template(), "closing archive");
        let closed = stream.close_all();
        self.governor.release(closed);
    }

    fn service(&mut self, stream: &mut DataStream, record: &Record, sp: &StreamPath) -> Result<()> {
        self.resolve(stream, record, sp)?;

        let policy = stream.config().coverage;
        let group = stream
            .group_mut(&sp.key)
            .ok_or_else(|| lost_group(&sp.key))?;

        if record.kind == RecordKind::Data {
            // Initial check: coverage recovered from a pre-existing file.
            if policy.check_initial {
                if let Coverage::FromFile(reference) = group.coverage() {
                    let overlap = reference - record.start_epoch();
                    if overlap > f64::from(policy.initial_tolerance_secs) {
                        if group.warn_initial {
                            warn!(
                                path = %group.path().display(),
                                overlap_secs = overlap,
                                "record overlaps existing archive data, skipping"
                            );
                            group.warn_initial = false;
                        }
                        return Ok(());
                    }
                }
            }

            // Continuous check: coverage written earlier this session.
            if policy.check_continuous {
                if let Coverage::FromSession(reference) = group.coverage() {
                    let overlap = reference - record.start_epoch();
                    if overlap > f64::from(policy.continuous_tolerance_secs) {
                        if group.warn_continuous {
                            warn!(
                                path = %group.path().display(),
                                overlap_secs = overlap,
                                "record overlaps continuous data, skipping"
                            );
                            group.warn_continuous = false;
                        }
                        return Ok(());
                    } else if !group.warn_continuous {
                        // Coverage is back to normal; report future overlaps again.
                        group.warn_continuous = true;
                    }
                }
            }
        }

        debug!(path = %group.path().display(), "writing record to data stream file");
        let path = group.path().to_path_buf();
        let file = group
            .file_mut()
            .ok_or_else(|| ArchiveError::Internal(format!("no open handle for key {}", sp.key)))?;
        write_record(file, &record.payload, &path)?;

        if record.kind == RecordKind::Data && (policy.check_initial || policy.check_continuous) {
            group.coverage = Coverage::FromSession(record.last_sample_epoch());
        }
        Ok(())
    }

    /// Finds or creates the group for `sp.key`, sweeps idle groups, and
    /// ensures the group holds an open file handle.
    fn resolve(&mut self, stream: &mut DataStream, record: &Record, sp: &StreamPath) -> Result<()> {
        if stream.group(&sp.key).is_none() {
            let policy = stream.config().coverage;
            let mut path = PathBuf::from(&sp.filename);
            match sp.glob_pattern.as_deref().and_then(find_existing) {
                Some(found) => {
                    debug!(
                        key = %sp.key,
                        path = %found.display(),
                        "resurrecting stream group from existing file"
                    );
                    path = found;
                }
                None => debug!(key = %sp.key, "creating stream group"),
            }
            stream.insert_group(StreamGroup::new(&sp.key, path, &policy));
        } else {
            debug!(key = %sp.key, "found stream group");
        }

        // Shield the group from the sweep below.
        match stream.group_mut(&sp.key) {
            Some(group) => group.mark_in_service(),
            None => return Err(lost_group(&sp.key)),
        }

        // Opportunistic reclamation; may close other groups, never this one.
        let timeout = i64::from(stream.config().idle_timeout_secs);
        self.governor.sweep_idle(stream, timeout);

        let pending = match stream.group(&sp.key) {
            Some(group) if !group.has_open_file() => Some(group.path().to_path_buf()),
            Some(_) => None,
            None => return Err(lost_group(&sp.key)),
        };
        let Some(path) = pending else {
            return Ok(());
        };

        debug!(path = %path.display(), "opening data stream file");
        let file = self.governor.open(stream, &path)?;

        let policy = stream.config().coverage;
        let group = stream
            .group_mut(&sp.key)
            .ok_or_else(|| lost_group(&sp.key))?;
        group.file = Some(file);

        // The initial coverage check needs the last sample time already on
        // disk; only a freshly opened, never-written group derives it.
        if record.kind == RecordKind::Data
            && policy.check_initial
            && group.coverage() == Coverage::Unknown
        {
            self.recover_trailing(group, record.len())?;
        }
        Ok(())
    }

    /// Reads the trailing record of the group's file and adopts its last
    /// sample time as file-derived coverage. An unparsable trailing record
    /// leaves coverage unknown; seek and read failures propagate.
    fn recover_trailing(&self, group: &mut StreamGroup, reclen: usize) -> Result<()> {
        let path = group.path().to_path_buf();
        let Some(file) = group.file_mut() else {
            return Ok(());
        };

        let end = file
            .seek(SeekFrom::End(0))
            .map_err(|err| ArchiveError::io(&path, err))?;
        if reclen == 0 || end < reclen as u64 {
            return Ok(());
        }

        debug!(path = %path.display(), "reading last record in existing file");
        file.seek(SeekFrom::End(-(reclen as i64)))
            .map_err(|err| ArchiveError::io(&path, err))?;
        let mut buf = vec![0u8; reclen];
        file.read_exact(&mut buf)
            .map_err(|err| ArchiveError::io(&path, err))?;

        match self.codec.decode(&buf) {
            Some(last) => {
                group.coverage = Coverage::FromFile(last.last_sample_epoch());
            }
            None => {
                warn!(path = %path.display(), "cannot parse the last record of stream file");
                group.coverage = Coverage::Unknown;
            }
        }
        Ok(())
    }
}

fn lost_group(key: &str) -> ArchiveError {
    error!(key, "in-service stream group vanished from the registry");
    ArchiveError::Internal(format!("in-service stream group lost for key {key}"))
}

/// Searches the filesystem for a previously written file matching `pattern`.
///
/// Non-defining fields legitimately vary between process restarts;
/// rediscovering the file lets the archiver resume appending to a file it
/// lost track of in memory instead of starting a sibling. Multiple matches
/// resolve to the sort-order-last one, read as the most recently rotated.
fn find_existing(pattern: &str) -> Option<PathBuf> {
    debug!(pattern, "no stream entry found, searching");
    let paths = match glob::glob(pattern) {
        Ok(paths) => paths,
        Err(err) => {
            warn!(pattern, %err, "invalid wildcard pattern");
            return None;
        }
    };

    let mut matches = Vec::new();
    for entry in paths {
        match entry {
            Ok(path) => matches.push(path),
            Err(err) => warn!(pattern, %err, "wildcard search failed"),
        }
    }
    matches.sort();

    if matches.len() > 1 {
        debug!(pattern, count = matches.len(), "multiple files match, using last");
    }
    let found = matches.pop();
    if let Some(path) = &found {
        debug!(path = %path.display(), "found matching file for non-defining fields");
    }
    found
}

/// Writes one fixed-length record, resuming partial writes and absorbing
/// interrupted calls, up to [`WRITE_RETRY_LIMIT`] attempts.
fn write_record(file: &mut File, bytes: &[u8], path: &Path) -> Result<()> {
    let mut written = 0;
    for _ in 0..WRITE_RETRY_LIMIT {
        match file.write(&bytes[written..]) {
            Ok(n) => {
                written += n;
                if written == bytes.len() {
                    return Ok(());
                }
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => {
                debug!(path = %path.display(), "interrupted write, retrying");
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "failed to write record");
                return Err(ArchiveError::io(path, err));
            }
        }
    }
    warn!(path = %path.display(), "record write interrupted on every attempt, giving up");
    Err(ArchiveError::WriteExhausted {
        path: path.to_path_buf(),
        attempts: WRITE_RETRY_LIMIT,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_find_existing_picks_last_match() {
        let dir = TempDir::new().unwrap();
        for name in ["GE.WLF.00.BHZ.D", "GE.WLF.00.BHZ.Q", "GE.WLF.00.BHZ.R"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }

        let pattern = format!("{}/GE.WLF.00.BHZ.?", dir.path().display());
        let found = find_existing(&pattern).unwrap();
        assert_eq!(found, dir.path().join("GE.WLF.00.BHZ.R"));
    }

    #[test]
    fn test_find_existing_no_match() {
        let dir = TempDir::new().unwrap();
        let pattern = format!("{}/GE.*", dir.path().display());
        assert!(find_existing(&pattern).is_none());
    }

    #[test]
    fn test_find_existing_bad_pattern() {
        assert!(find_existing("[").is_none());
    }

    #[test]
    fn test_write_record_appends_fully() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out");
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .unwrap();

        write_record(&mut file, &[7u8; 256], &path).unwrap();
        write_record(&mut file, &[9u8; 256], &path).unwrap();
        drop(file);

        let data = std::fs::read(&path).unwrap();
        assert_eq!(data.len(), 512);
        assert!(data[..256].iter().all(|&b| b == 7));
        assert!(data[256..].iter().all(|&b| b == 9));
    }
}
