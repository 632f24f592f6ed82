//! Archive definitions and per-file group bookkeeping.
//!
//! A [`DataStream`] describes one configured output target: a filename
//! template plus idle and coverage policies. Each distinct grouping key the
//! template produces gets a [`StreamGroup`], which owns at most one open
//! file handle and the coverage state for that file. Groups are kept in
//! arrival order; idle ones are swept out by [`DataStream::close_idle`].

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

/// Default idle timeout before a sweep may close a group (seconds).
pub const DEFAULT_IDLE_TIMEOUT_SECS: u32 = 300;

/// Default tolerated overlap for coverage checks (seconds).
pub const DEFAULT_OVERLAP_TOLERANCE_SECS: u32 = 2;

/// Overlap-rejection policy for one archive definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoveragePolicy {
    /// Check records against coverage recovered from pre-existing files.
    pub check_initial: bool,
    /// Tolerated overlap for the initial check, in seconds.
    pub initial_tolerance_secs: u32,
    /// Check records against coverage written this session.
    pub check_continuous: bool,
    /// Tolerated overlap for the continuous check, in seconds.
    pub continuous_tolerance_secs: u32,
}

impl Default for CoveragePolicy {
    fn default() -> Self {
        Self {
            check_initial: false,
            initial_tolerance_secs: DEFAULT_OVERLAP_TOLERANCE_SECS,
            check_continuous: false,
            continuous_tolerance_secs: DEFAULT_OVERLAP_TOLERANCE_SECS,
        }
    }
}

/// Configuration for one archive definition.
#[derive(Debug, Clone, Copy)]
pub struct StreamConfig {
    /// Seconds a group may sit untouched before a sweep closes it.
    pub idle_timeout_secs: u32,
    /// Overlap-rejection policy.
    pub coverage: CoveragePolicy,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            coverage: CoveragePolicy::default(),
        }
    }
}

/// Idle-clock state of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    /// Untouched since the given instant; eligible for idle eviction.
    Idle(SystemTime),
    /// Currently being serviced; never evicted.
    InService,
}

/// Provenance-tagged time coverage of a group's file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Coverage {
    /// No coverage information; overlap checks are disabled.
    Unknown,
    /// Last-sample epoch read back from an existing file's trailing record.
    FromFile(f64),
    /// Last-sample epoch of the most recent record written this session.
    FromSession(f64),
}

/// Bookkeeping and open handle for one distinct output file identity.
#[derive(Debug)]
pub struct StreamGroup {
    pub(crate) key: String,
    pub(crate) path: PathBuf,
    pub(crate) file: Option<File>,
    pub(crate) activity: Activity,
    pub(crate) coverage: Coverage,
    pub(crate) warn_initial: bool,
    pub(crate) warn_continuous: bool,
}

impl StreamGroup {
    pub(crate) fn new(key: &str, path: PathBuf, policy: &CoveragePolicy) -> Self {
        Self {
            key: key.to_string(),
            path,
            file: None,
            activity: Activity::Idle(SystemTime::now()),
            coverage: Coverage::Unknown,
            warn_initial: policy.check_initial,
            warn_continuous: policy.check_continuous,
        }
    }

    /// The grouping key this entry is registered under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The resolved filesystem path the group writes to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The group's current coverage state.
    pub fn coverage(&self) -> Coverage {
        self.coverage
    }

    /// Returns true while the group holds an open file handle.
    pub fn has_open_file(&self) -> bool {
        self.file.is_some()
    }

    pub(crate) fn file_mut(&mut self) -> Option<&mut File> {
        self.file.as_mut()
    }

    pub(crate) fn mark_in_service(&mut self) {
        self.activity = Activity::InService;
    }

    pub(crate) fn touch(&mut self) {
        self.activity = Activity::Idle(SystemTime::now());
    }
}

/// One configured output target and its live groups.
#[derive(Debug)]
pub struct DataStream {
    template: String,
    config: StreamConfig,
    groups: Vec<StreamGroup>,
}

impl DataStream {
    /// Creates an archive definition from a filename template.
    ///
    /// The template is not validated here; an empty or overlong expansion
    /// surfaces as an error from the first record processed.
    pub fn new(template: impl Into<String>, config: StreamConfig) -> Self {
        Self {
            template: template.into(),
            config,
            groups: Vec::new(),
        }
    }

    /// The filename template.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// The stream's configuration.
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Number of live groups.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Number of groups currently holding an open file handle.
    pub fn open_file_count(&self) -> usize {
        self.groups.iter().filter(|g| g.file.is_some()).count()
    }

    /// Looks up a live group by key.
    pub fn group(&self, key: &str) -> Option<&StreamGroup> {
        self.groups.iter().find(|g| g.key == key)
    }

    /// Iterates the live groups in arrival order.
    pub fn groups(&self) -> impl Iterator<Item = &StreamGroup> {
        self.groups.iter()
    }

    pub(crate) fn group_mut(&mut self, key: &str) -> Option<&mut StreamGroup> {
        self.groups.iter_mut().find(|g| g.key == key)
    }

    pub(crate) fn insert_group(&mut self, group: StreamGroup) {
        self.groups.push(group);
    }

    /// Evicts every idle group untouched for at least `timeout_secs`,
    /// closing its file handle. Groups being serviced are never evicted.
    /// A negative timeout evicts every idle group.
    ///
    /// Returns the number of file handles closed.
    pub(crate) fn close_idle(&mut self, timeout_secs: i64) -> usize {
        let now = SystemTime::now();
        let mut closed = 0;
        self.groups.retain_mut(|group| match group.activity {
            Activity::InService => true,
            Activity::Idle(since) => {
                let idle = now
                    .duration_since(since)
                    .map(|d| d.as_secs() as i64)
                    .unwrap_or(0);
                if idle >= timeout_secs {
                    debug!(key = %group.key, "closing idle stream group");
                    if group.file.take().is_some() {
                        closed += 1;
                    }
                    false
                } else {
                    true
                }
            }
        });
        closed
    }

    /// Closes every group, releasing all bookkeeping.
    ///
    /// Returns the number of file handles closed.
    pub(crate) fn close_all(&mut self) -> usize {
        let mut closed = 0;
        for group in self.groups.drain(..) {
            debug!(key = %group.key, "shutting down stream group");
            if group.file.is_some() {
                closed += 1;
            }
        }
        closed
    }
}
