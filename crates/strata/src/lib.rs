//! Strata - Streaming Telemetry Archive Engine
//!
//! This crate persists sequential fixed-size telemetry records into
//! long-lived output files, selected and named by a per-record filename
//! template.
//!
//! # Components
//!
//! - [`pattern`]: template expansion into filename, grouping key, and
//!   wildcard search pattern
//! - [`DataStream`] / [`StreamGroup`]: archive definitions and the registry
//!   of currently open output files
//! - [`FileGovernor`]: process-wide open-file quota with idle eviction
//! - [`Archiver`]: the engine tying it together, with coverage guarding
//!   and retrying writes
//!
//! # Example
//!
//! ```rust,ignore
//! use strata::{layout, Archiver, DataStream, StreamConfig};
//!
//! let template = layout::with_base("/archive", layout::SDS_LAYOUT);
//! let mut stream = DataStream::new(template, StreamConfig::default());
//! let mut archiver = Archiver::new(codec);
//!
//! while let Some(record) = feed.next_record()? {
//!     if record.is_end_of_detection() {
//!         continue;
//!     }
//!     archiver.process(&mut stream, &record, 0)?;
//! }
//!
//! archiver.shutdown(&mut stream);
//! ```

#![deny(missing_docs)]

pub mod archiver;
pub mod error;
pub mod governor;
pub mod layout;
pub mod pattern;
pub mod record;
pub mod stream;

pub use archiver::{Archiver, WRITE_RETRY_LIMIT};
pub use error::{ArchiveError, Result};
pub use governor::{FileGovernor, OPEN_FILE_MARGIN};
pub use pattern::{StreamPath, MAX_PATH_LEN};
pub use record::{Record, RecordCodec, RecordKind, RecordTime};
pub use stream::{
    Activity, Coverage, CoveragePolicy, DataStream, StreamConfig, StreamGroup,
    DEFAULT_IDLE_TIMEOUT_SECS,
};
