//! Canonical archive layout templates.
//!
//! Each constant is a filename template in the [`pattern`](crate::pattern)
//! grammar, covering the directory structures commonly requested for
//! telemetry archives. Join one to a base directory with [`with_base`].

/// SDS structure: `YEAR/NET/STA/CHAN.TYPE/NET.STA.LOC.CHAN.TYPE.YEAR.DAY`.
pub const SDS_LAYOUT: &str = "%Y/%n/%s/%c.%t/%n.%s.%l.%c.%t.%Y.%j";

/// BUD structure: `NET/STA/STA.NET.LOC.CHAN.YEAR.DAY`.
pub const BUD_LAYOUT: &str = "%n/%s/%s.%n.%l.%c.%Y.%j";

/// CSS-like structure; the time of the first record names the day file.
pub const CSS_LAYOUT: &str = "%Y/%j/%s.%c.%Y:%j:#H:#M:#S";

/// One flat file per channel.
pub const CHAN_LAYOUT: &str = "%n.%s.%l.%c";

/// One flat file per channel and quality indicator.
pub const QCHAN_LAYOUT: &str = "%n.%s.%l.%c.%q";

/// One flat file per channel per day, named by the first record's time.
pub const CDAY_LAYOUT: &str = "%n.%s.%l.%c.%Y:%j:#H:#M:#S";

/// Joins a base directory and a layout template into a full template.
pub fn with_base(base: &str, layout: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), layout)
}
