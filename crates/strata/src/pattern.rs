//! Filename template expansion.
//!
//! A template mixes literal path segments with two-character substitution
//! codes. `%x` marks a *defining* field: its rendered value lands in both
//! the output filename and the grouping key. `#x` marks a *non-defining*
//! field: the value lands in the filename only, and the search pattern gets
//! a type-appropriate wildcard in its place. `%%` and `##` escape the marker
//! characters themselves.
//!
//! Splitting fields this way lets many physically distinct files share one
//! logical archive identity, rediscoverable by wildcard search, while the
//! key stays stable for the in-memory registry.
//!
//! Supported codes:
//!
//! | code | value                              | wildcard |
//! |------|------------------------------------|----------|
//! | `n`  | network code                       | `*`      |
//! | `s`  | station code                       | `*`      |
//! | `l`  | location code                      | `*`      |
//! | `c`  | channel code                       | `*`      |
//! | `Y`  | year, 4 digits                     | `[0-9]`×4 |
//! | `y`  | year, 2 digits                     | `[0-9]`×2 |
//! | `j`  | day of year, 3 digits              | `[0-9]`×3 |
//! | `H`  | hour, 2 digits                     | `[0-9]`×2 |
//! | `M`  | minute, 2 digits                   | `[0-9]`×2 |
//! | `S`  | second, 2 digits                   | `[0-9]`×2 |
//! | `F`  | fractional seconds, 4 digits       | `[0-9]`×4 |
//! | `q`  | quality indicator, one character   | `?`      |
//! | `L`  | record length in bytes             | `*`      |
//! | `r`  | sample rate, rounded integer       | `*`      |
//! | `R`  | sample rate, 6-digit float         | `*`      |
//! | `t`  | packet type code, one character    | `?`      |

use crate::error::{ArchiveError, Result};
use crate::record::Record;
use tracing::warn;

/// Maximum length of a formatted filename, grouping key, or search pattern.
pub const MAX_PATH_LEN: usize = 400;

/// The renderings of a template for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamPath {
    /// Full output path for this record.
    pub filename: String,
    /// Grouping key: the template rendering with non-defining values omitted.
    pub key: String,
    /// Filesystem wildcard pattern, present when the template contains at
    /// least one non-defining code.
    pub glob_pattern: Option<String>,
}

/// Expands `template` for `record`, producing the output filename, the
/// grouping key, and (when non-defining codes are present) the wildcard
/// search pattern.
///
/// A `suffix` greater than zero is appended as `.<suffix>` to the filename
/// and the key, for caller-requested collision avoidance.
///
/// An unrecognized code is logged and dropped; the scan continues from the
/// code character. Exceeding [`MAX_PATH_LEN`] in any builder is an error.
pub fn expand(template: &str, record: &Record, suffix: u64) -> Result<StreamPath> {
    if template.is_empty() {
        return Err(ArchiveError::EmptyTemplate);
    }

    // Count the non-defining codes up front; the search pattern is only
    // assembled when at least one exists. Escaped '##' markers counted here
    // are compensated during the main scan.
    let bytes = template.as_bytes();
    let mut nondef = 0i32;
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'#' && bytes.get(i + 1) != Some(&b'#') {
            nondef += 1;
        }
    }
    let build_glob = nondef > 0;

    let mut filename = String::new();
    let mut key = String::new();
    let mut glob = String::new();

    let mut chars = template.chars();
    while let Some(c) = chars.next() {
        if c != '%' && c != '#' {
            filename.push(c);
            key.push(c);
            if build_glob {
                glob.push(c);
            }
            continue;
        }

        let defining = c == '%';
        let code = match chars.next() {
            Some(code) => code,
            None => {
                warn!(template, "template ends with a bare substitution marker");
                break;
            }
        };

        match code {
            '%' => {
                filename.push('%');
                key.push('%');
                if build_glob {
                    glob.push('%');
                }
            }
            '#' => {
                filename.push('#');
                key.push('#');
                nondef -= 1;
                if build_glob && nondef > 0 {
                    glob.push('#');
                }
            }
            _ => match render(code, record) {
                Some((value, wildcard)) => {
                    filename.push_str(&value);
                    if defining {
                        key.push_str(&value);
                    }
                    if build_glob {
                        if defining {
                            glob.push_str(&value);
                        } else {
                            glob.push_str(wildcard);
                        }
                    }
                }
                None => {
                    warn!(code = %code, "unknown filename format code");
                    // Marker dropped; the code character rejoins the literal scan.
                    filename.push(code);
                    key.push(code);
                    if build_glob {
                        glob.push(code);
                    }
                }
            },
        }
    }

    if suffix > 0 {
        let tail = format!(".{suffix}");
        filename.push_str(&tail);
        key.push_str(&tail);
    }

    for len in [filename.len(), key.len(), glob.len()] {
        if len > MAX_PATH_LEN {
            return Err(ArchiveError::PathTooLong {
                len,
                max: MAX_PATH_LEN,
            });
        }
    }

    let glob_pattern = (nondef > 0).then_some(glob);
    Ok(StreamPath {
        filename,
        key,
        glob_pattern,
    })
}

/// Renders one substitution code to its value and non-defining wildcard.
fn render(code: char, record: &Record) -> Option<(String, &'static str)> {
    match code {
        't' => Some((record.kind.type_code().to_string(), "?")),
        'n' => Some((record.network.clone(), "*")),
        's' => Some((record.station.clone(), "*")),
        'l' => Some((record.location.clone(), "*")),
        'c' => Some((record.channel.clone(), "*")),
        'Y' => Some((
            format!("{:04}", record.start.year),
            "[0-9][0-9][0-9][0-9]",
        )),
        'y' => Some((format!("{:02}", record.start.year % 100), "[0-9][0-9]")),
        'j' => Some((format!("{:03}", record.start.day), "[0-9][0-9][0-9]")),
        'H' => Some((format!("{:02}", record.start.hour), "[0-9][0-9]")),
        'M' => Some((format!("{:02}", record.start.minute), "[0-9][0-9]")),
        'S' => Some((format!("{:02}", record.start.second), "[0-9][0-9]")),
        'F' => Some((
            format!("{:04}", record.start.fract),
            "[0-9][0-9][0-9][0-9]",
        )),
        'q' => Some((record.quality.to_string(), "?")),
        'L' => Some((record.len().to_string(), "*")),
        'r' => Some((format!("{}", (record.sample_rate + 0.5) as i64), "*")),
        'R' => Some((format!("{:.6}", record.sample_rate), "*")),
        _ => None,
    }
}
