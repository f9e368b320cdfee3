//! Hierarchical addressing: `group_path / leaf_key`.
//!
//! A leaf key is the local wall-clock time at millisecond precision:
//!
//! ```text
//! YYYY.MM.DD.HHMM.SS.mmm      e.g. 2024.01.01.0000.00.000
//! ```
//!
//! Every field is zero-padded, so lexicographic order equals chronological
//! order. One [`KeyBuilder`] never issues the same key twice; builders in
//! different processes can, and the collision check in `save` decides what
//! happens then.

use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, SubsecRound, TimeZone};
use std::fmt;

use crate::StoreError;

/// `chrono` format string of a leaf key.
pub const LEAF_KEY_FORMAT: &str = "%Y.%m.%d.%H%M.%S.%3f";

/// Field widths of a leaf key, split on `.`.
const FIELD_WIDTHS: [usize; 6] = [4, 2, 2, 4, 2, 3];

/// Formats `time` as a leaf key.
pub fn key_at<Tz: TimeZone>(time: &DateTime<Tz>) -> String
where
    Tz::Offset: fmt::Display,
{
    time.format(LEAF_KEY_FORMAT).to_string()
}

/// `true` if `key` has the leaf key layout and names a real calendar instant.
pub fn is_valid_leaf_key(key: &str) -> bool {
    let fields: Vec<&str> = key.split('.').collect();
    if fields.len() != FIELD_WIDTHS.len() {
        return false;
    }
    let well_formed = fields
        .iter()
        .zip(FIELD_WIDTHS)
        .all(|(f, w)| f.len() == w && f.bytes().all(|b| b.is_ascii_digit()));
    if !well_formed {
        return false;
    }

    let num = |s: &str| s.parse::<u32>().unwrap_or(u32::MAX);
    let (hhmm, ms) = (fields[3], num(fields[5]));
    let date = NaiveDate::from_ymd_opt(num(fields[0]) as i32, num(fields[1]), num(fields[2]));
    let time = NaiveTime::from_hms_milli_opt(num(&hhmm[..2]), num(&hhmm[2..]), num(fields[4]), ms);
    date.is_some() && time.is_some()
}

type Clock = Box<dyn FnMut() -> NaiveDateTime + Send>;

/// Issues leaf keys from a clock.
///
/// Keys from one builder are strictly increasing: if the clock repeats a
/// millisecond or steps back (e.g. a DST fall-back), the previous key plus
/// one millisecond is issued instead.
pub struct KeyBuilder {
    clock: Clock,
    last: Option<NaiveDateTime>,
}

impl fmt::Debug for KeyBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyBuilder").field("last", &self.last).finish()
    }
}

impl Default for KeyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyBuilder {
    /// A builder on the local wall clock.
    pub fn new() -> Self {
        Self::with_clock(|| Local::now().naive_local())
    }

    /// A builder on an arbitrary clock, e.g. a scripted one in tests.
    pub fn with_clock<F>(clock: F) -> Self
    where
        F: FnMut() -> NaiveDateTime + Send + 'static,
    {
        Self {
            clock: Box::new(clock),
            last: None,
        }
    }

    /// The next leaf key.
    pub fn next_key(&mut self) -> String {
        let now = (self.clock)().trunc_subsecs(3);
        let issued = match self.last {
            Some(last) if now <= last => last + Duration::milliseconds(1),
            _ => now,
        };
        self.last = Some(issued);
        issued.format(LEAF_KEY_FORMAT).to_string()
    }

    /// The next address under `group_path`.
    pub fn address(&mut self, group_path: &str) -> Address {
        Address {
            group: normalize(group_path),
            leaf: self.next_key(),
        }
    }
}

/// Where a dataset lives: a group path and a leaf name inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    group: String,
    leaf: String,
}

impl Address {
    pub fn new(group: &str, leaf: &str) -> Result<Self, StoreError> {
        validate_leaf(leaf)?;
        hierarchy::segments(group).map_err(|e| StoreError::InvalidConfiguration(e.to_string()))?;
        Ok(Self {
            group: normalize(group),
            leaf: leaf.to_string(),
        })
    }

    /// Splits a full dataset path on its last separator.
    pub fn parse(path: &str) -> Result<Self, StoreError> {
        let (group, leaf) = hierarchy::split_leaf(path);
        Self::new(group, leaf)
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn leaf(&self) -> &str {
        &self.leaf
    }

    /// `group/leaf`, without a leading separator.
    pub fn path(&self) -> String {
        hierarchy::join(&self.group, &self.leaf)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// A leaf must be one non-empty path segment.
pub(crate) fn validate_leaf(leaf: &str) -> Result<(), StoreError> {
    match hierarchy::segments(leaf) {
        Ok(parts) if parts.len() == 1 && parts[0] == leaf => Ok(()),
        _ => Err(StoreError::InvalidConfiguration(format!(
            "invalid leaf key {leaf:?}"
        ))),
    }
}

/// `group` without leading or trailing separators.
pub(crate) fn normalize(group: &str) -> String {
    group.trim_matches(hierarchy::SEPARATOR).to_string()
}
