//! Chunk expansion and consolidation.
//!
//! A [`Chunk`] is a single 30-minute-aligned UTC instant, the smallest
//! bookable unit. Human ranges (`day`, `start`, `end`) are expanded into the
//! chunks they cover, and sets of chunks are merged back into ranges for
//! display. For contiguous input, [`consolidate`] is the exact inverse of
//! [`expand`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use utoipa::ToSchema;

/// Length of one chunk in minutes.
pub const CHUNK_MINUTES: u16 = 30;

const MINUTES_PER_DAY: u16 = 24 * 60;
const WIRE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
const DAY_FORMAT: &str = "%Y-%m-%d";

/// Errors produced while parsing or expanding slot ranges.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SlotError {
    /// The day is not a valid `YYYY-MM-DD` date.
    #[error("Invalid date '{0}'. Expected YYYY-MM-DD.")]
    InvalidDate(String),

    /// The time is not a valid `HH:MM` 24-hour time.
    #[error("Invalid time '{0}'. Expected HH:MM (00:00-24:00).")]
    InvalidTime(String),

    /// The time is valid but does not fall on a chunk boundary.
    #[error("Time '{0}' is not aligned to a 30-minute boundary")]
    Misaligned(String),

    /// The end of the range is not after its start.
    #[error("End time must be after start time for {day} ({start}-{end})")]
    InvalidRange {
        /// Day of the rejected range.
        day: String,
        /// Start of the rejected range.
        start: String,
        /// End of the rejected range.
        end: String,
    },

    /// A chunk timestamp could not be parsed or is not aligned.
    #[error("Invalid chunk timestamp '{0}'. Expected an aligned instant like 2025-12-28T08:00:00Z.")]
    InvalidChunk(String),
}

/// Result type for slot operations.
pub type SlotResult<T> = std::result::Result<T, SlotError>;

// =============================================================================
// CHUNK
// =============================================================================

/// A 30-minute-aligned UTC instant.
///
/// Serialized as `YYYY-MM-DDTHH:MM:SSZ`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Chunk(DateTime<Utc>);

impl Chunk {
    /// Wrap an instant, rejecting anything off a chunk boundary.
    ///
    /// # Errors
    ///
    /// Returns [`SlotError::InvalidChunk`] if the minute is not 0 or 30, or
    /// if seconds are present.
    pub fn new(at: DateTime<Utc>) -> SlotResult<Self> {
        let aligned = at.minute() % u32::from(CHUNK_MINUTES) == 0
            && at.second() == 0
            && at.nanosecond() == 0;
        if aligned {
            Ok(Self(at))
        } else {
            Err(SlotError::InvalidChunk(at.to_rfc3339()))
        }
    }

    /// The instant this chunk starts at.
    #[must_use]
    pub const fn at(&self) -> DateTime<Utc> {
        self.0
    }

    /// The calendar day this chunk falls on.
    #[must_use]
    pub fn day(&self) -> NaiveDate {
        self.0.date_naive()
    }

    /// The chunk immediately after this one.
    #[must_use]
    pub fn next(&self) -> Self {
        Self(self.0 + Duration::minutes(i64::from(CHUNK_MINUTES)))
    }
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(WIRE_FORMAT))
    }
}

impl FromStr for Chunk {
    type Err = SlotError;

    fn from_str(s: &str) -> SlotResult<Self> {
        let parsed = DateTime::parse_from_rfc3339(s.trim())
            .map_err(|_| SlotError::InvalidChunk(s.to_string()))?;
        Self::new(parsed.with_timezone(&Utc)).map_err(|_| SlotError::InvalidChunk(s.to_string()))
    }
}

impl Serialize for Chunk {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Chunk {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// TIME OF DAY
// =============================================================================

/// Minutes since midnight, `00:00` through `24:00` inclusive.
///
/// `24:00` only makes sense as the end of a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    /// Midnight at the start of the day.
    pub const START_OF_DAY: Self = Self(0);
    /// Midnight at the end of the day.
    pub const END_OF_DAY: Self = Self(MINUTES_PER_DAY);

    /// Build from hours and minutes.
    #[must_use]
    pub fn from_hm(hours: u16, minutes: u16) -> Option<Self> {
        let total = hours.checked_mul(60)?.checked_add(minutes)?;
        (minutes < 60 && total <= MINUTES_PER_DAY).then_some(Self(total))
    }

    /// Minutes since midnight.
    #[must_use]
    pub const fn minutes(self) -> u16 {
        self.0
    }

    /// Whether this time falls on a chunk boundary.
    #[must_use]
    pub const fn is_aligned(self) -> bool {
        self.0 % CHUNK_MINUTES == 0
    }

    // hour() < 24 and minute() < 60, so this always fits
    #[allow(clippy::cast_possible_truncation)]
    fn of(time: NaiveTime) -> Self {
        Self((time.hour() * 60 + time.minute()) as u16)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

impl FromStr for TimeOfDay {
    type Err = SlotError;

    fn from_str(s: &str) -> SlotResult<Self> {
        let invalid = || SlotError::InvalidTime(s.to_string());
        let (hh, mm) = s.trim().split_once(':').ok_or_else(invalid)?;
        if hh.len() != 2 || mm.len() != 2 {
            return Err(invalid());
        }
        let hours: u16 = hh.parse().map_err(|_| invalid())?;
        let minutes: u16 = mm.parse().map_err(|_| invalid())?;
        Self::from_hm(hours, minutes).ok_or_else(invalid)
    }
}

// =============================================================================
// RANGES
// =============================================================================

/// A requested time range on a single day, end exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRange {
    /// Calendar day (UTC).
    pub day: NaiveDate,
    /// Inclusive start.
    pub start: TimeOfDay,
    /// Exclusive end.
    pub end: TimeOfDay,
}

impl SlotRange {
    /// Parse the `YYYY-MM-DD` / `HH:MM` wire representation.
    ///
    /// # Errors
    ///
    /// Returns [`SlotError::InvalidDate`] or [`SlotError::InvalidTime`] for
    /// malformed fields. Ordering and alignment are checked by [`expand`].
    pub fn parse(day: &str, start: &str, end: &str) -> SlotResult<Self> {
        let day = NaiveDate::parse_from_str(day.trim(), DAY_FORMAT)
            .map_err(|_| SlotError::InvalidDate(day.to_string()))?;
        Ok(Self {
            day,
            start: start.parse()?,
            end: end.parse()?,
        })
    }

    /// Expand this range into chunks.
    ///
    /// # Errors
    ///
    /// See [`expand`].
    pub fn chunks(&self) -> SlotResult<Vec<Chunk>> {
        expand(self.day, self.start, self.end)
    }
}

/// A maximal run of contiguous chunks on one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsolidatedRange {
    /// Calendar day (UTC).
    pub day: NaiveDate,
    /// Start of the first chunk.
    pub start: TimeOfDay,
    /// End of the last chunk.
    pub end: TimeOfDay,
}

/// A start/end pair rendered for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({"start": "08:00", "end": "09:30"}))]
pub struct TimeSpan {
    /// Start time (HH:MM, UTC).
    #[schema(example = "08:00")]
    pub start: String,
    /// End time (HH:MM, UTC).
    #[schema(example = "09:30")]
    pub end: String,
}

/// Consolidated ranges keyed by `YYYY-MM-DD`.
pub type DaySchedule = BTreeMap<String, Vec<TimeSpan>>;

/// Expand `[start, end)` on `day` into aligned chunks.
///
/// # Errors
///
/// - [`SlotError::InvalidRange`] if `end <= start`
/// - [`SlotError::Misaligned`] if either bound is off a 30-minute boundary
pub fn expand(day: NaiveDate, start: TimeOfDay, end: TimeOfDay) -> SlotResult<Vec<Chunk>> {
    if end <= start {
        return Err(SlotError::InvalidRange {
            day: day.format(DAY_FORMAT).to_string(),
            start: start.to_string(),
            end: end.to_string(),
        });
    }
    for bound in [start, end] {
        if !bound.is_aligned() {
            return Err(SlotError::Misaligned(bound.to_string()));
        }
    }

    let midnight = day.and_time(NaiveTime::MIN).and_utc();
    Ok((start.minutes()..end.minutes())
        .step_by(usize::from(CHUNK_MINUTES))
        .map(|minute| Chunk(midnight + Duration::minutes(i64::from(minute))))
        .collect())
}

/// Expand and deduplicate several ranges.
///
/// # Errors
///
/// Fails on the first range that [`expand`] rejects.
pub fn expand_ranges(ranges: &[SlotRange]) -> SlotResult<BTreeSet<Chunk>> {
    let mut chunks = BTreeSet::new();
    for range in ranges {
        chunks.extend(range.chunks()?);
    }
    Ok(chunks)
}

/// Merge chunks into maximal contiguous runs, ordered by time.
///
/// Duplicates are ignored. A run is split at midnight, so each range lies
/// within one calendar day; a run reaching midnight ends at `24:00`.
pub fn consolidate<I>(chunks: I) -> Vec<ConsolidatedRange>
where
    I: IntoIterator<Item = Chunk>,
{
    let sorted: BTreeSet<Chunk> = chunks.into_iter().collect();
    let mut ranges = Vec::new();
    let mut iter = sorted.into_iter();

    let Some(first) = iter.next() else {
        return ranges;
    };
    let mut run_start = first;
    let mut last = first;

    for chunk in iter {
        if chunk == last.next() && chunk.day() == run_start.day() {
            last = chunk;
        } else {
            ranges.push(close_run(run_start, last));
            run_start = chunk;
            last = chunk;
        }
    }
    ranges.push(close_run(run_start, last));
    ranges
}

fn close_run(first: Chunk, last: Chunk) -> ConsolidatedRange {
    let end = last.next();
    ConsolidatedRange {
        day: first.day(),
        start: TimeOfDay::of(first.at().time()),
        end: if end.day() == first.day() {
            TimeOfDay::of(end.at().time())
        } else {
            TimeOfDay::END_OF_DAY
        },
    }
}

/// Group consolidated ranges by day for display.
#[must_use]
pub fn group_by_day(ranges: &[ConsolidatedRange]) -> DaySchedule {
    let mut schedule = DaySchedule::new();
    for range in ranges {
        schedule
            .entry(range.day.format(DAY_FORMAT).to_string())
            .or_default()
            .push(TimeSpan {
                start: range.start.to_string(),
                end: range.end.to_string(),
            });
    }
    schedule
}
