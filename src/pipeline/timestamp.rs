//! Logical time for packet streams.
//!
//! A `Timestamp` is a signed 64-bit count of microseconds. The extreme
//! values of the range are reserved for sentinels:
//!
//! ```text
//! Unset < Unstarted < PreStream < Min ... Max < PostStream < Done
//! ```
//!
//! Only range values (`Min..=Max`) plus `PreStream`/`PostStream` may be
//! attached to packets on a stream. `Done` is used as a stream bound and
//! means the stream is closed.

use std::fmt;
use std::ops::{Add, AddAssign, Sub};

/// Microseconds per second.
const TIMESTAMP_UNITS_PER_SECOND: f64 = 1_000_000.0;

/// A point in logical stream time.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

/// Signed distance between two timestamps.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct TimestampDiff(pub i64);

impl Timestamp {
    /// No timestamp was assigned. Side packets carry this value.
    pub const UNSET: Timestamp = Timestamp(i64::MIN);
    /// Timestamp of `Open`, before any stream data.
    pub const UNSTARTED: Timestamp = Timestamp(i64::MIN + 1);
    /// A single packet before all range values.
    pub const PRE_STREAM: Timestamp = Timestamp(i64::MIN + 2);
    /// The earliest range value.
    pub const MIN: Timestamp = Timestamp(i64::MIN + 3);
    /// The latest range value.
    pub const MAX: Timestamp = Timestamp(i64::MAX - 2);
    /// A single packet after all range values.
    pub const POST_STREAM: Timestamp = Timestamp(i64::MAX - 1);
    /// Bound of a closed stream.
    pub const DONE: Timestamp = Timestamp(i64::MAX);

    /// Build a timestamp from a raw microsecond value.
    pub const fn new(value: i64) -> Self {
        Timestamp(value)
    }

    pub fn from_seconds(seconds: f64) -> Self {
        Timestamp((seconds * TIMESTAMP_UNITS_PER_SECOND).round() as i64)
    }

    #[inline]
    pub const fn value(self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn microseconds(self) -> i64 {
        self.0
    }

    pub fn seconds(self) -> f64 {
        self.0 as f64 / TIMESTAMP_UNITS_PER_SECOND
    }

    #[inline]
    pub fn is_special_value(self) -> bool {
        self > Self::MAX || self < Self::MIN
    }

    #[inline]
    pub fn is_range_value(self) -> bool {
        self >= Self::MIN && self <= Self::MAX
    }

    /// True for timestamps a packet on a stream may carry.
    #[inline]
    pub fn is_allowed_in_stream(self) -> bool {
        self.is_range_value() || self == Self::PRE_STREAM || self == Self::POST_STREAM
    }

    /// Smallest timestamp strictly after `self` that a later packet on the
    /// same stream could carry. This is the stream bound after a packet at
    /// `self` has been sent.
    pub fn next_allowed_in_stream(self) -> Timestamp {
        if self >= Self::MAX || self == Self::PRE_STREAM {
            // A PreStream packet must be alone; Max and beyond leave nothing.
            Self::DONE
        } else if self < Self::MIN {
            Self::MIN
        } else {
            Timestamp(self.0 + 1)
        }
    }

    /// Largest timestamp strictly before `self` usable in a stream. The
    /// inverse of [`Timestamp::next_allowed_in_stream`] on range values.
    pub fn previous_allowed_in_stream(self) -> Timestamp {
        if self <= Self::MIN || self == Self::POST_STREAM {
            Self::UNSTARTED
        } else if self > Self::MAX {
            Self::MAX
        } else {
            Timestamp(self.0 - 1)
        }
    }
}

impl TimestampDiff {
    pub const fn new(value: i64) -> Self {
        TimestampDiff(value)
    }

    pub fn value(self) -> i64 {
        self.0
    }
}

impl Add<TimestampDiff> for Timestamp {
    type Output = Timestamp;

    /// Special values absorb any offset; range values saturate inside
    /// `[Min, Max]`.
    fn add(self, offset: TimestampDiff) -> Timestamp {
        if self.is_special_value() {
            return self;
        }
        let raw = self.0.saturating_add(offset.0);
        Timestamp(raw.clamp(Self::MIN.0, Self::MAX.0))
    }
}

impl AddAssign<TimestampDiff> for Timestamp {
    fn add_assign(&mut self, offset: TimestampDiff) {
        *self = *self + offset;
    }
}

impl Sub<TimestampDiff> for Timestamp {
    type Output = Timestamp;

    fn sub(self, offset: TimestampDiff) -> Timestamp {
        self + TimestampDiff(offset.0.saturating_neg())
    }
}

impl Sub<Timestamp> for Timestamp {
    type Output = TimestampDiff;

    fn sub(self, other: Timestamp) -> TimestampDiff {
        TimestampDiff(self.0.saturating_sub(other.0))
    }
}

impl Add<TimestampDiff> for TimestampDiff {
    type Output = TimestampDiff;

    fn add(self, other: TimestampDiff) -> TimestampDiff {
        TimestampDiff(self.0.saturating_add(other.0))
    }
}

impl From<i64> for Timestamp {
    fn from(value: i64) -> Self {
        Timestamp(value)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::UNSET => write!(f, "Timestamp::Unset"),
            Self::UNSTARTED => write!(f, "Timestamp::Unstarted"),
            Self::PRE_STREAM => write!(f, "Timestamp::PreStream"),
            Self::MIN => write!(f, "Timestamp::Min"),
            Self::MAX => write!(f, "Timestamp::Max"),
            Self::POST_STREAM => write!(f, "Timestamp::PostStream"),
            Self::DONE => write!(f, "Timestamp::Done"),
            Timestamp(v) => write!(f, "Timestamp({})", v),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_special_value() {
            fmt::Debug::fmt(self, f)
        } else {
            write!(f, "{}", self.0)
        }
    }
}
