// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Instants on the imagery time axis.
//!
//! Everything upstream speaks epoch milliseconds, so [`TimeStep`] is a thin
//! newtype over `i64` with chrono conversions for display and parsing.

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Milliseconds in one minute.
pub const MILLIS_PER_MINUTE: i64 = 60_000;

/// An instant in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimeStep(i64);

impl TimeStep {
    /// Create a time step from epoch milliseconds.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Epoch milliseconds.
    #[must_use]
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// The current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self::from(Utc::now())
    }

    /// Shift by a (possibly negative) number of minutes.
    #[must_use]
    pub const fn offset_minutes(self, minutes: i64) -> Self {
        Self(self.0.saturating_add(minutes.saturating_mul(MILLIS_PER_MINUTE)))
    }

    /// Absolute distance to `other` in fractional minutes.
    #[must_use]
    #[allow(clippy::cast_precision_loss, reason = "epoch millis fit comfortably in f64's mantissa")]
    pub fn minutes_between(self, other: Self) -> f64 {
        self.0.abs_diff(other.0) as f64 / MILLIS_PER_MINUTE as f64
    }

    /// Convert to a UTC datetime, if the value is representable.
    #[must_use]
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.0).single()
    }
}

impl From<DateTime<Utc>> for TimeStep {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value.timestamp_millis())
    }
}

impl fmt::Display for TimeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.to_rfc3339()),
            None => write!(f, "{}ms", self.0),
        }
    }
}

/// Active time window handed to the rendering service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: TimeStep,
    pub end: TimeStep,
}

impl TimeWindow {
    /// Window for a matched step: `[matched, matched * 2]`.
    ///
    /// The end bound doubles the epoch value rather than adding a duration.
    /// This mirrors the contract the image service has always been driven
    /// with and is kept until the service owners confirm the intended width.
    #[must_use]
    pub const fn for_matched_step(matched: TimeStep) -> Self {
        Self {
            start: matched,
            end: TimeStep(matched.0.saturating_mul(2)),
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}
