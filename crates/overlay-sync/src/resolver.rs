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

//! Nearest available time step for a requested instant.

use crate::time::TimeStep;

/// Minutes subtracted from the requested time when no catalog is loaded.
///
/// Lands inside the coverage threshold, so an unloaded catalog reads as a
/// near miss rather than a gap.
pub const EMPTY_CATALOG_OFFSET_MINUTES: i64 = 15;

/// The step chosen for a requested time and how far away it is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    pub matched: TimeStep,
    pub gap_minutes: f64,
}

/// Pick the step in `steps` closest to `requested`.
///
/// Ties go to the earlier step: the scan only replaces its candidate on a
/// strictly smaller distance. An empty slice yields `requested - 15 min`.
#[must_use]
pub fn resolve(steps: &[TimeStep], requested: TimeStep) -> MatchResult {
    let matched = steps
        .iter()
        .copied()
        .reduce(|best, candidate| {
            if candidate.as_millis().abs_diff(requested.as_millis())
                < best.as_millis().abs_diff(requested.as_millis())
            {
                candidate
            } else {
                best
            }
        })
        .unwrap_or_else(|| requested.offset_minutes(-EMPTY_CATALOG_OFFSET_MINUTES));

    MatchResult {
        matched,
        gap_minutes: matched.minutes_between(requested),
    }
}
