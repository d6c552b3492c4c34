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

//! Coverage gap policy.
//!
//! A matched step further than [`COVERAGE_THRESHOLD_MINUTES`] from the
//! requested time is not shown. The gate only reports edges; staying on
//! the same side of the threshold produces no transition.

/// Largest gap, in minutes, still considered in coverage.
pub const COVERAGE_THRESHOLD_MINUTES: f64 = 60.0;

/// Whether a gap is too large to display imagery for.
#[must_use]
pub fn is_out_of_coverage(gap_minutes: f64) -> bool {
    gap_minutes > COVERAGE_THRESHOLD_MINUTES
}

/// Edge produced when the coverage decision flips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverageTransition {
    /// The nearest step moved out of range.
    Lost,
    /// The nearest step is back in range.
    Restored,
}

/// Edge-triggered coverage state. Starts in coverage.
#[derive(Debug, Default, Clone)]
pub struct CoverageGate {
    out_of_coverage: bool,
}

impl CoverageGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_out_of_coverage(&self) -> bool {
        self.out_of_coverage
    }

    /// Feed a new gap and report the transition, if any.
    pub fn evaluate(&mut self, gap_minutes: f64) -> Option<CoverageTransition> {
        let out = is_out_of_coverage(gap_minutes);
        if out == self.out_of_coverage {
            return None;
        }
        self.out_of_coverage = out;
        Some(if out {
            CoverageTransition::Lost
        } else {
            CoverageTransition::Restored
        })
    }
}
