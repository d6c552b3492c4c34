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

//! Catalog of available time steps for one imagery source.
//!
//! The catalog holds the sorted, de-duplicated set of instants the upstream
//! image service has data for. Refreshes are split into a ticket-issuing
//! `begin` and a `complete` step so that overlapping fetches resolve
//! deterministically: only the most recently issued refresh may land.

pub mod http;

use std::fmt;
use std::future::Future;

use serde::Deserialize;
use thiserror::Error;

use crate::time::TimeStep;

pub use http::{HttpCatalogConfig, HttpCatalogSource};

/// Name of the ESRI multidimensional time dimension.
const TIME_DIMENSION: &str = "StdTime";

/// Errors that can occur while fetching or parsing a time catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("catalog endpoint returned HTTP {0}")]
    Status(u16),

    #[error("image service error {code}: {message}")]
    Service { code: i64, message: String },

    #[error("malformed catalog response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("variable '{0}' not present in catalog response")]
    MissingVariable(String),

    #[error("variable '{variable}' has no {dimension} dimension")]
    MissingDimension {
        variable: String,
        dimension: &'static str,
    },

    #[error("catalog response contained no time steps")]
    Empty,
}

/// The (source url, variable) pair a catalog and its styling are scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VariableIdentity {
    pub url: String,
    pub variable: String,
}

impl VariableIdentity {
    #[must_use]
    pub fn new(url: impl Into<String>, variable: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            variable: variable.into(),
        }
    }
}

impl fmt::Display for VariableIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", self.variable, self.url)
    }
}

/// Anything that can list the time steps available for a source.
///
/// The returned steps may be unordered and contain duplicates; the catalog
/// normalizes them on completion.
pub trait CatalogSource {
    fn fetch_time_steps(
        &self,
        identity: &VariableIdentity,
    ) -> impl Future<Output = Result<Vec<TimeStep>, CatalogError>>;
}

/// Proof that a refresh was started. Consumed by [`TimeCatalog::complete_refresh`].
#[derive(Debug)]
#[must_use = "a refresh ticket must be completed or the catalog stays loading"]
pub struct RefreshTicket {
    generation: u64,
    identity: VariableIdentity,
}

impl RefreshTicket {
    /// The source this refresh was issued for.
    #[must_use]
    pub fn identity(&self) -> &VariableIdentity {
        &self.identity
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Result of landing a refresh.
#[derive(Debug)]
pub enum RefreshOutcome {
    /// New steps replaced the catalog contents.
    Applied { count: usize },
    /// The fetch failed; the catalog kept its previous contents.
    Failed(CatalogError),
    /// A newer refresh was issued after this one; the result was dropped.
    Stale,
}

/// Sorted, de-duplicated time steps for one source.
#[derive(Debug, Default)]
pub struct TimeCatalog {
    steps: Vec<TimeStep>,
    scope: Option<VariableIdentity>,
    issued: u64,
    in_flight: Option<u64>,
}

impl TimeCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current steps in ascending order.
    #[must_use]
    pub fn steps(&self) -> &[TimeStep] {
        &self.steps
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Source the current steps were loaded for, `None` before the first load.
    #[must_use]
    pub fn scope(&self) -> Option<&VariableIdentity> {
        self.scope.as_ref()
    }

    /// Whether a refresh is outstanding.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Start a refresh for `identity`, superseding any refresh in flight.
    pub fn begin_refresh(&mut self, identity: VariableIdentity) -> RefreshTicket {
        self.issued += 1;
        self.in_flight = Some(self.issued);
        RefreshTicket {
            generation: self.issued,
            identity,
        }
    }

    /// Land a refresh.
    ///
    /// Only the latest issued ticket is honored. Loading clears when it lands,
    /// whether it succeeded or failed. An empty step list counts as a failure
    /// so a loaded catalog is never empty.
    pub fn complete_refresh(
        &mut self,
        ticket: RefreshTicket,
        result: Result<Vec<TimeStep>, CatalogError>,
    ) -> RefreshOutcome {
        if self.in_flight != Some(ticket.generation) {
            return RefreshOutcome::Stale;
        }
        self.in_flight = None;

        match result {
            Ok(steps) if steps.is_empty() => RefreshOutcome::Failed(CatalogError::Empty),
            Ok(mut steps) => {
                steps.sort_unstable();
                steps.dedup();
                self.steps = steps;
                self.scope = Some(ticket.identity);
                RefreshOutcome::Applied {
                    count: self.steps.len(),
                }
            }
            Err(e) => RefreshOutcome::Failed(e),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MultidimensionalResponse {
    multidimensional_info: Option<MultidimensionalInfo>,
    error: Option<ServiceErrorBody>,
}

#[derive(Deserialize)]
struct ServiceErrorBody {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct MultidimensionalInfo {
    #[serde(default)]
    variables: Vec<VariableInfo>,
}

#[derive(Deserialize)]
struct VariableInfo {
    name: String,
    #[serde(default)]
    dimensions: Vec<DimensionInfo>,
}

#[derive(Deserialize)]
struct DimensionInfo {
    name: String,
    #[serde(default)]
    values: Vec<DimensionValue>,
}

/// ESRI reports dimension values either as instants or as `[start, end]` intervals.
#[derive(Deserialize)]
#[serde(untagged)]
enum DimensionValue {
    Instant(i64),
    Interval([i64; 2]),
}

impl DimensionValue {
    fn start(&self) -> i64 {
        match self {
            Self::Instant(t) | Self::Interval([t, _]) => *t,
        }
    }
}

/// Extract the `StdTime` steps for `variable` from a `multiDimensionalInfo` body.
///
/// Steps come back in response order; sorting happens when the catalog lands.
pub fn extract_time_steps(body: &str, variable: &str) -> Result<Vec<TimeStep>, CatalogError> {
    let response: MultidimensionalResponse = serde_json::from_str(body)?;

    if let Some(err) = response.error {
        return Err(CatalogError::Service {
            code: err.code,
            message: err.message,
        });
    }

    let info = response
        .multidimensional_info
        .ok_or_else(|| CatalogError::MissingVariable(variable.to_string()))?;

    let var = info
        .variables
        .iter()
        .find(|v| v.name == variable)
        .ok_or_else(|| CatalogError::MissingVariable(variable.to_string()))?;

    let dimension = var
        .dimensions
        .iter()
        .find(|d| d.name == TIME_DIMENSION)
        .ok_or_else(|| CatalogError::MissingDimension {
            variable: variable.to_string(),
            dimension: TIME_DIMENSION,
        })?;

    Ok(dimension
        .values
        .iter()
        .map(|v| TimeStep::from_millis(v.start()))
        .collect())
}
