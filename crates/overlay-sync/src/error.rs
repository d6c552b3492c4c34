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

use thiserror::Error;

use crate::catalog::CatalogError;

/// Non-fatal failures reported by the overlay synchronizer.
///
/// None of these abort the caller; they are logged and published on the
/// overlay's event channel while the overlay degrades to showing nothing or
/// stale parameters.
#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("time step fetch failed: {0}")]
    Fetch(#[from] CatalogError),

    #[error("inconsistent overlay state: {0}")]
    InconsistentState(&'static str),
}
