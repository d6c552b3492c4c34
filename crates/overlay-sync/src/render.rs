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

//! Value range and colormap styling for the overlay.
//!
//! [`RenderState`] owns the current [`RenderOptions`] and turns every change
//! into a complete [`RenderingDirective`]: an ESRI raster-function chain that
//! stretches the requested value range to 8 bits and applies a named color
//! ramp. Directives are always rebuilt from the full current state.

use std::collections::HashMap;
use std::fmt;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// ESRI stretch type for an explicit min/max stretch.
const STRETCH_TYPE_MIN_MAX: u8 = 5;

/// Inclusive value range mapped onto the color ramp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl ValueRange {
    #[must_use]
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }
}

/// Named color ramp understood by the rendering service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Colormap(String);

impl Colormap {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Colormap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Range and colormap for one overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderOptions {
    pub range: ValueRange,
    pub colormap: Colormap,
}

impl RenderOptions {
    #[must_use]
    pub fn new(range: ValueRange, colormap: Colormap) -> Self {
        Self { range, colormap }
    }
}

/// Read-only per-variable styling defaults.
#[derive(Debug, Clone)]
pub struct DefaultTables {
    styles: HashMap<String, RenderOptions>,
    fallback: RenderOptions,
}

impl DefaultTables {
    /// Tables with no per-variable entries.
    #[must_use]
    pub fn new(fallback: RenderOptions) -> Self {
        Self {
            styles: HashMap::new(),
            fallback,
        }
    }

    /// Defaults for the TEMPO air-quality products.
    #[must_use]
    pub fn builtin() -> Self {
        Self::new(RenderOptions::new(ValueRange::new(0.0, 1.0), Colormap::new("Gray")))
            .with_style("NO2", RenderOptions::new(ValueRange::new(0.0, 1.0e16), Colormap::new("Magma")))
            .with_style("HCHO", RenderOptions::new(ValueRange::new(0.0, 3.0e16), Colormap::new("Viridis")))
            .with_style("O3TOT", RenderOptions::new(ValueRange::new(200.0, 400.0), Colormap::new("Plasma")))
            .with_style("CLDO4", RenderOptions::new(ValueRange::new(0.0, 1.0), Colormap::new("Blues")))
    }

    /// Add or replace the defaults for `variable`.
    #[must_use]
    pub fn with_style(mut self, variable: impl Into<String>, options: RenderOptions) -> Self {
        self.styles.insert(variable.into(), options);
        self
    }

    /// Whether `variable` has its own entry.
    #[must_use]
    pub fn contains(&self, variable: &str) -> bool {
        self.styles.contains_key(variable)
    }

    /// Defaults for `variable`, or the fallback entry.
    #[must_use]
    pub fn lookup(&self, variable: &str) -> &RenderOptions {
        self.styles.get(variable).unwrap_or(&self.fallback)
    }
}

/// Encoded range + colormap sent to the rendering service.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderingDirective(Value);

impl RenderingDirective {
    /// Build the raster-function chain for `options`.
    #[must_use]
    pub fn from_options(options: &RenderOptions) -> Self {
        let stretch = json!({
            "rasterFunction": "Stretch",
            "rasterFunctionArguments": {
                "StretchType": STRETCH_TYPE_MIN_MAX,
                "Min": 0,
                "Max": 255,
                "Statistics": [[options.range.min, options.range.max, 0, 0]],
                "DRA": false,
            },
            "outputPixelType": "U8",
        });

        Self(json!({
            "rasterFunction": "Colormap",
            "rasterFunctionArguments": {
                "ColorrampName": options.colormap.as_str(),
                "Raster": stretch,
            },
        }))
    }

    #[must_use]
    pub fn as_json(&self) -> &Value {
        &self.0
    }
}

impl fmt::Display for RenderingDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Current styling plus the directive derived from it.
#[derive(Debug, Clone)]
pub struct RenderState {
    tables: DefaultTables,
    options: RenderOptions,
    directive: RenderingDirective,
}

impl RenderState {
    /// Start from the defaults for `variable`.
    #[must_use]
    pub fn new(tables: DefaultTables, variable: &str) -> Self {
        let options = Self::defaults_for(&tables, variable);
        let directive = RenderingDirective::from_options(&options);
        Self {
            tables,
            options,
            directive,
        }
    }

    fn defaults_for(tables: &DefaultTables, variable: &str) -> RenderOptions {
        if !tables.contains(variable) {
            warn!("No default styling for variable '{variable}', using fallback");
        }
        tables.lookup(variable).clone()
    }

    #[must_use]
    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    #[must_use]
    pub fn directive(&self) -> &RenderingDirective {
        &self.directive
    }

    #[must_use]
    pub fn tables(&self) -> &DefaultTables {
        &self.tables
    }

    /// Set the value range. Returns the new directive if anything changed.
    pub fn set_range(&mut self, min: f64, max: f64) -> Option<&RenderingDirective> {
        let range = ValueRange::new(min, max);
        if self.options.range == range {
            return None;
        }
        debug!("Range changed to [{min}, {max}]");
        self.options.range = range;
        Some(self.rebuild())
    }

    /// Set the colormap. Returns the new directive if anything changed.
    pub fn set_colormap(&mut self, colormap: Colormap) -> Option<&RenderingDirective> {
        if self.options.colormap == colormap {
            return None;
        }
        debug!("Colormap changed to {colormap}");
        self.options.colormap = colormap;
        Some(self.rebuild())
    }

    /// Replace range and colormap together; at most one directive results.
    pub fn set_options(&mut self, options: RenderOptions) -> Option<&RenderingDirective> {
        if self.options == options {
            return None;
        }
        self.options = options;
        Some(self.rebuild())
    }

    /// Replace both fields with the defaults for `variable`, dropping user edits.
    pub fn on_variable_changed(&mut self, variable: &str) -> Option<&RenderingDirective> {
        let defaults = Self::defaults_for(&self.tables, variable);
        if self.options == defaults {
            return None;
        }
        self.options = defaults;
        Some(self.rebuild())
    }

    fn rebuild(&mut self) -> &RenderingDirective {
        self.directive = RenderingDirective::from_options(&self.options);
        &self.directive
    }
}
