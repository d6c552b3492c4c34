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

//! Time alignment and render-state synchronization for imagery overlays.
//!
//! A time-varying image service only has data at a sparse, irregular set of
//! instants. This library keeps one map overlay of such a service aligned
//! with a host-controlled time cursor:
//!
//! - **Catalog layer**: the available time steps for a source, with a
//!   generation-guarded refresh lifecycle ([`catalog`])
//! - **Resolver**: nearest available step and gap for a requested time
//!   ([`resolver`])
//! - **Coverage gate**: hides the overlay when the nearest step is more than
//!   an hour away ([`coverage`])
//! - **Render state**: value range and colormap, encoded as a rendering rule
//!   ([`render`])
//! - **Synchronizer**: drives the map surface and image service with the
//!   minimal set of commands ([`overlay`])
//!
//! The map surface and the image service are external; hosts plug them in
//! through the [`MapSurface`] and [`ImageServiceConnector`] traits.
//!
//! # Quick Start
//!
//! ```no_run
//! use overlay_sync::{
//!     DefaultTables, HttpCatalogConfig, HttpCatalogSource, ImageService, ImageServiceConnector,
//!     MapSurface, OverlayConfig, OverlaySynchronizer, RasterLayer, RenderingDirective,
//!     ServiceRequest, TimeStep, TimeWindow, VariableIdentity,
//! };
//!
//! # struct Map;
//! # impl MapSurface for Map {
//! #     fn add_layer(&mut self, _: &RasterLayer) {}
//! #     fn remove_layer(&mut self, _: &str) {}
//! #     fn has_layer(&self, _: &str) -> bool { false }
//! #     fn set_opacity(&mut self, _: &str, _: f32) {}
//! # }
//! # struct Service;
//! # impl ImageService for Service {
//! #     fn set_time_window(&mut self, _: TimeWindow) {}
//! #     fn set_query_target(&mut self, _: &str) {}
//! #     fn set_rendering_directive(&mut self, _: &RenderingDirective) {}
//! # }
//! # struct Connector;
//! # impl ImageServiceConnector<Map> for Connector {
//! #     type Service = Service;
//! #     fn connect(&mut self, _: &mut Map, _: &ServiceRequest) -> Service { Service }
//! # }
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut overlay = OverlaySynchronizer::new(
//!     OverlayConfig::default(),
//!     VariableIdentity::new("https://example.com/arcgis/rest/services/NO2/ImageServer", "NO2"),
//!     TimeStep::now(),
//!     DefaultTables::builtin(),
//!     Connector,
//!     HttpCatalogSource::new(&HttpCatalogConfig::default())?,
//! );
//!
//! overlay.attach(Map);
//! overlay.fetch_time_steps().await?;
//!
//! let observables = overlay.observe();
//! println!("out of coverage: {}", *observables.out_of_coverage.borrow());
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod coverage;
pub mod error;
pub mod overlay;
pub mod render;
pub mod resolver;
pub mod service;
pub mod surface;
pub mod time;

#[cfg(test)]
pub(crate) mod testing;

pub use catalog::{
    extract_time_steps, CatalogError, CatalogSource, HttpCatalogConfig, HttpCatalogSource,
    RefreshOutcome, RefreshTicket, TimeCatalog, VariableIdentity,
};
pub use coverage::{is_out_of_coverage, CoverageGate, CoverageTransition, COVERAGE_THRESHOLD_MINUTES};
pub use error::OverlayError;
pub use overlay::{
    OverlayConfig, OverlayEvent, OverlayObservables, OverlayPhase, OverlaySynchronizer,
    DEFAULT_OPACITY,
};
pub use render::{Colormap, DefaultTables, RenderOptions, RenderState, RenderingDirective, ValueRange};
pub use resolver::{resolve, MatchResult, EMPTY_CATALOG_OFFSET_MINUTES};
pub use service::{ImageService, ImageServiceConnector, ImageServiceOptions, ServiceRequest};
pub use surface::{MapSurface, RasterLayer, RasterPaint, Resampling};
pub use time::{TimeStep, TimeWindow};
