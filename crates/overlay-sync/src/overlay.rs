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

//! Overlay synchronizer.
//!
//! Wires the catalog, resolver, coverage gate and render state to one map
//! layer and its image service connection. Every input change is handled
//! synchronously by a named method, which issues only the commands the
//! change actually requires:
//!
//! | input                  | handler                          |
//! |------------------------|----------------------------------|
//! | time cursor            | [`OverlaySynchronizer::set_requested_time`] |
//! | catalog load           | [`OverlaySynchronizer::complete_refresh`]   |
//! | tracked opacity        | [`OverlaySynchronizer::set_tracked_opacity`] |
//! | range / colormap       | [`OverlaySynchronizer::set_range`], [`OverlaySynchronizer::set_colormap`] |
//! | url / variable         | [`OverlaySynchronizer::change_source`]      |
//!
//! Observable state is published on `tokio::sync::watch` channels and
//! discrete events (including failures) on a broadcast channel.

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::{broadcast, watch};

use crate::catalog::{CatalogError, CatalogSource, RefreshOutcome, RefreshTicket, TimeCatalog, VariableIdentity};
use crate::coverage::{CoverageGate, CoverageTransition, COVERAGE_THRESHOLD_MINUTES};
use crate::error::OverlayError;
use crate::render::{Colormap, DefaultTables, RenderOptions, RenderState, RenderingDirective};
use crate::resolver::{resolve, MatchResult};
use crate::service::{ImageService, ImageServiceConnector, ImageServiceOptions, ServiceRequest};
use crate::surface::{MapSurface, RasterLayer, RasterPaint, Resampling};
use crate::time::{TimeStep, TimeWindow};

/// Opacity used when neither an explicit nor a tracked value is available.
pub const DEFAULT_OPACITY: f32 = 0.8;

/// Configuration for an overlay.
#[derive(Debug, Clone)]
pub struct OverlayConfig {
    /// Layer and source id on the map surface.
    pub layer_id: String,
    /// Tile edge length in pixels.
    pub tile_size: u32,
    /// Initial tracked opacity.
    pub opacity: Option<f32>,
    /// Broadcast channel capacity for events.
    pub event_channel_capacity: usize,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            layer_id: "esri-source".to_string(),
            tile_size: 256,
            opacity: None,
            event_channel_capacity: 64,
        }
    }
}

/// Lifecycle state of the overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayPhase {
    /// No map surface attached yet.
    Uninitialized,
    /// Attached and showing imagery.
    Attached,
    /// Attached, layer withdrawn because no step is close enough.
    OutOfCoverage,
}

/// Events emitted by the synchronizer.
#[derive(Debug, Clone)]
pub enum OverlayEvent {
    /// The overlay layer was added to the map.
    LayerAdded,
    /// The overlay layer was removed from the map.
    LayerRemoved,
    /// The coverage decision flipped.
    CoverageChanged { out_of_coverage: bool, gap_minutes: f64 },
    /// A new active time window was sent to the image service.
    TimeWindowApplied(TimeWindow),
    /// A new rendering directive was sent to the image service.
    DirectiveApplied(RenderingDirective),
    /// The image service now queries a different source.
    SourceChanged(VariableIdentity),
    /// A refresh replaced the catalog.
    CatalogLoaded { count: usize },
    /// A non-fatal failure.
    Failure(Arc<OverlayError>),
}

/// Receivers for the overlay's observable state.
#[derive(Debug, Clone)]
pub struct OverlayObservables {
    /// Opacity tracked on behalf of the host (the user's slider).
    pub opacity: watch::Receiver<Option<f32>>,
    /// Opacity actually painted on the map; 0 while nothing is shown.
    pub applied_opacity: watch::Receiver<f32>,
    pub out_of_coverage: watch::Receiver<bool>,
    pub loading: watch::Receiver<bool>,
    pub time_steps: watch::Receiver<Vec<TimeStep>>,
    pub latest_match: watch::Receiver<Option<MatchResult>>,
}

#[derive(Debug)]
struct Publishers {
    opacity: watch::Sender<Option<f32>>,
    applied_opacity: watch::Sender<f32>,
    out_of_coverage: watch::Sender<bool>,
    loading: watch::Sender<bool>,
    time_steps: watch::Sender<Vec<TimeStep>>,
    latest_match: watch::Sender<Option<MatchResult>>,
}

impl Publishers {
    fn new(opacity: Option<f32>) -> Self {
        Self {
            opacity: watch::channel(opacity).0,
            applied_opacity: watch::channel(0.0).0,
            out_of_coverage: watch::channel(false).0,
            loading: watch::channel(false).0,
            time_steps: watch::channel(Vec::new()).0,
            latest_match: watch::channel(None).0,
        }
    }

    fn subscribe(&self) -> OverlayObservables {
        OverlayObservables {
            opacity: self.opacity.subscribe(),
            applied_opacity: self.applied_opacity.subscribe(),
            out_of_coverage: self.out_of_coverage.subscribe(),
            loading: self.loading.subscribe(),
            time_steps: self.time_steps.subscribe(),
            latest_match: self.latest_match.subscribe(),
        }
    }
}

/// Map surface plus the image service bound to it.
#[derive(Debug)]
struct OverlayConnection<M, S> {
    surface: M,
    service: S,
    last_window: Option<TimeWindow>,
}

/// Keeps one imagery layer aligned with the time cursor and its styling.
pub struct OverlaySynchronizer<M, C, F>
where
    C: ImageServiceConnector<M>,
{
    config: OverlayConfig,
    identity: VariableIdentity,
    requested: TimeStep,
    catalog: TimeCatalog,
    gate: CoverageGate,
    render: RenderState,
    connector: C,
    catalog_source: F,
    connection: Option<OverlayConnection<M, C::Service>>,
    publishers: Publishers,
    event_tx: broadcast::Sender<OverlayEvent>,
}

impl<M, C, F> std::fmt::Debug for OverlaySynchronizer<M, C, F>
where
    M: MapSurface,
    C: ImageServiceConnector<M>,
    F: CatalogSource,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlaySynchronizer")
            .field("layer_id", &self.config.layer_id)
            .field("identity", &self.identity)
            .field("requested", &self.requested)
            .field("catalog_len", &self.catalog.len())
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl<M, C, F> OverlaySynchronizer<M, C, F>
where
    M: MapSurface,
    C: ImageServiceConnector<M>,
    F: CatalogSource,
{
    /// Create an unattached overlay for `identity` at time `requested`.
    #[must_use]
    pub fn new(
        config: OverlayConfig,
        identity: VariableIdentity,
        requested: TimeStep,
        tables: DefaultTables,
        connector: C,
        catalog_source: F,
    ) -> Self {
        let render = RenderState::new(tables, &identity.variable);
        let publishers = Publishers::new(config.opacity);
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity);

        Self {
            config,
            identity,
            requested,
            catalog: TimeCatalog::new(),
            gate: CoverageGate::new(),
            render,
            connector,
            catalog_source,
            connection: None,
            publishers,
            event_tx,
        }
    }

    /// Receivers for the observable state.
    #[must_use]
    pub fn observe(&self) -> OverlayObservables {
        self.publishers.subscribe()
    }

    /// Subscribe to overlay events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<OverlayEvent> {
        self.event_tx.subscribe()
    }

    #[must_use]
    pub fn phase(&self) -> OverlayPhase {
        match (&self.connection, self.gate.is_out_of_coverage()) {
            (None, _) => OverlayPhase::Uninitialized,
            (Some(_), true) => OverlayPhase::OutOfCoverage,
            (Some(_), false) => OverlayPhase::Attached,
        }
    }

    #[must_use]
    pub fn identity(&self) -> &VariableIdentity {
        &self.identity
    }

    #[must_use]
    pub fn requested_time(&self) -> TimeStep {
        self.requested
    }

    #[must_use]
    pub fn catalog(&self) -> &TimeCatalog {
        &self.catalog
    }

    #[must_use]
    pub fn render_options(&self) -> &RenderOptions {
        self.render.options()
    }

    #[must_use]
    pub fn rendering_directive(&self) -> &RenderingDirective {
        self.render.directive()
    }

    #[must_use]
    pub fn is_out_of_coverage(&self) -> bool {
        self.gate.is_out_of_coverage()
    }

    /// Query options the image service is (or would be) created with.
    #[must_use]
    pub fn service_options(&self) -> ImageServiceOptions {
        ImageServiceOptions::new(self.config.tile_size, self.render.directive().clone())
    }

    /// The attached map surface.
    #[must_use]
    pub fn surface(&self) -> Option<&M> {
        self.connection.as_ref().map(|c| &c.surface)
    }

    /// Bind the overlay to a map surface.
    ///
    /// Opens the image service connection for the current source and adds the
    /// layer. Attaching again replaces the previous surface and connection;
    /// the old layer is removed first.
    pub fn attach(&mut self, mut surface: M) {
        if self.connection.is_some() {
            info!("Replacing map surface for overlay '{}'", self.config.layer_id);
            let _ = self.detach();
        }

        let request = ServiceRequest {
            layer_id: self.config.layer_id.clone(),
            url: self.identity.url.clone(),
            options: self.service_options(),
            tile_size: self.config.tile_size,
        };
        let service = self.connector.connect(&mut surface, &request);
        self.connection = Some(OverlayConnection {
            surface,
            service,
            last_window: None,
        });
        info!("Attached overlay '{}' for {}", self.config.layer_id, self.identity);

        if self.gate.is_out_of_coverage() {
            debug!("Attached while out of coverage; layer held back");
        } else {
            self.add_layer();
        }

        self.recompute_time_alignment();
    }

    /// Remove the layer, drop the service connection and hand the surface back.
    pub fn detach(&mut self) -> Option<M> {
        let mut connection = self.connection.take()?;
        let removed = remove_layer_from(&mut connection.surface, &self.config.layer_id);
        let OverlayConnection { surface, service, .. } = connection;
        drop(service);

        self.publishers.applied_opacity.send_replace(0.0);
        if removed {
            self.emit(OverlayEvent::LayerRemoved);
        }
        info!("Detached overlay '{}'", self.config.layer_id);
        Some(surface)
    }

    /// Move the time cursor. Re-resolves only when the time actually changed.
    pub fn set_requested_time(&mut self, requested: TimeStep) {
        if requested == self.requested {
            return;
        }
        self.requested = requested;
        self.recompute_time_alignment();
    }

    /// Re-resolve the requested time against the catalog and apply the result.
    pub fn recompute_time_alignment(&mut self) -> MatchResult {
        let result = resolve(self.catalog.steps(), self.requested);
        self.publishers.latest_match.send_replace(Some(result));

        let transition = self.gate.evaluate(result.gap_minutes);
        let out_of_coverage = self.gate.is_out_of_coverage();
        self.publishers.out_of_coverage.send_replace(out_of_coverage);

        if out_of_coverage {
            warn!(
                "No imagery for {} within {} minutes of {} (nearest {} is {:.1} minutes away)",
                self.identity.variable, COVERAGE_THRESHOLD_MINUTES, self.requested, result.matched, result.gap_minutes
            );
        } else {
            self.apply_time_window(TimeWindow::for_matched_step(result.matched));
        }

        match transition {
            Some(CoverageTransition::Lost) => self.on_coverage_lost(result.gap_minutes),
            Some(CoverageTransition::Restored) => self.on_coverage_restored(result.gap_minutes),
            None => {}
        }

        result
    }

    fn apply_time_window(&mut self, window: TimeWindow) {
        let Some(connection) = self.connection.as_mut() else {
            self.report(OverlayError::InconsistentState(
                "time window update before the image service connection exists",
            ));
            return;
        };
        if connection.last_window == Some(window) {
            return;
        }
        connection.service.set_time_window(window);
        connection.last_window = Some(window);
        debug!("Time window set to {window}");
        self.emit(OverlayEvent::TimeWindowApplied(window));
    }

    fn on_coverage_lost(&mut self, gap_minutes: f64) {
        self.set_opacity(Some(0.0));
        self.publishers.applied_opacity.send_replace(0.0);
        self.remove_layer();
        self.emit(OverlayEvent::CoverageChanged {
            out_of_coverage: true,
            gap_minutes,
        });
    }

    fn on_coverage_restored(&mut self, gap_minutes: f64) {
        info!("Imagery coverage restored for {}", self.identity.variable);
        self.add_layer();
        self.emit(OverlayEvent::CoverageChanged {
            out_of_coverage: false,
            gap_minutes,
        });
    }

    fn add_layer(&mut self) {
        let opacity = self.publishers.opacity.borrow().unwrap_or(DEFAULT_OPACITY);
        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        if connection.surface.has_layer(&self.config.layer_id) {
            return;
        }
        connection.surface.add_layer(&RasterLayer {
            id: self.config.layer_id.clone(),
            source: self.config.layer_id.clone(),
            paint: RasterPaint {
                resampling: Resampling::Nearest,
                opacity,
            },
        });
        self.publishers.applied_opacity.send_replace(opacity);
        self.emit(OverlayEvent::LayerAdded);
    }

    fn remove_layer(&mut self) {
        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        if remove_layer_from(&mut connection.surface, &self.config.layer_id) {
            self.emit(OverlayEvent::LayerRemoved);
        }
    }

    /// Paint an opacity on the layer.
    ///
    /// Uses `value`, else the tracked opacity, else [`DEFAULT_OPACITY`]. Does
    /// nothing while unattached or while the layer is off the map.
    pub fn set_opacity(&mut self, value: Option<f32>) {
        let opacity = value
            .or(*self.publishers.opacity.borrow())
            .unwrap_or(DEFAULT_OPACITY);
        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        if !connection.surface.has_layer(&self.config.layer_id) {
            debug!("Layer '{}' not on map, opacity {opacity} not applied", self.config.layer_id);
            return;
        }
        connection.surface.set_opacity(&self.config.layer_id, opacity);
        self.publishers.applied_opacity.send_replace(opacity);
    }

    /// Update the tracked opacity and repaint if it changed.
    pub fn set_tracked_opacity(&mut self, value: Option<f32>) {
        let changed = self.publishers.opacity.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
        if changed {
            self.set_opacity(value);
        }
    }

    /// Point the overlay at a different image service and/or variable.
    ///
    /// Keeps the connection and layer; a variable change resets styling to
    /// that variable's defaults. Ignored before [`Self::attach`].
    pub fn change_source(&mut self, url: impl Into<String>, variable: impl Into<String>) {
        if self.connection.is_none() {
            debug!("Ignoring source change before attach");
            return;
        }
        let identity = VariableIdentity::new(url, variable);
        if identity == self.identity {
            return;
        }

        if identity.variable != self.identity.variable {
            let _ = self.render.on_variable_changed(&identity.variable);
        }
        self.identity = identity;

        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        connection.service.set_query_target(&self.identity.url);
        connection.service.set_rendering_directive(self.render.directive());

        info!("Overlay source changed to {}", self.identity);
        self.emit(OverlayEvent::SourceChanged(self.identity.clone()));
        self.emit(OverlayEvent::DirectiveApplied(self.render.directive().clone()));
    }

    /// Set the value range.
    pub fn set_range(&mut self, min: f64, max: f64) {
        let pushed = self
            .render
            .set_range(min, max)
            .and_then(|directive| push_directive(self.connection.as_mut(), directive));
        self.emit_directive(pushed);
    }

    /// Set the colormap.
    pub fn set_colormap(&mut self, colormap: Colormap) {
        let pushed = self
            .render
            .set_colormap(colormap)
            .and_then(|directive| push_directive(self.connection.as_mut(), directive));
        self.emit_directive(pushed);
    }

    /// Replace range and colormap at once.
    pub fn set_render_options(&mut self, options: RenderOptions) {
        let pushed = self
            .render
            .set_options(options)
            .and_then(|directive| push_directive(self.connection.as_mut(), directive));
        self.emit_directive(pushed);
    }

    fn emit_directive(&self, pushed: Option<RenderingDirective>) {
        if let Some(directive) = pushed {
            debug!("Rendering rule set to {directive}");
            self.emit(OverlayEvent::DirectiveApplied(directive));
        }
    }

    /// Start a catalog refresh for the current source.
    pub fn begin_refresh(&mut self) -> RefreshTicket {
        let ticket = self.catalog.begin_refresh(self.identity.clone());
        self.publishers.loading.send_replace(true);
        ticket
    }

    /// Land a catalog refresh.
    ///
    /// On success the requested time is re-evaluated before this returns.
    /// Returns the new step count, `None` for a superseded refresh, or the
    /// failure (which has also been reported on the event channel).
    pub fn complete_refresh(
        &mut self,
        ticket: RefreshTicket,
        result: Result<Vec<TimeStep>, CatalogError>,
    ) -> Result<Option<usize>, Arc<OverlayError>> {
        let identity = ticket.identity().clone();
        let outcome = self.catalog.complete_refresh(ticket, result);
        self.publishers.loading.send_replace(self.catalog.is_loading());

        match outcome {
            RefreshOutcome::Applied { count } => {
                info!("Loaded {count} time steps for {identity}");
                self.publishers
                    .time_steps
                    .send_replace(self.catalog.steps().to_vec());
                self.emit(OverlayEvent::CatalogLoaded { count });
                self.recompute_time_alignment();
                Ok(Some(count))
            }
            RefreshOutcome::Failed(e) => Err(self.report(OverlayError::Fetch(e))),
            RefreshOutcome::Stale => {
                debug!("Discarding superseded time step refresh for {identity}");
                Ok(None)
            }
        }
    }

    /// Fetch the catalog for the current source and apply it.
    pub async fn fetch_time_steps(&mut self) -> Result<Option<usize>, Arc<OverlayError>> {
        let ticket = self.begin_refresh();
        let result = self.catalog_source.fetch_time_steps(ticket.identity()).await;
        self.complete_refresh(ticket, result)
    }

    fn report(&self, error: OverlayError) -> Arc<OverlayError> {
        match &error {
            OverlayError::Fetch(_) => log::error!("Error fetching time steps for {}: {error}", self.identity),
            OverlayError::InconsistentState(_) => warn!("{error}"),
        }
        let error = Arc::new(error);
        self.emit(OverlayEvent::Failure(Arc::clone(&error)));
        error
    }

    fn emit(&self, event: OverlayEvent) {
        let _ = self.event_tx.send(event);
    }
}

fn remove_layer_from<M: MapSurface>(surface: &mut M, layer_id: &str) -> bool {
    if !surface.has_layer(layer_id) {
        return false;
    }
    surface.remove_layer(layer_id);
    true
}

fn push_directive<M, S: ImageService>(
    connection: Option<&mut OverlayConnection<M, S>>,
    directive: &RenderingDirective,
) -> Option<RenderingDirective> {
    let connection = connection?;
    connection.service.set_rendering_directive(directive);
    Some(directive.clone())
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::render::ValueRange;
    use crate::testing::{count, Command, CommandLog, RecordingConnector, RecordingSurface, StaticCatalog};

    const URL: &str = "https://gis.example.com/arcgis/rest/services/TEMPO_NO2/ImageServer";

    type TestOverlay = OverlaySynchronizer<RecordingSurface, RecordingConnector, StaticCatalog>;

    fn overlay_with(catalog: StaticCatalog, requested: i64, opacity: Option<f32>) -> (TestOverlay, CommandLog) {
        let log = CommandLog::default();
        let overlay = OverlaySynchronizer::new(
            OverlayConfig {
                opacity,
                ..Default::default()
            },
            VariableIdentity::new(URL, "NO2"),
            TimeStep::from_millis(requested),
            DefaultTables::builtin(),
            RecordingConnector { log: Rc::clone(&log) },
            catalog,
        );
        (overlay, log)
    }

    fn attached(steps: &[i64], requested: i64) -> (TestOverlay, CommandLog, RecordingSurface) {
        let (mut overlay, log) = overlay_with(StaticCatalog::default(), requested, None);
        let surface = RecordingSurface::new(Rc::clone(&log));
        overlay.attach(surface.clone());
        if !steps.is_empty() {
            load(&mut overlay, steps);
        }
        (overlay, log, surface)
    }

    fn load(overlay: &mut TestOverlay, steps: &[i64]) {
        let ticket = overlay.begin_refresh();
        let steps = steps.iter().copied().map(TimeStep::from_millis).collect();
        overlay.complete_refresh(ticket, Ok(steps)).unwrap();
    }

    fn windows(log: &CommandLog) -> Vec<TimeWindow> {
        log.borrow()
            .iter()
            .filter_map(|c| match c {
                Command::SetTimeWindow(w) => Some(*w),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_attach_connects_and_adds_layer_with_default_opacity() {
        let (overlay, log, surface) = attached(&[], 10_000_000);

        let commands = log.borrow().clone();
        assert!(matches!(
            &commands[0],
            Command::Connect { layer_id, url, query }
            if layer_id == "esri-source" && url == URL && query.contains("renderingRule=")
        ));
        assert_eq!(
            commands[1],
            Command::AddLayer { id: "esri-source".to_string(), opacity: DEFAULT_OPACITY }
        );
        assert!(surface.has_layer("esri-source"));
        assert_eq!(overlay.phase(), OverlayPhase::Attached);
        assert!((*overlay.observe().applied_opacity.borrow() - DEFAULT_OPACITY).abs() < f32::EPSILON);
    }

    #[test]
    fn test_attach_uses_tracked_opacity() {
        let (mut overlay, log) = overlay_with(StaticCatalog::default(), 0, Some(0.4));
        overlay.attach(RecordingSurface::new(Rc::clone(&log)));
        assert_eq!(
            count(&log, |c| matches!(c, Command::AddLayer { opacity, .. } if (*opacity - 0.4).abs() < f32::EPSILON)),
            1
        );
    }

    #[test]
    fn test_attach_skips_layer_already_present() {
        let (mut overlay, log) = overlay_with(StaticCatalog::default(), 0, None);
        let surface = RecordingSurface::new(Rc::clone(&log));
        surface.preload_layer("esri-source");
        overlay.attach(surface);
        assert_eq!(count(&log, |c| matches!(c, Command::AddLayer { .. })), 0);
    }

    #[test]
    fn test_empty_catalog_uses_sentinel_window() {
        let (overlay, log, _surface) = attached(&[], 10_000_000);
        assert!(!overlay.is_out_of_coverage());
        assert_eq!(
            windows(&log),
            vec![TimeWindow::for_matched_step(TimeStep::from_millis(9_100_000))]
        );
        let latest = overlay.observe().latest_match.borrow().unwrap();
        assert!((latest.gap_minutes - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_tie_resolves_to_earlier_step_in_coverage() {
        let (overlay, log, _surface) = attached(&[0, 3_600_000], 1_800_000);
        assert_eq!(overlay.phase(), OverlayPhase::Attached);
        assert_eq!(windows(&log).last(), Some(&TimeWindow::for_matched_step(TimeStep::from_millis(0))));
    }

    #[test]
    fn test_gap_over_threshold_withdraws_layer() {
        let (overlay, log, surface) = attached(&[0], 4_000_000);
        let observables = overlay.observe();

        assert_eq!(overlay.phase(), OverlayPhase::OutOfCoverage);
        assert!(*observables.out_of_coverage.borrow());
        assert!(observables.applied_opacity.borrow().abs() < f32::EPSILON);
        assert!(!surface.has_layer("esri-source"));

        let commands = log.borrow().clone();
        let opacity_zero = commands
            .iter()
            .position(|c| matches!(c, Command::SetOpacity(_, o) if o.abs() < f32::EPSILON))
            .unwrap();
        let removed = commands
            .iter()
            .position(|c| matches!(c, Command::RemoveLayer(_)))
            .unwrap();
        assert!(opacity_zero < removed);
    }

    #[test]
    fn test_out_of_coverage_sends_no_time_window() {
        let (_overlay, log, _surface) = attached(&[0], 4_000_000);
        // Only the sentinel window from attach, nothing for the far match.
        assert_eq!(windows(&log).len(), 1);
    }

    #[test]
    fn test_coverage_restored_re_adds_layer_with_tracked_opacity() {
        let (mut overlay, log, surface) = attached(&[0], 4_000_000);
        overlay.set_tracked_opacity(Some(0.5));
        // Layer is off the map, so the new opacity is only tracked.
        assert_eq!(count(&log, |c| matches!(c, Command::SetOpacity(_, o) if (*o - 0.5).abs() < f32::EPSILON)), 0);

        overlay.set_requested_time(TimeStep::from_millis(600_000));
        assert_eq!(overlay.phase(), OverlayPhase::Attached);
        assert!(surface.has_layer("esri-source"));
        assert!(matches!(
            log.borrow().last(),
            Some(Command::AddLayer { opacity, .. }) if (*opacity - 0.5).abs() < f32::EPSILON
        ));
        assert!((*overlay.observe().applied_opacity.borrow() - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_staying_out_of_coverage_issues_no_commands() {
        let (mut overlay, log, _surface) = attached(&[0], 4_000_000);
        let before = log.borrow().len();
        overlay.set_requested_time(TimeStep::from_millis(9_000_000));
        assert_eq!(log.borrow().len(), before);
    }

    #[test]
    fn test_unchanged_match_sends_window_once() {
        let (mut overlay, log, _surface) = attached(&[0, 3_600_000], 60_000);
        overlay.set_requested_time(TimeStep::from_millis(120_000));
        overlay.recompute_time_alignment();
        assert_eq!(windows(&log).len(), 2); // sentinel from attach, then step 0
    }

    #[test]
    fn test_same_requested_time_is_ignored() {
        let (mut overlay, _log, _surface) = attached(&[0], 60_000);
        let mut events = overlay.subscribe();
        overlay.set_requested_time(TimeStep::from_millis(60_000));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_refresh_completion_reevaluates_coverage() {
        let (mut overlay, log, _surface) = attached(&[], 4_000_000);
        assert!(!overlay.is_out_of_coverage());

        let ticket = overlay.begin_refresh();
        assert!(*overlay.observe().loading.borrow());
        let count_loaded = overlay
            .complete_refresh(ticket, Ok(vec![TimeStep::from_millis(0)]))
            .unwrap();

        assert_eq!(count_loaded, Some(1));
        assert!(!*overlay.observe().loading.borrow());
        assert!(*overlay.observe().out_of_coverage.borrow());
        assert_eq!(count(&log, |c| matches!(c, Command::RemoveLayer(_))), 1);
        assert_eq!(*overlay.observe().time_steps.borrow(), vec![TimeStep::from_millis(0)]);
    }

    #[test]
    fn test_failed_refresh_reports_and_keeps_catalog() {
        let (mut overlay, _log, _surface) = attached(&[0, 60_000], 0);
        let mut events = overlay.subscribe();

        let ticket = overlay.begin_refresh();
        let result = overlay.complete_refresh(ticket, Err(CatalogError::Status(500)));

        assert!(matches!(
            result,
            Err(ref e) if matches!(**e, OverlayError::Fetch(CatalogError::Status(500)))
        ));
        assert!(!*overlay.observe().loading.borrow());
        assert_eq!(overlay.catalog().len(), 2);
        assert!(matches!(
            events.try_recv(),
            Ok(OverlayEvent::Failure(e)) if matches!(*e, OverlayError::Fetch(_))
        ));
    }

    #[test]
    fn test_superseded_refresh_is_dropped() {
        let (mut overlay, _log, _surface) = attached(&[], 0);
        let first = overlay.begin_refresh();
        let second = overlay.begin_refresh();

        assert_eq!(overlay.complete_refresh(first, Ok(vec![TimeStep::from_millis(5)])).unwrap(), None);
        assert!(*overlay.observe().loading.borrow());
        assert_eq!(overlay.complete_refresh(second, Ok(vec![TimeStep::from_millis(7)])).unwrap(), Some(1));
        assert_eq!(overlay.catalog().steps(), &[TimeStep::from_millis(7)]);
    }

    #[test]
    fn test_time_window_before_attach_is_inconsistent_state() {
        let (mut overlay, log) = overlay_with(StaticCatalog::default(), 0, None);
        let mut events = overlay.subscribe();
        overlay.recompute_time_alignment();

        assert!(log.borrow().is_empty());
        assert_eq!(overlay.phase(), OverlayPhase::Uninitialized);
        assert!(matches!(
            events.try_recv(),
            Ok(OverlayEvent::Failure(e)) if matches!(*e, OverlayError::InconsistentState(_))
        ));
    }

    #[test]
    fn test_coverage_lost_before_attach_holds_layer_back() {
        let (mut overlay, log) = overlay_with(StaticCatalog::default(), 4_000_000, None);
        let ticket = overlay.begin_refresh();
        overlay.complete_refresh(ticket, Ok(vec![TimeStep::from_millis(0)])).unwrap();
        assert!(overlay.is_out_of_coverage());

        let surface = RecordingSurface::new(Rc::clone(&log));
        overlay.attach(surface.clone());
        assert_eq!(overlay.phase(), OverlayPhase::OutOfCoverage);
        assert!(!surface.has_layer("esri-source"));
        assert_eq!(count(&log, |c| matches!(c, Command::AddLayer { .. })), 0);
    }

    #[test]
    fn test_change_source_before_attach_is_noop() {
        let (mut overlay, log) = overlay_with(StaticCatalog::default(), 0, None);
        overlay.change_source("https://elsewhere/ImageServer", "HCHO");

        assert!(log.borrow().is_empty());
        assert_eq!(overlay.identity(), &VariableIdentity::new(URL, "NO2"));
        assert_eq!(overlay.render_options().colormap, Colormap::new("Magma"));
        assert_eq!(overlay.phase(), OverlayPhase::Uninitialized);
    }

    #[test]
    fn test_change_source_resets_styling_and_rebinds() {
        let (mut overlay, log, surface) = attached(&[0], 0);
        overlay.set_range(1.0, 2.0);
        let before = log.borrow().len();

        overlay.change_source("https://elsewhere/ImageServer", "HCHO");

        let commands = log.borrow()[before..].to_vec();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0], Command::SetQueryTarget("https://elsewhere/ImageServer".to_string()));
        assert_eq!(commands[1], Command::SetDirective(overlay.rendering_directive().clone()));
        assert_eq!(overlay.render_options().range, ValueRange::new(0.0, 3.0e16));
        assert_eq!(overlay.render_options().colormap, Colormap::new("Viridis"));
        assert!(surface.has_layer("esri-source"));
        assert_eq!(count(&log, |c| matches!(c, Command::Connect { .. })), 1);
        assert_eq!(overlay.catalog().len(), 1);
    }

    #[test]
    fn test_change_url_only_keeps_user_styling() {
        let (mut overlay, log, _surface) = attached(&[0], 0);
        overlay.set_colormap(Colormap::new("Inferno"));
        overlay.change_source("https://mirror/ImageServer", "NO2");

        assert_eq!(overlay.render_options().colormap, Colormap::new("Inferno"));
        assert!(matches!(log.borrow().last(), Some(Command::SetDirective(_))));
    }

    #[test]
    fn test_render_edits_push_directive_once_per_change() {
        let (mut overlay, log, _surface) = attached(&[0], 0);
        overlay.set_range(1.0, 2.0);
        overlay.set_range(1.0, 2.0);
        overlay.set_colormap(Colormap::new("Inferno"));
        overlay.set_render_options(RenderOptions::new(ValueRange::new(3.0, 4.0), Colormap::new("Blues")));

        assert_eq!(count(&log, |c| matches!(c, Command::SetDirective(_))), 3);
        assert!(matches!(
            log.borrow().last(),
            Some(Command::SetDirective(d)) if d == overlay.rendering_directive()
        ));
    }

    #[test]
    fn test_render_edits_before_attach_update_state_only() {
        let (mut overlay, log) = overlay_with(StaticCatalog::default(), 0, None);
        overlay.set_range(1.0, 2.0);
        assert!(log.borrow().is_empty());

        overlay.attach(RecordingSurface::new(Rc::clone(&log)));
        assert!(matches!(
            &log.borrow()[0],
            Command::Connect { query, .. } if query.ends_with(&overlay.rendering_directive().to_string())
        ));
    }

    #[test]
    fn test_set_opacity_fallbacks() {
        let (mut overlay, log) = overlay_with(StaticCatalog::default(), 0, None);
        overlay.set_opacity(Some(0.3));
        assert!(log.borrow().is_empty());

        overlay.attach(RecordingSurface::new(Rc::clone(&log)));
        overlay.set_opacity(Some(0.3));
        overlay.set_opacity(None);
        overlay.set_tracked_opacity(Some(0.6));
        overlay.set_opacity(None);

        let painted: Vec<f32> = log
            .borrow()
            .iter()
            .filter_map(|c| match c {
                Command::SetOpacity(_, o) => Some(*o),
                _ => None,
            })
            .collect();
        assert_eq!(painted, vec![0.3, DEFAULT_OPACITY, 0.6, 0.6]);
    }

    #[test]
    fn test_reattach_replaces_surface() {
        let (mut overlay, log, first) = attached(&[0], 0);
        let second = RecordingSurface::new(Rc::clone(&log));
        overlay.attach(second.clone());

        assert!(!first.has_layer("esri-source"));
        assert!(second.has_layer("esri-source"));
        assert_eq!(count(&log, |c| matches!(c, Command::Connect { .. })), 2);
        // Fresh connection gets the window again.
        assert_eq!(windows(&log).iter().filter(|w| w.start.as_millis() == 0).count(), 2);
    }

    #[test]
    fn test_detach_removes_layer_and_returns_surface() {
        let (mut overlay, _log, _surface) = attached(&[0], 0);
        let surface = overlay.detach().unwrap();
        assert!(!surface.has_layer("esri-source"));
        assert_eq!(overlay.phase(), OverlayPhase::Uninitialized);
        assert!(overlay.detach().is_none());
    }

    #[tokio::test]
    async fn test_fetch_time_steps_applies_catalog() {
        let (mut overlay, log) = overlay_with(StaticCatalog::with_millis(&[3_600_000, 0, 0]), 1_800_000, None);
        overlay.attach(RecordingSurface::new(Rc::clone(&log)));

        let loaded = overlay.fetch_time_steps().await.unwrap();
        assert_eq!(loaded, Some(2));
        assert_eq!(overlay.catalog().steps(), &[TimeStep::from_millis(0), TimeStep::from_millis(3_600_000)]);
        assert_eq!(windows(&log).last(), Some(&TimeWindow::for_matched_step(TimeStep::from_millis(0))));
    }

    #[tokio::test]
    async fn test_fetch_time_steps_failure_clears_loading() {
        let (mut overlay, _log) = overlay_with(StaticCatalog::failing(), 0, None);
        let result = overlay.fetch_time_steps().await;
        assert!(result.is_err());
        assert!(!*overlay.observe().loading.borrow());
        assert!(overlay.catalog().is_empty());
    }
}
