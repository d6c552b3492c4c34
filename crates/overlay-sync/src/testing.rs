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

//! Recording fakes for the external collaborators.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use crate::catalog::{CatalogError, CatalogSource, VariableIdentity};
use crate::render::RenderingDirective;
use crate::service::{ImageService, ImageServiceConnector, ServiceRequest};
use crate::surface::{MapSurface, RasterLayer};
use crate::time::{TimeStep, TimeWindow};

/// Every command issued to the map or the image service, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    AddLayer { id: String, opacity: f32 },
    RemoveLayer(String),
    SetOpacity(String, f32),
    Connect { layer_id: String, url: String, query: String },
    SetTimeWindow(TimeWindow),
    SetQueryTarget(String),
    SetDirective(RenderingDirective),
}

pub type CommandLog = Rc<RefCell<Vec<Command>>>;

/// Count commands matching `predicate`.
pub fn count(log: &CommandLog, predicate: impl Fn(&Command) -> bool) -> usize {
    log.borrow().iter().filter(|&c| predicate(c)).count()
}

#[derive(Debug, Clone, Default)]
pub struct RecordingSurface {
    pub log: CommandLog,
    layers: Rc<RefCell<HashSet<String>>>,
}

impl RecordingSurface {
    pub fn new(log: CommandLog) -> Self {
        Self {
            log,
            layers: Rc::default(),
        }
    }

    /// Put a layer on the map without logging, as if someone else added it.
    pub fn preload_layer(&self, id: &str) {
        self.layers.borrow_mut().insert(id.to_string());
    }
}

impl MapSurface for RecordingSurface {
    fn add_layer(&mut self, layer: &RasterLayer) {
        self.layers.borrow_mut().insert(layer.id.clone());
        self.log.borrow_mut().push(Command::AddLayer {
            id: layer.id.clone(),
            opacity: layer.paint.opacity,
        });
    }

    fn remove_layer(&mut self, id: &str) {
        self.layers.borrow_mut().remove(id);
        self.log.borrow_mut().push(Command::RemoveLayer(id.to_string()));
    }

    fn has_layer(&self, id: &str) -> bool {
        self.layers.borrow().contains(id)
    }

    fn set_opacity(&mut self, id: &str, opacity: f32) {
        self.log
            .borrow_mut()
            .push(Command::SetOpacity(id.to_string(), opacity));
    }
}

#[derive(Debug, Default)]
pub struct RecordingConnector {
    pub log: CommandLog,
}

impl ImageServiceConnector<RecordingSurface> for RecordingConnector {
    type Service = RecordingService;

    fn connect(&mut self, _surface: &mut RecordingSurface, request: &ServiceRequest) -> RecordingService {
        self.log.borrow_mut().push(Command::Connect {
            layer_id: request.layer_id.clone(),
            url: request.url.clone(),
            query: request.options.to_query_string(),
        });
        RecordingService {
            log: Rc::clone(&self.log),
        }
    }
}

#[derive(Debug)]
pub struct RecordingService {
    log: CommandLog,
}

impl ImageService for RecordingService {
    fn set_time_window(&mut self, window: TimeWindow) {
        self.log.borrow_mut().push(Command::SetTimeWindow(window));
    }

    fn set_query_target(&mut self, url: &str) {
        self.log
            .borrow_mut()
            .push(Command::SetQueryTarget(url.to_string()));
    }

    fn set_rendering_directive(&mut self, directive: &RenderingDirective) {
        self.log
            .borrow_mut()
            .push(Command::SetDirective(directive.clone()));
    }
}

/// Catalog source returning fixed steps, or failing with HTTP 503 when `None`.
#[derive(Debug, Default)]
pub struct StaticCatalog {
    pub steps: Option<Vec<TimeStep>>,
}

impl StaticCatalog {
    pub fn with_millis(values: &[i64]) -> Self {
        Self {
            steps: Some(values.iter().copied().map(TimeStep::from_millis).collect()),
        }
    }

    pub fn failing() -> Self {
        Self { steps: None }
    }
}

impl CatalogSource for StaticCatalog {
    async fn fetch_time_steps(
        &self,
        _identity: &VariableIdentity,
    ) -> Result<Vec<TimeStep>, CatalogError> {
        self.steps.clone().ok_or(CatalogError::Status(503))
    }
}
