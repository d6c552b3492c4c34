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

//! Map surface the overlay layer is drawn on.

/// Raster resampling mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resampling {
    #[default]
    Nearest,
    Linear,
}

impl Resampling {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Resampling::Nearest => "nearest",
            Resampling::Linear => "linear",
        }
    }
}

/// Paint properties for a raster layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterPaint {
    pub resampling: Resampling,
    pub opacity: f32,
}

/// A raster layer drawing from a source of the same name.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterLayer {
    pub id: String,
    pub source: String,
    pub paint: RasterPaint,
}

/// Commands the overlay issues to the map.
pub trait MapSurface {
    fn add_layer(&mut self, layer: &RasterLayer);

    fn remove_layer(&mut self, id: &str);

    fn has_layer(&self, id: &str) -> bool;

    /// Set the raster opacity paint property of an existing layer.
    fn set_opacity(&mut self, id: &str, opacity: f32);
}
