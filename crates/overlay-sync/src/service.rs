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

//! Interface to the remote tile-rendering service.
//!
//! The service itself (tile requests, caching, decoding) lives outside this
//! crate. The synchronizer only creates a connection through an
//! [`ImageServiceConnector`] and then drives it through the three narrow
//! mutators on [`ImageService`].

use crate::render::RenderingDirective;
use crate::time::TimeWindow;

/// Template token the map surface substitutes with each tile's bounding box.
pub const BBOX_TEMPLATE: &str = "{bbox-epsg-3857}";

/// Web Mercator spatial reference id.
pub const WEB_MERCATOR_WKID: u32 = 3857;

/// Query options for `exportImage` tile requests.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageServiceOptions {
    pub format: String,
    pub pixel_type: String,
    pub tile_size: u32,
    pub transparent: bool,
    pub bbox_sr: u32,
    pub image_sr: u32,
    pub bbox: String,
    pub interpolation: String,
    pub rendering_rule: RenderingDirective,
}

impl ImageServiceOptions {
    /// Standard 8-bit PNG tiles in Web Mercator with nearest-neighbor sampling.
    #[must_use]
    pub fn new(tile_size: u32, rendering_rule: RenderingDirective) -> Self {
        Self {
            format: "png".to_string(),
            pixel_type: "U8".to_string(),
            tile_size,
            transparent: true,
            bbox_sr: WEB_MERCATOR_WKID,
            image_sr: WEB_MERCATOR_WKID,
            bbox: BBOX_TEMPLATE.to_string(),
            interpolation: "RSP_NearestNeighbor".to_string(),
            rendering_rule,
        }
    }

    /// Encode as a query string.
    ///
    /// Values are not percent-encoded: the bbox template must reach the map
    /// surface verbatim, and the service adapter owns final URL encoding.
    #[must_use]
    pub fn to_query_string(&self) -> String {
        [
            ("format", self.format.clone()),
            ("pixelType", self.pixel_type.clone()),
            ("size", format!("{},{}", self.tile_size, self.tile_size)),
            ("transparent", self.transparent.to_string()),
            ("bboxSR", self.bbox_sr.to_string()),
            ("imageSR", self.image_sr.to_string()),
            ("bbox", self.bbox.clone()),
            ("interpolation", self.interpolation.clone()),
            ("renderingRule", self.rendering_rule.to_string()),
        ]
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&")
    }
}

/// Everything needed to open a connection for one overlay layer.
#[derive(Debug, Clone)]
pub struct ServiceRequest {
    /// Layer and source identifier on the map surface.
    pub layer_id: String,
    /// Image service URL.
    pub url: String,
    pub options: ImageServiceOptions,
    pub tile_size: u32,
}

/// Live handle to the rendering service for one layer.
pub trait ImageService {
    /// Set the active time window for subsequent tiles.
    fn set_time_window(&mut self, window: TimeWindow);

    /// Point tile requests at a different image service URL.
    fn set_query_target(&mut self, url: &str);

    /// Replace the rendering rule used for subsequent tiles.
    fn set_rendering_directive(&mut self, directive: &RenderingDirective);
}

/// Opens [`ImageService`] connections bound to a map surface.
///
/// Implementations register the raster source on `surface` under
/// `request.layer_id`.
pub trait ImageServiceConnector<M> {
    type Service: ImageService;

    fn connect(&mut self, surface: &mut M, request: &ServiceRequest) -> Self::Service;
}
