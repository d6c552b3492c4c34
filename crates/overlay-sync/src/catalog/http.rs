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

//! HTTP catalog source backed by an ESRI ImageServer.

use std::time::Duration;

use log::debug;

use super::{extract_time_steps, CatalogError, CatalogSource, VariableIdentity};
use crate::time::TimeStep;

/// Configuration for the HTTP catalog source.
#[derive(Debug, Clone)]
pub struct HttpCatalogConfig {
    /// Request timeout for the catalog endpoint.
    pub timeout: Duration,
}

impl Default for HttpCatalogConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

/// Fetches time steps from `<url>/multiDimensionalInfo?f=json`.
#[derive(Debug, Clone)]
pub struct HttpCatalogSource {
    client: reqwest::Client,
}

impl HttpCatalogSource {
    pub fn new(config: &HttpCatalogConfig) -> Result<Self, CatalogError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client })
    }

    /// Endpoint listing the multidimensional info for an image service.
    #[must_use]
    pub fn catalog_url(service_url: &str) -> String {
        format!(
            "{}/multiDimensionalInfo?f=json",
            service_url.trim_end_matches('/')
        )
    }
}

impl CatalogSource for HttpCatalogSource {
    async fn fetch_time_steps(
        &self,
        identity: &VariableIdentity,
    ) -> Result<Vec<TimeStep>, CatalogError> {
        let url = Self::catalog_url(&identity.url);
        debug!("Fetching time steps for {} from {}", identity.variable, url);

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(CatalogError::Status(response.status().as_u16()));
        }

        let body = response.text().await?;
        extract_time_steps(&body, &identity.variable)
    }
}
