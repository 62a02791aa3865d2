// Copyright 2025 Google LLC
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

//! eSCL HTTP surface
//!
//! One [`DeviceContext`] is shared by a device's HTTP and HTTPS listeners so
//! both see the same jobs. [`router`] builds the per-listener axum router.

mod error;
mod handlers;
pub mod xml;

pub use error::ApiError;

use crate::config::{Capabilities, DeviceConfig};
use crate::jobs::{JobCleanupConfig, JobTable, ScanJobFactory};
use crate::sync::AsyncMutex;
use axum::routing::{delete, get, post};
use axum::Router;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

/// Path prefix of every eSCL route
pub const BASE_PATH: &str = "/eSCL";

/// Path of a job resource, as returned in `Location`
pub fn job_path(id: Uuid) -> String {
    format!("{BASE_PATH}/ScanJobs/{id}")
}

/// State of one device behind its listeners
pub struct DeviceContext {
    uuid: Uuid,
    capabilities: Capabilities,
    factory: Arc<dyn ScanJobFactory>,
    jobs: JobTable,
    admission: AsyncMutex,
    /// Cancelled when the device stops; long-running requests give up on it
    shutdown: CancellationToken,
}

impl DeviceContext {
    pub fn new(
        config: &DeviceConfig,
        cleanup: JobCleanupConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            uuid: config.uuid,
            capabilities: config.capabilities.clone(),
            factory: Arc::clone(&config.create_job),
            jobs: JobTable::new(cleanup),
            admission: AsyncMutex::new(),
            shutdown,
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn jobs(&self) -> &JobTable {
        &self.jobs
    }
}

impl fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceContext")
            .field("uuid", &self.uuid)
            .field("jobs", &self.jobs)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
struct ApiState {
    device: Arc<DeviceContext>,
    scheme: &'static str,
}

/// Build the router for one listener
///
/// `scheme` is `http` or `https` and is used for absolute URIs in responses.
pub fn router(device: Arc<DeviceContext>, scheme: &'static str, allow_cors: bool) -> Router {
    let routes = Router::new()
        .route("/ScannerCapabilities", get(handlers::capabilities))
        .route("/ScannerStatus", get(handlers::status))
        .route("/ScanJobs", post(handlers::create_job))
        .route("/ScanJobs/{id}", delete(handlers::cancel_job))
        .route("/ScanJobs/{id}/NextDocument", get(handlers::next_document))
        .route("/ScanJobs/{id}/Progress", get(handlers::progress))
        .route("/icon.png", get(handlers::icon));

    let router = Router::new()
        .nest(BASE_PATH, routes)
        .with_state(ApiState { device, scheme })
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http());

    if allow_cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}
