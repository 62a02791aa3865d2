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

use super::{job_path, xml, ApiError, ApiState, BASE_PATH};
use crate::jobs::{JobInfo, JobState, JobTable};
use crate::settings::ScanSettings;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

const XML_CONTENT_TYPE: &str = "text/xml";

fn xml_response(body: String) -> Response {
    ([(header::CONTENT_TYPE, XML_CONTENT_TYPE)], body).into_response()
}

/// Marks the device idle again unless forgotten
///
/// Dropped on every exit from job creation that does not hand a job to the
/// table, including a panicking scan engine.
struct BusyClaim<'a>(&'a JobTable);

impl Drop for BusyClaim<'_> {
    fn drop(&mut self) {
        self.0.end_processing();
    }
}

fn find_job(state: &ApiState, id: &str) -> Result<Arc<JobInfo>, ApiError> {
    let id = Uuid::parse_str(id).map_err(|_| ApiError::JobNotFound)?;
    state.device.jobs.try_get_job(id).ok_or(ApiError::JobNotFound)
}

pub(super) async fn capabilities(State(state): State<ApiState>, headers: HeaderMap) -> Response {
    let device = &state.device;
    let icon_uri = device.capabilities.icon_png.as_ref().map(|_| {
        let host = headers
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("localhost");
        format!("{}://{host}{BASE_PATH}/icon.png", state.scheme)
    });
    xml_response(xml::scanner_capabilities(
        &device.capabilities,
        device.uuid,
        icon_uri.as_deref(),
    ))
}

pub(super) async fn status(State(state): State<ApiState>) -> Response {
    let jobs = state.device.jobs.jobs();
    xml_response(xml::scanner_status(
        &state.device.capabilities.version,
        state.device.jobs.is_processing(),
        &jobs,
    ))
}

pub(super) async fn create_job(
    State(state): State<ApiState>,
    body: String,
) -> Result<Response, ApiError> {
    let settings = ScanSettings::parse(&body)?;
    let device = &state.device;

    let _admission = device.admission.acquire().await;
    if !device.jobs.try_begin_processing() {
        debug!(device = %device.uuid, "Rejecting scan job, device busy");
        return Err(ApiError::Busy);
    }
    let claim = BusyClaim(&device.jobs);

    let job = device
        .factory
        .create_job(&settings)
        .await
        .map_err(|err| ApiError::Internal(format!("{err:#}")))?;
    let info = device.jobs.add_job(settings, job);
    // The job now reports DeviceIdle itself
    std::mem::forget(claim);
    info!(device = %device.uuid, job = %info.id(), "Created scan job");

    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, job_path(info.id()))],
    )
        .into_response())
}

pub(super) async fn next_document(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let info = find_job(&state, &id)?;
    info.touch();
    let more = tokio::select! {
        more = info.job().wait_for_next_document() => more,
        () = state.device.shutdown.cancelled() => return Err(ApiError::ShuttingDown),
    };
    if !more {
        return Err(ApiError::NoMoreDocuments);
    }

    let mut document = Vec::new();
    info.job().write_document_to(&mut document).await?;
    info.touch();

    let content_type = info
        .settings()
        .document_format
        .clone()
        .unwrap_or_else(|| "application/octet-stream".to_string());
    Ok(([(header::CONTENT_TYPE, content_type)], Body::from(document)).into_response())
}

pub(super) async fn progress(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let info = find_job(&state, &id)?;
    info.touch();

    let mut progress = Vec::new();
    info.job().write_progress_to(&mut progress).await?;
    Ok(([(header::CONTENT_TYPE, XML_CONTENT_TYPE)], Body::from(progress)).into_response())
}

pub(super) async fn cancel_job(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let info = find_job(&state, &id)?;
    info.job().cancel();
    info.transition(JobState::Canceled);
    info!(device = %state.device.uuid, job = %info.id(), "Cancelled scan job");
    Ok(StatusCode::OK)
}

pub(super) async fn icon(State(state): State<ApiState>) -> Result<Response, ApiError> {
    let icon = state
        .device
        .capabilities
        .icon_png
        .clone()
        .ok_or(ApiError::NoIcon)?;
    Ok(([(header::CONTENT_TYPE, "image/png")], Body::from(icon)).into_response())
}
