use crate::annotation::parse_annotation_value;
use crate::pipeline::canonical::RenderOptions;
use crate::pipeline::export::{ExportRequest, ExportServices};
use crate::pipeline::orchestrator::{get_export_state, list_export_states, start_export};
use crate::provider::PhotoRecord;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::Stream;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::{wrappers::IntervalStream, StreamExt};

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportCreated {
    pub job_id: String,
}

pub async fn get_photos(
    State(services): State<Arc<ExportServices>>,
) -> Result<Json<Vec<PhotoRecord>>, StatusCode> {
    let photos = tokio::task::spawn_blocking(move || services.provider.list_photos())
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .map_err(|e| {
            tracing::error!("Failed to list photos: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    Ok(Json(photos))
}

/// Fetches, parses and renders one photo. Blocking.
pub fn render_by_id(
    services: &ExportServices,
    id: &str,
    options: &RenderOptions,
) -> Result<Vec<u8>, StatusCode> {
    let record = services
        .provider
        .find_photo(id)
        .map_err(|e| {
            tracing::error!("Failed to look up photo {}: {:#}", id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    let payload = services.provider.fetch_photo(&record).map_err(|e| {
        tracing::error!("Failed to fetch photo {}: {:#}", id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let annotations = payload
        .annotation
        .as_ref()
        .map(parse_annotation_value)
        .transpose()
        .map_err(|e| {
            tracing::warn!("Malformed annotations for photo {}: {}", id, e);
            StatusCode::UNPROCESSABLE_ENTITY
        })?;

    services
        .renderer
        .render_photo(&payload.bytes, annotations.as_ref(), options)
        .map_err(|e| {
            tracing::warn!("Render failed for photo {}: {}", id, e);
            StatusCode::UNPROCESSABLE_ENTITY
        })
}

async fn jpeg_response(
    services: Arc<ExportServices>,
    id: String,
    options: RenderOptions,
) -> Result<Response, StatusCode> {
    let bytes = tokio::task::spawn_blocking(move || render_by_id(&services, &id, &options))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;
    Ok(([(header::CONTENT_TYPE, "image/jpeg")], bytes).into_response())
}

pub async fn render_photo_handler(
    State(services): State<Arc<ExportServices>>,
    Path(id): Path<String>,
    Query(options): Query<RenderOptions>,
) -> Result<Response, StatusCode> {
    jpeg_response(services, id, options).await
}

pub async fn thumbnail_handler(
    State(services): State<Arc<ExportServices>>,
    Path(id): Path<String>,
) -> Result<Response, StatusCode> {
    jpeg_response(services, id, RenderOptions::thumbnail()).await
}

pub async fn create_export_handler(
    State(services): State<Arc<ExportServices>>,
    Json(request): Json<ExportRequest>,
) -> Result<Json<ExportCreated>, StatusCode> {
    match start_export(services, request) {
        Ok(state) => Ok(Json(ExportCreated {
            job_id: state.job_id.clone(),
        })),
        Err(e) => {
            tracing::error!("Failed to start export: {:#}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub async fn list_exports_handler() -> Json<Vec<serde_json::Value>> {
    Json(
        list_export_states()
            .iter()
            .map(|state| state.to_progress_json())
            .collect(),
    )
}

pub async fn export_progress_handler(
    Path(job_id): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    get_export_state(&job_id)
        .map(|state| Json(state.to_progress_json()))
        .ok_or(StatusCode::NOT_FOUND)
}

/// Server-sent progress events until the job finishes.
pub async fn export_events_handler(
    Path(job_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    let state = get_export_state(&job_id).ok_or(StatusCode::NOT_FOUND)?;

    let stream = async_stream::stream! {
        let mut ticks = IntervalStream::new(tokio::time::interval(PROGRESS_INTERVAL));
        while ticks.next().await.is_some() {
            let finished = state.is_finished();
            yield Ok::<_, Infallible>(Event::default()
                .event("progress")
                .data(state.to_progress_json().to_string()));
            if finished {
                break;
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
