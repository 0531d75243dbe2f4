use crate::pipeline::export::ExportServices;
use crate::web::api::{
    create_export_handler, export_events_handler, export_progress_handler, get_photos,
    list_exports_handler, render_photo_handler, thumbnail_handler,
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::net::{IpAddr, SocketAddr, TcpListener};
use std::path::Path;
use std::sync::Arc;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{info, warn};

pub fn build_router(services: Arc<ExportServices>, output_root: &Path) -> Router {
    Router::new()
        .route("/api/photos", get(get_photos))
        .route("/api/photos/:id/render", get(render_photo_handler))
        .route("/api/photos/:id/thumbnail", get(thumbnail_handler))
        .route(
            "/api/exports",
            get(list_exports_handler).post(create_export_handler),
        )
        .route("/api/exports/:id", get(export_progress_handler))
        .route("/api/exports/:id/events", get(export_events_handler))
        .nest_service("/downloads", ServeDir::new(output_root))
        .layer(TraceLayer::new_for_http())
        .with_state(services)
}

pub async fn run_server(
    host: IpAddr,
    port: u16,
    services: Arc<ExportServices>,
    output_root: &Path,
) -> Result<()> {
    let mut current_port = port;
    let listener = loop {
        let addr = SocketAddr::new(host, current_port);
        match TcpListener::bind(addr) {
            Ok(listener) => {
                // Tokio requires a non-blocking socket
                listener.set_nonblocking(true)?;
                info!("Successfully bound to {}", addr);
                break listener;
            }
            Err(e) => {
                warn!("Failed to bind to {}: {}. Trying next port...", addr, e);
                current_port = current_port
                    .checked_add(1)
                    .ok_or_else(|| anyhow::anyhow!("No available ports found"))?;
            }
        }
    };

    let app = build_router(services, output_root);

    let tokio_listener = tokio::net::TcpListener::from_std(listener)?;
    info!(
        "Photo markup server started on http://{:?}",
        tokio_listener.local_addr()?
    );

    axum::serve(tokio_listener, app).await?;

    Ok(())
}
