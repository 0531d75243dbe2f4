mod annotation;
mod cli;
mod job_context;
mod pipeline;
mod provider;
mod web;

use anyhow::{Context, Result};
use cli::{Args, Command};
use indicatif::{ProgressBar, ProgressStyle};
use pipeline::export::{run_export, ExportRequest, ExportServices, PhotoProgress};
use pipeline::fonts::FONT_DIR_ENV;
use pipeline::orchestrator::new_job_id;
use pipeline::render::AnnotationRenderer;
use provider::{DirectoryArchiveSink, DirectoryPhotoProvider};
use std::sync::Arc;
use web::server::run_server;

fn build_services(args: &Args) -> Result<Arc<ExportServices>> {
    let scratch_root = args.scratch_root();
    std::fs::create_dir_all(&scratch_root)
        .with_context(|| format!("Failed to create scratch root {:?}", scratch_root))?;
    let removed = job_context::remove_stale_workspaces(&scratch_root)?;
    if removed > 0 {
        tracing::info!("Removed {} stale job workspaces", removed);
    }

    Ok(Arc::new(ExportServices {
        provider: Arc::new(DirectoryPhotoProvider::new(&args.photo_root)),
        renderer: Arc::new(AnnotationRenderer::with_system_fonts(&args.font_family)),
        sink: Arc::new(DirectoryArchiveSink::new(&args.output_root)),
        scratch_root,
    }))
}

fn export_once(services: &ExportServices, request: ExportRequest) -> Result<()> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec:.1.yellow} photos, {eta})")?
            .progress_chars("#>-"),
    );

    let job_id = new_job_id();
    let progress = |p: &PhotoProgress| {
        pb.set_length(p.total as u64);
        pb.set_position(p.processed as u64);
    };
    let summary = run_export(services, &job_id, &request, progress)?;
    pb.finish_with_message("Done");

    for failure in &summary.failures {
        tracing::warn!("{} ({}): {}", failure.filename, failure.photo_id, failure.error);
    }
    tracing::info!(
        "Exported {} photos to {} ({} bytes, {} render failures)",
        summary.photo_count,
        summary.archive.key,
        summary.archive.size_bytes,
        summary.failures.len()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    let args = Args::parse_args();
    if let Some(dir) = &args.font_dir {
        // Read once when the font database is first loaded.
        std::env::set_var(FONT_DIR_ENV, dir);
    }

    let services = build_services(&args)?;

    match args.command.clone().unwrap_or(Command::Serve) {
        Command::Serve => {
            run_server(args.host, args.port, services, &args.output_root).await?;
        }
        Command::Export {
            no_annotations,
            group_by_area,
        } => {
            let request = ExportRequest {
                include_annotations: !no_annotations,
                group_by_area,
                photo_ids: None,
            };
            tokio::task::spawn_blocking(move || export_once(&services, request)).await??;
        }
    }

    Ok(())
}
