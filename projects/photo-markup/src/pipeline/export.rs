// Export pipeline
//
// One photo at a time: fetch, render (or fall back to a clean copy), write to
// the job workspace and drop the buffer. The archive is assembled from disk
// once every photo is written, then handed to the archive sink.

use crate::annotation::parse_annotation_value;
use crate::job_context::{JobMetadata, JobWorkspace};
use crate::pipeline::archive::{write_archive, ArchiveEntry};
use crate::pipeline::canonical::{canonicalize, RenderOptions};
use crate::pipeline::manifest::{ManifestRow, ManifestWriter, MANIFEST_FILE};
use crate::pipeline::naming::{original_extension, sanitize_area, ExportNamer};
use crate::pipeline::render::AnnotationRenderer;
use crate::pipeline::types::{ArchiveLocation, RenderError, RenderFailure};
use crate::provider::{ArchiveSink, PhotoPayload, PhotoProvider, PhotoRecord};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

pub const FAILURES_FILE: &str = "render_failures.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportRequest {
    pub include_annotations: bool,
    pub group_by_area: bool,
    /// Restricts the export to these photos, in provider order.
    pub photo_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
    pub job_id: String,
    pub photo_count: usize,
    pub failures: Vec<RenderFailure>,
    pub archive: ArchiveLocation,
}

/// Collaborators an export job needs, shared by every job in the process.
pub struct ExportServices {
    pub provider: Arc<dyn PhotoProvider>,
    pub renderer: Arc<AnnotationRenderer>,
    pub sink: Arc<dyn ArchiveSink>,
    pub scratch_root: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhotoProgress {
    pub processed: usize,
    pub total: usize,
    pub failed: usize,
    pub elapsed_ms: f64,
}

/// Receives a callback after every photo written to the workspace.
pub trait ExportProgress {
    fn on_photo(&mut self, progress: &PhotoProgress);
}

impl<F> ExportProgress for F
where
    F: FnMut(&PhotoProgress),
{
    fn on_photo(&mut self, progress: &PhotoProgress) {
        self(progress)
    }
}

struct PhotoOutput {
    bytes: Vec<u8>,
    extension: String,
    failure: Option<String>,
}

fn render_annotated(
    renderer: &AnnotationRenderer,
    payload: &PhotoPayload,
) -> Result<Vec<u8>, RenderError> {
    let data = payload
        .annotation
        .as_ref()
        .map(parse_annotation_value)
        .transpose()?;
    renderer.render_photo(&payload.bytes, data.as_ref(), &RenderOptions::full())
}

/// Never fails: annotated render, then clean copy, then the original bytes.
fn export_photo(
    renderer: &AnnotationRenderer,
    record: &PhotoRecord,
    payload: PhotoPayload,
    include_annotations: bool,
) -> PhotoOutput {
    let mut failure = None;

    if include_annotations {
        match render_annotated(renderer, &payload) {
            Ok(bytes) => {
                return PhotoOutput {
                    bytes,
                    extension: "jpg".to_string(),
                    failure: None,
                }
            }
            Err(e) => {
                tracing::warn!(
                    "Annotated render failed for {} ({}): {}, writing clean image",
                    record.id,
                    record.filename,
                    e
                );
                failure = Some(e.to_string());
            }
        }
    }

    match canonicalize(&payload.bytes, &RenderOptions::full()) {
        Ok(bytes) => PhotoOutput {
            bytes,
            extension: "jpg".to_string(),
            failure,
        },
        Err(e) => {
            tracing::warn!(
                "Clean render failed for {} ({}): {}, writing original bytes",
                record.id,
                record.filename,
                e
            );
            PhotoOutput {
                bytes: payload.bytes,
                extension: original_extension(&record.filename),
                failure: failure.or_else(|| Some(e.to_string())),
            }
        }
    }
}

fn select_photos(all: Vec<PhotoRecord>, photo_ids: Option<&[String]>) -> Vec<PhotoRecord> {
    let Some(ids) = photo_ids else {
        return all;
    };
    let selected: Vec<PhotoRecord> = all.into_iter().filter(|p| ids.contains(&p.id)).collect();
    if selected.len() < ids.len() {
        tracing::warn!(
            "{} of {} requested photos were not found",
            ids.len() - selected.len(),
            ids.len()
        );
    }
    selected
}

pub fn run_export<P>(
    services: &ExportServices,
    job_id: &str,
    request: &ExportRequest,
    mut progress: P,
) -> Result<ExportSummary>
where
    P: ExportProgress,
{
    let photos = select_photos(
        services.provider.list_photos().context("Failed to list photos")?,
        request.photo_ids.as_deref(),
    );
    let total = photos.len();
    tracing::info!("Export {} started with {} photos", job_id, total);

    let workspace = JobWorkspace::create(&services.scratch_root, job_id)?;
    workspace.write_metadata(&JobMetadata {
        job_id: job_id.to_string(),
        created_at: chrono::Utc::now(),
        photo_count: total,
        include_annotations: request.include_annotations,
        group_by_area: request.group_by_area,
        workspace_dir: workspace.root.clone(),
    })?;

    let manifest_path = workspace.entry_path(MANIFEST_FILE);
    let mut manifest = ManifestWriter::create(&manifest_path)?;
    let mut namer = ExportNamer::new();
    let mut entries = Vec::with_capacity(total + 2);
    let mut failures = Vec::new();

    for (index, record) in photos.iter().enumerate() {
        let start = Instant::now();
        let payload = services
            .provider
            .fetch_photo(record)
            .with_context(|| format!("Failed to fetch photo {}", record.id))?;

        let output = export_photo(&services.renderer, record, payload, request.include_annotations);

        let file_name = format!("{}.{}", namer.next_name(record), output.extension);
        let entry_name = if request.group_by_area {
            format!("images/{}/{}", sanitize_area(record.meta.area.as_deref()), file_name)
        } else {
            format!("images/{}", file_name)
        };
        let path = workspace.write_entry(&entry_name, &output.bytes)?;
        drop(output.bytes);

        manifest.write_row(&ManifestRow {
            original_filename: &record.filename,
            exported_filename: &entry_name,
            area: record.meta.area.as_deref(),
            project: record.meta.project.as_deref(),
            timestamp: record.meta.captured_at,
            latitude: record.meta.latitude,
            longitude: record.meta.longitude,
            tags: &record.meta.tags,
        })?;
        entries.push(ArchiveEntry::new(entry_name, path));

        if let Some(error) = output.failure {
            failures.push(RenderFailure {
                photo_id: record.id.clone(),
                filename: record.filename.clone(),
                error,
            });
        }

        progress.on_photo(&PhotoProgress {
            processed: index + 1,
            total,
            failed: failures.len(),
            elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
        });
    }

    manifest.finish()?;
    entries.push(ArchiveEntry::new(MANIFEST_FILE, manifest_path));

    if !failures.is_empty() {
        let path = workspace.write_entry(FAILURES_FILE, &serde_json::to_vec_pretty(&failures)?)?;
        entries.push(ArchiveEntry::new(FAILURES_FILE, path));
    }

    let archive_path = workspace.archive_path();
    let size = write_archive(&archive_path, &entries)?;
    tracing::info!("Export {} archive assembled ({} bytes)", job_id, size);

    let archive = services
        .sink
        .upload(&archive_path, job_id)
        .context("Failed to upload archive")?;
    std::fs::remove_file(&archive_path)?;

    tracing::info!(
        "Export {} finished: {} photos, {} render failures",
        job_id,
        total,
        failures.len()
    );

    Ok(ExportSummary {
        job_id: job_id.to_string(),
        photo_count: total,
        failures,
        archive,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::job_context::tests::scratch_dir;
    use crate::pipeline::canonical::tests::jpeg_fixture;
    use crate::pipeline::fonts::shared_font_database;
    use crate::pipeline::text::ApproximateTextMeasurer;
    use crate::provider::{DirectoryArchiveSink, DirectoryPhotoProvider};
    use std::fs::{self, File};
    use std::io::Read;
    use std::path::Path;
    use zip::ZipArchive;

    pub(crate) fn test_services(root: &Path) -> ExportServices {
        ExportServices {
            provider: Arc::new(DirectoryPhotoProvider::new(root.join("photos"))),
            renderer: Arc::new(AnnotationRenderer::new(
                Arc::new(ApproximateTextMeasurer::default()),
                shared_font_database(),
                "Arial",
            )),
            sink: Arc::new(DirectoryArchiveSink::new(root.join("out"))),
            scratch_root: root.join("scratch"),
        }
    }

    /// Three photos: two without annotations, one with a rectangle.
    pub(crate) fn seed_photos(root: &Path, corrupt_annotated: bool) {
        let photos = root.join("photos");
        fs::create_dir_all(&photos).unwrap();
        fs::write(photos.join("a.jpg"), jpeg_fixture(64, 48)).unwrap();
        fs::write(photos.join("b.jpg"), jpeg_fixture(48, 64)).unwrap();
        let c_bytes = if corrupt_annotated {
            b"this is not an image".to_vec()
        } else {
            jpeg_fixture(80, 60)
        };
        fs::write(photos.join("c.jpg"), c_bytes).unwrap();

        fs::write(
            photos.join("c.annotations.json"),
            r#"{"rects":[{"x":0.1,"y":0.1,"width":0.5,"height":0.5}],"normalizedVersion":2}"#,
        )
        .unwrap();
        fs::write(
            photos.join("a.meta.json"),
            r#"{"area":"Kitchen","locationType":"interior","tags":["a","b"]}"#,
        )
        .unwrap();
    }

    fn read_entry(archive: &mut ZipArchive<File>, name: &str) -> String {
        let mut content = String::new();
        archive
            .by_name(name)
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        content
    }

    fn image_entries(archive: &mut ZipArchive<File>) -> Vec<String> {
        let mut names: Vec<String> = archive
            .file_names()
            .filter(|n| n.starts_with("images/"))
            .map(str::to_string)
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_export_end_to_end() {
        let root = scratch_dir();
        seed_photos(&root, false);
        let services = test_services(&root);

        let mut seen = Vec::new();
        let request = ExportRequest {
            include_annotations: true,
            ..ExportRequest::default()
        };
        let summary = run_export(&services, "job-e2e", &request, |p: &PhotoProgress| {
            seen.push((p.processed, p.total))
        })
        .unwrap();

        assert_eq!(summary.photo_count, 3);
        assert!(summary.failures.is_empty());
        assert_eq!(seen, vec![(1, 3), (2, 3), (3, 3)]);
        assert_eq!(summary.archive.key, "exports/job-e2e.zip");

        let mut archive =
            ZipArchive::new(File::open(root.join("out/exports/job-e2e.zip")).unwrap()).unwrap();
        assert_eq!(
            image_entries(&mut archive),
            vec!["images/INT_001.jpg", "images/b.jpg", "images/c.jpg"]
        );
        assert!(archive.by_name(FAILURES_FILE).is_err());

        let manifest = read_entry(&mut archive, MANIFEST_FILE);
        assert_eq!(manifest.lines().count(), 4);
        assert!(manifest.contains("a.jpg,images/INT_001.jpg,Kitchen,,,,,a; b"));

        // Workspace is gone once the job returns.
        assert!(!root.join("scratch/job-e2e").exists());
        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn test_corrupt_photo_is_isolated() {
        let root = scratch_dir();
        seed_photos(&root, true);
        let services = test_services(&root);

        let request = ExportRequest {
            include_annotations: true,
            ..ExportRequest::default()
        };
        let summary = run_export(&services, "job-corrupt", &request, |_: &PhotoProgress| {}).unwrap();
        assert_eq!(summary.failures.len(), 1);

        let mut archive =
            ZipArchive::new(File::open(root.join("out/exports/job-corrupt.zip")).unwrap()).unwrap();
        assert_eq!(image_entries(&mut archive).len(), 3);

        let failures: Vec<RenderFailure> =
            serde_json::from_str(&read_entry(&mut archive, FAILURES_FILE)).unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].photo_id, "c.jpg");
        assert_eq!(failures[0].filename, "c.jpg");

        // Neither render worked, so the original bytes were archived.
        assert_eq!(read_entry(&mut archive, "images/c.jpg"), "this is not an image");
        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn test_bad_geometry_falls_back_to_clean_image() {
        let root = scratch_dir();
        seed_photos(&root, false);
        fs::write(
            root.join("photos/c.annotations.json"),
            r#"{"lines":[{"points":[0.1,0.2,0.3]}],"normalizedVersion":2}"#,
        )
        .unwrap();
        let services = test_services(&root);

        let request = ExportRequest {
            include_annotations: true,
            ..ExportRequest::default()
        };
        let summary = run_export(&services, "job-geometry", &request, |_: &PhotoProgress| {}).unwrap();
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].photo_id, "c.jpg");
        assert!(summary.failures[0].error.contains("line"), "{}", summary.failures[0].error);

        let mut archive =
            ZipArchive::new(File::open(root.join("out/exports/job-geometry.zip")).unwrap()).unwrap();
        let mut bytes = Vec::new();
        archive
            .by_name("images/c.jpg")
            .unwrap()
            .read_to_end(&mut bytes)
            .unwrap();
        let clean = image::load_from_memory(&bytes).unwrap();
        assert_eq!((clean.width(), clean.height()), (80, 60));

        let failures: Vec<RenderFailure> =
            serde_json::from_str(&read_entry(&mut archive, FAILURES_FILE)).unwrap();
        assert_eq!(failures, summary.failures);
        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn test_grouping_and_selection() {
        let root = scratch_dir();
        seed_photos(&root, false);
        let services = test_services(&root);

        let request = ExportRequest {
            include_annotations: false,
            group_by_area: true,
            photo_ids: Some(vec!["a.jpg".into(), "c.jpg".into(), "missing.jpg".into()]),
        };
        let summary = run_export(&services, "job-group", &request, |_: &PhotoProgress| {}).unwrap();
        assert_eq!(summary.photo_count, 2);

        let mut archive =
            ZipArchive::new(File::open(root.join("out/exports/job-group.zip")).unwrap()).unwrap();
        assert_eq!(
            image_entries(&mut archive),
            vec!["images/Kitchen/INT_001.jpg", "images/Unassigned/c.jpg"]
        );
        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn test_missing_photo_root_fails_the_job() {
        let root = scratch_dir();
        let services = test_services(&root);
        let result = run_export(&services, "job-none", &ExportRequest::default(), |_: &PhotoProgress| {});
        assert!(result.is_err());
        fs::remove_dir_all(root).unwrap();
    }
}
