// Photo source and archive destination.
//
// The export pipeline only needs "bytes and annotations for a photo" and
// "put this archive somewhere"; both are traits so storage backends can be
// swapped. The directory implementations serve local deployments and tests.

use crate::pipeline::types::ArchiveLocation;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const ANNOTATION_SIDECAR_SUFFIX: &str = ".annotations.json";
pub const META_SIDECAR_SUFFIX: &str = ".meta.json";
const PHOTO_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Descriptive fields stored beside a photo.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PhotoMeta {
    pub area: Option<String>,
    pub project: Option<String>,
    /// Interior, exterior, vehicle, ...
    pub location_type: Option<String>,
    pub captured_at: Option<DateTime<Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub tags: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PhotoRecord {
    pub id: String,
    pub filename: String,
    #[serde(flatten)]
    pub meta: PhotoMeta,
    #[serde(skip)]
    pub path: PathBuf,
}

pub struct PhotoPayload {
    pub bytes: Vec<u8>,
    /// Stored annotation value exactly as persisted, possibly string-encoded.
    pub annotation: Option<Value>,
}

pub trait PhotoProvider: Send + Sync {
    fn list_photos(&self) -> Result<Vec<PhotoRecord>>;

    fn fetch_photo(&self, record: &PhotoRecord) -> Result<PhotoPayload>;

    fn find_photo(&self, id: &str) -> Result<Option<PhotoRecord>> {
        Ok(self.list_photos()?.into_iter().find(|p| p.id == id))
    }
}

pub trait ArchiveSink: Send + Sync {
    /// Takes a finished archive from local disk and stores it under the job id.
    fn upload(&self, local_zip: &Path, job_id: &str) -> Result<ArchiveLocation>;
}

/// Photos laid out as files under a root directory, with optional
/// `<stem>.annotations.json` and `<stem>.meta.json` sidecars.
pub struct DirectoryPhotoProvider {
    root: PathBuf,
}

impl DirectoryPhotoProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

fn is_photo(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| PHOTO_EXTENSIONS.contains(&s.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn sidecar_path(photo: &Path, suffix: &str) -> Option<PathBuf> {
    let stem = photo.file_stem()?.to_str()?;
    Some(photo.with_file_name(format!("{}{}", stem, suffix)))
}

/// Stable id from the root-relative path: `site-a/IMG_1.jpg` -> `site-a__IMG_1.jpg`.
fn photo_id(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("__")
}

fn read_meta(photo: &Path) -> PhotoMeta {
    let Some(path) = sidecar_path(photo, META_SIDECAR_SUFFIX) else {
        return PhotoMeta::default();
    };
    if !path.exists() {
        return PhotoMeta::default();
    }
    match fs::read_to_string(&path)
        .map_err(anyhow::Error::from)
        .and_then(|content| Ok(serde_json::from_str(&content)?))
    {
        Ok(meta) => meta,
        Err(e) => {
            tracing::warn!("Ignoring unreadable metadata sidecar {:?}: {}", path, e);
            PhotoMeta::default()
        }
    }
}

impl PhotoProvider for DirectoryPhotoProvider {
    fn list_photos(&self) -> Result<Vec<PhotoRecord>> {
        if !self.root.is_dir() {
            return Err(anyhow::anyhow!("Photo root {:?} is not a directory", self.root));
        }

        let photos = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| is_photo(e.path()))
            .map(|e| {
                let path = e.path().to_path_buf();
                PhotoRecord {
                    id: photo_id(&self.root, &path),
                    filename: e.file_name().to_string_lossy().into_owned(),
                    meta: read_meta(&path),
                    path,
                }
            })
            .collect();

        Ok(photos)
    }

    fn fetch_photo(&self, record: &PhotoRecord) -> Result<PhotoPayload> {
        let bytes = fs::read(&record.path)
            .with_context(|| format!("Failed to read photo {:?}", record.path))?;

        let annotation = match sidecar_path(&record.path, ANNOTATION_SIDECAR_SUFFIX) {
            Some(path) if path.exists() => {
                let raw = fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read annotations {:?}", path))?;
                // Unparseable text is handed on as a string so ingestion reports it per photo.
                Some(serde_json::from_str(&raw).unwrap_or(Value::String(raw)))
            }
            _ => None,
        };

        Ok(PhotoPayload { bytes, annotation })
    }
}

/// Stores archives under `<output_root>/exports/<job_id>.zip`.
pub struct DirectoryArchiveSink {
    output_root: PathBuf,
}

pub const EXPORTS_DIR: &str = "exports";

impl DirectoryArchiveSink {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
        }
    }
}

impl ArchiveSink for DirectoryArchiveSink {
    fn upload(&self, local_zip: &Path, job_id: &str) -> Result<ArchiveLocation> {
        let dir = self.output_root.join(EXPORTS_DIR);
        fs::create_dir_all(&dir)?;
        let key = format!("{}/{}.zip", EXPORTS_DIR, job_id);
        let dest = self.output_root.join(&key);
        let size_bytes = fs::copy(local_zip, &dest)
            .with_context(|| format!("Failed to upload archive to {:?}", dest))?;
        tracing::info!("Uploaded archive for job {} to {:?}", job_id, dest);
        Ok(ArchiveLocation { key, size_bytes })
    }
}
