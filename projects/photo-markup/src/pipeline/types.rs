use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

/// Why a single photo could not be rendered with its annotations.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("annotation payload is malformed: {0}")]
    Annotation(#[from] crate::annotation::AnnotationParseError),
    #[error("invalid geometry in {kind} #{index}: {reason}")]
    Geometry {
        kind: &'static str,
        index: usize,
        reason: String,
    },
    #[error("failed to build annotation overlay: {0}")]
    Overlay(#[from] usvg::Error),
    #[error("cannot allocate a {0}x{1} overlay")]
    Allocation(u32, u32),
}

/// Entry of `render_failures.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RenderFailure {
    pub photo_id: String,
    pub filename: String,
    pub error: String,
}

/// Where a finished archive ended up.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArchiveLocation {
    /// Path relative to the output root, usable as a download URL suffix.
    pub key: String,
    pub size_bytes: u64,
}

/// Export job state shared between the job thread and progress readers.
#[derive(Debug)]
pub struct ExportState {
    pub job_id: String,
    pub created_at: DateTime<Utc>,
    pub total_photos: AtomicUsize,
    pub processed_photos: AtomicUsize,
    pub failed_renders: AtomicUsize,
    pub is_active: AtomicBool,
    pub is_complete: AtomicBool,
    pub error: RwLock<Option<String>>,
    pub archive: RwLock<Option<ArchiveLocation>>,
    /// Average milliseconds per photo
    pub ms_per_photo: RwLock<f64>,
    pub start_time: std::time::Instant,
}

impl ExportState {
    pub fn new(job_id: String) -> Self {
        Self {
            job_id,
            created_at: Utc::now(),
            total_photos: AtomicUsize::new(0),
            processed_photos: AtomicUsize::new(0),
            failed_renders: AtomicUsize::new(0),
            is_active: AtomicBool::new(true),
            is_complete: AtomicBool::new(false),
            error: RwLock::new(None),
            archive: RwLock::new(None),
            ms_per_photo: RwLock::new(0.0),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn record_photo(&self, processed: usize, total: usize, failed: usize, ms: f64) {
        self.total_photos.store(total, Ordering::Relaxed);
        self.processed_photos.store(processed, Ordering::Relaxed);
        self.failed_renders.store(failed, Ordering::Relaxed);
        if let Ok(mut avg) = self.ms_per_photo.write() {
            // Simple exponential moving average for smoothing durations
            if *avg == 0.0 {
                *avg = ms;
            } else {
                *avg = *avg * 0.9 + ms * 0.1;
            }
        }
    }

    pub fn mark_complete(&self, archive: ArchiveLocation) {
        if let Ok(mut slot) = self.archive.write() {
            *slot = Some(archive);
        }
        self.is_complete.store(true, Ordering::Relaxed);
        self.is_active.store(false, Ordering::Relaxed);
    }

    pub fn mark_failed(&self, message: String) {
        if let Ok(mut slot) = self.error.write() {
            *slot = Some(message);
        }
        self.is_active.store(false, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        !self.is_active.load(Ordering::Relaxed)
    }

    pub fn to_progress_json(&self) -> serde_json::Value {
        let error = self.error.read().ok().and_then(|e| e.clone());
        let archive = self.archive.read().ok().and_then(|a| a.clone());
        let ms_per_photo = self.ms_per_photo.read().map(|v| *v).unwrap_or(0.0);

        serde_json::json!({
            "job_id": self.job_id,
            "created_at": self.created_at,
            "total_photos": self.total_photos.load(Ordering::Relaxed),
            "processed_photos": self.processed_photos.load(Ordering::Relaxed),
            "failed_renders": self.failed_renders.load(Ordering::Relaxed),
            "is_active": self.is_active.load(Ordering::Relaxed),
            "is_complete": self.is_complete.load(Ordering::Relaxed),
            "error": error,
            "archive": archive,
            "ms_per_photo": ms_per_photo,
            "elapsed_secs": self.start_time.elapsed().as_secs_f64(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_lifecycle() {
        let state = ExportState::new("job-1".to_string());
        assert!(!state.is_finished());

        state.record_photo(1, 3, 0, 100.0);
        state.record_photo(2, 3, 1, 200.0);
        let json = state.to_progress_json();
        assert_eq!(json["processed_photos"], 2);
        assert_eq!(json["failed_renders"], 1);
        assert!((json["ms_per_photo"].as_f64().unwrap() - 110.0).abs() < 1e-9);

        state.mark_complete(ArchiveLocation {
            key: "exports/job-1.zip".into(),
            size_bytes: 42,
        });
        let json = state.to_progress_json();
        assert!(state.is_finished());
        assert_eq!(json["is_complete"], true);
        assert_eq!(json["archive"]["key"], "exports/job-1.zip");
    }

    #[test]
    fn test_failed_state_carries_message() {
        let state = ExportState::new("job-2".to_string());
        state.mark_failed("disk full".to_string());
        let json = state.to_progress_json();
        assert!(state.is_finished());
        assert_eq!(json["is_complete"], false);
        assert_eq!(json["error"], "disk full");
    }

    #[test]
    fn test_failure_record_uses_camel_case() {
        let failure = RenderFailure {
            photo_id: "p1".into(),
            filename: "INT_001.jpg".into(),
            error: "boom".into(),
        };
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["photoId"], "p1");
    }
}
