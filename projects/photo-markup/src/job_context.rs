use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const METADATA_FILE: &str = "metadata.json";
pub const IMAGES_DIR: &str = "images";
const ARCHIVE_FILE: &str = "archive.zip";

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct JobMetadata {
    pub job_id: String,
    pub created_at: DateTime<Utc>,
    pub photo_count: usize,
    pub include_annotations: bool,
    pub group_by_area: bool,
    #[serde(skip)]
    pub workspace_dir: PathBuf,
}

/// Scratch directory owned by one export job, removed when dropped.
#[derive(Debug)]
pub struct JobWorkspace {
    pub job_id: String,
    pub root: PathBuf,
}

impl JobWorkspace {
    pub fn create(scratch_root: &Path, job_id: &str) -> Result<Self> {
        let root = scratch_root.join(job_id);
        if root.exists() {
            return Err(anyhow::anyhow!(
                "Workspace already exists for job: {}",
                job_id
            ));
        }

        fs::create_dir_all(root.join(IMAGES_DIR))
            .with_context(|| format!("Failed to create job workspace at {:?}", root))?;

        Ok(Self {
            job_id: job_id.to_string(),
            root,
        })
    }

    pub fn write_metadata(&self, metadata: &JobMetadata) -> Result<()> {
        let content = serde_json::to_string_pretty(metadata)?;
        fs::write(self.root.join(METADATA_FILE), content)?;
        Ok(())
    }

    /// Absolute path for an archive-relative entry name such as `images/INT_001.jpg`.
    pub fn entry_path(&self, entry_name: &str) -> PathBuf {
        self.root.join(entry_name)
    }

    /// Writes one archive entry to disk, creating parent folders as needed.
    pub fn write_entry(&self, entry_name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.entry_path(entry_name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes).with_context(|| format!("Failed to write {:?}", path))?;
        Ok(path)
    }

    pub fn archive_path(&self) -> PathBuf {
        self.root.join(ARCHIVE_FILE)
    }
}

impl Drop for JobWorkspace {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.root) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove job workspace {:?}: {}", self.root, e);
            }
        }
    }
}

/// Workspaces left behind by a previous process (killed before drop ran).
pub fn list_workspaces(scratch_root: &Path) -> Result<Vec<JobMetadata>> {
    let mut workspaces = Vec::new();

    if !scratch_root.exists() {
        return Ok(workspaces);
    }

    for entry in fs::read_dir(scratch_root)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            let metadata_path = path.join(METADATA_FILE);
            if metadata_path.exists() {
                let content = fs::read_to_string(metadata_path)?;
                let mut metadata: JobMetadata = serde_json::from_str(&content)?;
                metadata.workspace_dir = path.clone();
                workspaces.push(metadata);
            }
        }
    }

    Ok(workspaces)
}

pub fn remove_stale_workspaces(scratch_root: &Path) -> Result<usize> {
    let stale = list_workspaces(scratch_root)?;
    for metadata in &stale {
        tracing::info!(
            "Removing stale workspace for job {} created at {}",
            metadata.job_id,
            metadata.created_at
        );
        fs::remove_dir_all(&metadata.workspace_dir)?;
    }
    Ok(stale.len())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("photo-markup-test-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn metadata(job_id: &str) -> JobMetadata {
        JobMetadata {
            job_id: job_id.to_string(),
            created_at: Utc::now(),
            photo_count: 3,
            include_annotations: true,
            group_by_area: false,
            workspace_dir: PathBuf::new(),
        }
    }

    #[test]
    fn test_workspace_removed_on_drop() {
        let scratch = scratch_dir();
        let root = {
            let ws = JobWorkspace::create(&scratch, "job-a").unwrap();
            ws.write_metadata(&metadata("job-a")).unwrap();
            let written = ws.write_entry("images/Kitchen/INT_001.jpg", b"jpeg").unwrap();
            assert!(written.exists());
            assert!(JobWorkspace::create(&scratch, "job-a").is_err());
            ws.root.clone()
        };
        assert!(!root.exists());
        fs::remove_dir_all(scratch).unwrap();
    }

    #[test]
    fn test_workspace_removed_on_panic() {
        let scratch = scratch_dir();
        let root = scratch.join("job-panic");
        let result = std::panic::catch_unwind(|| {
            let _ws = JobWorkspace::create(&scratch, "job-panic").unwrap();
            panic!("render blew up");
        });
        assert!(result.is_err());
        assert!(!root.exists());
        fs::remove_dir_all(scratch).unwrap();
    }

    #[test]
    fn test_stale_workspaces_are_swept() {
        let scratch = scratch_dir();
        let ws = JobWorkspace::create(&scratch, "job-old").unwrap();
        ws.write_metadata(&metadata("job-old")).unwrap();
        // Simulate a crash: the guard never runs.
        std::mem::forget(ws);

        let listed = list_workspaces(&scratch).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].job_id, "job-old");

        assert_eq!(remove_stale_workspaces(&scratch).unwrap(), 1);
        assert!(!scratch.join("job-old").exists());
        fs::remove_dir_all(scratch).unwrap();
    }
}
