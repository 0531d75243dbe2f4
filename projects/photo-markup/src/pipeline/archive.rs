// Streamed archive assembly
//
// Entries are copied from files already on disk so only one copy buffer is
// resident at a time. JPEG data is stored as-is; text entries are deflated.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveEntry {
    /// Path inside the archive, always `/`-separated.
    pub name: String,
    pub source: PathBuf,
}

impl ArchiveEntry {
    pub fn new(name: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
        }
    }
}

/// Already-compressed image data gains nothing from deflate.
pub fn compression_for(name: &str) -> CompressionMethod {
    let ext = Path::new(name)
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase());
    match ext.as_deref() {
        Some("jpg" | "jpeg" | "png") => CompressionMethod::Stored,
        _ => CompressionMethod::Deflated,
    }
}

/// Writes `entries` into a new ZIP at `dest`, in order. Returns the archive size.
pub fn write_archive(dest: &Path, entries: &[ArchiveEntry]) -> Result<u64> {
    let file = File::create(dest).with_context(|| format!("Failed to create archive {:?}", dest))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));

    for entry in entries {
        let options = SimpleFileOptions::default().compression_method(compression_for(&entry.name));
        zip.start_file(entry.name.as_str(), options)
            .with_context(|| format!("Failed to start archive entry {}", entry.name))?;
        let mut reader = BufReader::new(
            File::open(&entry.source)
                .with_context(|| format!("Failed to open {:?} for archiving", entry.source))?,
        );
        io::copy(&mut reader, &mut zip)
            .with_context(|| format!("Failed to write archive entry {}", entry.name))?;
    }

    let mut writer = zip.finish().context("Failed to finalize archive")?;
    io::Write::flush(&mut writer)?;
    drop(writer);

    Ok(std::fs::metadata(dest)?.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_context::tests::scratch_dir;
    use std::io::Read;
    use zip::ZipArchive;

    #[test]
    fn test_compression_choice() {
        assert_eq!(compression_for("images/INT_001.jpg"), CompressionMethod::Stored);
        assert_eq!(compression_for("images/scan.PNG"), CompressionMethod::Stored);
        assert_eq!(compression_for("manifest.csv"), CompressionMethod::Deflated);
        assert_eq!(compression_for("render_failures.json"), CompressionMethod::Deflated);
    }

    #[test]
    fn test_archive_streams_entries_from_disk() {
        let dir = scratch_dir();
        std::fs::write(dir.join("a.jpg"), b"not really a jpeg").unwrap();
        std::fs::write(dir.join("manifest.csv"), "a,b\n1,2\n").unwrap();

        let dest = dir.join("out.zip");
        let size = write_archive(
            &dest,
            &[
                ArchiveEntry::new("images/Kitchen/a.jpg", dir.join("a.jpg")),
                ArchiveEntry::new("manifest.csv", dir.join("manifest.csv")),
            ],
        )
        .unwrap();
        assert!(size > 0);

        let mut archive = ZipArchive::new(File::open(&dest).unwrap()).unwrap();
        assert_eq!(archive.len(), 2);
        {
            let image = archive.by_name("images/Kitchen/a.jpg").unwrap();
            assert_eq!(image.compression(), CompressionMethod::Stored);
        }
        let mut manifest = archive.by_name("manifest.csv").unwrap();
        assert_eq!(manifest.compression(), CompressionMethod::Deflated);
        let mut content = String::new();
        manifest.read_to_string(&mut content).unwrap();
        assert_eq!(content, "a,b\n1,2\n");
        std::fs::remove_dir_all(dir).unwrap();
    }
}
