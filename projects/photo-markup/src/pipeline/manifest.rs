use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use std::fs::File;
use std::path::Path;

pub const MANIFEST_FILE: &str = "manifest.csv";
pub const MANIFEST_HEADER: [&str; 8] = [
    "original_filename",
    "exported_filename",
    "area",
    "project",
    "timestamp",
    "latitude",
    "longitude",
    "tags",
];

pub struct ManifestRow<'a> {
    pub original_filename: &'a str,
    /// Archive-relative path of the exported image.
    pub exported_filename: &'a str,
    pub area: Option<&'a str>,
    pub project: Option<&'a str>,
    pub timestamp: Option<DateTime<Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub tags: &'a [String],
}

impl ManifestRow<'_> {
    fn to_record(&self) -> [String; 8] {
        let opt = |v: Option<f64>| v.map(|v| v.to_string()).unwrap_or_default();
        [
            self.original_filename.to_string(),
            self.exported_filename.to_string(),
            self.area.unwrap_or_default().to_string(),
            self.project.unwrap_or_default().to_string(),
            self.timestamp
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
                .unwrap_or_default(),
            opt(self.latitude),
            opt(self.longitude),
            self.tags.join("; "),
        ]
    }
}

/// Streams manifest rows to disk as photos are exported.
pub struct ManifestWriter {
    writer: csv::Writer<File>,
    rows: usize,
}

impl ManifestWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(MANIFEST_HEADER)?;
        Ok(Self { writer, rows: 0 })
    }

    pub fn write_row(&mut self, row: &ManifestRow) -> Result<()> {
        self.writer.write_record(row.to_record())?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    /// Flushes and returns the number of data rows written.
    pub fn finish(mut self) -> Result<usize> {
        self.writer.flush()?;
        Ok(self.rows)
    }
}
