// Export file naming
//
// Photos with a location type get sequential per-type names (INT_001,
// EXT_001, VEH_001, ...); the rest keep a sanitized copy of their original
// stem. Every name is unique within one export batch.

use crate::provider::PhotoRecord;
use std::collections::{HashMap, HashSet};
use std::path::Path;

pub const UNASSIGNED_AREA: &str = "Unassigned";
const FALLBACK_STEM: &str = "photo";

/// Prefix for a location type, `None` when the type carries no usable letters.
pub fn location_prefix(location_type: &str) -> Option<String> {
    let normalized = location_type.trim().to_lowercase();
    let prefix = match normalized.as_str() {
        "interior" | "int" | "inside" => "INT".to_string(),
        "exterior" | "ext" | "outside" => "EXT".to_string(),
        "vehicle" | "veh" | "car" => "VEH".to_string(),
        other => other
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .take(3)
            .collect::<String>()
            .to_uppercase(),
    };
    (!prefix.is_empty()).then_some(prefix)
}

/// Keeps ASCII letters, digits, `-` and `_`; everything else becomes `_`.
pub fn sanitize_component(input: &str) -> String {
    let replaced: String = input
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let mut collapsed = String::with_capacity(replaced.len());
    for c in replaced.chars() {
        if c == '_' && collapsed.ends_with('_') {
            continue;
        }
        collapsed.push(c);
    }
    collapsed.trim_matches('_').to_string()
}

/// Folder name for grouping by area.
pub fn sanitize_area(area: Option<&str>) -> String {
    let cleaned = area.map(sanitize_component).unwrap_or_default();
    if cleaned.is_empty() {
        UNASSIGNED_AREA.to_string()
    } else {
        cleaned
    }
}

#[derive(Debug, Default)]
pub struct ExportNamer {
    counters: HashMap<String, usize>,
    used: HashSet<String>,
}

impl ExportNamer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unique base name (no extension) for the next photo in the batch.
    pub fn next_name(&mut self, record: &PhotoRecord) -> String {
        let base = match record.meta.location_type.as_deref().and_then(location_prefix) {
            Some(prefix) => {
                let seq = self.counters.entry(prefix.clone()).or_insert(0);
                *seq += 1;
                format!("{}_{:03}", prefix, seq)
            }
            None => {
                let stem = Path::new(&record.filename)
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .map(sanitize_component)
                    .unwrap_or_default();
                if stem.is_empty() {
                    FALLBACK_STEM.to_string()
                } else {
                    stem
                }
            }
        };
        self.claim(base)
    }

    fn claim(&mut self, base: String) -> String {
        if self.used.insert(base.to_lowercase()) {
            return base;
        }
        let mut n = 1;
        loop {
            let candidate = format!("{}_{:02}", base, n);
            if self.used.insert(candidate.to_lowercase()) {
                return candidate;
            }
            n += 1;
        }
    }
}

/// Extension for a raw passthrough of the original bytes.
pub fn original_extension(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
        .filter(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "jpg".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::PhotoMeta;
    use std::path::PathBuf;

    fn record(filename: &str, location_type: Option<&str>) -> PhotoRecord {
        PhotoRecord {
            id: filename.to_string(),
            filename: filename.to_string(),
            meta: PhotoMeta {
                location_type: location_type.map(str::to_string),
                ..PhotoMeta::default()
            },
            path: PathBuf::from(filename),
        }
    }

    #[test]
    fn test_per_type_counters() {
        let mut namer = ExportNamer::new();
        assert_eq!(namer.next_name(&record("a.jpg", Some("Interior"))), "INT_001");
        assert_eq!(namer.next_name(&record("b.jpg", Some("exterior"))), "EXT_001");
        assert_eq!(namer.next_name(&record("c.jpg", Some("interior"))), "INT_002");
        assert_eq!(namer.next_name(&record("d.jpg", Some("Vehicle"))), "VEH_001");
        assert_eq!(namer.next_name(&record("e.jpg", Some("roof space"))), "ROO_001");
    }

    #[test]
    fn test_stems_are_sanitized_and_deduplicated() {
        let mut namer = ExportNamer::new();
        assert_eq!(namer.next_name(&record("IMG 0001 (copy).jpg", None)), "IMG_0001_copy");
        assert_eq!(namer.next_name(&record("IMG_0001_copy.png", None)), "IMG_0001_copy_01");
        assert_eq!(namer.next_name(&record("img_0001_COPY.jpg", Some(" "))), "img_0001_COPY_02");
        assert_eq!(namer.next_name(&record("???.jpg", None)), "photo");
    }

    #[test]
    fn test_type_names_do_not_collide_with_stems() {
        let mut namer = ExportNamer::new();
        assert_eq!(namer.next_name(&record("INT_001.jpg", None)), "INT_001");
        assert_eq!(namer.next_name(&record("x.jpg", Some("int"))), "INT_001_01");
    }

    #[test]
    fn test_area_and_extension_helpers() {
        assert_eq!(sanitize_area(Some("Living room / North")), "Living_room_North");
        assert_eq!(sanitize_area(Some("  ")), UNASSIGNED_AREA);
        assert_eq!(sanitize_area(None), UNASSIGNED_AREA);
        assert_eq!(original_extension("scan.PNG"), "png");
        assert_eq!(original_extension("noext"), "jpg");
    }
}
