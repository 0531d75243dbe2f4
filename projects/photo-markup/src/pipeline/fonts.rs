// Process-wide font database shared by text measurement and rasterization.
//
// Loaded once on first use and read-only afterwards, so layout and drawing
// always resolve the same faces.

use std::path::Path;
use std::sync::Arc;
use usvg::fontdb::{Database, Family, Query};

/// Directory with extra font files, loaded on top of the system fonts.
pub const FONT_DIR_ENV: &str = "PHOTO_MARKUP_FONT_DIR";

lazy_static::lazy_static! {
    static ref SHARED_FONTS: Arc<Database> = Arc::new(load_font_database());
}

fn load_font_database() -> Database {
    let mut db = Database::new();
    db.load_system_fonts();

    if let Ok(dir) = std::env::var(FONT_DIR_ENV) {
        let dir = Path::new(&dir);
        if dir.is_dir() {
            db.load_fonts_dir(dir);
        } else {
            tracing::warn!("{} points at {:?}, which is not a directory", FONT_DIR_ENV, dir);
        }
    }

    // The generic sans-serif family defaults to "Arial"; point it at whatever
    // is installed so the fallback in the family chain always resolves.
    let sans_query = Query {
        families: &[Family::SansSerif],
        ..Query::default()
    };
    if db.query(&sans_query).is_none() {
        let first_family = db
            .faces()
            .find_map(|face| face.families.first().map(|(name, _)| name.clone()));
        if let Some(family) = first_family {
            tracing::info!("No default sans-serif face, falling back to {}", family);
            db.set_sans_serif_family(family);
        }
    }

    tracing::info!("Loaded font database with {} faces", db.len());
    db
}

pub fn shared_font_database() -> Arc<Database> {
    SHARED_FONTS.clone()
}

/// CSS family list used everywhere text is drawn: the configured primary face,
/// then the generic sans-serif fallback.
pub fn font_family_chain(primary: &str) -> String {
    let primary = primary.trim().trim_matches(|c| c == '"' || c == '\'');
    if primary.is_empty() || primary.eq_ignore_ascii_case("sans-serif") {
        return "sans-serif".to_string();
    }
    format!("'{}', sans-serif", primary.replace('\'', ""))
}

/// Parser options bound to the shared font database.
pub fn svg_options(fonts: &Arc<Database>, primary: &str) -> usvg::Options<'static> {
    let mut opt = usvg::Options::default();
    opt.font_family = primary.trim().to_string();
    opt.fontdb = fonts.clone();
    opt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_font_family_chain() {
        assert_eq!(font_family_chain("Arial"), "'Arial', sans-serif");
        assert_eq!(font_family_chain(" \"Inter\" "), "'Inter', sans-serif");
        assert_eq!(font_family_chain(""), "sans-serif");
        assert_eq!(font_family_chain("sans-serif"), "sans-serif");
    }
}
