//! Font resolution for text layers.
//!
//! Each [`FontFamily`] maps to one file in the fonts directory. Loading is
//! best-effort: a family whose file is missing or unreadable is logged and
//! left out, and [`FontBook::resolve`] falls back to Arial, then to the
//! built-in bitmap font.

use super::params::FontFamily;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use usvg::fontdb;

/// Where the glyphs for a text layer come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedFont {
    /// A loaded font file, addressed by its family name in the database.
    Face(String),
    /// The built-in bitmap font.
    Builtin,
}

/// Loaded font files keyed by family.
#[derive(Clone)]
pub struct FontBook {
    db: Arc<fontdb::Database>,
    families: HashMap<FontFamily, String>,
}

impl std::fmt::Debug for FontBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FontBook")
            .field("faces", &self.db.len())
            .field("families", &self.families)
            .finish()
    }
}

impl FontBook {
    /// A book with no font files. Every family resolves to the bitmap font.
    pub fn empty() -> Self {
        Self {
            db: Arc::new(fontdb::Database::new()),
            families: HashMap::new(),
        }
    }

    /// Load every family's file from `dir`.
    pub fn load(dir: &Path) -> Self {
        let mut db = fontdb::Database::new();
        let mut families = HashMap::new();

        for family in FontFamily::ALL {
            let path = dir.join(family.file_name());
            if let Err(e) = db.load_font_file(&path) {
                tracing::warn!(
                    font = family.as_str(),
                    path = %path.display(),
                    error = %e,
                    "font resource unavailable"
                );
                continue;
            }
            match family_name_for(&db, &path) {
                Some(name) => {
                    tracing::debug!(font = family.as_str(), family = %name, "font loaded");
                    families.insert(family, name);
                }
                None => tracing::warn!(
                    font = family.as_str(),
                    path = %path.display(),
                    "font file has no usable face"
                ),
            }
        }

        Self {
            db: Arc::new(db),
            families,
        }
    }

    /// Requested family, else Arial, else the bitmap font.
    pub fn resolve(&self, family: FontFamily) -> ResolvedFont {
        if let Some(name) = self.families.get(&family) {
            return ResolvedFont::Face(name.clone());
        }
        if family != FontFamily::Arial {
            tracing::warn!(
                font = family.as_str(),
                "font not loaded, falling back to arial"
            );
            if let Some(name) = self.families.get(&FontFamily::Arial) {
                return ResolvedFont::Face(name.clone());
            }
        }
        tracing::warn!(font = family.as_str(), "no font file available, using built-in font");
        ResolvedFont::Builtin
    }

    pub fn database(&self) -> Arc<fontdb::Database> {
        Arc::clone(&self.db)
    }

    pub fn loaded(&self) -> usize {
        self.families.len()
    }
}

/// Family name of the first face loaded from `path`.
fn family_name_for(db: &fontdb::Database, path: &Path) -> Option<String> {
    db.faces()
        .find(|face| source_path(&face.source).is_some_and(|p| p == path))
        .and_then(|face| face.families.first())
        .map(|(name, _)| name.clone())
}

fn source_path(source: &fontdb::Source) -> Option<PathBuf> {
    match source {
        fontdb::Source::File(p) => Some(p.clone()),
        fontdb::Source::SharedFile(p, _) => Some(p.clone()),
        fontdb::Source::Binary(_) => None,
    }
}
