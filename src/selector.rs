use rand::Rng;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum SelectError {
    #[error("The track catalog is empty")]
    EmptyCatalog,
}

/// A track the player may choose, with its declared energy in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub energy: f64,
}

impl CatalogEntry {
    pub fn new(id: impl Into<String>, energy: f64) -> Self {
        Self {
            id: id.into(),
            energy,
        }
    }
}

/// Immutable, ordered set of selectable tracks.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Uniformly random entry, avoiding `exclude` unless it is the only one.
    pub fn random_pick<R: Rng>(
        &self,
        rng: &mut R,
        exclude: Option<&str>,
    ) -> Result<&CatalogEntry, SelectError> {
        let candidates: Vec<&CatalogEntry> = self
            .entries
            .iter()
            .filter(|e| Some(e.id.as_str()) != exclude)
            .collect();

        if candidates.is_empty() {
            return self.entries.first().ok_or(SelectError::EmptyCatalog);
        }
        Ok(candidates[rng.gen_range(0..candidates.len())])
    }
}

/// The entry whose energy is closest to `mood`; the first one wins ties.
pub fn select(mood: f64, catalog: &Catalog) -> Result<&CatalogEntry, SelectError> {
    let mut best: Option<(&CatalogEntry, f64)> = None;
    for entry in catalog.entries() {
        let distance = (entry.energy - mood).abs();
        if best.is_none_or(|(_, d)| distance < d) {
            best = Some((entry, distance));
        }
    }
    best.map(|(entry, _)| entry).ok_or(SelectError::EmptyCatalog)
}
