use tracing::{debug, warn};

use crate::structures::{HashIndex, TreeIndex};
use crate::types::StationDescriptor;

/// Result of resolving a requested station set against the catalog.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Resolved descriptors, sorted by numeric station id.
    pub stations: Vec<StationDescriptor>,
    /// Requested identifiers with no matching station, in request order.
    pub unresolved: Vec<String>,
}

/// Read-only catalog of known stations, built once per run.
///
/// Backed by both indexing structures: the hash index serves point
/// resolution, the tree index serves sorted enumeration.
pub struct StationCatalog {
    by_id: HashIndex<String, StationDescriptor>,
    sorted: TreeIndex<u32, StationDescriptor>,
}

impl StationCatalog {
    pub fn from_descriptors<I>(descriptors: I) -> Self
    where
        I: IntoIterator<Item = StationDescriptor>,
    {
        let mut by_id = HashIndex::new();
        let mut sorted = TreeIndex::new();
        for station in descriptors {
            match station.numeric_id() {
                Some(key) => sorted.insert(key, station.clone()),
                None => {
                    // Still resolvable by exact id, just not enumerable in order
                    warn!(station_id = %station.id, "station id is not numeric; excluded from sorted listing");
                }
            }
            by_id.insert(station.id.clone(), station);
        }
        debug!(stations = by_id.len(), "station catalog built");
        Self { by_id, sorted }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Point lookup by exact identifier.
    pub fn get(&self, id: &str) -> Option<&StationDescriptor> {
        self.by_id.get(&id.to_string())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Every known identifier, including ids the sorted listing cannot carry.
    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.by_id.iter().map(|(id, _)| id)
    }

    /// All known stations, sorted by numeric id ascending.
    pub fn all_sorted(&self) -> Vec<StationDescriptor> {
        self.sorted
            .in_order()
            .into_iter()
            .map(|(_, station)| station.clone())
            .collect()
    }

    /// Resolves a requested identifier set. An empty request means "all
    /// known stations". Unknown identifiers are reported, not fatal.
    pub fn resolve(&self, requested: &[String]) -> Resolution {
        if requested.is_empty() {
            return Resolution {
                stations: self.all_sorted(),
                unresolved: Vec::new(),
            };
        }

        let mut stations = Vec::new();
        let mut unresolved = Vec::new();
        for id in requested {
            match self.get(id) {
                Some(station) => stations.push(station.clone()),
                None => {
                    warn!(station_id = %id, "requested station not in catalog");
                    unresolved.push(id.clone());
                }
            }
        }
        stations.sort_by_key(|s| s.numeric_id().unwrap_or(u32::MAX));
        stations.dedup_by(|a, b| a.id == b.id);
        Resolution {
            stations,
            unresolved,
        }
    }
}
