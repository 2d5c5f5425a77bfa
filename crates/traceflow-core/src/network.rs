//! Typed view of a country's active relationships in one year.
//!
//! Stored edges are untyped `(kind, source, target)` strings. [`Network`]
//! groups them into ordered adjacency sets per kind so every traversal is
//! deterministic. [`Network::diff`] turns a before/after pair into the
//! edges to end and the edges to create. [`CountryActors`] bundles the
//! records every engine stage reads.

use std::collections::{BTreeMap, BTreeSet};

use traceflow_types::{
    CountryId, Exporter, ExporterId, Farmer, FarmerId, Geography, GeographyId, Middleman,
    MiddlemanId, RelationKind, RelationshipEdge,
};

/// Every region and actor of one country, each list sorted by id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CountryActors {
    /// Production regions.
    pub geographies: Vec<Geography>,
    /// Farmers of all regions.
    pub farmers: Vec<Farmer>,
    /// Middlemen.
    pub middlemen: Vec<Middleman>,
    /// Exporters.
    pub exporters: Vec<Exporter>,
}

impl CountryActors {
    /// Sort every list by id so iteration order is stable.
    pub fn sorted(mut self) -> Self {
        self.geographies.sort_by(|a, b| a.id.cmp(&b.id));
        self.farmers.sort_by(|a, b| a.id.cmp(&b.id));
        self.middlemen.sort_by(|a, b| a.id.cmp(&b.id));
        self.exporters.sort_by(|a, b| a.id.cmp(&b.id));
        self
    }
}

/// Active relationship sets keyed by the lower-tier endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Network {
    /// Farmer → middlemen it sells to.
    pub farmer_middlemen: BTreeMap<FarmerId, BTreeSet<MiddlemanId>>,
    /// Middleman → exporters it sells to.
    pub middleman_exporters: BTreeMap<MiddlemanId, BTreeSet<ExporterId>>,
    /// Middleman → geographies it buys in.
    pub middleman_geographies: BTreeMap<MiddlemanId, BTreeSet<GeographyId>>,
}

/// One relationship without its lifetime.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeKey {
    /// Relationship kind.
    pub kind: RelationKind,
    /// Lower-tier endpoint.
    pub source_id: String,
    /// Upper-tier endpoint.
    pub target_id: String,
}

/// Edges to end and edges to create when moving between two networks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkDelta {
    /// Edges present before but not after.
    pub ended: Vec<EdgeKey>,
    /// Edges present after but not before.
    pub created: Vec<EdgeKey>,
}

impl NetworkDelta {
    /// Number of created edges of `kind`.
    pub fn created_of(&self, kind: RelationKind) -> usize {
        self.created.iter().filter(|e| e.kind == kind).count()
    }
}

impl Network {
    /// Build the view from stored edges. Inactive-ness is the caller's
    /// concern; every edge passed in is treated as active.
    pub fn from_edges<'a>(edges: impl IntoIterator<Item = &'a RelationshipEdge>) -> Self {
        let mut network = Self::default();
        for edge in edges {
            network.insert(&EdgeKey::of(edge));
        }
        network
    }

    /// Add one edge.
    pub fn insert(&mut self, key: &EdgeKey) {
        let source = key.source_id.as_str();
        let target = key.target_id.as_str();
        match key.kind {
            RelationKind::FarmerMiddleman => {
                self.farmer_middlemen
                    .entry(FarmerId::from(source))
                    .or_default()
                    .insert(MiddlemanId::from(target));
            }
            RelationKind::MiddlemanExporter => {
                self.middleman_exporters
                    .entry(MiddlemanId::from(source))
                    .or_default()
                    .insert(ExporterId::from(target));
            }
            RelationKind::MiddlemanGeography => {
                self.middleman_geographies
                    .entry(MiddlemanId::from(source))
                    .or_default()
                    .insert(GeographyId::from(target));
            }
        }
    }

    /// Every edge as an [`EdgeKey`], ordered by kind, source and target.
    pub fn edge_keys(&self) -> BTreeSet<EdgeKey> {
        let mut keys = BTreeSet::new();
        collect_keys(
            &mut keys,
            RelationKind::FarmerMiddleman,
            &self.farmer_middlemen,
        );
        collect_keys(
            &mut keys,
            RelationKind::MiddlemanExporter,
            &self.middleman_exporters,
        );
        collect_keys(
            &mut keys,
            RelationKind::MiddlemanGeography,
            &self.middleman_geographies,
        );
        keys
    }

    /// Whether the network has no edges at all.
    pub fn is_empty(&self) -> bool {
        self.farmer_middlemen.values().all(BTreeSet::is_empty)
            && self.middleman_exporters.values().all(BTreeSet::is_empty)
            && self.middleman_geographies.values().all(BTreeSet::is_empty)
    }

    /// Geography → middlemen operating there.
    pub fn geography_middlemen(&self) -> BTreeMap<GeographyId, BTreeSet<MiddlemanId>> {
        let mut out: BTreeMap<GeographyId, BTreeSet<MiddlemanId>> = BTreeMap::new();
        for (middleman, geographies) in &self.middleman_geographies {
            for geography in geographies {
                out.entry(geography.clone())
                    .or_default()
                    .insert(middleman.clone());
            }
        }
        out
    }

    /// Middleman → farmers selling to it.
    pub fn middleman_farmers(&self) -> BTreeMap<MiddlemanId, BTreeSet<FarmerId>> {
        let mut out: BTreeMap<MiddlemanId, BTreeSet<FarmerId>> = BTreeMap::new();
        for (farmer, middlemen) in &self.farmer_middlemen {
            for middleman in middlemen {
                out.entry(middleman.clone())
                    .or_default()
                    .insert(farmer.clone());
            }
        }
        out
    }

    /// Edges to end and create to turn `self` into `next`.
    pub fn diff(&self, next: &Self) -> NetworkDelta {
        let before = self.edge_keys();
        let after = next.edge_keys();
        NetworkDelta {
            ended: before.difference(&after).cloned().collect(),
            created: after.difference(&before).cloned().collect(),
        }
    }

    /// Materialize every edge as a new stored edge starting in `year`.
    pub fn to_edges(&self, country: &CountryId, year: u32) -> Vec<RelationshipEdge> {
        self.edge_keys()
            .into_iter()
            .map(|key| key.into_edge(country, year))
            .collect()
    }
}

impl EdgeKey {
    /// The key of a stored edge.
    pub fn of(edge: &RelationshipEdge) -> Self {
        Self {
            kind: edge.kind,
            source_id: edge.source_id.clone(),
            target_id: edge.target_id.clone(),
        }
    }

    /// A new active edge starting in `year`.
    pub fn into_edge(self, country: &CountryId, year: u32) -> RelationshipEdge {
        RelationshipEdge {
            kind: self.kind,
            country_id: country.clone(),
            source_id: self.source_id,
            target_id: self.target_id,
            start_year: year,
            end_year: None,
        }
    }
}

fn collect_keys<S, T>(keys: &mut BTreeSet<EdgeKey>, kind: RelationKind, map: &BTreeMap<S, BTreeSet<T>>)
where
    S: AsRef<str>,
    T: AsRef<str>,
{
    for (source, targets) in map {
        for target in targets {
            keys.insert(EdgeKey {
                kind,
                source_id: source.as_ref().to_owned(),
                target_id: target.as_ref().to_owned(),
            });
        }
    }
}
