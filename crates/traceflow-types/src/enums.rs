//! Enumeration types for the supply-chain model.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Tiers
// ---------------------------------------------------------------------------

/// Position of an actor in the supply chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Producer selling raw coffee.
    Farmer,
    /// Intermediary buying from farmers and selling to exporters.
    Middleman,
    /// Export channel buying from middlemen.
    Exporter,
}

impl Tier {
    /// All tiers, lowest first.
    pub const ALL: [Self; 3] = [Self::Farmer, Self::Middleman, Self::Exporter];

    /// Storage representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Farmer => "farmer",
            Self::Middleman => "middleman",
            Self::Exporter => "exporter",
        }
    }

    /// Parse the storage representation.
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == value)
    }
}

impl core::fmt::Display for Tier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Relationships
// ---------------------------------------------------------------------------

/// The kind of a [`RelationshipEdge`](crate::RelationshipEdge).
///
/// The first two kinds carry volume. `MiddlemanGeography` only determines
/// which middlemen a farmer may sell to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// Farmer (source) sells to middleman (target).
    FarmerMiddleman,
    /// Middleman (source) sells to exporter (target).
    MiddlemanExporter,
    /// Middleman (source) operates in geography (target).
    MiddlemanGeography,
}

impl RelationKind {
    /// All relationship kinds.
    pub const ALL: [Self; 3] = [
        Self::FarmerMiddleman,
        Self::MiddlemanExporter,
        Self::MiddlemanGeography,
    ];

    /// Storage representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FarmerMiddleman => "farmer_middleman",
            Self::MiddlemanExporter => "middleman_exporter",
            Self::MiddlemanGeography => "middleman_geography",
        }
    }

    /// Parse the storage representation.
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == value)
    }
}

impl core::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Geography
// ---------------------------------------------------------------------------

/// Dominant coffee variety of a geography.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimaryCrop {
    /// At least 80% arabica.
    Arabica,
    /// At most 20% arabica.
    Robusta,
    /// Anything in between.
    Mixed,
}

impl PrimaryCrop {
    /// Every crop class.
    pub const ALL: [Self; 3] = [Self::Arabica, Self::Robusta, Self::Mixed];

    /// Storage name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Arabica => "arabica",
            Self::Robusta => "robusta",
            Self::Mixed => "mixed",
        }
    }

    /// Parse a storage name.
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == value)
    }

    /// Classify a geography from the arabica share of its production.
    pub fn from_arabica_share(share: f64) -> Self {
        if share >= 0.8 {
            Self::Arabica
        } else if share <= 0.2 {
            Self::Robusta
        } else {
            Self::Mixed
        }
    }
}
