//! Core entity structs: countries, geographies, actors, edges and flows.

use serde::{Deserialize, Serialize};

use crate::enums::{PrimaryCrop, RelationKind, Tier};
use crate::ids::{CountryId, ExporterId, FarmerId, GeographyId, MiddlemanId};

// ---------------------------------------------------------------------------
// Country and geography
// ---------------------------------------------------------------------------

/// A producing country and its immutable simulation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Country {
    /// Country code.
    pub id: CountryId,
    /// Display name.
    pub name: String,
    /// Annual national production in kg.
    pub total_production_kg: u64,
    /// Number of farmers across all geographies.
    pub num_farmers: u32,
    /// Number of middlemen in the country.
    pub num_middlemen: u32,
    /// Number of exporters in the country.
    pub num_exporters: u32,
    /// Upper bound on active middleman partners per farmer.
    pub max_buyers_per_farmer: u32,
    /// Upper bound on active exporter partners per middleman.
    pub max_exporters_per_middleman: u32,
    /// Log-normal sigma of farmer production.
    pub farmer_production_sigma: f64,
    /// Log-normal sigma of middleman capacity.
    pub middleman_capacity_sigma: f64,
    /// Pareto shape of exporter size.
    pub exporter_pareto_alpha: f64,
    /// Base yearly probability that a disloyal farmer switches a middleman.
    pub farmer_switch_rate: f64,
    /// Base yearly probability that a disloyal middleman switches an exporter.
    pub middleman_switch_rate: f64,
    /// Base yearly probability that a disloyal middleman moves geography.
    pub geography_switch_rate: f64,
    /// Yearly volume (kg) to route through the privileged export channel.
    pub exports_to_eu_kg: u64,
    /// Fraction of an exporter's supplying middlemen treated as traceable.
    pub traceability_rate: f64,
}

/// A sub-national production region. Farmer populations are disjoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geography {
    /// Geography id, unique within the country.
    pub id: GeographyId,
    /// Display name.
    pub name: String,
    /// Owning country.
    pub country_id: CountryId,
    /// Producing area that groups neighbouring geographies.
    pub producing_area: String,
    /// Number of farmers to generate in this region.
    pub num_farmers: u32,
    /// Annual production of the region in kg.
    pub total_production_kg: u64,
    /// Dominant variety.
    pub primary_crop: PrimaryCrop,
}

// ---------------------------------------------------------------------------
// Actors
// ---------------------------------------------------------------------------

/// A coffee producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Farmer {
    /// Farmer id.
    pub id: FarmerId,
    /// Owning country.
    pub country_id: CountryId,
    /// Geography the farmer produces in.
    pub geography_id: GeographyId,
    /// Number of plots (1 to 3).
    pub num_plots: u8,
    /// Annual production in kg.
    pub production_kg: u64,
    /// Propensity to keep existing buyers, in `[0, 1]`.
    pub loyalty: f64,
}

/// An intermediary buyer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Middleman {
    /// Middleman id.
    pub id: MiddlemanId,
    /// Owning country.
    pub country_id: CountryId,
    /// Draw weight when farmers pick buyers. Sums to 1 per country.
    pub competitiveness: f64,
    /// Propensity to keep existing partners, in `[0, 1]`.
    pub loyalty: f64,
}

/// An export channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exporter {
    /// Exporter id.
    pub id: ExporterId,
    /// Owning country.
    pub country_id: CountryId,
    /// Draw weight when middlemen pick exporters. Sums to 1 per country.
    pub competitiveness: f64,
    /// Preference for the privileged (EU) channel, in `[0, 1]`.
    pub eu_preference: f64,
    /// Propensity to keep existing partners, in `[0, 1]`.
    pub loyalty: f64,
}

/// Any supply-chain actor, tagged by tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tier", rename_all = "snake_case")]
pub enum Actor {
    /// Lowest tier.
    Farmer(Farmer),
    /// Intermediate tier.
    Middleman(Middleman),
    /// Top tier.
    Exporter(Exporter),
}

impl Actor {
    /// The actor's tier.
    pub const fn tier(&self) -> Tier {
        match self {
            Self::Farmer(_) => Tier::Farmer,
            Self::Middleman(_) => Tier::Middleman,
            Self::Exporter(_) => Tier::Exporter,
        }
    }

    /// The actor's id as a string slice.
    pub fn id(&self) -> &str {
        match self {
            Self::Farmer(f) => f.id.as_str(),
            Self::Middleman(m) => m.id.as_str(),
            Self::Exporter(e) => e.id.as_str(),
        }
    }

    /// The owning country.
    pub const fn country_id(&self) -> &CountryId {
        match self {
            Self::Farmer(f) => &f.country_id,
            Self::Middleman(m) => &m.country_id,
            Self::Exporter(e) => &e.country_id,
        }
    }

    /// The actor's loyalty.
    pub const fn loyalty(&self) -> f64 {
        match self {
            Self::Farmer(f) => f.loyalty,
            Self::Middleman(m) => m.loyalty,
            Self::Exporter(e) => e.loyalty,
        }
    }

    /// Unwrap a farmer.
    pub fn into_farmer(self) -> Option<Farmer> {
        match self {
            Self::Farmer(f) => Some(f),
            _ => None,
        }
    }

    /// Unwrap a middleman.
    pub fn into_middleman(self) -> Option<Middleman> {
        match self {
            Self::Middleman(m) => Some(m),
            _ => None,
        }
    }

    /// Unwrap an exporter.
    pub fn into_exporter(self) -> Option<Exporter> {
        match self {
            Self::Exporter(e) => Some(e),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Relationships and flows
// ---------------------------------------------------------------------------

/// A trading (or eligibility) relationship valid over a span of years.
///
/// The edge is active in year `y` when `start_year <= y` and `end_year` is
/// `None` or greater than `y`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelationshipEdge {
    /// What the edge connects.
    pub kind: RelationKind,
    /// Owning country.
    pub country_id: CountryId,
    /// Lower-tier endpoint (farmer or middleman id).
    pub source_id: String,
    /// Upper-tier endpoint (middleman, exporter or geography id).
    pub target_id: String,
    /// First year the edge is active.
    pub start_year: u32,
    /// Year the edge was ended, if any.
    pub end_year: Option<u32>,
}

impl RelationshipEdge {
    /// Whether the edge is active in `year`.
    pub fn is_active_in(&self, year: u32) -> bool {
        self.start_year <= year && self.end_year.is_none_or(|end| end > year)
    }
}

/// One year's volume moved along a farmer → middleman → exporter path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TradeFlow {
    /// Simulation year.
    pub year: u32,
    /// Owning country.
    pub country_id: CountryId,
    /// Producing farmer.
    pub farmer_id: FarmerId,
    /// Buying middleman.
    pub middleman_id: MiddlemanId,
    /// Exporting channel.
    pub exporter_id: ExporterId,
    /// Volume in kg.
    pub amount_kg: u64,
    /// Whether this volume is sold through the privileged channel.
    pub sold_to_privileged_channel: bool,
}

/// An exporter's privileged-channel allocation for one year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivilegedExport {
    /// Simulation year.
    pub year: u32,
    /// Owning country.
    pub country_id: CountryId,
    /// Exporter receiving the allocation.
    pub exporter_id: ExporterId,
    /// Allocated volume in kg.
    pub volume_kg: u64,
    /// Sorted, unique farmers reachable through the traceable middlemen.
    pub traceable_farmer_ids: Vec<FarmerId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(start_year: u32, end_year: Option<u32>) -> RelationshipEdge {
        RelationshipEdge {
            kind: RelationKind::FarmerMiddleman,
            country_id: CountryId::new("BR"),
            source_id: "BR_G001_F000001".to_owned(),
            target_id: "BR_M000001".to_owned(),
            start_year,
            end_year,
        }
    }

    #[test]
    fn open_edge_is_active_from_start_year() {
        let e = edge(2, None);
        assert!(!e.is_active_in(1));
        assert!(e.is_active_in(2));
        assert!(e.is_active_in(40));
    }

    #[test]
    fn ended_edge_is_inactive_from_end_year() {
        let e = edge(0, Some(3));
        assert!(e.is_active_in(2));
        assert!(!e.is_active_in(3));
    }

    #[test]
    fn actor_accessors_follow_the_tag() {
        let actor = Actor::Middleman(Middleman {
            id: MiddlemanId::new("BR_M000001"),
            country_id: CountryId::new("BR"),
            competitiveness: 0.25,
            loyalty: 0.75,
        });
        assert_eq!(actor.tier(), Tier::Middleman);
        assert_eq!(actor.id(), "BR_M000001");
        assert!((actor.loyalty() - 0.75).abs() < f64::EPSILON);
        assert!(actor.clone().into_farmer().is_none());
        assert!(actor.into_middleman().is_some());
    }

    #[test]
    fn actor_serializes_with_tier_tag() {
        let actor = Actor::Exporter(Exporter {
            id: ExporterId::new("BR_E000001"),
            country_id: CountryId::new("BR"),
            competitiveness: 1.0,
            eu_preference: 0.5,
            loyalty: 0.5,
        });
        let json = serde_json::to_value(&actor).unwrap_or_default();
        assert_eq!(json.get("tier").and_then(|v| v.as_str()), Some("exporter"));
    }
}
