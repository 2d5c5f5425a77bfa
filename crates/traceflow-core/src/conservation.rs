//! Post-materialization invariant checks.
//!
//! Every placed farmer's flows must sum to its production, the flagged
//! volume must equal the allocated privileged volume and no actor may exceed
//! its degree bound. Any violation fails the country-year.

use std::collections::{BTreeMap, BTreeSet};

use traceflow_types::{Country, Farmer, FarmerId, TradeFlow};

use crate::error::CoreError;
use crate::network::Network;

/// Tolerance for volume checks, in kg.
pub const TOLERANCE_KG: u64 = 1;

/// Check a materialized year against its inputs.
pub fn check_year(
    country: &Country,
    year: u32,
    farmers: &[Farmer],
    unplaced: &BTreeSet<FarmerId>,
    network: &Network,
    flows: &[TradeFlow],
    expected_flagged_kg: u64,
) -> Result<(), CoreError> {
    let fail = |detail: String| CoreError::Consistency {
        country: country.id.clone(),
        year,
        detail,
    };

    let mut per_farmer: BTreeMap<&FarmerId, u64> = BTreeMap::new();
    let mut flagged = 0_u64;
    for flow in flows {
        if flow.amount_kg == 0 {
            return Err(fail(format!(
                "zero-volume flow {} -> {} -> {}",
                flow.farmer_id, flow.middleman_id, flow.exporter_id
            )));
        }
        *per_farmer.entry(&flow.farmer_id).or_insert(0) += flow.amount_kg;
        if flow.sold_to_privileged_channel {
            flagged += flow.amount_kg;
        }
    }

    for farmer in farmers {
        if unplaced.contains(&farmer.id) {
            continue;
        }
        let sold = per_farmer.get(&farmer.id).copied().unwrap_or(0);
        if sold.abs_diff(farmer.production_kg) > TOLERANCE_KG {
            return Err(fail(format!(
                "farmer {} sold {sold} kg of {} kg produced",
                farmer.id, farmer.production_kg
            )));
        }
    }

    if flagged.abs_diff(expected_flagged_kg) > TOLERANCE_KG {
        return Err(fail(format!(
            "flagged {flagged} kg, expected {expected_flagged_kg} kg"
        )));
    }

    let max_buyers = country.max_buyers_per_farmer as usize;
    if let Some((farmer, middlemen)) = network
        .farmer_middlemen
        .iter()
        .find(|(_, ms)| ms.len() > max_buyers)
    {
        return Err(fail(format!(
            "farmer {farmer} has {} middlemen, limit {max_buyers}",
            middlemen.len()
        )));
    }
    let max_exporters = country.max_exporters_per_middleman as usize;
    if let Some((middleman, exporters)) = network
        .middleman_exporters
        .iter()
        .find(|(_, es)| es.len() > max_exporters)
    {
        return Err(fail(format!(
            "middleman {middleman} has {} exporters, limit {max_exporters}",
            exporters.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use traceflow_types::{CountryId, ExporterId, GeographyId, MiddlemanId};

    use super::*;
    use crate::config::CountryConfig;

    fn country() -> Country {
        CountryConfig::with_defaults("BR").to_country()
    }

    fn farmer(id: &str, production_kg: u64) -> Farmer {
        Farmer {
            id: FarmerId::new(id),
            country_id: CountryId::new("BR"),
            geography_id: GeographyId::new("BR_G001"),
            num_plots: 1,
            production_kg,
            loyalty: 0.5,
        }
    }

    fn flow(farmer: &str, amount_kg: u64, flagged: bool) -> TradeFlow {
        TradeFlow {
            year: 0,
            country_id: CountryId::new("BR"),
            farmer_id: FarmerId::new(farmer),
            middleman_id: MiddlemanId::new("M1"),
            exporter_id: ExporterId::new("E1"),
            amount_kg,
            sold_to_privileged_channel: flagged,
        }
    }

    #[test]
    fn consistent_year_passes() {
        let farmers = vec![farmer("F1", 100), farmer("F2", 50)];
        let flows = vec![flow("F1", 60, true), flow("F1", 40, false), flow("F2", 50, false)];
        let result = check_year(
            &country(),
            0,
            &farmers,
            &BTreeSet::new(),
            &Network::default(),
            &flows,
            60,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn missing_volume_is_a_violation() {
        let farmers = vec![farmer("F1", 100)];
        let flows = vec![flow("F1", 90, false)];
        let result = check_year(
            &country(),
            2,
            &farmers,
            &BTreeSet::new(),
            &Network::default(),
            &flows,
            0,
        );
        assert!(matches!(result, Err(CoreError::Consistency { year: 2, .. })));
    }

    #[test]
    fn unplaced_farmers_are_exempt() {
        let farmers = vec![farmer("F1", 100)];
        let unplaced = BTreeSet::from([FarmerId::new("F1")]);
        let result = check_year(&country(), 0, &farmers, &unplaced, &Network::default(), &[], 0);
        assert!(result.is_ok());
    }

    #[test]
    fn flagged_total_must_match() {
        let farmers = vec![farmer("F1", 100)];
        let flows = vec![flow("F1", 100, true)];
        let result = check_year(
            &country(),
            0,
            &farmers,
            &BTreeSet::new(),
            &Network::default(),
            &flows,
            40,
        );
        assert!(result.is_err());
    }

    #[test]
    fn degree_bound_is_enforced() {
        let mut c = country();
        c.max_buyers_per_farmer = 1;
        let mut network = Network::default();
        network.farmer_middlemen.insert(
            FarmerId::new("F1"),
            BTreeSet::from([MiddlemanId::new("M1"), MiddlemanId::new("M2")]),
        );
        let result = check_year(&c, 0, &[], &BTreeSet::new(), &network, &[], 0);
        assert!(result.is_err());
    }
}
