//! Market Data
//!
//! Loads per-station buy and sell offers from the external data source
//! into immutable in-memory indices, and enumerates the profitable trades
//! between a pair of stations.

use crate::galaxy::{Galaxy, ItemId, StationId};
use crate::CalcError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Raw offer row as supplied by the data source.
///
/// Negative unit counts encode "unknown"; `modified` is seconds since the
/// Unix epoch, kept as text because the source does not guarantee it.
#[derive(Debug, Clone, Deserialize)]
pub struct StationItem {
    pub station: StationId,
    pub item: ItemId,
    pub modified: Option<String>,
    pub dmd_price: i64,
    pub dmd_units: i64,
    pub dmd_level: i32,
    pub sup_price: i64,
    pub sup_units: i64,
    pub sup_level: i32,
}

/// One side of a station's market for a single item.
#[derive(Debug, Clone, Serialize)]
pub struct Offer {
    pub item: ItemId,
    pub price: i64,
    /// Units on offer (selling) or wanted (buying); None = unknown.
    pub units: Option<u32>,
    pub level: i32,
    pub age_s: i64,
}

/// Row filters applied while loading offers.
#[derive(Debug, Clone, Default)]
pub struct LoadFilter {
    pub max_age_days: Option<f64>,
    pub min_supply: u32,
    pub min_demand: u32,
    pub avoid_items: HashSet<ItemId>,
    pub restrict_items: Option<HashSet<ItemId>>,
}

/// A profitable, directional exchange of one item between two stations.
#[derive(Debug, Clone, Serialize)]
pub struct Trade {
    pub item: ItemId,
    /// Purchase price per unit at the source.
    pub cost_cr: i64,
    /// Sale price at the destination minus `cost_cr`; always positive.
    pub gain_cr: i64,
    pub supply_units: Option<u32>,
    pub supply_level: i32,
    pub demand_units: Option<u32>,
    pub demand_level: i32,
    pub src_age_s: i64,
    pub dst_age_s: i64,
}

/// Per-station selling and buying offers, built once at construction and
/// immutable for the lifetime of a search.
#[derive(Debug, Clone, Default)]
pub struct OfferIndex {
    selling: HashMap<StationId, Vec<Offer>>,
    buying: HashMap<StationId, Vec<Offer>>,
}

impl OfferIndex {
    /// Consume the offer rows and build the selling/buying indices.
    ///
    /// Selling entries require a positive price and a non-zero unit count;
    /// buying entries require a positive price. A positive minimum supply
    /// or demand threshold also rejects offers with unknown units.
    pub fn build(
        galaxy: &Galaxy,
        rows: impl IntoIterator<Item = StationItem>,
        now: DateTime<Utc>,
        filter: &LoadFilter,
    ) -> Result<Self, CalcError> {
        let allowed = load_set(galaxy, filter)?;
        let now_s = now.timestamp();
        let max_age_s = filter.max_age_days.map(|days| (days * 86_400.0) as i64);

        let mut index = OfferIndex::default();
        let mut sell_count = 0usize;
        let mut buy_count = 0usize;

        for row in rows {
            if let Some(allowed) = &allowed {
                if !allowed.contains(&row.item) {
                    continue;
                }
            }

            let epoch = row
                .modified
                .as_deref()
                .and_then(|raw| raw.parse::<i64>().ok())
                .ok_or_else(|| CalcError::BadTimestamp {
                    station: row.station,
                    item: row.item,
                    raw: row.modified.clone().unwrap_or_default(),
                })?;
            let age_s = now_s - epoch;
            if let Some(max_age_s) = max_age_s {
                if age_s > max_age_s {
                    continue;
                }
            }

            if row.dmd_price > 0 && (filter.min_demand == 0 || row.dmd_units >= filter.min_demand as i64)
            {
                index.buying.entry(row.station).or_default().push(Offer {
                    item: row.item,
                    price: row.dmd_price,
                    units: known_units(row.dmd_units),
                    level: row.dmd_level,
                    age_s,
                });
                buy_count += 1;
            }
            if row.sup_price > 0
                && row.sup_units != 0
                && (filter.min_supply == 0 || row.sup_units >= filter.min_supply as i64)
            {
                index.selling.entry(row.station).or_default().push(Offer {
                    item: row.item,
                    price: row.sup_price,
                    units: known_units(row.sup_units),
                    level: row.sup_level,
                    age_s,
                });
                sell_count += 1;
            }
        }

        debug!(buys = buy_count, sells = sell_count, "loaded offers");
        Ok(index)
    }

    /// Offers the station sells to the player, in source row order.
    pub fn selling(&self, station: StationId) -> Option<&[Offer]> {
        self.selling.get(&station).map(|v| v.as_slice())
    }

    /// Offers the station buys from the player, in source row order.
    pub fn buying(&self, station: StationId) -> Option<&[Offer]> {
        self.buying.get(&station).map(|v| v.as_slice())
    }

    /// Enumerate profitable trades from `src` to `dst`.
    ///
    /// Returns None when either side has no offers at all. The result is
    /// sorted by gain descending, then cost ascending, so callers can feed
    /// it straight into the fit solvers.
    pub fn trades(
        &self,
        src: StationId,
        dst: StationId,
        src_selling: Option<&[Offer]>,
        min_gain: i64,
        max_gain: i64,
    ) -> Option<Vec<Trade>> {
        let selling = match src_selling {
            Some(offers) => offers,
            None => self.selling(src)?,
        };
        if selling.is_empty() {
            return None;
        }
        let buying = self.buying(dst)?;
        if buying.is_empty() {
            return None;
        }

        // Selling is usually the smaller list; index the buy side by item.
        let buy_by_item: HashMap<ItemId, &Offer> =
            buying.iter().map(|offer| (offer.item, offer)).collect();

        let mut trading = Vec::new();
        for sell in selling {
            let Some(buy) = buy_by_item.get(&sell.item) else {
                continue;
            };
            let gain_cr = buy.price - sell.price;
            if gain_cr >= min_gain && gain_cr <= max_gain {
                trading.push(Trade {
                    item: sell.item,
                    cost_cr: sell.price,
                    gain_cr,
                    supply_units: sell.units,
                    supply_level: sell.level,
                    demand_units: buy.units,
                    demand_level: buy.level,
                    src_age_s: sell.age_s,
                    dst_age_s: buy.age_s,
                });
            }
        }

        trading.sort_by(|a, b| b.gain_cr.cmp(&a.gain_cr).then(a.cost_cr.cmp(&b.cost_cr)));
        Some(trading)
    }
}

fn known_units(raw: i64) -> Option<u32> {
    if raw < 0 {
        None
    } else {
        Some(raw as u32)
    }
}

/// Resolve the avoid/restrict item sets to the set of loadable items.
/// None means every item loads.
fn load_set(galaxy: &Galaxy, filter: &LoadFilter) -> Result<Option<HashSet<ItemId>>, CalcError> {
    if filter.restrict_items.is_none() && filter.avoid_items.is_empty() {
        return Ok(None);
    }
    let allowed: HashSet<ItemId> = match &filter.restrict_items {
        Some(restrict) => restrict
            .iter()
            .copied()
            .filter(|id| !filter.avoid_items.contains(id))
            .collect(),
        None => galaxy
            .items()
            .map(|item| item.id)
            .filter(|id| !filter.avoid_items.contains(id))
            .collect(),
    };
    if allowed.is_empty() {
        return Err(CalcError::NoItemsToLoad);
    }
    Ok(Some(allowed))
}
