//! Cargo Fit Solvers
//!
//! Given an ordered list of candidate trades, pick the manifest with the
//! best total gain under budget, hold capacity and per-item limits. Two
//! implementations share one signature: an exact recursive reference used
//! for validation, and the fast branch-and-keep production solver.

use crate::market::Trade;
use serde::Serialize;
use std::cmp::Ordering;

/// The cargo manifest carried on one hop.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TradeLoad {
    pub items: Vec<(Trade, u32)>,
    pub gain_cr: i64,
    pub cost_cr: i64,
    pub units: u32,
}

impl TradeLoad {
    pub fn empty() -> TradeLoad {
        TradeLoad::default()
    }

    pub fn is_empty(&self) -> bool {
        self.units == 0
    }

    /// Gain per ton carried; 0 for an empty load.
    pub fn gpt(&self) -> i64 {
        if self.units > 0 {
            self.gain_cr / self.units as i64
        } else {
            0
        }
    }

    /// Quality ordering, best first: gain DESC, then units ASC, then cost ASC.
    pub fn compare(&self, other: &TradeLoad) -> Ordering {
        other
            .gain_cr
            .cmp(&self.gain_cr)
            .then(self.units.cmp(&other.units))
            .then(self.cost_cr.cmp(&other.cost_cr))
    }
}

/// Fit strategy: (trades, credits, capacity, per-item cap) -> manifest.
///
/// The trade list must be ordered by gain descending, cost ascending, as
/// produced by the trade enumerator.
pub type FitFunction = fn(&[Trade], i64, u32, u32) -> TradeLoad;

/// Exact reference solver: enumerates every quantity assignment.
///
/// Exponential in the number of trades considered; kept for validating
/// the fast solver, not for production searches.
pub fn brute_force_fit(items: &[Trade], credits: i64, capacity: u32, max_units: u32) -> TradeLoad {
    exact_combos(items, 0, credits, capacity, max_units)
}

fn exact_combos(items: &[Trade], offset: usize, cr: i64, cap: u32, max_units: u32) -> TradeLoad {
    if cr <= 0 || cap == 0 {
        return TradeLoad::empty();
    }
    let mut offset = offset;
    let (item, max_qty) = loop {
        if offset >= items.len() {
            return TradeLoad::empty();
        }
        let item = &items[offset];
        offset += 1;
        let ceiling = (max_units.min(cap) as i64).min(cr / item.cost_cr);
        if ceiling <= 0 {
            continue;
        }
        let mut max_qty = ceiling as u32;
        if let Some(supply) = item.supply_units {
            // Supply only tightens the ceiling when it is known-positive.
            if supply > 0 && supply < max_qty {
                max_qty = supply;
            }
        }
        if max_qty > 0 {
            break (item, max_qty);
        }
    };

    // Best load that skips this item entirely.
    let mut best = exact_combos(items, offset, cr, cap, max_units);

    for qty in 1..=max_qty {
        let load_gain = item.gain_cr * qty as i64;
        let load_cost = item.cost_cr * qty as i64;
        let sub = exact_combos(items, offset, cr - load_cost, cap - qty, max_units);
        let comb_gain = load_gain + sub.gain_cr;
        if comb_gain < best.gain_cr {
            continue;
        }
        let comb_cost = load_cost + sub.cost_cr;
        let comb_units = qty + sub.units;
        if comb_gain == best.gain_cr {
            if comb_units > best.units {
                continue;
            }
            if comb_units == best.units && comb_cost >= best.cost_cr {
                continue;
            }
        }
        let mut comb_items = vec![(item.clone(), qty)];
        comb_items.extend(sub.items);
        best = TradeLoad {
            items: comb_items,
            gain_cr: comb_gain,
            cost_cr: comb_cost,
            units: comb_units,
        };
    }

    best
}

/// Fast branch-and-keep solver.
///
/// At each offset it takes the maximum affordable quantity of the current
/// item and recurses for the remaining hold; a full hold of a single item
/// ends the scan because no later item out-gains it per unit.
pub fn fast_fit(items: &[Trade], credits: i64, capacity: u32, max_units: u32) -> TradeLoad {
    fast_combos(items, 0, credits, capacity, max_units)
}

fn fast_combos(items: &[Trade], offset: usize, cr: i64, cap: u32, max_units: u32) -> TradeLoad {
    let mut best_gain: i64 = -1;
    let mut best_cost: i64 = 0;
    let mut best_item: Option<usize> = None;
    let mut best_qty: u32 = 0;
    let mut best_sub: Option<TradeLoad> = None;

    let qty_ceil = max_units.min(cap);

    for i in offset..items.len() {
        let item = &items[i];
        let ceiling = (qty_ceil as i64).min(cr / item.cost_cr);
        if ceiling <= 0 {
            continue;
        }
        let mut max_qty = ceiling as u32;
        if let Some(supply) = item.supply_units {
            if supply > 0 && supply < max_qty {
                max_qty = supply;
            }
        }

        let load_gain = item.gain_cr * max_qty as i64;
        let load_cost = item.cost_cr * max_qty as i64;

        if max_qty == cap {
            // Full hold of this item; the list is sorted by gain
            // descending, so nothing further along can beat it.
            if load_gain > best_gain {
                best_gain = load_gain;
                best_cost = load_cost;
                best_item = Some(i);
                best_qty = max_qty;
                best_sub = None;
            }
            break;
        }

        if load_gain > best_gain {
            best_gain = load_gain;
            best_cost = load_cost;
            best_item = Some(i);
            best_qty = max_qty;
            best_sub = None;
        }

        let cr_left = cr - load_cost;
        let cap_left = cap - max_qty;
        if cr_left > 0 && cap_left > 0 {
            // Solve for the remaining credits and capacity with what
            // follows the item we just took.
            let sub = fast_combos(items, i + 1, cr_left, cap_left, max_units);
            if sub.is_empty() {
                continue;
            }
            let ttl_gain = load_gain + sub.gain_cr;
            if ttl_gain < best_gain {
                continue;
            }
            let ttl_cost = load_cost + sub.cost_cr;
            if ttl_gain == best_gain && ttl_cost >= best_cost {
                continue;
            }
            best_gain = ttl_gain;
            best_cost = ttl_cost;
            best_item = Some(i);
            best_qty = max_qty;
            best_sub = Some(sub);
        }
    }

    let Some(best_idx) = best_item else {
        return TradeLoad::empty();
    };

    let mut load_items = vec![(items[best_idx].clone(), best_qty)];
    let mut units = best_qty;
    if let Some(sub) = best_sub {
        units += sub.units;
        load_items.extend(sub.items);
    }
    TradeLoad {
        items: load_items,
        gain_cr: best_gain,
        cost_cr: best_cost,
        units,
    }
}
