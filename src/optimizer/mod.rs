//! Route Optimizer
//!
//! The hop-expansion search: extends a frontier of partial routes by one
//! trading hop each, scoring candidate destinations and keeping the best
//! route per destination station.

use crate::fit::{fast_fit, FitFunction, TradeLoad};
use crate::galaxy::{
    Destination, DestinationQuery, DestinationSource, Galaxy, ItemId, Marker, PadSize, Place,
    StationId, SystemId,
};
use crate::market::{LoadFilter, Offer, OfferIndex, StationItem, Trade};
use crate::CalcError;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Floor for goal-distance denominators, against float underflow.
const MIN_GOAL_DIST_LY: f64 = 1e-9;

/// Search parameters: fit constraints, load filters, destination filters
/// and expander policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    /// Credits in hand at the first station.
    pub credits: i64,
    /// Cargo hold size in tons.
    pub capacity: u32,
    /// Per-item quantity cap; 0 means the full hold.
    pub limit: u32,
    /// Flat reserve deducted from spendable credits.
    pub insurance: i64,
    /// Fraction of projected gain held back when reinvesting (0.0 - 1.0).
    pub margin: f64,
    pub min_gain_per_ton: i64,
    pub max_gain_per_ton: Option<i64>,
    /// Discard offers older than this many days at load time.
    pub max_age_days: Option<f64>,
    #[serde(alias = "supply")]
    pub min_supply: u32,
    #[serde(alias = "demand")]
    pub min_demand: u32,
    pub avoid_items: HashSet<ItemId>,
    pub restrict_items: Option<HashSet<ItemId>>,
    pub max_jumps_per: u32,
    pub max_ly_per: f64,
    /// Pad sizes the ship can land on; empty = all.
    pub pad_sizes: HashSet<PadSize>,
    /// Acceptable planetary markers; empty = all.
    pub planetary: HashSet<Marker>,
    pub no_planet: bool,
    pub max_ls: f64,
    pub avoid_places: HashSet<Place>,
    /// Never revisit a station already on the route.
    pub unique: bool,
    /// Forbid revisiting any of the last N-1 stations; 0 = off.
    pub loop_interval: u32,
    /// Only consider destinations with a black market.
    pub black_market: bool,
    /// Hop straight to the restriction set instead of walking the graph.
    pub direct: bool,
    /// Bias scoring towards progress to this system.
    pub goal_system: Option<SystemId>,
    /// Light-second penalty strength in percent; 0 = off.
    pub ls_penalty: f64,
}

impl Default for SearchOptions {
    fn default() -> Self {
        SearchOptions {
            credits: 0,
            capacity: 1,
            limit: 0,
            insurance: 0,
            margin: 0.0,
            min_gain_per_ton: 1,
            max_gain_per_ton: None,
            max_age_days: None,
            min_supply: 0,
            min_demand: 0,
            avoid_items: HashSet::new(),
            restrict_items: None,
            max_jumps_per: 2,
            max_ly_per: f64::INFINITY,
            pad_sizes: HashSet::new(),
            planetary: HashSet::new(),
            no_planet: false,
            max_ls: f64::INFINITY,
            avoid_places: HashSet::new(),
            unique: false,
            loop_interval: 0,
            black_market: false,
            direct: false,
            goal_system: None,
            ls_penalty: 0.0,
        }
    }
}

/// A chain of trading hops: buy at each station, carry the load through
/// the recorded jumps, sell at the next station.
///
/// Routes are immutable; `plus` returns the extended copy.
#[derive(Debug, Clone, Serialize)]
pub struct Route {
    pub stations: Vec<StationId>,
    pub hops: Vec<TradeLoad>,
    pub jumps: Vec<Vec<SystemId>>,
    pub start_cr: i64,
    pub gain_cr: i64,
    pub score: f64,
}

impl Route {
    /// A single-station route to seed the search with.
    pub fn seed(station: StationId, start_cr: i64) -> Route {
        Route {
            stations: vec![station],
            hops: Vec::new(),
            jumps: Vec::new(),
            start_cr,
            gain_cr: 0,
            score: 0.0,
        }
    }

    pub fn first_station(&self) -> StationId {
        self.stations[0]
    }

    pub fn last_station(&self) -> StationId {
        self.stations[self.stations.len() - 1]
    }

    pub fn first_system(&self, galaxy: &Galaxy) -> SystemId {
        galaxy.station(self.first_station()).system
    }

    pub fn last_system(&self, galaxy: &Galaxy) -> SystemId {
        galaxy.station(self.last_station()).system
    }

    /// Extend with one hop; the original route is left untouched.
    pub fn plus(&self, dst: StationId, hop: TradeLoad, jumps: Vec<SystemId>, score: f64) -> Route {
        let mut stations = self.stations.clone();
        stations.push(dst);
        let gain_cr = self.gain_cr + hop.gain_cr;
        let mut hops = self.hops.clone();
        hops.push(hop);
        let mut all_jumps = self.jumps.clone();
        all_jumps.push(jumps);
        Route {
            stations,
            hops,
            jumps: all_jumps,
            start_cr: self.start_cr,
            gain_cr,
            score: self.score + score,
        }
    }

    /// Integer mean of the per-hop gain-per-ton values.
    pub fn avg_gpt(&self) -> i64 {
        if self.hops.is_empty() {
            return 0;
        }
        self.hops.iter().map(|hop| hop.gpt()).sum::<i64>() / self.hops.len() as i64
    }

    /// Overall gain-per-ton: total gain over total units carried.
    pub fn gpt(&self) -> i64 {
        let units: u32 = self.hops.iter().map(|hop| hop.units).sum();
        if units == 0 {
            return 0;
        }
        self.gain_cr / units as i64
    }

    /// Total hyperspace jumps, not counting in-system transfers.
    pub fn jump_count(&self) -> usize {
        self.jumps
            .iter()
            .map(|path| path.len().saturating_sub(1))
            .sum()
    }

    /// Quality ordering, best first: score DESC, then fewer hops.
    pub fn compare(&self, other: &Route) -> Ordering {
        other
            .score
            .partial_cmp(&self.score)
            .unwrap_or(Ordering::Equal)
            .then(self.jumps.len().cmp(&other.jumps.len()))
    }

    /// "First Station -> Last Station".
    pub fn name(&self, galaxy: &Galaxy) -> String {
        format!(
            "{} -> {}",
            galaxy.station(self.first_station()).name,
            galaxy.station(self.last_station()).name
        )
    }

    /// Short numeric summary of the route.
    pub fn summary(&self) -> String {
        let gain_per_hop = if self.hops.is_empty() {
            0
        } else {
            self.gain_cr / self.hops.len() as i64
        };
        format!(
            "Start CR: {}\nHops    : {}\nJumps   : {}\nGain CR : {}\nGain/Hop: {}\nFinal CR: {}\n",
            self.start_cr,
            self.hops.len(),
            self.jump_count(),
            self.gain_cr,
            gain_per_hop,
            self.start_cr + self.gain_cr,
        )
    }
}

/// Sort routes best-first.
pub fn sort_routes(routes: &mut [Route]) {
    routes.sort_by(|a, b| a.compare(b));
}

/// Receives one tick per route processed during an expansion.
pub trait ProgressSink: Send + Sync {
    fn tick(&self, routes: u64);
}

/// Sink that discards progress.
#[derive(Debug, Default)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn tick(&self, _routes: u64) {}
}

/// One scored hop awaiting best-per-destination retention.
struct HopCandidate {
    route_idx: usize,
    dst: StationId,
    load: TradeLoad,
    via: Vec<SystemId>,
    dist_ly: f64,
    score: f64,
}

/// Per-expansion state derived from the options once.
struct ExpandContext {
    credits: i64,
    capacity: u32,
    max_units: u32,
    min_gain: i64,
    max_gain: i64,
    safety_margin: f64,
    restrict_stations: HashSet<StationId>,
    direct: bool,
    query: DestinationQuery,
    goal: Option<SystemId>,
    unique: bool,
    loop_interval: u32,
    black_market: bool,
    max_age_s: Option<i64>,
    /// Penalty strength as a fraction, not percent.
    ls_penalty: f64,
}

/// The trade calculator: the offer indices plus the search entry points.
///
/// Built once over an immutable galaxy; the offer indices never change
/// for the lifetime of the search.
pub struct TradeCalc<'a, D: DestinationSource> {
    galaxy: &'a Galaxy,
    graph: &'a D,
    options: SearchOptions,
    offers: OfferIndex,
    fit: FitFunction,
}

impl<'a, D: DestinationSource> TradeCalc<'a, D> {
    /// Load the offer rows and build the calculator.
    pub fn new(
        galaxy: &'a Galaxy,
        graph: &'a D,
        options: SearchOptions,
        rows: impl IntoIterator<Item = StationItem>,
        now: DateTime<Utc>,
    ) -> Result<Self, CalcError> {
        let filter = LoadFilter {
            max_age_days: options.max_age_days,
            min_supply: options.min_supply,
            min_demand: options.min_demand,
            avoid_items: options.avoid_items.clone(),
            restrict_items: options.restrict_items.clone(),
        };
        let offers = OfferIndex::build(galaxy, rows, now, &filter)?;
        Ok(TradeCalc {
            galaxy,
            graph,
            options,
            offers,
            fit: fast_fit,
        })
    }

    /// Swap the fit strategy; the exact solver is useful for validation.
    pub fn with_fit(mut self, fit: FitFunction) -> Self {
        self.fit = fit;
        self
    }

    pub fn options(&self) -> &SearchOptions {
        &self.options
    }

    pub fn offers(&self) -> &OfferIndex {
        &self.offers
    }

    /// Profitable trades from `src` to `dst` under the configured gain
    /// bounds; None when either side has no market. `src_selling`
    /// overrides the station's indexed offers (used for prefiltered
    /// affordable subsets).
    pub fn trades(
        &self,
        src: StationId,
        dst: StationId,
        src_selling: Option<&[Offer]>,
    ) -> Option<Vec<Trade>> {
        let (min_gain, max_gain) = self.gain_bounds();
        self.offers.trades(src, dst, src_selling, min_gain, max_gain)
    }

    /// Best manifest for the given trade list under the given limits.
    pub fn fit(&self, items: &[Trade], credits: i64, capacity: u32, max_units: u32) -> TradeLoad {
        (self.fit)(items, credits, capacity, max_units)
    }

    /// Extend every route in the frontier by one hop, keeping the best
    /// route per destination station.
    pub fn expand(
        &self,
        routes: &[Route],
        restrict_to: Option<&[Place]>,
    ) -> Result<Vec<Route>, CalcError> {
        self.expand_with(routes, restrict_to, &NullProgress)
    }

    /// `expand` with a progress sink ticked once per input route.
    pub fn expand_with(
        &self,
        routes: &[Route],
        restrict_to: Option<&[Place]>,
        progress: &dyn ProgressSink,
    ) -> Result<Vec<Route>, CalcError> {
        let ctx = self.expand_context(restrict_to);
        let mut per_route = Vec::with_capacity(routes.len());
        for (idx, route) in routes.iter().enumerate() {
            progress.tick(1);
            per_route.push(self.route_candidates(idx, route, &ctx));
        }
        self.best_per_destination(routes, per_route)
    }

    /// Parallel `expand`: routes are evaluated on worker threads and the
    /// per-route candidates merged in input order, so the result is
    /// identical to the sequential expansion.
    pub fn expand_parallel(
        &self,
        routes: &[Route],
        restrict_to: Option<&[Place]>,
        progress: &dyn ProgressSink,
    ) -> Result<Vec<Route>, CalcError>
    where
        D: Sync,
    {
        let ctx = self.expand_context(restrict_to);
        let per_route: Vec<(u64, Vec<HopCandidate>)> = routes
            .par_iter()
            .enumerate()
            .map(|(idx, route)| {
                progress.tick(1);
                self.route_candidates(idx, route, &ctx)
            })
            .collect();
        self.best_per_destination(routes, per_route)
    }

    fn gain_bounds(&self) -> (i64, i64) {
        let min_gain = self.options.min_gain_per_ton.max(1);
        let max_gain = self
            .options
            .max_gain_per_ton
            .unwrap_or(i64::MAX)
            .max(min_gain);
        (min_gain, max_gain)
    }

    fn expand_context(&self, restrict_to: Option<&[Place]>) -> ExpandContext {
        let opts = &self.options;
        let (min_gain, max_gain) = self.gain_bounds();

        let mut restrict_stations = restrict_to
            .map(|places| self.galaxy.places_to_stations(places))
            .unwrap_or_default();

        if opts.direct {
            // Direct hops towards a goal default to the goal's stations.
            if restrict_to.is_none() {
                if let Some(goal) = opts.goal_system {
                    restrict_stations.extend(self.galaxy.system(goal).stations.iter().copied());
                }
            }
            restrict_stations.retain(|stn| !self.galaxy.place_avoided(&opts.avoid_places, *stn));
        }

        ExpandContext {
            credits: opts.credits - opts.insurance,
            capacity: opts.capacity,
            max_units: if opts.limit > 0 {
                opts.limit
            } else {
                opts.capacity
            },
            min_gain,
            max_gain,
            safety_margin: 1.0 - opts.margin,
            restrict_stations,
            direct: opts.direct,
            query: DestinationQuery {
                max_jumps: opts.max_jumps_per,
                max_ly_per: opts.max_ly_per,
                avoid_places: opts.avoid_places.clone(),
                pad_sizes: opts.pad_sizes.clone(),
                max_ls_from_star: opts.max_ls,
                no_planet: opts.no_planet,
                planetary: opts.planetary.clone(),
            },
            goal: opts.goal_system,
            unique: opts.unique,
            loop_interval: opts.loop_interval,
            black_market: opts.black_market,
            max_age_s: opts.max_age_days.map(|days| (days * 86_400.0) as i64),
            ls_penalty: opts.ls_penalty / 100.0,
        }
    }

    /// Evaluate every destination of one route. Returns the number of
    /// destinations that survived the filters plus the scored candidates.
    fn route_candidates(
        &self,
        route_idx: usize,
        route: &Route,
        ctx: &ExpandContext,
    ) -> (u64, Vec<HopCandidate>) {
        let galaxy = self.galaxy;
        let src = route.last_station();
        let src_system = galaxy.station(src).system;
        let start_cr = ctx.credits + (route.gain_cr as f64 * ctx.safety_margin) as i64;

        let Some(src_selling) = self.offers.selling(src) else {
            debug!(station = %galaxy.station(src).name, "nothing sold here");
            return (0, Vec::new());
        };
        let affordable: Vec<Offer> = src_selling
            .iter()
            .filter(|offer| offer.price <= start_cr)
            .cloned()
            .collect();
        if affordable.is_empty() {
            debug!(station = %galaxy.station(src).name, start_cr, "nothing affordable");
            return (0, Vec::new());
        }

        // Goal distances are fixed for the whole route.
        let goal_dists = ctx.goal.map(|goal| {
            let orig_system = route.first_system(galaxy);
            (
                orig_system,
                galaxy.distance(src_system, goal),
                galaxy.distance(src_system, orig_system),
                galaxy.distance(orig_system, goal),
            )
        });

        let unique_window: &[StationId] = if ctx.unique {
            &route.stations
        } else if ctx.loop_interval > 0 {
            let len = route.stations.len();
            let start = len.saturating_sub(ctx.loop_interval as usize);
            &route.stations[start..len - 1]
        } else {
            &[]
        };

        let destinations: Vec<Destination> = if ctx.direct {
            let mut dests: Vec<Destination> = ctx
                .restrict_stations
                .iter()
                .map(|&stn| {
                    let sys = galaxy.station(stn).system;
                    Destination {
                        system: sys,
                        station: stn,
                        via: vec![src_system, sys],
                        dist_ly: galaxy.distance(src_system, sys),
                    }
                })
                .collect();
            dests.sort_by(|a, b| {
                a.dist_ly
                    .partial_cmp(&b.dist_ly)
                    .unwrap_or(Ordering::Equal)
                    .then(a.station.cmp(&b.station))
            });
            dests
        } else {
            self.graph.destinations(galaxy, src, &ctx.query)
        };

        let mut evaluated = 0u64;
        let mut candidates = Vec::new();

        for dest in destinations {
            if dest.station == src {
                continue;
            }
            let dst_station = galaxy.station(dest.station);
            if ctx.black_market && dst_station.black_market != Marker::Yes {
                continue;
            }
            if unique_window.contains(&dest.station) {
                continue;
            }
            if !ctx.direct
                && !ctx.restrict_stations.is_empty()
                && !ctx.restrict_stations.contains(&dest.station)
            {
                continue;
            }
            if let Some(max_age_s) = ctx.max_age_s {
                match dst_station.data_age {
                    Some(age) if age <= max_age_s => {}
                    _ => continue,
                }
            }
            if let (Some(goal), Some((_, src_goal_dist, _, _))) = (ctx.goal, goal_dists) {
                if ctx.unique && dest.system == src_system {
                    continue;
                }
                if dest.system != goal && galaxy.distance(dest.system, goal) >= src_goal_dist {
                    continue;
                }
            }

            evaluated += 1;
            let Some(items) = self.offers.trades(
                src,
                dest.station,
                Some(&affordable),
                ctx.min_gain,
                ctx.max_gain,
            ) else {
                continue;
            };
            if items.is_empty() {
                continue;
            }
            let load = (self.fit)(&items, start_cr, ctx.capacity, ctx.max_units);
            if load.is_empty() {
                continue;
            }

            let mut score = match (ctx.goal, goal_dists) {
                (Some(goal), Some((orig_system, src_goal_dist, src_orig_dist, orig_goal_dist)))
                    if dest.system != goal =>
                {
                    let dst_goal_dist = galaxy.distance(dest.system, goal).max(MIN_GOAL_DIST_LY);
                    // Biggest reward for shortening the distance to goal.
                    let mut score = 5000.0 * orig_goal_dist / dst_goal_dist;
                    // Bias towards bigger reductions.
                    score += 50.0 * src_goal_dist / dst_goal_dist;
                    // Discourage moving back towards the origin.
                    if dest.system != orig_system {
                        score += 10.0 * (galaxy.distance(orig_system, dest.system) - src_orig_dist);
                    }
                    // Gain per unit pays a small part.
                    score += (load.gain_cr as f64 / load.units as f64) / 25.0;
                    score
                }
                _ => load.gain_cr as f64,
            };

            if ctx.ls_penalty > 0.0 {
                // Supercruise distance to one decimal of a kilo-lightsecond.
                let kls = (dst_station.ls_from_star / 100.0).trunc() / 10.0;
                // Curve that favors distances under 1 kls and penalizes
                // beyond 4 kls aggressively.
                let penalty = ((kls * kls) - kls) / 3.0 * ctx.ls_penalty;
                score *= (1.0 - penalty).max(0.0);
            }

            candidates.push(HopCandidate {
                route_idx,
                dst: dest.station,
                load,
                via: dest.via,
                dist_ly: dest.dist_ly,
                score,
            });
        }

        (evaluated, candidates)
    }

    /// Merge candidates, keeping one best route per destination, and
    /// materialize the extended frontier.
    fn best_per_destination(
        &self,
        routes: &[Route],
        per_route: Vec<(u64, Vec<HopCandidate>)>,
    ) -> Result<Vec<Route>, CalcError> {
        let mut evaluated = 0u64;
        let mut best: HashMap<StationId, HopCandidate> = HashMap::new();

        for (count, candidates) in per_route {
            evaluated += count;
            for cand in candidates {
                if let Some(incumbent) = best.get(&cand.dst) {
                    let held = routes[incumbent.route_idx].score + incumbent.score;
                    let offered = routes[cand.route_idx].score + cand.score;
                    if held > offered {
                        continue;
                    }
                    if held == offered && incumbent.dist_ly <= cand.dist_ly {
                        continue;
                    }
                }
                best.insert(cand.dst, cand);
            }
        }

        if evaluated == 0 {
            return Err(CalcError::NoHops);
        }

        let mut result: Vec<Route> = best
            .into_values()
            .map(|cand| routes[cand.route_idx].plus(cand.dst, cand.load, cand.via, cand.score))
            .collect();
        result.sort_by(|a, b| a.last_station().cmp(&b.last_station()));
        debug!(routes = result.len(), evaluated, "expansion complete");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::galaxy::JumpGraph;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

    const GOLD: u32 = 0;
    const ALGAE: u32 = 1;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_000_000, 0).unwrap()
    }

    fn row(station: u32, item: u32, dmd: (i64, i64, i32), sup: (i64, i64, i32)) -> StationItem {
        StationItem {
            station: StationId(station),
            item: crate::galaxy::ItemId(item),
            modified: Some("999000".to_string()),
            dmd_price: dmd.0,
            dmd_units: dmd.1,
            dmd_level: dmd.2,
            sup_price: sup.0,
            sup_units: sup.1,
            sup_level: sup.2,
        }
    }

    /// Sol (Hub 0, Annex 1) -> Alpha (Port 2) -> Beta (Dock 3), 5 ly
    /// apart in a line. Hub and Annex sell gold, Alpha buys gold and
    /// sells algae, Beta buys both.
    fn test_galaxy() -> Galaxy {
        let mut galaxy = Galaxy::new();
        let sol = galaxy.add_system("Sol", [0.0, 0.0, 0.0]);
        let alpha = galaxy.add_system("Alpha", [5.0, 0.0, 0.0]);
        let beta = galaxy.add_system("Beta", [10.0, 0.0, 0.0]);
        galaxy.add_station(sol, "Sol Hub");
        galaxy.add_station(sol, "Sol Annex");
        galaxy.add_station(alpha, "Alpha Port");
        galaxy.add_station(beta, "Beta Dock");
        galaxy.add_item("Gold");
        galaxy.add_item("Algae");
        galaxy
    }

    fn test_rows() -> Vec<StationItem> {
        vec![
            row(0, GOLD, (0, 0, 0), (100, -1, 0)),
            row(1, GOLD, (0, 0, 0), (90, -1, 0)),
            row(2, GOLD, (150, 100, 3), (0, 0, 0)),
            row(2, ALGAE, (0, 0, 0), (10, -1, 0)),
            row(3, GOLD, (120, 100, 3), (0, 0, 0)),
            row(3, ALGAE, (60, 100, 3), (0, 0, 0)),
        ]
    }

    fn base_options() -> SearchOptions {
        SearchOptions {
            credits: 1_000,
            capacity: 4,
            max_jumps_per: 1,
            max_ly_per: 6.0,
            ..SearchOptions::default()
        }
    }

    #[test]
    fn test_single_hop_expansion() {
        let galaxy = test_galaxy();
        let graph = JumpGraph::build(&galaxy, 6.0);
        let calc = TradeCalc::new(&galaxy, &graph, base_options(), test_rows(), now()).unwrap();

        let seeds = vec![Route::seed(StationId(0), 1_000)];
        let routes = calc.expand(&seeds, None).unwrap();

        // Only Alpha Port buys what Sol Hub sells within one jump.
        assert_eq!(routes.len(), 1);
        let route = &routes[0];
        assert_eq!(route.stations, vec![StationId(0), StationId(2)]);
        assert_eq!(route.hops.len(), 1);
        assert_eq!(route.jumps.len(), 1);
        assert_eq!(route.jumps[0], vec![SystemId(0), SystemId(1)]);
        // 4 tons of gold at 50cr/ton margin.
        assert_eq!(route.gain_cr, 200);
        assert_eq!(route.score, 200.0);
        assert_eq!(route.first_station(), StationId(0));
    }

    #[test]
    fn test_two_hop_chain_reinvests_gain() {
        let galaxy = test_galaxy();
        let graph = JumpGraph::build(&galaxy, 6.0);
        let calc = TradeCalc::new(&galaxy, &graph, base_options(), test_rows(), now()).unwrap();

        let mut frontier = vec![Route::seed(StationId(0), 1_000)];
        frontier = calc.expand(&frontier, None).unwrap();
        frontier = calc.expand(&frontier, None).unwrap();

        // Alpha -> Beta carrying algae at 50cr/ton.
        let to_beta = frontier
            .iter()
            .find(|r| r.last_station() == StationId(3))
            .unwrap();
        assert_eq!(
            to_beta.stations,
            vec![StationId(0), StationId(2), StationId(3)]
        );
        assert_eq!(to_beta.gain_cr, 400);
        assert_eq!(
            to_beta.gain_cr,
            to_beta.hops.iter().map(|h| h.gain_cr).sum::<i64>()
        );
        assert_eq!(to_beta.hops.len(), 2);
        assert_eq!(to_beta.jumps.len(), 2);
        assert_eq!(to_beta.first_station(), StationId(0));
        assert_eq!(to_beta.gpt(), 50);
        assert_eq!(to_beta.avg_gpt(), 50);
    }

    #[test]
    fn test_best_route_per_destination_wins() {
        let galaxy = test_galaxy();
        let graph = JumpGraph::build(&galaxy, 6.0);
        let calc = TradeCalc::new(&galaxy, &graph, base_options(), test_rows(), now()).unwrap();

        // Annex buys gold cheaper, so its route to Alpha must displace
        // the Hub route.
        let seeds = vec![
            Route::seed(StationId(0), 1_000),
            Route::seed(StationId(1), 1_000),
        ];
        let routes = calc.expand(&seeds, None).unwrap();
        let to_alpha = routes
            .iter()
            .find(|r| r.last_station() == StationId(2))
            .unwrap();
        assert_eq!(to_alpha.first_station(), StationId(1));
        assert_eq!(to_alpha.gain_cr, 4 * 60);
    }

    #[test]
    fn test_no_hops_when_nothing_reachable() {
        let mut galaxy = Galaxy::new();
        let sol = galaxy.add_system("Sol", [0.0, 0.0, 0.0]);
        galaxy.add_station(sol, "Lonely");
        galaxy.add_item("Gold");
        let graph = JumpGraph::build(&galaxy, 6.0);
        let rows = vec![row(0, GOLD, (0, 0, 0), (100, -1, 0))];
        let calc = TradeCalc::new(&galaxy, &graph, base_options(), rows, now()).unwrap();

        let seeds = vec![Route::seed(StationId(0), 1_000)];
        let err = calc.expand(&seeds, None).unwrap_err();
        assert!(matches!(err, CalcError::NoHops));
    }

    #[test]
    fn test_unique_never_revisits() {
        let galaxy = test_galaxy();
        let graph = JumpGraph::build(&galaxy, 6.0);
        let options = SearchOptions {
            unique: true,
            ..base_options()
        };
        let calc = TradeCalc::new(&galaxy, &graph, options, test_rows(), now()).unwrap();

        let mut frontier = vec![Route::seed(StationId(0), 1_000)];
        frontier = calc.expand(&frontier, None).unwrap();
        frontier = calc.expand(&frontier, None).unwrap();
        for route in &frontier {
            let mut seen = HashSet::new();
            assert!(route.stations.iter().all(|stn| seen.insert(*stn)));
        }
    }

    #[test]
    fn test_loop_interval_blocks_immediate_backtrack() {
        let galaxy = test_galaxy();
        let graph = JumpGraph::build(&galaxy, 6.0);
        // Make the backtrack profitable: Hub buys algae.
        let mut rows = test_rows();
        rows.push(row(0, ALGAE, (70, 100, 3), (0, 0, 0)));
        let options = SearchOptions {
            loop_interval: 2,
            ..base_options()
        };
        let calc = TradeCalc::new(&galaxy, &graph, options, rows, now()).unwrap();

        let mut frontier = vec![Route::seed(StationId(0), 1_000)];
        frontier = calc.expand(&frontier, None).unwrap();
        frontier = calc.expand(&frontier, None).unwrap();
        assert!(frontier
            .iter()
            .all(|route| route.last_station() != StationId(0)));
    }

    #[test]
    fn test_restrict_to_station() {
        let galaxy = test_galaxy();
        let graph = JumpGraph::build(&galaxy, 6.0);
        let calc = TradeCalc::new(&galaxy, &graph, base_options(), test_rows(), now()).unwrap();

        let seeds = vec![Route::seed(StationId(2), 1_000)];
        let restrict = [Place::Station(StationId(3))];
        let routes = calc.expand(&seeds, Some(&restrict)).unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].last_station(), StationId(3));
    }

    #[test]
    fn test_direct_mode_ignores_jump_range() {
        let galaxy = test_galaxy();
        let graph = JumpGraph::build(&galaxy, 6.0);
        let options = SearchOptions {
            direct: true,
            ..base_options()
        };
        let calc = TradeCalc::new(&galaxy, &graph, options, test_rows(), now()).unwrap();

        // Beta is 10 ly out, beyond single-jump range, but direct mode
        // hops straight to the restriction set.
        let seeds = vec![Route::seed(StationId(0), 1_000)];
        let restrict = [Place::System(SystemId(2))];
        let routes = calc.expand(&seeds, Some(&restrict)).unwrap();
        assert_eq!(routes.len(), 1);
        let route = &routes[0];
        assert_eq!(route.last_station(), StationId(3));
        assert_eq!(route.jumps[0], vec![SystemId(0), SystemId(2)]);
        // 4 tons of gold at 20cr/ton margin.
        assert_eq!(route.gain_cr, 80);
    }

    #[test]
    fn test_black_market_requirement() {
        let mut galaxy = test_galaxy();
        galaxy.station_mut(StationId(2)).black_market = Marker::No;
        let graph = JumpGraph::build(&galaxy, 6.0);
        let options = SearchOptions {
            black_market: true,
            ..base_options()
        };
        let calc = TradeCalc::new(&galaxy, &graph, options, test_rows(), now()).unwrap();

        let seeds = vec![Route::seed(StationId(0), 1_000)];
        let err = calc.expand(&seeds, None).unwrap_err();
        assert!(matches!(err, CalcError::NoHops));
    }

    #[test]
    fn test_insurance_reserves_credits() {
        let galaxy = test_galaxy();
        let graph = JumpGraph::build(&galaxy, 6.0);
        let options = SearchOptions {
            insurance: 900,
            ..base_options()
        };
        let calc = TradeCalc::new(&galaxy, &graph, options, test_rows(), now()).unwrap();

        // 100 spendable credits only buys one ton of gold.
        let seeds = vec![Route::seed(StationId(0), 1_000)];
        let routes = calc.expand(&seeds, None).unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].gain_cr, 50);
        assert_eq!(routes[0].hops[0].units, 1);
    }

    #[test]
    fn test_margin_holds_back_projected_gain() {
        let galaxy = test_galaxy();
        let graph = JumpGraph::build(&galaxy, 6.0);
        let options = SearchOptions {
            credits: 100,
            margin: 0.5,
            ..base_options()
        };
        let calc = TradeCalc::new(&galaxy, &graph, options, test_rows(), now()).unwrap();

        let mut frontier = vec![Route::seed(StationId(0), 100)];
        frontier = calc.expand(&frontier, None).unwrap();
        // One ton of gold gains 50; only half is reinvested.
        assert_eq!(frontier[0].gain_cr, 50);
        frontier = calc.expand(&frontier, None).unwrap();
        let to_beta = frontier
            .iter()
            .find(|r| r.last_station() == StationId(3))
            .unwrap();
        // 100 + floor(50 * 0.5) = 125 credits buys 12 tons of algae, but
        // the hold caps it at 4.
        assert_eq!(to_beta.hops[1].units, 4);
    }

    #[test]
    fn test_goal_scoring_formula() {
        let mut galaxy = Galaxy::new();
        let origin = galaxy.add_system("Origin", [0.0, 0.0, 0.0]);
        let mid = galaxy.add_system("Mid", [50.0, 0.0, 0.0]);
        let goal = galaxy.add_system("Goal", [100.0, 0.0, 0.0]);
        galaxy.add_station(origin, "Origin Hub");
        galaxy.add_station(mid, "Mid Port");
        galaxy.add_station(goal, "Goal Dock");
        galaxy.add_item("Gold");
        let graph = JumpGraph::build(&galaxy, 50.0);
        let rows = vec![
            row(0, GOLD, (0, 0, 0), (100, -1, 0)),
            row(1, GOLD, (150, 100, 3), (0, 0, 0)),
        ];
        let options = SearchOptions {
            credits: 1_000,
            capacity: 4,
            max_jumps_per: 1,
            max_ly_per: 50.0,
            goal_system: Some(goal),
            ..SearchOptions::default()
        };
        let calc = TradeCalc::new(&galaxy, &graph, options, rows, now()).unwrap();

        let seeds = vec![Route::seed(StationId(0), 1_000)];
        let routes = calc.expand(&seeds, None).unwrap();
        assert_eq!(routes.len(), 1);
        let route = &routes[0];
        assert_eq!(route.last_station(), StationId(1));
        // 5000 * 100/50 + 50 * 100/50 + 10 * (50 - 0) + 50/25
        let expected = 10_000.0 + 100.0 + 500.0 + 2.0;
        assert!((route.score - expected).abs() < 1e-9);
    }

    #[test]
    fn test_goal_filter_drops_regressing_destinations() {
        let mut galaxy = Galaxy::new();
        let origin = galaxy.add_system("Origin", [0.0, 0.0, 0.0]);
        let back = galaxy.add_system("Back", [-50.0, 0.0, 0.0]);
        let goal = galaxy.add_system("Goal", [100.0, 0.0, 0.0]);
        galaxy.add_station(origin, "Origin Hub");
        galaxy.add_station(back, "Back Port");
        galaxy.add_station(goal, "Goal Dock");
        galaxy.add_item("Gold");
        let graph = JumpGraph::build(&galaxy, 120.0);
        let rows = vec![
            row(0, GOLD, (0, 0, 0), (100, -1, 0)),
            row(1, GOLD, (200, 100, 3), (0, 0, 0)),
            row(2, GOLD, (150, 100, 3), (0, 0, 0)),
        ];
        let options = SearchOptions {
            credits: 1_000,
            capacity: 4,
            max_jumps_per: 1,
            max_ly_per: 120.0,
            goal_system: Some(goal),
            ..SearchOptions::default()
        };
        let calc = TradeCalc::new(&galaxy, &graph, options, rows, now()).unwrap();

        // Back Port pays more but moves away from the goal; only the
        // goal itself survives the filter, scored by plain gain.
        let seeds = vec![Route::seed(StationId(0), 1_000)];
        let routes = calc.expand(&seeds, None).unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].last_station(), StationId(2));
        assert_eq!(routes[0].score, 200.0);
    }

    #[test]
    fn test_ls_penalty_curve() {
        let seeds = vec![Route::seed(StationId(0), 1_000)];

        let mut galaxy = test_galaxy();
        galaxy.station_mut(StationId(2)).ls_from_star = 4_200.0;
        let graph = JumpGraph::build(&galaxy, 6.0);
        let options = SearchOptions {
            ls_penalty: 100.0,
            ..base_options()
        };
        let calc = TradeCalc::new(&galaxy, &graph, options, test_rows(), now()).unwrap();

        // kls = 4.2 -> penalty = (17.64 - 4.2) / 3 = 4.48, multiplier
        // clamps at zero.
        let routes = calc.expand(&seeds, None).unwrap();
        assert_eq!(routes[0].score, 0.0);

        // A close-in station gets a small boost instead.
        let mut galaxy = test_galaxy();
        galaxy.station_mut(StationId(2)).ls_from_star = 300.0;
        let graph = JumpGraph::build(&galaxy, 6.0);
        let options = SearchOptions {
            ls_penalty: 100.0,
            ..base_options()
        };
        let calc = TradeCalc::new(&galaxy, &graph, options, test_rows(), now()).unwrap();
        let routes = calc.expand(&seeds, None).unwrap();
        // kls = 0.3 -> penalty = (0.09 - 0.3) / 3 = -0.07
        assert!((routes[0].score - 200.0 * 1.07).abs() < 1e-9);
    }

    #[test]
    fn test_max_age_requires_fresh_station_data() {
        let seeds = vec![Route::seed(StationId(0), 1_000)];

        let mut galaxy = test_galaxy();
        galaxy.station_mut(StationId(2)).data_age = Some(200_000);
        let graph = JumpGraph::build(&galaxy, 6.0);
        let options = SearchOptions {
            max_age_days: Some(1.0),
            ..base_options()
        };
        let calc = TradeCalc::new(&galaxy, &graph, options, test_rows(), now()).unwrap();

        // Alpha Port's market snapshot is over two days old.
        let err = calc.expand(&seeds, None).unwrap_err();
        assert!(matches!(err, CalcError::NoHops));

        let mut galaxy = test_galaxy();
        galaxy.station_mut(StationId(2)).data_age = Some(3_600);
        let graph = JumpGraph::build(&galaxy, 6.0);
        let options = SearchOptions {
            max_age_days: Some(1.0),
            ..base_options()
        };
        let calc = TradeCalc::new(&galaxy, &graph, options, test_rows(), now()).unwrap();
        let routes = calc.expand(&seeds, None).unwrap();
        assert_eq!(routes.len(), 1);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let galaxy = test_galaxy();
        let graph = JumpGraph::build(&galaxy, 6.0);
        let calc = TradeCalc::new(&galaxy, &graph, base_options(), test_rows(), now()).unwrap();

        let seeds = vec![
            Route::seed(StationId(0), 1_000),
            Route::seed(StationId(1), 1_000),
        ];
        let sequential = calc.expand(&seeds, None).unwrap();

        struct Counter<'a>(&'a AtomicU64);
        impl ProgressSink for Counter<'_> {
            fn tick(&self, routes: u64) {
                self.0.fetch_add(routes, AtomicOrdering::Relaxed);
            }
        }
        let ticks = AtomicU64::new(0);
        let parallel = calc.expand_parallel(&seeds, None, &Counter(&ticks)).unwrap();

        assert_eq!(ticks.load(AtomicOrdering::Relaxed), 2);
        assert_eq!(sequential.len(), parallel.len());
        for (a, b) in sequential.iter().zip(parallel.iter()) {
            assert_eq!(a.stations, b.stations);
            assert_eq!(a.gain_cr, b.gain_cr);
            assert_eq!(a.score, b.score);
        }
    }

    #[test]
    fn test_route_plus_is_pure() {
        let base = Route::seed(StationId(0), 500);
        let hop = TradeLoad {
            items: Vec::new(),
            gain_cr: 120,
            cost_cr: 300,
            units: 3,
        };
        let extended = base.plus(
            StationId(2),
            hop.clone(),
            vec![SystemId(0), SystemId(1)],
            99.0,
        );
        assert_eq!(base.stations.len(), 1);
        assert_eq!(base.gain_cr, 0);
        assert_eq!(extended.gain_cr, base.gain_cr + hop.gain_cr);
        assert_eq!(extended.start_cr, 500);
        assert_eq!(extended.score, 99.0);
        assert_eq!(extended.stations.len(), extended.hops.len() + 1);
        assert_eq!(extended.stations.len(), extended.jumps.len() + 1);
    }

    #[test]
    fn test_route_ordering_and_sort() {
        let mut high = Route::seed(StationId(0), 0);
        high.score = 10.0;
        let mut low = Route::seed(StationId(1), 0);
        low.score = 5.0;
        let mut routes = vec![low.clone(), high.clone()];
        sort_routes(&mut routes);
        assert_eq!(routes[0].score, 10.0);

        // Equal scores: fewer hops first.
        let mut long = Route::seed(StationId(2), 0);
        long.score = 10.0;
        long.jumps.push(vec![SystemId(0)]);
        long.stations.push(StationId(3));
        long.hops.push(TradeLoad::empty());
        assert_eq!(high.compare(&long), Ordering::Less);
    }

    #[test]
    fn test_summary_format() {
        let galaxy = test_galaxy();
        let graph = JumpGraph::build(&galaxy, 6.0);
        let calc = TradeCalc::new(&galaxy, &graph, base_options(), test_rows(), now()).unwrap();
        let routes = calc
            .expand(&[Route::seed(StationId(0), 1_000)], None)
            .unwrap();
        let summary = routes[0].summary();
        assert!(summary.contains("Start CR: 1000"));
        assert!(summary.contains("Gain CR : 200"));
        assert!(summary.contains("Final CR: 1200"));
        assert_eq!(routes[0].name(&galaxy), "Sol Hub -> Alpha Port");
    }

    #[test]
    fn test_options_deserialize_legacy_aliases() {
        let options: SearchOptions = serde_json::from_str(
            r#"{"credits": 5000, "capacity": 8, "supply": 20, "demand": 10}"#,
        )
        .unwrap();
        assert_eq!(options.credits, 5_000);
        assert_eq!(options.min_supply, 20);
        assert_eq!(options.min_demand, 10);
        assert_eq!(options.min_gain_per_ton, 1);
    }
}
