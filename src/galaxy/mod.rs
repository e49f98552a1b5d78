//! Star Map and Jump Graph
//!
//! In-memory model of star systems, their stations and tradeable items,
//! plus the hyperspace jump graph used to enumerate reachable destinations.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Dense identifier of a star system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SystemId(pub u32);

/// Dense identifier of a station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StationId(pub u32);

/// Dense identifier of a tradeable item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(pub u32);

/// Three-state station attribute (yes / no / unknown).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Marker {
    #[serde(rename = "Y")]
    Yes,
    #[serde(rename = "N")]
    No,
    #[default]
    #[serde(rename = "?")]
    Unknown,
}

impl std::fmt::Display for Marker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Marker::Yes => write!(f, "Y"),
            Marker::No => write!(f, "N"),
            Marker::Unknown => write!(f, "?"),
        }
    }
}

/// Largest landing pad a station offers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PadSize {
    #[serde(rename = "S")]
    Small,
    #[serde(rename = "M")]
    Medium,
    #[serde(rename = "L")]
    Large,
    #[default]
    #[serde(rename = "?")]
    Unknown,
}

impl std::fmt::Display for PadSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PadSize::Small => write!(f, "S"),
            PadSize::Medium => write!(f, "M"),
            PadSize::Large => write!(f, "L"),
            PadSize::Unknown => write!(f, "?"),
        }
    }
}

/// A star system: a point in 3D space owning zero or more stations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct System {
    pub id: SystemId,
    pub name: String,
    pub pos: [f64; 3],
    pub stations: Vec<StationId>,
}

impl System {
    /// Straight-line distance to another system in light-years.
    pub fn distance_to(&self, other: &System) -> f64 {
        let dx = self.pos[0] - other.pos[0];
        let dy = self.pos[1] - other.pos[1];
        let dz = self.pos[2] - other.pos[2];
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// A dockable station inside a system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Station {
    pub id: StationId,
    pub system: SystemId,
    pub name: String,
    /// Supercruise distance from the main star in light-seconds; 0 = unknown.
    pub ls_from_star: f64,
    pub black_market: Marker,
    pub max_pad_size: PadSize,
    pub planetary: Marker,
    pub shipyard: Marker,
    pub outfitting: Marker,
    pub refuel: Marker,
    /// Seconds since the oldest offer at this station was updated.
    pub data_age: Option<i64>,
}

/// A tradeable commodity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    /// Canonical position in market listings.
    pub sort_key: u32,
}

/// A station or a whole system, as used in avoid/restrict lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Place {
    System(SystemId),
    Station(StationId),
}

/// The full star map. Systems, stations and items are stored densely and
/// indexed by their ids; the map is immutable once the search starts.
#[derive(Debug, Clone, Default)]
pub struct Galaxy {
    systems: Vec<System>,
    stations: Vec<Station>,
    items: Vec<Item>,
}

impl Galaxy {
    pub fn new() -> Self {
        Galaxy::default()
    }

    /// Add a system and return its id.
    pub fn add_system(&mut self, name: impl Into<String>, pos: [f64; 3]) -> SystemId {
        let id = SystemId(self.systems.len() as u32);
        self.systems.push(System {
            id,
            name: name.into(),
            pos,
            stations: Vec::new(),
        });
        id
    }

    /// Add a station with default attributes and return its id.
    pub fn add_station(&mut self, system: SystemId, name: impl Into<String>) -> StationId {
        let id = StationId(self.stations.len() as u32);
        self.stations.push(Station {
            id,
            system,
            name: name.into(),
            ls_from_star: 0.0,
            black_market: Marker::Unknown,
            max_pad_size: PadSize::Unknown,
            planetary: Marker::Unknown,
            shipyard: Marker::Unknown,
            outfitting: Marker::Unknown,
            refuel: Marker::Unknown,
            data_age: None,
        });
        self.systems[system.0 as usize].stations.push(id);
        id
    }

    /// Add an item; its sort key is its insertion position.
    pub fn add_item(&mut self, name: impl Into<String>) -> ItemId {
        let id = ItemId(self.items.len() as u32);
        self.items.push(Item {
            id,
            name: name.into(),
            sort_key: id.0,
        });
        id
    }

    pub fn system(&self, id: SystemId) -> &System {
        &self.systems[id.0 as usize]
    }

    pub fn station(&self, id: StationId) -> &Station {
        &self.stations[id.0 as usize]
    }

    pub fn station_mut(&mut self, id: StationId) -> &mut Station {
        &mut self.stations[id.0 as usize]
    }

    pub fn item(&self, id: ItemId) -> &Item {
        &self.items[id.0 as usize]
    }

    /// The system a station belongs to.
    pub fn station_system(&self, id: StationId) -> &System {
        self.system(self.station(id).system)
    }

    /// Straight-line distance between two systems in light-years.
    pub fn distance(&self, a: SystemId, b: SystemId) -> f64 {
        self.system(a).distance_to(self.system(b))
    }

    pub fn systems(&self) -> impl Iterator<Item = &System> {
        self.systems.iter()
    }

    pub fn stations(&self) -> impl Iterator<Item = &Station> {
        self.stations.iter()
    }

    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.items.iter()
    }

    pub fn system_count(&self) -> usize {
        self.systems.len()
    }

    pub fn station_count(&self) -> usize {
        self.stations.len()
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// True if the station, or the system owning it, appears in `places`.
    pub fn place_avoided(&self, places: &HashSet<Place>, station: StationId) -> bool {
        places.contains(&Place::Station(station))
            || places.contains(&Place::System(self.station(station).system))
    }

    /// Expand a list of places to the set of stations they cover.
    pub fn places_to_stations(&self, places: &[Place]) -> HashSet<StationId> {
        let mut stations = HashSet::new();
        for place in places {
            match place {
                Place::Station(id) => {
                    stations.insert(*id);
                }
                Place::System(id) => {
                    stations.extend(self.system(*id).stations.iter().copied());
                }
            }
        }
        stations
    }
}

/// One reachable station, with the jump path leading to its system.
///
/// `via` starts at the source system and ends at the destination system;
/// a single-element path means an in-system transfer. `dist_ly` is the
/// straight-line distance between the two systems.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Destination {
    pub system: SystemId,
    pub station: StationId,
    pub via: Vec<SystemId>,
    pub dist_ly: f64,
}

/// Constraints on destination enumeration.
#[derive(Debug, Clone)]
pub struct DestinationQuery {
    pub max_jumps: u32,
    pub max_ly_per: f64,
    pub avoid_places: HashSet<Place>,
    /// Pad sizes the ship can land on; empty = all.
    pub pad_sizes: HashSet<PadSize>,
    pub max_ls_from_star: f64,
    pub no_planet: bool,
    /// Acceptable planetary markers; empty = all.
    pub planetary: HashSet<Marker>,
}

impl Default for DestinationQuery {
    fn default() -> Self {
        DestinationQuery {
            max_jumps: 2,
            max_ly_per: f64::INFINITY,
            avoid_places: HashSet::new(),
            pad_sizes: HashSet::new(),
            max_ls_from_star: f64::INFINITY,
            no_planet: false,
            planetary: HashSet::new(),
        }
    }
}

/// Source of reachable destinations for a station.
///
/// Implementations must yield each reachable station at most once and in
/// a deterministic order.
pub trait DestinationSource {
    fn destinations(
        &self,
        galaxy: &Galaxy,
        src: StationId,
        query: &DestinationQuery,
    ) -> Vec<Destination>;
}

/// The hyperspace jump graph: systems connected when within single-jump
/// range of each other.
pub struct JumpGraph {
    graph: DiGraph<SystemId, f64>,
    node_index: HashMap<SystemId, NodeIndex>,
}

impl JumpGraph {
    /// Build the graph, linking every pair of systems within `max_jump_ly`.
    pub fn build(galaxy: &Galaxy, max_jump_ly: f64) -> Self {
        let mut graph = DiGraph::new();
        let mut node_index = HashMap::new();

        for system in galaxy.systems() {
            let idx = graph.add_node(system.id);
            node_index.insert(system.id, idx);
        }

        for a in galaxy.systems() {
            for b in galaxy.systems() {
                if a.id == b.id {
                    continue;
                }
                let dist = a.distance_to(b);
                if dist <= max_jump_ly {
                    graph.add_edge(node_index[&a.id], node_index[&b.id], dist);
                }
            }
        }

        debug!(
            systems = graph.node_count(),
            links = graph.edge_count(),
            "jump graph built"
        );

        JumpGraph { graph, node_index }
    }

    pub fn link_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Systems reachable within `max_jumps` jumps of `max_ly_per` or less,
    /// each with the shortest (fewest-jump) via path found.
    fn reachable_systems(
        &self,
        start: SystemId,
        max_jumps: u32,
        max_ly_per: f64,
        avoid_places: &HashSet<Place>,
    ) -> HashMap<SystemId, Vec<SystemId>> {
        let mut via: HashMap<SystemId, Vec<SystemId>> = HashMap::new();
        via.insert(start, vec![start]);
        let mut frontier = vec![start];

        for _ in 0..max_jumps {
            let mut next = Vec::new();
            for &sys in &frontier {
                let Some(&idx) = self.node_index.get(&sys) else {
                    continue;
                };
                let path = via[&sys].clone();
                for edge in self.graph.edges(idx) {
                    if *edge.weight() > max_ly_per {
                        continue;
                    }
                    let target = self.graph[edge.target()];
                    if avoid_places.contains(&Place::System(target)) {
                        continue;
                    }
                    if !via.contains_key(&target) {
                        let mut target_path = path.clone();
                        target_path.push(target);
                        via.insert(target, target_path);
                        next.push(target);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        via
    }
}

impl DestinationSource for JumpGraph {
    fn destinations(
        &self,
        galaxy: &Galaxy,
        src: StationId,
        query: &DestinationQuery,
    ) -> Vec<Destination> {
        let src_system = galaxy.station(src).system;
        let reached = self.reachable_systems(
            src_system,
            query.max_jumps,
            query.max_ly_per,
            &query.avoid_places,
        );

        let mut found = Vec::new();
        for (&sys, path) in &reached {
            let dist_ly = galaxy.distance(src_system, sys);
            for &stn_id in &galaxy.system(sys).stations {
                let station = galaxy.station(stn_id);
                if galaxy.place_avoided(&query.avoid_places, stn_id) {
                    continue;
                }
                if !query.pad_sizes.is_empty() && !query.pad_sizes.contains(&station.max_pad_size)
                {
                    continue;
                }
                if query.max_ls_from_star.is_finite()
                    && (station.ls_from_star == 0.0
                        || station.ls_from_star > query.max_ls_from_star)
                {
                    continue;
                }
                if query.no_planet && station.planetary == Marker::Yes {
                    continue;
                }
                if !query.planetary.is_empty() && !query.planetary.contains(&station.planetary) {
                    continue;
                }
                found.push(Destination {
                    system: sys,
                    station: stn_id,
                    via: path.clone(),
                    dist_ly,
                });
            }
        }

        // Deterministic order regardless of map iteration.
        found.sort_by(|a, b| {
            a.dist_ly
                .partial_cmp(&b.dist_ly)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.station.cmp(&b.station))
        });
        found
    }
}
