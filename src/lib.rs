//! Startrader Route Optimizer
//!
//! Profit-maximizing multi-hop trade route search over a galaxy of star
//! systems and their stations. Loads per-station buy/sell offers once,
//! then repeatedly expands a frontier of partial routes: at each hop a
//! cargo manifest is bought, carried through hyperspace jumps, and sold
//! at the next station.

pub mod fit;
pub mod galaxy;
pub mod market;
pub mod optimizer;

pub use fit::{brute_force_fit, fast_fit, FitFunction, TradeLoad};
pub use galaxy::{
    Destination, DestinationQuery, DestinationSource, Galaxy, Item, ItemId, JumpGraph, Marker,
    PadSize, Place, Station, StationId, System, SystemId,
};
pub use market::{LoadFilter, Offer, OfferIndex, StationItem, Trade};
pub use optimizer::{
    sort_routes, NullProgress, ProgressSink, Route, SearchOptions, TradeCalc,
};

use thiserror::Error;

/// Failures surfaced by the route calculator.
///
/// Construction failures are fatal; `NoHops` is recoverable by the
/// caller (widen the constraints or stop extending the route).
#[derive(Debug, Error)]
pub enum CalcError {
    /// An offer row carried a modified timestamp that was not an epoch
    /// second count.
    #[error("station {station:?} has an offer for item {item:?} with an invalid modified timestamp: '{raw}'")]
    BadTimestamp {
        station: StationId,
        item: ItemId,
        raw: String,
    },
    /// The avoid/restrict filters left no items to load.
    #[error("no items to load")]
    NoItemsToLoad,
    /// An expansion found no destinations at all.
    #[error("no destinations could be reached within the constraints")]
    NoHops,
}
