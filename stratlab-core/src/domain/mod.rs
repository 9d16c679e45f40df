//! Domain types: bars, series, timeframes, trades, identifiers.

pub mod bar;
pub mod ids;
pub mod series;
pub mod timeframe;
pub mod trade;

pub use bar::Bar;
pub use ids::ConfigHash;
pub use series::{BarError, BarSeries, TimeWindow};
pub use timeframe::{Timeframe, TimeframeError};
pub use trade::{ExitReason, HtfBias, Outcome, Side, Trade};

/// Symbol type alias
pub type Symbol = String;
