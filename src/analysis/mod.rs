//! Country aggregation and lookup.
//!
//! The aggregator is the only piece every overlay shares; the index is
//! injected so the aggregator never carries a country table itself.

pub mod aggregator;
pub mod country_index;

pub use aggregator::*;
pub use country_index::{CountryIndex, CountryIndexError, IsoCodeIndex, StaticCountryIndex};
