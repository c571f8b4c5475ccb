//! Fetching raw daily history and normalizing it into records.

pub mod csv;
pub mod frame;
pub mod normalize;
pub mod provider;
pub mod yahoo;

pub use csv::CsvSource;
pub use frame::RawFrame;
pub use normalize::{NormalizeError, NormalizedRecord, Normalizer};
pub use provider::{DataSource, FetchError, FetchWindow, HistoricalSource, RawObservation};
pub use yahoo::YahooProvider;
