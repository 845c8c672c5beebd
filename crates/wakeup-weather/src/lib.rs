//! `wakeup-weather`: current-conditions lookup with a SQLite-backed,
//! time-bound cache.
//!
//! [`cache::WeatherCache`] is the only entry point the rest of the system
//! uses. A cache hit requires `expires_at > now`; a miss (or a forced
//! refresh) calls the configured [`provider::WeatherProvider`], records the
//! attempt in `weather_api_log`, and on success replaces the location's
//! snapshot. Provider failures surface as `None`, never as an error.

pub mod cache;
pub mod db;
pub mod error;
pub mod provider;
pub mod types;

pub use cache::WeatherCache;
pub use error::{CacheError, WeatherError};
pub use provider::{WeatherApiProvider, WeatherProvider};
pub use types::{ApiLogStatus, WeatherReport, WeatherSnapshot, WEATHER_UNAVAILABLE};
