//! Sensor module - reading types and reading sources

mod traits;
mod simulator;
mod weather;

pub use traits::{round2, BatchOutcome, Bounds, Metric, Reading, ReadingSource, Series};
pub use simulator::{clock_timestamp, default_origin, origin_ending_at, SensorSimulator};
pub use weather::{
    parse_current, parse_forecast, OpenWeatherClient, WeatherClient, WeatherSource,
    MAX_FORECAST_STEPS,
};
