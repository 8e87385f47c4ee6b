pub mod forecast;
pub mod linalg;
pub mod seasonal;

pub use forecast::{ForecastError, ForecastModel, ForecastPoint, Forecaster};
pub use seasonal::{SeasonalForecaster, SeasonalModel};
