//! Persistence for flowcast: observation/result tables, model artifacts and
//! per-variable watermarks.
//!
//! Every store is a trait so the pipeline can run against PostgreSQL and
//! files in production and against the in-memory implementations in tests.

pub mod error;
pub mod memory;
pub mod model_store;
pub mod postgres;
pub mod series;
pub mod watermark;

pub use error::StorageError;
pub use memory::{MemorySeriesStore, MemoryWatermarkStore};
pub use model_store::{FileModelStore, ModelStore};
pub use postgres::PgSeriesStore;
pub use series::SeriesStore;
pub use watermark::{FileWatermarkStore, WatermarkStore};
