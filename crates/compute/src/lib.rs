pub mod algorithms;
pub mod error;
pub mod pipeline;
pub mod scheduler;

pub use algorithms::{ForecastError, ForecastModel, ForecastPoint, Forecaster, SeasonalForecaster, SeasonalModel};
pub use error::PipelineError;
pub use pipeline::{
    detect_once, AnomalySummary, DetectRun, Detector, ModelArtifact, Trainer, TrainingOutcome,
    TrainingReport, VariableOutcome,
};
pub use scheduler::{CycleState, TickSummary, Worker, WorkerMetrics};
