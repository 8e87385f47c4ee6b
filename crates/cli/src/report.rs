//! Human-readable command output.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use flowcast_compute::{DetectRun, ModelArtifact, TrainingOutcome, TrainingReport, VariableOutcome};

pub fn print_training(report: &TrainingReport) {
    println!("{:<32} {:<10} DETAIL", "VARIABLE", "STATUS");
    for (variable, outcome) in &report.outcomes {
        let (status, detail) = match outcome {
            TrainingOutcome::Trained { points } => ("trained", format!("{} points", points)),
            TrainingOutcome::Skipped(e) => ("skipped", e.to_string()),
            TrainingOutcome::Failed(e) => ("failed", e.to_string()),
        };
        println!("{:<32} {:<10} {}", variable, status, detail);
    }
    println!(
        "\n{} trained, {} skipped, {} failed in {:.1}s",
        report.trained(),
        report.skipped(),
        report.failed(),
        report.duration.as_secs_f64()
    );
}

pub fn print_detection(run: &DetectRun, top: usize) {
    println!("{:<32} {:<10} {:>8} {:>8} {:>10}", "VARIABLE", "STATUS", "ROWS", "WRITTEN", "ANOMALIES");
    for (variable, outcome) in &run.outcomes {
        match outcome {
            VariableOutcome::Processed {
                rows,
                written,
                anomalies,
                ..
            } => println!(
                "{:<32} {:<10} {:>8} {:>8} {:>10}",
                variable,
                outcome.label(),
                rows,
                written,
                anomalies
            ),
            VariableOutcome::Empty => println!("{:<32} {:<10}", variable, outcome.label()),
            VariableOutcome::Skipped(e) | VariableOutcome::Failed(e) => {
                println!("{:<32} {:<10} {}", variable, outcome.label(), e)
            }
        }
    }

    let total = run.summary.total_points();
    let anomalies = run.summary.total_anomalies();
    let rate = if total == 0 {
        0.0
    } else {
        anomalies as f64 / total as f64 * 100.0
    };
    println!("\n{} points scored, {} anomalies ({:.2}%)", total, anomalies, rate);

    let ranked: Vec<_> = run
        .summary
        .top(top)
        .into_iter()
        .filter(|s| s.anomalies > 0)
        .collect();
    if !ranked.is_empty() {
        println!("\nTop variables by anomaly count:");
        for s in ranked {
            println!(
                "  {:<30} {:>6} ({:.2}%), max score {:.2}",
                s.variable,
                s.anomalies,
                s.anomaly_rate() * 100.0,
                s.max_score
            );
        }
    }
}

/// One line of `flowcast models`.
pub struct ModelEntry {
    pub variable: String,
    pub trained_at: Option<DateTime<Utc>>,
    pub training_points: Option<usize>,
    pub algorithm: Option<String>,
    pub error: Option<String>,
}

impl ModelEntry {
    pub fn new<M>(variable: String, loaded: Result<&ModelArtifact<M>, String>) -> Self {
        match loaded {
            Ok(a) => Self {
                variable,
                trained_at: Some(a.trained_at),
                training_points: Some(a.training_points),
                algorithm: Some(a.algorithm.clone()),
                error: None,
            },
            Err(error) => Self {
                variable,
                trained_at: None,
                training_points: None,
                algorithm: None,
                error: Some(error),
            },
        }
    }
}

pub fn print_models(entries: &[ModelEntry]) {
    if entries.is_empty() {
        println!("No trained models.");
        return;
    }
    println!("{:<32} {:<26} {:>8} ALGORITHM", "VARIABLE", "TRAINED AT", "POINTS");
    for e in entries {
        match &e.error {
            None => println!(
                "{:<32} {:<26} {:>8} {}",
                e.variable,
                e.trained_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
                e.training_points.unwrap_or_default(),
                e.algorithm.as_deref().unwrap_or("-")
            ),
            Some(err) => println!("{:<32} unreadable: {}", e.variable, err),
        }
    }
}

pub fn models_json(entries: &[ModelEntry]) -> Value {
    Value::Array(
        entries
            .iter()
            .map(|e| {
                json!({
                    "variable": e.variable,
                    "trained_at": e.trained_at,
                    "training_points": e.training_points,
                    "algorithm": e.algorithm,
                    "error": e.error,
                })
            })
            .collect(),
    )
}
