use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use clap::{Parser, Subcommand};

/// Per-variable forecasting and anomaly detection over time-series tables.
#[derive(Parser, Debug)]
#[command(name = "flowcast", version, about)]
pub struct CliArgs {
    /// Path to the YAML config file.
    #[arg(long, env = "FLOWCAST_CONFIG", default_value = flowcast_core::config::DEFAULT_CONFIG_PATH)]
    pub config: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fit and save one model per variable.
    Train {
        /// Variable to train (repeatable). Defaults to every variable in the input table.
        #[arg(long = "variable", short = 'v')]
        variables: Vec<String>,

        /// Only use observations strictly after this instant.
        #[arg(long, value_parser = parse_instant)]
        since: Option<DateTime<Utc>>,

        /// Only use observations up to and including this instant.
        #[arg(long, value_parser = parse_instant)]
        until: Option<DateTime<Utc>>,
    },

    /// Score observations once and write the results. Watermarks are left untouched.
    Detect {
        /// Variable to score (repeatable). Defaults to every variable with a saved model.
        #[arg(long = "variable", short = 'v')]
        variables: Vec<String>,

        /// Only score observations strictly after this instant. Defaults to all.
        #[arg(long, value_parser = parse_instant)]
        since: Option<DateTime<Utc>>,

        /// Only score observations up to and including this instant.
        #[arg(long, value_parser = parse_instant)]
        until: Option<DateTime<Utc>>,

        /// Number of variables listed in the anomaly summary.
        #[arg(long, default_value_t = 10)]
        top: usize,
    },

    /// Run the continuous worker until SIGINT/SIGTERM.
    Worker {
        /// Tick interval override, in minutes.
        #[arg(long, env = "FLOWCAST_INTERVAL_MINUTES")]
        interval: Option<u64>,
    },

    /// List variables with a saved model.
    Models {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` / `YYYY-MM-DDTHH:MM:SS` (UTC),
/// or a bare date (midnight UTC).
pub fn parse_instant(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc());
        }
    }
    Err(format!("unrecognised timestamp '{}'", raw))
}
