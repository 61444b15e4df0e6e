//! Runs every anomaly scenario at every isolation level against the store
//! configured through `DB_URL` / `DB_USERNAME` / `DB_PASSWORD` and reports
//! which cells of the matrix deviate from the expected outcome.
//!
//! `HARNESS_REPORT=json` prints the reports as JSON on stdout.

use std::env;
use std::process::ExitCode;
use std::sync::Arc;

use isolation_anomalies::prelude::*;
use log::{error, info, warn};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            error!("{}", err);
            ExitCode::from(2)
        }
    }
}

fn run() -> std::result::Result<bool, Box<dyn std::error::Error>> {
    let config = HarnessConfig::from_env()?;
    info!(
        "Running the anomaly matrix, writer at {}, barrier timeout {:?}",
        config.writer_isolation, config.timeouts.barrier
    );

    let storage = Arc::new(PgStorage::connect(&config.store)?);
    let runner = Arc::new(TransactionRunner::new(storage, config.writer_isolation));
    let driver = ScenarioDriver::new(runner, config.timeouts);
    let reports = driver.run_matrix()?;

    if env::var("HARNESS_REPORT").is_ok_and(|format| format.eq_ignore_ascii_case("json")) {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }

    let mut all_match = true;
    for report in &reports {
        if report.matches_expectation() {
            info!("{}", report);
        } else {
            all_match = false;
            warn!("deviates from the expected matrix: {}", report);
        }
    }
    Ok(all_match)
}
