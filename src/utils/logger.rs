/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/5/25
******************************************************************************/

use std::env;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

static INIT: Once = Once::new();

fn level_from_str(level: &str) -> Level {
    match level.to_uppercase().as_str() {
        "TRACE" => Level::TRACE,
        "DEBUG" => Level::DEBUG,
        "WARN" => Level::WARN,
        "ERROR" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Installs a global `tracing` subscriber. The level is read from the `LOGLEVEL`
/// environment variable (default `INFO`). Calling it more than once has no effect.
pub fn setup_logger() {
    let level = env::var("LOGLEVEL").unwrap_or_else(|_| "INFO".to_string());
    setup_logger_with_level(&level);
}

/// Installs a global `tracing` subscriber with an explicit level
/// (`TRACE`, `DEBUG`, `INFO`, `WARN` or `ERROR`).
///
/// Region transitions of the session engine are logged at `TRACE`, so this is the level
/// to use when diagnosing connection problems.
pub fn setup_logger_with_level(level: &str) {
    let level = level_from_str(level);
    INIT.call_once(|| {
        let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
        if tracing::subscriber::set_global_default(subscriber).is_err() {
            tracing::debug!("A global tracing subscriber was already installed");
        }
    });
}
