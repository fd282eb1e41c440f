//! Structured Logging Setup via tracing-subscriber
//!
//! Konfigurierbar per Umgebungsvariable:
//! - `RF_LOG_LEVEL`: Log-Level oder EnvFilter-Direktive, Standard aus der Konfiguration
//! - `RF_LOG_FORMAT`: Format (text/json), Standard aus der Konfiguration

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Name der Umgebungsvariable fuer den Log-Level
pub const LOG_LEVEL_ENV: &str = "RF_LOG_LEVEL";

/// Name der Umgebungsvariable fuer das Log-Format
pub const LOG_FORMAT_ENV: &str = "RF_LOG_FORMAT";

/// Initialisiert das Logging-System.
///
/// `RF_LOG_LEVEL` und `RF_LOG_FORMAT` ueberschreiben die uebergebenen Werte.
/// Ein ungueltiger Filter faellt auf `info` zurueck. Schlaegt fehl, wenn
/// bereits ein globaler Subscriber installiert ist.
pub fn logging_initialisieren(level: &str, format: &str) -> Result<()> {
    let filter = EnvFilter::try_from_env(LOG_LEVEL_ENV)
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let format = std::env::var(LOG_FORMAT_ENV).unwrap_or_else(|_| format.to_string());

    let ergebnis = match format.as_str() {
        "json" => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_current_span(true)
            .try_init(),
        _ => fmt().with_env_filter(filter).with_target(true).try_init(),
    };

    ergebnis.map_err(|e| anyhow!("Logging-Initialisierung fehlgeschlagen: {e}"))
}

/// Validiert ob ein Log-Level-String gueltig ist.
pub fn log_level_gueltig(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error")
}

/// Validiert ob ein Log-Format-String gueltig ist.
pub fn log_format_gueltig(format: &str) -> bool {
    matches!(format, "text" | "json")
}
