//! raumfunk-core – Gemeinsame Typen, Raum-Mathematik und Fehlertypen
//!
//! Dieses Crate stellt die Bausteine bereit, die Dienst und Client
//! gemeinsam nutzen: Identifikatoren, Positionen, die Abbildung von
//! Distanz auf Lautstaerke und die Fehler-Taxonomie.

pub mod error;
pub mod spatial;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::{Fehlerklasse, RaumfunkError, Result};
pub use spatial::{distanz_lautstaerke, lautstaerke_zu_gain, STANDARD_CULL_DISTANZ};
pub use types::{MessageId, PeerId, Position, UserId, UserInfo, ZoneId};
