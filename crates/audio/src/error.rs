//! Fehlertypen fuer den Audio-Teil

use raumfunk_core::error::Fehlerklasse;
use raumfunk_core::types::PeerId;
use thiserror::Error;

/// Alle moeglichen Fehler des Audio-Teils
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Mikrofon nicht verfuegbar: {0}")]
    MikrofonNichtVerfuegbar(String),

    #[error("Audio-Knoten fuer {0} existiert bereits")]
    KnotenExistiert(PeerId),

    #[error("Audio-Graph-Fehler: {0}")]
    Graph(String),

    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),
}

impl AudioError {
    /// Audiofehler gehoeren zur Medien-Klasse, ausser Konfigurationsfehler
    pub fn klasse(&self) -> Option<Fehlerklasse> {
        match self {
            Self::Konfiguration(_) => None,
            _ => Some(Fehlerklasse::Medien),
        }
    }
}

pub type AudioResult<T> = Result<T, AudioError>;
