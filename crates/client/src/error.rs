//! Fehlertypen fuer die Client-Engine

use raumfunk_audio::AudioError;
use raumfunk_core::error::Fehlerklasse;
use raumfunk_core::types::PeerId;
use thiserror::Error;

/// Alle moeglichen Fehler der Client-Engine
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Verbindung fehlgeschlagen: {0}")]
    Verbindung(String),

    #[error("Verbindungsaufbau nach {versuche} Versuchen aufgegeben")]
    Aufgegeben { versuche: u32 },

    #[error("Handshake mit {peer} fehlgeschlagen: {grund}")]
    Handshake { peer: PeerId, grund: String },

    #[error("Medienfehler: {0}")]
    Medien(String),

    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    #[error("Keine Zone betreten")]
    NichtInZone,

    #[error("Ungueltige Eingabe: {0}")]
    Ungueltig(String),

    #[error("Engine wurde beendet")]
    Beendet,

    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    pub fn klasse(&self) -> Option<Fehlerklasse> {
        match self {
            Self::Verbindung(_) | Self::Aufgegeben { .. } | Self::Io(_) => {
                Some(Fehlerklasse::Transport)
            }
            Self::Handshake { .. } => Some(Fehlerklasse::Handshake),
            Self::Medien(_) => Some(Fehlerklasse::Medien),
            Self::Audio(e) => e.klasse(),
            Self::Konfiguration(_)
            | Self::NichtInZone
            | Self::Ungueltig(_)
            | Self::Beendet => None,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
