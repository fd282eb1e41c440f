//! Fehlertypen fuer den Zonen-Dienst

use raumfunk_core::Fehlerklasse;
use thiserror::Error;

/// Fehlertyp fuer den Zonen-Dienst
#[derive(Debug, Error)]
pub enum SignalingError {
    /// IO-Fehler (TCP, Socket)
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    /// Verbindung wurde getrennt
    #[error("Verbindung getrennt")]
    VerbindungGetrennt,

    /// Protokollfehler (ungueltiges Frame, falscher Zustand)
    #[error("Protokollfehler: {0}")]
    Protokoll(String),

    /// Zone ist voll
    #[error("Zone {0} ist voll")]
    ZoneVoll(String),

    /// Dienst ist voll
    #[error("Dienst ist voll")]
    ServerVoll,

    /// Timeout (keine Frames vom Client)
    #[error("Timeout")]
    Timeout,

    /// Interner Fehler
    #[error("Interner Fehler: {0}")]
    Intern(String),
}

impl SignalingError {
    /// Erstellt einen internen Fehler
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Erstellt einen Protokollfehler
    pub fn protokoll(msg: impl Into<String>) -> Self {
        Self::Protokoll(msg.into())
    }

    /// Ordnet den Fehler einer Fehlerklasse zu
    pub fn klasse(&self) -> Option<Fehlerklasse> {
        match self {
            Self::Io(_) | Self::VerbindungGetrennt | Self::Timeout => Some(Fehlerklasse::Transport),
            Self::Protokoll(_) => Some(Fehlerklasse::Protokoll),
            Self::ZoneVoll(_) | Self::ServerVoll => Some(Fehlerklasse::Kapazitaet),
            Self::Intern(_) => None,
        }
    }
}

/// Result-Typ fuer den Zonen-Dienst
pub type SignalingResult<T> = Result<T, SignalingError>;
