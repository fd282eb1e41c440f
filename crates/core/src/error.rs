//! Fehlertypen fuer Raumfunk
//!
//! Zentraler Fehler-Enum entlang der fuenf Fehlerklassen des Systems.
//! Untermodule definieren eigene Fehler und ordnen sie via
//! `klasse()` einer dieser Klassen zu.

use thiserror::Error;

/// Globaler Result-Alias fuer Raumfunk
pub type Result<T> = std::result::Result<T, RaumfunkError>;

/// Fehlerklasse – bestimmt, wie ein Fehler behandelt wird
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fehlerklasse {
    /// Socket geschlossen/fehlerhaft – lokal per Reconnect behoben
    Transport,
    /// Ungueltige oder unerwartete Nachricht – protokollieren und ignorieren
    Protokoll,
    /// Peer-Handshake fehlgeschlagen – Verbindung abbauen, einmal wiederholen
    Handshake,
    /// Mesh- oder Zonen-Limit erreicht – erwartet, nicht fatal
    Kapazitaet,
    /// Mikrofon nicht verfuegbar – nur noch stumm
    Medien,
}

/// Alle moeglichen Fehler im Raumfunk-System
#[derive(Debug, Error)]
pub enum RaumfunkError {
    // --- Verbindung & Netzwerk ---
    #[error("Verbindung fehlgeschlagen: {0}")]
    Verbindung(String),

    #[error("Verbindung getrennt: {0}")]
    Getrennt(String),

    #[error("Zeitlimit ueberschritten: {0}")]
    Zeitlimit(String),

    // --- Protokoll ---
    #[error("Ungueltige Nachricht: {0}")]
    UngueltigeNachricht(String),

    // --- Peer-Handshake ---
    #[error("Handshake mit {peer} fehlgeschlagen: {grund}")]
    Handshake { peer: String, grund: String },

    // --- Kapazitaet ---
    #[error("Zone voll: {0}")]
    ZoneVoll(String),

    #[error("Mesh voll: maximal {0} Peers")]
    MeshVoll(usize),

    // --- Medien ---
    #[error("Medienfehler: {0}")]
    Medien(String),

    // --- Konfiguration ---
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    // --- Intern ---
    #[error("Interner Fehler: {0}")]
    Intern(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl RaumfunkError {
    /// Erstellt einen internen Fehler aus einer beliebigen Nachricht
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Ordnet den Fehler einer Fehlerklasse zu
    ///
    /// Konfigurations- und interne Fehler haben keine Klasse, sie sind
    /// Programmier- oder Bedienfehler.
    pub fn klasse(&self) -> Option<Fehlerklasse> {
        match self {
            Self::Verbindung(_) | Self::Getrennt(_) | Self::Zeitlimit(_) => {
                Some(Fehlerklasse::Transport)
            }
            Self::UngueltigeNachricht(_) => Some(Fehlerklasse::Protokoll),
            Self::Handshake { .. } => Some(Fehlerklasse::Handshake),
            Self::ZoneVoll(_) | Self::MeshVoll(_) => Some(Fehlerklasse::Kapazitaet),
            Self::Medien(_) => Some(Fehlerklasse::Medien),
            Self::Konfiguration(_) | Self::Intern(_) | Self::Anyhow(_) => None,
        }
    }

    /// Gibt zurueck ob der Fehler voruebergehend ist (Retry sinnvoll)
    pub fn ist_wiederholbar(&self) -> bool {
        matches!(
            self.klasse(),
            Some(Fehlerklasse::Transport) | Some(Fehlerklasse::Handshake)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_anzeige() {
        let e = RaumfunkError::ZoneVoll("hub".into());
        assert!(e.to_string().contains("hub"));
    }

    #[test]
    fn klassen_zuordnung() {
        assert_eq!(
            RaumfunkError::Getrennt("eof".into()).klasse(),
            Some(Fehlerklasse::Transport)
        );
        assert_eq!(
            RaumfunkError::MeshVoll(8).klasse(),
            Some(Fehlerklasse::Kapazitaet)
        );
        assert_eq!(
            RaumfunkError::Medien("kein Mikrofon".into()).klasse(),
            Some(Fehlerklasse::Medien)
        );
        assert_eq!(RaumfunkError::intern("x").klasse(), None);
    }

    #[test]
    fn wiederholbare_fehler() {
        assert!(RaumfunkError::Zeitlimit("ping".into()).ist_wiederholbar());
        assert!(RaumfunkError::Handshake {
            peer: "peer_1".into(),
            grund: "ice".into()
        }
        .ist_wiederholbar());
        assert!(!RaumfunkError::ZoneVoll("hub".into()).ist_wiederholbar());
        assert!(!RaumfunkError::UngueltigeNachricht("json".into()).ist_wiederholbar());
    }
}
