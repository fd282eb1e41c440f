//! Schnittstelle zur Medienschicht
//!
//! Die Engine kennt keinen konkreten WebRTC-Stack. Ein [`MedienBackend`]
//! erzeugt Peer-Verbindungen und liefert das Mikrofon; Zustandswechsel
//! einer Verbindung kommen asynchron als [`MedienEreignis`] zurueck.

use async_trait::async_trait;
use raumfunk_audio::MikrofonQuelle;
use raumfunk_core::types::PeerId;
use raumfunk_protocol::messages::IceServer;
use tokio::sync::mpsc;

use crate::error::ClientResult;

/// Asynchrone Rueckmeldungen einer Peer-Verbindung
#[derive(Debug, Clone, PartialEq)]
pub enum MedienEreignis {
    /// Der Medientransport meldet sich als verbunden
    Verbunden(PeerId),
    /// ICE oder DTLS endgueltig gescheitert
    Fehlgeschlagen { peer: PeerId, grund: String },
    /// Lokaler ICE-Kandidat, der an den Peer weitergereicht werden muss
    LokalerKandidat {
        peer: PeerId,
        kandidat: serde_json::Value,
    },
}

/// Eine einzelne Peer-Verbindung (Offer/Answer plus ICE)
#[async_trait]
pub trait PeerVerbindung: Send + 'static {
    async fn angebot_erstellen(&mut self) -> ClientResult<String>;

    /// Setzt ein entferntes Angebot und liefert die Antwort
    async fn angebot_anwenden(&mut self, sdp: &str) -> ClientResult<String>;

    async fn antwort_anwenden(&mut self, sdp: &str) -> ClientResult<()>;

    async fn kandidat_hinzufuegen(&mut self, kandidat: serde_json::Value) -> ClientResult<()>;

    async fn schliessen(&mut self);
}

#[async_trait]
pub trait MedienBackend: Send + Sync + 'static {
    /// Erstellt eine neue Verbindung; Ereignisse gehen an `ereignisse`
    async fn verbindung_erstellen(
        &self,
        peer: &PeerId,
        ice_server: &[IceServer],
        ereignisse: mpsc::UnboundedSender<MedienEreignis>,
    ) -> ClientResult<Box<dyn PeerVerbindung>>;

    /// Oeffnet das Mikrofon fuer die Sprachaktivitaetserkennung
    fn mikrofon_oeffnen(&self) -> ClientResult<Box<dyn MikrofonQuelle>>;

    /// Aktiviert oder deaktiviert die Mikrofonspur (ohne sie zu stoppen)
    fn mikrofon_aktivieren(&self, aktiv: bool);
}
