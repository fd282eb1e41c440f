//! Event-Broadcaster – Ausgehende Queues aller Verbindungen
//!
//! Jede Verbindung registriert beim Start eine begrenzte Queue unter ihrer
//! PeerId. Handler reihen Nachrichten nicht-blockierend ein, waehrend sie
//! die Sperre der Zone halten. Dadurch sehen alle Mitglieder einer Zone
//! dieselbe Reihenfolge.
//!
//! ## Selektives Senden
//! - An einen Peer: `an_peer_senden`
//! - An mehrere Peers: `an_peers_senden`
//! - An alle ausser einem: `an_peers_ausser_senden`

use dashmap::DashMap;
use raumfunk_core::types::PeerId;
use raumfunk_protocol::ServerMessage;
use std::sync::Arc;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Groesse der Send-Queue pro Verbindung
pub const SEND_QUEUE_GROESSE: usize = 256;

// ---------------------------------------------------------------------------
// PeerSender
// ---------------------------------------------------------------------------

/// Handle auf die Send-Queue einer Verbindung
#[derive(Clone, Debug)]
pub struct PeerSender {
    pub peer_id: PeerId,
    pub tx: mpsc::Sender<ServerMessage>,
}

impl PeerSender {
    /// Sendet eine Nachricht nicht-blockierend an die Verbindung
    ///
    /// Gibt `false` zurueck wenn die Queue voll oder geschlossen ist.
    pub fn senden(&self, nachricht: ServerMessage) -> bool {
        match self.tx.try_send(nachricht) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(n)) => {
                tracing::warn!(
                    peer_id = %self.peer_id,
                    typ = n.typ_name(),
                    "Send-Queue voll – Nachricht verworfen"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(peer_id = %self.peer_id, "Send-Queue geschlossen (Peer getrennt)");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// EventBroadcaster
// ---------------------------------------------------------------------------

/// Zentraler Broadcaster fuer alle Verbindungen
///
/// Thread-safe via Arc + DashMap. Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct EventBroadcaster {
    inner: Arc<EventBroadcasterInner>,
}

struct EventBroadcasterInner {
    peers: DashMap<PeerId, PeerSender>,
}

impl EventBroadcaster {
    /// Erstellt einen neuen EventBroadcaster
    pub fn neu() -> Self {
        Self {
            inner: Arc::new(EventBroadcasterInner {
                peers: DashMap::new(),
            }),
        }
    }

    /// Registriert eine Verbindung und gibt ihre Empfangs-Queue zurueck
    ///
    /// Die `ClientConnection` liest aus dieser Queue und sendet via TCP.
    pub fn peer_registrieren(&self, peer_id: PeerId) -> mpsc::Receiver<ServerMessage> {
        let (tx, rx) = mpsc::channel(SEND_QUEUE_GROESSE);
        let sender = PeerSender {
            peer_id: peer_id.clone(),
            tx,
        };
        self.inner.peers.insert(peer_id.clone(), sender);
        tracing::debug!(peer_id = %peer_id, "Peer im Broadcaster registriert");
        rx
    }

    /// Entfernt eine Verbindung aus dem Broadcaster
    pub fn peer_entfernen(&self, peer_id: &PeerId) {
        self.inner.peers.remove(peer_id);
        tracing::debug!(peer_id = %peer_id, "Peer aus Broadcaster entfernt");
    }

    /// Sendet eine Nachricht an einen einzelnen Peer
    ///
    /// Gibt `true` zurueck wenn der Peer gefunden und die Nachricht eingereiht wurde.
    pub fn an_peer_senden(&self, peer_id: &PeerId, nachricht: ServerMessage) -> bool {
        match self.inner.peers.get(peer_id) {
            Some(sender) => sender.senden(nachricht),
            None => {
                tracing::debug!(peer_id = %peer_id, "Senden an unbekannten Peer");
                false
            }
        }
    }

    /// Sendet eine Nachricht an alle uebergebenen Peers
    ///
    /// Gibt die Anzahl der erfolgreichen Sendungen zurueck.
    pub fn an_peers_senden<'a>(
        &self,
        peers: impl IntoIterator<Item = &'a PeerId>,
        nachricht: &ServerMessage,
    ) -> usize {
        let mut gesendet = 0;
        for peer_id in peers {
            if let Some(sender) = self.inner.peers.get(peer_id) {
                if sender.senden(nachricht.clone()) {
                    gesendet += 1;
                }
            }
        }
        gesendet
    }

    /// Sendet eine Nachricht an alle uebergebenen Peers ausser einem
    ///
    /// Fuer Join/Leave-Events, die der Ausloeser nicht selbst bekommt.
    pub fn an_peers_ausser_senden<'a>(
        &self,
        peers: impl IntoIterator<Item = &'a PeerId>,
        ausgeschlossen: &PeerId,
        nachricht: &ServerMessage,
    ) -> usize {
        self.an_peers_senden(
            peers.into_iter().filter(|p| *p != ausgeschlossen),
            nachricht,
        )
    }

    /// Gibt die Anzahl der registrierten Verbindungen zurueck
    pub fn peer_anzahl(&self) -> usize {
        self.inner.peers.len()
    }

    /// Prueft ob eine Verbindung registriert ist
    pub fn ist_registriert(&self, peer_id: &PeerId) -> bool {
        self.inner.peers.contains_key(peer_id)
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::neu()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn test_nachricht() -> ServerMessage {
        ServerMessage::pong()
    }

    #[tokio::test]
    async fn peer_registrieren_und_senden() {
        let broadcaster = EventBroadcaster::neu();
        let peer = PeerId::erzeugen();

        let mut rx = broadcaster.peer_registrieren(peer.clone());
        assert!(broadcaster.ist_registriert(&peer));

        assert!(broadcaster.an_peer_senden(&peer, test_nachricht()));
        let empfangen = rx.try_recv().expect("Nachricht muss vorhanden sein");
        assert!(matches!(empfangen, ServerMessage::Pong(_)));
    }

    #[tokio::test]
    async fn an_peers_ausser_senden() {
        let broadcaster = EventBroadcaster::neu();
        let a = PeerId::erzeugen();
        let b = PeerId::erzeugen();
        let c = PeerId::erzeugen(); // nicht in der Liste

        let mut rx_a = broadcaster.peer_registrieren(a.clone());
        let mut rx_b = broadcaster.peer_registrieren(b.clone());
        let mut rx_c = broadcaster.peer_registrieren(c.clone());

        let gesendet =
            broadcaster.an_peers_ausser_senden([&a, &b], &a, &test_nachricht());
        assert_eq!(gesendet, 1);

        assert!(rx_a.try_recv().is_err(), "Ausloeser darf nichts empfangen");
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_c.try_recv().is_err(), "c darf nichts empfangen");
    }

    #[tokio::test]
    async fn volle_queue_verwirft() {
        let broadcaster = EventBroadcaster::neu();
        let peer = PeerId::erzeugen();
        let _rx = broadcaster.peer_registrieren(peer.clone());

        for _ in 0..SEND_QUEUE_GROESSE {
            assert!(broadcaster.an_peer_senden(&peer, test_nachricht()));
        }
        assert!(!broadcaster.an_peer_senden(&peer, test_nachricht()));
    }

    #[test]
    fn peer_entfernen() {
        let broadcaster = EventBroadcaster::neu();
        let peer = PeerId::erzeugen();
        let _rx = broadcaster.peer_registrieren(peer.clone());
        assert_eq!(broadcaster.peer_anzahl(), 1);

        broadcaster.peer_entfernen(&peer);
        assert!(!broadcaster.ist_registriert(&peer));
        assert!(!broadcaster.an_peer_senden(&peer, test_nachricht()));
    }
}
