//! Oeffentliche Typen fuer den Nachrichten-Broker

use raumfunk_core::types::{PeerId, UserId};
use raumfunk_protocol::messages::ChatMessage;

/// Verfasser einer Nachricht, wie ihn die Zone kennt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Absender {
    pub peer_id: PeerId,
    pub user_id: UserId,
    pub user_name: String,
}

/// Ergebnis einer erfolgreichen Annahme
#[derive(Debug, Clone, PartialEq)]
pub enum Annahme {
    /// Neu gespeichert, muss an alle Mitglieder verteilt werden
    Neu(ChatMessage),
    /// Wiederholung einer bereits gespeicherten Nachricht (gleiche `clientMsgId`),
    /// wird nur erneut bestaetigt
    Duplikat(ChatMessage),
}

impl Annahme {
    pub fn nachricht(&self) -> &ChatMessage {
        match self {
            Self::Neu(m) | Self::Duplikat(m) => m,
        }
    }
}

/// Antwort auf eine Wiedergabe-Anfrage nach `lastSeenSeq`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Wiedergabe {
    pub nachrichten: Vec<ChatMessage>,
    /// Die Luecke ist groesser als der Puffer, der Verlauf gilt als zurueckgesetzt
    pub abgeschnitten: bool,
}

/// Grenzen des Brokers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerKonfig {
    /// Maximale Nachrichtenlaenge in Zeichen (laengere werden gekuerzt)
    pub max_nachrichtenlaenge: usize,
    /// Nachrichten pro Minute und Peer
    pub nachrichten_pro_minute: u32,
    /// Groesse des Verlaufs pro Zone
    pub verlauf_limit: usize,
}

impl Default for BrokerKonfig {
    fn default() -> Self {
        Self {
            max_nachrichtenlaenge: 1000,
            nachrichten_pro_minute: 30,
            verlauf_limit: 50,
        }
    }
}
