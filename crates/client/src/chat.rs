//! Client-seitiger Chat-Zustand einer Zone
//!
//! Prueft die Sequenznummern eingehender Nachrichten. Duplikate werden
//! verworfen; eine Luecke loest einen `resync` aus, bis zum
//! `reconnected` werden weitere Nachrichten zurueckgehalten.

use raumfunk_core::types::ZoneId;
use raumfunk_protocol::messages::{ChatMessage, Reconnected};

#[derive(Debug, Clone, PartialEq)]
pub enum Empfang {
    /// Naechste erwartete Nachricht, an die Anwendung weitergeben
    Neu(ChatMessage),
    Duplikat,
    /// Nachrichten fehlen; `resync` ab `letzte_seq` anfordern
    Luecke { letzte_seq: u64 },
    /// Waehrend eines laufenden Resyncs oder fuer eine fremde Zone
    Verworfen,
}

/// Ergebnis einer Wiedergabe nach Wiederverbinden oder Resync
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Wiedergabe {
    pub nachrichten: Vec<ChatMessage>,
    /// Verlauf wurde gekuerzt, die Anwendung muss ihre Liste ersetzen
    pub zurueckgesetzt: bool,
}

#[derive(Debug, Default)]
pub struct ChatZustand {
    zone: Option<ZoneId>,
    letzte_seq: u64,
    resync_laeuft: bool,
}

impl ChatZustand {
    pub fn neu() -> Self {
        Self::default()
    }

    pub fn zone(&self) -> Option<&ZoneId> {
        self.zone.as_ref()
    }

    pub fn letzte_seq(&self) -> u64 {
        self.letzte_seq
    }

    /// Verlauf aus `zone_joined` uebernehmen
    ///
    /// Beim Wiederbeitritt zur selben Zone bleibt die bekannte Sequenz
    /// erhalten; der Verlauf liefert dann nur Nachrichten, die neu sind.
    pub fn verlauf_setzen(&mut self, zone: &ZoneId, verlauf: &[ChatMessage]) -> Vec<ChatMessage> {
        if self.zone.as_ref() != Some(zone) {
            self.zone = Some(zone.clone());
            self.letzte_seq = 0;
        }
        self.resync_laeuft = false;
        let neu: Vec<ChatMessage> = verlauf
            .iter()
            .filter(|m| m.seq > self.letzte_seq)
            .cloned()
            .collect();
        if let Some(max) = neu.iter().map(|m| m.seq).max() {
            self.letzte_seq = max;
        }
        neu
    }

    pub fn empfangen(&mut self, nachricht: ChatMessage) -> Empfang {
        if self.zone.as_ref() != Some(&nachricht.zone_id) || self.resync_laeuft {
            return Empfang::Verworfen;
        }
        if nachricht.seq <= self.letzte_seq {
            return Empfang::Duplikat;
        }
        if nachricht.seq > self.letzte_seq + 1 {
            self.resync_laeuft = true;
            return Empfang::Luecke {
                letzte_seq: self.letzte_seq,
            };
        }
        self.letzte_seq = nachricht.seq;
        Empfang::Neu(nachricht)
    }

    /// Eigene Nachricht wurde bestaetigt
    pub fn bestaetigt(&mut self, seq: u64) {
        if !self.resync_laeuft && seq == self.letzte_seq + 1 {
            self.letzte_seq = seq;
        }
    }

    pub fn wiedergabe(&mut self, r: Reconnected) -> Wiedergabe {
        if self.zone.as_ref() != Some(&r.zone_id) {
            return Wiedergabe::default();
        }
        self.resync_laeuft = false;

        let mut nachrichten = r.missed_messages;
        nachrichten.sort_by_key(|m| m.seq);
        if r.history_truncated {
            // Neu beginnen, auch wenn der Puffer des Dienstes leer ist
            self.letzte_seq = nachrichten.last().map_or(0, |m| m.seq);
        } else {
            nachrichten.retain(|m| m.seq > self.letzte_seq);
            if let Some(letzte) = nachrichten.last() {
                self.letzte_seq = self.letzte_seq.max(letzte.seq);
            }
        }
        Wiedergabe {
            nachrichten,
            zurueckgesetzt: r.history_truncated,
        }
    }

    pub fn verlassen(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raumfunk_core::types::{MessageId, UserId};

    fn nachricht(seq: u64) -> ChatMessage {
        ChatMessage {
            id: MessageId::new(),
            seq,
            zone_id: ZoneId::new("hub"),
            user_id: UserId::new("u1"),
            user_name: "Alice".into(),
            content: format!("#{seq}"),
            timestamp: 0,
            reply_to: None,
            client_msg_id: None,
        }
    }

    fn mit_zone() -> ChatZustand {
        let mut c = ChatZustand::neu();
        c.verlauf_setzen(&ZoneId::new("hub"), &[nachricht(1), nachricht(2)]);
        c
    }

    #[test]
    fn verlauf_setzt_sequenz() {
        let c = mit_zone();
        assert_eq!(c.letzte_seq(), 2);
    }

    #[test]
    fn wiederbeitritt_liefert_nur_neues() {
        let mut c = mit_zone();
        let neu = c.verlauf_setzen(&ZoneId::new("hub"), &[nachricht(2), nachricht(3)]);
        assert_eq!(neu.len(), 1);
        assert_eq!(neu[0].seq, 3);
    }

    #[test]
    fn duplikate_verworfen() {
        let mut c = mit_zone();
        assert!(matches!(c.empfangen(nachricht(3)), Empfang::Neu(_)));
        assert_eq!(c.empfangen(nachricht(3)), Empfang::Duplikat);
        assert_eq!(c.empfangen(nachricht(1)), Empfang::Duplikat);
    }

    #[test]
    fn luecke_haelt_an_bis_wiedergabe() {
        let mut c = mit_zone();
        assert_eq!(c.empfangen(nachricht(5)), Empfang::Luecke { letzte_seq: 2 });
        assert_eq!(c.empfangen(nachricht(6)), Empfang::Verworfen);

        let w = c.wiedergabe(Reconnected {
            zone_id: ZoneId::new("hub"),
            missed_messages: vec![nachricht(4), nachricht(3), nachricht(5), nachricht(6)],
            history_truncated: false,
        });
        let seqs: Vec<u64> = w.nachrichten.iter().map(|m| m.seq).collect();
        assert_eq!(seqs, vec![3, 4, 5, 6]);
        assert!(!w.zurueckgesetzt);
        assert_eq!(c.letzte_seq(), 6);
        assert!(matches!(c.empfangen(nachricht(7)), Empfang::Neu(_)));
    }

    #[test]
    fn gekuerzte_wiedergabe_setzt_zurueck() {
        let mut c = mit_zone();
        let w = c.wiedergabe(Reconnected {
            zone_id: ZoneId::new("hub"),
            missed_messages: vec![nachricht(50), nachricht(51)],
            history_truncated: true,
        });
        assert!(w.zurueckgesetzt);
        assert_eq!(w.nachrichten.len(), 2);
        assert_eq!(c.letzte_seq(), 51);
    }

    #[test]
    fn leere_gekuerzte_wiedergabe_setzt_sequenz_zurueck() {
        let mut c = mit_zone();
        assert_eq!(c.letzte_seq(), 2);
        let w = c.wiedergabe(Reconnected {
            zone_id: ZoneId::new("hub"),
            missed_messages: Vec::new(),
            history_truncated: true,
        });
        assert!(w.zurueckgesetzt);
        assert!(w.nachrichten.is_empty());
        assert_eq!(c.letzte_seq(), 0);
        // Der neu gestartete Dienst zaehlt wieder ab 1
        assert!(matches!(c.empfangen(nachricht(1)), Empfang::Neu(m) if m.seq == 1));
        assert_eq!(c.letzte_seq(), 1);
    }

    #[test]
    fn fremde_zone_verworfen() {
        let mut c = mit_zone();
        let mut m = nachricht(3);
        m.zone_id = ZoneId::new("lounge");
        assert_eq!(c.empfangen(m), Empfang::Verworfen);
    }

    #[test]
    fn bestaetigung_schiebt_sequenz() {
        let mut c = mit_zone();
        c.bestaetigt(3);
        assert_eq!(c.letzte_seq(), 3);
        assert_eq!(c.empfangen(nachricht(3)), Empfang::Duplikat);
    }
}
