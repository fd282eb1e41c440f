//! Begrenzter Nachrichtenverlauf einer Zone
//!
//! Vergibt die Sequenznummern der Zone (beginnend bei 1) und haelt die
//! letzten `limit` Nachrichten. Die aelteste Nachricht wird zuerst verdraengt.

use std::collections::VecDeque;

use raumfunk_core::types::UserId;
use raumfunk_protocol::messages::ChatMessage;
use uuid::Uuid;

use crate::types::Wiedergabe;

#[derive(Debug, Clone)]
pub struct ZoneHistory {
    limit: usize,
    /// Sequenz der naechsten angenommenen Nachricht
    naechste_seq: u64,
    nachrichten: VecDeque<ChatMessage>,
}

impl ZoneHistory {
    pub fn neu(limit: usize) -> Self {
        Self {
            limit,
            naechste_seq: 1,
            nachrichten: VecDeque::with_capacity(limit.min(1024)),
        }
    }

    /// Vergibt die naechste Sequenz
    pub fn seq_vergeben(&mut self) -> u64 {
        let seq = self.naechste_seq;
        self.naechste_seq += 1;
        seq
    }

    /// Setzt die Sequenz einer neu angelegten Zone hinter `letzte_seq` fort
    ///
    /// Verhindert, dass eine geleerte und neu angelegte Zone Sequenzen
    /// erneut vergibt, die Clients noch als `lastSeenSeq` kennen.
    pub fn seq_fortsetzen(&mut self, letzte_seq: u64) {
        if self.nachrichten.is_empty() {
            self.naechste_seq = self.naechste_seq.max(letzte_seq.saturating_add(1));
        }
    }

    /// Haengt eine Nachricht an und verdraengt bei Bedarf die aelteste
    pub fn anhaengen(&mut self, nachricht: ChatMessage) {
        self.nachrichten.push_back(nachricht);
        while self.nachrichten.len() > self.limit {
            self.nachrichten.pop_front();
        }
    }

    /// Hoechste bisher vergebene Sequenz (0 wenn noch keine)
    pub fn letzte_seq(&self) -> u64 {
        self.naechste_seq - 1
    }

    pub fn len(&self) -> usize {
        self.nachrichten.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nachrichten.is_empty()
    }

    /// Die letzten `n` Nachrichten in Sequenzreihenfolge
    pub fn letzte(&self, n: usize) -> Vec<ChatMessage> {
        let start = self.nachrichten.len().saturating_sub(n);
        self.nachrichten.iter().skip(start).cloned().collect()
    }

    /// Nachrichten mit `seq > last_seen`
    ///
    /// Ist die Luecke nicht mehr vollstaendig gepuffert oder liegt
    /// `last_seen` hinter der neuesten Sequenz (Dienst neu gestartet),
    /// wird der ganze Puffer mit `abgeschnitten = true` geliefert.
    pub fn nach(&self, last_seen: u64) -> Wiedergabe {
        let zone_neu_angelegt = last_seen > self.letzte_seq();
        // Ohne Puffer waere die naechste gepufferte Nachricht die naechste Sequenz
        let erste_gepufferte = self
            .nachrichten
            .front()
            .map_or(self.naechste_seq, |aelteste| aelteste.seq);
        let luecke_verdraengt = erste_gepufferte > last_seen.saturating_add(1);

        if zone_neu_angelegt || luecke_verdraengt {
            return Wiedergabe {
                nachrichten: self.nachrichten.iter().cloned().collect(),
                abgeschnitten: true,
            };
        }

        Wiedergabe {
            nachrichten: self
                .nachrichten
                .iter()
                .filter(|m| m.seq > last_seen)
                .cloned()
                .collect(),
            abgeschnitten: false,
        }
    }

    /// Sucht eine gepufferte Nachricht desselben Benutzers mit dieser `clientMsgId`
    pub fn finde_client_msg(&self, user_id: &UserId, client_msg_id: Uuid) -> Option<&ChatMessage> {
        self.nachrichten
            .iter()
            .rev()
            .find(|m| m.client_msg_id == Some(client_msg_id) && &m.user_id == user_id)
    }
}
