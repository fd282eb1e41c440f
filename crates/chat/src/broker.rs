//! MessageBroker – Annahme, Sequenzierung und Wiedergabe von Chat-Nachrichten
//!
//! Der Broker haelt keinen eigenen Zonenzustand. Der Aufrufer uebergibt den
//! Verlauf der Zone und haelt dabei die Sperre der Zone, sodass Sequenz
//! und Verteilung pro Zone serialisiert sind.

use raumfunk_core::types::{MessageId, ZoneId};
use raumfunk_protocol::messages::{jetzt_ms, ChatMessage, ChatRequest};

use crate::{
    error::{ChatError, ChatResult},
    history::ZoneHistory,
    rate_limit::RateLimiter,
    types::{Absender, Annahme, BrokerKonfig, Wiedergabe},
};

pub struct MessageBroker {
    konfig: BrokerKonfig,
    limiter: RateLimiter,
}

impl MessageBroker {
    pub fn neu(konfig: BrokerKonfig) -> Self {
        let limiter = RateLimiter::neu(konfig.nachrichten_pro_minute);
        Self { konfig, limiter }
    }

    pub fn konfig(&self) -> &BrokerKonfig {
        &self.konfig
    }

    /// Leerer Verlauf fuer eine neu angelegte Zone
    pub fn verlauf_anlegen(&self) -> ZoneHistory {
        ZoneHistory::neu(self.konfig.verlauf_limit)
    }

    /// Prueft eine eingehende Nachricht und haengt sie an den Verlauf an
    ///
    /// Reihenfolge der Pruefungen: leerer Inhalt, Duplikat per
    /// `clientMsgId`, Rate Limit. Duplikate verbrauchen kein Token.
    pub fn annehmen(
        &self,
        verlauf: &mut ZoneHistory,
        zone_id: &ZoneId,
        absender: &Absender,
        anfrage: ChatRequest,
    ) -> ChatResult<Annahme> {
        let inhalt = anfrage.content.trim();
        if inhalt.is_empty() {
            return Err(ChatError::LeereNachricht);
        }

        if let Some(client_msg_id) = anfrage.client_msg_id {
            if let Some(vorhanden) = verlauf.finde_client_msg(&absender.user_id, client_msg_id) {
                tracing::debug!(
                    zone = %zone_id,
                    peer_id = %absender.peer_id,
                    seq = vorhanden.seq,
                    "Duplikat erkannt, nur erneut bestaetigt"
                );
                return Ok(Annahme::Duplikat(vorhanden.clone()));
            }
        }

        if let Err(retry_after_secs) = self.limiter.pruefen(&absender.user_id) {
            tracing::debug!(
                zone = %zone_id,
                peer_id = %absender.peer_id,
                retry_after_secs,
                "Rate Limit erreicht"
            );
            return Err(ChatError::RateLimitiert { retry_after_secs });
        }

        let content: String = inhalt.chars().take(self.konfig.max_nachrichtenlaenge).collect();
        let nachricht = ChatMessage {
            id: MessageId::new(),
            seq: verlauf.seq_vergeben(),
            zone_id: zone_id.clone(),
            user_id: absender.user_id.clone(),
            user_name: absender.user_name.clone(),
            content,
            timestamp: jetzt_ms(),
            reply_to: anfrage.reply_to,
            client_msg_id: anfrage.client_msg_id,
        };
        verlauf.anhaengen(nachricht.clone());

        tracing::debug!(zone = %zone_id, seq = nachricht.seq, "Nachricht angenommen");
        Ok(Annahme::Neu(nachricht))
    }

    /// Nachrichten nach `last_seen` fuer Wiederbeitritt oder Resync
    pub fn wiedergabe(&self, verlauf: &ZoneHistory, last_seen: u64) -> Wiedergabe {
        verlauf.nach(last_seen)
    }

    /// Verlauf fuer einen frischen Beitritt
    pub fn aktueller_verlauf(&self, verlauf: &ZoneHistory) -> Vec<ChatMessage> {
        verlauf.letzte(self.konfig.verlauf_limit)
    }

    /// Periodische Bereinigung inaktiver Buckets
    pub fn aufraeumen(&self) {
        self.limiter.cleanup();
    }
}
