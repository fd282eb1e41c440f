//! raumfunk-chat – Nachrichten-Broker
//!
//! Dieses Crate implementiert die Datenebene des Chats:
//! - ZoneHistory: begrenzter Verlauf mit Sequenzvergabe und Wiedergabe
//! - MessageBroker: Validierung, Kuerzung, Duplikaterkennung, Rate Limiting
//! - RateLimiter: Token-Bucket pro Peer
//!
//! # Beispiel
//!
//! ```
//! use raumfunk_chat::{Absender, Annahme, BrokerKonfig, MessageBroker};
//! use raumfunk_core::types::{PeerId, UserId, ZoneId};
//! use raumfunk_protocol::messages::ChatRequest;
//!
//! let broker = MessageBroker::neu(BrokerKonfig::default());
//! let mut verlauf = broker.verlauf_anlegen();
//! let zone = ZoneId::new("hub");
//! let absender = Absender {
//!     peer_id: PeerId::new("peer_000000000001"),
//!     user_id: UserId::new("u1"),
//!     user_name: "Alice".into(),
//! };
//! let anfrage = ChatRequest {
//!     zone_id: zone.clone(),
//!     content: "hi".into(),
//!     client_msg_id: None,
//!     reply_to: None,
//! };
//! let annahme = broker.annehmen(&mut verlauf, &zone, &absender, anfrage).unwrap();
//! assert!(matches!(annahme, Annahme::Neu(ref m) if m.seq == 1));
//! ```

pub mod broker;
pub mod error;
pub mod history;
pub mod rate_limit;
pub mod types;

#[cfg(test)]
mod tests;

// Bequeme Re-Exporte
pub use broker::MessageBroker;
pub use error::{ChatError, ChatResult};
pub use history::ZoneHistory;
pub use rate_limit::RateLimiter;
pub use types::{Absender, Annahme, BrokerKonfig, Wiedergabe};
