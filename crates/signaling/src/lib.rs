//! raumfunk-signaling – Zonen-Dienst
//!
//! Dieser Crate implementiert den zentralen Dienst von Raumfunk: Zonen-
//! Mitgliedschaft, Chat mit Verlauf und Wiedergabe, das Weiterreichen von
//! WebRTC-Signalen und die Berechnung der Hoerbarkeits-Saetze.
//!
//! ## Architektur
//!
//! ```text
//! TCP Listener (SignalingServer)
//!     |
//!     v
//! ClientConnection (pro Verbindung ein Task, eigene PeerId)
//!     |
//!     v
//! MessageDispatcher
//!     |
//!     +-- zone_handler   (Join, Leave, Typing, Presence, Resync)
//!     +-- chat_handler   (Chat -> MessageBroker)
//!     +-- voice_handler  (Offer, Answer, ICE, Voice-State, Position)
//!
//! ZoneRegistry     – Zonen hinter eigener Sperre, Mesh-Plaetze, Verlauf
//! EventBroadcaster – begrenzte Sende-Queue pro Verbindung
//! Aufraeumer       – Liveness und periodische Hoerbarkeit
//! api_router       – Status-API und /metrics
//! ```

pub mod api;
pub mod broadcast;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod registry;
pub mod relay;
pub mod server_state;
pub mod sweeper;
pub mod tcp;

// Bequeme Re-Exporte
pub use api::api_router;
pub use broadcast::EventBroadcaster;
pub use connection::ClientConnection;
pub use dispatcher::{DispatcherContext, MessageDispatcher};
pub use error::{SignalingError, SignalingResult};
pub use registry::{Zone, ZoneRegistry};
pub use server_state::{SignalingConfig, SignalingState};
pub use sweeper::{aufraeumer_starten, einmal_aufraeumen};
pub use tcp::SignalingServer;
