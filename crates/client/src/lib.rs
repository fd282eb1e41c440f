//! raumfunk-client – Client-Engine fuer Raumfunk
//!
//! - `connection`: Verbindung zum Zonen-Dienst, Backoff, Heartbeat,
//!   Offline-Warteschlange
//! - `mesh`: Peer-Verbindungen fuer hoerbare Peers (Mesh-Obergrenze,
//!   Hysterese, Handshake-Wiederholung)
//! - `presence`: Drosselung von Position und Sprachzustand, Tipp-Entpreller
//! - `chat`: Sequenzpruefung, Resync und Wiedergabe
//! - `engine`: fuehrt alles in einem Task zusammen, Ereignisse als
//!   [`EngineEvent`]
//!
//! Medien (WebRTC, Mikrofon) kommen ueber [`MedienBackend`] herein; das
//! [`simulation::SimuliertesBackend`] dient Tests und Clients ohne Audio.

pub mod chat;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod media;
pub mod mesh;
pub mod presence;
pub mod queue;
pub mod simulation;

pub use config::ClientConfig;
pub use connection::{TcpVerbinder, Verbinder, VerbindungsManager, VerbindungsZustand};
pub use engine::{EngineEvent, PeerStatus, RaumfunkEngine};
pub use error::{ClientError, ClientResult};
pub use media::{MedienBackend, MedienEreignis, PeerVerbindung};
pub use mesh::{MeshAktion, PeerMesh, PeerPhase};
