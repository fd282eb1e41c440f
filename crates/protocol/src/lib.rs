//! raumfunk-protocol – Netzwerkprotokoll-Definitionen
//!
//! Dieses Crate definiert alle Nachrichtentypen, die zwischen Client und
//! Zonen-Dienst ausgetauscht werden, sowie den Frame-Codec fuer TCP.

pub mod messages;
pub mod wire;

pub use messages::{ClientMessage, Envelope, ErrorCode, ServerMessage};
pub use wire::{ClientCodec, Eingang, FrameCodec, ServerCodec};
