//! Handler fuer alle Client-Nachrichten
//!
//! Jeder Handler ist fuer eine Gruppe von Nachrichtentypen zustaendig und
//! hat Zugriff auf den gemeinsamen SignalingState. Frames an andere
//! Mitglieder werden unter der Sperre der Zone eingereiht.

pub mod chat_handler;
pub mod voice_handler;
pub mod zone_handler;
