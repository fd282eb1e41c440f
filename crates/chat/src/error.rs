//! Fehlertypen fuer das Chat-Crate

use raumfunk_protocol::ErrorCode;
use thiserror::Error;

/// Chat-Fehlertypen
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("Nachrichteninhalt darf nicht leer sein")]
    LeereNachricht,

    #[error("Zu viele Nachrichten, erneut versuchen in {retry_after_secs} s")]
    RateLimitiert { retry_after_secs: u64 },

    #[error("Absender ist nicht Mitglied der Zone {0}")]
    NichtInZone(String),
}

impl ChatError {
    /// Wire-Code fuer die `error`-Antwort an den Absender
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::LeereNachricht => ErrorCode::EmptyMessage,
            Self::RateLimitiert { .. } => ErrorCode::RateLimited,
            Self::NichtInZone(_) => ErrorCode::NotInZone,
        }
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
