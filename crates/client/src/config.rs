//! Client-Konfiguration
//!
//! Alle Zeiten in Millisekunden. Jedes Feld hat einen Standardwert, eine
//! TOML-Datei muss nur die Abweichungen enthalten.

use raumfunk_audio::VadKonfig;
use raumfunk_core::STANDARD_CULL_DISTANZ;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{ClientError, ClientResult};

/// Vollstaendige Client-Konfiguration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Adresse des Zonen-Dienstes (`host:port`)
    pub server_adresse: String,

    // --- Verbindung ---
    pub reconnect_basis_ms: u64,
    pub reconnect_max_ms: u64,
    pub max_reconnect_versuche: u32,
    pub heartbeat_intervall_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub offline_queue_groesse: usize,

    // --- Mesh ---
    pub max_peers: usize,
    pub hysterese_ms: u64,
    pub handshake_timeout_ms: u64,
    pub close_timeout_ms: u64,
    /// Vorab gepufferte ICE-Kandidaten pro unbekanntem Peer
    pub ice_vorpuffer: usize,

    // --- Raum ---
    pub hoer_radius: f64,
    pub positions_intervall_ms: u64,
    pub tipp_timeout_ms: u64,

    // --- Audio ---
    pub abtastrate: u32,
    pub vad: VadKonfig,

    /// Kapazitaet des Ereignis-Busses
    pub ereignis_kapazitaet: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_adresse: "127.0.0.1:10000".into(),
            reconnect_basis_ms: 3_000,
            reconnect_max_ms: 30_000,
            max_reconnect_versuche: 10,
            heartbeat_intervall_ms: 15_000,
            heartbeat_timeout_ms: 45_000,
            offline_queue_groesse: 100,
            max_peers: 8,
            hysterese_ms: 5_000,
            handshake_timeout_ms: 10_000,
            close_timeout_ms: 2_000,
            ice_vorpuffer: 32,
            hoer_radius: STANDARD_CULL_DISTANZ,
            positions_intervall_ms: 100,
            tipp_timeout_ms: 3_000,
            abtastrate: 48_000,
            vad: VadKonfig::default(),
            ereignis_kapazitaet: 256,
        }
    }
}

impl ClientConfig {
    /// Liest die Konfiguration aus einem TOML-String
    pub fn aus_toml(text: &str) -> ClientResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| ClientError::Konfiguration(e.to_string()))?;
        config.pruefen()?;
        Ok(config)
    }

    /// Liest die Konfiguration aus einer Datei
    pub fn laden(pfad: impl AsRef<Path>) -> ClientResult<Self> {
        let text = std::fs::read_to_string(pfad.as_ref())?;
        Self::aus_toml(&text)
    }

    pub(crate) fn pruefen(&self) -> ClientResult<()> {
        if self.max_peers == 0 {
            return Err(ClientError::Konfiguration("max_peers muss > 0 sein".into()));
        }
        if self.heartbeat_timeout_ms <= self.heartbeat_intervall_ms {
            return Err(ClientError::Konfiguration(
                "heartbeat_timeout_ms muss groesser als heartbeat_intervall_ms sein".into(),
            ));
        }
        if self.offline_queue_groesse == 0 {
            return Err(ClientError::Konfiguration(
                "offline_queue_groesse muss > 0 sein".into(),
            ));
        }
        Ok(())
    }

    pub fn reconnect_basis(&self) -> Duration {
        Duration::from_millis(self.reconnect_basis_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }

    pub fn heartbeat_intervall(&self) -> Duration {
        Duration::from_millis(self.heartbeat_intervall_ms.max(1))
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn hysterese(&self) -> Duration {
        Duration::from_millis(self.hysterese_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    pub fn positions_intervall(&self) -> Duration {
        Duration::from_millis(self.positions_intervall_ms)
    }

    pub fn tipp_timeout(&self) -> Duration {
        Duration::from_millis(self.tipp_timeout_ms)
    }
}
