//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Dienst ohne Konfigurationsdatei
//! lauffaehig ist.

use raumfunk_core::STANDARD_CULL_DISTANZ;
use raumfunk_observability::{log_format_gueltig, log_level_gueltig};
use raumfunk_protocol::messages::IceServer;
use raumfunk_signaling::SignalingConfig;
use serde::{Deserialize, Serialize};

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Allgemeine Einstellungen
    pub server: ServerEinstellungen,
    /// Bind-Adresse und Ports
    pub netzwerk: NetzwerkEinstellungen,
    /// Zonen, Mesh und Hoerbarkeit
    pub zonen: ZonenEinstellungen,
    /// Chat-Verlauf und Rate-Limit
    pub chat: ChatEinstellungen,
    /// Liveness der Verbindungen
    pub verbindung: VerbindungsEinstellungen,
    /// STUN/TURN-Server fuer die Clients
    pub ice: IceEinstellungen,
    pub logging: LoggingEinstellungen,
    /// Status-API und Metriken
    pub observability: ObservabilityEinstellungen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEinstellungen {
    /// Anzeigename des Dienstes
    pub name: String,
    /// Maximale Anzahl gleichzeitiger Verbindungen
    pub max_clients: usize,
}

impl Default for ServerEinstellungen {
    fn default() -> Self {
        Self {
            name: "Raumfunk".into(),
            max_clients: 512,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    pub bind_adresse: String,
    /// Port fuer das Zonen-Protokoll
    pub tcp_port: u16,
    /// Port fuer Status-API und `/metrics`
    pub api_port: u16,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            tcp_port: 10000,
            api_port: 10080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZonenEinstellungen {
    /// Mesh-Plaetze pro Zone
    pub max_peers: usize,
    pub max_mitglieder: usize,
    /// Hoerbarkeits-Radius in Metern
    pub cull_distanz: f64,
    /// Intervall der periodischen Hoerbarkeits-Berechnung
    pub sweep_intervall_ms: u64,
}

impl Default for ZonenEinstellungen {
    fn default() -> Self {
        Self {
            max_peers: 8,
            max_mitglieder: 64,
            cull_distanz: STANDARD_CULL_DISTANZ,
            sweep_intervall_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatEinstellungen {
    /// Nachrichten im Verlauf pro Zone
    pub verlauf_limit: usize,
    /// Maximale Laenge in Zeichen
    pub max_nachrichtenlaenge: usize,
    pub nachrichten_pro_minute: u32,
}

impl Default for ChatEinstellungen {
    fn default() -> Self {
        Self {
            verlauf_limit: 50,
            max_nachrichtenlaenge: 1000,
            nachrichten_pro_minute: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerbindungsEinstellungen {
    /// Verbindung wird getrennt, wenn so lange kein Frame ankommt
    pub timeout_sek: u64,
    /// Mitglieder ohne Lebenszeichen werden nach dieser Zeit entfernt
    pub peer_timeout_sek: u64,
}

impl Default for VerbindungsEinstellungen {
    fn default() -> Self {
        Self {
            timeout_sek: 60,
            peer_timeout_sek: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IceEinstellungen {
    pub server: Vec<IceServer>,
}

impl Default for IceEinstellungen {
    fn default() -> Self {
        Self {
            server: vec![IceServer::stun("stun:stun.l.google.com:19302")],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityEinstellungen {
    /// Startet Status-API und `/metrics`
    pub aktiviert: bool,
}

impl Default for ObservabilityEinstellungen {
    fn default() -> Self {
        Self { aktiviert: true }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        let config = match std::fs::read_to_string(pfad) {
            Ok(inhalt) => Self::aus_toml(&inhalt)
                .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Self::default()
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
                ))
            }
        };
        config.pruefen()?;
        Ok(config)
    }

    pub fn aus_toml(inhalt: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(inhalt)?)
    }

    /// Weist Werte zurueck, mit denen der Dienst nicht sinnvoll laeuft
    pub fn pruefen(&self) -> anyhow::Result<()> {
        if self.zonen.max_peers == 0 {
            anyhow::bail!("zonen.max_peers muss groesser als 0 sein");
        }
        if self.zonen.max_mitglieder == 0 {
            anyhow::bail!("zonen.max_mitglieder muss groesser als 0 sein");
        }
        if self.zonen.cull_distanz.is_nan() || self.zonen.cull_distanz <= 0.0 {
            anyhow::bail!("zonen.cull_distanz muss positiv sein");
        }
        if self.chat.verlauf_limit == 0 {
            anyhow::bail!("chat.verlauf_limit muss groesser als 0 sein");
        }
        if !log_level_gueltig(&self.logging.level) {
            anyhow::bail!("Unbekannter Log-Level '{}'", self.logging.level);
        }
        if !log_format_gueltig(&self.logging.format) {
            anyhow::bail!("Unbekanntes Log-Format '{}'", self.logging.format);
        }
        Ok(())
    }

    /// Bind-Adresse fuer das Zonen-Protokoll
    pub fn tcp_bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.tcp_port)
    }

    /// Bind-Adresse fuer Status-API und Metriken
    pub fn api_bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.api_port)
    }

    /// Laufzeit-Konfiguration des Zonen-Dienstes
    pub fn signaling_config(&self) -> SignalingConfig {
        SignalingConfig {
            max_clients: self.server.max_clients,
            verbindungs_timeout_sek: self.verbindung.timeout_sek,
            max_peers: self.zonen.max_peers,
            max_zonen_mitglieder: self.zonen.max_mitglieder,
            cull_distanz: self.zonen.cull_distanz,
            verlauf_limit: self.chat.verlauf_limit,
            max_nachrichtenlaenge: self.chat.max_nachrichtenlaenge,
            nachrichten_pro_minute: self.chat.nachrichten_pro_minute,
            peer_timeout_sek: self.verbindung.peer_timeout_sek,
            sweep_intervall_ms: self.zonen.sweep_intervall_ms,
            ice_servers: self.ice.server.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_config_ist_valide() {
        let cfg = ServerConfig::default();
        assert!(cfg.pruefen().is_ok());
        assert_eq!(cfg.server.max_clients, 512);
        assert_eq!(cfg.netzwerk.tcp_port, 10000);
        assert_eq!(cfg.zonen.max_peers, 8);
        assert_eq!(cfg.chat.verlauf_limit, 50);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn bind_adressen() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.tcp_bind_adresse(), "0.0.0.0:10000");
        assert_eq!(cfg.api_bind_adresse(), "0.0.0.0:10080");
    }

    #[test]
    fn config_aus_toml_string() {
        let toml = r#"
            [server]
            name = "Buero"

            [zonen]
            max_peers = 4

            [chat]
            nachrichten_pro_minute = 10

            [[ice.server]]
            urls = ["turn:turn.example.org:3478"]
            username = "raum"
            credential = "funk"
        "#;
        let cfg = ServerConfig::aus_toml(toml).unwrap();
        assert_eq!(cfg.server.name, "Buero");
        assert_eq!(cfg.zonen.max_peers, 4);
        // Nicht angegebene Felder behalten Standardwerte
        assert_eq!(cfg.zonen.max_mitglieder, 64);
        assert_eq!(cfg.ice.server.len(), 1);
        assert_eq!(cfg.ice.server[0].username.as_deref(), Some("raum"));

        let sig = cfg.signaling_config();
        assert_eq!(sig.max_peers, 4);
        assert_eq!(sig.nachrichten_pro_minute, 10);
        assert_eq!(sig.ice_servers, cfg.ice.server);
    }

    #[test]
    fn ungueltige_werte_abgelehnt() {
        let mut cfg = ServerConfig::default();
        cfg.zonen.max_peers = 0;
        assert!(cfg.pruefen().is_err());

        let mut cfg = ServerConfig::default();
        cfg.logging.format = "xml".into();
        assert!(cfg.pruefen().is_err());
    }

    #[test]
    fn fehlende_datei_liefert_standardwerte() {
        let cfg = ServerConfig::laden("/nicht/vorhanden/raumfunk.toml").unwrap();
        assert_eq!(cfg.netzwerk.api_port, 10080);
    }
}
