//! Gemeinsamer Dienst-Zustand
//!
//! Haelt Konfiguration, Zonen-Register, Broker, Broadcaster und Metriken
//! als Arc-Referenzen, die sicher zwischen tokio-Tasks geteilt werden.

use raumfunk_chat::{BrokerKonfig, MessageBroker};
use raumfunk_core::STANDARD_CULL_DISTANZ;
use raumfunk_observability::RaumfunkMetrics;
use raumfunk_protocol::messages::IceServer;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::broadcast::EventBroadcaster;
use crate::error::{SignalingError, SignalingResult};
use crate::registry::ZoneRegistry;

/// Konfiguration fuer den Zonen-Dienst
#[derive(Debug, Clone)]
pub struct SignalingConfig {
    /// Maximale gleichzeitige Verbindungen
    pub max_clients: usize,
    /// Verbindung wird getrennt, wenn so lange kein Frame ankommt
    pub verbindungs_timeout_sek: u64,
    /// Mesh-Plaetze pro Zone
    pub max_peers: usize,
    /// Maximale Mitglieder pro Zone
    pub max_zonen_mitglieder: usize,
    /// Hoerbarkeits-Radius in Metern
    pub cull_distanz: f64,
    /// Groesse des Verlaufs pro Zone
    pub verlauf_limit: usize,
    /// Maximale Nachrichtenlaenge in Zeichen
    pub max_nachrichtenlaenge: usize,
    /// Chat-Nachrichten pro Minute und Peer
    pub nachrichten_pro_minute: u32,
    /// Mitglieder ohne Lebenszeichen werden nach dieser Zeit entfernt
    pub peer_timeout_sek: u64,
    /// Intervall des Aufraeumers
    pub sweep_intervall_ms: u64,
    /// STUN/TURN-Server fuer die Clients
    pub ice_servers: Vec<IceServer>,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            max_clients: 512,
            verbindungs_timeout_sek: 60,
            max_peers: 8,
            max_zonen_mitglieder: 64,
            cull_distanz: STANDARD_CULL_DISTANZ,
            verlauf_limit: 50,
            max_nachrichtenlaenge: 1000,
            nachrichten_pro_minute: 30,
            peer_timeout_sek: 60,
            sweep_intervall_ms: 1000,
            ice_servers: vec![IceServer::stun("stun:stun.l.google.com:19302")],
        }
    }
}

impl SignalingConfig {
    pub fn peer_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_timeout_sek)
    }

    pub fn sweep_intervall(&self) -> Duration {
        Duration::from_millis(self.sweep_intervall_ms.max(1))
    }

    pub fn broker_konfig(&self) -> BrokerKonfig {
        BrokerKonfig {
            max_nachrichtenlaenge: self.max_nachrichtenlaenge,
            nachrichten_pro_minute: self.nachrichten_pro_minute,
            verlauf_limit: self.verlauf_limit,
        }
    }
}

/// Gemeinsamer Dienst-Zustand (thread-safe, Arc-geteilt)
pub struct SignalingState {
    /// Dienst-Konfiguration
    pub config: Arc<SignalingConfig>,
    /// Alle aktiven Zonen
    pub registry: ZoneRegistry,
    /// Chat-Annahme und Wiedergabe
    pub broker: MessageBroker,
    /// Ausgehende Queues aller Verbindungen
    pub broadcaster: EventBroadcaster,
    /// Prometheus-Metriken
    pub metriken: RaumfunkMetrics,
    /// Startzeitpunkt des Dienstes (fuer Uptime-Berechnung)
    pub start_time: Instant,
}

impl SignalingState {
    /// Erstellt einen neuen SignalingState
    pub fn neu(config: SignalingConfig, metriken: RaumfunkMetrics) -> Arc<Self> {
        let broker = MessageBroker::neu(config.broker_konfig());
        Arc::new(Self {
            config: Arc::new(config),
            registry: ZoneRegistry::neu(),
            broker,
            broadcaster: EventBroadcaster::neu(),
            metriken,
            start_time: Instant::now(),
        })
    }

    /// Zustand mit eigener Metrik-Registry (Tests, eingebettete Dienste)
    pub fn mit_standard_metriken(config: SignalingConfig) -> SignalingResult<Arc<Self>> {
        let metriken = RaumfunkMetrics::neu()
            .map_err(|e| SignalingError::intern(format!("Metriken: {e}")))?;
        Ok(Self::neu(config, metriken))
    }

    /// Gibt die Uptime in Sekunden zurueck
    pub fn uptime_sek(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Aktualisiert die Zonen-Gauge
    pub(crate) fn zonen_metrik_aktualisieren(&self) {
        self.metriken
            .zones_active
            .set(self.registry.zonen_anzahl() as f64);
    }
}
