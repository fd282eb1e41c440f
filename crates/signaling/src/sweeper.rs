//! Aufraeumer – periodische Wartung aller Zonen
//!
//! Pro Lauf:
//! - Mitglieder ohne Lebenszeichen seit `peer_timeout` werden ausgetragen
//!   (mit `zone_left` an die alte Verbindung, falls sie noch lebt).
//! - Zonen mit geaenderten Positionen bekommen eine volle Neuberechnung
//!   der Hoerbarkeits-Saetze.
//! - Rate-Limiter-Eintraege untaetiger Peers werden verworfen.

use std::sync::Arc;
use tokio::time::Instant;

use crate::handlers::zone_handler::mitglied_austragen;
use crate::relay;
use crate::server_state::SignalingState;

/// Ergebnis eines Aufraeumlaufs
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AufraeumBericht {
    /// Ausgetragene Mitglieder
    pub entfernt: usize,
    /// Zonen mit voller Hoerbarkeits-Neuberechnung
    pub aufgefrischt: usize,
}

/// Fuehrt einen einzelnen Aufraeumlauf aus
pub fn einmal_aufraeumen(state: &SignalingState) -> AufraeumBericht {
    let mut bericht = AufraeumBericht::default();
    let grenze = Instant::now().checked_sub(state.config.peer_timeout());

    for zone_id in state.registry.zonen_ids() {
        state.registry.mit_zone(&zone_id, |zone| {
            if let Some(grenze) = grenze {
                for peer_id in zone.veraltete(grenze) {
                    tracing::info!(zone = %zone_id, peer_id = %peer_id, "Mitglied ohne Lebenszeichen entfernt");
                    if mitglied_austragen(state, zone, &peer_id, true) {
                        bericht.entfernt += 1;
                    }
                }
            }

            if zone.positionen_geaendert_nehmen() {
                let inhaber: Vec<_> = zone.slot_inhaber().map(|m| m.peer_id().clone()).collect();
                relay::hoerbarkeit_verteilen(
                    zone,
                    state.config.cull_distanz,
                    &state.broadcaster,
                    &inhaber,
                );
                bericht.aufgefrischt += 1;
            }
        });
    }

    state.broker.aufraeumen();
    state.zonen_metrik_aktualisieren();
    bericht
}

/// Startet den Aufraeumer als Hintergrund-Task
///
/// Laeuft bis `shutdown_rx` ein `true`-Signal empfaengt.
pub fn aufraeumer_starten(
    state: Arc<SignalingState>,
    mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut intervall = tokio::time::interval(state.config.sweep_intervall());
        intervall.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = intervall.tick() => {
                    let bericht = einmal_aufraeumen(&state);
                    if bericht.entfernt > 0 {
                        tracing::debug!(entfernt = bericht.entfernt, "Aufraeumlauf beendet");
                    }
                }
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("Aufraeumer gestoppt");
    })
}
