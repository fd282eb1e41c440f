//! Signaling-Relay – Zustellregeln und Hoerbarkeits-Saetze
//!
//! Offer/Answer/ICE werden ohne Interpretation an den Ziel-Peer
//! weitergereicht. Am Voice-Mesh nehmen nur Mitglieder mit Mesh-Platz teil.
//! Fuer jeden Platz-Inhaber berechnet das Relay aus den gespeicherten
//! Positionen, welche anderen Inhaber hoerbar sind.

use raumfunk_core::spatial::{distanz_lautstaerke, runden_2};
use raumfunk_core::types::PeerId;
use raumfunk_protocol::messages::{AudiblePeer, CullUpdate, UnavailableReason};
use raumfunk_protocol::ServerMessage;

use crate::broadcast::EventBroadcaster;
use crate::registry::Zone;

// ---------------------------------------------------------------------------
// Zustellung
// ---------------------------------------------------------------------------

/// Ergebnis der Zustellpruefung fuer ein Signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zustellung {
    Erlaubt,
    /// Absender ist nicht Mitglied der Zone
    NichtInZone,
    /// Ziel unbekannt oder in einer anderen Zone
    Unzustellbar(UnavailableReason),
}

/// Prueft ob `von` ein Signal an `an` senden darf
pub fn zustellung_pruefen(zone: &Zone, von: &PeerId, an: &PeerId) -> Zustellung {
    let Some(absender) = zone.mitglied(von) else {
        return Zustellung::NichtInZone;
    };
    let Some(ziel) = zone.mitglied(an) else {
        return Zustellung::Unzustellbar(UnavailableReason::NotFound);
    };
    if !absender.info.mesh_slot || !ziel.info.mesh_slot {
        return Zustellung::Unzustellbar(UnavailableReason::MeshFull);
    }
    Zustellung::Erlaubt
}

// ---------------------------------------------------------------------------
// Hoerbarkeit
// ---------------------------------------------------------------------------

/// Hoerbarkeits-Satz fuer einen Platz-Inhaber
///
/// Gibt `None` zurueck wenn `fuer` keinen Mesh-Platz hat. Peers ohne Platz
/// tauchen in keinem Satz auf.
pub fn hoerbarkeit_berechnen(zone: &Zone, fuer: &PeerId, cull_distanz: f64) -> Option<CullUpdate> {
    let eigene = zone.mitglied(fuer).filter(|m| m.info.mesh_slot)?;
    let mut satz = CullUpdate::default();

    for anderer in zone.slot_inhaber().filter(|m| m.peer_id() != fuer) {
        let distanz = eigene.info.position.distanz(&anderer.info.position);
        if distanz <= cull_distanz {
            satz.audible_peers.push(AudiblePeer {
                peer_id: anderer.peer_id().clone(),
                distance: runden_2(distanz),
                volume: runden_2(distanz_lautstaerke(distanz, cull_distanz)),
            });
        } else {
            satz.muted_peers.push(anderer.peer_id().clone());
        }
    }
    Some(satz)
}

/// Gleiche Aufteilung in hoerbar/stumm (Distanzen werden ignoriert)
fn gleiche_partition(a: &CullUpdate, b: &CullUpdate) -> bool {
    a.muted_peers == b.muted_peers
        && a.audible_peers.len() == b.audible_peers.len()
        && a
            .audible_peers
            .iter()
            .zip(&b.audible_peers)
            .all(|(x, y)| x.peer_id == y.peer_id)
}

/// Berechnet die Saetze aller Platz-Inhaber und pusht `cull_update`
///
/// Gesendet wird an jeden Inhaber, dessen Aufteilung sich geaendert hat,
/// sowie immer an die in `immer` genannten Peers. Muss unter der Sperre
/// der Zone aufgerufen werden. Gibt die Anzahl der Pushes zurueck.
pub fn hoerbarkeit_verteilen(
    zone: &mut Zone,
    cull_distanz: f64,
    broadcaster: &EventBroadcaster,
    immer: &[PeerId],
) -> usize {
    let inhaber: Vec<PeerId> = zone.slot_inhaber().map(|m| m.peer_id().clone()).collect();
    let mut gesendet = 0;

    for peer_id in &inhaber {
        let Some(satz) = hoerbarkeit_berechnen(zone, peer_id, cull_distanz) else {
            continue;
        };
        let vorher = zone.letzten_satz_tauschen(peer_id, satz.clone());
        let geaendert = vorher.map_or(true, |v| !gleiche_partition(&v, &satz));

        if geaendert || immer.contains(peer_id) {
            broadcaster.an_peer_senden(peer_id, ServerMessage::CullUpdate(satz));
            gesendet += 1;
        }
    }

    zone.saetze_bereinigen();
    gesendet
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use raumfunk_chat::ZoneHistory;
    use raumfunk_core::types::{Position, UserInfo, ZoneId};
    use raumfunk_protocol::messages::PeerInfo;
    use tokio::time::Instant;

    fn peer(nr: usize) -> PeerId {
        PeerId::new(format!("peer_{nr:012}"))
    }

    fn zone_mit(positionen: &[Position], max_peers: usize) -> Zone {
        let mut zone = Zone::neu(ZoneId::new("hub"), ZoneHistory::neu(50));
        for (nr, pos) in positionen.iter().enumerate() {
            let mut info =
                PeerInfo::aus_user_info(peer(nr), &UserInfo::new(format!("u{nr}"), "X"));
            info.position = *pos;
            zone.hinzufuegen(info, max_peers, Instant::now());
        }
        zone
    }

    #[test]
    fn nah_ist_voll_und_zwei_meter_achtzig_prozent() {
        let zone = zone_mit(
            &[
                Position::new(0.0, 0.0, 0.0),
                Position::new(0.5, 0.0, 0.0),
                Position::new(2.0, 0.0, 0.0),
            ],
            8,
        );
        let satz = hoerbarkeit_berechnen(&zone, &peer(0), 10.0).unwrap();
        assert_eq!(satz.audible_peers.len(), 2);
        assert_eq!(satz.audible_peers[0].volume, 1.0);
        assert_eq!(satz.audible_peers[1].distance, 2.0);
        assert_eq!(satz.audible_peers[1].volume, 0.8);
        assert!(satz.muted_peers.is_empty());
    }

    #[test]
    fn jenseits_des_radius_stumm() {
        let zone = zone_mit(
            &[Position::new(0.0, 0.0, 0.0), Position::new(15.0, 0.0, 0.0)],
            8,
        );
        let satz = hoerbarkeit_berechnen(&zone, &peer(0), 10.0).unwrap();
        assert!(satz.audible_peers.is_empty());
        assert_eq!(satz.muted_peers, vec![peer(1)]);
    }

    #[test]
    fn werte_auf_zwei_stellen_gerundet() {
        let zone = zone_mit(
            &[Position::new(0.0, 0.0, 0.0), Position::new(3.333, 0.0, 0.0)],
            8,
        );
        let satz = hoerbarkeit_berechnen(&zone, &peer(0), 10.0).unwrap();
        assert_eq!(satz.audible_peers[0].distance, 3.33);
        assert_eq!(satz.audible_peers[0].volume, 0.67);
    }

    #[test]
    fn peers_ohne_platz_erscheinen_nirgends() {
        let zone = zone_mit(&[Position::URSPRUNG; 3], 2);
        let satz = hoerbarkeit_berechnen(&zone, &peer(0), 10.0).unwrap();
        assert_eq!(satz.audible_peers.len(), 1);
        assert!(satz.muted_peers.is_empty());
        assert!(hoerbarkeit_berechnen(&zone, &peer(2), 10.0).is_none());
    }

    #[test]
    fn zustellregeln() {
        let zone = zone_mit(&[Position::URSPRUNG; 3], 2);
        assert_eq!(zustellung_pruefen(&zone, &peer(0), &peer(1)), Zustellung::Erlaubt);
        assert_eq!(
            zustellung_pruefen(&zone, &peer(0), &peer(2)),
            Zustellung::Unzustellbar(UnavailableReason::MeshFull)
        );
        assert_eq!(
            zustellung_pruefen(&zone, &peer(2), &peer(0)),
            Zustellung::Unzustellbar(UnavailableReason::MeshFull)
        );
        assert_eq!(
            zustellung_pruefen(&zone, &peer(0), &peer(99)),
            Zustellung::Unzustellbar(UnavailableReason::NotFound)
        );
        assert_eq!(
            zustellung_pruefen(&zone, &peer(99), &peer(0)),
            Zustellung::NichtInZone
        );
    }

    #[tokio::test]
    async fn nur_geaenderte_partitionen_werden_gepusht() {
        let broadcaster = EventBroadcaster::neu();
        let mut empfaenger: Vec<_> = (0..3)
            .map(|nr| broadcaster.peer_registrieren(peer(nr)))
            .collect();
        let mut zone = zone_mit(&[Position::URSPRUNG; 3], 8);

        // Erster Lauf: jeder bekommt seinen Satz
        assert_eq!(hoerbarkeit_verteilen(&mut zone, 10.0, &broadcaster, &[]), 3);
        for rx in &mut empfaenger {
            assert!(matches!(rx.try_recv(), Ok(ServerMessage::CullUpdate(_))));
        }

        // Kleine Bewegung ohne Partitionswechsel: nur der Beweger
        zone.mitglied_mut(&peer(0)).unwrap().info.position = Position::new(1.5, 0.0, 0.0);
        assert_eq!(
            hoerbarkeit_verteilen(&mut zone, 10.0, &broadcaster, &[peer(0)]),
            1
        );
        assert!(empfaenger[0].try_recv().is_ok());
        assert!(empfaenger[1].try_recv().is_err());

        // Peer 2 verlaesst den Radius: alle Partitionen aendern sich
        zone.mitglied_mut(&peer(2)).unwrap().info.position = Position::new(50.0, 0.0, 0.0);
        assert_eq!(
            hoerbarkeit_verteilen(&mut zone, 10.0, &broadcaster, &[peer(2)]),
            3
        );
    }
}
