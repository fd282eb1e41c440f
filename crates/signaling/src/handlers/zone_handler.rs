//! Zonen-Handler – Beitritt, Verlassen, Tippen, Praesenz, Resync

use raumfunk_core::types::{PeerId, ZoneId};
use raumfunk_protocol::messages::{
    JoinZoneRequest, LeaveZoneRequest, PeerInfo, PeerLeft, PeerPresence, PresenceUpdate,
    Reconnected, ResyncRequest, TypingNotice, TypingRequest, ZoneJoined, ZoneLeft,
};
use raumfunk_protocol::{ErrorCode, ServerMessage};
use tokio::time::Instant;

use crate::dispatcher::DispatcherContext;
use crate::registry::Zone;
use crate::relay;
use crate::server_state::SignalingState;

/// Verarbeitet einen Zonenbeitritt
///
/// Eine Verbindung ist in hoechstens einer Zone; eine bestehende
/// Mitgliedschaft wird vorher beendet. Antwort, `peer_joined` an die
/// anderen, Wiedergabe und Hoerbarkeit werden unter der Zonen-Sperre
/// eingereiht.
pub fn handle_join(
    req: JoinZoneRequest,
    ctx: &mut DispatcherContext,
    state: &SignalingState,
) -> Option<ServerMessage> {
    if let Some(alte_zone) = ctx.zone.take() {
        zone_verlassen(state, &ctx.peer_id, &alte_zone, true);
    }

    let peer_id = ctx.peer_id.clone();
    let zone_id = req.zone_id.clone();
    let config = &state.config;

    let beigetreten = state.registry.mit_zone_anlegen(
        &zone_id,
        || Zone::neu(zone_id.clone(), state.broker.verlauf_anlegen()),
        |zone| {
            if zone.anzahl() >= config.max_zonen_mitglieder {
                return false;
            }

            let vorhandene = zone.peer_infos();
            let mut info = PeerInfo::aus_user_info(peer_id.clone(), &req.user_info);
            let slot = zone.hinzufuegen(info.clone(), config.max_peers, Instant::now());
            info.mesh_slot = slot;

            let history = match req.last_seen_seq {
                Some(_) => Vec::new(),
                None => state.broker.aktueller_verlauf(&zone.verlauf),
            };

            state.broadcaster.an_peer_senden(
                &peer_id,
                ServerMessage::ZoneJoined(ZoneJoined {
                    zone_id: zone_id.clone(),
                    peer_id: peer_id.clone(),
                    peers: vorhandene,
                    history,
                    ice_servers: config.ice_servers.clone(),
                    mesh_slot: slot,
                }),
            );

            let andere = zone.peer_ids();
            state
                .broadcaster
                .an_peers_ausser_senden(&andere, &peer_id, &ServerMessage::PeerJoined(info));

            if let Some(last_seen) = req.last_seen_seq {
                let wiedergabe = state.broker.wiedergabe(&zone.verlauf, last_seen);
                tracing::debug!(
                    zone = %zone_id,
                    peer_id = %peer_id,
                    last_seen,
                    nachgeholt = wiedergabe.nachrichten.len(),
                    abgeschnitten = wiedergabe.abgeschnitten,
                    "Wiederbeitritt mit Wiedergabe"
                );
                state.broadcaster.an_peer_senden(
                    &peer_id,
                    ServerMessage::Reconnected(Reconnected {
                        zone_id: zone_id.clone(),
                        missed_messages: wiedergabe.nachrichten,
                        history_truncated: wiedergabe.abgeschnitten,
                    }),
                );
            }

            if slot {
                relay::hoerbarkeit_verteilen(
                    zone,
                    config.cull_distanz,
                    &state.broadcaster,
                    std::slice::from_ref(&peer_id),
                );
            } else {
                state.broadcaster.an_peer_senden(
                    &peer_id,
                    ServerMessage::fehler(
                        ErrorCode::MeshFull,
                        format!("Voice-Mesh voll ({} Peers), nur Text", config.max_peers),
                    ),
                );
            }
            true
        },
    );

    state.zonen_metrik_aktualisieren();

    if !beigetreten {
        tracing::info!(zone = %zone_id, peer_id = %peer_id, "Zone voll – Beitritt abgelehnt");
        return Some(ServerMessage::fehler(
            ErrorCode::ZoneFull,
            format!("Zone {zone_id} ist voll"),
        ));
    }

    tracing::info!(
        zone = %zone_id,
        peer_id = %peer_id,
        user = %req.user_info.id,
        "Zone betreten"
    );
    ctx.zone = Some(zone_id);
    None
}

/// Verarbeitet ein Verlassen der Zone
///
/// Idempotent: ein Peer, der nicht Mitglied ist, bekommt keine Antwort.
pub fn handle_leave(
    req: LeaveZoneRequest,
    ctx: &mut DispatcherContext,
    state: &SignalingState,
) -> Option<ServerMessage> {
    if ctx.zone.as_ref() != Some(&req.zone_id) {
        tracing::debug!(peer_id = %ctx.peer_id, zone = %req.zone_id, "Verlassen ohne Mitgliedschaft");
        return None;
    }
    ctx.zone = None;
    zone_verlassen(state, &ctx.peer_id, &req.zone_id, true);
    None
}

/// Entfernt einen Peer aus einer Zone (Leave, Verbindungsende, Aufraeumer)
///
/// Gibt `true` zurueck wenn der Peer Mitglied war.
pub fn zone_verlassen(
    state: &SignalingState,
    peer_id: &PeerId,
    zone_id: &ZoneId,
    bestaetigen: bool,
) -> bool {
    let entfernt = state
        .registry
        .mit_zone(zone_id, |zone| {
            mitglied_austragen(state, zone, peer_id, bestaetigen)
        })
        .unwrap_or(false);
    state.zonen_metrik_aktualisieren();
    entfernt
}

/// Traegt ein Mitglied unter bereits gehaltener Zonen-Sperre aus
///
/// Verteilt `peer_left`, vergibt einen freien Mesh-Platz neu und pusht
/// die geaenderten Hoerbarkeits-Saetze.
pub fn mitglied_austragen(
    state: &SignalingState,
    zone: &mut Zone,
    peer_id: &PeerId,
    bestaetigen: bool,
) -> bool {
    let Some((mitglied, nachruecker)) = zone.entfernen(peer_id) else {
        return false;
    };

    if bestaetigen {
        state.broadcaster.an_peer_senden(
            peer_id,
            ServerMessage::ZoneLeft(ZoneLeft {
                zone_id: zone.id().clone(),
            }),
        );
    }

    let verbleibende = zone.peer_ids();
    state.broadcaster.an_peers_senden(
        &verbleibende,
        &ServerMessage::PeerLeft(PeerLeft {
            peer_id: peer_id.clone(),
            user_id: mitglied.info.user_id.clone(),
        }),
    );

    let immer: Vec<PeerId> = nachruecker.iter().cloned().collect();
    if let Some(ref befoerdert) = nachruecker {
        tracing::info!(zone = %zone.id(), peer_id = %befoerdert, "Mesh-Platz nachbesetzt");
    }
    relay::hoerbarkeit_verteilen(zone, state.config.cull_distanz, &state.broadcaster, &immer);

    tracing::info!(zone = %zone.id(), peer_id = %peer_id, "Zone verlassen");
    true
}

/// Tipp-Indikator an die anderen Mitglieder (nie gespeichert)
pub fn handle_typing(
    req: TypingRequest,
    ctx: &DispatcherContext,
    state: &SignalingState,
) -> Option<ServerMessage> {
    let peer_id = &ctx.peer_id;
    let zugestellt = state.registry.mit_zone(&req.zone_id, |zone| {
        let user_id = zone.mitglied(peer_id)?.info.user_id.clone();
        let andere = zone.peer_ids();
        state.broadcaster.an_peers_ausser_senden(
            &andere,
            peer_id,
            &ServerMessage::Typing(TypingNotice {
                zone_id: req.zone_id.clone(),
                peer_id: peer_id.clone(),
                user_id,
                is_typing: req.is_typing,
            }),
        );
        Some(())
    });

    match zugestellt.flatten() {
        Some(()) => None,
        None => Some(nicht_in_zone(&req.zone_id)),
    }
}

/// Praesenz-Status aendern und an die anderen Mitglieder verteilen
pub fn handle_presence(
    req: PresenceUpdate,
    ctx: &DispatcherContext,
    state: &SignalingState,
) -> Option<ServerMessage> {
    let Some(zone_id) = ctx.zone.clone() else {
        return Some(ServerMessage::fehler(
            ErrorCode::NotInZone,
            "Praesenz ohne Zone",
        ));
    };
    let peer_id = &ctx.peer_id;

    let aktualisiert = state.registry.mit_zone(&zone_id, |zone| {
        let mitglied = zone.mitglied_mut(peer_id)?;
        mitglied.info.status = req.status;
        let andere = zone.peer_ids();
        state.broadcaster.an_peers_ausser_senden(
            &andere,
            peer_id,
            &ServerMessage::PeerPresence(PeerPresence {
                peer_id: peer_id.clone(),
                status: req.status,
            }),
        );
        Some(())
    });

    match aktualisiert.flatten() {
        Some(()) => None,
        None => Some(nicht_in_zone(&zone_id)),
    }
}

/// Ausdrueckliche Wiedergabe nach erkannter Sequenzluecke
pub fn handle_resync(
    req: ResyncRequest,
    ctx: &DispatcherContext,
    state: &SignalingState,
) -> Option<ServerMessage> {
    let peer_id = &ctx.peer_id;
    let beantwortet = state.registry.mit_zone(&req.zone_id, |zone| {
        if !zone.ist_mitglied(peer_id) {
            return false;
        }
        let wiedergabe = state.broker.wiedergabe(&zone.verlauf, req.last_seen_seq);
        state.broadcaster.an_peer_senden(
            peer_id,
            ServerMessage::Reconnected(Reconnected {
                zone_id: req.zone_id.clone(),
                missed_messages: wiedergabe.nachrichten,
                history_truncated: wiedergabe.abgeschnitten,
            }),
        );
        true
    });

    if beantwortet == Some(true) {
        None
    } else {
        Some(nicht_in_zone(&req.zone_id))
    }
}

pub(crate) fn nicht_in_zone(zone_id: &ZoneId) -> ServerMessage {
    ServerMessage::fehler(
        ErrorCode::NotInZone,
        format!("Nicht Mitglied der Zone {zone_id}"),
    )
}
