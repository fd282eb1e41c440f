//! Voice-Handler – Signal-Weiterleitung, Sprachzustand, Positionen
//!
//! Offer/Answer/ICE werden unveraendert an den Ziel-Peer durchgereicht;
//! das Relay behaelt keine Nutzlast.

use raumfunk_core::types::{PeerId, Position};
use raumfunk_protocol::messages::{
    PeerPosition, PeerUnavailable, PeerVoiceState, VoiceState,
};
use raumfunk_protocol::{ErrorCode, ServerMessage};

use crate::dispatcher::DispatcherContext;
use crate::handlers::zone_handler::nicht_in_zone;
use crate::relay::{self, Zustellung};
use crate::server_state::SignalingState;

/// Art eines weitergeleiteten Signals (Metrik-Label)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalArt {
    Offer,
    Answer,
    IceCandidate,
}

impl SignalArt {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::IceCandidate => "ice_candidate",
        }
    }
}

/// Leitet ein Signal an `ziel` weiter
///
/// `nachricht` ist der fertige Frame fuer den Empfaenger (mit `from`).
pub fn handle_signal(
    art: SignalArt,
    ziel: PeerId,
    nachricht: ServerMessage,
    ctx: &DispatcherContext,
    state: &SignalingState,
) -> Option<ServerMessage> {
    let Some(zone_id) = ctx.zone.clone() else {
        return Some(ServerMessage::fehler(
            ErrorCode::NotInZone,
            "Signal ohne Zone",
        ));
    };
    let peer_id = &ctx.peer_id;

    let zustellung = state.registry.mit_zone(&zone_id, |zone| {
        let zustellung = relay::zustellung_pruefen(zone, peer_id, &ziel);
        if zustellung == Zustellung::Erlaubt {
            state.broadcaster.an_peer_senden(&ziel, nachricht);
        }
        zustellung
    });

    match zustellung.unwrap_or(Zustellung::NichtInZone) {
        Zustellung::Erlaubt => {
            tracing::debug!(
                zone = %zone_id,
                von = %peer_id,
                an = %ziel,
                art = art.label(),
                "Signal weitergeleitet"
            );
            state
                .metriken
                .signals_relayed_total
                .with_label_values(&[art.label()])
                .inc();
            None
        }
        Zustellung::NichtInZone => Some(nicht_in_zone(&zone_id)),
        Zustellung::Unzustellbar(reason) => {
            tracing::debug!(von = %peer_id, an = %ziel, ?reason, "Signal nicht zustellbar");
            Some(ServerMessage::PeerUnavailable(PeerUnavailable {
                peer_id: ziel,
                reason,
            }))
        }
    }
}

/// Offer/Answer ohne SDP wird abgelehnt
pub fn sdp_pruefen(sdp: &str) -> Option<ServerMessage> {
    if sdp.trim().is_empty() {
        Some(ServerMessage::fehler(
            ErrorCode::InvalidOffer,
            "Offer/Answer ohne SDP",
        ))
    } else {
        None
    }
}

/// Sprachzustand speichern und an die Zone verteilen
pub fn handle_voice_state(
    zustand: VoiceState,
    ctx: &DispatcherContext,
    state: &SignalingState,
) -> Option<ServerMessage> {
    let Some(zone_id) = ctx.zone.clone() else {
        return Some(ServerMessage::fehler(
            ErrorCode::NotInZone,
            "Sprachzustand ohne Zone",
        ));
    };
    let peer_id = &ctx.peer_id;

    let verteilt = state.registry.mit_zone(&zone_id, |zone| {
        let mitglied = zone.mitglied_mut(peer_id)?;
        mitglied.info.muted = zustand.muted;
        mitglied.info.speaking = zustand.speaking;
        let andere = zone.peer_ids();
        state.broadcaster.an_peers_ausser_senden(
            &andere,
            peer_id,
            &ServerMessage::PeerVoiceState(PeerVoiceState {
                peer_id: peer_id.clone(),
                muted: zustand.muted,
                speaking: zustand.speaking,
                volume: zustand.volume.clamp(0.0, 1.0),
            }),
        );
        Some(())
    });

    match verteilt.flatten() {
        Some(()) => None,
        None => Some(nicht_in_zone(&zone_id)),
    }
}

/// Position speichern, an andere Platz-Inhaber weiterreichen und
/// Hoerbarkeit neu verteilen
pub fn handle_position(
    position: Position,
    ctx: &DispatcherContext,
    state: &SignalingState,
) -> Option<ServerMessage> {
    if !position.ist_endlich() {
        return Some(ServerMessage::fehler(
            ErrorCode::InvalidRequest,
            "Position muss endlich sein",
        ));
    }
    let Some(zone_id) = ctx.zone.clone() else {
        return Some(ServerMessage::fehler(
            ErrorCode::NotInZone,
            "Position ohne Zone",
        ));
    };
    let peer_id = &ctx.peer_id;

    let aktualisiert = state.registry.mit_zone(&zone_id, |zone| {
        let mitglied = zone.mitglied_mut(peer_id)?;
        mitglied.info.position = position;
        let hat_slot = mitglied.info.mesh_slot;
        zone.positionen_markieren();

        if hat_slot {
            let inhaber: Vec<PeerId> = zone
                .slot_inhaber()
                .map(|m| m.peer_id().clone())
                .collect();
            state.broadcaster.an_peers_ausser_senden(
                &inhaber,
                peer_id,
                &ServerMessage::PeerPosition(PeerPosition {
                    peer_id: peer_id.clone(),
                    position,
                }),
            );
            relay::hoerbarkeit_verteilen(
                zone,
                state.config.cull_distanz,
                &state.broadcaster,
                std::slice::from_ref(peer_id),
            );
        }
        Some(())
    });

    match aktualisiert.flatten() {
        Some(()) => None,
        None => Some(nicht_in_zone(&zone_id)),
    }
}
