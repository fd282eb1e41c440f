//! Message-Dispatcher – Routet Client-Nachrichten an die Handler
//!
//! Der Dispatcher matcht exhaustiv auf `ClientMessage`. Antworten an
//! andere Mitglieder reihen die Handler selbst ein. Der Rueckgabewert ist
//! eine optionale Direktantwort an den Absender (Fehler, Pong), die die
//! Verbindung in ihre eigene Queue einreiht.

use raumfunk_core::types::{PeerId, ZoneId};
use raumfunk_protocol::messages::{IceRelay, SdpRelay};
use raumfunk_protocol::{ClientMessage, ServerMessage};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::Instant;

use crate::handlers::voice_handler::{self, SignalArt};
use crate::handlers::{chat_handler, zone_handler};
use crate::server_state::SignalingState;

/// Dispatcher-Kontext – Informationen ueber die aktuelle Verbindung
#[derive(Debug, Clone)]
pub struct DispatcherContext {
    pub peer_addr: SocketAddr,
    /// Fuer diese Verbindung vergebene PeerId
    pub peer_id: PeerId,
    /// Aktuelle Zone (hoechstens eine pro Verbindung)
    pub zone: Option<ZoneId>,
}

impl DispatcherContext {
    pub fn neu(peer_addr: SocketAddr) -> Self {
        Self {
            peer_addr,
            peer_id: PeerId::erzeugen(),
            zone: None,
        }
    }
}

/// Zentraler Message-Dispatcher
pub struct MessageDispatcher {
    state: Arc<SignalingState>,
}

impl MessageDispatcher {
    /// Erstellt einen neuen Dispatcher
    pub fn neu(state: Arc<SignalingState>) -> Self {
        Self { state }
    }

    /// Verarbeitet eine eingehende Nachricht
    ///
    /// Gibt `Some` zurueck wenn der Absender direkt eine Antwort bekommt.
    pub fn dispatch(
        &self,
        nachricht: ClientMessage,
        ctx: &mut DispatcherContext,
    ) -> Option<ServerMessage> {
        let state = self.state.as_ref();
        tracing::debug!(peer_id = %ctx.peer_id, typ = nachricht.typ_name(), "Nachricht empfangen");

        // Jeder Frame zaehlt als Lebenszeichen
        if let Some(zone_id) = &ctx.zone {
            state
                .registry
                .mit_zone(zone_id, |zone| zone.beruehren(&ctx.peer_id, Instant::now()));
        }

        match nachricht {
            // -------------------------------------------------------------------
            // Zonen
            // -------------------------------------------------------------------
            ClientMessage::JoinZone(req) => zone_handler::handle_join(req, ctx, state),
            ClientMessage::LeaveZone(req) => zone_handler::handle_leave(req, ctx, state),
            ClientMessage::Typing(req) => zone_handler::handle_typing(req, ctx, state),
            ClientMessage::Presence(req) => zone_handler::handle_presence(req, ctx, state),
            ClientMessage::Resync(req) => zone_handler::handle_resync(req, ctx, state),

            // -------------------------------------------------------------------
            // Chat
            // -------------------------------------------------------------------
            ClientMessage::Chat(req) => chat_handler::handle_chat(req, ctx, state),

            // -------------------------------------------------------------------
            // Signaling
            // -------------------------------------------------------------------
            ClientMessage::Offer(signal) => {
                if let Some(fehler) = voice_handler::sdp_pruefen(&signal.sdp) {
                    return Some(fehler);
                }
                let weiter = ServerMessage::Offer(SdpRelay {
                    from: ctx.peer_id.clone(),
                    sdp: signal.sdp,
                });
                voice_handler::handle_signal(SignalArt::Offer, signal.to, weiter, ctx, state)
            }
            ClientMessage::Answer(signal) => {
                if let Some(fehler) = voice_handler::sdp_pruefen(&signal.sdp) {
                    return Some(fehler);
                }
                let weiter = ServerMessage::Answer(SdpRelay {
                    from: ctx.peer_id.clone(),
                    sdp: signal.sdp,
                });
                voice_handler::handle_signal(SignalArt::Answer, signal.to, weiter, ctx, state)
            }
            ClientMessage::IceCandidate(signal) => {
                let weiter = ServerMessage::IceCandidate(IceRelay {
                    from: ctx.peer_id.clone(),
                    candidate: signal.candidate,
                });
                voice_handler::handle_signal(
                    SignalArt::IceCandidate,
                    signal.to,
                    weiter,
                    ctx,
                    state,
                )
            }

            // -------------------------------------------------------------------
            // Raum & Stimme
            // -------------------------------------------------------------------
            ClientMessage::VoiceState(zustand) => {
                voice_handler::handle_voice_state(zustand, ctx, state)
            }
            ClientMessage::Position(position) => {
                voice_handler::handle_position(position, ctx, state)
            }

            // -------------------------------------------------------------------
            // Keepalive
            // -------------------------------------------------------------------
            ClientMessage::Ping => Some(ServerMessage::pong()),
        }
    }

    /// Bereinigt alle Ressourcen einer Verbindung beim Trennen
    pub fn client_cleanup(&self, ctx: &mut DispatcherContext) {
        if let Some(zone_id) = ctx.zone.take() {
            zone_handler::zone_verlassen(&self.state, &ctx.peer_id, &zone_id, false);
        }
        self.state.broadcaster.peer_entfernen(&ctx.peer_id);

        tracing::debug!(peer_id = %ctx.peer_id, "Verbindungs-Ressourcen bereinigt");
    }
}
