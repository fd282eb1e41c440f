//! Chat-Handler – Nachrichten annehmen, verteilen und bestaetigen

use raumfunk_chat::{Absender, Annahme, ChatError};
use raumfunk_protocol::messages::{ChatRequest, MessageAck};
use raumfunk_protocol::{ErrorCode, ServerMessage};

use crate::dispatcher::DispatcherContext;
use crate::server_state::SignalingState;

/// Verarbeitet eine Chat-Nachricht
///
/// Unter der Zonen-Sperre: Broker vergibt die Sequenz, die Nachricht geht
/// an alle Mitglieder (Absender eingeschlossen), danach folgt das
/// `message_ack` an den Absender. Ein Duplikat wird nur erneut bestaetigt.
pub fn handle_chat(
    req: ChatRequest,
    ctx: &DispatcherContext,
    state: &SignalingState,
) -> Option<ServerMessage> {
    let peer_id = &ctx.peer_id;
    let zone_id = req.zone_id.clone();
    let client_msg_id = req.client_msg_id;

    let ergebnis = state.registry.mit_zone(&zone_id, |zone| {
        let absender = match zone.mitglied(peer_id) {
            Some(m) => Absender {
                peer_id: peer_id.clone(),
                user_id: m.info.user_id.clone(),
                user_name: m.info.display_name.clone(),
            },
            None => return Err(ChatError::NichtInZone(zone_id.to_string())),
        };

        let annahme = state
            .broker
            .annehmen(&mut zone.verlauf, &zone_id, &absender, req)?;

        if let Annahme::Neu(ref nachricht) = annahme {
            let mitglieder = zone.peer_ids();
            state
                .broadcaster
                .an_peers_senden(&mitglieder, &ServerMessage::nachricht(nachricht.clone()));
            state.metriken.chat_messages_total.inc();
        }

        let nachricht = annahme.nachricht();
        state.broadcaster.an_peer_senden(
            peer_id,
            ServerMessage::MessageAck(MessageAck {
                client_msg_id: nachricht.client_msg_id,
                id: nachricht.id,
                seq: nachricht.seq,
            }),
        );
        Ok(())
    });

    match ergebnis {
        Some(Ok(())) => None,
        Some(Err(fehler)) => {
            tracing::debug!(zone = %zone_id, peer_id = %peer_id, fehler = %fehler, "Nachricht abgelehnt");
            Some(ServerMessage::post_abgelehnt(
                fehler.code(),
                fehler.to_string(),
                client_msg_id,
            ))
        }
        None => Some(ServerMessage::post_abgelehnt(
            ErrorCode::NotInZone,
            format!("Nicht Mitglied der Zone {zone_id}"),
            client_msg_id,
        )),
    }
}
