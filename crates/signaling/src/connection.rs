//! Client-Connection – Verwaltet eine einzelne TCP-Verbindung
//!
//! Jede Verbindung bekommt eine `ClientConnection` in einem eigenen
//! tokio-Task und beim Start eine frische PeerId.
//!
//! ## Ablauf
//! - Eingehende Frames werden dekodiert und an den `MessageDispatcher`
//!   uebergeben. Ungueltige Frames werden protokolliert und uebersprungen.
//! - Alle ausgehenden Frames (auch Direktantworten) laufen durch die
//!   Queue der Verbindung im `EventBroadcaster`, damit ihre Reihenfolge
//!   der Reihenfolge in der Zone entspricht.
//! - Kommt `verbindungs_timeout_sek` lang kein Frame, wird getrennt.
//!   Der Client haelt die Verbindung mit `ping` am Leben.

use futures_util::{SinkExt, StreamExt};
use raumfunk_protocol::wire::{Eingang, ServerCodec};
use raumfunk_protocol::{ErrorCode, ServerMessage};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tokio_util::codec::Framed;

use crate::dispatcher::{DispatcherContext, MessageDispatcher};
use crate::server_state::SignalingState;

/// Verarbeitet eine einzelne Verbindung
pub struct ClientConnection {
    state: Arc<SignalingState>,
    peer_addr: SocketAddr,
}

impl ClientConnection {
    /// Erstellt eine neue ClientConnection
    pub fn neu(state: Arc<SignalingState>, peer_addr: SocketAddr) -> Self {
        Self { state, peer_addr }
    }

    /// Startet die Verarbeitungsschleife
    ///
    /// Laeuft bis die Verbindung getrennt wird, ein Timeout eintritt oder
    /// ein Shutdown-Signal eingeht.
    pub async fn verarbeiten<S>(
        self,
        stream: S,
        mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let peer_addr = self.peer_addr;
        let timeout_dauer = Duration::from_secs(self.state.config.verbindungs_timeout_sek);

        let mut framed = Framed::new(stream, ServerCodec::new());
        let mut ctx = DispatcherContext::neu(peer_addr);
        let mut sende_rx = self.state.broadcaster.peer_registrieren(ctx.peer_id.clone());
        let dispatcher = MessageDispatcher::neu(Arc::clone(&self.state));
        self.state.metriken.connected_clients.inc();

        tracing::info!(peer = %peer_addr, peer_id = %ctx.peer_id, "Neue Verbindung");

        let mut frist = Instant::now() + timeout_dauer;

        loop {
            tokio::select! {
                // Eingehende Nachricht vom Client
                frame = framed.next() => {
                    match frame {
                        Some(Ok(Eingang::Nachricht(umschlag))) => {
                            frist = Instant::now() + timeout_dauer;
                            if let Some(antwort) = dispatcher.dispatch(umschlag.nachricht, &mut ctx) {
                                self.state.broadcaster.an_peer_senden(&ctx.peer_id, antwort);
                            }
                        }
                        Some(Ok(Eingang::Ungueltig(grund))) => {
                            frist = Instant::now() + timeout_dauer;
                            self.state.metriken.protocol_errors_total.inc();
                            tracing::warn!(
                                peer_id = %ctx.peer_id,
                                grund = %grund,
                                "Ungueltiger Frame verworfen"
                            );
                        }
                        Some(Err(e)) => {
                            tracing::warn!(
                                peer_id = %ctx.peer_id,
                                fehler = %e,
                                "Frame-Lesefehler"
                            );
                            break;
                        }
                        None => {
                            tracing::info!(peer_id = %ctx.peer_id, "Verbindung vom Client getrennt");
                            break;
                        }
                    }
                }

                // Ausgehende Nachricht aus der eigenen Queue
                Some(ausgehend) = sende_rx.recv() => {
                    if let Err(e) = framed.send(ausgehend).await {
                        tracing::warn!(
                            peer_id = %ctx.peer_id,
                            fehler = %e,
                            "Senden fehlgeschlagen"
                        );
                        break;
                    }
                }

                // Kein Lebenszeichen
                _ = tokio::time::sleep_until(frist) => {
                    tracing::warn!(peer_id = %ctx.peer_id, "Verbindungs-Timeout");
                    break;
                }

                // Shutdown-Signal
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!(peer_id = %ctx.peer_id, "Shutdown-Signal – Verbindung wird getrennt");
                        let abschied = ServerMessage::fehler(
                            ErrorCode::ShuttingDown,
                            "Dienst wird heruntergefahren",
                        );
                        let _ = framed.send(abschied).await;
                        break;
                    }
                }
            }
        }

        dispatcher.client_cleanup(&mut ctx);
        self.state.metriken.connected_clients.dec();

        tracing::info!(peer_id = %ctx.peer_id, "Verbindungs-Task beendet");
    }
}
