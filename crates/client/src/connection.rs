//! Verbindungsmanager zum Zonen-Dienst
//!
//! Ein eigener Task haelt die TCP-Verbindung (u32 BE Laenge + JSON, siehe
//! `raumfunk_protocol::wire`) und stellt sie bei Abbruch mit
//! exponentiellem Backoff wieder her. Nach jedem Verbindungsaufbau:
//!
//! 1. Heartbeat neu starten
//! 2. zuletzt betretene Zone erneut betreten (`lastSeenSeq`)
//! 3. Offline-Warteschlange in Sendereihenfolge leeren
//!
//! Die Engine spricht nur ueber [`VerbindungsManager`] mit dem Task.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use raumfunk_core::types::{UserInfo, ZoneId};
use raumfunk_protocol::messages::{
    ChatRequest, ClientMessage, JoinZoneRequest, LeaveZoneRequest, ServerMessage,
};
use raumfunk_protocol::wire::{ClientCodec, Eingang};
use std::collections::VecDeque;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant, MissedTickBehavior};
use tokio_util::codec::Framed;
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::queue::OfflineQueue;

// ---------------------------------------------------------------------------
// Verbinder
// ---------------------------------------------------------------------------

/// Baut einen Byte-Stream zum Dienst auf
#[async_trait]
pub trait Verbinder: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn verbinden(&self) -> io::Result<Self::Stream>;
}

/// Standard-Verbinder ueber TCP
#[derive(Debug, Clone)]
pub struct TcpVerbinder {
    adresse: String,
}

impl TcpVerbinder {
    pub fn neu(adresse: impl Into<String>) -> Self {
        Self {
            adresse: adresse.into(),
        }
    }
}

#[async_trait]
impl Verbinder for TcpVerbinder {
    type Stream = TcpStream;

    async fn verbinden(&self) -> io::Result<TcpStream> {
        let stream = TcpStream::connect(&self.adresse).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

// ---------------------------------------------------------------------------
// Zustand, Befehle, Ereignisse
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbindungsZustand {
    Getrennt,
    Verbindet,
    Verbunden,
}

#[derive(Debug)]
enum Befehl {
    Senden(ClientMessage),
    Beitreten { zone_id: ZoneId, user_info: UserInfo },
    Verlassen,
    Beenden,
}

/// Was der Verbindungstask an die Engine meldet
#[derive(Debug, Clone)]
pub enum VerbindungsEreignis {
    Zustand(VerbindungsZustand),
    Nachricht(ServerMessage),
    /// Terminal: nach `versuche` Fehlschlaegen in Folge aufgegeben
    Aufgegeben { versuche: u32 },
}

/// Wartezeit vor dem `versuch`-ten Wiederverbinden (ab 1)
pub fn backoff(versuch: u32, basis: Duration, max: Duration) -> Duration {
    let exponent = versuch.saturating_sub(1).min(16);
    basis.saturating_mul(1u32 << exponent).min(max)
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Handle auf den Verbindungstask
pub struct VerbindungsManager {
    befehl_tx: mpsc::UnboundedSender<Befehl>,
    zustand_rx: watch::Receiver<VerbindungsZustand>,
    task: JoinHandle<()>,
    close_timeout: Duration,
}

impl VerbindungsManager {
    /// Startet den Task; Ereignisse kommen ueber den zurueckgegebenen Kanal
    pub fn starten<V: Verbinder>(
        verbinder: V,
        config: &ClientConfig,
    ) -> (Self, mpsc::Receiver<VerbindungsEreignis>) {
        let (befehl_tx, befehl_rx) = mpsc::unbounded_channel();
        let (ereignis_tx, ereignis_rx) = mpsc::channel(config.ereignis_kapazitaet.max(1));
        let (zustand_tx, zustand_rx) = watch::channel(VerbindungsZustand::Getrennt);

        let task = VerbindungsTask {
            verbinder,
            config: config.clone(),
            befehl_rx,
            ereignis_tx,
            zustand_tx,
            zone: None,
            hoechste_seq: None,
            warteschlange: OfflineQueue::neu(config.offline_queue_groesse),
            unbestaetigt: VecDeque::new(),
        };
        let task = tokio::spawn(task.ausfuehren());

        (
            Self {
                befehl_tx,
                zustand_rx,
                task,
                close_timeout: config.close_timeout(),
            },
            ereignis_rx,
        )
    }

    pub fn zustand(&self) -> VerbindungsZustand {
        *self.zustand_rx.borrow()
    }

    pub fn zustand_beobachten(&self) -> watch::Receiver<VerbindungsZustand> {
        self.zustand_rx.clone()
    }

    /// Sendet eine Nachricht; offline werden nur Chat-Posts vorgemerkt
    pub fn senden(&self, nachricht: ClientMessage) -> ClientResult<()> {
        self.befehl(Befehl::Senden(nachricht))
    }

    /// Betritt eine Zone; nach jedem Wiederverbinden wird erneut beigetreten
    pub fn beitreten(&self, zone_id: ZoneId, user_info: UserInfo) -> ClientResult<()> {
        self.befehl(Befehl::Beitreten { zone_id, user_info })
    }

    pub fn verlassen(&self) -> ClientResult<()> {
        self.befehl(Befehl::Verlassen)
    }

    fn befehl(&self, befehl: Befehl) -> ClientResult<()> {
        self.befehl_tx.send(befehl).map_err(|_| ClientError::Beendet)
    }

    /// Beendet den Task (mit Zeitlimit)
    pub async fn beenden(self) {
        let _ = self.befehl_tx.send(Befehl::Beenden);
        let mut task = self.task;
        if tokio::time::timeout(self.close_timeout, &mut task).await.is_err() {
            tracing::warn!("Verbindungstask reagiert nicht, wird abgebrochen");
            task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

enum SitzungsEnde {
    Getrennt,
    Beendet,
}

struct VerbindungsTask<V: Verbinder> {
    verbinder: V,
    config: ClientConfig,
    befehl_rx: mpsc::UnboundedReceiver<Befehl>,
    ereignis_tx: mpsc::Sender<VerbindungsEreignis>,
    zustand_tx: watch::Sender<VerbindungsZustand>,
    /// Zuletzt betretene Zone samt Identitaet
    zone: Option<(ZoneId, UserInfo)>,
    /// Hoechste gesehene Sequenz der aktuellen Zone
    hoechste_seq: Option<u64>,
    warteschlange: OfflineQueue,
    /// Gesendete Posts ohne `message_ack`, aelteste zuerst
    unbestaetigt: VecDeque<ChatRequest>,
}

impl<V: Verbinder> VerbindungsTask<V> {
    async fn ausfuehren(mut self) {
        let mut fehlschlaege = 0u32;
        let mut versuch = 0u32;

        loop {
            self.zustand_setzen(VerbindungsZustand::Verbindet).await;

            match self.verbinder.verbinden().await {
                Ok(stream) => {
                    fehlschlaege = 0;
                    versuch = 0;
                    tracing::info!("Mit Zonen-Dienst verbunden");
                    self.zustand_setzen(VerbindungsZustand::Verbunden).await;

                    let ende = self.sitzung(stream).await;

                    let offen = self.unbestaetigt.drain(..).collect::<Vec<_>>();
                    if !offen.is_empty() {
                        tracing::debug!(anzahl = offen.len(), "Unbestaetigte Posts vorgemerkt");
                        self.warteschlange.vorne_einreihen(offen);
                    }
                    self.zustand_setzen(VerbindungsZustand::Getrennt).await;

                    if let SitzungsEnde::Beendet = ende {
                        return;
                    }
                    tracing::info!("Verbindung zum Zonen-Dienst verloren");
                }
                Err(e) => {
                    fehlschlaege += 1;
                    tracing::warn!(versuch = fehlschlaege, fehler = %e, "Verbindungsaufbau fehlgeschlagen");
                    self.zustand_setzen(VerbindungsZustand::Getrennt).await;

                    if fehlschlaege >= self.config.max_reconnect_versuche {
                        tracing::error!(versuche = fehlschlaege, "Wiederverbinden aufgegeben");
                        let _ = self
                            .ereignis_tx
                            .send(VerbindungsEreignis::Aufgegeben {
                                versuche: fehlschlaege,
                            })
                            .await;
                        return;
                    }
                }
            }

            versuch += 1;
            let warten = backoff(
                versuch,
                self.config.reconnect_basis(),
                self.config.reconnect_max(),
            );
            tracing::debug!(versuch, warten_ms = warten.as_millis() as u64, "Warte auf Wiederverbinden");
            if self.offline_warten(warten).await {
                return;
            }
        }
    }

    /// Wartet die Backoff-Zeit ab und nimmt dabei Befehle an
    ///
    /// Gibt `true` zurueck, wenn der Task beendet werden soll.
    async fn offline_warten(&mut self, dauer: Duration) -> bool {
        let schlaf = sleep(dauer);
        tokio::pin!(schlaf);
        loop {
            tokio::select! {
                _ = &mut schlaf => return false,
                befehl = self.befehl_rx.recv() => match befehl {
                    None | Some(Befehl::Beenden) => return true,
                    Some(befehl) => self.offline_befehl(befehl),
                },
            }
        }
    }

    fn offline_befehl(&mut self, befehl: Befehl) {
        match befehl {
            Befehl::Senden(ClientMessage::Chat(post)) => {
                let post = mit_client_id(post);
                if let Some(verworfen) = self.warteschlange.einreihen(post) {
                    tracing::warn!(
                        client_msg_id = ?verworfen.client_msg_id,
                        "Offline-Warteschlange voll, aeltester Post verworfen"
                    );
                }
            }
            Befehl::Senden(nachricht) => {
                tracing::debug!(typ = nachricht.typ_name(), "Offline, Nachricht verworfen");
            }
            Befehl::Beitreten { zone_id, user_info } => self.zone_merken(zone_id, user_info),
            Befehl::Verlassen => self.zone_vergessen(),
            Befehl::Beenden => {}
        }
    }

    async fn sitzung(&mut self, stream: V::Stream) -> SitzungsEnde {
        let mut framed = Framed::new(stream, ClientCodec::new());

        if let Err(e) = self.nach_verbinden(&mut framed).await {
            tracing::warn!(fehler = %e, "Senden nach Verbindungsaufbau fehlgeschlagen");
            return SitzungsEnde::Getrennt;
        }

        let intervall = self.config.heartbeat_intervall();
        let timeout = self.config.heartbeat_timeout();
        let mut heartbeat = tokio::time::interval_at(Instant::now() + intervall, intervall);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut frist = Instant::now() + timeout;

        loop {
            tokio::select! {
                eingang = framed.next() => {
                    match eingang {
                        Some(Ok(Eingang::Nachricht(umschlag))) => {
                            frist = Instant::now() + timeout;
                            let nachricht = umschlag.nachricht;
                            self.beobachten(&nachricht);
                            if self
                                .ereignis_tx
                                .send(VerbindungsEreignis::Nachricht(nachricht))
                                .await
                                .is_err()
                            {
                                return SitzungsEnde::Beendet;
                            }
                        }
                        Some(Ok(Eingang::Ungueltig(grund))) => {
                            frist = Instant::now() + timeout;
                            tracing::warn!(grund = %grund, "Ungueltiger Frame vom Dienst uebersprungen");
                        }
                        Some(Err(e)) => {
                            tracing::warn!(fehler = %e, "Lesefehler");
                            return SitzungsEnde::Getrennt;
                        }
                        None => return SitzungsEnde::Getrennt,
                    }
                }

                _ = heartbeat.tick() => {
                    if let Err(e) = framed.send(ClientMessage::Ping).await {
                        tracing::warn!(fehler = %e, "Heartbeat konnte nicht gesendet werden");
                        return SitzungsEnde::Getrennt;
                    }
                }

                _ = sleep_until(frist) => {
                    tracing::warn!(
                        timeout_ms = timeout.as_millis() as u64,
                        "Keine Frames vom Dienst, Verbindung gilt als getrennt"
                    );
                    return SitzungsEnde::Getrennt;
                }

                befehl = self.befehl_rx.recv() => {
                    let befehl = match befehl {
                        None | Some(Befehl::Beenden) => {
                            let _ = framed.close().await;
                            return SitzungsEnde::Beendet;
                        }
                        Some(b) => b,
                    };
                    if let Err(e) = self.online_befehl(&mut framed, befehl).await {
                        tracing::warn!(fehler = %e, "Schreibfehler");
                        return SitzungsEnde::Getrennt;
                    }
                }
            }
        }
    }

    /// Wiederbeitritt vor dem Leeren der Warteschlange
    async fn nach_verbinden(
        &mut self,
        framed: &mut Framed<V::Stream, ClientCodec>,
    ) -> io::Result<()> {
        let Some((zone_id, user_info)) = self.zone.clone() else {
            let verworfen = self.warteschlange.leeren().len();
            if verworfen > 0 {
                tracing::warn!(anzahl = verworfen, "Keine Zone betreten, vorgemerkte Posts verworfen");
            }
            return Ok(());
        };

        framed
            .send(ClientMessage::JoinZone(JoinZoneRequest {
                zone_id: zone_id.clone(),
                user_info,
                last_seen_seq: self.hoechste_seq,
            }))
            .await?;

        for post in self.warteschlange.leeren() {
            if post.zone_id != zone_id {
                tracing::warn!(zone = %post.zone_id, "Post fuer fremde Zone verworfen");
                continue;
            }
            self.chat_senden(framed, post).await?;
        }
        Ok(())
    }

    async fn online_befehl(
        &mut self,
        framed: &mut Framed<V::Stream, ClientCodec>,
        befehl: Befehl,
    ) -> io::Result<()> {
        match befehl {
            Befehl::Senden(ClientMessage::Chat(post)) => self.chat_senden(framed, post).await,
            Befehl::Senden(nachricht) => framed.send(nachricht).await,
            Befehl::Beitreten { zone_id, user_info } => {
                self.zone_merken(zone_id.clone(), user_info.clone());
                framed
                    .send(ClientMessage::JoinZone(JoinZoneRequest {
                        zone_id,
                        user_info,
                        last_seen_seq: self.hoechste_seq,
                    }))
                    .await
            }
            Befehl::Verlassen => {
                let zone = self.zone.as_ref().map(|(z, _)| z.clone());
                self.zone_vergessen();
                match zone {
                    Some(zone_id) => {
                        framed
                            .send(ClientMessage::LeaveZone(LeaveZoneRequest { zone_id }))
                            .await
                    }
                    None => Ok(()),
                }
            }
            Befehl::Beenden => Ok(()),
        }
    }

    async fn chat_senden(
        &mut self,
        framed: &mut Framed<V::Stream, ClientCodec>,
        post: ChatRequest,
    ) -> io::Result<()> {
        let post = mit_client_id(post);
        // Zuerst vormerken: scheitert das Senden, wird der Post wiederholt
        self.unbestaetigt.push_back(post.clone());
        while self.unbestaetigt.len() > self.config.offline_queue_groesse {
            if let Some(alt) = self.unbestaetigt.pop_front() {
                tracing::warn!(
                    client_msg_id = ?alt.client_msg_id,
                    "Zu viele unbestaetigte Posts, aeltester wird nicht wiederholt"
                );
            }
        }
        framed.send(ClientMessage::Chat(post)).await
    }

    fn zone_merken(&mut self, zone_id: ZoneId, user_info: UserInfo) {
        let gleiche_zone = self.zone.as_ref().is_some_and(|(z, _)| *z == zone_id);
        if !gleiche_zone {
            self.hoechste_seq = None;
        }
        self.zone = Some((zone_id, user_info));
    }

    fn zone_vergessen(&mut self) {
        self.zone = None;
        self.hoechste_seq = None;
    }

    fn seq_sehen(&mut self, seq: u64) {
        self.hoechste_seq = Some(self.hoechste_seq.map_or(seq, |s| s.max(seq)));
    }

    fn ist_aktuelle_zone(&self, zone_id: &ZoneId) -> bool {
        self.zone.as_ref().is_some_and(|(z, _)| z == zone_id)
    }

    /// Verfolgt Sequenzen und Bestaetigungen der durchlaufenden Frames
    fn beobachten(&mut self, nachricht: &ServerMessage) {
        match nachricht {
            ServerMessage::Message(zustellung) => {
                let m = &zustellung.message;
                if self.ist_aktuelle_zone(&m.zone_id) {
                    self.seq_sehen(m.seq);
                }
                if let Some(id) = m.client_msg_id {
                    self.bestaetigen(id);
                }
            }
            ServerMessage::MessageAck(ack) => {
                self.seq_sehen(ack.seq);
                if let Some(id) = ack.client_msg_id {
                    self.bestaetigen(id);
                }
            }
            ServerMessage::ZoneJoined(beitritt) if self.ist_aktuelle_zone(&beitritt.zone_id) => {
                if let Some(max) = beitritt.history.iter().map(|m| m.seq).max() {
                    self.seq_sehen(max);
                }
            }
            ServerMessage::Reconnected(wiedergabe)
                if self.ist_aktuelle_zone(&wiedergabe.zone_id) =>
            {
                let max = wiedergabe.missed_messages.iter().map(|m| m.seq).max();
                if wiedergabe.history_truncated {
                    // Der Dienst zaehlt nicht mehr ab unserem Stand weiter
                    self.hoechste_seq = max;
                } else if let Some(max) = max {
                    self.seq_sehen(max);
                }
            }
            ServerMessage::Error(fehler) => {
                if let Some(id) = fehler.client_msg_id {
                    tracing::debug!(client_msg_id = %id, code = ?fehler.code, "Post abgelehnt");
                    self.bestaetigen(id);
                }
            }
            _ => {}
        }
    }

    fn bestaetigen(&mut self, client_msg_id: Uuid) {
        self.unbestaetigt
            .retain(|p| p.client_msg_id != Some(client_msg_id));
    }

    async fn zustand_setzen(&self, zustand: VerbindungsZustand) {
        let geaendert = self.zustand_tx.send_if_modified(|z| {
            if *z == zustand {
                return false;
            }
            *z = zustand;
            true
        });
        if geaendert {
            let _ = self
                .ereignis_tx
                .send(VerbindungsEreignis::Zustand(zustand))
                .await;
        }
    }
}

/// Vergibt eine `clientMsgId`, falls noch keine gesetzt ist
fn mit_client_id(mut post: ChatRequest) -> ChatRequest {
    if post.client_msg_id.is_none() {
        post.client_msg_id = Some(Uuid::new_v4());
    }
    post
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
