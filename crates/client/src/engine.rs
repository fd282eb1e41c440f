//! Client-Engine
//!
//! [`RaumfunkEngine::init`] erzeugt eine eigenstaendige Instanz ohne
//! globalen Zustand. Die Engine besteht aus drei Tasks:
//!
//! ```text
//! Anwendung --Befehle--> Engine-Task <--Ereignisse-- Verbindungstask <-> Zonen-Dienst
//!     ^                    |   ^
//!     |                    |   +---- VAD-Task (Mikrofon)
//!     +---- EngineEvent ---+
//!            (broadcast)   +-------> Mesh / Mixer / Medien-Backend
//! ```
//!
//! Der Engine-Task besitzt Mesh, Mixer, Chat-Zustand und Drosseln
//! exklusiv; es gibt keine geteilten Sperren.

use raumfunk_audio::{AudioGraph, SpatialMixer, SprechSteuerung, VadAufgabe, VadEreignis};
use raumfunk_core::types::{MessageId, PeerId, Position, UserId, UserInfo, ZoneId};
use raumfunk_protocol::messages::{
    ChatMessage, ChatRequest, ClientMessage, ErrorCode, PeerInfo, PresenceStatus, PresenceUpdate,
    ResyncRequest, ServerMessage, TypingRequest, UnavailableReason, VoiceState,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::chat::{ChatZustand, Empfang};
use crate::config::ClientConfig;
use crate::connection::{
    Verbinder, VerbindungsEreignis, VerbindungsManager, VerbindungsZustand,
};
use crate::error::{ClientError, ClientResult};
use crate::media::{MedienBackend, MedienEreignis};
use crate::mesh::{MeshAktion, PeerMesh, PeerPhase};
use crate::presence::{Drossel, TippEntpreller};

/// Takt fuer Drosseln, Hysterese und Handshake-Fristen
const TAKT: Duration = Duration::from_millis(20);

// ---------------------------------------------------------------------------
// Oeffentliche Typen
// ---------------------------------------------------------------------------

/// Ereignisse der Engine an die Anwendung
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Verbindung(VerbindungsZustand),
    ZoneBetreten {
        zone_id: ZoneId,
        peer_id: PeerId,
        mesh_slot: bool,
        peers: Vec<PeerInfo>,
        verlauf: Vec<ChatMessage>,
    },
    ZoneVerlassen {
        zone_id: ZoneId,
    },
    Nachricht(ChatMessage),
    NachrichtBestaetigt {
        client_msg_id: Option<Uuid>,
        id: MessageId,
        seq: u64,
    },
    /// Verlauf wurde gekuerzt; die Liste der Anwendung ist zu ersetzen
    VerlaufZurueckgesetzt {
        nachrichten: Vec<ChatMessage>,
    },
    BenutzerBeigetreten(PeerInfo),
    BenutzerGegangen {
        peer_id: PeerId,
        user_id: UserId,
    },
    Tippen {
        peer_id: PeerId,
        user_id: UserId,
        tippt: bool,
    },
    Praesenz {
        peer_id: PeerId,
        status: PresenceStatus,
    },
    Sprachzustand {
        peer_id: PeerId,
        zustand: VoiceState,
    },
    /// Lokaler Sprachzustand nach Stummschaltung oder VAD
    EigenerSprachzustand(VoiceState),
    /// Normierter Mikrofonpegel (nur lokal)
    Pegel(f64),
    PeerVerbunden(PeerId),
    PeerGetrennt(PeerId),
    /// Handshake zweimal gescheitert
    PeerAufgegeben(PeerId),
    /// Kapazitaetsgrenze erreicht (informativ, nie fatal)
    Kapazitaet {
        code: ErrorCode,
        peer_id: Option<PeerId>,
        nachricht: String,
    },
    Serverfehler {
        code: ErrorCode,
        nachricht: String,
    },
    /// Mikrofon nicht verfuegbar, nur noch stumm
    Medienfehler(String),
    /// Terminal: Wiederverbinden aufgegeben
    Aufgegeben {
        versuche: u32,
    },
}

/// Momentaufnahme eines Zonenmitglieds
#[derive(Debug, Clone, PartialEq)]
pub struct PeerStatus {
    pub info: PeerInfo,
    pub phase: Option<PeerPhase>,
    pub gain: Option<f64>,
    pub gecullt: bool,
}

#[derive(Debug)]
enum Befehl {
    ZoneBetreten(ZoneId),
    ZoneVerlassen,
    NachrichtSenden {
        inhalt: String,
        antwort_auf: Option<MessageId>,
        antwort: oneshot::Sender<ClientResult<Uuid>>,
    },
    Tippen(bool),
    Position(Position),
    Praesenz(PresenceStatus),
    Stumm(bool),
    StummUmschalten,
    PushToTalk(bool),
    PttTaste(bool),
    Radius(f64, oneshot::Sender<f64>),
    Sichtbarkeit(bool),
    Peers(oneshot::Sender<Vec<PeerStatus>>),
    Beenden,
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

pub struct RaumfunkEngine {
    befehl_tx: mpsc::UnboundedSender<Befehl>,
    ereignis_tx: broadcast::Sender<EngineEvent>,
    task: JoinHandle<()>,
    close_timeout: Duration,
}

impl RaumfunkEngine {
    /// Startet eine Engine-Instanz (innerhalb einer Tokio-Runtime)
    pub fn init<V, G>(
        config: ClientConfig,
        identitaet: UserInfo,
        verbinder: V,
        backend: Arc<dyn MedienBackend>,
        graph: G,
    ) -> ClientResult<Self>
    where
        V: Verbinder,
        G: AudioGraph + 'static,
    {
        config.pruefen()?;

        let (befehl_tx, befehl_rx) = mpsc::unbounded_channel();
        let (ereignis_tx, _) = broadcast::channel(config.ereignis_kapazitaet.max(1));
        let (medien_tx, medien_rx) = mpsc::unbounded_channel();
        let (vad_tx, vad_rx) = mpsc::channel(64);

        let (verbindung, verbindung_rx) = VerbindungsManager::starten(verbinder, &config);
        let mesh = PeerMesh::neu(backend.clone(), medien_tx, &config);
        let mixer = SpatialMixer::neu(graph, config.hoer_radius);

        let mut sprech = SprechSteuerung::neu();
        let vad = match backend.mikrofon_oeffnen() {
            Ok(quelle) => Some(VadAufgabe::starten(quelle, config.vad.clone(), vad_tx)),
            Err(e) => {
                tracing::warn!(fehler = %e, "Mikrofon nicht verfuegbar, nur stumm");
                sprech.stumm_setzen(true);
                backend.mikrofon_aktivieren(false);
                let _ = ereignis_tx.send(EngineEvent::Medienfehler(e.to_string()));
                None
            }
        };

        let close_timeout = config.close_timeout();
        let task = EngineTask {
            position_drossel: Drossel::neu(config.positions_intervall()),
            sprach_drossel: Drossel::neu(config.positions_intervall()),
            tippen: TippEntpreller::neu(config.tipp_timeout()),
            identitaet,
            verbindung: Some(verbindung),
            verbindung_rx,
            verbindung_offen: true,
            befehl_rx,
            ereignis_tx: ereignis_tx.clone(),
            backend,
            mesh,
            medien_rx,
            mixer,
            sprech,
            vad,
            vad_rx,
            chat: ChatZustand::neu(),
            zone: None,
            lokaler_peer: None,
            peers: HashMap::new(),
            spricht: false,
            sichtbar: true,
        };
        let task = tokio::spawn(task.ausfuehren());

        Ok(Self {
            befehl_tx,
            ereignis_tx,
            task,
            close_timeout,
        })
    }

    /// Neuer Empfaenger fuer Engine-Ereignisse
    pub fn ereignisse(&self) -> broadcast::Receiver<EngineEvent> {
        self.ereignis_tx.subscribe()
    }

    fn befehl(&self, befehl: Befehl) -> ClientResult<()> {
        self.befehl_tx.send(befehl).map_err(|_| ClientError::Beendet)
    }

    pub fn zone_betreten(&self, zone_id: impl Into<String>) -> ClientResult<()> {
        self.befehl(Befehl::ZoneBetreten(ZoneId::new(zone_id)))
    }

    pub fn zone_verlassen(&self) -> ClientResult<()> {
        self.befehl(Befehl::ZoneVerlassen)
    }

    /// Sendet eine Chat-Nachricht und liefert ihre `clientMsgId`
    pub async fn nachricht_senden(
        &self,
        inhalt: impl Into<String>,
        antwort_auf: Option<MessageId>,
    ) -> ClientResult<Uuid> {
        let inhalt = inhalt.into();
        if inhalt.trim().is_empty() {
            return Err(ClientError::Ungueltig("leere Nachricht".into()));
        }
        let (antwort, rx) = oneshot::channel();
        self.befehl(Befehl::NachrichtSenden {
            inhalt,
            antwort_auf,
            antwort,
        })?;
        rx.await.map_err(|_| ClientError::Beendet)?
    }

    pub fn tippen(&self, tippt: bool) -> ClientResult<()> {
        self.befehl(Befehl::Tippen(tippt))
    }

    pub fn position_setzen(&self, position: Position) -> ClientResult<()> {
        self.befehl(Befehl::Position(position))
    }

    pub fn praesenz_setzen(&self, status: PresenceStatus) -> ClientResult<()> {
        self.befehl(Befehl::Praesenz(status))
    }

    pub fn stumm_setzen(&self, stumm: bool) -> ClientResult<()> {
        self.befehl(Befehl::Stumm(stumm))
    }

    pub fn stumm_umschalten(&self) -> ClientResult<()> {
        self.befehl(Befehl::StummUmschalten)
    }

    pub fn push_to_talk_setzen(&self, aktiv: bool) -> ClientResult<()> {
        self.befehl(Befehl::PushToTalk(aktiv))
    }

    pub fn push_to_talk_taste(&self, gedrueckt: bool) -> ClientResult<()> {
        self.befehl(Befehl::PttTaste(gedrueckt))
    }

    /// Setzt den Hoer-Radius und liefert den begrenzten Wert (1..50 m)
    pub async fn set_proximity_radius(&self, meter: f64) -> ClientResult<f64> {
        let (tx, rx) = oneshot::channel();
        self.befehl(Befehl::Radius(meter, tx))?;
        rx.await.map_err(|_| ClientError::Beendet)
    }

    /// Fenster sichtbar/verdeckt
    pub fn sichtbarkeit_setzen(&self, sichtbar: bool) -> ClientResult<()> {
        self.befehl(Befehl::Sichtbarkeit(sichtbar))
    }

    pub async fn peers(&self) -> ClientResult<Vec<PeerStatus>> {
        let (tx, rx) = oneshot::channel();
        self.befehl(Befehl::Peers(tx))?;
        rx.await.map_err(|_| ClientError::Beendet)
    }

    /// Beendet die Engine: Mesh abbauen, VAD stoppen, Verbindung schliessen
    pub async fn beenden(self) {
        let _ = self.befehl_tx.send(Befehl::Beenden);
        let mut task = self.task;
        // Verbindungstask und VAD haben je eigene Zeitlimits
        let limit = self.close_timeout * 3;
        if tokio::time::timeout(limit, &mut task).await.is_err() {
            tracing::warn!("Engine-Task reagiert nicht, wird abgebrochen");
            task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Engine-Task
// ---------------------------------------------------------------------------

struct EngineTask<G: AudioGraph> {
    identitaet: UserInfo,
    verbindung: Option<VerbindungsManager>,
    verbindung_rx: mpsc::Receiver<VerbindungsEreignis>,
    verbindung_offen: bool,
    befehl_rx: mpsc::UnboundedReceiver<Befehl>,
    ereignis_tx: broadcast::Sender<EngineEvent>,
    backend: Arc<dyn MedienBackend>,

    mesh: PeerMesh,
    medien_rx: mpsc::UnboundedReceiver<MedienEreignis>,
    mixer: SpatialMixer<G>,
    sprech: SprechSteuerung,
    vad: Option<VadAufgabe>,
    vad_rx: mpsc::Receiver<VadEreignis>,

    chat: ChatZustand,
    /// Gewuenschte Zone (bleibt ueber Verbindungsabbrueche erhalten)
    zone: Option<ZoneId>,
    /// Eigene Peer-ID der aktuellen Verbindung, gesetzt nach `zone_joined`
    lokaler_peer: Option<PeerId>,
    peers: HashMap<PeerId, PeerInfo>,

    position_drossel: Drossel<Position>,
    sprach_drossel: Drossel<VoiceState>,
    tippen: TippEntpreller,
    spricht: bool,
    sichtbar: bool,
}

impl<G: AudioGraph + 'static> EngineTask<G> {
    async fn ausfuehren(mut self) {
        let mut takt = tokio::time::interval(TAKT);
        takt.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                befehl = self.befehl_rx.recv() => {
                    match befehl {
                        None | Some(Befehl::Beenden) => break,
                        Some(befehl) => self.befehl(befehl).await,
                    }
                }

                ereignis = self.verbindung_rx.recv(), if self.verbindung_offen => {
                    match ereignis {
                        Some(ereignis) => self.verbindungs_ereignis(ereignis).await,
                        None => self.verbindung_offen = false,
                    }
                }

                Some(ereignis) = self.medien_rx.recv() => {
                    let aktionen = self.mesh.medien_ereignis(ereignis).await;
                    self.ausfuehren_aktionen(aktionen);
                }

                Some(ereignis) = self.vad_rx.recv() => self.vad_ereignis(ereignis),

                _ = takt.tick() => self.takt().await,
            }
        }

        self.herunterfahren().await;
    }

    async fn herunterfahren(&mut self) {
        tracing::info!("Engine wird beendet");
        let aktionen = self.mesh.alle_schliessen();
        self.ausfuehren_aktionen(aktionen);
        self.mixer.leeren();
        if let Some(vad) = self.vad.take() {
            vad.stoppen().await;
        }
        if let Some(verbindung) = self.verbindung.take() {
            if self.zone.is_some() {
                let _ = verbindung.verlassen();
            }
            verbindung.beenden().await;
        }
    }

    fn melden(&self, ereignis: EngineEvent) {
        // Ohne Empfaenger gehen Ereignisse verloren
        let _ = self.ereignis_tx.send(ereignis);
    }

    fn senden(&self, nachricht: ClientMessage) {
        let Some(verbindung) = &self.verbindung else {
            return;
        };
        if let Err(e) = verbindung.senden(nachricht) {
            tracing::debug!(fehler = %e, "Senden nicht moeglich");
        }
    }

    fn ist_beigetreten(&self) -> bool {
        self.lokaler_peer.is_some()
    }

    // -----------------------------------------------------------------------
    // Befehle
    // -----------------------------------------------------------------------

    async fn befehl(&mut self, befehl: Befehl) {
        match befehl {
            Befehl::ZoneBetreten(zone_id) => self.zone_betreten(zone_id),
            Befehl::ZoneVerlassen => self.zone_verlassen(),
            Befehl::NachrichtSenden {
                inhalt,
                antwort_auf,
                antwort,
            } => {
                let ergebnis = match &self.zone {
                    Some(zone_id) => {
                        let id = Uuid::new_v4();
                        self.senden(ClientMessage::Chat(ChatRequest {
                            zone_id: zone_id.clone(),
                            content: inhalt,
                            client_msg_id: Some(id),
                            reply_to: antwort_auf,
                        }));
                        if self.tippen.tippt() {
                            self.tippen.zuruecksetzen();
                            self.senden(ClientMessage::Typing(TypingRequest {
                                zone_id: zone_id.clone(),
                                is_typing: false,
                            }));
                        }
                        Ok(id)
                    }
                    None => Err(ClientError::NichtInZone),
                };
                let _ = antwort.send(ergebnis);
            }
            Befehl::Tippen(tippt) => {
                let Some(zone_id) = self.zone.clone() else {
                    return;
                };
                if !self.ist_beigetreten() {
                    return;
                }
                if let Some(is_typing) = self.tippen.setzen(tippt, Instant::now()) {
                    self.senden(ClientMessage::Typing(TypingRequest { zone_id, is_typing }));
                }
            }
            Befehl::Position(position) => {
                if !position.ist_endlich() {
                    tracing::warn!(?position, "Ungueltige Position ignoriert");
                    return;
                }
                self.mixer.lokale_position_setzen(position);
                if self.ist_beigetreten() {
                    if let Some(p) = self.position_drossel.anbieten(position, Instant::now()) {
                        self.senden(ClientMessage::Position(p));
                    }
                }
            }
            Befehl::Praesenz(status) => {
                if self.ist_beigetreten() {
                    self.senden(ClientMessage::Presence(PresenceUpdate { status }));
                }
            }
            Befehl::Stumm(stumm) => {
                if stumm || self.vad.is_some() {
                    self.sprech.stumm_setzen(stumm);
                }
                self.sprechzustand_geaendert();
            }
            Befehl::StummUmschalten => {
                if self.vad.is_some() || !self.sprech.ist_stumm() {
                    self.sprech.stumm_umschalten();
                }
                self.sprechzustand_geaendert();
            }
            Befehl::PushToTalk(aktiv) => {
                self.sprech.push_to_talk_setzen(aktiv);
                self.sprechzustand_geaendert();
            }
            Befehl::PttTaste(gedrueckt) => {
                if self.vad.is_some() {
                    self.sprech.taste(gedrueckt);
                }
                self.sprechzustand_geaendert();
            }
            Befehl::Radius(meter, antwort) => {
                let radius = self.mixer.set_proximity_radius(meter);
                tracing::debug!(radius, "Hoer-Radius gesetzt");
                let _ = antwort.send(radius);
            }
            Befehl::Sichtbarkeit(sichtbar) => self.sichtbarkeit_setzen(sichtbar),
            Befehl::Peers(antwort) => {
                let _ = antwort.send(self.momentaufnahme());
            }
            Befehl::Beenden => {}
        }
    }

    fn zone_betreten(&mut self, zone_id: ZoneId) {
        if self.zone.as_ref() == Some(&zone_id) {
            return;
        }
        if self.zone.is_some() {
            self.zone_lokal_verlassen();
        }
        tracing::info!(zone = %zone_id, "Zone wird betreten");
        self.zone = Some(zone_id.clone());
        if let Some(verbindung) = &self.verbindung {
            if let Err(e) = verbindung.beitreten(zone_id, self.identitaet.clone()) {
                tracing::debug!(fehler = %e, "Beitritt nicht moeglich");
            }
        }
    }

    fn zone_verlassen(&mut self) {
        if self.zone.is_none() {
            return;
        }
        if let Some(verbindung) = &self.verbindung {
            let _ = verbindung.verlassen();
        }
        self.zone_lokal_verlassen();
    }

    /// Baut alles ab, was zur aktuellen Zone gehoert
    fn zone_lokal_verlassen(&mut self) {
        let aktionen = self.mesh.alle_schliessen();
        self.ausfuehren_aktionen(aktionen);
        self.mixer.leeren();
        self.peers.clear();
        self.chat.verlassen();
        self.tippen.zuruecksetzen();
        self.position_drossel.zuruecksetzen();
        self.sprach_drossel.zuruecksetzen();
        self.lokaler_peer = None;
        if let Some(zone_id) = self.zone.take() {
            tracing::info!(zone = %zone_id, "Zone verlassen");
            self.melden(EngineEvent::ZoneVerlassen { zone_id });
        }
    }

    fn sichtbarkeit_setzen(&mut self, sichtbar: bool) {
        if self.sichtbar == sichtbar {
            return;
        }
        self.sichtbar = sichtbar;
        if sichtbar {
            self.mixer.fortsetzen();
            if let Some(vad) = &self.vad {
                vad.fortsetzen();
            }
            self.backend.mikrofon_aktivieren(self.sprech.mikrofon_aktiv());
        } else {
            self.mixer.aussetzen();
            self.backend.mikrofon_aktivieren(false);
            if let Some(vad) = &self.vad {
                vad.aussetzen();
            }
        }
        tracing::debug!(sichtbar, "Sichtbarkeit geaendert");
    }

    fn sprachzustand(&self) -> VoiceState {
        let muted = self.sprech.ist_stumm();
        VoiceState {
            muted,
            speaking: self.spricht && !muted,
            volume: 1.0,
        }
    }

    fn sprechzustand_geaendert(&mut self) {
        let aktiv = self.sprech.mikrofon_aktiv() && self.sichtbar && self.vad.is_some();
        self.backend.mikrofon_aktivieren(aktiv);
        if self.sprech.ist_stumm() {
            self.spricht = false;
        }
        self.sprachzustand_verteilen();
    }

    fn sprachzustand_verteilen(&mut self) {
        let zustand = self.sprachzustand();
        self.melden(EngineEvent::EigenerSprachzustand(zustand));
        if self.ist_beigetreten() {
            if let Some(z) = self.sprach_drossel.anbieten(zustand, Instant::now()) {
                self.senden(ClientMessage::VoiceState(z));
            }
        }
    }

    fn momentaufnahme(&self) -> Vec<PeerStatus> {
        let mut liste: Vec<PeerStatus> = self
            .peers
            .values()
            .map(|info| PeerStatus {
                info: info.clone(),
                phase: self.mesh.phase(&info.peer_id),
                gain: self.mixer.gain(&info.peer_id),
                gecullt: self.mixer.ist_gecullt(&info.peer_id),
            })
            .collect();
        liste.sort_by(|a, b| a.info.peer_id.cmp(&b.info.peer_id));
        liste
    }

    // -----------------------------------------------------------------------
    // VAD und Takt
    // -----------------------------------------------------------------------

    fn vad_ereignis(&mut self, ereignis: VadEreignis) {
        match ereignis {
            VadEreignis::Pegel(pegel) => self.melden(EngineEvent::Pegel(pegel)),
            VadEreignis::Sprechen(spricht) => {
                let spricht = spricht && !self.sprech.ist_stumm();
                if spricht != self.spricht {
                    self.spricht = spricht;
                    self.sprachzustand_verteilen();
                }
            }
        }
    }

    async fn takt(&mut self) {
        let aktionen = self.mesh.tick().await;
        self.ausfuehren_aktionen(aktionen);

        let jetzt = Instant::now();
        if let Some(position) = self.position_drossel.faellig(jetzt) {
            self.senden(ClientMessage::Position(position));
        }
        if let Some(zustand) = self.sprach_drossel.faellig(jetzt) {
            self.senden(ClientMessage::VoiceState(zustand));
        }
        if let Some(is_typing) = self.tippen.faellig(jetzt) {
            if let Some(zone_id) = self.zone.clone() {
                self.senden(ClientMessage::Typing(TypingRequest { zone_id, is_typing }));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Mesh-Aktionen
    // -----------------------------------------------------------------------

    fn ausfuehren_aktionen(&mut self, aktionen: Vec<MeshAktion>) {
        for aktion in aktionen {
            match aktion {
                MeshAktion::Senden(nachricht) => self.senden(nachricht),
                MeshAktion::KnotenAnlegen(peer) => {
                    if let Err(e) = self.mixer.peer_hinzufuegen(&peer) {
                        tracing::warn!(peer_id = %peer, fehler = %e, "Audio-Knoten nicht angelegt");
                    }
                }
                MeshAktion::KnotenEntfernen(peer) => self.mixer.peer_entfernen(&peer),
                MeshAktion::Hoerbar(peer) => self.mixer.cull_setzen(&peer, false),
                MeshAktion::Stumm(peer) => self.mixer.cull_setzen(&peer, true),
                MeshAktion::PeerVerbunden(peer) => self.melden(EngineEvent::PeerVerbunden(peer)),
                MeshAktion::PeerGetrennt(peer) => self.melden(EngineEvent::PeerGetrennt(peer)),
                MeshAktion::Aufgegeben(peer) => self.melden(EngineEvent::PeerAufgegeben(peer)),
            }
        }
    }

    // -----------------------------------------------------------------------
    // Verbindungsereignisse
    // -----------------------------------------------------------------------

    async fn verbindungs_ereignis(&mut self, ereignis: VerbindungsEreignis) {
        match ereignis {
            VerbindungsEreignis::Zustand(zustand) => {
                if zustand == VerbindungsZustand::Getrennt && self.lokaler_peer.is_some() {
                    // Die Peer-ID gilt nur fuer die abgebrochene Verbindung
                    let aktionen = self.mesh.alle_schliessen();
                    self.ausfuehren_aktionen(aktionen);
                    self.lokaler_peer = None;
                }
                self.melden(EngineEvent::Verbindung(zustand));
            }
            VerbindungsEreignis::Aufgegeben { versuche } => {
                self.melden(EngineEvent::Aufgegeben { versuche });
            }
            VerbindungsEreignis::Nachricht(nachricht) => self.server_nachricht(nachricht).await,
        }
    }

    async fn server_nachricht(&mut self, nachricht: ServerMessage) {
        tracing::trace!(typ = nachricht.typ_name(), "Nachricht vom Dienst");
        match nachricht {
            ServerMessage::ZoneJoined(beitritt) => {
                if self.zone.as_ref() != Some(&beitritt.zone_id) {
                    tracing::debug!(zone = %beitritt.zone_id, "Beitritt zu veralteter Zone ignoriert");
                    return;
                }
                if self.lokaler_peer.is_some() {
                    let aktionen = self.mesh.alle_schliessen();
                    self.ausfuehren_aktionen(aktionen);
                }
                self.mixer.leeren();
                self.mesh
                    .zone_betreten(beitritt.peer_id.clone(), beitritt.ice_servers);
                self.lokaler_peer = Some(beitritt.peer_id.clone());

                self.peers.clear();
                for info in &beitritt.peers {
                    self.mixer.remote_position_setzen(&info.peer_id, info.position);
                    self.peers.insert(info.peer_id.clone(), info.clone());
                }
                let verlauf = self.chat.verlauf_setzen(&beitritt.zone_id, &beitritt.history);

                tracing::info!(
                    zone = %beitritt.zone_id,
                    peer_id = %beitritt.peer_id,
                    mesh_slot = beitritt.mesh_slot,
                    "Zone betreten"
                );
                self.melden(EngineEvent::ZoneBetreten {
                    zone_id: beitritt.zone_id,
                    peer_id: beitritt.peer_id,
                    mesh_slot: beitritt.mesh_slot,
                    peers: beitritt.peers,
                    verlauf,
                });

                // Eigenen Zustand bekanntgeben
                self.position_drossel.zuruecksetzen();
                self.sprach_drossel.zuruecksetzen();
                let position = self.mixer.lokale_position();
                if let Some(p) = self.position_drossel.anbieten(position, Instant::now()) {
                    self.senden(ClientMessage::Position(p));
                }
                let zustand = self.sprachzustand();
                if let Some(z) = self.sprach_drossel.anbieten(zustand, Instant::now()) {
                    self.senden(ClientMessage::VoiceState(z));
                }
            }
            ServerMessage::ZoneLeft(verlassen) => {
                tracing::debug!(zone = %verlassen.zone_id, "Verlassen bestaetigt");
            }
            ServerMessage::PeerJoined(info) => {
                if Some(&info.peer_id) == self.lokaler_peer.as_ref() {
                    return;
                }
                self.mixer.remote_position_setzen(&info.peer_id, info.position);
                self.peers.insert(info.peer_id.clone(), info.clone());
                self.melden(EngineEvent::BenutzerBeigetreten(info));
            }
            ServerMessage::PeerLeft(weg) => {
                let aktionen = self.mesh.peer_verlassen(&weg.peer_id);
                self.ausfuehren_aktionen(aktionen);
                self.mixer.peer_vergessen(&weg.peer_id);
                self.peers.remove(&weg.peer_id);
                self.melden(EngineEvent::BenutzerGegangen {
                    peer_id: weg.peer_id,
                    user_id: weg.user_id,
                });
            }
            ServerMessage::Message(zustellung) => match self.chat.empfangen(zustellung.message) {
                Empfang::Neu(nachricht) => self.melden(EngineEvent::Nachricht(nachricht)),
                Empfang::Luecke { letzte_seq } => {
                    if let Some(zone_id) = self.zone.clone() {
                        tracing::info!(zone = %zone_id, letzte_seq, "Luecke im Verlauf, Resync angefordert");
                        self.senden(ClientMessage::Resync(ResyncRequest {
                            zone_id,
                            last_seen_seq: letzte_seq,
                        }));
                    }
                }
                Empfang::Duplikat | Empfang::Verworfen => {}
            },
            ServerMessage::MessageAck(ack) => {
                self.chat.bestaetigt(ack.seq);
                self.melden(EngineEvent::NachrichtBestaetigt {
                    client_msg_id: ack.client_msg_id,
                    id: ack.id,
                    seq: ack.seq,
                });
            }
            ServerMessage::Typing(t) => {
                if Some(&t.peer_id) != self.lokaler_peer.as_ref() {
                    self.melden(EngineEvent::Tippen {
                        peer_id: t.peer_id,
                        user_id: t.user_id,
                        tippt: t.is_typing,
                    });
                }
            }
            ServerMessage::Offer(s) => {
                let aktionen = self.mesh.angebot_empfangen(s.from, s.sdp).await;
                self.ausfuehren_aktionen(aktionen);
            }
            ServerMessage::Answer(s) => {
                let aktionen = self.mesh.antwort_empfangen(s.from, s.sdp).await;
                self.ausfuehren_aktionen(aktionen);
            }
            ServerMessage::IceCandidate(i) => {
                self.mesh.kandidat_empfangen(i.from, i.candidate).await;
            }
            ServerMessage::PeerVoiceState(v) => {
                if let Some(info) = self.peers.get_mut(&v.peer_id) {
                    info.muted = v.muted;
                    info.speaking = v.speaking;
                }
                self.melden(EngineEvent::Sprachzustand {
                    peer_id: v.peer_id,
                    zustand: VoiceState {
                        muted: v.muted,
                        speaking: v.speaking,
                        volume: v.volume,
                    },
                });
            }
            ServerMessage::PeerPosition(p) => {
                if let Some(info) = self.peers.get_mut(&p.peer_id) {
                    info.position = p.position;
                }
                self.mixer.remote_position_setzen(&p.peer_id, p.position);
            }
            ServerMessage::PeerPresence(p) => {
                if let Some(info) = self.peers.get_mut(&p.peer_id) {
                    info.status = p.status;
                }
                self.melden(EngineEvent::Praesenz {
                    peer_id: p.peer_id,
                    status: p.status,
                });
            }
            ServerMessage::CullUpdate(update) => {
                let aktionen = self.mesh.cull_anwenden(&update).await;
                self.ausfuehren_aktionen(aktionen);
            }
            ServerMessage::Reconnected(r) => {
                let wiedergabe = self.chat.wiedergabe(r);
                if wiedergabe.zurueckgesetzt {
                    self.melden(EngineEvent::VerlaufZurueckgesetzt {
                        nachrichten: wiedergabe.nachrichten,
                    });
                } else {
                    for nachricht in wiedergabe.nachrichten {
                        self.melden(EngineEvent::Nachricht(nachricht));
                    }
                }
            }
            ServerMessage::PeerUnavailable(u) => {
                let aktionen = self.mesh.nicht_verfuegbar(&u.peer_id, u.reason);
                self.ausfuehren_aktionen(aktionen);
                if u.reason == UnavailableReason::MeshFull {
                    self.melden(EngineEvent::Kapazitaet {
                        code: ErrorCode::MeshFull,
                        peer_id: Some(u.peer_id),
                        nachricht: "Peer ohne Mesh-Platz".into(),
                    });
                }
            }
            ServerMessage::Error(fehler) => {
                if fehler.code.ist_kapazitaet() {
                    tracing::info!(code = ?fehler.code, nachricht = %fehler.message, "Kapazitaetsgrenze");
                    self.melden(EngineEvent::Kapazitaet {
                        code: fehler.code,
                        peer_id: None,
                        nachricht: fehler.message,
                    });
                } else {
                    tracing::warn!(code = ?fehler.code, nachricht = %fehler.message, "Fehler vom Dienst");
                    self.melden(EngineEvent::Serverfehler {
                        code: fehler.code,
                        nachricht: fehler.message,
                    });
                }
            }
            ServerMessage::Pong(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::SimuliertesBackend;
    use async_trait::async_trait;
    use futures_util::{SinkExt, StreamExt};
    use raumfunk_audio::SoftwareGraph;
    use raumfunk_protocol::messages::{
        AudiblePeer, CullUpdate, PeerPosition, ZoneJoined,
    };
    use raumfunk_protocol::wire::{Eingang, ServerCodec};
    use std::io;
    use tokio::io::DuplexStream;
    use tokio_util::codec::Framed;

    type ServerSeite = Framed<DuplexStream, ServerCodec>;

    struct TestVerbinder {
        server_tx: mpsc::UnboundedSender<ServerSeite>,
    }

    #[async_trait]
    impl Verbinder for TestVerbinder {
        type Stream = DuplexStream;

        async fn verbinden(&self) -> io::Result<DuplexStream> {
            let (client, server) = tokio::io::duplex(64 * 1024);
            let _ = self.server_tx.send(Framed::new(server, ServerCodec::new()));
            Ok(client)
        }
    }

    struct Aufbau {
        engine: RaumfunkEngine,
        ereignisse: broadcast::Receiver<EngineEvent>,
        server: ServerSeite,
        backend: Arc<SimuliertesBackend>,
    }

    async fn aufbauen(backend: SimuliertesBackend) -> Aufbau {
        let (server_tx, mut server_rx) = mpsc::unbounded_channel();
        let backend = Arc::new(backend);
        let engine = RaumfunkEngine::init(
            ClientConfig::default(),
            UserInfo::new("u1", "Alice"),
            TestVerbinder { server_tx },
            backend.clone(),
            SoftwareGraph::neu(48_000),
        )
        .unwrap();
        let ereignisse = engine.ereignisse();
        let server = server_rx.recv().await.unwrap();
        Aufbau {
            engine,
            ereignisse,
            server,
            backend,
        }
    }

    async fn naechste(server: &mut ServerSeite) -> ClientMessage {
        loop {
            match server.next().await {
                Some(Ok(Eingang::Nachricht(u))) => {
                    if matches!(u.nachricht, ClientMessage::Ping) {
                        continue;
                    }
                    return u.nachricht;
                }
                anderes => panic!("Erwartete Nachricht, bekam {:?}", anderes),
            }
        }
    }

    async fn warten_auf<F>(ereignisse: &mut broadcast::Receiver<EngineEvent>, mut pred: F) -> EngineEvent
    where
        F: FnMut(&EngineEvent) -> bool,
    {
        loop {
            match ereignisse.recv().await {
                Ok(e) if pred(&e) => return e,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("Ereignisbus geschlossen: {e}"),
            }
        }
    }

    async fn beitreten(a: &mut Aufbau, lokal: &str, peers: Vec<PeerInfo>) {
        a.engine.zone_betreten("hub").unwrap();
        assert!(matches!(naechste(&mut a.server).await, ClientMessage::JoinZone(_)));
        a.server
            .send(ServerMessage::ZoneJoined(ZoneJoined {
                zone_id: ZoneId::new("hub"),
                peer_id: PeerId::new(lokal),
                peers,
                history: Vec::new(),
                ice_servers: Vec::new(),
                mesh_slot: true,
            }))
            .await
            .unwrap();
        warten_auf(&mut a.ereignisse, |e| matches!(e, EngineEvent::ZoneBetreten { .. })).await;
    }

    fn peer_info(id: &str, position: Position) -> PeerInfo {
        let mut info = PeerInfo::aus_user_info(PeerId::new(id), &UserInfo::new(id, id));
        info.position = position;
        info
    }

    #[tokio::test]
    async fn beitritt_meldet_eigenen_zustand() {
        let mut a = aufbauen(SimuliertesBackend::neu()).await;
        beitreten(&mut a, "peer_a", Vec::new()).await;

        assert!(matches!(naechste(&mut a.server).await, ClientMessage::Position(p) if p == Position::URSPRUNG));
        match naechste(&mut a.server).await {
            ClientMessage::VoiceState(v) => assert!(!v.muted),
            anderes => panic!("{:?}", anderes),
        }
        a.engine.beenden().await;
    }

    #[tokio::test]
    async fn nachricht_ohne_zone_abgelehnt() {
        let a = aufbauen(SimuliertesBackend::neu()).await;
        assert!(matches!(
            a.engine.nachricht_senden("hallo", None).await,
            Err(ClientError::NichtInZone)
        ));
        assert!(matches!(
            a.engine.nachricht_senden("   ", None).await,
            Err(ClientError::Ungueltig(_))
        ));
        a.engine.beenden().await;
    }

    #[tokio::test]
    async fn ohne_mikrofon_nur_stumm() {
        let backend = SimuliertesBackend::neu();
        backend.mikrofon_verfuegbar(false);
        let mut a = aufbauen(backend).await;

        beitreten(&mut a, "peer_a", Vec::new()).await;
        assert!(matches!(naechste(&mut a.server).await, ClientMessage::Position(_)));
        match naechste(&mut a.server).await {
            ClientMessage::VoiceState(v) => assert!(v.muted),
            anderes => panic!("{:?}", anderes),
        }

        // Aufheben der Stummschaltung bleibt wirkungslos, Chat geht weiter
        a.engine.stumm_setzen(false).unwrap();
        let e = warten_auf(&mut a.ereignisse, |e| matches!(e, EngineEvent::EigenerSprachzustand(_))).await;
        assert!(matches!(e, EngineEvent::EigenerSprachzustand(v) if v.muted));
        assert!(!a.backend.ist_mikrofon_aktiv());
        assert!(a.engine.nachricht_senden("nur text", None).await.is_ok());
        a.engine.beenden().await;
    }

    #[tokio::test]
    async fn push_to_talk_steuert_mikrofon() {
        let mut a = aufbauen(SimuliertesBackend::neu()).await;
        a.engine.push_to_talk_setzen(true).unwrap();
        let e = warten_auf(&mut a.ereignisse, |e| matches!(e, EngineEvent::EigenerSprachzustand(_))).await;
        assert!(matches!(e, EngineEvent::EigenerSprachzustand(v) if v.muted));
        assert!(!a.backend.ist_mikrofon_aktiv());

        a.engine.push_to_talk_taste(true).unwrap();
        let e = warten_auf(&mut a.ereignisse, |e| matches!(e, EngineEvent::EigenerSprachzustand(_))).await;
        assert!(matches!(e, EngineEvent::EigenerSprachzustand(v) if !v.muted));
        assert!(a.backend.ist_mikrofon_aktiv());

        a.engine.push_to_talk_taste(false).unwrap();
        let e = warten_auf(&mut a.ereignisse, |e| matches!(e, EngineEvent::EigenerSprachzustand(_))).await;
        assert!(matches!(e, EngineEvent::EigenerSprachzustand(v) if v.muted));
        a.engine.beenden().await;
    }

    #[tokio::test]
    async fn raeumlicher_gain_und_hysterese() {
        let mut a = aufbauen(SimuliertesBackend::neu()).await;
        let b = PeerId::new("peer_b");
        beitreten(&mut a, "peer_a", vec![peer_info("peer_b", Position::new(2.0, 0.0, 0.0))]).await;

        a.server
            .send(ServerMessage::CullUpdate(CullUpdate {
                audible_peers: vec![AudiblePeer {
                    peer_id: b.clone(),
                    distance: 2.0,
                    volume: 0.8,
                }],
                muted_peers: Vec::new(),
            }))
            .await
            .unwrap();

        // peer_a ist Initiator: Angebot, dann Antwort vom Gegenueber
        loop {
            if let ClientMessage::Offer(s) = naechste(&mut a.server).await {
                assert_eq!(s.to, b);
                break;
            }
        }
        a.server
            .send(ServerMessage::Answer(raumfunk_protocol::messages::SdpRelay {
                from: b.clone(),
                sdp: "answer".into(),
            }))
            .await
            .unwrap();
        warten_auf(&mut a.ereignisse, |e| *e == EngineEvent::PeerVerbunden(b.clone())).await;

        let status = a.engine.peers().await.unwrap();
        let gain = status[0].gain.unwrap();
        assert!((gain - 0.64).abs() < 1e-9, "2 m -> v 0.8 -> gain 0.64, war {gain}");

        // Entfernt sich auf 15 m: sofort stumm, aber kein Abbau
        a.server
            .send(ServerMessage::PeerPosition(PeerPosition {
                peer_id: b.clone(),
                position: Position::new(15.0, 0.0, 0.0),
            }))
            .await
            .unwrap();
        a.server
            .send(ServerMessage::CullUpdate(CullUpdate {
                audible_peers: Vec::new(),
                muted_peers: vec![b.clone()],
            }))
            .await
            .unwrap();

        let status = loop {
            let s = a.engine.peers().await.unwrap();
            if s[0].gecullt {
                break s;
            }
            tokio::task::yield_now().await;
        };
        assert_eq!(status[0].gain, Some(0.0));
        assert_eq!(status[0].phase, Some(PeerPhase::Verbunden));
        assert_eq!(a.backend.geschlossene_verbindungen(), 0);
        a.engine.beenden().await;
    }

    #[tokio::test]
    async fn verdeckt_setzt_aus() {
        let mut a = aufbauen(SimuliertesBackend::neu()).await;
        a.engine.sichtbarkeit_setzen(false).unwrap();
        let _ = a.engine.peers().await.unwrap();
        assert!(!a.backend.ist_mikrofon_aktiv());

        a.engine.sichtbarkeit_setzen(true).unwrap();
        let _ = a.engine.peers().await.unwrap();
        assert!(a.backend.ist_mikrofon_aktiv());

        assert_eq!(a.engine.set_proximity_radius(100.0).await.unwrap(), 50.0);
        assert_eq!(a.engine.set_proximity_radius(0.2).await.unwrap(), 1.0);
        let _ = a.ereignisse.try_recv();
        a.engine.beenden().await;
    }

    #[tokio::test]
    async fn kapazitaet_ist_nicht_fatal() {
        let mut a = aufbauen(SimuliertesBackend::neu()).await;
        beitreten(&mut a, "peer_i", Vec::new()).await;
        a.server
            .send(ServerMessage::fehler(ErrorCode::MeshFull, "nur Text"))
            .await
            .unwrap();
        let e = warten_auf(&mut a.ereignisse, |e| matches!(e, EngineEvent::Kapazitaet { .. })).await;
        assert!(matches!(e, EngineEvent::Kapazitaet { code: ErrorCode::MeshFull, .. }));
        assert!(a.engine.nachricht_senden("trotzdem", None).await.is_ok());
        a.engine.beenden().await;
    }
}
