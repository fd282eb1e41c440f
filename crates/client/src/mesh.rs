//! Peer-Mesh: eine Medienverbindung pro hoerbarem Peer
//!
//! Zustand pro entferntem Peer:
//!
//! ```text
//! idle -> angebot | antwort -> verbunden -> (schliessen) -> entfernt
//! ```
//!
//! Alle Methoden liefern eine Liste von [`MeshAktion`]en zurueck, die die
//! Engine ausfuehrt (Signale senden, Audio-Knoten anlegen, Ereignisse).
//! Das Mesh selbst kennt weder Verbindungsmanager noch Mixer.

use raumfunk_core::types::PeerId;
use raumfunk_protocol::messages::{
    ClientMessage, CullUpdate, IceServer, IceSignal, SdpSignal, UnavailableReason,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::ClientConfig;
use crate::media::{MedienBackend, MedienEreignis, PeerVerbindung};

/// Was die Engine nach einer Mesh-Operation ausfuehren muss
#[derive(Debug, Clone, PartialEq)]
pub enum MeshAktion {
    Senden(ClientMessage),
    /// Audio-Knoten fuer einen verbundenen Peer anlegen
    KnotenAnlegen(PeerId),
    KnotenEntfernen(PeerId),
    /// Peer liegt im Radius (Gain aus Position)
    Hoerbar(PeerId),
    /// Peer liegt ausserhalb des Radius (sofort Gain 0)
    Stumm(PeerId),
    PeerVerbunden(PeerId),
    PeerGetrennt(PeerId),
    /// Zweiter Handshake-Fehlschlag, Peer bleibt unverbunden
    Aufgegeben(PeerId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerPhase {
    Angebot,
    Antwort,
    Verbunden,
}

struct PeerEintrag {
    phase: PeerPhase,
    verbindung: Box<dyn PeerVerbindung>,
    remote_gesetzt: bool,
    ice_puffer: Vec<serde_json::Value>,
    /// Frist bis zum `connected`-Ereignis
    handshake_frist: Option<Instant>,
}

pub struct PeerMesh {
    backend: Arc<dyn MedienBackend>,
    ereignis_tx: mpsc::UnboundedSender<MedienEreignis>,
    lokal: Option<PeerId>,
    ice_server: Vec<IceServer>,
    max_peers: usize,
    hysterese: Duration,
    handshake_timeout: Duration,
    close_timeout: Duration,
    vorpuffer_max: usize,

    eintraege: HashMap<PeerId, PeerEintrag>,
    /// Kandidaten von Peers, fuer die es noch keinen Eintrag gibt
    vorpuffer: HashMap<PeerId, Vec<serde_json::Value>>,
    /// Zuletzt als hoerbar gemeldete Peers
    hoerbar: HashSet<PeerId>,
    /// Seit wann ein Peer ausserhalb des Radius liegt
    stumm_seit: HashMap<PeerId, Instant>,
    fehlschlaege: HashMap<PeerId, u32>,
    aufgegeben: HashSet<PeerId>,
}

impl PeerMesh {
    pub fn neu(
        backend: Arc<dyn MedienBackend>,
        ereignis_tx: mpsc::UnboundedSender<MedienEreignis>,
        config: &ClientConfig,
    ) -> Self {
        Self {
            backend,
            ereignis_tx,
            lokal: None,
            ice_server: Vec::new(),
            max_peers: config.max_peers,
            hysterese: config.hysterese(),
            handshake_timeout: config.handshake_timeout(),
            close_timeout: config.close_timeout(),
            vorpuffer_max: config.ice_vorpuffer,
            eintraege: HashMap::new(),
            vorpuffer: HashMap::new(),
            hoerbar: HashSet::new(),
            stumm_seit: HashMap::new(),
            fehlschlaege: HashMap::new(),
            aufgegeben: HashSet::new(),
        }
    }

    /// Setzt die eigene Peer-ID und die ICE-Server nach `zone_joined`
    pub fn zone_betreten(&mut self, lokal: PeerId, ice_server: Vec<IceServer>) {
        self.lokal = Some(lokal);
        self.ice_server = ice_server;
    }

    pub fn anzahl(&self) -> usize {
        self.eintraege.len()
    }

    pub fn phase(&self, peer: &PeerId) -> Option<PeerPhase> {
        self.eintraege.get(peer).map(|e| e.phase)
    }

    pub fn ist_aufgegeben(&self, peer: &PeerId) -> bool {
        self.aufgegeben.contains(peer)
    }

    pub fn verbundene(&self) -> Vec<PeerId> {
        self.eintraege
            .iter()
            .filter(|(_, e)| e.phase == PeerPhase::Verbunden)
            .map(|(p, _)| p.clone())
            .collect()
    }

    /// Wer bei einem Paar das Angebot erstellt: die kleinere Peer-ID
    fn ist_initiator(&self, peer: &PeerId) -> bool {
        self.lokal.as_ref().is_some_and(|lokal| lokal < peer)
    }

    // -----------------------------------------------------------------------
    // Hoerbarkeit
    // -----------------------------------------------------------------------

    pub async fn cull_anwenden(&mut self, update: &CullUpdate) -> Vec<MeshAktion> {
        let mut aktionen = Vec::new();
        let jetzt = Instant::now();

        for stumm in &update.muted_peers {
            self.hoerbar.remove(stumm);
            aktionen.push(MeshAktion::Stumm(stumm.clone()));
            if self.eintraege.contains_key(stumm) {
                self.stumm_seit.entry(stumm.clone()).or_insert(jetzt);
            }
        }

        for hoerbar in &update.audible_peers {
            let peer = &hoerbar.peer_id;
            if Some(peer) == self.lokal.as_ref() {
                continue;
            }
            self.hoerbar.insert(peer.clone());
            self.stumm_seit.remove(peer);
            aktionen.push(MeshAktion::Hoerbar(peer.clone()));

            if !self.eintraege.contains_key(peer)
                && !self.aufgegeben.contains(peer)
                && self.eintraege.len() < self.max_peers
                && self.ist_initiator(peer)
            {
                self.angebot_starten(peer, &mut aktionen).await;
            }
        }
        aktionen
    }

    async fn angebot_starten(&mut self, peer: &PeerId, aktionen: &mut Vec<MeshAktion>) {
        let mut verbindung = match self
            .backend
            .verbindung_erstellen(peer, &self.ice_server, self.ereignis_tx.clone())
            .await
        {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(peer_id = %peer, fehler = %e, "Verbindung konnte nicht erstellt werden");
                return;
            }
        };
        let sdp = match verbindung.angebot_erstellen().await {
            Ok(sdp) => sdp,
            Err(e) => {
                tracing::warn!(peer_id = %peer, fehler = %e, "Angebot fehlgeschlagen");
                self.im_hintergrund_schliessen(verbindung);
                return;
            }
        };

        tracing::debug!(peer_id = %peer, "Angebot gesendet");
        self.eintraege.insert(
            peer.clone(),
            PeerEintrag {
                phase: PeerPhase::Angebot,
                verbindung,
                remote_gesetzt: false,
                ice_puffer: self.vorpuffer.remove(peer).unwrap_or_default(),
                handshake_frist: Some(Instant::now() + self.handshake_timeout),
            },
        );
        aktionen.push(MeshAktion::Senden(ClientMessage::Offer(SdpSignal {
            to: peer.clone(),
            sdp,
        })));
    }

    // -----------------------------------------------------------------------
    // Signale
    // -----------------------------------------------------------------------

    pub async fn angebot_empfangen(&mut self, von: PeerId, sdp: String) -> Vec<MeshAktion> {
        let mut aktionen = Vec::new();

        if self.aufgegeben.contains(&von) {
            tracing::debug!(peer_id = %von, "Angebot von aufgegebenem Peer ignoriert");
            return aktionen;
        }

        match self.eintraege.get(&von).map(|e| e.phase) {
            Some(PeerPhase::Angebot) if self.ist_initiator(&von) => {
                // Glare: der Initiator behaelt sein eigenes Angebot
                tracing::debug!(peer_id = %von, "Glare, eigenes Angebot bleibt");
                return aktionen;
            }
            Some(PeerPhase::Angebot) => {
                tracing::debug!(peer_id = %von, "Glare, eigenes Angebot verworfen");
                if let Some(alt) = self.eintraege.remove(&von) {
                    self.im_hintergrund_schliessen(alt.verbindung);
                }
            }
            Some(_) => {
                // Neuverhandlung auf bestehender Verbindung
                if let Some(eintrag) = self.eintraege.get_mut(&von) {
                    match eintrag.verbindung.angebot_anwenden(&sdp).await {
                        Ok(antwort) => aktionen.push(MeshAktion::Senden(ClientMessage::Answer(
                            SdpSignal {
                                to: von.clone(),
                                sdp: antwort,
                            },
                        ))),
                        Err(e) => {
                            tracing::warn!(peer_id = %von, fehler = %e, "Neuverhandlung fehlgeschlagen")
                        }
                    }
                }
                return aktionen;
            }
            None => {}
        }

        if self.eintraege.len() >= self.max_peers {
            tracing::info!(peer_id = %von, max = self.max_peers, "Mesh voll, Angebot ignoriert");
            return aktionen;
        }

        let mut verbindung = match self
            .backend
            .verbindung_erstellen(&von, &self.ice_server, self.ereignis_tx.clone())
            .await
        {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(peer_id = %von, fehler = %e, "Verbindung konnte nicht erstellt werden");
                return aktionen;
            }
        };
        let antwort = match verbindung.angebot_anwenden(&sdp).await {
            Ok(a) => a,
            Err(e) => {
                tracing::warn!(peer_id = %von, fehler = %e, "Angebot nicht anwendbar");
                self.im_hintergrund_schliessen(verbindung);
                return self.handshake_fehlgeschlagen(&von).await;
            }
        };

        let mut eintrag = PeerEintrag {
            phase: PeerPhase::Antwort,
            verbindung,
            remote_gesetzt: true,
            ice_puffer: self.vorpuffer.remove(&von).unwrap_or_default(),
            handshake_frist: Some(Instant::now() + self.handshake_timeout),
        };
        Self::puffer_anwenden(&von, &mut eintrag).await;
        self.eintraege.insert(von.clone(), eintrag);

        tracing::debug!(peer_id = %von, "Antwort gesendet");
        aktionen.push(MeshAktion::Senden(ClientMessage::Answer(SdpSignal {
            to: von,
            sdp: antwort,
        })));
        aktionen
    }

    pub async fn antwort_empfangen(&mut self, von: PeerId, sdp: String) -> Vec<MeshAktion> {
        let Some(eintrag) = self.eintraege.get_mut(&von) else {
            tracing::debug!(peer_id = %von, "Antwort ohne Eintrag ignoriert");
            return Vec::new();
        };
        if eintrag.phase != PeerPhase::Angebot || eintrag.remote_gesetzt {
            tracing::debug!(peer_id = %von, "Unerwartete Antwort ignoriert");
            return Vec::new();
        }
        if let Err(e) = eintrag.verbindung.antwort_anwenden(&sdp).await {
            tracing::warn!(peer_id = %von, fehler = %e, "Antwort nicht anwendbar");
            return self.handshake_fehlgeschlagen(&von).await;
        }
        eintrag.remote_gesetzt = true;
        Self::puffer_anwenden(&von, eintrag).await;
        Vec::new()
    }

    pub async fn kandidat_empfangen(&mut self, von: PeerId, kandidat: serde_json::Value) {
        match self.eintraege.get_mut(&von) {
            Some(eintrag) if eintrag.remote_gesetzt => {
                if let Err(e) = eintrag.verbindung.kandidat_hinzufuegen(kandidat).await {
                    tracing::debug!(peer_id = %von, fehler = %e, "Kandidat abgelehnt");
                }
            }
            Some(eintrag) => eintrag.ice_puffer.push(kandidat),
            None => {
                if self.aufgegeben.contains(&von) {
                    return;
                }
                let puffer = self.vorpuffer.entry(von.clone()).or_default();
                if puffer.len() >= self.vorpuffer_max {
                    tracing::debug!(peer_id = %von, "Vorpuffer voll, Kandidat verworfen");
                    return;
                }
                puffer.push(kandidat);
            }
        }
    }

    async fn puffer_anwenden(peer: &PeerId, eintrag: &mut PeerEintrag) {
        for kandidat in std::mem::take(&mut eintrag.ice_puffer) {
            if let Err(e) = eintrag.verbindung.kandidat_hinzufuegen(kandidat).await {
                tracing::debug!(peer_id = %peer, fehler = %e, "Gepufferter Kandidat abgelehnt");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Medienereignisse
    // -----------------------------------------------------------------------

    pub async fn medien_ereignis(&mut self, ereignis: MedienEreignis) -> Vec<MeshAktion> {
        match ereignis {
            MedienEreignis::Verbunden(peer) => {
                let Some(eintrag) = self.eintraege.get_mut(&peer) else {
                    return Vec::new();
                };
                if eintrag.phase == PeerPhase::Verbunden {
                    return Vec::new();
                }
                eintrag.phase = PeerPhase::Verbunden;
                eintrag.handshake_frist = None;
                self.fehlschlaege.remove(&peer);
                tracing::info!(peer_id = %peer, "Peer verbunden");
                vec![
                    MeshAktion::KnotenAnlegen(peer.clone()),
                    MeshAktion::PeerVerbunden(peer),
                ]
            }
            MedienEreignis::Fehlgeschlagen { peer, grund } => {
                if !self.eintraege.contains_key(&peer) {
                    return Vec::new();
                }
                tracing::warn!(peer_id = %peer, grund = %grund, "Medienverbindung fehlgeschlagen");
                self.handshake_fehlgeschlagen(&peer).await
            }
            MedienEreignis::LokalerKandidat { peer, kandidat } => {
                if !self.eintraege.contains_key(&peer) {
                    return Vec::new();
                }
                vec![MeshAktion::Senden(ClientMessage::IceCandidate(IceSignal {
                    to: peer,
                    candidate: kandidat,
                }))]
            }
        }
    }

    /// Baut die Verbindung ab; der Initiator versucht es genau einmal neu
    async fn handshake_fehlgeschlagen(&mut self, peer: &PeerId) -> Vec<MeshAktion> {
        let mut aktionen = self.eintrag_schliessen(peer);

        let anzahl = self.fehlschlaege.entry(peer.clone()).or_insert(0);
        *anzahl += 1;
        if *anzahl >= 2 {
            tracing::warn!(peer_id = %peer, "Handshake erneut fehlgeschlagen, Peer aufgegeben");
            self.aufgegeben.insert(peer.clone());
            self.vorpuffer.remove(peer);
            aktionen.push(MeshAktion::Aufgegeben(peer.clone()));
            return aktionen;
        }

        if self.ist_initiator(peer)
            && self.hoerbar.contains(peer)
            && self.eintraege.len() < self.max_peers
        {
            tracing::info!(peer_id = %peer, "Handshake wird wiederholt");
            self.angebot_starten(peer, &mut aktionen).await;
        }
        aktionen
    }

    // -----------------------------------------------------------------------
    // Abbau
    // -----------------------------------------------------------------------

    /// Peer hat die Zone verlassen
    pub fn peer_verlassen(&mut self, peer: &PeerId) -> Vec<MeshAktion> {
        self.hoerbar.remove(peer);
        self.vorpuffer.remove(peer);
        self.fehlschlaege.remove(peer);
        self.aufgegeben.remove(peer);
        self.eintrag_schliessen(peer)
    }

    /// Der Dienst meldet einen Peer als nicht erreichbar
    pub fn nicht_verfuegbar(&mut self, peer: &PeerId, grund: UnavailableReason) -> Vec<MeshAktion> {
        tracing::info!(peer_id = %peer, grund = ?grund, "Peer nicht verfuegbar");
        self.vorpuffer.remove(peer);
        self.eintrag_schliessen(peer)
    }

    /// Prueft Hysterese- und Handshake-Fristen
    pub async fn tick(&mut self) -> Vec<MeshAktion> {
        let jetzt = Instant::now();
        let mut aktionen = Vec::new();

        let abgelaufen: Vec<PeerId> = self
            .stumm_seit
            .iter()
            .filter(|(_, seit)| jetzt.duration_since(**seit) >= self.hysterese)
            .map(|(p, _)| p.clone())
            .collect();
        for peer in abgelaufen {
            tracing::debug!(peer_id = %peer, "Hysterese abgelaufen, Verbindung wird geschlossen");
            aktionen.extend(self.eintrag_schliessen(&peer));
        }

        let zu_langsam: Vec<PeerId> = self
            .eintraege
            .iter()
            .filter(|(_, e)| e.handshake_frist.is_some_and(|f| jetzt >= f))
            .map(|(p, _)| p.clone())
            .collect();
        for peer in zu_langsam {
            tracing::warn!(peer_id = %peer, "Handshake-Zeitlimit ueberschritten");
            aktionen.extend(self.handshake_fehlgeschlagen(&peer).await);
        }
        aktionen
    }

    /// Schliesst alle Verbindungen (Zone verlassen, Beenden)
    pub fn alle_schliessen(&mut self) -> Vec<MeshAktion> {
        let peers: Vec<PeerId> = self.eintraege.keys().cloned().collect();
        let mut aktionen = Vec::new();
        for peer in peers {
            aktionen.extend(self.eintrag_schliessen(&peer));
        }
        self.lokal = None;
        self.hoerbar.clear();
        self.vorpuffer.clear();
        self.stumm_seit.clear();
        self.fehlschlaege.clear();
        self.aufgegeben.clear();
        aktionen
    }

    fn eintrag_schliessen(&mut self, peer: &PeerId) -> Vec<MeshAktion> {
        self.stumm_seit.remove(peer);
        let Some(eintrag) = self.eintraege.remove(peer) else {
            return Vec::new();
        };
        let war_verbunden = eintrag.phase == PeerPhase::Verbunden;
        self.im_hintergrund_schliessen(eintrag.verbindung);

        let mut aktionen = vec![MeshAktion::KnotenEntfernen(peer.clone())];
        if war_verbunden {
            aktionen.push(MeshAktion::PeerGetrennt(peer.clone()));
        }
        aktionen
    }

    /// Schliessen ohne Warten, begrenzt durch `close_timeout`
    fn im_hintergrund_schliessen(&self, mut verbindung: Box<dyn PeerVerbindung>) {
        let timeout = self.close_timeout;
        tokio::spawn(async move {
            if tokio::time::timeout(timeout, verbindung.schliessen())
                .await
                .is_err()
            {
                tracing::debug!("Schliessen der Verbindung ueberschritt das Zeitlimit");
            }
        });
    }
}
