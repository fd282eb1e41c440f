//! Simuliertes Medien-Backend
//!
//! Verbindungen gelten sofort als verbunden, sobald die entfernte
//! Beschreibung gesetzt ist. Fuer Tests und fuer Clients ohne Audio
//! (z.B. Bots, die nur Chat und Praesenz nutzen).

use async_trait::async_trait;
use parking_lot::Mutex;
use raumfunk_audio::MikrofonQuelle;
use raumfunk_core::types::PeerId;
use raumfunk_protocol::messages::IceServer;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::{ClientError, ClientResult};
use crate::media::{MedienBackend, MedienEreignis, PeerVerbindung};

#[derive(Debug, Default)]
struct Zaehler {
    erstellt: AtomicUsize,
    offen: AtomicUsize,
    geschlossen: AtomicUsize,
}

#[derive(Debug)]
pub struct SimuliertesBackend {
    automatisch_verbinden: AtomicBool,
    mikrofon_verfuegbar: AtomicBool,
    mikrofon_aktiv: Arc<AtomicBool>,
    pegel: Arc<Mutex<f32>>,
    zaehler: Arc<Zaehler>,
    kandidaten: Arc<Mutex<Vec<(PeerId, serde_json::Value)>>>,
    peers: Mutex<Vec<PeerId>>,
}

impl Default for SimuliertesBackend {
    fn default() -> Self {
        Self::neu()
    }
}

impl SimuliertesBackend {
    pub fn neu() -> Self {
        Self {
            automatisch_verbinden: AtomicBool::new(true),
            mikrofon_verfuegbar: AtomicBool::new(true),
            mikrofon_aktiv: Arc::new(AtomicBool::new(true)),
            pegel: Arc::new(Mutex::new(0.0)),
            zaehler: Arc::new(Zaehler::default()),
            kandidaten: Arc::new(Mutex::new(Vec::new())),
            peers: Mutex::new(Vec::new()),
        }
    }

    /// Ohne automatisches Verbinden bleibt jeder Handshake haengen
    pub fn automatisch_verbinden(&self, an: bool) {
        self.automatisch_verbinden.store(an, Ordering::SeqCst);
    }

    pub fn mikrofon_verfuegbar(&self, verfuegbar: bool) {
        self.mikrofon_verfuegbar.store(verfuegbar, Ordering::SeqCst);
    }

    /// Amplitude, die das simulierte Mikrofon liefert
    pub fn pegel_setzen(&self, amplitude: f32) {
        *self.pegel.lock() = amplitude;
    }

    pub fn ist_mikrofon_aktiv(&self) -> bool {
        self.mikrofon_aktiv.load(Ordering::SeqCst)
    }

    pub fn erstellte_verbindungen(&self) -> usize {
        self.zaehler.erstellt.load(Ordering::SeqCst)
    }

    pub fn offene_verbindungen(&self) -> usize {
        self.zaehler.offen.load(Ordering::SeqCst)
    }

    pub fn geschlossene_verbindungen(&self) -> usize {
        self.zaehler.geschlossen.load(Ordering::SeqCst)
    }

    /// Alle Peers, fuer die eine Verbindung erstellt wurde (in Reihenfolge)
    pub fn peers(&self) -> Vec<PeerId> {
        self.peers.lock().clone()
    }

    /// Entfernte Kandidaten, die tatsaechlich angewendet wurden
    pub fn angewendete_kandidaten(&self) -> Vec<(PeerId, serde_json::Value)> {
        self.kandidaten.lock().clone()
    }
}

#[async_trait]
impl MedienBackend for SimuliertesBackend {
    async fn verbindung_erstellen(
        &self,
        peer: &PeerId,
        _ice_server: &[IceServer],
        ereignisse: mpsc::UnboundedSender<MedienEreignis>,
    ) -> ClientResult<Box<dyn PeerVerbindung>> {
        self.zaehler.erstellt.fetch_add(1, Ordering::SeqCst);
        self.zaehler.offen.fetch_add(1, Ordering::SeqCst);
        self.peers.lock().push(peer.clone());
        Ok(Box::new(SimulierteVerbindung {
            peer: peer.clone(),
            ereignisse,
            automatisch: self.automatisch_verbinden.load(Ordering::SeqCst),
            remote_gesetzt: false,
            geschlossen: false,
            zaehler: self.zaehler.clone(),
            kandidaten: self.kandidaten.clone(),
        }))
    }

    fn mikrofon_oeffnen(&self) -> ClientResult<Box<dyn MikrofonQuelle>> {
        if !self.mikrofon_verfuegbar.load(Ordering::SeqCst) {
            return Err(ClientError::Medien("kein Mikrofon verfuegbar".into()));
        }
        Ok(Box::new(SimuliertesMikrofon {
            aktiv: self.mikrofon_aktiv.clone(),
            pegel: self.pegel.clone(),
        }))
    }

    fn mikrofon_aktivieren(&self, aktiv: bool) {
        self.mikrofon_aktiv.store(aktiv, Ordering::SeqCst);
    }
}

struct SimulierteVerbindung {
    peer: PeerId,
    ereignisse: mpsc::UnboundedSender<MedienEreignis>,
    automatisch: bool,
    remote_gesetzt: bool,
    geschlossen: bool,
    zaehler: Arc<Zaehler>,
    kandidaten: Arc<Mutex<Vec<(PeerId, serde_json::Value)>>>,
}

impl SimulierteVerbindung {
    fn remote_setzen(&mut self) {
        self.remote_gesetzt = true;
        if self.automatisch {
            let _ = self
                .ereignisse
                .send(MedienEreignis::Verbunden(self.peer.clone()));
        }
    }
}

#[async_trait]
impl PeerVerbindung for SimulierteVerbindung {
    async fn angebot_erstellen(&mut self) -> ClientResult<String> {
        let _ = self.ereignisse.send(MedienEreignis::LokalerKandidat {
            peer: self.peer.clone(),
            kandidat: json!({ "candidate": "candidate:1 1 udp 1 127.0.0.1 9 typ host" }),
        });
        Ok(format!("v=0 sim-offer {}", self.peer))
    }

    async fn angebot_anwenden(&mut self, _sdp: &str) -> ClientResult<String> {
        self.remote_setzen();
        Ok(format!("v=0 sim-answer {}", self.peer))
    }

    async fn antwort_anwenden(&mut self, _sdp: &str) -> ClientResult<()> {
        self.remote_setzen();
        Ok(())
    }

    async fn kandidat_hinzufuegen(&mut self, kandidat: serde_json::Value) -> ClientResult<()> {
        if !self.remote_gesetzt {
            return Err(ClientError::Medien(
                "Kandidat vor entfernter Beschreibung".into(),
            ));
        }
        self.kandidaten.lock().push((self.peer.clone(), kandidat));
        Ok(())
    }

    async fn schliessen(&mut self) {
        if !self.geschlossen {
            self.geschlossen = true;
            self.zaehler.offen.fetch_sub(1, Ordering::SeqCst);
            self.zaehler.geschlossen.fetch_add(1, Ordering::SeqCst);
        }
    }
}

struct SimuliertesMikrofon {
    aktiv: Arc<AtomicBool>,
    pegel: Arc<Mutex<f32>>,
}

impl MikrofonQuelle for SimuliertesMikrofon {
    fn analysefenster(&mut self) -> Option<Vec<f32>> {
        if !self.aktiv.load(Ordering::SeqCst) {
            return None;
        }
        Some(vec![*self.pegel.lock(); 256])
    }
}
