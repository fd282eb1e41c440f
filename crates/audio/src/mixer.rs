//! Raeumlicher Mixer
//!
//! Haelt die lokale Position, die Positionen aller entfernten Peers und
//! deren Cull-Zustand und leitet daraus Panner und Gain jedes Knotens ab.
//! Gain = v² mit v aus [`raumfunk_core::spatial::distanz_lautstaerke`],
//! geplant mit einer Zeitkonstante von 0.1 s. Gecullte Peers und ein
//! ausgesetzter Mixer haben Gain 0.

use raumfunk_core::spatial::{distanz_lautstaerke, lautstaerke_zu_gain};
use raumfunk_core::types::{PeerId, Position};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::error::AudioResult;
use crate::graph::{AudioGraph, PannerParameter};

/// Zeitkonstante fuer Gain-Uebergaenge
pub const GAIN_ZEITKONSTANTE: Duration = Duration::from_millis(100);

/// Erlaubter Bereich fuer den Hoer-Radius (Meter)
pub const MIN_RADIUS: f64 = 1.0;
pub const MAX_RADIUS: f64 = 50.0;

/// Raeumlicher Mixer ueber einem [`AudioGraph`]
pub struct SpatialMixer<G: AudioGraph> {
    graph: G,
    radius: f64,
    lokal: Position,
    positionen: HashMap<PeerId, Position>,
    gecullt: HashSet<PeerId>,
    ausgesetzt: bool,
    /// Zuletzt geplanter Gain pro Knoten
    gains: HashMap<PeerId, f64>,
}

impl<G: AudioGraph> SpatialMixer<G> {
    pub fn neu(graph: G, radius: f64) -> Self {
        Self {
            graph,
            radius: radius.clamp(MIN_RADIUS, MAX_RADIUS),
            lokal: Position::URSPRUNG,
            positionen: HashMap::new(),
            gecullt: HashSet::new(),
            ausgesetzt: false,
            gains: HashMap::new(),
        }
    }

    pub fn graph(&self) -> &G {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut G {
        &mut self.graph
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn ist_ausgesetzt(&self) -> bool {
        self.ausgesetzt
    }

    /// Zuletzt geplanter Gain eines Peers (`None` ohne Knoten)
    pub fn gain(&self, peer: &PeerId) -> Option<f64> {
        self.gains.get(peer).copied()
    }

    /// Legt den Knoten an, sobald Medien eines Peers eintreffen
    pub fn peer_hinzufuegen(&mut self, peer: &PeerId) -> AudioResult<()> {
        self.graph
            .knoten_anlegen(peer, PannerParameter::fuer_radius(self.radius))?;
        self.peer_aktualisieren(peer);
        Ok(())
    }

    /// Trennt und verwirft den Knoten eines Peers
    ///
    /// Gespeicherte Position und Cull-Zustand bleiben erhalten, solange der
    /// Peer in der Zone ist (siehe [`SpatialMixer::peer_vergessen`]).
    pub fn peer_entfernen(&mut self, peer: &PeerId) {
        self.graph.knoten_entfernen(peer);
        self.gains.remove(peer);
    }

    /// Entfernt alles, was ueber einen Peer bekannt ist
    pub fn peer_vergessen(&mut self, peer: &PeerId) {
        self.peer_entfernen(peer);
        self.positionen.remove(peer);
        self.gecullt.remove(peer);
    }

    /// Entfernt alle Knoten und Zustaende (Zone verlassen)
    pub fn leeren(&mut self) {
        let peers: Vec<PeerId> = self.gains.keys().cloned().collect();
        for peer in peers {
            self.graph.knoten_entfernen(&peer);
        }
        self.gains.clear();
        self.positionen.clear();
        self.gecullt.clear();
    }

    pub fn lokale_position_setzen(&mut self, position: Position) {
        self.lokal = position;
        self.alle_aktualisieren();
    }

    pub fn lokale_position(&self) -> Position {
        self.lokal
    }

    pub fn remote_position_setzen(&mut self, peer: &PeerId, position: Position) {
        self.positionen.insert(peer.clone(), position);
        self.peer_aktualisieren(peer);
    }

    pub fn remote_position(&self, peer: &PeerId) -> Option<Position> {
        self.positionen.get(peer).copied()
    }

    /// Markiert einen Peer als gecullt (sofort stumm) oder hoerbar
    pub fn cull_setzen(&mut self, peer: &PeerId, gecullt: bool) {
        let geaendert = if gecullt {
            self.gecullt.insert(peer.clone())
        } else {
            self.gecullt.remove(peer)
        };
        if geaendert {
            self.peer_aktualisieren(peer);
        }
    }

    pub fn ist_gecullt(&self, peer: &PeerId) -> bool {
        self.gecullt.contains(peer)
    }

    /// Setzt den Hoer-Radius (auf 1..50 m begrenzt) und berechnet alles neu
    pub fn set_proximity_radius(&mut self, meter: f64) -> f64 {
        let radius = if meter.is_finite() {
            meter.clamp(MIN_RADIUS, MAX_RADIUS)
        } else {
            self.radius
        };
        self.radius = radius;
        let panner = PannerParameter::fuer_radius(radius);
        for peer in self.gains.keys() {
            self.graph.panner_parameter_setzen(peer, panner);
        }
        self.alle_aktualisieren();
        radius
    }

    /// Setzt alle Gains auf 0 und haelt den Graphen an
    pub fn aussetzen(&mut self) {
        self.ausgesetzt = true;
        self.alle_aktualisieren();
        self.graph.aussetzen();
    }

    /// Setzt den Graphen fort und berechnet jeden Gain aus den Positionen neu
    pub fn fortsetzen(&mut self) {
        self.ausgesetzt = false;
        self.graph.fortsetzen();
        self.alle_aktualisieren();
    }

    fn alle_aktualisieren(&mut self) {
        let peers: Vec<PeerId> = self.gains.keys().cloned().collect();
        for peer in &peers {
            self.peer_aktualisieren(peer);
        }
    }

    /// Ziel-Gain eines Peers nach aktuellem Zustand
    fn ziel_gain(&self, peer: &PeerId) -> f64 {
        if self.ausgesetzt || self.gecullt.contains(peer) {
            return 0.0;
        }
        let Some(position) = self.positionen.get(peer) else {
            // Ohne bekannte Position am Hoerer-Ort
            return 1.0;
        };
        lautstaerke_zu_gain(distanz_lautstaerke(self.lokal.distanz(position), self.radius))
    }

    fn peer_aktualisieren(&mut self, peer: &PeerId) {
        if !self.graph.hat_knoten(peer) {
            return;
        }
        let relativ = self
            .positionen
            .get(peer)
            .map(|p| p.relativ_zu(&self.lokal))
            .unwrap_or(Position::URSPRUNG);
        let gain = self.ziel_gain(peer);

        self.graph.panner_setzen(peer, relativ);
        self.graph.gain_planen(peer, gain, GAIN_ZEITKONSTANTE);
        self.gains.insert(peer.clone(), gain);
    }
}
