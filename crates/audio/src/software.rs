//! Software-Renderer fuer den Audio-Graphen
//!
//! Mischt die Sample-Puffer aller Peers zu einem Stereo-Signal
//! (interleaved L/R). Pro Peer: inverses Distanzmodell, Equal-Power-
//! Panning nach Azimut und exponentiell geglaetteter Gain. Der Hoerer
//! blickt entlang −z, +x ist rechts.

use raumfunk_core::types::{PeerId, Position};
use std::collections::{HashMap, VecDeque};
use std::f64::consts::FRAC_PI_4;
use std::time::Duration;

use crate::error::{AudioError, AudioResult};
use crate::graph::{AudioGraph, PannerParameter};

/// Maximale Puffergroesse pro Peer (eine Sekunde bei 48 kHz)
const MAX_PUFFER: usize = 48_000;

#[derive(Debug)]
struct Knoten {
    panner: PannerParameter,
    relativ: Position,
    aktueller_gain: f64,
    ziel_gain: f64,
    zeitkonstante: Duration,
    puffer: VecDeque<f32>,
}

impl Knoten {
    fn neu(panner: PannerParameter) -> Self {
        Self {
            panner,
            relativ: Position::URSPRUNG,
            aktueller_gain: 0.0,
            ziel_gain: 0.0,
            zeitkonstante: Duration::ZERO,
            puffer: VecDeque::new(),
        }
    }

    /// Linker und rechter Kanalfaktor (cos/sin, l² + r² = 1)
    fn kanalfaktoren(&self) -> (f64, f64) {
        let r = self.relativ;
        let azimut = r.x.atan2(-r.z);
        let pan = if r.x == 0.0 && r.z == 0.0 { 0.0 } else { azimut.sin() };
        let winkel = (pan + 1.0) * FRAC_PI_4;
        (winkel.cos(), winkel.sin())
    }
}

/// Software-Implementierung von [`AudioGraph`]
#[derive(Debug)]
pub struct SoftwareGraph {
    abtastrate: u32,
    knoten: HashMap<PeerId, Knoten>,
    ausgesetzt: bool,
}

impl SoftwareGraph {
    pub fn neu(abtastrate: u32) -> Self {
        Self {
            abtastrate: abtastrate.max(1),
            knoten: HashMap::new(),
            ausgesetzt: false,
        }
    }

    /// Haengt Mono-Samples an den Puffer eines Peers an
    ///
    /// Zu alte Samples werden verworfen, wenn der Puffer ueberlaeuft.
    pub fn samples_einspeisen(&mut self, peer: &PeerId, samples: &[f32]) -> AudioResult<()> {
        let knoten = self
            .knoten
            .get_mut(peer)
            .ok_or_else(|| AudioError::Graph(format!("kein Knoten fuer {peer}")))?;
        knoten.puffer.extend(samples.iter().copied());
        let ueberschuss = knoten.puffer.len().saturating_sub(MAX_PUFFER);
        knoten.puffer.drain(..ueberschuss);
        Ok(())
    }

    /// Aktueller (geglaetteter) Gain eines Peers
    pub fn gain(&self, peer: &PeerId) -> Option<f64> {
        self.knoten.get(peer).map(|k| k.aktueller_gain)
    }

    /// Zielwert des laufenden Gain-Uebergangs
    pub fn ziel_gain(&self, peer: &PeerId) -> Option<f64> {
        self.knoten.get(peer).map(|k| k.ziel_gain)
    }

    pub fn ist_ausgesetzt(&self) -> bool {
        self.ausgesetzt
    }

    pub fn knoten_anzahl(&self) -> usize {
        self.knoten.len()
    }

    /// Rendert `frames` Stereo-Frames (Laenge `2 * frames`, interleaved)
    pub fn mischen(&mut self, frames: usize) -> Vec<f32> {
        let mut ausgabe = vec![0.0f32; frames * 2];
        if self.ausgesetzt {
            return ausgabe;
        }

        let abtastrate = self.abtastrate as f64;
        for knoten in self.knoten.values_mut() {
            let distanz = knoten.relativ.distanz(&Position::URSPRUNG);
            let daempfung = knoten.panner.daempfung(distanz);
            let (links, rechts) = knoten.kanalfaktoren();
            let alpha = glaettungsfaktor(knoten.zeitkonstante, abtastrate);

            for frame in ausgabe.chunks_exact_mut(2) {
                knoten.aktueller_gain += alpha * (knoten.ziel_gain - knoten.aktueller_gain);
                let sample = knoten.puffer.pop_front().unwrap_or(0.0) as f64;
                let wert = sample * knoten.aktueller_gain * daempfung;
                frame[0] += (wert * links) as f32;
                frame[1] += (wert * rechts) as f32;
            }
        }

        // Sanftes Clipping bei vielen gleichzeitigen Sprechern
        for s in ausgabe.iter_mut() {
            *s = s.tanh();
        }
        ausgabe
    }
}

/// Anteil, um den sich der Gain pro Sample dem Ziel naehert
fn glaettungsfaktor(zeitkonstante: Duration, abtastrate: f64) -> f64 {
    let tau = zeitkonstante.as_secs_f64();
    if tau <= 0.0 {
        return 1.0;
    }
    1.0 - (-1.0 / (tau * abtastrate)).exp()
}

impl AudioGraph for SoftwareGraph {
    fn knoten_anlegen(&mut self, peer: &PeerId, panner: PannerParameter) -> AudioResult<()> {
        if self.knoten.contains_key(peer) {
            return Err(AudioError::KnotenExistiert(peer.clone()));
        }
        self.knoten.insert(peer.clone(), Knoten::neu(panner));
        tracing::debug!(peer_id = %peer, "Audio-Knoten angelegt");
        Ok(())
    }

    fn knoten_entfernen(&mut self, peer: &PeerId) {
        if self.knoten.remove(peer).is_some() {
            tracing::debug!(peer_id = %peer, "Audio-Knoten getrennt");
        }
    }

    fn hat_knoten(&self, peer: &PeerId) -> bool {
        self.knoten.contains_key(peer)
    }

    fn panner_setzen(&mut self, peer: &PeerId, relativ: Position) {
        if let Some(k) = self.knoten.get_mut(peer) {
            k.relativ = relativ;
        }
    }

    fn panner_parameter_setzen(&mut self, peer: &PeerId, panner: PannerParameter) {
        if let Some(k) = self.knoten.get_mut(peer) {
            k.panner = panner;
        }
    }

    fn gain_planen(&mut self, peer: &PeerId, ziel: f64, zeitkonstante: Duration) {
        if let Some(k) = self.knoten.get_mut(peer) {
            k.ziel_gain = ziel.clamp(0.0, 1.0);
            k.zeitkonstante = zeitkonstante;
        }
    }

    fn aussetzen(&mut self) {
        self.ausgesetzt = true;
    }

    fn fortsetzen(&mut self) {
        self.ausgesetzt = false;
    }
}
