//! Abstraktion ueber den Audio-Graphen
//!
//! Pro entferntem Peer gibt es einen Knoten:
//! `Quelle -> Panner -> Gain -> Ziel`. Der `SpatialMixer` steuert nur
//! ueber dieses Trait, die Ausgabe selbst liefert eine Implementierung
//! (Software-Renderer, Plattform-Backend, Test-Attrappe).

use raumfunk_core::types::{PeerId, Position};
use std::time::Duration;

use crate::error::AudioResult;

/// Distanzmodell des Panners (inverse distance)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PannerParameter {
    /// Unterhalb dieser Distanz keine Abschwaechung
    pub ref_distanz: f64,
    /// Oberhalb dieser Distanz keine weitere Abschwaechung
    pub max_distanz: f64,
    pub rolloff: f64,
}

impl PannerParameter {
    pub fn fuer_radius(radius: f64) -> Self {
        Self {
            ref_distanz: 1.0,
            max_distanz: radius,
            rolloff: 1.0,
        }
    }

    /// Abschwaechung nach dem inversen Distanzmodell
    pub fn daempfung(&self, distanz: f64) -> f64 {
        let d = distanz.clamp(self.ref_distanz, self.max_distanz.max(self.ref_distanz));
        self.ref_distanz / (self.ref_distanz + self.rolloff * (d - self.ref_distanz))
    }
}

/// Audio-Graph mit einem Knoten pro entferntem Peer
pub trait AudioGraph: Send {
    /// Legt den Knoten fuer einen Peer an und verbindet ihn mit dem Ziel
    fn knoten_anlegen(&mut self, peer: &PeerId, panner: PannerParameter) -> AudioResult<()>;

    /// Trennt den Knoten ausdruecklich vom Ziel und verwirft ihn
    fn knoten_entfernen(&mut self, peer: &PeerId);

    fn hat_knoten(&self, peer: &PeerId) -> bool;

    /// Position der Quelle relativ zum Hoerer
    fn panner_setzen(&mut self, peer: &PeerId, relativ: Position);

    /// Aendert die Panner-Parameter (z.B. neuer Radius)
    fn panner_parameter_setzen(&mut self, peer: &PeerId, panner: PannerParameter);

    /// Plant einen Gain-Uebergang mit der gegebenen Zeitkonstante
    fn gain_planen(&mut self, peer: &PeerId, ziel: f64, zeitkonstante: Duration);

    /// Haelt die gesamte Ausgabe an
    fn aussetzen(&mut self);

    fn fortsetzen(&mut self);
}
