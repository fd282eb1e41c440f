//! Abbildung von simulierter Distanz auf Lautstaerke
//!
//! Dienst (Hoerbarkeits-Saetze) und Client (Mixer) rechnen mit denselben
//! Funktionen, damit beide Seiten dieselbe Lautstaerke annehmen.

/// Standard-Radius, jenseits dessen ein Peer nicht mehr hoerbar ist (Meter)
pub const STANDARD_CULL_DISTANZ: f64 = 10.0;

/// Bis zu dieser Distanz gilt volle Lautstaerke (Meter)
pub const REFERENZ_DISTANZ: f64 = 1.0;

/// Untergrenze der Lautstaerke innerhalb des Radius
pub const MIN_LAUTSTAERKE: f64 = 0.1;

/// Lineare Lautstaerke fuer eine Distanz
///
/// - `1.0` bis einschliesslich 1 m
/// - `max(0.1, 1 − d/cull)` bis einschliesslich `cull`
/// - `0.0` darueber hinaus
pub fn distanz_lautstaerke(distanz: f64, cull_distanz: f64) -> f64 {
    if !distanz.is_finite() || distanz > cull_distanz {
        return 0.0;
    }
    if distanz <= REFERENZ_DISTANZ {
        return 1.0;
    }
    (1.0 - distanz / cull_distanz).max(MIN_LAUTSTAERKE)
}

/// Wahrnehmungskurve: Gain = v²
pub fn lautstaerke_zu_gain(lautstaerke: f64) -> f64 {
    let v = lautstaerke.clamp(0.0, 1.0);
    v * v
}

/// Rundet auf zwei Nachkommastellen (Wire-Format der Hoerbarkeits-Saetze)
pub fn runden_2(wert: f64) -> f64 {
    (wert * 100.0).round() / 100.0
}
