//! raumfunk-audio – Raeumlicher Audio-Mixer
//!
//! - `AudioGraph`: Knoten pro Peer (Quelle -> Panner -> Gain -> Ziel)
//! - `SoftwareGraph`: Stereo-Renderer ohne Plattform-Audio
//! - `SpatialMixer`: Positionen, Cull und Radius -> Panner und Gain
//! - `VadAufgabe`: Sprachaktivitaet als periodischer Task
//! - `SprechSteuerung`: Stummschaltung und Push-to-Talk

pub mod error;
pub mod graph;
pub mod mixer;
pub mod software;
pub mod sprechsteuerung;
pub mod vad;

pub use error::{AudioError, AudioResult};
pub use graph::{AudioGraph, PannerParameter};
pub use mixer::SpatialMixer;
pub use software::SoftwareGraph;
pub use sprechsteuerung::SprechSteuerung;
pub use vad::{MikrofonQuelle, SprachDetektor, VadAufgabe, VadEreignis, VadKonfig};
