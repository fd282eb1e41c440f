//! Sprachaktivitaet (VAD) als periodischer Task
//!
//! Jeder Takt liest das Analysefenster des Mikrofons:
//! RMS -> dB (`20·log10(rms)`), exponentiell geglaettet mit Faktor 0.8.
//! Sprechen = geglaettete dB > −40. Der normierte Pegel
//! `clamp((dB + 60) / 60, 0, 1)` geht nur an lokale Zuhoerer, ein
//! Wechsel des Sprech-Flags loest beim Aufrufer einen Voice-State aus.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Untergrenze fuer Stille (log10(0) ist −∞)
const STILLE_DB: f64 = -100.0;

/// Konfiguration der Sprachaktivitaet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VadKonfig {
    pub intervall_ms: u64,
    /// Gewicht des bisherigen Werts (0 = keine Glaettung)
    pub glaettung: f64,
    pub schwelle_db: f64,
}

impl Default for VadKonfig {
    fn default() -> Self {
        Self {
            intervall_ms: 16,
            glaettung: 0.8,
            schwelle_db: -40.0,
        }
    }
}

impl VadKonfig {
    pub fn intervall(&self) -> Duration {
        Duration::from_millis(self.intervall_ms.max(1))
    }
}

/// Ergebnis einer Analyse
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadMessung {
    /// Normierter Pegel 0..1
    pub pegel: f64,
    pub spricht: bool,
    /// Sprech-Flag hat sich mit dieser Messung geaendert
    pub geaendert: bool,
}

/// RMS eines Fensters
pub fn rms(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let summe: f64 = samples.iter().map(|s| (*s as f64) * (*s as f64)).sum();
    (summe / samples.len() as f64).sqrt()
}

/// RMS in dBFS, nach unten bei −100 begrenzt
pub fn rms_zu_db(rms: f64) -> f64 {
    if rms <= 0.0 {
        return STILLE_DB;
    }
    (20.0 * rms.log10()).max(STILLE_DB)
}

/// Zustandsbehafteter Detektor (ohne Zeitbezug)
#[derive(Debug, Clone)]
pub struct SprachDetektor {
    konfig: VadKonfig,
    geglaettet_db: f64,
    spricht: bool,
}

impl SprachDetektor {
    pub fn neu(konfig: VadKonfig) -> Self {
        Self {
            konfig,
            geglaettet_db: STILLE_DB,
            spricht: false,
        }
    }

    pub fn analysieren(&mut self, fenster: &[f32]) -> VadMessung {
        let db = rms_zu_db(rms(fenster));
        let a = self.konfig.glaettung.clamp(0.0, 1.0);
        self.geglaettet_db = a * self.geglaettet_db + (1.0 - a) * db;

        let spricht = self.geglaettet_db > self.konfig.schwelle_db;
        let geaendert = spricht != self.spricht;
        self.spricht = spricht;

        VadMessung {
            pegel: ((self.geglaettet_db + 60.0) / 60.0).clamp(0.0, 1.0),
            spricht,
            geaendert,
        }
    }

    pub fn spricht(&self) -> bool {
        self.spricht
    }

    pub fn geglaettet_db(&self) -> f64 {
        self.geglaettet_db
    }

    pub fn zuruecksetzen(&mut self) {
        self.geglaettet_db = STILLE_DB;
        self.spricht = false;
    }
}

/// Liefert das aktuelle Analysefenster des Mikrofons
///
/// `None` wenn das Mikrofon deaktiviert oder nicht verfuegbar ist.
pub trait MikrofonQuelle: Send + 'static {
    fn analysefenster(&mut self) -> Option<Vec<f32>>;
}

impl MikrofonQuelle for Box<dyn MikrofonQuelle> {
    fn analysefenster(&mut self) -> Option<Vec<f32>> {
        (**self).analysefenster()
    }
}

/// Ereignisse des VAD-Tasks
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VadEreignis {
    /// Normierter Pegel (jeder Takt, darf verloren gehen)
    Pegel(f64),
    /// Sprech-Flag hat sich geaendert
    Sprechen(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VadSteuerung {
    Laufen,
    Ausgesetzt,
    Gestoppt,
}

/// Handle auf den laufenden VAD-Task
pub struct VadAufgabe {
    steuerung: watch::Sender<VadSteuerung>,
    handle: JoinHandle<()>,
}

impl VadAufgabe {
    /// Startet den Task. Ereignisse gehen an `ereignisse`
    pub fn starten<Q: MikrofonQuelle>(
        mut quelle: Q,
        konfig: VadKonfig,
        ereignisse: mpsc::Sender<VadEreignis>,
    ) -> Self {
        let (steuerung, mut steuer_rx) = watch::channel(VadSteuerung::Laufen);
        let intervall_dauer = konfig.intervall();

        let handle = tokio::spawn(async move {
            let mut detektor = SprachDetektor::neu(konfig);
            let mut intervall = tokio::time::interval(intervall_dauer);
            intervall.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = intervall.tick() => {
                        if *steuer_rx.borrow() != VadSteuerung::Laufen {
                            continue;
                        }
                        let Some(fenster) = quelle.analysefenster() else {
                            continue;
                        };
                        let messung = detektor.analysieren(&fenster);
                        // Pegel darf bei voller Queue verloren gehen
                        let _ = ereignisse.try_send(VadEreignis::Pegel(messung.pegel));
                        if messung.geaendert
                            && ereignisse.send(VadEreignis::Sprechen(messung.spricht)).await.is_err()
                        {
                            break;
                        }
                    }
                    res = steuer_rx.changed() => {
                        if res.is_err() {
                            break;
                        }
                        let zustand = *steuer_rx.borrow_and_update();
                        match zustand {
                            VadSteuerung::Gestoppt => break,
                            VadSteuerung::Ausgesetzt => {
                                if detektor.spricht() {
                                    let _ = ereignisse.send(VadEreignis::Sprechen(false)).await;
                                }
                                detektor.zuruecksetzen();
                            }
                            VadSteuerung::Laufen => {}
                        }
                    }
                }
            }
            tracing::debug!("VAD-Task beendet");
        });

        Self { steuerung, handle }
    }

    /// Haelt die Analyse an (Sprech-Flag faellt auf `false`)
    pub fn aussetzen(&self) {
        self.steuerung.send_replace(VadSteuerung::Ausgesetzt);
    }

    pub fn fortsetzen(&self) {
        self.steuerung.send_replace(VadSteuerung::Laufen);
    }

    pub fn ist_ausgesetzt(&self) -> bool {
        *self.steuerung.borrow() == VadSteuerung::Ausgesetzt
    }

    /// Stoppt den Task und wartet auf sein Ende
    pub async fn stoppen(self) {
        self.steuerung.send_replace(VadSteuerung::Gestoppt);
        if let Err(e) = self.handle.await {
            tracing::warn!(fehler = %e, "VAD-Task nicht sauber beendet");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct TestMikrofon {
        laut: Arc<AtomicBool>,
    }

    impl MikrofonQuelle for TestMikrofon {
        fn analysefenster(&mut self) -> Option<Vec<f32>> {
            let wert = if self.laut.load(Ordering::Relaxed) { 0.5 } else { 0.0 };
            Some(vec![wert; 256])
        }
    }

    #[test]
    fn db_umrechnung() {
        assert!((rms_zu_db(1.0)).abs() < 1e-9);
        assert!((rms_zu_db(0.1) + 20.0).abs() < 1e-9);
        assert_eq!(rms_zu_db(0.0), STILLE_DB);
        assert!((rms(&[0.5; 16]) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn stille_spricht_nicht() {
        let mut d = SprachDetektor::neu(VadKonfig::default());
        let m = d.analysieren(&[0.0; 256]);
        assert!(!m.spricht);
        assert!(!m.geaendert);
        assert_eq!(m.pegel, 0.0);
    }

    #[test]
    fn glaettung_verzoegert_einsatz() {
        let mut d = SprachDetektor::neu(VadKonfig::default());
        let laut = [0.5f32; 256];
        // -6 dB Ziel, Start bei -100: erst nach dem fuenften Fenster > -40
        for _ in 0..4 {
            assert!(!d.analysieren(&laut).spricht);
        }
        let m = d.analysieren(&laut);
        assert!(m.spricht);
        assert!(m.geaendert);
        assert!(m.pegel > 0.3);
    }

    #[test]
    fn ohne_glaettung_sofort() {
        let mut d = SprachDetektor::neu(VadKonfig {
            glaettung: 0.0,
            ..VadKonfig::default()
        });
        let m = d.analysieren(&[0.5; 256]);
        assert!(m.spricht);
        assert!((m.pegel - (rms_zu_db(0.5) + 60.0) / 60.0).abs() < 1e-9);
    }

    async fn naechstes_sprechen(rx: &mut mpsc::Receiver<VadEreignis>) -> bool {
        loop {
            match rx.recv().await {
                Some(VadEreignis::Sprechen(s)) => return s,
                Some(VadEreignis::Pegel(_)) => continue,
                None => panic!("VAD-Task beendet"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn task_meldet_sprechen_und_aussetzen() {
        let laut = Arc::new(AtomicBool::new(true));
        let (tx, mut rx) = mpsc::channel(64);
        let vad = VadAufgabe::starten(
            TestMikrofon {
                laut: Arc::clone(&laut),
            },
            VadKonfig::default(),
            tx,
        );

        assert!(naechstes_sprechen(&mut rx).await);

        vad.aussetzen();
        assert!(vad.ist_ausgesetzt());
        assert!(!naechstes_sprechen(&mut rx).await);

        vad.fortsetzen();
        assert!(naechstes_sprechen(&mut rx).await);

        laut.store(false, Ordering::Relaxed);
        assert!(!naechstes_sprechen(&mut rx).await);

        vad.stoppen().await;
    }

    #[tokio::test(start_paused = true)]
    async fn ausgesetzt_keine_pegel() {
        let (tx, mut rx) = mpsc::channel(64);
        let vad = VadAufgabe::starten(
            TestMikrofon {
                laut: Arc::new(AtomicBool::new(false)),
            },
            VadKonfig::default(),
            tx,
        );
        vad.aussetzen();
        tokio::time::sleep(Duration::from_millis(50)).await;
        while rx.try_recv().is_ok() {}

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err(), "Ausgesetzt darf keine Pegel liefern");
        vad.stoppen().await;
    }
}
