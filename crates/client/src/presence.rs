//! Drosselung von Positions- und Sprachzustands-Updates, Tipp-Entpreller

use std::time::Duration;
use tokio::time::Instant;

/// Hoechstens ein Wert pro Intervall, der letzte Wert kommt immer an
///
/// Ein Wert innerhalb des Fensters wird zurueckgehalten und am Ende des
/// Fensters gesendet (nachlaufende Flanke). Neuere Werte ersetzen den
/// zurueckgehaltenen.
#[derive(Debug)]
pub struct Drossel<T> {
    intervall: Duration,
    letzter_versand: Option<Instant>,
    ausstehend: Option<T>,
}

impl<T> Drossel<T> {
    pub fn neu(intervall: Duration) -> Self {
        Self {
            intervall,
            letzter_versand: None,
            ausstehend: None,
        }
    }

    /// Bietet einen Wert an. `Some` heisst: sofort senden
    pub fn anbieten(&mut self, wert: T, jetzt: Instant) -> Option<T> {
        match self.letzter_versand {
            Some(zuletzt) if jetzt < zuletzt + self.intervall => {
                self.ausstehend = Some(wert);
                None
            }
            _ => {
                self.letzter_versand = Some(jetzt);
                self.ausstehend = None;
                Some(wert)
            }
        }
    }

    /// Liefert den zurueckgehaltenen Wert, sobald das Fenster vorbei ist
    pub fn faellig(&mut self, jetzt: Instant) -> Option<T> {
        let frist = self.naechste_frist()?;
        if jetzt < frist {
            return None;
        }
        self.letzter_versand = Some(jetzt);
        self.ausstehend.take()
    }

    /// Zeitpunkt, zu dem ein zurueckgehaltener Wert gesendet wird
    pub fn naechste_frist(&self) -> Option<Instant> {
        self.ausstehend.as_ref()?;
        Some(self.letzter_versand.map_or_else(Instant::now, |z| z + self.intervall))
    }

    pub fn zuruecksetzen(&mut self) {
        self.letzter_versand = None;
        self.ausstehend = None;
    }
}

/// Sendet nur Aenderungen des Tipp-Zustands; aktiv faellt nach Timeout ab
#[derive(Debug)]
pub struct TippEntpreller {
    timeout: Duration,
    tippt: bool,
    frist: Option<Instant>,
}

impl TippEntpreller {
    pub fn neu(timeout: Duration) -> Self {
        Self {
            timeout,
            tippt: false,
            frist: None,
        }
    }

    /// `Some(zustand)` wenn der neue Zustand gesendet werden muss
    pub fn setzen(&mut self, tippt: bool, jetzt: Instant) -> Option<bool> {
        if tippt {
            self.frist = Some(jetzt + self.timeout);
        } else {
            self.frist = None;
        }
        if tippt == self.tippt {
            return None;
        }
        self.tippt = tippt;
        Some(tippt)
    }

    /// Setzt ein abgelaufenes "tippt" zurueck (`Some(false)` senden)
    pub fn faellig(&mut self, jetzt: Instant) -> Option<bool> {
        match self.frist {
            Some(frist) if jetzt >= frist => {
                self.frist = None;
                self.tippt = false;
                Some(false)
            }
            _ => None,
        }
    }

    pub fn tippt(&self) -> bool {
        self.tippt
    }

    pub fn zuruecksetzen(&mut self) {
        self.tippt = false;
        self.frist = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn erster_wert_sofort() {
        let t0 = Instant::now();
        let mut d = Drossel::neu(100 * MS);
        assert_eq!(d.anbieten(1, t0), Some(1));
        assert!(d.naechste_frist().is_none());
    }

    #[test]
    fn letzter_wert_kommt_nach_dem_fenster() {
        let t0 = Instant::now();
        let mut d = Drossel::neu(100 * MS);
        assert_eq!(d.anbieten(1, t0), Some(1));
        assert_eq!(d.anbieten(2, t0 + 10 * MS), None);
        assert_eq!(d.anbieten(3, t0 + 50 * MS), None);

        assert_eq!(d.naechste_frist(), Some(t0 + 100 * MS));
        assert_eq!(d.faellig(t0 + 99 * MS), None);
        assert_eq!(d.faellig(t0 + 100 * MS), Some(3));
        assert_eq!(d.faellig(t0 + 300 * MS), None);
    }

    #[test]
    fn hoechstens_einer_pro_intervall() {
        let t0 = Instant::now();
        let mut d = Drossel::neu(100 * MS);
        let mut gesendet = Vec::new();
        for i in 0..50u32 {
            let jetzt = t0 + i * 10 * MS;
            if let Some(w) = d.anbieten(i, jetzt) {
                gesendet.push((jetzt, w));
            }
            if let Some(w) = d.faellig(jetzt) {
                gesendet.push((jetzt, w));
            }
        }
        if let Some(w) = d.faellig(t0 + 1000 * MS) {
            gesendet.push((t0 + 1000 * MS, w));
        }
        for paar in gesendet.windows(2) {
            assert!(paar[1].0 - paar[0].0 >= 100 * MS);
        }
        assert_eq!(gesendet.last().map(|(_, w)| *w), Some(49));
    }

    #[test]
    fn tippen_nur_aenderungen() {
        let t0 = Instant::now();
        let mut t = TippEntpreller::neu(3000 * MS);
        assert_eq!(t.setzen(true, t0), Some(true));
        assert_eq!(t.setzen(true, t0 + 500 * MS), None);
        assert_eq!(t.setzen(false, t0 + 600 * MS), Some(false));
        assert_eq!(t.setzen(false, t0 + 700 * MS), None);
    }

    #[test]
    fn tippen_faellt_automatisch_ab() {
        let t0 = Instant::now();
        let mut t = TippEntpreller::neu(3000 * MS);
        t.setzen(true, t0);
        // Erneutes Tippen verlaengert die Frist
        t.setzen(true, t0 + 2000 * MS);
        assert_eq!(t.faellig(t0 + 3000 * MS), None);
        assert_eq!(t.faellig(t0 + 5000 * MS), Some(false));
        assert!(!t.tippt());
        assert_eq!(t.faellig(t0 + 9000 * MS), None);
    }
}
