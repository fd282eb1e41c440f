//! Stummschaltung und Push-to-Talk
//!
//! Im Push-to-Talk-Modus ist das Mikrofon zunaechst stumm; Druecken
//! der Taste hebt die Stummschaltung auf, Loslassen setzt sie wieder.

/// Zustand von Stummschaltung und Push-to-Talk
#[derive(Debug, Clone, Default)]
pub struct SprechSteuerung {
    stumm: bool,
    push_to_talk: bool,
    taste_gedrueckt: bool,
}

impl SprechSteuerung {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Setzt die Stummschaltung. Gibt `true` zurueck wenn sie sich geaendert hat
    pub fn stumm_setzen(&mut self, stumm: bool) -> bool {
        let geaendert = self.stumm != stumm;
        self.stumm = stumm;
        geaendert
    }

    /// Schaltet um und gibt den neuen Zustand zurueck
    pub fn stumm_umschalten(&mut self) -> bool {
        self.stumm = !self.stumm;
        self.stumm
    }

    /// Push-to-Talk ein/aus. Einschalten schaltet stumm
    pub fn push_to_talk_setzen(&mut self, aktiv: bool) -> bool {
        self.push_to_talk = aktiv;
        self.taste_gedrueckt = false;
        if aktiv {
            return self.stumm_setzen(true);
        }
        false
    }

    /// Taste gedrueckt/losgelassen. Ohne Push-to-Talk ohne Wirkung
    pub fn taste(&mut self, gedrueckt: bool) -> bool {
        if !self.push_to_talk {
            return false;
        }
        self.taste_gedrueckt = gedrueckt;
        self.stumm_setzen(!gedrueckt)
    }

    pub fn ist_stumm(&self) -> bool {
        self.stumm
    }

    pub fn push_to_talk(&self) -> bool {
        self.push_to_talk
    }

    /// Mikrofon soll Audio liefern
    pub fn mikrofon_aktiv(&self) -> bool {
        !self.stumm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_offen() {
        let s = SprechSteuerung::neu();
        assert!(!s.ist_stumm());
        assert!(s.mikrofon_aktiv());
    }

    #[test]
    fn umschalten_wechselt_zustand() {
        let mut s = SprechSteuerung::neu();
        assert!(s.stumm_umschalten());
        assert!(!s.mikrofon_aktiv());
        assert!(!s.stumm_umschalten());
    }

    #[test]
    fn stumm_setzen_meldet_aenderung() {
        let mut s = SprechSteuerung::neu();
        assert!(s.stumm_setzen(true));
        assert!(!s.stumm_setzen(true));
    }

    #[test]
    fn push_to_talk_startet_stumm() {
        let mut s = SprechSteuerung::neu();
        assert!(s.push_to_talk_setzen(true));
        assert!(s.ist_stumm());

        assert!(s.taste(true));
        assert!(s.mikrofon_aktiv());
        assert!(s.taste(false));
        assert!(s.ist_stumm());
    }

    #[test]
    fn taste_ohne_push_to_talk_wirkungslos() {
        let mut s = SprechSteuerung::neu();
        s.stumm_setzen(true);
        assert!(!s.taste(true));
        assert!(s.ist_stumm());
    }

    #[test]
    fn push_to_talk_aus_behaelt_zustand() {
        let mut s = SprechSteuerung::neu();
        s.push_to_talk_setzen(true);
        s.taste(true);
        s.push_to_talk_setzen(false);
        assert!(!s.ist_stumm());
        assert!(!s.taste(false));
    }
}
