//! Zonen-Register – Mitgliedschaft, Mesh-Plaetze und Verlauf pro Zone
//!
//! Jede Zone liegt hinter einer eigenen `parking_lot::Mutex` in einer
//! `DashMap`. Alle Aenderungen einer Zone und das Einreihen der daraus
//! folgenden Frames geschehen unter dieser Sperre.
//!
//! Sperr-Reihenfolge: Zonen-Sperre niemals nehmen, waehrend ein
//! DashMap-Shard gehalten wird. Das Register klont deshalb den `Arc`
//! der Zone und gibt den Shard frei, bevor es sperrt. Eine geleerte Zone
//! wird als `entfernt` markiert und nur entfernt, wenn der Eintrag noch
//! derselbe `Arc` ist. Wer eine entfernte Zone sperrt, versucht es erneut.

use dashmap::DashMap;
use parking_lot::Mutex;
use raumfunk_chat::ZoneHistory;
use raumfunk_core::types::{PeerId, ZoneId};
use raumfunk_protocol::messages::{CullUpdate, PeerInfo};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// Mitglied
// ---------------------------------------------------------------------------

/// Ein Mitglied einer Zone
#[derive(Debug, Clone)]
pub struct Mitglied {
    pub info: PeerInfo,
    /// Letztes Lebenszeichen (beliebiger Frame der Verbindung)
    pub zuletzt_gesehen: Instant,
}

impl Mitglied {
    pub fn peer_id(&self) -> &PeerId {
        &self.info.peer_id
    }
}

// ---------------------------------------------------------------------------
// Zone
// ---------------------------------------------------------------------------

/// Zustand einer einzelnen Zone
#[derive(Debug)]
pub struct Zone {
    id: ZoneId,
    /// Mitglieder in Beitrittsreihenfolge
    mitglieder: Vec<Mitglied>,
    /// Begrenzter Nachrichtenverlauf mit Sequenzzaehler
    pub verlauf: ZoneHistory,
    entfernt: bool,
    /// Positionen haben sich seit dem letzten Aufraeumlauf geaendert
    positionen_geaendert: bool,
    /// Zuletzt gepushter Hoerbarkeits-Satz pro Slot-Inhaber
    letzte_saetze: HashMap<PeerId, CullUpdate>,
}

impl Zone {
    pub fn neu(id: ZoneId, verlauf: ZoneHistory) -> Self {
        Self {
            id,
            mitglieder: Vec::new(),
            verlauf,
            entfernt: false,
            positionen_geaendert: false,
            letzte_saetze: HashMap::new(),
        }
    }

    pub fn id(&self) -> &ZoneId {
        &self.id
    }

    pub fn anzahl(&self) -> usize {
        self.mitglieder.len()
    }

    pub fn ist_leer(&self) -> bool {
        self.mitglieder.is_empty()
    }

    pub fn mitglieder(&self) -> &[Mitglied] {
        &self.mitglieder
    }

    pub fn mitglied(&self, peer_id: &PeerId) -> Option<&Mitglied> {
        self.mitglieder.iter().find(|m| m.peer_id() == peer_id)
    }

    pub fn mitglied_mut(&mut self, peer_id: &PeerId) -> Option<&mut Mitglied> {
        self.mitglieder.iter_mut().find(|m| m.peer_id() == peer_id)
    }

    pub fn ist_mitglied(&self, peer_id: &PeerId) -> bool {
        self.mitglied(peer_id).is_some()
    }

    /// PeerIds aller Mitglieder in Beitrittsreihenfolge
    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.mitglieder.iter().map(|m| m.peer_id().clone()).collect()
    }

    /// Mitglieder mit Mesh-Platz in Beitrittsreihenfolge
    pub fn slot_inhaber(&self) -> impl Iterator<Item = &Mitglied> {
        self.mitglieder.iter().filter(|m| m.info.mesh_slot)
    }

    pub fn hat_slot(&self, peer_id: &PeerId) -> bool {
        self.mitglied(peer_id).is_some_and(|m| m.info.mesh_slot)
    }

    pub fn slots_belegt(&self) -> usize {
        self.slot_inhaber().count()
    }

    /// Peer-Infos aller Mitglieder ausser `ausser`
    pub fn peer_infos_ausser(&self, ausser: &PeerId) -> Vec<PeerInfo> {
        self.mitglieder
            .iter()
            .filter(|m| m.peer_id() != ausser)
            .map(|m| m.info.clone())
            .collect()
    }

    pub fn peer_infos(&self) -> Vec<PeerInfo> {
        self.mitglieder.iter().map(|m| m.info.clone()).collect()
    }

    /// Fuegt ein Mitglied am Ende der Beitrittsreihenfolge an
    ///
    /// Vergibt einen Mesh-Platz, solange weniger als `max_peers` belegt sind.
    /// Gibt zurueck ob ein Platz vergeben wurde.
    pub fn hinzufuegen(&mut self, mut info: PeerInfo, max_peers: usize, jetzt: Instant) -> bool {
        let slot = self.slots_belegt() < max_peers;
        info.mesh_slot = slot;
        self.mitglieder.push(Mitglied {
            info,
            zuletzt_gesehen: jetzt,
        });
        slot
    }

    /// Entfernt ein Mitglied
    ///
    /// Hatte es einen Mesh-Platz, ruckt das frueheste Mitglied ohne Platz
    /// nach. Gibt das entfernte Mitglied und ggf. den Nachruecker zurueck.
    pub fn entfernen(&mut self, peer_id: &PeerId) -> Option<(Mitglied, Option<PeerId>)> {
        let index = self.mitglieder.iter().position(|m| m.peer_id() == peer_id)?;
        let mitglied = self.mitglieder.remove(index);
        self.letzte_saetze.remove(peer_id);

        let nachruecker = if mitglied.info.mesh_slot {
            self.mitglieder
                .iter_mut()
                .find(|m| !m.info.mesh_slot)
                .map(|m| {
                    m.info.mesh_slot = true;
                    m.peer_id().clone()
                })
        } else {
            None
        };

        Some((mitglied, nachruecker))
    }

    /// Aktualisiert das Lebenszeichen eines Mitglieds
    pub fn beruehren(&mut self, peer_id: &PeerId, jetzt: Instant) {
        if let Some(m) = self.mitglied_mut(peer_id) {
            m.zuletzt_gesehen = jetzt;
        }
    }

    /// Mitglieder, deren letztes Lebenszeichen vor `grenze` liegt
    pub fn veraltete(&self, grenze: Instant) -> Vec<PeerId> {
        self.mitglieder
            .iter()
            .filter(|m| m.zuletzt_gesehen < grenze)
            .map(|m| m.peer_id().clone())
            .collect()
    }

    pub fn positionen_markieren(&mut self) {
        self.positionen_geaendert = true;
    }

    /// Liest und loescht die Markierung
    pub fn positionen_geaendert_nehmen(&mut self) -> bool {
        std::mem::take(&mut self.positionen_geaendert)
    }

    /// Merkt sich den neuen Satz und gibt den vorherigen zurueck
    pub(crate) fn letzten_satz_tauschen(
        &mut self,
        peer_id: &PeerId,
        satz: CullUpdate,
    ) -> Option<CullUpdate> {
        self.letzte_saetze.insert(peer_id.clone(), satz)
    }

    /// Vergisst gespeicherte Saetze von Peers ohne Mesh-Platz
    pub(crate) fn saetze_bereinigen(&mut self) {
        let inhaber: Vec<PeerId> = self.slot_inhaber().map(|m| m.peer_id().clone()).collect();
        self.letzte_saetze.retain(|p, _| inhaber.contains(p));
    }
}

// ---------------------------------------------------------------------------
// Uebersicht (Status-API)
// ---------------------------------------------------------------------------

/// Kurzuebersicht einer Zone fuer die Status-API
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ZonenUebersicht {
    pub zone_id: ZoneId,
    pub member_count: usize,
    pub mesh_peers: usize,
    pub last_seq: u64,
}

// ---------------------------------------------------------------------------
// ZoneRegistry
// ---------------------------------------------------------------------------

/// Alle aktiven Zonen
///
/// Zonen entstehen beim ersten Beitritt und verschwinden mit dem letzten
/// Mitglied. Die letzte Sequenz einer aufgeloesten Zone bleibt erhalten,
/// damit eine neu angelegte Zone gleichen Namens dahinter weiterzaehlt.
#[derive(Default)]
pub struct ZoneRegistry {
    zonen: DashMap<ZoneId, Arc<Mutex<Zone>>>,
    letzte_sequenzen: DashMap<ZoneId, u64>,
}

impl ZoneRegistry {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Fuehrt `f` unter der Sperre der Zone aus und legt sie bei Bedarf an
    pub fn mit_zone_anlegen<R>(
        &self,
        id: &ZoneId,
        anlegen: impl Fn() -> Zone,
        f: impl FnOnce(&mut Zone) -> R,
    ) -> R {
        loop {
            let zone_arc = Arc::clone(
                &self
                    .zonen
                    .entry(id.clone())
                    .or_insert_with(|| {
                        let mut zone = anlegen();
                        if let Some(seq) = self.letzte_sequenzen.get(id) {
                            zone.verlauf.seq_fortsetzen(*seq);
                        }
                        Arc::new(Mutex::new(zone))
                    }),
            );
            let mut zone = zone_arc.lock();
            if zone.entfernt {
                continue;
            }
            let ergebnis = f(&mut zone);
            self.leere_zone_entfernen(&zone_arc, &mut zone);
            return ergebnis;
        }
    }

    /// Fuehrt `f` unter der Sperre einer bestehenden Zone aus
    ///
    /// Gibt `None` zurueck wenn die Zone nicht (mehr) existiert.
    pub fn mit_zone<R>(&self, id: &ZoneId, f: impl FnOnce(&mut Zone) -> R) -> Option<R> {
        let zone_arc = self.zonen.get(id).map(|e| Arc::clone(e.value()))?;
        let mut zone = zone_arc.lock();
        if zone.entfernt {
            return None;
        }
        let ergebnis = f(&mut zone);
        self.leere_zone_entfernen(&zone_arc, &mut zone);
        Some(ergebnis)
    }

    fn leere_zone_entfernen(&self, zone_arc: &Arc<Mutex<Zone>>, zone: &mut Zone) {
        if !zone.ist_leer() {
            return;
        }
        zone.entfernt = true;
        let letzte_seq = zone.verlauf.letzte_seq();
        if letzte_seq > 0 {
            self.letzte_sequenzen.insert(zone.id.clone(), letzte_seq);
        }
        if self
            .zonen
            .remove_if(&zone.id, |_, v| Arc::ptr_eq(v, zone_arc))
            .is_some()
        {
            tracing::info!(zone = %zone.id, "Zone aufgeloest");
        }
    }

    /// IDs aller Zonen (Momentaufnahme)
    pub fn zonen_ids(&self) -> Vec<ZoneId> {
        self.zonen.iter().map(|e| e.key().clone()).collect()
    }

    pub fn zonen_anzahl(&self) -> usize {
        self.zonen.len()
    }

    pub fn existiert(&self, id: &ZoneId) -> bool {
        self.zonen.contains_key(id)
    }

    /// Uebersicht aller Zonen, nach ID sortiert
    pub fn uebersicht(&self) -> Vec<ZonenUebersicht> {
        let mut liste: Vec<_> = self
            .zonen_ids()
            .into_iter()
            .filter_map(|id| {
                self.mit_zone(&id, |zone| ZonenUebersicht {
                    zone_id: zone.id.clone(),
                    member_count: zone.anzahl(),
                    mesh_peers: zone.slots_belegt(),
                    last_seq: zone.verlauf.letzte_seq(),
                })
            })
            .collect();
        liste.sort_by(|a, b| a.zone_id.cmp(&b.zone_id));
        liste
    }

    /// Peer-Infos einer Zone
    pub fn peers_von(&self, id: &ZoneId) -> Option<Vec<PeerInfo>> {
        self.mit_zone(id, |zone| zone.peer_infos())
    }

    /// Gesamtzahl der Mitglieder ueber alle Zonen
    pub fn peer_anzahl(&self) -> usize {
        self.zonen_ids()
            .iter()
            .filter_map(|id| self.mit_zone(id, |zone| zone.anzahl()))
            .sum()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use raumfunk_core::types::UserInfo;
    use std::time::Duration;

    fn info(nr: usize) -> PeerInfo {
        PeerInfo::aus_user_info(
            PeerId::new(format!("peer_{nr:012}")),
            &UserInfo::new(format!("u{nr}"), format!("Benutzer {nr}")),
        )
    }

    fn zone() -> Zone {
        Zone::neu(ZoneId::new("hub"), ZoneHistory::neu(50))
    }

    #[test]
    fn mesh_plaetze_in_beitrittsreihenfolge() {
        let mut z = zone();
        let jetzt = Instant::now();
        let slots: Vec<bool> = (0..3).map(|nr| z.hinzufuegen(info(nr), 2, jetzt)).collect();
        assert_eq!(slots, vec![true, true, false]);
        assert_eq!(z.slots_belegt(), 2);
        assert!(z.hat_slot(&info(0).peer_id));
        assert!(z.hat_slot(&info(1).peer_id));
        assert!(!z.hat_slot(&info(2).peer_id));
    }

    #[test]
    fn nachruecker_bei_freiem_platz() {
        let mut z = zone();
        let jetzt = Instant::now();
        for nr in 0..4 {
            z.hinzufuegen(info(nr), 2, jetzt);
        }

        let (weg, nachruecker) = z.entfernen(&info(0).peer_id).unwrap();
        assert_eq!(weg.info.user_id, info(0).user_id);
        assert_eq!(nachruecker, Some(info(2).peer_id));
        assert!(z.hat_slot(&info(2).peer_id));
        assert!(!z.hat_slot(&info(3).peer_id));

        // Ohne Platz kein Nachruecker
        let (_, nachruecker) = z.entfernen(&info(3).peer_id).unwrap();
        assert_eq!(nachruecker, None);
    }

    #[test]
    fn entfernen_ist_idempotent() {
        let mut z = zone();
        z.hinzufuegen(info(0), 8, Instant::now());
        assert!(z.entfernen(&info(0).peer_id).is_some());
        assert!(z.entfernen(&info(0).peer_id).is_none());
    }

    #[test]
    fn veraltete_mitglieder() {
        let mut z = zone();
        let start = Instant::now();
        z.hinzufuegen(info(0), 8, start);
        z.hinzufuegen(info(1), 8, start);
        z.beruehren(&info(1).peer_id, start + Duration::from_secs(30));

        let grenze = start + Duration::from_secs(10);
        assert_eq!(z.veraltete(grenze), vec![info(0).peer_id]);
    }

    #[test]
    fn register_legt_an_und_loest_auf() {
        let registry = ZoneRegistry::neu();
        let id = ZoneId::new("hub");
        let anlegen = || zone();

        registry.mit_zone_anlegen(&id, anlegen, |z| {
            z.hinzufuegen(info(0), 8, Instant::now());
        });
        assert!(registry.existiert(&id));
        assert_eq!(registry.peer_anzahl(), 1);

        registry.mit_zone(&id, |z| z.entfernen(&info(0).peer_id));
        assert!(!registry.existiert(&id), "Leere Zone muss verschwinden");
        assert!(registry.mit_zone(&id, |_| ()).is_none());
    }

    #[test]
    fn neu_angelegte_zone_zaehlt_weiter() {
        let registry = ZoneRegistry::neu();
        let id = ZoneId::new("hub");

        registry.mit_zone_anlegen(&id, zone, |z| {
            z.hinzufuegen(info(0), 8, Instant::now());
            for _ in 0..5 {
                z.verlauf.seq_vergeben();
            }
        });
        registry.mit_zone(&id, |z| z.entfernen(&info(0).peer_id));
        assert!(!registry.existiert(&id));

        let seq = registry.mit_zone_anlegen(&id, zone, |z| {
            z.hinzufuegen(info(1), 8, Instant::now());
            z.verlauf.seq_vergeben()
        });
        assert_eq!(seq, 6);
    }

    #[test]
    fn leere_neue_zone_bleibt_nicht_liegen() {
        let registry = ZoneRegistry::neu();
        let id = ZoneId::new("leer");
        registry.mit_zone_anlegen(&id, zone, |_| ());
        assert_eq!(registry.zonen_anzahl(), 0);
    }

    #[test]
    fn uebersicht_sortiert() {
        let registry = ZoneRegistry::neu();
        for (nr, name) in ["plaza", "hub"].iter().enumerate() {
            let id = ZoneId::new(*name);
            registry.mit_zone_anlegen(
                &id,
                || Zone::neu(id.clone(), ZoneHistory::neu(50)),
                |z| {
                    z.hinzufuegen(info(nr), 8, Instant::now());
                },
            );
        }
        let liste = registry.uebersicht();
        assert_eq!(liste.len(), 2);
        assert_eq!(liste[0].zone_id, ZoneId::new("hub"));
        assert_eq!(liste[0].member_count, 1);
        assert_eq!(liste[0].mesh_peers, 1);
    }
}
