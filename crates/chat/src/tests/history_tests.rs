//! Unit-Tests fuer den Zonenverlauf

use raumfunk_core::types::{MessageId, UserId, ZoneId};
use raumfunk_protocol::messages::ChatMessage;
use uuid::Uuid;

use crate::history::ZoneHistory;

fn nachricht_anhaengen(verlauf: &mut ZoneHistory, content: &str) -> u64 {
    let seq = verlauf.seq_vergeben();
    verlauf.anhaengen(ChatMessage {
        id: MessageId::new(),
        seq,
        zone_id: ZoneId::new("hub"),
        user_id: UserId::new("u1"),
        user_name: "Alice".into(),
        content: content.into(),
        timestamp: 0,
        reply_to: None,
        client_msg_id: None,
    });
    seq
}

fn seqs(nachrichten: &[ChatMessage]) -> Vec<u64> {
    nachrichten.iter().map(|m| m.seq).collect()
}

#[test]
fn test_sequenz_beginnt_bei_eins() {
    let mut verlauf = ZoneHistory::neu(50);
    assert_eq!(verlauf.letzte_seq(), 0);
    assert_eq!(nachricht_anhaengen(&mut verlauf, "a"), 1);
    assert_eq!(nachricht_anhaengen(&mut verlauf, "b"), 2);
    assert_eq!(verlauf.letzte_seq(), 2);
}

#[test]
fn test_aelteste_wird_verdraengt() {
    let mut verlauf = ZoneHistory::neu(3);
    for i in 0..5 {
        nachricht_anhaengen(&mut verlauf, &format!("n{i}"));
    }
    assert_eq!(verlauf.len(), 3);
    assert_eq!(seqs(&verlauf.letzte(10)), vec![3, 4, 5]);
    assert_eq!(seqs(&verlauf.letzte(2)), vec![4, 5]);
}

#[test]
fn test_wiedergabe_ab_null_liefert_alles() {
    let mut verlauf = ZoneHistory::neu(50);
    nachricht_anhaengen(&mut verlauf, "hello");
    nachricht_anhaengen(&mut verlauf, "hi");

    let wiedergabe = verlauf.nach(0);
    assert!(!wiedergabe.abgeschnitten);
    let inhalte: Vec<_> = wiedergabe.nachrichten.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(inhalte, vec!["hello", "hi"]);
}

#[test]
fn test_wiedergabe_genau_nach_last_seen() {
    let mut verlauf = ZoneHistory::neu(50);
    for i in 0..10 {
        nachricht_anhaengen(&mut verlauf, &format!("n{i}"));
    }
    let wiedergabe = verlauf.nach(7);
    assert!(!wiedergabe.abgeschnitten);
    assert_eq!(seqs(&wiedergabe.nachrichten), vec![8, 9, 10]);

    let nichts = verlauf.nach(10);
    assert!(!nichts.abgeschnitten);
    assert!(nichts.nachrichten.is_empty());
}

#[test]
fn test_wiedergabe_bei_verdraengter_luecke_abgeschnitten() {
    let mut verlauf = ZoneHistory::neu(3);
    for i in 0..6 {
        nachricht_anhaengen(&mut verlauf, &format!("n{i}"));
    }
    // Puffer haelt 4..=6, Luecke ab 2 ist nicht mehr vollstaendig
    let wiedergabe = verlauf.nach(1);
    assert!(wiedergabe.abgeschnitten);
    assert_eq!(seqs(&wiedergabe.nachrichten), vec![4, 5, 6]);

    // 3 gesehen, 4 ist die aelteste: noch vollstaendig
    let wiedergabe = verlauf.nach(3);
    assert!(!wiedergabe.abgeschnitten);
    assert_eq!(seqs(&wiedergabe.nachrichten), vec![4, 5, 6]);
}

#[test]
fn test_wiedergabe_nach_neu_angelegter_zone_abgeschnitten() {
    let mut verlauf = ZoneHistory::neu(50);
    nachricht_anhaengen(&mut verlauf, "neu");

    let wiedergabe = verlauf.nach(42);
    assert!(wiedergabe.abgeschnitten);
    assert_eq!(seqs(&wiedergabe.nachrichten), vec![1]);
}

#[test]
fn test_client_msg_id_nur_vom_selben_benutzer() {
    let mut verlauf = ZoneHistory::neu(50);
    let cid = Uuid::new_v4();
    let seq = verlauf.seq_vergeben();
    verlauf.anhaengen(ChatMessage {
        id: MessageId::new(),
        seq,
        zone_id: ZoneId::new("hub"),
        user_id: UserId::new("u1"),
        user_name: "Alice".into(),
        content: "x".into(),
        timestamp: 0,
        reply_to: None,
        client_msg_id: Some(cid),
    });

    assert!(verlauf.finde_client_msg(&UserId::new("u1"), cid).is_some());
    assert!(verlauf.finde_client_msg(&UserId::new("u2"), cid).is_none());
    assert!(verlauf
        .finde_client_msg(&UserId::new("u1"), Uuid::new_v4())
        .is_none());
}

#[test]
fn test_fortgesetzte_sequenz_nach_neuanlage() {
    let mut verlauf = ZoneHistory::neu(50);
    verlauf.seq_fortsetzen(5);
    assert_eq!(verlauf.letzte_seq(), 5);
    for i in 0..7 {
        nachricht_anhaengen(&mut verlauf, &format!("neu{i}"));
    }

    // Wer bei 5 aufgehoert hat, bekommt alle Nachrichten der neuen Zone
    let wiedergabe = verlauf.nach(5);
    assert!(!wiedergabe.abgeschnitten);
    assert_eq!(seqs(&wiedergabe.nachrichten), (6..=12).collect::<Vec<_>>());

    // Wer davor aufgehoert hat, hat Nachrichten der alten Zone verpasst
    let wiedergabe = verlauf.nach(3);
    assert!(wiedergabe.abgeschnitten);
    assert_eq!(wiedergabe.nachrichten.len(), 7);
}

#[test]
fn test_leerer_puffer_hinter_letzter_sequenz_ist_abgeschnitten() {
    let mut verlauf = ZoneHistory::neu(50);
    verlauf.seq_fortsetzen(5);

    let wiedergabe = verlauf.nach(3);
    assert!(wiedergabe.abgeschnitten);
    assert!(wiedergabe.nachrichten.is_empty());

    let wiedergabe = verlauf.nach(5);
    assert!(!wiedergabe.abgeschnitten);
}
