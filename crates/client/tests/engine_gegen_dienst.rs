//! Ende-zu-Ende: mehrere Engines gegen den echten Zonen-Dienst

use raumfunk_audio::SoftwareGraph;
use raumfunk_client::simulation::SimuliertesBackend;
use raumfunk_client::{ClientConfig, EngineEvent, RaumfunkEngine, TcpVerbinder};
use raumfunk_core::types::{PeerId, Position, UserInfo};
use raumfunk_protocol::ErrorCode;
use raumfunk_signaling::{SignalingConfig, SignalingServer, SignalingState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

const WARTEZEIT: Duration = Duration::from_secs(5);

struct Dienst {
    adresse: String,
    _shutdown_tx: watch::Sender<bool>,
}

async fn dienst_starten(config: SignalingConfig) -> Dienst {
    let state = SignalingState::mit_standard_metriken(config).unwrap();
    let server = SignalingServer::binden(Arc::clone(&state), "127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let adresse = server.lokale_adresse().unwrap().to_string();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(server.starten(shutdown_rx));
    Dienst {
        adresse,
        _shutdown_tx: shutdown_tx,
    }
}

struct Teilnehmer {
    engine: RaumfunkEngine,
    ereignisse: broadcast::Receiver<EngineEvent>,
    peer_id: PeerId,
}

impl Teilnehmer {
    /// Startet eine Engine und betritt die Zone "hub"
    async fn beitreten(dienst: &Dienst, name: &str) -> Self {
        let config = ClientConfig {
            server_adresse: dienst.adresse.clone(),
            ..ClientConfig::default()
        };
        let engine = RaumfunkEngine::init(
            config,
            UserInfo::new(name, name),
            TcpVerbinder::neu(dienst.adresse.clone()),
            Arc::new(SimuliertesBackend::neu()),
            SoftwareGraph::neu(48_000),
        )
        .unwrap();
        let mut ereignisse = engine.ereignisse();
        engine.zone_betreten("hub").unwrap();

        let peer_id = match warten_auf(&mut ereignisse, |e| {
            matches!(e, EngineEvent::ZoneBetreten { .. })
        })
        .await
        {
            EngineEvent::ZoneBetreten { peer_id, .. } => peer_id,
            _ => unreachable!(),
        };
        Self {
            engine,
            ereignisse,
            peer_id,
        }
    }

    async fn warten_auf(&mut self, pred: impl FnMut(&EngineEvent) -> bool) -> EngineEvent {
        warten_auf(&mut self.ereignisse, pred).await
    }
}

async fn warten_auf(
    ereignisse: &mut broadcast::Receiver<EngineEvent>,
    mut pred: impl FnMut(&EngineEvent) -> bool,
) -> EngineEvent {
    tokio::time::timeout(WARTEZEIT, async {
        loop {
            match ereignisse.recv().await {
                Ok(e) if pred(&e) => return e,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("Ereignisbus geschlossen: {e}"),
            }
        }
    })
    .await
    .expect("Zeitueberschreitung beim Warten auf Ereignis")
}

#[tokio::test]
async fn chat_erreicht_alle_in_gleicher_reihenfolge() {
    let dienst = dienst_starten(SignalingConfig::default()).await;
    let mut alice = Teilnehmer::beitreten(&dienst, "alice").await;
    let mut bob = Teilnehmer::beitreten(&dienst, "bob").await;

    alice
        .warten_auf(|e| matches!(e, EngineEvent::BenutzerBeigetreten(_)))
        .await;

    alice.engine.nachricht_senden("hi", None).await.unwrap();
    bob.engine.nachricht_senden("hallo", None).await.unwrap();

    let mut reihenfolge = Vec::new();
    for t in [&mut alice, &mut bob] {
        let mut gesehen = Vec::new();
        while gesehen.len() < 2 {
            if let EngineEvent::Nachricht(m) = t
                .warten_auf(|e| matches!(e, EngineEvent::Nachricht(_)))
                .await
            {
                gesehen.push((m.seq, m.content));
            }
        }
        reihenfolge.push(gesehen);
    }
    assert_eq!(reihenfolge[0], reihenfolge[1]);
    assert_eq!(reihenfolge[0][0].0 + 1, reihenfolge[0][1].0);

    alice.engine.beenden().await;
    bob.engine.beenden().await;
}

#[tokio::test]
async fn nahe_peers_verbinden_sich() {
    let dienst = dienst_starten(SignalingConfig::default()).await;
    let mut alice = Teilnehmer::beitreten(&dienst, "alice").await;
    let mut bob = Teilnehmer::beitreten(&dienst, "bob").await;

    alice.engine.position_setzen(Position::new(0.0, 0.0, 0.0)).unwrap();
    bob.engine.position_setzen(Position::new(2.0, 0.0, 0.0)).unwrap();

    let bob_id = bob.peer_id.clone();
    let alice_id = alice.peer_id.clone();
    alice
        .warten_auf(|e| *e == EngineEvent::PeerVerbunden(bob_id.clone()))
        .await;
    bob.warten_auf(|e| *e == EngineEvent::PeerVerbunden(alice_id.clone()))
        .await;

    let peers = alice.engine.peers().await.unwrap();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].info.peer_id, bob.peer_id);
    assert!(peers[0].gain.is_some());

    // Verlassen baut die Verbindung beim Gegenueber ab
    bob.engine.zone_verlassen().unwrap();
    alice
        .warten_auf(|e| matches!(e, EngineEvent::BenutzerGegangen { .. }))
        .await;
    assert!(alice.engine.peers().await.unwrap().is_empty());

    alice.engine.beenden().await;
    bob.engine.beenden().await;
}

#[tokio::test]
async fn peer_ohne_mesh_platz_rueckt_nach() {
    let dienst = dienst_starten(SignalingConfig {
        max_peers: 2,
        ..SignalingConfig::default()
    })
    .await;
    let alice = Teilnehmer::beitreten(&dienst, "alice").await;
    let bob = Teilnehmer::beitreten(&dienst, "bob").await;

    let config = ClientConfig::default();
    let engine = RaumfunkEngine::init(
        config,
        UserInfo::new("carol", "carol"),
        TcpVerbinder::neu(dienst.adresse.clone()),
        Arc::new(SimuliertesBackend::neu()),
        SoftwareGraph::neu(48_000),
    )
    .unwrap();
    let mut carol_ereignisse = engine.ereignisse();
    engine.zone_betreten("hub").unwrap();

    let e = warten_auf(&mut carol_ereignisse, |e| {
        matches!(e, EngineEvent::Kapazitaet { .. })
    })
    .await;
    assert!(matches!(
        e,
        EngineEvent::Kapazitaet {
            code: ErrorCode::MeshFull,
            ..
        }
    ));

    // Ein Platz wird frei, Carol wird hoerbar und verbindet sich mit Bob
    alice.engine.zone_verlassen().unwrap();
    let bob_id = bob.peer_id.clone();
    warten_auf(&mut carol_ereignisse, |e| {
        *e == EngineEvent::PeerVerbunden(bob_id.clone())
    })
    .await;

    alice.engine.beenden().await;
    bob.engine.beenden().await;
    engine.beenden().await;
}
