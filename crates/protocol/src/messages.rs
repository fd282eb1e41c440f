//! Nachrichtentypen zwischen Client und Zonen-Dienst
//!
//! Jede Nachricht ist ein JSON-Objekt mit einem `type`-Tag, den
//! camelCase-Feldern der jeweiligen Nutzlast und einem `timestamp`
//! (Millisekunden seit Epoch). Die Enums werden an der Transportgrenze
//! dekodiert, alle weiteren Schichten matchen exhaustiv.
//!
//! Aeltere Typnamen (`join_room`, `new_peer`, `user_joined`, ...) werden
//! beim Dekodieren als Aliase akzeptiert.

use raumfunk_core::types::{MessageId, PeerId, Position, UserId, UserInfo, ZoneId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Aktueller Zeitstempel in Millisekunden
pub fn jetzt_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ---------------------------------------------------------------------------
// Fehler-Codes
// ---------------------------------------------------------------------------

/// Standardisierte Fehler-Codes fuer `error`-Nachrichten
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Allgemein
    InternalError,
    InvalidRequest,
    ShuttingDown,
    // Zonen
    NotInZone,
    ZoneFull,
    MeshFull,
    // Signaling
    InvalidOffer,
    // Chat
    EmptyMessage,
    RateLimited,
}

impl ErrorCode {
    /// Kapazitaetsfehler sind erwartet und nicht fatal
    pub fn ist_kapazitaet(&self) -> bool {
        matches!(self, Self::ZoneFull | Self::MeshFull | Self::RateLimited)
    }
}

// ---------------------------------------------------------------------------
// Gemeinsame Strukturen
// ---------------------------------------------------------------------------

/// Praesenz-Status eines Peers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    #[default]
    Online,
    Away,
    Busy,
}

/// Sprachzustand eines Peers
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceState {
    pub muted: bool,
    pub speaking: bool,
    /// Normalisierter Eingangspegel 0.0..1.0
    pub volume: f32,
}

/// Sichtbare Informationen ueber ein Zonenmitglied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub peer_id: PeerId,
    pub user_id: UserId,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub speaking: bool,
    #[serde(default)]
    pub status: PresenceStatus,
    /// Nimmt am Voice-Mesh teil (innerhalb des Mesh-Limits)
    #[serde(default)]
    pub mesh_slot: bool,
}

impl PeerInfo {
    /// Erstellt die Peer-Info fuer einen frisch beigetretenen Benutzer
    pub fn aus_user_info(peer_id: PeerId, info: &UserInfo) -> Self {
        Self {
            peer_id,
            user_id: info.id.clone(),
            display_name: info.name.clone(),
            avatar_url: info.avatar_url.clone(),
            position: Position::default(),
            muted: false,
            speaking: false,
            status: PresenceStatus::Online,
            mesh_slot: false,
        }
    }
}

/// Eine Chat-Nachricht wie sie im Verlauf einer Zone liegt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: MessageId,
    /// Vom Broker vergebene, pro Zone streng monoton steigende Sequenz
    pub seq: u64,
    pub zone_id: ZoneId,
    pub user_id: UserId,
    pub user_name: String,
    pub content: String,
    /// Annahmezeitpunkt beim Broker (ms)
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_msg_id: Option<Uuid>,
}

/// Zustellung einer Chat-Nachricht
///
/// Die Nachricht ist verschachtelt, weil ihr eigener `timestamp` sonst mit
/// dem Zeitstempel des Umschlags kollidieren wuerde.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDelivery {
    pub message: ChatMessage,
}

/// STUN/TURN-Server fuer die ICE-Aushandlung
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Client -> Dienst
// ---------------------------------------------------------------------------

/// Zone betreten
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinZoneRequest {
    #[serde(alias = "roomId")]
    pub zone_id: ZoneId,
    pub user_info: UserInfo,
    /// Hoechste bereits gesehene Sequenz (nur beim Wiederbeitritt gesetzt)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_seq: Option<u64>,
}

/// Zone verlassen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveZoneRequest {
    #[serde(alias = "roomId")]
    pub zone_id: ZoneId,
}

/// Chat-Nachricht senden
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(alias = "roomId")]
    pub zone_id: ZoneId,
    #[serde(default)]
    pub content: String,
    /// Vom Client gewaehlte ID zur Duplikaterkennung bei Wiederholungen
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_msg_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
}

/// Tipp-Indikator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingRequest {
    #[serde(alias = "roomId")]
    pub zone_id: ZoneId,
    pub is_typing: bool,
}

/// Offer/Answer an einen Ziel-Peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdpSignal {
    pub to: PeerId,
    #[serde(default)]
    pub sdp: String,
}

/// ICE-Kandidat an einen Ziel-Peer (Inhalt undurchsichtig)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceSignal {
    pub to: PeerId,
    pub candidate: serde_json::Value,
}

/// Praesenz-Status aendern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    pub status: PresenceStatus,
}

/// Ausdrueckliche Wiedergabe-Anfrage nach erkannter Sequenzluecke
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResyncRequest {
    #[serde(alias = "roomId")]
    pub zone_id: ZoneId,
    pub last_seen_seq: u64,
}

/// Alle Nachrichten vom Client an den Dienst
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    #[serde(alias = "join_room", alias = "join_voice_zone")]
    JoinZone(JoinZoneRequest),
    #[serde(alias = "leave_room", alias = "leave_voice_zone")]
    LeaveZone(LeaveZoneRequest),
    Chat(ChatRequest),
    Typing(TypingRequest),
    Offer(SdpSignal),
    Answer(SdpSignal),
    IceCandidate(IceSignal),
    VoiceState(VoiceState),
    Position(Position),
    Presence(PresenceUpdate),
    Resync(ResyncRequest),
    Ping,
}

impl ClientMessage {
    /// Typname fuer Logs
    pub fn typ_name(&self) -> &'static str {
        match self {
            Self::JoinZone(_) => "join_zone",
            Self::LeaveZone(_) => "leave_zone",
            Self::Chat(_) => "chat",
            Self::Typing(_) => "typing",
            Self::Offer(_) => "offer",
            Self::Answer(_) => "answer",
            Self::IceCandidate(_) => "ice_candidate",
            Self::VoiceState(_) => "voice_state",
            Self::Position(_) => "position",
            Self::Presence(_) => "presence",
            Self::Resync(_) => "resync",
            Self::Ping => "ping",
        }
    }

    /// Nur Chat-Nachrichten ueberleben eine Verbindungsunterbrechung
    ///
    /// Signaling, Positionen und Tipp-Indikatoren sind nach einem
    /// Reconnect veraltet und werden offline verworfen.
    pub fn ist_warteschlangenfaehig(&self) -> bool {
        matches!(self, Self::Chat(_))
    }
}

// ---------------------------------------------------------------------------
// Dienst -> Client
// ---------------------------------------------------------------------------

/// Antwort auf einen Zonenbeitritt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneJoined {
    pub zone_id: ZoneId,
    /// Fuer diese Verbindung vergebene Peer-ID
    pub peer_id: PeerId,
    /// Bereits anwesende Mitglieder (ohne den Beitretenden)
    pub peers: Vec<PeerInfo>,
    /// Letzte Nachrichten (leer beim Wiederbeitritt, dann folgt `reconnected`)
    pub history: Vec<ChatMessage>,
    #[serde(default)]
    pub ice_servers: Vec<IceServer>,
    #[serde(default)]
    pub mesh_slot: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneLeft {
    pub zone_id: ZoneId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerLeft {
    pub peer_id: PeerId,
    pub user_id: UserId,
}

/// Bestaetigung an den Absender einer Chat-Nachricht
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageAck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_msg_id: Option<Uuid>,
    pub id: MessageId,
    pub seq: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    pub zone_id: ZoneId,
    pub peer_id: PeerId,
    pub user_id: UserId,
    pub is_typing: bool,
}

/// Weitergeleitetes Offer/Answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdpRelay {
    pub from: PeerId,
    pub sdp: String,
}

/// Weitergeleiteter ICE-Kandidat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceRelay {
    pub from: PeerId,
    pub candidate: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerVoiceState {
    pub peer_id: PeerId,
    pub muted: bool,
    pub speaking: bool,
    pub volume: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerPosition {
    pub peer_id: PeerId,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerPresence {
    pub peer_id: PeerId,
    pub status: PresenceStatus,
}

/// Ein hoerbarer Peer mit bereits berechneter Daempfung
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudiblePeer {
    pub peer_id: PeerId,
    pub distance: f64,
    pub volume: f64,
}

/// Hoerbarkeits-Satz fuer einen einzelnen Peer
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CullUpdate {
    pub audible_peers: Vec<AudiblePeer>,
    pub muted_peers: Vec<PeerId>,
}

/// Nachgeholte Nachrichten nach Wiederbeitritt oder Resync
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconnected {
    pub zone_id: ZoneId,
    pub missed_messages: Vec<ChatMessage>,
    /// Luecke groesser als der Puffer – Verlauf gilt als zurueckgesetzt
    #[serde(default)]
    pub history_truncated: bool,
}

/// Grund warum ein Signal nicht zugestellt wurde
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    NotFound,
    MeshFull,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerUnavailable {
    pub peer_id: PeerId,
    pub reason: UnavailableReason,
}

/// Fehler-Antwort
///
/// Lehnt der Dienst einen Chat-Post ab, traegt die Antwort dessen
/// `clientMsgId`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_msg_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pong {
    pub server_timestamp_ms: i64,
}

/// Alle Nachrichten vom Dienst an den Client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    #[serde(alias = "room_joined")]
    ZoneJoined(ZoneJoined),
    #[serde(alias = "room_left")]
    ZoneLeft(ZoneLeft),
    #[serde(alias = "new_peer", alias = "user_joined")]
    PeerJoined(PeerInfo),
    #[serde(alias = "user_left")]
    PeerLeft(PeerLeft),
    #[serde(alias = "chat")]
    Message(MessageDelivery),
    MessageAck(MessageAck),
    Typing(TypingNotice),
    Offer(SdpRelay),
    Answer(SdpRelay),
    IceCandidate(IceRelay),
    PeerVoiceState(PeerVoiceState),
    PeerPosition(PeerPosition),
    PeerPresence(PeerPresence),
    CullUpdate(CullUpdate),
    Reconnected(Reconnected),
    PeerUnavailable(PeerUnavailable),
    Error(ErrorResponse),
    Pong(Pong),
}

impl ServerMessage {
    /// Erstellt eine Fehler-Nachricht
    pub fn fehler(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error(ErrorResponse {
            code,
            message: message.into(),
            client_msg_id: None,
        })
    }

    /// Fehler-Antwort auf einen abgelehnten Chat-Post
    pub fn post_abgelehnt(
        code: ErrorCode,
        message: impl Into<String>,
        client_msg_id: Option<Uuid>,
    ) -> Self {
        Self::Error(ErrorResponse {
            code,
            message: message.into(),
            client_msg_id,
        })
    }

    /// Erstellt eine Pong-Antwort mit dem aktuellen Zeitstempel
    pub fn pong() -> Self {
        Self::Pong(Pong {
            server_timestamp_ms: jetzt_ms(),
        })
    }

    /// Verpackt eine Chat-Nachricht zur Zustellung
    pub fn nachricht(message: ChatMessage) -> Self {
        Self::Message(MessageDelivery { message })
    }

    /// Typname fuer Logs
    pub fn typ_name(&self) -> &'static str {
        match self {
            Self::ZoneJoined(_) => "zone_joined",
            Self::ZoneLeft(_) => "zone_left",
            Self::PeerJoined(_) => "peer_joined",
            Self::PeerLeft(_) => "peer_left",
            Self::Message(_) => "message",
            Self::MessageAck(_) => "message_ack",
            Self::Typing(_) => "typing",
            Self::Offer(_) => "offer",
            Self::Answer(_) => "answer",
            Self::IceCandidate(_) => "ice_candidate",
            Self::PeerVoiceState(_) => "peer_voice_state",
            Self::PeerPosition(_) => "peer_position",
            Self::PeerPresence(_) => "peer_presence",
            Self::CullUpdate(_) => "cull_update",
            Self::Reconnected(_) => "reconnected",
            Self::PeerUnavailable(_) => "peer_unavailable",
            Self::Error(_) => "error",
            Self::Pong(_) => "pong",
        }
    }
}

// ---------------------------------------------------------------------------
// Umschlag
// ---------------------------------------------------------------------------

/// Wire-Umschlag: Nachricht plus Zeitstempel auf oberster Ebene
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    #[serde(flatten)]
    pub nachricht: T,
    #[serde(default)]
    pub timestamp: i64,
}

impl<T> Envelope<T> {
    /// Verpackt eine Nachricht mit dem aktuellen Zeitstempel
    pub fn neu(nachricht: T) -> Self {
        Self {
            nachricht,
            timestamp: jetzt_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
