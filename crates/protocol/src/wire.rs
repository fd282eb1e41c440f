//! Wire-Format fuer TCP-Verbindungen
//!
//! Frame-basiertes Protokoll: Length(u32 big-endian) + JSON-Payload.
//!
//! ## Frame-Format
//!
//! ```text
//! +--------+--------+--------+--------+----...----+
//! | Laenge (u32 BE) | 4 Bytes        | Payload    |
//! +--------+--------+--------+--------+----...----+
//! ```
//!
//! Die Laenge gibt die Anzahl der Payload-Bytes an (ohne die 4 Laengen-Bytes).
//! Maximale Frame-Groesse ist konfigurierbar (Standard: 1 MB).
//!
//! Ein Frame mit ungueltigem JSON oder unbekanntem Typ beendet die
//! Verbindung nicht: der Decoder liefert `Eingang::Ungueltig` und liest
//! danach den naechsten Frame. Nur ein zu grosser Frame ist fatal, weil
//! der Stream dann nicht mehr synchronisiert werden kann.

use bytes::{Buf, BufMut, BytesMut};
use serde::{de::DeserializeOwned, Serialize};
use std::io;
use std::marker::PhantomData;
use tokio_util::codec::{Decoder, Encoder};

use crate::messages::{ClientMessage, Envelope, ServerMessage};

// ---------------------------------------------------------------------------
// Konstanten
// ---------------------------------------------------------------------------

/// Standard-maximale Frame-Groesse (1 MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Groesse des Laengen-Felds in Bytes
pub const LENGTH_FIELD_SIZE: usize = 4;

// ---------------------------------------------------------------------------
// Eingang
// ---------------------------------------------------------------------------

/// Ergebnis des Dekodierens eines vollstaendigen Frames
#[derive(Debug, Clone, PartialEq)]
pub enum Eingang<T> {
    /// Gueltige Nachricht samt Zeitstempel des Absenders
    Nachricht(Envelope<T>),
    /// Frame war vollstaendig, aber kein gueltiges JSON/unbekannter Typ
    Ungueltig(String),
}

// ---------------------------------------------------------------------------
// FrameCodec
// ---------------------------------------------------------------------------

/// tokio-util Codec fuer frame-basierte TCP-Verbindungen
///
/// `Ein` ist der dekodierte Nachrichtentyp, `Aus` der kodierte. Fuer die
/// beiden Seiten gibt es die Aliase [`ServerCodec`] und [`ClientCodec`].
///
/// # Beispiel
///
/// ```rust,no_run
/// use tokio_util::codec::Framed;
/// use raumfunk_protocol::wire::ClientCodec;
///
/// // let stream = TcpStream::connect(...).await?;
/// // let framed = Framed::new(stream, ClientCodec::new());
/// ```
#[derive(Debug)]
pub struct FrameCodec<Ein, Aus> {
    /// Maximale erlaubte Frame-Groesse in Bytes
    max_frame_size: usize,
    _typen: PhantomData<fn(Aus) -> Ein>,
}

/// Codec des Dienstes: liest Client-Nachrichten, schreibt Server-Nachrichten
pub type ServerCodec = FrameCodec<ClientMessage, ServerMessage>;

/// Codec des Clients: liest Server-Nachrichten, schreibt Client-Nachrichten
pub type ClientCodec = FrameCodec<ServerMessage, ClientMessage>;

impl<Ein, Aus> FrameCodec<Ein, Aus> {
    /// Erstellt einen neuen `FrameCodec` mit Standard-Limits
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Erstellt einen `FrameCodec` mit benutzerdefinierter maximaler Frame-Groesse
    pub fn with_max_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            _typen: PhantomData,
        }
    }

    /// Gibt die konfigurierte maximale Frame-Groesse zurueck
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl<Ein, Aus> Default for FrameCodec<Ein, Aus> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Ein, Aus> Clone for FrameCodec<Ein, Aus> {
    fn clone(&self) -> Self {
        Self::with_max_size(self.max_frame_size)
    }
}

// ---------------------------------------------------------------------------
// Decoder-Implementierung
// ---------------------------------------------------------------------------

impl<Ein: DeserializeOwned, Aus> Decoder for FrameCodec<Ein, Aus> {
    type Item = Eingang<Ein>;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Warte auf mindestens 4 Bytes fuer das Laengen-Feld
        if src.len() < LENGTH_FIELD_SIZE {
            return Ok(None);
        }

        // Laenge lesen (big-endian u32) ohne den Buffer zu veraendern
        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

        if length > self.max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Frame zu gross: {} Bytes (Maximum: {} Bytes)",
                    length, self.max_frame_size
                ),
            ));
        }

        // Pruefen ob der vollstaendige Frame bereits im Buffer ist
        let total_size = LENGTH_FIELD_SIZE + length;
        if src.len() < total_size {
            src.reserve(total_size - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_FIELD_SIZE);
        let payload = src.split_to(length);

        match serde_json::from_slice::<Envelope<Ein>>(&payload) {
            Ok(umschlag) => Ok(Some(Eingang::Nachricht(umschlag))),
            Err(e) => Ok(Some(Eingang::Ungueltig(e.to_string()))),
        }
    }
}

// ---------------------------------------------------------------------------
// Encoder-Implementierung
// ---------------------------------------------------------------------------

impl<Ein, Aus: Serialize> Encoder<Aus> for FrameCodec<Ein, Aus> {
    type Error = io::Error;

    fn encode(&mut self, item: Aus, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_vec(&Envelope::neu(item)).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("JSON-Serialisierung fehlgeschlagen: {}", e),
            )
        })?;

        if json.len() > self.max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Nachricht zu gross: {} Bytes (Maximum: {} Bytes)",
                    json.len(),
                    self.max_frame_size
                ),
            ));
        }

        dst.reserve(LENGTH_FIELD_SIZE + json.len());
        dst.put_u32(json.len() as u32);
        dst.put_slice(&json);

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{LeaveZoneRequest, ServerMessage};
    use futures_util::{SinkExt, StreamExt};
    use raumfunk_core::types::ZoneId;
    use tokio_util::codec::{Decoder, Encoder, Framed};

    fn verlassen(zone: &str) -> ClientMessage {
        ClientMessage::LeaveZone(LeaveZoneRequest {
            zone_id: ZoneId::new(zone),
        })
    }

    /// Schreibt rohes JSON als Frame
    fn roher_frame(buf: &mut BytesMut, json: &str) {
        buf.put_u32(json.len() as u32);
        buf.put_slice(json.as_bytes());
    }

    #[test]
    fn frame_codec_encode_decode() {
        let mut client = ClientCodec::new();
        let mut server = ServerCodec::new();

        let mut buf = BytesMut::new();
        client.encode(verlassen("hub"), &mut buf).unwrap();

        let payload_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        assert_eq!(buf.len(), LENGTH_FIELD_SIZE + payload_len);

        match server.decode(&mut buf).unwrap() {
            Some(Eingang::Nachricht(env)) => {
                assert_eq!(env.nachricht, verlassen("hub"));
                assert!(env.timestamp > 0);
            }
            andere => panic!("Erwartet Nachricht, erhalten {andere:?}"),
        }
    }

    #[test]
    fn frame_codec_unvollstaendiger_frame() {
        let mut client = ClientCodec::new();
        let mut server = ServerCodec::new();

        let mut buf = BytesMut::new();
        client.encode(ClientMessage::Ping, &mut buf).unwrap();

        let half = buf.len() / 2;
        let mut partial = buf.split_to(half);
        assert!(server.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn frame_codec_zu_wenig_bytes_fuer_laengenfeld() {
        let mut codec = ServerCodec::new();
        let mut buf = BytesMut::from(&[0x00, 0x00][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn ungueltiges_json_beendet_den_stream_nicht() {
        let mut codec = ServerCodec::new();
        let mut buf = BytesMut::new();
        roher_frame(&mut buf, "{kein json");
        roher_frame(&mut buf, r#"{"type":"teleport"}"#);
        roher_frame(&mut buf, r#"{"type":"ping","timestamp":1}"#);

        assert!(matches!(
            codec.decode(&mut buf).unwrap(),
            Some(Eingang::Ungueltig(_))
        ));
        assert!(matches!(
            codec.decode(&mut buf).unwrap(),
            Some(Eingang::Ungueltig(_))
        ));
        match codec.decode(&mut buf).unwrap() {
            Some(Eingang::Nachricht(env)) => assert_eq!(env.nachricht, ClientMessage::Ping),
            andere => panic!("Erwartet Ping, erhalten {andere:?}"),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn frame_codec_ablehnung_zu_grosser_frame() {
        let mut codec = ServerCodec::with_max_size(100);

        let mut buf = BytesMut::new();
        buf.put_u32(200);
        buf.put_slice(&[b'x'; 200]);

        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn frame_codec_ablehnung_beim_encode_zu_grosse_nachricht() {
        let mut codec = ClientCodec::with_max_size(10);
        let mut buf = BytesMut::new();
        assert!(codec.encode(verlassen("hub"), &mut buf).is_err());
    }

    #[test]
    fn frame_codec_mehrere_nachrichten_im_buffer() {
        let mut client = ClientCodec::new();
        let mut server = ServerCodec::new();
        let mut buf = BytesMut::new();

        for zone in ["a", "b", "c"] {
            client.encode(verlassen(zone), &mut buf).unwrap();
        }
        for zone in ["a", "b", "c"] {
            match server.decode(&mut buf).unwrap() {
                Some(Eingang::Nachricht(env)) => assert_eq!(env.nachricht, verlassen(zone)),
                andere => panic!("Erwartet Nachricht, erhalten {andere:?}"),
            }
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn frame_codec_default_max_size() {
        let codec = ClientCodec::new();
        assert_eq!(codec.max_frame_size(), DEFAULT_MAX_FRAME_SIZE);
    }

    #[tokio::test]
    async fn framed_ueber_duplex() {
        let (a, b) = tokio::io::duplex(4096);
        let mut client = Framed::new(a, ClientCodec::new());
        let mut server = Framed::new(b, ServerCodec::new());

        client.send(ClientMessage::Ping).await.unwrap();
        match server.next().await {
            Some(Ok(Eingang::Nachricht(env))) => assert_eq!(env.nachricht, ClientMessage::Ping),
            andere => panic!("Erwartet Ping, erhalten {andere:?}"),
        }

        server.send(ServerMessage::pong()).await.unwrap();
        match client.next().await {
            Some(Ok(Eingang::Nachricht(env))) => {
                assert!(matches!(env.nachricht, ServerMessage::Pong(_)))
            }
            andere => panic!("Erwartet Pong, erhalten {andere:?}"),
        }
    }
}
