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
//!
//! ## Fehlerbehandlung
//! Ein Frame mit ungueltigem JSON ist kein Transportfehler: der Decoder
//! liefert `Err(UngueltigerFrame)` als Item und der Stream bleibt nutzbar.
//! Nur ein zu grosser Frame beendet den Stream, weil danach keine
//! Frame-Grenze mehr bekannt ist.

use bytes::{Buf, BufMut, BytesMut};
use std::io;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use crate::message::WireMessage;

// ---------------------------------------------------------------------------
// Konstanten
// ---------------------------------------------------------------------------

/// Standard-maximale Frame-Groesse (64 KB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Groesse des Laengen-Felds in Bytes
pub const LENGTH_FIELD_SIZE: usize = 4;

/// Frame war vollstaendig, aber nicht als Nachricht lesbar
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Ungueltiger Frame: {grund}")]
pub struct UngueltigerFrame {
    pub grund: String,
}

/// Ergebnis eines dekodierten Frames
pub type Empfangen = Result<WireMessage, UngueltigerFrame>;

// ---------------------------------------------------------------------------
// FrameCodec
// ---------------------------------------------------------------------------

/// tokio-util Codec fuer frame-basierte TCP-Verbindungen
///
/// # Beispiel
///
/// ```rust,no_run
/// use tokio_util::codec::Framed;
/// use lobbykey_protocol::wire::FrameCodec;
///
/// // let stream = TcpStream::connect(...).await?;
/// // let framed = Framed::new(stream, FrameCodec::new());
/// ```
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    /// Erstellt einen neuen `FrameCodec` mit Standard-Limits
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Erstellt einen `FrameCodec` mit benutzerdefinierter maximaler Frame-Groesse
    pub fn with_max_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Decoder-Implementierung
// ---------------------------------------------------------------------------

impl Decoder for FrameCodec {
    type Item = Empfangen;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Warte auf mindestens 4 Bytes fuer das Laengen-Feld
        if src.len() < LENGTH_FIELD_SIZE {
            return Ok(None);
        }

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

        let total_size = LENGTH_FIELD_SIZE + length;
        if src.len() < total_size {
            src.reserve(total_size - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_FIELD_SIZE);
        let payload = src.split_to(length);

        let ergebnis = serde_json::from_slice::<WireMessage>(&payload).map_err(|e| UngueltigerFrame {
            grund: format!("JSON-Deserialisierung fehlgeschlagen: {}", e),
        });

        Ok(Some(ergebnis))
    }
}

// ---------------------------------------------------------------------------
// Encoder-Implementierung
// ---------------------------------------------------------------------------

impl Encoder<WireMessage> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: WireMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_vec(&item).map_err(|e| {
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
    use crate::message::{Payload, Ping};

    fn frame_aus_bytes(json: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u32(json.len() as u32);
        buf.put_slice(json);
        buf
    }

    #[test]
    fn frame_codec_encode_decode() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(WireMessage::ping(42), &mut buf).unwrap();

        let payload_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        assert_eq!(buf.len(), LENGTH_FIELD_SIZE + payload_len);

        let decoded = codec
            .decode(&mut buf)
            .unwrap()
            .expect("Muss einen Frame enthalten")
            .expect("Frame muss gueltig sein");
        assert_eq!(decoded.payload, Payload::Ping(Ping { timestamp_ms: 42 }));
    }

    #[test]
    fn frame_codec_unvollstaendiger_frame() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(WireMessage::ping(1), &mut buf).unwrap();

        let half = buf.len() / 2;
        let mut partial = buf.split_to(half);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn frame_codec_zu_wenig_bytes_fuer_laengenfeld() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&[0x00, 0x00][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn frame_codec_ablehnung_zu_grosser_frame() {
        let mut codec = FrameCodec::with_max_size(100);
        let mut buf = frame_aus_bytes(&[b'x'; 200]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn frame_codec_ablehnung_beim_encode_zu_grosse_nachricht() {
        let mut codec = FrameCodec::with_max_size(10);
        let mut buf = BytesMut::new();
        assert!(codec.encode(WireMessage::ping(1), &mut buf).is_err());
    }

    #[test]
    fn ungueltiges_json_beendet_stream_nicht() {
        let mut codec = FrameCodec::new();
        let mut buf = frame_aus_bytes(b"{kein json");
        codec.encode(WireMessage::ping(7), &mut buf).unwrap();

        // Erster Frame: ungueltig, aber als Item gemeldet
        let erster = codec.decode(&mut buf).unwrap().expect("Frame erwartet");
        assert!(erster.is_err());

        // Zweiter Frame ist weiterhin lesbar
        let zweiter = codec.decode(&mut buf).unwrap().expect("Frame erwartet");
        assert!(matches!(zweiter, Ok(m) if m.payload == Payload::Ping(Ping { timestamp_ms: 7 })));
        assert!(buf.is_empty());
    }

    #[test]
    fn frame_codec_mehrere_nachrichten_im_buffer() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        for i in 0..3u64 {
            codec.encode(WireMessage::ping(i), &mut buf).unwrap();
        }
        for i in 0..3u64 {
            let msg = codec.decode(&mut buf).unwrap().unwrap().unwrap();
            assert_eq!(msg.payload, Payload::Ping(Ping { timestamp_ms: i }));
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn frame_codec_default_max_size() {
        assert_eq!(FrameCodec::new().max_frame_size(), DEFAULT_MAX_FRAME_SIZE);
    }
}
