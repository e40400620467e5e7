//! Binary codec for the emulated light-control protocol.
//!
//! Every datagram is a fixed 36-byte header followed by a fixed-length
//! payload whose layout is selected by the header's message code. All
//! integers are little-endian; ids and labels are fixed-length byte
//! buffers. Only the message set the Pop bridge actually speaks is
//! modeled; anything else decodes as [`Decoded::Unrecognized`].

use uuid::Uuid;

use crate::errors::Error;

type Result<T> = std::result::Result<T, Error>;

/// Fixed wire length of [`Header`].
pub const HEADER_LEN: usize = 36;

/// Fixed wire length of the `LightState` label field.
pub const LABEL_LEN: usize = 32;

/// All-zero target id, addressing every device on the site.
pub const BROADCAST_TARGET: [u8; 8] = [0; 8];

/// All-zero site id.
pub const BROADCAST_SITE: [u8; 6] = [0; 6];

/// Power level meaning "on" in `LightSetPower` and `LightState`.
pub const POWER_ON: u16 = 0xFFFF;

/// Power level meaning "off".
pub const POWER_OFF: u16 = 0;

const PROTOCOL_FLAGS: u16 = 0x0800;
const FLAG_BROADCAST: u16 = 0x2000;

/// Message codes understood by this bridge.
pub mod codes {
    pub const GET_VERSION: u16 = 32;
    pub const STATE_VERSION: u16 = 33;
    pub const ACKNOWLEDGMENT: u16 = 45;
    pub const LIGHT_GET: u16 = 101;
    pub const LIGHT_SET_COLOR: u16 = 102;
    pub const LIGHT_STATE: u16 = 107;
    pub const LIGHT_SET_POWER: u16 = 117;
}

/// The fixed packet header preceding every payload.
///
/// Header fields are transport bookkeeping. Two packets carrying the same
/// message compare equal regardless of how their headers differ; see
/// [`Packet`].
#[derive(Debug, Clone)]
pub struct Header {
    pub size: u16,
    pub protocol_flags: u16,
    pub source: u32,
    pub target: [u8; 8],
    pub site: [u8; 6],
    pub acknowledge: u8,
    pub sequence: u8,
    pub timestamp: u64,
    pub code: u16,
    pub reserved: u16,
}

impl Header {
    /// Parse the fixed-length header from the front of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Header> {
        if buf.len() < HEADER_LEN {
            return Err(Error::TruncatedHeader {
                got: buf.len(),
                need: HEADER_LEN,
            });
        }
        let mut target = [0u8; 8];
        target.copy_from_slice(&buf[8..16]);
        let mut site = [0u8; 6];
        site.copy_from_slice(&buf[16..22]);
        Ok(Header {
            size: read_u16(buf, 0),
            protocol_flags: read_u16(buf, 2),
            source: read_u32(buf, 4),
            target,
            site,
            acknowledge: buf[22],
            sequence: buf[23],
            timestamp: read_u64(buf, 24),
            code: read_u16(buf, 32),
            reserved: read_u16(buf, 34),
        })
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.size.to_le_bytes());
        out.extend_from_slice(&self.protocol_flags.to_le_bytes());
        out.extend_from_slice(&self.source.to_le_bytes());
        out.extend_from_slice(&self.target);
        out.extend_from_slice(&self.site);
        out.push(self.acknowledge);
        out.push(self.sequence);
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.extend_from_slice(&self.code.to_le_bytes());
        out.extend_from_slice(&self.reserved.to_le_bytes());
    }

    /// True when the broadcast flag bit is set.
    pub fn is_broadcast(&self) -> bool {
        self.protocol_flags & FLAG_BROADCAST != 0
    }
}

/// One message of the fixed protocol set, tagged by wire code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    GetVersion,
    StateVersion {
        vendor: u32,
        product: u32,
        version: u32,
    },
    Acknowledgment,
    LightGet,
    LightSetColor {
        stream: u8,
        hue: u16,
        saturation: u16,
        brightness: u16,
        kelvin: u16,
        duration: u32,
    },
    LightState {
        hue: u16,
        saturation: u16,
        brightness: u16,
        kelvin: u16,
        dim: i16,
        power: u16,
        label: String,
        tags: u64,
    },
    LightSetPower {
        level: u16,
        duration: u32,
    },
}

impl Message {
    /// The wire code identifying this message kind.
    pub fn code(&self) -> u16 {
        match self {
            Message::GetVersion => codes::GET_VERSION,
            Message::StateVersion { .. } => codes::STATE_VERSION,
            Message::Acknowledgment => codes::ACKNOWLEDGMENT,
            Message::LightGet => codes::LIGHT_GET,
            Message::LightSetColor { .. } => codes::LIGHT_SET_COLOR,
            Message::LightState { .. } => codes::LIGHT_STATE,
            Message::LightSetPower { .. } => codes::LIGHT_SET_POWER,
        }
    }

    fn encode_payload(&self, out: &mut Vec<u8>) {
        match self {
            Message::GetVersion | Message::Acknowledgment | Message::LightGet => {}
            Message::StateVersion {
                vendor,
                product,
                version,
            } => {
                out.extend_from_slice(&vendor.to_le_bytes());
                out.extend_from_slice(&product.to_le_bytes());
                out.extend_from_slice(&version.to_le_bytes());
            }
            Message::LightSetColor {
                stream,
                hue,
                saturation,
                brightness,
                kelvin,
                duration,
            } => {
                out.push(*stream);
                out.extend_from_slice(&hue.to_le_bytes());
                out.extend_from_slice(&saturation.to_le_bytes());
                out.extend_from_slice(&brightness.to_le_bytes());
                out.extend_from_slice(&kelvin.to_le_bytes());
                out.extend_from_slice(&duration.to_le_bytes());
            }
            Message::LightState {
                hue,
                saturation,
                brightness,
                kelvin,
                dim,
                power,
                label,
                tags,
            } => {
                out.extend_from_slice(&hue.to_le_bytes());
                out.extend_from_slice(&saturation.to_le_bytes());
                out.extend_from_slice(&brightness.to_le_bytes());
                out.extend_from_slice(&kelvin.to_le_bytes());
                out.extend_from_slice(&dim.to_le_bytes());
                out.extend_from_slice(&power.to_le_bytes());
                encode_label(label, out);
                out.extend_from_slice(&tags.to_le_bytes());
            }
            Message::LightSetPower { level, duration } => {
                out.extend_from_slice(&level.to_le_bytes());
                out.extend_from_slice(&duration.to_le_bytes());
            }
        }
    }
}

/// A decoded datagram: header plus message.
///
/// Equality deliberately compares the message only. Sequence numbers,
/// timestamps, and source ids are transport noise; the tracker relies on
/// this to tell a retransmission of the same action apart from a new one.
///
/// ```
/// use pop_http_rs::{Message, Session, decode, Decoded, BROADCAST_TARGET, BROADCAST_SITE};
///
/// let msg = Message::LightSetPower { level: 0xFFFF, duration: 1000 };
/// let a = Session::with_source(1).encode(&msg, BROADCAST_TARGET, BROADCAST_SITE);
/// let b = Session::with_source(2).encode(&msg, BROADCAST_TARGET, BROADCAST_SITE);
/// let (Ok(Decoded::Packet(a)), Ok(Decoded::Packet(b))) = (decode(&a), decode(&b)) else {
///     unreachable!();
/// };
/// assert_ne!(a.header.source, b.header.source);
/// assert_eq!(a, b);
/// ```
#[derive(Debug, Clone)]
pub struct Packet {
    pub header: Header,
    pub message: Message,
}

impl PartialEq for Packet {
    fn eq(&self, other: &Self) -> bool {
        self.message == other.message
    }
}

impl Eq for Packet {}

/// Result of decoding a datagram with a well-formed header.
#[derive(Debug, Clone)]
pub enum Decoded {
    /// The code matched a known message definition.
    Packet(Packet),
    /// The code is not part of the modeled message set. Not an error;
    /// the bridge ignores these datagrams.
    Unrecognized { code: u16 },
}

struct MessageDef {
    code: u16,
    payload_len: usize,
    decode: fn(&[u8]) -> Message,
}

// Closed registry of the message kinds this bridge speaks, one entry per
// wire code. Payload lengths are fixed by the protocol.
static MESSAGE_DEFS: [MessageDef; 7] = [
    MessageDef {
        code: codes::GET_VERSION,
        payload_len: 0,
        decode: decode_get_version,
    },
    MessageDef {
        code: codes::STATE_VERSION,
        payload_len: 12,
        decode: decode_state_version,
    },
    MessageDef {
        code: codes::ACKNOWLEDGMENT,
        payload_len: 0,
        decode: decode_acknowledgment,
    },
    MessageDef {
        code: codes::LIGHT_GET,
        payload_len: 0,
        decode: decode_light_get,
    },
    MessageDef {
        code: codes::LIGHT_SET_COLOR,
        payload_len: 13,
        decode: decode_light_set_color,
    },
    MessageDef {
        code: codes::LIGHT_STATE,
        payload_len: 52,
        decode: decode_light_state,
    },
    MessageDef {
        code: codes::LIGHT_SET_POWER,
        payload_len: 6,
        decode: decode_light_set_power,
    },
];

fn lookup(code: u16) -> Option<&'static MessageDef> {
    MESSAGE_DEFS.iter().find(|def| def.code == code)
}

/// Decode one datagram.
///
/// Fails only when the buffer is shorter than the header, or shorter than
/// the fixed payload length of a recognized code. Trailing bytes beyond
/// the payload are ignored.
pub fn decode(buf: &[u8]) -> Result<Decoded> {
    let header = Header::decode(buf)?;
    let Some(def) = lookup(header.code) else {
        return Ok(Decoded::Unrecognized { code: header.code });
    };
    let payload = &buf[HEADER_LEN..];
    if payload.len() < def.payload_len {
        return Err(Error::TruncatedPayload {
            code: header.code,
            got: buf.len(),
            need: HEADER_LEN + def.payload_len,
        });
    }
    let message = (def.decode)(&payload[..def.payload_len]);
    Ok(Decoded::Packet(Packet { header, message }))
}

/// Outbound encode context: one fixed random source id per process plus a
/// wrapping sequence counter.
///
/// The protocol wants replies stamped with a stable 32-bit source id and a
/// monotonically increasing sequence number. Keeping both in an explicit
/// value (rather than process globals) lets tests encode with fixed ids.
///
/// ```
/// use pop_http_rs::{Message, Session, BROADCAST_SITE};
///
/// let mut session = Session::with_source(0xDEAD_BEEF);
/// let bytes = session.encode(&Message::GetVersion, [1; 8], BROADCAST_SITE);
/// assert_eq!(bytes.len(), 36);
/// ```
#[derive(Debug)]
pub struct Session {
    source: u32,
    sequence: u8,
}

impl Session {
    /// Create a session with a random non-zero source id.
    pub fn new() -> Self {
        let bytes = Uuid::new_v4().into_bytes();
        let source = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]).max(1);
        Session::with_source(source)
    }

    /// Create a session with a fixed source id.
    pub fn with_source(source: u32) -> Self {
        Session {
            source,
            sequence: 0,
        }
    }

    /// Serialize `message` into a full datagram addressed to
    /// `target`/`site`.
    ///
    /// Sets the broadcast flag bit when the target id is all-zero. The
    /// sequence number increments before use and wraps at 256; timestamp
    /// and acknowledge are always zero.
    pub fn encode(&mut self, message: &Message, target: [u8; 8], site: [u8; 6]) -> Vec<u8> {
        self.sequence = self.sequence.wrapping_add(1);

        let mut payload = Vec::new();
        message.encode_payload(&mut payload);

        let mut protocol_flags = PROTOCOL_FLAGS;
        if target == BROADCAST_TARGET {
            protocol_flags |= FLAG_BROADCAST;
        }

        let header = Header {
            size: (HEADER_LEN + payload.len()) as u16,
            protocol_flags,
            source: self.source,
            target,
            site,
            acknowledge: 0,
            sequence: self.sequence,
            timestamp: 0,
            code: message.code(),
            reserved: 0,
        };

        let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
        header.encode(&mut out);
        out.extend_from_slice(&payload);
        out
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_get_version(_: &[u8]) -> Message {
    Message::GetVersion
}

fn decode_state_version(buf: &[u8]) -> Message {
    Message::StateVersion {
        vendor: read_u32(buf, 0),
        product: read_u32(buf, 4),
        version: read_u32(buf, 8),
    }
}

fn decode_acknowledgment(_: &[u8]) -> Message {
    Message::Acknowledgment
}

fn decode_light_get(_: &[u8]) -> Message {
    Message::LightGet
}

fn decode_light_set_color(buf: &[u8]) -> Message {
    Message::LightSetColor {
        stream: buf[0],
        hue: read_u16(buf, 1),
        saturation: read_u16(buf, 3),
        brightness: read_u16(buf, 5),
        kelvin: read_u16(buf, 7),
        duration: read_u32(buf, 9),
    }
}

fn decode_light_state(buf: &[u8]) -> Message {
    Message::LightState {
        hue: read_u16(buf, 0),
        saturation: read_u16(buf, 2),
        brightness: read_u16(buf, 4),
        kelvin: read_u16(buf, 6),
        dim: read_u16(buf, 8) as i16,
        power: read_u16(buf, 10),
        label: decode_label(&buf[12..12 + LABEL_LEN]),
        tags: read_u64(buf, 44),
    }
}

fn decode_light_set_power(buf: &[u8]) -> Message {
    Message::LightSetPower {
        level: read_u16(buf, 0),
        duration: read_u32(buf, 2),
    }
}

// Labels are null-padded on the wire and not guaranteed to be UTF-8.
// Decode up to the first null, replacing invalid sequences rather than
// failing the whole packet.
fn decode_label(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

fn encode_label(label: &str, out: &mut Vec<u8>) {
    let bytes = label.as_bytes();
    let n = bytes.len().min(LABEL_LEN);
    out.extend_from_slice(&bytes[..n]);
    out.resize(out.len() + (LABEL_LEN - n), 0);
}

fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn read_u64(buf: &[u8], off: usize) -> u64 {
    u64::from_le_bytes([
        buf[off],
        buf[off + 1],
        buf[off + 2],
        buf[off + 3],
        buf[off + 4],
        buf[off + 5],
        buf[off + 6],
        buf[off + 7],
    ])
}
