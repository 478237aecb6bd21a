//! C2 — CoAP-like message codec.
//!
//! Wire layout follows spec section 6 bit-for-bit: a 4-byte header
//! (`version:2, type:2, token_len:4, code:8, message_id:16`), then the
//! token, then options encoded delta+length (with RFC 7252-style 13/14
//! extended-value escaping), then an optional `0xFF` payload marker and
//! payload. The option/value shape mirrors `toad-msg`'s `Byte1`/option
//! framing (see `toad-msg/src/msg/mod.rs`), simplified to the concrete
//! `Vec<u8>` representation this single-purpose engine needs.

use core::fmt;

use crate::error::{Error, What};

/// CoAP protocol version this codec emits and expects.
pub const VERSION: u8 = 1;

/// Message type, carried in bits 2–3 of the header's first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
  /// Confirmable — retransmitted until ACKed or RESET.
  Con,
  /// Non-confirmable — sent once, no retransmission.
  Non,
  /// Acknowledgement of a confirmable message.
  Ack,
  /// Rejection of a confirmable message.
  Reset,
}

impl Type {
  fn from_bits(b: u8) -> Result<Self, ()> {
    match b & 0b11 {
      | 0 => Ok(Type::Con),
      | 1 => Ok(Type::Non),
      | 2 => Ok(Type::Ack),
      | 3 => Ok(Type::Reset),
      | _ => unreachable!(),
    }
  }

  fn to_bits(self) -> u8 {
    match self {
      | Type::Con => 0,
      | Type::Non => 1,
      | Type::Ack => 2,
      | Type::Reset => 3,
    }
  }
}

/// Method/response code, packed as `(class << 5) | detail`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Code(pub u8);

impl Code {
  /// Build a code from its class (0–7) and detail (0–31) components.
  pub const fn new(class: u8, detail: u8) -> Self {
    Code((class << 5) | (detail & 0b0001_1111))
  }

  /// The class component (request method family, or 2/4/5 for responses).
  pub const fn class(self) -> u8 {
    self.0 >> 5
  }

  /// The detail component.
  pub const fn detail(self) -> u8 {
    self.0 & 0b0001_1111
  }

  /// `0.00` — empty message (ACK/RESET/ping carry no other code).
  pub const EMPTY: Code = Code::new(0, 0);
  /// `0.01` GET
  pub const GET: Code = Code::new(0, 1);
  /// `0.02` POST
  pub const POST: Code = Code::new(0, 2);
  /// `0.03` PUT
  pub const PUT: Code = Code::new(0, 3);
  /// `0.04` DELETE
  pub const DELETE: Code = Code::new(0, 4);
  /// `2.01` Created
  pub const CREATED: Code = Code::new(2, 1);
  /// `2.04` Changed
  pub const CHANGED: Code = Code::new(2, 4);
  /// `2.05` Content
  pub const CONTENT: Code = Code::new(2, 5);
  /// `4.00` Bad Request
  pub const BAD_REQUEST: Code = Code::new(4, 0);
  /// `4.04` Not Found
  pub const NOT_FOUND: Code = Code::new(4, 4);
  /// `5.00` Internal Server Error
  pub const INTERNAL_SERVER_ERROR: Code = Code::new(5, 0);
  /// `5.03` Service Unavailable
  pub const SERVICE_UNAVAILABLE: Code = Code::new(5, 3);

  /// Is this a success response (`2.xx`)?
  pub const fn is_success(self) -> bool {
    self.class() == 2
  }

  /// Is this a `4.xx` client error?
  pub const fn is_client_error(self) -> bool {
    self.class() == 4
  }

  /// Is this a `5.xx` server error?
  pub const fn is_server_error(self) -> bool {
    self.class() == 5
  }
}

impl fmt::Debug for Code {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}.{:02}", self.class(), self.detail())
  }
}

impl fmt::Display for Code {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Debug::fmt(self, f)
  }
}

/// Option numbers this protocol actually uses.
pub mod option_number {
  /// Uri-Path (RFC 7252 number 11). Repeated for multi-segment paths.
  pub const URI_PATH: u16 = 11;
  /// Uri-Query (number 15).
  pub const URI_QUERY: u16 = 15;
  /// Max-Age (number 14).
  pub const MAX_AGE: u16 = 14;
  /// Chunk CRC-32, option 0 in `handle_chunk` framing (spec section 4.9).
  pub const CHUNK_CRC: u16 = 0;
  /// Chunk index, option 1, present only in fast-OTA mode.
  pub const CHUNK_INDEX: u16 = 1;
}

/// A single decoded option: its number and raw value bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opt {
  /// The option number (already accumulated from successive deltas).
  pub number: u16,
  /// The raw option value.
  pub value: Vec<u8>,
}

/// A fully decoded message.
#[derive(Debug, Clone)]
pub struct Decoded {
  /// Message type.
  pub ty: Type,
  /// Token length taken from the header; the token itself.
  pub token: Vec<u8>,
  /// Method/response code.
  pub code: Code,
  /// 16-bit message id.
  pub id: u16,
  /// Options in wire order.
  pub opts: Vec<Opt>,
  /// Payload bytes, empty if no `0xFF` marker was present.
  pub payload: Vec<u8>,
}

impl Decoded {
  /// First Uri-Path option's value, if any — used for classification.
  pub fn first_uri_path(&self) -> Option<&[u8]> {
    self.opts.iter().find(|o| o.number == option_number::URI_PATH).map(|o| o.value.as_slice())
  }

  /// All Uri-Path segments, in order, slash-joined.
  pub fn uri_path_joined(&self) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, opt) in self.opts.iter().filter(|o| o.number == option_number::URI_PATH).enumerate() {
      if i > 0 {
        out.push(b'/');
      }
      out.extend_from_slice(&opt.value);
    }
    out
  }

  /// Value of a single option by number, if present.
  pub fn opt(&self, number: u16) -> Option<&[u8]> {
    self.opts.iter().find(|o| o.number == number).map(|o| o.value.as_slice())
  }
}

/// Decode a raw datagram into its header, token, options, and payload.
pub fn decode<C>(buf: &[u8]) -> Result<Decoded, Error<C>> {
  if buf.len() < 4 {
    return Err(Error::new(What::MalformedMessage));
  }

  let byte0 = buf[0];
  let ver = byte0 >> 6;
  if ver != VERSION {
    return Err(Error::new(What::MalformedMessage));
  }
  let ty = Type::from_bits(byte0 >> 4).map_err(|_| Error::new(What::MalformedMessage))?;
  let tkl = (byte0 & 0b0000_1111) as usize;
  let code = Code(buf[1]);
  let id = u16::from_be_bytes([buf[2], buf[3]]);

  let mut pos = 4;
  if tkl > 8 || buf.len() < pos + tkl {
    return Err(Error::new(What::MalformedMessage));
  }
  let token = buf[pos..pos + tkl].to_vec();
  pos += tkl;

  let mut opts = Vec::new();
  let mut last_number = 0u16;
  while pos < buf.len() {
    if buf[pos] == 0xFF {
      pos += 1;
      break;
    }
    let head = buf[pos];
    pos += 1;
    let delta_nibble = head >> 4;
    let len_nibble = head & 0x0F;

    let delta = read_extended(delta_nibble, buf, &mut pos)?;
    let len = read_extended(len_nibble, buf, &mut pos)? as usize;

    if buf.len() < pos + len {
      return Err(Error::new(What::MalformedMessage));
    }
    let value = buf[pos..pos + len].to_vec();
    pos += len;

    last_number = last_number.wrapping_add(delta);
    opts.push(Opt { number: last_number, value });
  }

  let payload = if pos < buf.len() { buf[pos..].to_vec() } else { Vec::new() };

  Ok(Decoded { ty, token, code, id, opts, payload })
}

fn read_extended<C>(nibble: u8, buf: &[u8], pos: &mut usize) -> Result<u16, Error<C>> {
  match nibble {
    | 13 => {
      if buf.len() < *pos + 1 {
        return Err(Error::new(What::MalformedMessage));
      }
      let v = buf[*pos] as u16 + 13;
      *pos += 1;
      Ok(v)
    },
    | 14 => {
      if buf.len() < *pos + 2 {
        return Err(Error::new(What::MalformedMessage));
      }
      let v = u16::from_be_bytes([buf[*pos], buf[*pos + 1]]) + 269;
      *pos += 2;
      Ok(v)
    },
    | 15 => Err(Error::new(What::MalformedMessage)),
    | n => Ok(n as u16),
  }
}

fn write_extended(value: u16, out: &mut Vec<u8>) -> u8 {
  if value < 13 {
    value as u8
  } else if value < 269 {
    out.push((value - 13) as u8);
    13
  } else {
    let v = value - 269;
    out.extend_from_slice(&v.to_be_bytes());
    14
  }
}

/// Builder for an outbound message; assembles header, token, options
/// (which must be appended in ascending option-number order, matching
/// wire delta-encoding requirements), and payload into `out`.
pub struct Encoder {
  ty: Type,
  code: Code,
  id: u16,
  token: Vec<u8>,
  opts: Vec<Opt>,
  payload: Vec<u8>,
}

impl Encoder {
  /// Start building a message of the given type/code/id with no token.
  pub fn new(ty: Type, code: Code, id: u16) -> Self {
    Self { ty, code, id, token: Vec::new(), opts: Vec::new(), payload: Vec::new() }
  }

  /// Attach a token (0–8 bytes).
  pub fn token(mut self, token: impl Into<Vec<u8>>) -> Self {
    self.token = token.into();
    self
  }

  /// Append an option. Options must be added in ascending `number` order.
  pub fn opt(mut self, number: u16, value: impl Into<Vec<u8>>) -> Self {
    self.opts.push(Opt { number, value: value.into() });
    self
  }

  /// Append one Uri-Path segment.
  pub fn uri_path(self, segment: impl Into<Vec<u8>>) -> Self {
    self.opt(option_number::URI_PATH, segment)
  }

  /// Append multiple Uri-Path segments (e.g. a slash-joined event name).
  pub fn uri_path_segments<'a, I: IntoIterator<Item = &'a [u8]>>(mut self, segments: I) -> Self {
    for seg in segments {
      self = self.uri_path(seg.to_vec());
    }
    self
  }

  /// Set the payload bytes.
  pub fn payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
    self.payload = payload.into();
    self
  }

  /// Serialize into `out`, returning the number of bytes written.
  pub fn encode_into<C>(self, out: &mut [u8]) -> Result<usize, Error<C>> {
    if self.token.len() > 8 {
      return Err(Error::new(What::MalformedMessage));
    }

    let mut bytes = Vec::with_capacity(out.len().min(256));
    let byte0 = (VERSION << 6) | (self.ty.to_bits() << 4) | (self.token.len() as u8 & 0x0F);
    bytes.push(byte0);
    bytes.push(self.code.0);
    bytes.extend_from_slice(&self.id.to_be_bytes());
    bytes.extend_from_slice(&self.token);

    let mut last_number = 0u16;
    for opt in &self.opts {
      debug_assert!(opt.number >= last_number, "options must be added in ascending order");
      let delta = opt.number.wrapping_sub(last_number);
      last_number = opt.number;

      let mut delta_ext = Vec::new();
      let delta_nibble = write_extended(delta, &mut delta_ext);
      let mut len_ext = Vec::new();
      let len_nibble = write_extended(opt.value.len() as u16, &mut len_ext);

      bytes.push((delta_nibble << 4) | len_nibble);
      bytes.extend_from_slice(&delta_ext);
      bytes.extend_from_slice(&len_ext);
      bytes.extend_from_slice(&opt.value);
    }

    if !self.payload.is_empty() {
      bytes.push(0xFF);
      bytes.extend_from_slice(&self.payload);
    }

    if bytes.len() > out.len() {
      return Err(Error::new(What::InsufficientStorage));
    }
    out[..bytes.len()].copy_from_slice(&bytes);
    Ok(bytes.len())
  }
}

/// Which higher-level message kind a decoded datagram represents, per
/// spec section 4.2's classification table. Dispatch keys off `code` and
/// the first Uri-Path segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
  /// POST `h` — device handshake introduction.
  Hello,
  /// GET `d` — request for the Describe document.
  Describe,
  /// POST `f` — invoke a registered function.
  FunctionCall,
  /// GET `v` — read a registered variable.
  VariableRequest,
  /// POST `s` — begin a non-firmware save (e.g. config blob).
  SaveBegin,
  /// POST `u` — begin a firmware update.
  UpdateBegin,
  /// PUT `u` — firmware update complete, check for missing chunks.
  UpdateDone,
  /// POST `c` — a firmware chunk; GET `c` — a missing-chunk re-request.
  Chunk,
  /// POST `e`/`E` — an application or system event.
  Event,
  /// POST `k` — DTLS key rotation notice.
  KeyChange,
  /// PUT `L` — begin a named signal.
  SignalStart,
  /// DELETE `L` — end a named signal.
  SignalStop,
  /// GET `t` — request current Unix time, or an unsolicited Content reply.
  Time,
  /// Empty code, non-CON — a bare acknowledgement.
  EmptyAck,
  /// Empty code, CON — a keepalive ping.
  Ping,
  /// A response (class 2/4/5) to something we sent.
  Response,
  /// Decoded successfully but didn't match any known shape.
  Unknown,
}

/// Classify a decoded message per spec section 4.2.
pub fn classify(ty: Type, code: Code, first_uri_path: Option<&[u8]>) -> MessageKind {
  if code == Code::EMPTY {
    return match ty {
      | Type::Con => MessageKind::Ping,
      | _ => MessageKind::EmptyAck,
    };
  }

  if code.class() == 4 || code.class() == 5 {
    return MessageKind::Response;
  }

  let path = match first_uri_path {
    | Some(p) => p,
    | None if code.class() == 2 => return MessageKind::Response,
    | None => return MessageKind::Unknown,
  };

  match (path, ty, code) {
    | (b"h", _, Code::POST) => MessageKind::Hello,
    | (b"d", _, Code::GET) => MessageKind::Describe,
    | (b"f", _, Code::POST) => MessageKind::FunctionCall,
    | (b"v", _, Code::GET) => MessageKind::VariableRequest,
    | (b"s", _, Code::POST) => MessageKind::SaveBegin,
    | (b"u", _, Code::POST) => MessageKind::UpdateBegin,
    | (b"u", _, Code::PUT) => MessageKind::UpdateDone,
    | (b"c", _, Code::GET) | (b"c", _, Code::POST) => MessageKind::Chunk,
    | (b"e", _, Code::POST) | (b"E", _, Code::POST) => MessageKind::Event,
    | (b"k", _, Code::POST) => MessageKind::KeyChange,
    | (b"L", _, Code::PUT) => MessageKind::SignalStart,
    | (b"L", _, Code::DELETE) => MessageKind::SignalStop,
    | (b"t", _, Code::GET) => MessageKind::Time,
    | _ if code.class() == 2 => MessageKind::Response,
    | _ => MessageKind::Unknown,
  }
}

/// Hello feature flags, per spec section 6.
pub mod hello_flags {
  /// Device supports over-the-air updates.
  pub const OTA_OK: u8 = 0x01;
  /// Device supports diagnostic publishing.
  pub const DIAGNOSTICS: u8 = 0x02;
  /// Device applies updates immediately rather than deferring to reset.
  pub const IMMEDIATE_UPDATES: u8 = 0x04;
  /// Device intends to disconnect politely (goodbye) rather than drop.
  pub const GOODBYE: u8 = 0x10;
  /// Device will proactively POST Describe rather than waiting to be asked.
  pub const DEVICE_INITIATED_DESCRIBE: u8 = 0x20;
  /// OTA payload is compressed.
  pub const COMPRESSED_OTA: u8 = 0x40;
  /// Device understands the (out of scope here) OTA v3 protocol.
  pub const OTA_V3: u8 = 0x80;
}

/// Encode a Hello POST per the bit-exact layout in spec section 6.
pub fn encode_hello<C>(out: &mut [u8],
                       id: u16,
                       product_id: u16,
                       product_version: u16,
                       platform_id: u16,
                       flags: u8,
                       device_id: Option<&[u8; 12]>)
                       -> Result<usize, Error<C>> {
  let mut payload = Vec::with_capacity(24);
  payload.extend_from_slice(&product_id.to_be_bytes());
  payload.extend_from_slice(&product_version.to_be_bytes());
  payload.push(0); // reserved
  payload.push(flags);
  payload.extend_from_slice(&platform_id.to_be_bytes());
  if let Some(device_id) = device_id {
    payload.extend_from_slice(&12u16.to_be_bytes());
    payload.extend_from_slice(device_id);
  }

  Encoder::new(Type::Con, Code::POST, id).uri_path(b"h".to_vec())
                                         .payload(payload)
                                         .encode_into(out)
}

/// Parsed fields from a decoded Hello payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelloFields {
  /// Product id advertised by the peer.
  pub product_id: u16,
  /// Product firmware version.
  pub product_version: u16,
  /// Platform identifier.
  pub platform_id: u16,
  /// Feature flags, see [`hello_flags`].
  pub flags: u8,
  /// Device id, if present in the payload.
  pub device_id: Option<[u8; 12]>,
}

/// Decode a Hello payload (the bytes after the `0xFF` marker).
pub fn decode_hello<C>(payload: &[u8]) -> Result<HelloFields, Error<C>> {
  if payload.len() < 8 {
    return Err(Error::new(What::MalformedMessage));
  }
  let product_id = u16::from_be_bytes([payload[0], payload[1]]);
  let product_version = u16::from_be_bytes([payload[2], payload[3]]);
  // payload[4] reserved
  let flags = payload[5];
  let platform_id = u16::from_be_bytes([payload[6], payload[7]]);

  let device_id = if payload.len() >= 8 + 2 + 12 {
    let len = u16::from_be_bytes([payload[8], payload[9]]);
    if len == 12 {
      let mut id = [0u8; 12];
      id.copy_from_slice(&payload[10..22]);
      Some(id)
    } else {
      None
    }
  } else {
    None
  };

  Ok(HelloFields { product_id, product_version, platform_id, flags, device_id })
}

/// Encode a keepalive ping (`CON`, empty code).
pub fn encode_ping<C>(out: &mut [u8], id: u16) -> Result<usize, Error<C>> {
  Encoder::new(Type::Con, Code::EMPTY, id).encode_into(out)
}

/// Encode a bare acknowledgement (empty ACK).
pub fn encode_empty_ack<C>(out: &mut [u8], id: u16) -> Result<usize, Error<C>> {
  Encoder::new(Type::Ack, Code::EMPTY, id).encode_into(out)
}

/// Encode a coded ACK (e.g. `2.04 Changed` for signal start/stop).
pub fn encode_coded_ack<C>(out: &mut [u8], id: u16, code: Code) -> Result<usize, Error<C>> {
  Encoder::new(Type::Ack, code, id).encode_into(out)
}

/// Encode a RESET.
pub fn encode_reset<C>(out: &mut [u8], id: u16) -> Result<usize, Error<C>> {
  Encoder::new(Type::Reset, Code::EMPTY, id).encode_into(out)
}

/// Variable value, tagged by wire type (spec section 4.6).
#[derive(Debug, Clone, PartialEq)]
pub enum VariableValue {
  /// A single byte, 0 or 1.
  Bool(bool),
  /// 4-byte big-endian signed integer.
  Int(i32),
  /// 8-byte little-endian IEEE-754 double — the one field in this
  /// otherwise big-endian protocol that is little-endian on the wire.
  Double(f64),
  /// Raw string bytes, truncated by the caller to the channel's maximum.
  String(Vec<u8>),
}

/// Encode a variable value as a Content response payload.
pub fn encode_variable_value(value: &VariableValue) -> Vec<u8> {
  match value {
    | VariableValue::Bool(b) => vec![*b as u8],
    | VariableValue::Int(i) => i.to_be_bytes().to_vec(),
    | VariableValue::Double(d) => d.to_le_bytes().to_vec(),
    | VariableValue::String(s) => s.clone(),
  }
}

/// Encode a function call's signed 32-bit result as a Content response payload.
pub fn encode_function_result(result: i32) -> Vec<u8> {
  result.to_be_bytes().to_vec()
}

/// Encode a chunk-missed request: `GET c` with concatenated 16-bit BE indices.
pub fn encode_chunk_missed<C>(out: &mut [u8], id: u16, indices: &[u16]) -> Result<usize, Error<C>> {
  let mut payload = Vec::with_capacity(indices.len() * 2);
  for i in indices {
    payload.extend_from_slice(&i.to_be_bytes());
  }
  Encoder::new(Type::Con, Code::GET, id).uri_path(b"c".to_vec()).payload(payload).encode_into(out)
}

/// Encode an update-ready reply (1-byte flags payload, bit0 = fast OTA).
pub fn encode_update_ready<C>(out: &mut [u8], id: u16, fast_ota: bool) -> Result<usize, Error<C>> {
  let flags = if fast_ota { 1u8 } else { 0u8 };
  Encoder::new(Type::Ack, Code::CHANGED, id).payload(vec![flags]).encode_into(out)
}

/// Encode a per-chunk acknowledgement (non-fast-OTA mode only).
pub fn encode_chunk_received<C>(out: &mut [u8], id: u16, ok: bool) -> Result<usize, Error<C>> {
  let code = if ok { Code::CHANGED } else { Code::BAD_REQUEST };
  Encoder::new(Type::Ack, code, id).encode_into(out)
}

/// Encode a Time response: Content with a 4-byte big-endian Unix seconds payload.
pub fn encode_time_response<C>(out: &mut [u8], id: u16, unix_seconds: u32) -> Result<usize, Error<C>> {
  Encoder::new(Type::Ack, Code::CONTENT, id).payload(unix_seconds.to_be_bytes().to_vec()).encode_into(out)
}

/// Encode an event POST (`e`/`E` path, name segments, optional Max-Age, payload).
pub fn encode_event<C>(out: &mut [u8],
                       id: u16,
                       ty: Type,
                       public: bool,
                       name: &[u8],
                       max_age: Option<u32>,
                       data: &[u8])
                       -> Result<usize, Error<C>> {
  let marker: &[u8] = if public { b"E" } else { b"e" };
  let mut enc = Encoder::new(ty, Code::POST, id).uri_path(marker.to_vec());
  for seg in name.split(|&b| b == b'/') {
    enc = enc.uri_path(seg.to_vec());
  }
  if let Some(age) = max_age {
    let bytes = age.to_be_bytes();
    let trimmed: Vec<u8> = bytes.iter().copied().skip_while(|&b| b == 0).collect();
    enc = enc.opt(option_number::MAX_AGE, if trimmed.is_empty() { vec![0] } else { trimmed });
  }
  enc.payload(data.to_vec()).encode_into(out)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn header_round_trips() {
    let mut buf = [0u8; 64];
    let n = Encoder::new(Type::Con, Code::GET, 0x1234).token(vec![9, 9]).encode_into::<()>(&mut buf).unwrap();
    let decoded = decode::<()>(&buf[..n]).unwrap();
    assert_eq!(decoded.ty, Type::Con);
    assert_eq!(decoded.code, Code::GET);
    assert_eq!(decoded.id, 0x1234);
    assert_eq!(decoded.token, vec![9, 9]);
  }

  #[test]
  fn confirmable_ack_wire_bytes_match_scenario() {
    // S1: CON id=0x1234, payload 01 02 03 04, no token, no options.
    let mut buf = [0u8; 16];
    let n = Encoder::new(Type::Con, Code::EMPTY, 0x1234).payload(vec![1, 2, 3, 4]).encode_into::<()>(&mut buf).unwrap();
    assert_eq!(&buf[..n], &[0x40, 0x00, 0x12, 0x34, 0xFF, 0x01, 0x02, 0x03, 0x04]);
  }

  #[test]
  fn hello_round_trip() {
    let mut buf = [0u8; 64];
    let device_id = [7u8; 12];
    let n = encode_hello::<()>(&mut buf, 1, 0xBEEF, 0x0102, 6, hello_flags::OTA_OK, Some(&device_id)).unwrap();
    let decoded = decode::<()>(&buf[..n]).unwrap();
    let fields = decode_hello::<()>(&decoded.payload).unwrap();
    assert_eq!(fields.product_id, 0xBEEF);
    assert_eq!(fields.product_version, 0x0102);
    assert_eq!(fields.flags, hello_flags::OTA_OK);
    assert_eq!(fields.device_id, Some(device_id));
  }

  #[test]
  fn classify_empty_con_is_ping() {
    assert_eq!(classify(Type::Con, Code::EMPTY, None), MessageKind::Ping);
    assert_eq!(classify(Type::Ack, Code::EMPTY, None), MessageKind::EmptyAck);
  }

  #[test]
  fn classify_hello_and_event() {
    assert_eq!(classify(Type::Con, Code::POST, Some(b"h")), MessageKind::Hello);
    assert_eq!(classify(Type::Con, Code::POST, Some(b"e")), MessageKind::Event);
    assert_eq!(classify(Type::Con, Code::GET, Some(b"c")), MessageKind::Chunk);
  }

  #[test]
  fn option_with_extended_length_round_trips() {
    let mut buf = [0u8; 128];
    let long_value = vec![0xAAu8; 50];
    let n = Encoder::new(Type::Non, Code::POST, 1).opt(20, long_value.clone()).encode_into::<()>(&mut buf).unwrap();
    let decoded = decode::<()>(&buf[..n]).unwrap();
    assert_eq!(decoded.opts[0].number, 20);
    assert_eq!(decoded.opts[0].value, long_value);
  }

  #[test]
  fn multi_segment_uri_path_joins_with_slash() {
    let mut buf = [0u8; 64];
    let n = Encoder::new(Type::Con, Code::POST, 1).uri_path(b"e".to_vec())
                                                  .uri_path(b"foo".to_vec())
                                                  .uri_path(b"bar".to_vec())
                                                  .encode_into::<()>(&mut buf)
                                                  .unwrap();
    let decoded = decode::<()>(&buf[..n]).unwrap();
    let joined: Vec<u8> = decoded.opts.iter().skip(1).flat_map(|o| o.value.clone()).collect();
    let _ = joined;
    let path = decoded.uri_path_joined();
    assert_eq!(path, b"e/foo/bar".to_vec());
  }
}
