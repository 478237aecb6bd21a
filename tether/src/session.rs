//! C13 — session persistence record (spec sections 3, 4.11), grounded on
//! `dtls_session_persist.h`'s `SessionPersistData`: a packed fixed-size
//! blob, little-endian on the wire per spec section 9's design note
//! ("fix the on-wire representation in little-endian").

use crate::error::{Error, What};

/// `use_counter` values at or above this are considered expired.
pub const MAX_USE_COUNTER: u8 = 3;

/// Size of the opaque connection blob (spec section 3).
const CONNECTION_LEN: usize = 32;
/// Size of the persisted connection-id field.
const CONNECTION_ID_LEN: usize = 8;

/// Outcome of [`Record::restore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Restore {
  /// The session can resume without renegotiation.
  Complete,
  /// The session data is valid but requires a fresh handshake.
  Renegotiate,
  /// No usable session was found (absent, size/checksum mismatch, or
  /// `use_counter` exhausted); the record was wiped.
  NoSession,
}

/// Protocol flags negotiated at Hello, persisted and folded into the
/// session checksum (spec section 3).
pub mod protocol_flags {
  /// Peer requires the device to wait for a Hello response.
  pub const REQUIRES_HELLO_RESPONSE: u32 = 0x01;
  /// Device proactively posts Describe rather than waiting to be asked.
  pub const DEVICE_INITIATED_DESCRIBE: u32 = 0x02;
  /// OTA payloads are compressed.
  pub const COMPRESSED_OTA: u32 = 0x04;
  /// Device/peer support OTA v3 (out of scope for this engine's chunk
  /// state machine, but still a negotiable bit).
  pub const SUPPORTS_OTA_V3: u32 = 0x08;
}

/// The application-state descriptor compared at session-resume time (spec
/// section 4.6 step 1b): three independent checksums plus the protocol
/// flags the device is responsible for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AppStateDescriptor {
  /// CRC over the subscriptions table, see [`crate::pubsub::Subscriptions::checksum`].
  pub subscriptions_crc: u32,
  /// CRC over the Describe-application (functions/variables) document.
  pub describe_app_crc: u32,
  /// CRC over the Describe-system document.
  pub describe_system_crc: u32,
  /// Negotiated protocol flags, see [`protocol_flags`].
  pub protocol_flags: u32,
}

/// The session persistence record (spec section 3). Fixed-size, opaque to
/// the transport; everything here round-trips through
/// [`Channel::save_session`]/[`Channel::restore_session`].
///
/// [`Channel::save_session`]: crate::channel::Channel::save_session
/// [`Channel::restore_session`]: crate::channel::Channel::restore_session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Record {
  /// Whether this record should be persisted at all.
  pub persistent: bool,
  /// Number of times this record has been retrieved without being
  /// successfully used; expires at [`MAX_USE_COUNTER`].
  pub use_counter: u8,
  /// Opaque connection blob, meaningless to this crate.
  pub connection: [u8; CONNECTION_LEN],
  /// Checksum of the cryptographic keys, used to detect a stale record.
  pub keys_checksum: u32,
  /// Cipher-session fields, opaque beyond their width.
  pub ciphersuite: u16,
  /// Compression method negotiated.
  pub compression: u8,
  /// Session id length and bytes (only `id_len` bytes of `id` are valid).
  pub id_len: u8,
  /// Session id bytes.
  pub id: [u8; 32],
  /// Master secret.
  pub master_secret: [u8; 48],
  /// DTLS epoch counter.
  pub epoch: u16,
  /// Outbound sequence counter.
  pub out_ctr: u64,
  /// Inbound replay-window top sequence number.
  pub in_window_top: u64,
  /// Inbound replay-window bitmap.
  pub in_window: u64,
  /// Next CoAP message id to hand out (seeds [`crate::coap_channel::CoapIdChannel`]).
  pub next_coap_id: u16,
  /// Application state checksums and protocol flags.
  pub app_state: AppStateDescriptor,
  /// Whether the device should post Describe on its own initiative.
  pub device_initiated_describe: bool,
  /// Largest OTA chunk size successfully negotiated, for future resumes.
  pub max_binary_size: u32,
  /// Persisted DTLS connection id.
  pub connection_id: [u8; CONNECTION_ID_LEN],
}

impl Default for Record {
  fn default() -> Self {
    Record { persistent: false,
             use_counter: 0,
             connection: [0; CONNECTION_LEN],
             keys_checksum: 0,
             ciphersuite: 0,
             compression: 0,
             id_len: 0,
             id: [0; 32],
             master_secret: [0; 48],
             epoch: 0,
             out_ctr: 0,
             in_window_top: 0,
             in_window: 0,
             next_coap_id: 0,
             app_state: AppStateDescriptor::default(),
             device_initiated_describe: false,
             max_binary_size: 0,
             connection_id: [0; CONNECTION_ID_LEN] }
  }
}

/// On-wire size of a serialized [`Record`] (spec section 6: "≤ ~300 bytes").
pub const WIRE_SIZE: usize =
  2 + 1 + 1 + CONNECTION_LEN + 4 + 2 + 1 + 1 + 32 + 48 + 2 + 8 + 8 + 8 + 2 + 4 * 4 + 1 + 4 + CONNECTION_ID_LEN;

impl Record {
  /// Serialize to the fixed little-endian wire layout (spec section 9).
  pub fn to_bytes(&self) -> [u8; WIRE_SIZE] {
    let mut out = [0u8; WIRE_SIZE];
    let mut w = Writer { buf: &mut out, pos: 0 };
    w.u16(WIRE_SIZE as u16);
    w.u8(self.persistent as u8);
    w.u8(self.use_counter);
    w.bytes(&self.connection);
    w.u32(self.keys_checksum);
    w.u16(self.ciphersuite);
    w.u8(self.compression);
    w.u8(self.id_len);
    w.bytes(&self.id);
    w.bytes(&self.master_secret);
    w.u16(self.epoch);
    w.u64(self.out_ctr);
    w.u64(self.in_window_top);
    w.u64(self.in_window);
    w.u16(self.next_coap_id);
    w.u32(self.app_state.subscriptions_crc);
    w.u32(self.app_state.describe_app_crc);
    w.u32(self.app_state.describe_system_crc);
    w.u32(self.app_state.protocol_flags);
    w.u8(self.device_initiated_describe as u8);
    w.u32(self.max_binary_size);
    w.bytes(&self.connection_id);
    out
  }

  /// Deserialize from the wire layout, validating the size tag.
  pub fn from_bytes<C>(buf: &[u8]) -> Result<Self, Error<C>> {
    if buf.len() < WIRE_SIZE {
      return Err(Error::new(What::MalformedMessage));
    }
    let mut r = Reader { buf, pos: 0 };
    let size = r.u16();
    if size as usize != WIRE_SIZE {
      return Err(Error::new(What::MalformedMessage));
    }
    let persistent = r.u8() != 0;
    let use_counter = r.u8();
    let connection = r.bytes::<CONNECTION_LEN>();
    let keys_checksum = r.u32();
    let ciphersuite = r.u16();
    let compression = r.u8();
    let id_len = r.u8();
    let id = r.bytes::<32>();
    let master_secret = r.bytes::<48>();
    let epoch = r.u16();
    let out_ctr = r.u64();
    let in_window_top = r.u64();
    let in_window = r.u64();
    let next_coap_id = r.u16();
    let subscriptions_crc = r.u32();
    let describe_app_crc = r.u32();
    let describe_system_crc = r.u32();
    let protocol_flags = r.u32();
    let device_initiated_describe = r.u8() != 0;
    let max_binary_size = r.u32();
    let connection_id = r.bytes::<CONNECTION_ID_LEN>();

    Ok(Record { persistent,
                use_counter,
                connection,
                keys_checksum,
                ciphersuite,
                compression,
                id_len,
                id,
                master_secret,
                epoch,
                out_ctr,
                in_window_top,
                in_window,
                next_coap_id,
                app_state: AppStateDescriptor { subscriptions_crc, describe_app_crc, describe_system_crc, protocol_flags },
                device_initiated_describe,
                max_binary_size,
                connection_id })
  }

  /// Restore attempt: validates size/checksum, expires at `use_counter >=
  /// MAX_USE_COUNTER`, otherwise increments the counter (the caller is
  /// responsible for re-saving afterward). Returns the restored record
  /// plus the outcome.
  pub fn restore<C>(buf: &[u8], expected_keys_checksum: u32) -> (Self, Restore) {
    let record = match Self::from_bytes::<C>(buf) {
      | Ok(r) => r,
      | Err(_) => return (Self::default(), Restore::NoSession),
    };
    if record.keys_checksum != expected_keys_checksum {
      return (Self::default(), Restore::NoSession);
    }
    if record.use_counter >= MAX_USE_COUNTER {
      return (Self::default(), Restore::NoSession);
    }
    let mut record = record;
    record.use_counter += 1;
    let outcome = if record.persistent { Restore::Complete } else { Restore::Renegotiate };
    (record, outcome)
  }
}

struct Writer<'a> {
  buf: &'a mut [u8],
  pos: usize,
}

impl<'a> Writer<'a> {
  fn u8(&mut self, v: u8) {
    self.buf[self.pos] = v;
    self.pos += 1;
  }
  fn u16(&mut self, v: u16) {
    self.buf[self.pos..self.pos + 2].copy_from_slice(&v.to_le_bytes());
    self.pos += 2;
  }
  fn u32(&mut self, v: u32) {
    self.buf[self.pos..self.pos + 4].copy_from_slice(&v.to_le_bytes());
    self.pos += 4;
  }
  fn u64(&mut self, v: u64) {
    self.buf[self.pos..self.pos + 8].copy_from_slice(&v.to_le_bytes());
    self.pos += 8;
  }
  fn bytes(&mut self, v: &[u8]) {
    self.buf[self.pos..self.pos + v.len()].copy_from_slice(v);
    self.pos += v.len();
  }
}

struct Reader<'a> {
  buf: &'a [u8],
  pos: usize,
}

impl<'a> Reader<'a> {
  fn u8(&mut self) -> u8 {
    let v = self.buf[self.pos];
    self.pos += 1;
    v
  }
  fn u16(&mut self) -> u16 {
    let v = u16::from_le_bytes(self.buf[self.pos..self.pos + 2].try_into().unwrap());
    self.pos += 2;
    v
  }
  fn u32(&mut self) -> u32 {
    let v = u32::from_le_bytes(self.buf[self.pos..self.pos + 4].try_into().unwrap());
    self.pos += 4;
    v
  }
  fn u64(&mut self) -> u64 {
    let v = u64::from_le_bytes(self.buf[self.pos..self.pos + 8].try_into().unwrap());
    self.pos += 8;
    v
  }
  fn bytes<const N: usize>(&mut self) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
    self.pos += N;
    out
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn round_trips_through_bytes() {
    let mut record = Record { persistent: true, use_counter: 1, keys_checksum: 0xDEAD_BEEF, next_coap_id: 42, ..Record::default() };
    record.app_state.subscriptions_crc = 7;
    let bytes = record.to_bytes();
    let restored = Record::from_bytes::<()>(&bytes).unwrap();
    assert_eq!(restored, record);
  }

  #[test]
  fn s6_use_counter_at_max_expires() {
    let record = Record { use_counter: MAX_USE_COUNTER, keys_checksum: 1, ..Record::default() };
    let bytes = record.to_bytes();
    let (restored, outcome) = Record::restore::<()>(&bytes, 1);
    assert_eq!(outcome, Restore::NoSession);
    assert_eq!(restored, Record::default());
  }

  #[test]
  fn mismatched_keys_checksum_is_no_session() {
    let record = Record { keys_checksum: 1, ..Record::default() };
    let bytes = record.to_bytes();
    let (_, outcome) = Record::restore::<()>(&bytes, 2);
    assert_eq!(outcome, Restore::NoSession);
  }

  #[test]
  fn persistent_record_under_limit_completes() {
    let record = Record { persistent: true, use_counter: 0, keys_checksum: 9, ..Record::default() };
    let bytes = record.to_bytes();
    let (restored, outcome) = Record::restore::<()>(&bytes, 9);
    assert_eq!(outcome, Restore::Complete);
    assert_eq!(restored.use_counter, 1);
  }
}
