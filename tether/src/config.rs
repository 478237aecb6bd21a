//! Runtime configuration, in the teacher's documented-`Default` style.

/// Minimum size of the protocol scratch buffer, in bytes.
pub const MIN_PROTOCOL_BUFFER_SIZE: usize = 640;

/// Configuration knobs for chunked firmware transfer.
///
/// ```
/// use tether::config::Ota;
///
/// assert_eq!(Ota::default().fast_ota_default, true);
/// assert_eq!(Ota::default().missed_chunks_to_send, 60);
/// assert_eq!(Ota::default().minimum_chunk_increase, 20);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ota {
  /// Whether a device should request fast OTA (server sends chunks without
  /// per-chunk ACKs) when negotiating an update, absent an override.
  pub fast_ota_default: bool,
  /// Whether the negotiated OTA payload is itself compressed.
  pub compressed_ota: bool,
  /// Maximum count of missing-chunk indices placed in a single re-request
  /// datagram — chosen so the indices list plus CoAP overhead fits one MTU.
  pub missed_chunks_to_send: u16,
  /// Minimum growth, in chunk count, between successive missing-chunk probe
  /// batches (the actual growth is `max(chunk_count * 0.2, this)`).
  pub minimum_chunk_increase: u16,
}

impl Default for Ota {
  fn default() -> Self {
    Ota { fast_ota_default: true,
          compressed_ota: false,
          missed_chunks_to_send: 60,
          minimum_chunk_increase: 20 }
  }
}

/// Configuration knobs for the protocol handshake.
///
/// ```
/// use tether::config::Handshake;
///
/// assert_eq!(Handshake::default().hello_response_required, true);
/// assert_eq!(Handshake::default().device_initiated_describe, false);
/// assert_eq!(Handshake::default().hello_response_timeout_millis, 4_000);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
  /// Whether `begin()` must receive a Hello back from the peer before
  /// proceeding to `OPERATIONAL`.
  pub hello_response_required: bool,
  /// Whether the device should proactively POST a system Describe once
  /// established, rather than waiting to be asked.
  pub device_initiated_describe: bool,
  /// How long to wait for the peer's Hello when `hello_response_required`.
  pub hello_response_timeout_millis: u32,
}

impl Default for Handshake {
  fn default() -> Self {
    Handshake { hello_response_required: true,
                device_initiated_describe: false,
                hello_response_timeout_millis: 4_000 }
  }
}

/// Configuration knobs for the keepalive pinger, see [`crate::ping`].
///
/// ```
/// use tether::config::Ping;
///
/// assert_eq!(Ping::default().ping_after_silence_millis, 15_000);
/// assert_eq!(Ping::default().ping_ack_timeout_millis, 10_000);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ping {
  /// Send a keepalive ping once this many idle milliseconds have elapsed.
  pub ping_after_silence_millis: u32,
  /// Consider a sent ping timed out after this many more milliseconds.
  pub ping_ack_timeout_millis: u32,
}

impl Default for Ping {
  fn default() -> Self {
    Ping { ping_after_silence_millis: 15_000,
           ping_ack_timeout_millis: 10_000 }
  }
}

/// Top-level runtime config.
///
/// ```
/// use tether::config::Config;
///
/// assert_eq!(Config::default().protocol_buffer_size, 640);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
  /// Size, in bytes, of the shared scratch buffer. Must be
  /// `>= MIN_PROTOCOL_BUFFER_SIZE`.
  pub protocol_buffer_size: usize,
  /// See [`Handshake`].
  pub handshake: Handshake,
  /// See [`Ping`].
  pub ping: Ping,
  /// See [`Ota`].
  pub ota: Ota,
}

impl Default for Config {
  fn default() -> Self {
    Config { protocol_buffer_size: MIN_PROTOCOL_BUFFER_SIZE,
             handshake: Handshake::default(),
             ping: Ping::default(),
             ota: Ota::default() }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_buffer_meets_minimum() {
    assert!(Config::default().protocol_buffer_size >= MIN_PROTOCOL_BUFFER_SIZE);
  }
}
