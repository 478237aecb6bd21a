//! Test-only doubles, mirroring the teacher's `src/test.rs` (`SockMock`,
//! `ClockMock`): a [`MockChannel`] backed by plain `VecDeque`s instead of
//! `Arc<Mutex<_>>` (this crate is single-threaded per spec section 5, so
//! no locking is needed) and a manually-advanced millisecond clock.

#![allow(dead_code)]

use std::cell::Cell;
use std::collections::VecDeque;

use crate::channel::{Channel, Command, Establish, FinishStatus, PrepareResult, StoreKind};
use crate::time::Millis;

/// A mocked [`Channel`]: datagrams queued in by the test are handed back
/// from [`Channel::receive`] in order; bytes sent by the code under test
/// are captured for assertions.
#[derive(Debug, Default)]
pub struct MockChannel {
  pub inbound: VecDeque<Vec<u8>>,
  pub outbound: Vec<Vec<u8>>,
  pub commands: Vec<Command>,
  pub clock: Cell<Millis>,
  pub establish_result: Establish,
  pub crc_table: Option<u32>,
  pub unix_time: Cell<Option<u32>>,
  pub saved_session: Option<Vec<u8>>,
  pub firmware: Vec<(u32, Vec<u8>)>,
  pub signals: Vec<(bool, Vec<u8>)>,
}

impl MockChannel {
  /// A channel with no queued inbound datagrams, clock at 0.
  pub fn new() -> Self {
    Self::default()
  }

  /// Queue a datagram to be returned by the next [`Channel::receive`] call.
  pub fn push_inbound(&mut self, bytes: impl Into<Vec<u8>>) {
    self.inbound.push_back(bytes.into());
  }

  /// Advance the mock clock by `delta` milliseconds.
  pub fn advance(&self, delta: u32) {
    self.clock.set(self.clock.get().wrapping_add(delta));
  }

  /// Set the mock clock to an absolute tick.
  pub fn set_clock(&self, now: Millis) {
    self.clock.set(now);
  }
}

impl Channel for MockChannel {
  type Error = ();

  fn send(&mut self, buf: &[u8]) -> nb::Result<usize, Self::Error> {
    self.outbound.push(buf.to_vec());
    Ok(buf.len())
  }

  fn receive(&mut self, buf: &mut [u8]) -> nb::Result<usize, Self::Error> {
    match self.inbound.pop_front() {
      | Some(bytes) => {
        let n = bytes.len().min(buf.len());
        buf[..n].copy_from_slice(&bytes[..n]);
        Ok(n)
      },
      | None => Ok(0),
    }
  }

  fn establish(&mut self) -> Result<Establish, Self::Error> {
    Ok(self.establish_result)
  }

  fn command(&mut self, cmd: Command) -> Result<(), Self::Error> {
    self.commands.push(cmd);
    Ok(())
  }

  fn millis(&self) -> Millis {
    self.clock.get()
  }

  fn set_time(&mut self, unix_seconds: u32) {
    self.unix_time.set(Some(unix_seconds));
  }

  fn calculate_crc(&self, buf: &[u8]) -> u32 {
    crc32(buf)
  }

  fn signal(&mut self, on: bool, param: &[u8]) -> bool {
    self.signals.push((on, param.to_vec()));
    true
  }

  fn prepare_for_firmware_update(&mut self, _kind: StoreKind, _file_length: u32, _commit: bool) -> PrepareResult {
    PrepareResult::Accepted
  }

  fn save_firmware_chunk(&mut self, _file_address: u32, offset: u32, data: &[u8]) -> Result<(), Self::Error> {
    self.firmware.push((offset, data.to_vec()));
    Ok(())
  }

  fn finish_firmware_update(&mut self, status: FinishStatus) -> Vec<u8> {
    match status {
      | FinishStatus::Success => b"ok".to_vec(),
      | FinishStatus::Failure => b"failed".to_vec(),
    }
  }

  fn save_session(&mut self, blob: &[u8]) -> Result<(), Self::Error> {
    self.saved_session = Some(blob.to_vec());
    Ok(())
  }

  fn restore_session(&mut self, out: &mut [u8]) -> Option<usize> {
    let blob = self.saved_session.as_ref()?;
    let n = blob.len().min(out.len());
    out[..n].copy_from_slice(&blob[..n]);
    Some(n)
  }
}

/// CRC-32/IEEE, the polynomial spec section 6 names for `calculate_crc` and
/// chunk/session checksums. Used by [`MockChannel`] and by tests that need
/// to compute an expected chunk CRC independently of the code under test.
pub fn crc32(buf: &[u8]) -> u32 {
  const POLY: u32 = 0xEDB8_8320;
  let mut crc = 0xFFFF_FFFFu32;
  for &byte in buf {
    crc ^= byte as u32;
    for _ in 0..8 {
      let mask = (crc & 1).wrapping_neg();
      crc = (crc >> 1) ^ (POLY & mask);
    }
  }
  !crc
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn crc32_known_vector() {
    // CRC-32/IEEE of ASCII "123456789" is the well-known check value.
    assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
  }

  #[test]
  fn mock_channel_echoes_queued_inbound() {
    let mut ch = MockChannel::new();
    ch.push_inbound(vec![1, 2, 3]);
    let mut buf = [0u8; 16];
    let n = ch.receive(&mut buf).unwrap();
    assert_eq!(&buf[..n], &[1, 2, 3]);
  }
}
