//! C5 — CoAP channel decorator: assigns monotonic 16-bit message ids to
//! outbound messages, the way `toad::core::Core` hands out ids from a
//! single owned counter (see `core/mod.rs`). Wrap-around is permitted;
//! duplicate detection downstream is by equality, not ordering.

use crate::channel::{Channel, Command, Establish, FinishStatus, PrepareResult, StoreKind};
use crate::time::Millis;

/// Wraps an inner [`Channel`], assigning ids to outbound messages that
/// don't already carry one.
pub struct CoapIdChannel<C> {
  inner: C,
  next_id: u16,
}

impl<C: Channel> CoapIdChannel<C> {
  /// Wrap `inner`, seeding the id counter from a restored session (or 0).
  pub fn new(inner: C, seed: u16) -> Self {
    Self { inner, next_id: seed }
  }

  /// Assign and return the next id, advancing the counter (wrapping at
  /// `u16::MAX`).
  pub fn next_id(&mut self) -> u16 {
    self.next_id = self.next_id.wrapping_add(1);
    self.next_id
  }

  /// The id that will be handed out by the *next* call to [`Self::next_id`],
  /// without consuming it — used to persist `next CoAP id` in the session
  /// record.
  pub fn peek_next_id(&self) -> u16 {
    self.next_id.wrapping_add(1)
  }

  /// Seed the counter so the next call to [`Self::next_id`] returns `id`
  /// (used to resume a persisted `next CoAP id`).
  pub fn seed_next_id(&mut self, id: u16) {
    self.next_id = id.wrapping_sub(1);
  }

  /// Borrow the wrapped channel.
  pub fn inner(&self) -> &C {
    &self.inner
  }

  /// Mutably borrow the wrapped channel.
  pub fn inner_mut(&mut self) -> &mut C {
    &mut self.inner
  }
}

impl<C: Channel> Channel for CoapIdChannel<C> {
  type Error = C::Error;

  fn send(&mut self, buf: &[u8]) -> nb::Result<usize, Self::Error> {
    self.inner.send(buf)
  }

  fn receive(&mut self, buf: &mut [u8]) -> nb::Result<usize, Self::Error> {
    self.inner.receive(buf)
  }

  fn establish(&mut self) -> Result<Establish, Self::Error> {
    self.inner.establish()
  }

  fn command(&mut self, cmd: Command) -> Result<(), Self::Error> {
    self.inner.command(cmd)
  }

  fn millis(&self) -> Millis {
    self.inner.millis()
  }

  fn set_time(&mut self, unix_seconds: u32) {
    self.inner.set_time(unix_seconds)
  }

  fn calculate_crc(&self, buf: &[u8]) -> u32 {
    self.inner.calculate_crc(buf)
  }

  fn signal(&mut self, on: bool, param: &[u8]) -> bool {
    self.inner.signal(on, param)
  }

  fn prepare_for_firmware_update(&mut self, kind: StoreKind, file_length: u32, commit: bool) -> PrepareResult {
    self.inner.prepare_for_firmware_update(kind, file_length, commit)
  }

  fn save_firmware_chunk(&mut self, file_address: u32, offset: u32, data: &[u8]) -> Result<(), Self::Error> {
    self.inner.save_firmware_chunk(file_address, offset, data)
  }

  fn finish_firmware_update(&mut self, status: FinishStatus) -> Vec<u8> {
    self.inner.finish_firmware_update(status)
  }

  fn save_session(&mut self, blob: &[u8]) -> Result<(), Self::Error> {
    self.inner.save_session(blob)
  }

  fn restore_session(&mut self, out: &mut [u8]) -> Option<usize> {
    self.inner.restore_session(out)
  }
}
