//! C4 — the datagram channel contract (spec section 6's external
//! collaborator surface). Modeled directly on the teacher's
//! [`crate::net`]-style `Socket` trait: one trait, `nb::Result` polling,
//! a concrete byte buffer — but widened to include the session/time/CRC/
//! firmware hooks this protocol needs from its encrypted transport.

use crate::time::Millis;

/// Result of calling [`Channel::establish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Establish {
  /// A fresh secure session was negotiated.
  #[default]
  Fresh,
  /// A previously persisted session was resumed.
  SessionResumed,
}

/// A command the core can issue to the encrypted transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
  /// Tell the channel to migrate its session state into an active slot
  /// (issued when `establish` resumes a session).
  MoveSession,
  /// Forget any persisted session — a full handshake is required next time.
  DiscardSession,
  /// Persist the current session state.
  SaveSession,
  /// Reload previously persisted session state.
  LoadSession,
  /// The handshake/operational sequence completed successfully.
  Established,
  /// Tear the connection down (fatal protocol error, or exhausted retries).
  Close,
}

/// Store kind for a firmware/data transfer (spec section 4.9's chunk file
/// descriptor).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
  /// The update targets the firmware image.
  Firmware,
  /// The update targets some other persisted blob.
  Other(u8),
}

/// Outcome of a dry-run or committed `prepare_for_firmware_update` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareResult {
  /// The platform is ready to receive chunks.
  Accepted,
  /// The platform rejected the update (e.g. insufficient storage).
  Rejected,
}

/// Final status passed to `finish_firmware_update`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishStatus {
  /// All chunks were received and validated.
  Success,
  /// The update was abandoned (channel error, explicit cancellation).
  Failure,
}

/// The byte-oriented datagram pipe and its handful of persistence/platform
/// hooks. Everything below the line in spec section 1 — DTLS, hardware
/// bring-up, USB/flash drivers, bootloader DFU — lives behind this trait;
/// the orchestrator only ever sees these methods.
pub trait Channel {
  /// Transport-level error type.
  type Error: core::fmt::Debug;

  /// Send a raw datagram. Non-blocking: `Err(nb::Error::WouldBlock)` means
  /// try again later.
  fn send(&mut self, buf: &[u8]) -> nb::Result<usize, Self::Error>;

  /// Receive into `buf`, returning the number of bytes written (`0` means
  /// no datagram is available yet — not an error).
  fn receive(&mut self, buf: &mut [u8]) -> nb::Result<usize, Self::Error>;

  /// Establish (or resume) the secure session.
  fn establish(&mut self) -> Result<Establish, Self::Error>;

  /// Issue a session-lifecycle command.
  fn command(&mut self, cmd: Command) -> Result<(), Self::Error>;

  /// Monotonic millisecond tick, per spec section 6.
  fn millis(&self) -> Millis;

  /// Called on `TIME` dispatch with the newly learned Unix time.
  fn set_time(&mut self, unix_seconds: u32);

  /// CRC-32/IEEE over `buf` — delegated to the channel since it usually
  /// has hardware CRC support.
  fn calculate_crc(&self, buf: &[u8]) -> u32;

  /// Invoked on `SIGNAL_START`/`SIGNAL_STOP`; returns whether the platform
  /// accepted the request.
  fn signal(&mut self, on: bool, param: &[u8]) -> bool;

  /// Dry-run (`commit = false`) or commit (`commit = true`) preparation
  /// for a firmware/data update.
  fn prepare_for_firmware_update(&mut self, kind: StoreKind, file_length: u32, commit: bool) -> PrepareResult;

  /// Persist one validated chunk at `file_address + offset`.
  fn save_firmware_chunk(&mut self, file_address: u32, offset: u32, data: &[u8]) -> Result<(), Self::Error>;

  /// Finalize (or abandon) an in-progress update.
  fn finish_firmware_update(&mut self, status: FinishStatus) -> Vec<u8>;

  /// Persist the session record blob (`PERSIST_SESSION`).
  fn save_session(&mut self, blob: &[u8]) -> Result<(), Self::Error>;

  /// Restore the session record blob, if one is present.
  fn restore_session(&mut self, out: &mut [u8]) -> Option<usize>;
}
