//! Concrete `std`-platform [`Channel`]: a [`UdpSocket`] plus plain files
//! standing in for the persisted session blob and flash-backed firmware
//! storage, the way `toad::std::Platform` wraps a `UdpSocket` with a few
//! platform hooks (see `std/mod.rs`). Gated behind the `std` feature.
//!
//! This channel does no encryption of its own: [`Channel::establish`]
//! always reports [`Establish::Fresh`]. A real deployment wraps the same
//! socket in a DTLS layer — the way `toad::std::net::secure::SecureUdpSocket`
//! wraps a plain `UdpSocket` — and reports `SessionResumed` when that layer
//! resumes a session instead.

use std::fs;
use std::io;
use std::net::{ToSocketAddrs, UdpSocket};
use std::path::PathBuf;
use std::time::Instant;

use crate::channel::{Channel, Command, Establish, FinishStatus, PrepareResult, StoreKind};
use crate::time::Millis;

/// Where a [`StdChannel`] persists session and firmware state.
#[derive(Debug, Clone)]
pub struct Paths {
  /// Session record blob (`PERSIST_SESSION`/`LOAD_SESSION`).
  pub session: PathBuf,
  /// Committed firmware image.
  pub firmware: PathBuf,
}

struct PendingFirmware {
  kind: StoreKind,
  bytes: Vec<u8>,
}

/// [`Channel`] implementor for a `std`-hosted device.
pub struct StdChannel {
  socket: UdpSocket,
  start: Instant,
  paths: Paths,
  pending_firmware: Option<PendingFirmware>,
}

impl StdChannel {
  /// Bind a nonblocking UDP socket to `local_addr` and connect it to
  /// `peer_addr`, so [`Channel::send`]/[`Channel::receive`] need not pass
  /// addresses around.
  pub fn connect<A: ToSocketAddrs>(local_addr: A, peer_addr: A, paths: Paths) -> io::Result<Self> {
    let socket = UdpSocket::bind(local_addr)?;
    socket.set_nonblocking(true)?;
    socket.connect(peer_addr)?;
    Ok(Self { socket, start: Instant::now(), paths, pending_firmware: None })
  }
}

impl Channel for StdChannel {
  type Error = io::Error;

  fn send(&mut self, buf: &[u8]) -> nb::Result<usize, Self::Error> {
    self.socket.send(buf).map_err(io_to_nb)
  }

  fn receive(&mut self, buf: &mut [u8]) -> nb::Result<usize, Self::Error> {
    match self.socket.recv(buf) {
      | Ok(n) => Ok(n),
      | Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
      | Err(e) => Err(io_to_nb(e)),
    }
  }

  fn establish(&mut self) -> Result<Establish, Self::Error> {
    Ok(Establish::Fresh)
  }

  fn command(&mut self, cmd: Command) -> Result<(), Self::Error> {
    log::debug!(target: "tether", "channel command: {:?}", cmd);
    Ok(())
  }

  fn millis(&self) -> Millis {
    self.start.elapsed().as_millis() as Millis
  }

  fn set_time(&mut self, unix_seconds: u32) {
    log::info!(target: "tether", "learned unix time: {}", unix_seconds);
  }

  fn calculate_crc(&self, buf: &[u8]) -> u32 {
    crc32(buf)
  }

  fn signal(&mut self, on: bool, param: &[u8]) -> bool {
    log::info!(target: "tether", "signal({}, {:?})", on, param);
    true
  }

  fn prepare_for_firmware_update(&mut self, kind: StoreKind, file_length: u32, commit: bool) -> PrepareResult {
    if !commit {
      return PrepareResult::Accepted;
    }
    self.pending_firmware = Some(PendingFirmware { kind, bytes: vec![0u8; file_length as usize] });
    PrepareResult::Accepted
  }

  fn save_firmware_chunk(&mut self, _file_address: u32, offset: u32, data: &[u8]) -> Result<(), Self::Error> {
    let fw = self.pending_firmware
                 .as_mut()
                 .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "update not prepared"))?;
    let start = offset as usize;
    let end = start + data.len();
    if end > fw.bytes.len() {
      return Err(io::Error::new(io::ErrorKind::InvalidInput, "chunk out of bounds"));
    }
    fw.bytes[start..end].copy_from_slice(data);
    Ok(())
  }

  fn finish_firmware_update(&mut self, status: FinishStatus) -> Vec<u8> {
    match (status, self.pending_firmware.take()) {
      | (FinishStatus::Success, Some(fw)) => match fs::write(&self.paths.firmware, &fw.bytes) {
        | Ok(()) => {
          log::info!(target: "tether", "firmware update committed ({:?}, {} bytes)", fw.kind, fw.bytes.len());
          b"ok".to_vec()
        },
        | Err(e) => {
          log::error!(target: "tether", "failed writing firmware image: {}", e);
          b"failed".to_vec()
        },
      },
      | _ => b"failed".to_vec(),
    }
  }

  fn save_session(&mut self, blob: &[u8]) -> Result<(), Self::Error> {
    fs::write(&self.paths.session, blob)
  }

  fn restore_session(&mut self, out: &mut [u8]) -> Option<usize> {
    let blob = fs::read(&self.paths.session).ok()?;
    let n = blob.len().min(out.len());
    out[..n].copy_from_slice(&blob[..n]);
    Some(n)
  }
}

fn io_to_nb(e: io::Error) -> nb::Error<io::Error> {
  match e.kind() {
    | io::ErrorKind::WouldBlock => nb::Error::WouldBlock,
    | _ => nb::Error::Other(e),
  }
}

/// CRC-32/IEEE, the polynomial spec section 6 names for `calculate_crc` and
/// chunk/session checksums.
fn crc32(buf: &[u8]) -> u32 {
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
