//! C10 — chunked firmware transfer (spec section 4.9), grounded on
//! `chunked_transfer.h`/`chunked_transfer.cpp`'s `ChunkedTransfer`: a chunk
//! index bitmap, per-chunk CRC check, and missing-chunk re-request.

use crate::channel::{Channel, FinishStatus, PrepareResult, StoreKind};
use crate::config::Ota;

/// `{store_kind, file_address, file_length, chunk_size, chunk_address}` —
/// spec section 3's chunk file descriptor. `chunk_address` (where chunks
/// begin relative to the store) defaults to `file_address` for this engine,
/// since the original's separate staging address isn't exposed by
/// [`Channel`]'s narrower firmware hooks.
#[derive(Debug, Clone, Copy)]
pub struct FileDescriptor {
  /// Which backing store the update targets.
  pub store_kind: StoreKind,
  /// Base address the file is written at.
  pub file_address: u32,
  /// Total file length in bytes.
  pub file_length: u32,
  /// Size of one chunk in bytes.
  pub chunk_size: u16,
}

impl FileDescriptor {
  /// `chunk_count = ceil(file_length / chunk_size)`.
  pub fn chunk_count(&self) -> u32 {
    if self.chunk_size == 0 {
      return 0;
    }
    (self.file_length + self.chunk_size as u32 - 1) / self.chunk_size as u32
  }
}

/// A chunk-indexed bitmap, one bit per chunk, stored as the last
/// `ceil(chunk_count/8)` bytes of the shared scratch buffer while a
/// transfer is in progress (spec section 3). Represented here as an owned
/// `Vec<u8>` since the orchestrator doesn't otherwise need that scratch
/// tail concurrently with a transfer.
#[derive(Debug, Clone)]
pub struct Bitmap {
  bits: Vec<u8>,
  chunk_count: u32,
}

impl Bitmap {
  /// Allocate a bitmap for `chunk_count` chunks, all-zero (fast OTA — no
  /// chunk tracked as received yet) or all-one (non-fast OTA — only the
  /// current chunk is meaningfully tracked, everything else considered
  /// "received" so no missing-chunk probe ever names it).
  pub fn new(chunk_count: u32, all_set: bool) -> Self {
    let len = ((chunk_count as usize) + 7) / 8;
    Self { bits: vec![if all_set { 0xFF } else { 0 }; len], chunk_count }
  }

  /// Mark chunk `idx` received.
  pub fn set(&mut self, idx: u32) {
    if let Some(byte) = self.bits.get_mut((idx >> 3) as usize) {
      *byte |= 1 << (idx & 7);
    }
  }

  /// Whether chunk `idx` is marked received.
  pub fn is_set(&self, idx: u32) -> bool {
    self.bits.get((idx >> 3) as usize).map(|b| b & (1 << (idx & 7)) != 0).unwrap_or(false)
  }

  /// Every chunk index below `chunk_count` not yet marked received, in order.
  pub fn missing(&self) -> impl Iterator<Item = u32> + '_ {
    (0..self.chunk_count).filter(move |&i| !self.is_set(i))
  }

  /// Whether every chunk is marked received.
  pub fn is_complete(&self) -> bool {
    self.missing().next().is_none()
  }
}

/// Transfer phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
  Idle,
  Receiving,
  /// `handle_update_done` found missing chunks; probing for them.
  AwaitingMissed,
}

/// Chunked transfer state machine (spec component C10).
#[derive(Debug)]
pub struct ChunkedTransfer {
  ota: Ota,
  phase: Phase,
  file: Option<FileDescriptor>,
  bitmap: Option<Bitmap>,
  /// Sequential counter used as the chunk index in non-fast-OTA mode.
  stream_counter: u32,
  fast_ota: bool,
  /// Most recent batch size requested via missing-chunk probes, for the
  /// geometric growth curve in `handle_update_done`.
  last_probe_batch: u32,
}

impl Default for ChunkedTransfer {
  fn default() -> Self {
    Self::new(Ota::default())
  }
}

const MAX_CHUNKS: u32 = 65_535;

impl ChunkedTransfer {
  /// A transfer state machine with no update in progress.
  pub fn new(ota: Ota) -> Self {
    Self { ota, phase: Phase::Idle, file: None, bitmap: None, stream_counter: 0, fast_ota: false, last_probe_batch: 0 }
  }

  /// Whether an update is currently in progress.
  pub fn is_updating(&self) -> bool {
    self.phase != Phase::Idle
  }

  /// Parse an `UPDATE_BEGIN` payload per spec section 4.9: starting at
  /// byte 8, `{flags:1, chunk_size:2 BE, file_length:4 BE, store_kind:1,
  /// file_address:4 BE}`. Invalid/short payloads default to all-zero
  /// fields and [`StoreKind::Firmware`].
  fn parse_update_begin(payload: &[u8]) -> (u8, FileDescriptor) {
    if payload.len() < 8 + 1 + 2 + 4 + 1 + 4 {
      return (0, FileDescriptor { store_kind: StoreKind::Firmware, file_address: 0, file_length: 0, chunk_size: 0 });
    }
    let flags = payload[8];
    let chunk_size = u16::from_be_bytes([payload[9], payload[10]]);
    let file_length = u32::from_be_bytes([payload[11], payload[12], payload[13], payload[14]]);
    let store_byte = payload[15];
    let file_address = u32::from_be_bytes([payload[16], payload[17], payload[18], payload[19]]);
    let store_kind = if store_byte == 0 { StoreKind::Firmware } else { StoreKind::Other(store_byte) };
    (flags, FileDescriptor { store_kind, file_address, file_length, chunk_size })
  }

  /// `handle_update_begin`: dry-run then commit preparation for an
  /// incoming firmware/data update, returning the reply to send.
  pub fn handle_update_begin<C: Channel>(&mut self, channel: &mut C, payload: &[u8]) -> Reply {
    let (_flags, file) = Self::parse_update_begin(payload);
    let chunk_count = file.chunk_count();

    let dry_run = channel.prepare_for_firmware_update(file.store_kind, file.file_length, false);
    if dry_run != PrepareResult::Accepted || chunk_count >= MAX_CHUNKS {
      return Reply::CodedAck { class: 5, detail: 3 };
    }

    let commit = channel.prepare_for_firmware_update(file.store_kind, file.file_length, true);
    if commit != PrepareResult::Accepted {
      return Reply::CodedAck { class: 5, detail: 3 };
    }

    let fast_ota = self.ota.fast_ota_default;
    self.file = Some(file);
    self.bitmap = Some(Bitmap::new(chunk_count, !fast_ota));
    self.stream_counter = 0;
    self.fast_ota = fast_ota;
    self.last_probe_batch = 0;
    self.phase = Phase::Receiving;

    Reply::UpdateReady { fast_ota }
  }

  /// `handle_chunk`: validate CRC, persist, and mark the bitmap.
  pub fn handle_chunk<C: Channel>(&mut self, channel: &mut C, crc_opt: &[u8], index_opt: Option<&[u8]>, payload: &[u8]) -> Reply {
    let (file, bitmap) = match (&self.file, &mut self.bitmap) {
      | (Some(f), Some(b)) => (*f, b),
      | _ => return Reply::None,
    };

    let idx = if self.fast_ota {
      match index_opt {
        | Some(bytes) if bytes.len() == 2 => u16::from_be_bytes([bytes[0], bytes[1]]) as u32,
        | _ => return Reply::None,
      }
    } else {
      self.stream_counter
    };

    if idx >= MAX_CHUNKS || idx >= file.chunk_count() {
      log::warn!("chunk index {idx} out of range, dropping");
      return Reply::None;
    }

    let given_crc = if crc_opt.len() == 4 { u32::from_be_bytes([crc_opt[0], crc_opt[1], crc_opt[2], crc_opt[3]]) } else { 0 };
    let actual_crc = channel.calculate_crc(payload);
    let ok = given_crc == actual_crc;

    if ok {
      let offset = idx * file.chunk_size as u32;
      if channel.save_firmware_chunk(file.file_address, offset, payload).is_ok() {
        bitmap.set(idx);
        if !self.fast_ota {
          self.stream_counter += 1;
        }
      }
    }

    if self.fast_ota {
      // bad chunks are silently omitted in fast mode; they're re-requested later.
      Reply::None
    } else {
      Reply::ChunkReceived { ok }
    }
  }

  /// `handle_update_done`: either finalize (no chunks missing) or move to
  /// the missing-chunk probe phase.
  pub fn handle_update_done<C: Channel>(&mut self, channel: &mut C) -> (Reply, Option<Vec<u8>>) {
    let bitmap = match &self.bitmap {
      | Some(b) => b,
      | None => return (Reply::CodedAck { class: 4, detail: 0 }, None),
    };

    if bitmap.is_complete() {
      let status = channel.finish_firmware_update(FinishStatus::Success);
      self.reset();
      (Reply::UpdateDone { payload: pad_to_16(status) }, None)
    } else {
      self.phase = Phase::AwaitingMissed;
      let chunk_count = self.file.map(|f| f.chunk_count()).unwrap_or(0);
      let grown = ((chunk_count as f64 * 0.2) as u32).max(self.ota.minimum_chunk_increase as u32);
      self.last_probe_batch = self.last_probe_batch.max(grown);
      let batch: Vec<u16> = bitmap.missing().take(self.ota.missed_chunks_to_send as usize).map(|i| i as u16).collect();
      (Reply::CodedAck { class: 4, detail: 0 }, Some(batch.iter().flat_map(|i| i.to_be_bytes()).collect()))
    }
  }

  /// Cancel an in-progress transfer (channel error); notifies the platform
  /// and clears transfer state.
  pub fn cancel<C: Channel>(&mut self, channel: &mut C) {
    if self.is_updating() {
      let _ = channel.finish_firmware_update(FinishStatus::Failure);
    }
    self.reset();
  }

  fn reset(&mut self) {
    self.phase = Phase::Idle;
    self.file = None;
    self.bitmap = None;
    self.stream_counter = 0;
    self.last_probe_batch = 0;
  }
}

fn pad_to_16(mut status: Vec<u8>) -> Vec<u8> {
  let rem = status.len() % 16;
  if rem != 0 {
    status.resize(status.len() + (16 - rem), 0);
  }
  status
}

/// What the caller should send back after a chunk-transfer operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
  /// Nothing to send (fast-mode bad chunk, out-of-range index, or no
  /// transfer in progress).
  None,
  /// A coded ACK with the given class/detail.
  CodedAck { class: u8, detail: u8 },
  /// The `update_ready` reply with its 1-byte fast-OTA flags payload.
  UpdateReady { fast_ota: bool },
  /// Per-chunk ACK (non-fast mode only).
  ChunkReceived { ok: bool },
  /// Final `UpdateDone` ACK with the finish callback's textual status.
  UpdateDone { payload: Vec<u8> },
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_support::MockChannel;

  #[test]
  fn s3_fast_ota_chunk_sets_bitmap_and_saves_at_offset() {
    let mut channel = MockChannel::new();
    let mut xfer = ChunkedTransfer::new(Ota { fast_ota_default: true, ..Ota::default() });

    let mut payload = vec![0u8; 8];
    payload.push(1); // flags: fast ota requested
    payload.extend_from_slice(&512u16.to_be_bytes());
    payload.extend_from_slice(&2048u32.to_be_bytes());
    payload.push(0); // firmware
    payload.extend_from_slice(&0x1000_0000u32.to_be_bytes());

    let reply = xfer.handle_update_begin(&mut channel, &payload);
    assert_eq!(reply, Reply::UpdateReady { fast_ota: true });

    let data = vec![0xABu8; 512];
    let crc = channel.calculate_crc(&data);
    let reply = xfer.handle_chunk(&mut channel, &crc.to_be_bytes(), Some(&2u16.to_be_bytes()), &data);
    assert_eq!(reply, Reply::None);

    assert!(xfer.bitmap.as_ref().unwrap().is_set(2));
    assert_eq!(channel.firmware, vec![(2 * 512, data)]);
  }

  #[test]
  fn non_fast_mode_acks_each_chunk_by_stream_order() {
    let mut channel = MockChannel::new();
    let mut xfer = ChunkedTransfer::new(Ota { fast_ota_default: false, ..Ota::default() });

    let mut payload = vec![0u8; 8];
    payload.push(0);
    payload.extend_from_slice(&16u16.to_be_bytes());
    payload.extend_from_slice(&32u32.to_be_bytes());
    payload.push(0);
    payload.extend_from_slice(&0u32.to_be_bytes());
    assert_eq!(xfer.handle_update_begin(&mut channel, &payload), Reply::UpdateReady { fast_ota: false });

    let data = vec![1u8; 16];
    let crc = channel.calculate_crc(&data);
    let reply = xfer.handle_chunk(&mut channel, &crc.to_be_bytes(), None, &data);
    assert_eq!(reply, Reply::ChunkReceived { ok: true });

    let bad_crc = [0u8; 4];
    let reply = xfer.handle_chunk(&mut channel, &bad_crc, None, &data);
    assert_eq!(reply, Reply::ChunkReceived { ok: false });
  }

  #[test]
  fn update_done_with_missing_chunks_requests_them() {
    let mut channel = MockChannel::new();
    let mut xfer = ChunkedTransfer::new(Ota::default());
    let mut payload = vec![0u8; 8];
    payload.push(1);
    payload.extend_from_slice(&256u16.to_be_bytes());
    payload.extend_from_slice(&2560u32.to_be_bytes()); // 10 chunks
    payload.push(0);
    payload.extend_from_slice(&0u32.to_be_bytes());
    xfer.handle_update_begin(&mut channel, &payload);

    let (reply, missed) = xfer.handle_update_done(&mut channel);
    assert_eq!(reply, Reply::CodedAck { class: 4, detail: 0 });
    let missed = missed.unwrap();
    assert_eq!(missed.len(), 20); // 10 missing chunks * 2 bytes
  }

  #[test]
  fn update_done_with_all_chunks_finishes() {
    let mut channel = MockChannel::new();
    let mut xfer = ChunkedTransfer::new(Ota { fast_ota_default: true, ..Ota::default() });
    let mut payload = vec![0u8; 8];
    payload.push(1);
    payload.extend_from_slice(&16u16.to_be_bytes());
    payload.extend_from_slice(&16u32.to_be_bytes()); // 1 chunk
    payload.push(0);
    payload.extend_from_slice(&0u32.to_be_bytes());
    xfer.handle_update_begin(&mut channel, &payload);

    let data = vec![9u8; 16];
    let crc = channel.calculate_crc(&data);
    xfer.handle_chunk(&mut channel, &crc.to_be_bytes(), Some(&0u16.to_be_bytes()), &data);

    let (reply, missed) = xfer.handle_update_done(&mut channel);
    assert!(missed.is_none());
    assert!(matches!(reply, Reply::UpdateDone { .. }));
    assert!(!xfer.is_updating());
  }

  #[test]
  fn out_of_range_index_is_dropped() {
    let mut channel = MockChannel::new();
    let mut xfer = ChunkedTransfer::new(Ota { fast_ota_default: true, ..Ota::default() });
    let mut payload = vec![0u8; 8];
    payload.push(1);
    payload.extend_from_slice(&16u16.to_be_bytes());
    payload.extend_from_slice(&16u32.to_be_bytes());
    payload.push(0);
    payload.extend_from_slice(&0u32.to_be_bytes());
    xfer.handle_update_begin(&mut channel, &payload);

    let data = vec![0u8; 16];
    let crc = channel.calculate_crc(&data);
    let reply = xfer.handle_chunk(&mut channel, &crc.to_be_bytes(), Some(&999u16.to_be_bytes()), &data);
    assert_eq!(reply, Reply::None);
    assert!(channel.firmware.is_empty());
  }
}
