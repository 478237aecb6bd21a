//! C1 — message buffer.
//!
//! A single fixed scratch region backs every inbound/outbound message; a
//! [`Message`] is a lifetime-scoped view over some sub-range of it. This
//! mirrors spec section 9's own guidance: "Make Message a view with a
//! lifetime tying it to the channel; forbid holding two mutable views
//! concurrently." `response()` carves an unused tail of the parent view
//! into a second, disjoint view rather than copying — the Rust borrow
//! checker enforces the "one mutable view at a time" rule for free.

use crate::error::{Error, What};

/// Owns the contiguous byte region every [`Message`] view borrows from.
#[derive(Debug)]
pub struct ScratchBuffer {
  buf: Box<[u8]>,
}

impl ScratchBuffer {
  /// Allocate a scratch buffer of at least [`crate::config::MIN_PROTOCOL_BUFFER_SIZE`]
  /// bytes.
  pub fn new(size: usize) -> Self {
    Self { buf: vec![0u8; size].into_boxed_slice() }
  }

  /// Total capacity of the backing region.
  pub fn capacity(&self) -> usize {
    self.buf.len()
  }

  /// Borrow a [`Message`] view over the whole buffer, with an initial
  /// length of zero.
  pub fn message(&mut self) -> Message<'_> {
    let cap = self.buf.len();
    Message { buf: &mut self.buf, len: 0, cap, id: None, confirm: false }
  }
}

/// A mutable view over some sub-range of a [`ScratchBuffer`].
///
/// Invariant: `len <= cap <= buf.len()`. An id is present only after
/// [`Message::decode_id`] or [`Message::set_id`] has run.
pub struct Message<'a> {
  buf: &'a mut [u8],
  len: usize,
  cap: usize,
  id: Option<u16>,
  confirm: bool,
}

impl<'a> Message<'a> {
  /// Construct a view directly over a caller-owned slice — used by tests
  /// and by the codec to decode messages that arrived via `Channel::receive`
  /// into a plain byte slice.
  pub fn over(buf: &'a mut [u8], len: usize) -> Self {
    let cap = buf.len();
    Message { buf, len: len.min(cap), cap, id: None, confirm: false }
  }

  /// Current logical length of the message.
  pub fn len(&self) -> usize {
    self.len
  }

  /// Whether the view currently has zero length.
  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  /// Capacity of this view (not the whole scratch buffer, if carved).
  pub fn capacity(&self) -> usize {
    self.cap
  }

  /// The bytes currently in use.
  pub fn as_bytes(&self) -> &[u8] {
    &self.buf[..self.len]
  }

  /// Mutable access to the bytes currently in use.
  pub fn as_bytes_mut(&mut self) -> &mut [u8] {
    &mut self.buf[..self.len]
  }

  /// Full writable capacity, including bytes beyond the current length.
  pub fn as_capacity_mut(&mut self) -> &mut [u8] {
    &mut self.buf[..self.cap]
  }

  /// Set the logical length, failing if it exceeds capacity.
  pub fn set_length<C>(&mut self, len: usize) -> Result<(), Error<C>> {
    if len > self.cap {
      return Err(Error::new(What::InsufficientStorage));
    }
    self.len = len;
    Ok(())
  }

  /// Read the 16-bit message id from header bytes 2–3, caching it.
  pub fn decode_id(&mut self) -> Option<u16> {
    if self.len < 4 {
      return None;
    }
    let id = u16::from_be_bytes([self.buf[2], self.buf[3]]);
    self.id = Some(id);
    Some(id)
  }

  /// Write `id` into header bytes 2–3 and cache it. Requires the view to
  /// have at least 4 bytes of capacity.
  pub fn set_id<C>(&mut self, id: u16) -> Result<(), Error<C>> {
    if self.cap < 4 {
      return Err(Error::new(What::InsufficientStorage));
    }
    let bytes = id.to_be_bytes();
    self.buf[2] = bytes[0];
    self.buf[3] = bytes[1];
    self.len = self.len.max(4);
    self.id = Some(id);
    Ok(())
  }

  /// The cached id, if one has been decoded or assigned.
  pub fn id(&self) -> Option<u16> {
    self.id
  }

  /// Mark this message as requiring synchronous confirmation
  /// (`send_synchronous` rather than fire-and-forget `send`).
  pub fn set_confirm_required(&mut self, confirm: bool) {
    self.confirm = confirm;
  }

  /// Whether this message requires synchronous confirmation.
  pub fn confirm_required(&self) -> bool {
    self.confirm
  }

  /// Carve a fresh view from this message's unused tail, for building a
  /// response in-place without a second allocation.
  ///
  /// Fails with `INSUFFICIENT_STORAGE` if fewer than `required` bytes
  /// (plus `reserved_overhead`, e.g. encryption framing) remain.
  pub fn response<C>(&mut self, required: usize, reserved_overhead: usize) -> Result<Message<'_>, Error<C>> {
    let avail_start = self.len;
    let needed = required + reserved_overhead;
    if self.cap.saturating_sub(avail_start) < needed {
      return Err(Error::new(What::InsufficientStorage));
    }
    let tail = &mut self.buf[avail_start..self.cap];
    let cap = tail.len();
    Ok(Message { buf: tail, len: 0, cap, id: None, confirm: false })
  }
}

impl<'a> core::fmt::Debug for Message<'a> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Message")
     .field("len", &self.len)
     .field("cap", &self.cap)
     .field("id", &self.id)
     .field("confirm", &self.confirm)
     .finish()
  }
}
