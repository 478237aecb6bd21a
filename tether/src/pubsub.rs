//! C8 — subscription table and event dispatch (spec section 4.7).

use arrayvec::ArrayVec;

use crate::codec::{Code, Decoded, Type};
use crate::error::{Error, What};

/// Fixed table size — spec section 3 requires "a fixed small constant (≥5)".
pub const TABLE_SIZE: usize = 8;

/// Maximum filter prefix length.
pub const MAX_FILTER_LEN: usize = 63;

/// Maximum device id length.
pub const MAX_DEVICE_ID_LEN: usize = 12;

/// Where an event subscription applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
  /// Only events from the subscribing account's own devices.
  MyDevices,
  /// Every event matching the filter, regardless of origin device.
  Firehose,
}

/// One subscription table entry.
#[derive(Debug, Clone)]
pub struct Subscription {
  /// The prefix this subscription matches against event names.
  pub filter: ArrayVec<u8, MAX_FILTER_LEN>,
  /// Scope of the subscription.
  pub scope: Scope,
  /// Device id this subscription targets, if any (targeted subscribe).
  pub device_id: ArrayVec<u8, MAX_DEVICE_ID_LEN>,
}

impl Subscription {
  fn matches(&self, name: &[u8]) -> bool {
    name.len() >= self.filter.len() && &name[..self.filter.len()] == self.filter.as_slice()
  }

  fn key(&self) -> (&[u8], &[u8]) {
    (self.filter.as_slice(), self.device_id.as_slice())
  }
}

/// Fixed-size table of event subscriptions. A `None` slot is free.
#[derive(Debug, Default)]
pub struct Subscriptions {
  slots: Vec<Option<Subscription>>,
}

impl Subscriptions {
  /// An empty table with [`TABLE_SIZE`] slots.
  pub fn new() -> Self {
    Self { slots: (0..TABLE_SIZE).map(|_| None).collect() }
  }

  /// Add a subscription. Idempotent (an identical entry already present
  /// succeeds without consuming a slot); fails with `INSUFFICIENT_STORAGE`
  /// if no empty slot remains. Rejects a `Firehose` scope with an empty
  /// filter (spec section 4.7).
  pub fn add<C>(&mut self, sub: Subscription) -> Result<(), Error<C>> {
    if sub.scope == Scope::Firehose && sub.filter.is_empty() {
      return Err(Error::new(What::InvalidState));
    }
    if self.slots.iter().flatten().any(|existing| existing.key() == sub.key() && existing.scope == sub.scope) {
      return Ok(());
    }
    match self.slots.iter_mut().find(|s| s.is_none()) {
      | Some(slot) => {
        *slot = Some(sub);
        Ok(())
      },
      | None => Err(Error::new(What::InsufficientStorage)),
    }
  }

  /// Remove subscriptions matching `filter` exactly; `None` clears every
  /// entry.
  pub fn remove(&mut self, filter: Option<&[u8]>) {
    for slot in self.slots.iter_mut() {
      let matches = match (slot.as_ref(), filter) {
        | (Some(_), None) => true,
        | (Some(sub), Some(f)) => sub.filter.as_slice() == f,
        | (None, _) => false,
      };
      if matches {
        *slot = None;
      }
    }
  }

  /// Iterate over occupied entries, in table order.
  pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
    self.slots.iter().flatten()
  }

  /// Every entry whose filter prefix-matches `event_name`.
  pub fn matching<'a>(&'a self, event_name: &'a [u8]) -> impl Iterator<Item = &'a Subscription> {
    self.iter().filter(move |s| s.matches(event_name))
  }

  /// CRC chain over `(device_id, filter, scope)` per entry, in table
  /// order, via the channel's CRC hook — used for the session record's
  /// subscriptions checksum.
  pub fn checksum(&self, crc: impl Fn(&[u8]) -> u32) -> u32 {
    let mut acc = 0u32;
    for sub in self.iter() {
      let mut buf = Vec::new();
      buf.extend_from_slice(&sub.device_id);
      buf.extend_from_slice(&sub.filter);
      buf.push(match sub.scope {
        | Scope::MyDevices => 0,
        | Scope::Firehose => 1,
      });
      buf.extend_from_slice(&acc.to_be_bytes());
      acc = crc(&buf);
    }
    acc
  }
}

/// A decoded incoming event, ready to dispatch to matching subscriptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingEvent {
  /// Slash-joined event name (all Uri-Path segments after the `e`/`E` marker).
  pub name: Vec<u8>,
  /// Optional Max-Age, seconds.
  pub max_age: Option<u32>,
  /// Event payload.
  pub data: Vec<u8>,
}

/// Parse an inbound `EVENT` message's Uri-Path/Max-Age/payload, per spec
/// section 4.7.
pub fn parse_incoming_event<C>(decoded: &Decoded) -> Result<IncomingEvent, Error<C>> {
  let joined = decoded.uri_path_joined();
  // first segment is the `e`/`E` marker; name is everything after it.
  let name = match joined.iter().position(|&b| b == b'/') {
    | Some(slash) => joined[slash + 1..].to_vec(),
    | None => Vec::new(),
  };
  let max_age = decoded.opt(crate::codec::option_number::MAX_AGE).map(|bytes| {
    let mut padded = [0u8; 4];
    let start = 4 - bytes.len().min(4);
    padded[start..].copy_from_slice(&bytes[..bytes.len().min(4)]);
    u32::from_be_bytes(padded)
  });
  Ok(IncomingEvent { name, max_age, data: decoded.payload.clone() })
}

/// Encode a subscribe POST to `e/<filter>`, per spec section 4.7.
///
/// A targeted subscription carries the device id as a 13-character payload
/// (per the wire contract); an untargeted `MyDevices` subscription carries
/// a Uri-Query `u` option instead. `Firehose` with a device id is treated
/// as targeted.
pub fn encode_subscription<C>(out: &mut [u8], id: u16, filter: &[u8], device_id: Option<&[u8; 13]>, scope: Scope) -> Result<usize, Error<C>> {
  use crate::codec::{option_number, Encoder};

  let mut enc = Encoder::new(Type::Con, Code::POST, id).uri_path(b"e".to_vec());
  for seg in filter.split(|&b| b == b'/') {
    enc = enc.uri_path(seg.to_vec());
  }

  match device_id {
    | Some(device_id) => enc = enc.payload(device_id.to_vec()),
    | None => match scope {
      | Scope::MyDevices => enc = enc.opt(option_number::URI_QUERY, b"u".to_vec()),
      | Scope::Firehose => {},
    },
  }

  enc.encode_into(out)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn event(path: &[&[u8]], payload: &[u8]) -> Decoded {
    use crate::codec::{Encoder, Opt};
    let mut opts = Vec::new();
    for seg in path {
      opts.push(Opt { number: crate::codec::option_number::URI_PATH, value: seg.to_vec() });
    }
    Decoded { ty: Type::Con, token: vec![], code: Code::POST, id: 1, opts, payload: payload.to_vec() }
  }

  #[test]
  fn s4_event_dispatch_matches_prefix_and_skips_others() {
    let mut table = Subscriptions::new();
    table.add::<()>(Subscription { filter: ArrayVec::try_from(&b"foo"[..]).unwrap(),
                                   scope: Scope::MyDevices,
                                   device_id: ArrayVec::new() })
         .unwrap();

    let decoded = event(&[b"e", b"foo", b"bar"], b"hello");
    let incoming = parse_incoming_event::<()>(&decoded).unwrap();
    assert_eq!(incoming.name, b"foo/bar".to_vec());
    assert_eq!(incoming.data, b"hello".to_vec());

    let matched: Vec<_> = table.matching(&incoming.name).collect();
    assert_eq!(matched.len(), 1);

    let other = Subscription { filter: ArrayVec::try_from(&b"baz"[..]).unwrap(),
                               scope: Scope::MyDevices,
                               device_id: ArrayVec::new() };
    assert!(!other.matches(&incoming.name));
  }

  #[test]
  fn add_is_idempotent_and_respects_capacity() {
    let mut table = Subscriptions::new();
    let make = || Subscription { filter: ArrayVec::try_from(&b"x"[..]).unwrap(),
                                 scope: Scope::MyDevices,
                                 device_id: ArrayVec::new() };
    table.add::<()>(make()).unwrap();
    table.add::<()>(make()).unwrap();
    assert_eq!(table.iter().count(), 1);
  }

  #[test]
  fn firehose_with_empty_filter_is_rejected() {
    let mut table = Subscriptions::new();
    let sub = Subscription { filter: ArrayVec::new(), scope: Scope::Firehose, device_id: ArrayVec::new() };
    assert!(table.add::<()>(sub).is_err());
  }

  #[test]
  fn table_rejects_beyond_capacity() {
    let mut table = Subscriptions::new();
    for i in 0..TABLE_SIZE {
      let filter = [b'a' + i as u8];
      table.add::<()>(Subscription { filter: ArrayVec::try_from(&filter[..]).unwrap(),
                                     scope: Scope::MyDevices,
                                     device_id: ArrayVec::new() })
           .unwrap();
    }
    let overflow = Subscription { filter: ArrayVec::try_from(&b"z"[..]).unwrap(),
                                  scope: Scope::MyDevices,
                                  device_id: ArrayVec::new() };
    assert!(table.add::<()>(overflow).is_err());
  }
}
