//! C3 — reliable message store.
//!
//! Per spec section 9's design note, the original's singly-linked list of
//! raw-pointer entries becomes an owned `BTreeMap` keyed by message id —
//! iteration is bounded (few outstanding messages at once) and a stable-key
//! map gives us "at most one entry per id" for free via `insert`.

use std::collections::BTreeMap;

use crate::codec::{self, Type};
use crate::retry::{RetryTimer, YouShould, MAX_TRANSMIT_SPAN};
use crate::time::{has_passed, Millis};

/// What an entry is tracking.
#[derive(Debug, Clone)]
enum Kind {
  /// An outbound confirmable message awaiting ACK/RESET; retransmitted on
  /// `retry`'s schedule.
  Confirmable { retry: RetryTimer },
  /// A cached ACK/RESET we sent in response to an inbound CON, kept around
  /// so a duplicate CON can be answered byte-identically without
  /// re-running the handler.
  ResponseCache { expires_at: Millis },
  /// A short placeholder recording "we've seen this inbound CON id before",
  /// used when no response has been cached yet (the handler is still
  /// running, e.g. an async variable resolve).
  DuplicateSeen { expires_at: Millis },
}

/// One entry in the store.
#[derive(Debug, Clone)]
pub struct Entry {
  id: u16,
  kind: Kind,
  /// Copy of the message bytes to retransmit/resend, empty for placeholders.
  bytes: Vec<u8>,
  /// Whether the original message was a request (affects cleanup policy).
  is_request: bool,
}

impl Entry {
  /// The message id this entry tracks.
  pub fn id(&self) -> u16 {
    self.id
  }

  /// The bytes to retransmit or resend, if any.
  pub fn bytes(&self) -> &[u8] {
    &self.bytes
  }

  /// Number of times a confirmable entry has been transmitted so far.
  pub fn transmit_count(&self) -> Option<u8> {
    match &self.kind {
      | Kind::Confirmable { retry } => Some(retry.transmit_count()),
      | _ => None,
    }
  }
}

/// Outcome of a delivery attempt, reported once per entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryResult {
  /// An ACK matched; the message was delivered.
  Delivered,
  /// Retransmit budget exhausted with no ACK/RESET.
  NotDelivered,
  /// A RESET matched; the peer rejected the message.
  DeliveredNack,
}

/// One notable thing that happened during [`Store::process`] or
/// [`Store::receive`], for the orchestrator to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
  /// `id` resolved with `result`; if `was_request`, a timeout or reset
  /// should additionally trigger a channel CLOSE/session-discard.
  Resolved { id: u16, result: DeliveryResult, was_request: bool },
}

/// What the caller should do after [`Store::receive`] processes an inbound
/// message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
  /// The message should be handed to the application/dispatcher as-is.
  Dispatch,
  /// The message was consumed entirely by the store (an ACK/RESET that
  /// matched, or a duplicate with nothing cached yet) — the caller should
  /// treat it as a no-op and not dispatch it further.
  Consumed,
  /// A duplicate CON arrived for which we already have a cached response;
  /// resend these bytes verbatim rather than re-running the handler.
  Resend(Vec<u8>),
}

/// Per-direction list of outstanding messages (spec component C3). One
/// store tracks outbound confirmables and their ACK/RESET resolution;
/// a second, independent instance tracks inbound CON response caching
/// (see [`crate::reliable_channel`]).
#[derive(Debug, Default)]
pub struct Store {
  entries: BTreeMap<u16, Entry>,
}

impl Store {
  /// An empty store.
  pub fn new() -> Self {
    Self { entries: BTreeMap::new() }
  }

  /// Number of outstanding entries.
  pub fn len(&self) -> usize {
    self.entries.len()
  }

  /// Whether the store currently holds no entries.
  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Look up the entry for `id`, if any.
  pub fn for_id(&self, id: u16) -> Option<&Entry> {
    self.entries.get(&id)
  }

  /// Remove every entry, discarding it without notification (used on
  /// session `establish`/`DISCARD_SESSION`).
  pub fn clear(&mut self) {
    self.entries.clear();
  }

  /// `send(msg, now)`: enqueue a just-sent message per its type.
  ///
  /// - `CON` — tracked with a retransmit timer.
  /// - `ACK`/`RESET` — cached as a response, expiring after `MAX_TRANSMIT_SPAN`.
  /// - `NON` — not enqueued.
  ///
  /// An existing entry with the same id is evicted first, per the data
  /// model's "adding an entry with an existing id silently replaces".
  pub fn send(&mut self, id: u16, ty: Type, bytes: &[u8], now: Millis, is_request: bool, retry_seed: u64) {
    match ty {
      | Type::Con => {
        self.entries.insert(id,
                            Entry { id,
                                    kind: Kind::Confirmable { retry: RetryTimer::new(now, retry_seed) },
                                    bytes: bytes.to_vec(),
                                    is_request });
      },
      | Type::Ack | Type::Reset => {
        self.entries.insert(id,
                            Entry { id,
                                    kind: Kind::ResponseCache { expires_at: now.wrapping_add(MAX_TRANSMIT_SPAN) },
                                    bytes: bytes.to_vec(),
                                    is_request: false });
      },
      | Type::Non => {
        self.entries.remove(&id);
      },
    }
  }

  /// `receive(msg, now)`: fold an inbound message into the store per its
  /// type, returning what the caller should do with it and any delivery
  /// events that fired.
  pub fn receive(&mut self, decoded: &codec::Decoded, now: Millis, events: &mut Vec<Event>) -> ReceiveOutcome {
    match decoded.ty {
      | Type::Ack | Type::Reset => {
        match self.entries.remove(&decoded.id) {
          | Some(entry) => {
            let result = if decoded.ty == Type::Reset { DeliveryResult::DeliveredNack } else { DeliveryResult::Delivered };
            events.push(Event::Resolved { id: decoded.id, result, was_request: entry.is_request });
            ReceiveOutcome::Consumed
          },
          | None => ReceiveOutcome::Consumed,
        }
      },
      | Type::Con => match self.entries.get(&decoded.id) {
        | Some(Entry { kind: Kind::ResponseCache { .. }, bytes, .. }) => ReceiveOutcome::Resend(bytes.clone()),
        | Some(_) => ReceiveOutcome::Consumed,
        | None => {
          // First time we've seen this id: record a short placeholder so a
          // retransmitted duplicate (arriving before we've cached a real
          // response) is suppressed too, then let the caller dispatch it.
          self.entries.insert(decoded.id,
                              Entry { id: decoded.id,
                                      kind: Kind::DuplicateSeen { expires_at: now.wrapping_add(MAX_TRANSMIT_SPAN) },
                                      bytes: Vec::new(),
                                      is_request: true });
          ReceiveOutcome::Dispatch
        },
      },
      | Type::Non => ReceiveOutcome::Dispatch,
    }
  }

  /// `process(now)`: sweep every entry whose deadline has passed —
  /// retransmitting confirmables under budget, and expiring (with a
  /// delivery event) everything else. Confirmables due for retransmit have
  /// their bytes returned for the caller to hand to the channel.
  pub fn process(&mut self, now: Millis, events: &mut Vec<Event>) -> Vec<Vec<u8>> {
    let mut to_retransmit = Vec::new();
    let mut to_remove = Vec::new();

    for entry in self.entries.values_mut() {
      match &mut entry.kind {
        | Kind::Confirmable { retry } => {
          if !retry.is_due(now) {
            continue;
          }
          match retry.what_should_i_do(now) {
            | YouShould::Retry => to_retransmit.push(entry.bytes.clone()),
            | YouShould::Cry => {
              events.push(Event::Resolved { id: entry.id, result: DeliveryResult::NotDelivered, was_request: entry.is_request });
              to_remove.push(entry.id);
            },
          }
        },
        | Kind::ResponseCache { expires_at } | Kind::DuplicateSeen { expires_at } => {
          if has_passed(now, *expires_at) {
            to_remove.push(entry.id);
          }
        },
      }
    }

    for id in to_remove {
      self.entries.remove(&id);
    }

    to_retransmit
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::codec::{Code, Decoded};

  fn ack(id: u16) -> Decoded {
    Decoded { ty: Type::Ack, token: vec![], code: Code::EMPTY, id, opts: vec![], payload: vec![] }
  }

  fn reset(id: u16) -> Decoded {
    Decoded { ty: Type::Reset, token: vec![], code: Code::EMPTY, id, opts: vec![], payload: vec![] }
  }

  fn con(id: u16) -> Decoded {
    Decoded { ty: Type::Con, token: vec![], code: Code::EMPTY, id, opts: vec![], payload: vec![] }
  }

  #[test]
  fn at_most_one_entry_per_id_and_ack_clears_it() {
    let mut store = Store::new();
    store.send(1, Type::Con, &[1, 2, 3], 0, false, 1);
    store.send(1, Type::Con, &[4, 5, 6], 0, false, 1);
    assert_eq!(store.len(), 1);
    assert_eq!(store.for_id(1).unwrap().bytes(), &[4, 5, 6]);

    let mut events = Vec::new();
    let outcome = store.receive(&ack(1), 0, &mut events);
    assert_eq!(outcome, ReceiveOutcome::Consumed);
    assert!(store.for_id(1).is_none());
    assert_eq!(events, vec![Event::Resolved { id: 1, result: DeliveryResult::Delivered, was_request: false }]);
  }

  #[test]
  fn duplicate_con_with_cached_response_resends_verbatim() {
    let mut store = Store::new();
    store.send(9, Type::Ack, &[0xAA, 0xBB], 0, false, 0);

    let mut events = Vec::new();
    let outcome = store.receive(&con(9), 0, &mut events);
    assert_eq!(outcome, ReceiveOutcome::Resend(vec![0xAA, 0xBB]));
  }

  #[test]
  fn first_con_dispatches_and_is_then_suppressed() {
    let mut store = Store::new();
    let mut events = Vec::new();
    assert_eq!(store.receive(&con(3), 0, &mut events), ReceiveOutcome::Dispatch);
    assert_eq!(store.receive(&con(3), 0, &mut events), ReceiveOutcome::Consumed);
  }

  #[test]
  fn reset_removes_and_reports_nack() {
    let mut store = Store::new();
    store.send(2, Type::Con, &[1], 0, true, 5);
    let mut events = Vec::new();
    store.receive(&reset(2), 0, &mut events);
    assert_eq!(events, vec![Event::Resolved { id: 2, result: DeliveryResult::DeliveredNack, was_request: true }]);
  }

  #[test]
  fn non_confirmable_is_never_enqueued() {
    let mut store = Store::new();
    store.send(4, Type::Non, &[1, 2], 0, false, 0);
    assert!(store.is_empty());
  }

  #[test]
  fn retransmits_until_budget_exhausted_then_notifies() {
    let mut store = Store::new();
    store.send(7, Type::Con, &[9], 0, true, 3);

    let mut now = 0u32;
    let mut sends = 0;
    loop {
      now = now.wrapping_add(100_000);
      let mut events = Vec::new();
      let resends = store.process(now, &mut events);
      sends += resends.len();
      if !events.is_empty() {
        assert_eq!(events[0], Event::Resolved { id: 7, result: DeliveryResult::NotDelivered, was_request: true });
        break;
      }
    }
    assert_eq!(sends, crate::retry::MAX_RETRANSMIT as usize);
    assert!(store.is_empty());
  }
}
