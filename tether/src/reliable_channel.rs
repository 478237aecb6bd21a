//! C6 — reliable CoAP channel: couples a [`CoapIdChannel`] with two
//! independent [`Store`]s (outbound requests, inbound request/response
//! caching), the way `toad::core::Core` owns both a fling queue and a
//! retry queue over one socket (see `core/mod.rs`).

use crate::channel::{Channel, Command, Establish};
use crate::coap_channel::CoapIdChannel;
use crate::codec::{self, Decoded, Type};
use crate::error::{Error, What};
use crate::store::{DeliveryResult, Event, ReceiveOutcome, Store};
use crate::time::Millis;

/// Whether a message is a request (tracked by the server-side store when
/// inbound, the client-side store when outbound) or a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
  /// A request: GET/POST/PUT/DELETE, or an empty CON (ping).
  Request,
  /// A response: ACK/RESET carrying a response code, or empty ACK.
  Response,
}

/// Classify a message's role from its type and code, for store routing.
pub fn role_of(ty: Type, code: codec::Code) -> Role {
  match ty {
    | Type::Ack | Type::Reset if code != codec::Code::EMPTY || ty == Type::Reset => Role::Response,
    | Type::Ack => Role::Response,
    | _ if code.class() == 0 => Role::Request,
    | _ => Role::Response,
  }
}

/// Outcome of [`ReliableCoapChannel::receive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
  /// Nothing arrived this tick.
  Nothing,
  /// A message was fully consumed by the reliability layer (ACK/RESET
  /// matched, or a duplicate CON with nothing cached yet).
  Consumed,
  /// A duplicate CON arrived and we already have a cached reply; these
  /// bytes should be sent back verbatim without re-dispatching.
  Resend(Vec<u8>),
  /// A message should be handed to the application dispatcher.
  Dispatch(Decoded),
}

/// Composes id-assignment (C5) with two reliability stores (C3) over one
/// [`Channel`] (spec component C6).
pub struct ReliableCoapChannel<C> {
  channel: CoapIdChannel<C>,
  client_store: Store,
  server_store: Store,
  retry_seed: u64,
}

impl<C: Channel> ReliableCoapChannel<C> {
  /// Wrap `inner`, seeding the id counter as [`CoapIdChannel::new`] does.
  pub fn new(inner: C, id_seed: u16, retry_seed: u64) -> Self {
    Self { channel: CoapIdChannel::new(inner, id_seed),
           client_store: Store::new(),
           server_store: Store::new(),
           retry_seed }
  }

  /// Borrow the underlying channel (for calling non-reliability methods
  /// like `calculate_crc`, `set_time`, firmware hooks directly).
  pub fn channel(&self) -> &C {
    self.channel.inner()
  }

  /// Mutably borrow the underlying channel.
  pub fn channel_mut(&mut self) -> &mut C {
    self.channel.inner_mut()
  }

  /// The id that will be handed out by the next outbound message, without
  /// consuming it.
  pub fn peek_next_id(&self) -> u16 {
    self.channel.peek_next_id()
  }

  /// Assign and consume the next outbound message id.
  pub fn next_id(&mut self) -> u16 {
    self.channel.next_id()
  }

  /// Seed the outbound id counter (used to resume a persisted session's
  /// `next CoAP id`).
  pub fn seed_next_id(&mut self, id: u16) {
    self.channel.seed_next_id(id)
  }

  /// Outstanding entries across both stores — used by the pinger to back
  /// off while a CON retransmit is already in flight.
  pub fn outstanding_count(&self) -> usize {
    self.client_store.len() + self.server_store.len()
  }

  /// `establish()`: clear both stores (spec section 4.5 — "on establish,
  /// both stores are cleared") and delegate to the inner channel.
  pub fn establish(&mut self) -> Result<Establish, Error<C::Error>> {
    self.client_store.clear();
    self.server_store.clear();
    self.channel.establish().map_err(|e| Error::new(What::Channel(e)))
  }

  /// Issue a session-lifecycle command. `DiscardSession` additionally
  /// clears the server store's duplicate-detection window, since a
  /// renegotiated key changes what "duplicate" means.
  pub fn command(&mut self, cmd: Command) -> Result<(), Error<C::Error>> {
    if cmd == Command::DiscardSession {
      self.server_store.clear();
    }
    self.channel.command(cmd).map_err(|e| Error::new(What::Channel(e)))
  }

  /// Assign an id (if absent) and send one message. Requests go to the
  /// client store; responses to the server store (response caching).
  pub fn send(&mut self, id: u16, ty: Type, code: codec::Code, bytes: &[u8], now: Millis) -> Result<(), Error<C::Error>> {
    match role_of(ty, code) {
      | Role::Request => self.client_store.send(id, ty, bytes, now, true, self.retry_seed ^ id as u64),
      | Role::Response => self.server_store.send(id, ty, bytes, now, false, self.retry_seed ^ id as u64),
    }
    self.channel.send(bytes).map_err(|e| Error::new(What::Channel(e)))?;
    Ok(())
  }

  /// Poll the channel for an inbound datagram, decode it, and fold it
  /// through the appropriate store.
  pub fn receive(&mut self, buf: &mut [u8], now: Millis, events: &mut Vec<Event>) -> Result<Received, Error<C::Error>> {
    let n = match self.channel.receive(buf) {
      | Ok(n) => n,
      | Err(nb::Error::WouldBlock) => return Ok(Received::Nothing),
      | Err(nb::Error::Other(e)) => return Err(Error::new(What::Channel(e))),
    };
    if n == 0 {
      return Ok(Received::Nothing);
    }

    let decoded: Decoded = codec::decode(&buf[..n])?;
    let outcome = match role_of(decoded.ty, decoded.code) {
      | Role::Request => self.server_store.receive(&decoded, now, events),
      | Role::Response => self.client_store.receive(&decoded, now, events),
    };

    for ev in events.iter() {
      let Event::Resolved { was_request, result, .. } = ev;
      if *was_request && *result != DeliveryResult::Delivered {
        self.channel.command(Command::Close).map_err(|e| Error::new(What::Channel(e)))?;
      }
    }

    Ok(match outcome {
      | ReceiveOutcome::Dispatch => Received::Dispatch(decoded),
      | ReceiveOutcome::Consumed => Received::Consumed,
      | ReceiveOutcome::Resend(bytes) => Received::Resend(bytes),
    })
  }

  /// Sweep both stores for retransmits/expiries, sending any due
  /// retransmissions through the raw channel.
  pub fn process(&mut self, now: Millis, events: &mut Vec<Event>) -> Result<(), Error<C::Error>> {
    for bytes in self.client_store.process(now, events) {
      let _ = self.channel.send(&bytes);
    }
    for bytes in self.server_store.process(now, events) {
      let _ = self.channel.send(&bytes);
    }
    for ev in events.iter() {
      let Event::Resolved { was_request, result, .. } = ev;
      if *was_request && *result == DeliveryResult::NotDelivered {
        self.channel.command(Command::Close).map_err(|e| Error::new(What::Channel(e)))?;
      }
    }
    Ok(())
  }

  /// Monotonic millisecond tick from the underlying channel.
  pub fn millis(&self) -> Millis {
    self.channel.millis()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_support::MockChannel;

  #[test]
  fn establish_clears_both_stores() {
    let mut rc = ReliableCoapChannel::new(MockChannel::new(), 0, 1);
    rc.client_store.send(1, Type::Con, &[1], 0, true, 1);
    rc.server_store.send(2, Type::Ack, &[2], 0, false, 1);
    rc.establish().unwrap();
    assert_eq!(rc.outstanding_count(), 0);
  }

  #[test]
  fn request_goes_to_client_store_response_to_server_store() {
    let mut rc = ReliableCoapChannel::new(MockChannel::new(), 0, 1);
    rc.send(1, Type::Con, codec::Code::GET, &[0x40, 0, 0, 1], 0).unwrap();
    assert_eq!(rc.client_store.len(), 1);
    assert_eq!(rc.server_store.len(), 0);

    rc.send(2, Type::Ack, codec::Code::CONTENT, &[0x60, 0x45, 0, 2], 0).unwrap();
    assert_eq!(rc.server_store.len(), 1);
  }
}
