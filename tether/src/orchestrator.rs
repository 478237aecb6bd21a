//! C12 — protocol orchestrator (spec section 4.6): handshake sequencing,
//! describe posting, time sync, session-state checksums, and inbound
//! dispatch. Grounded on `toad::core::Core`'s polling/event shape
//! (`core/mod.rs` — one owned runtime driving a socket plus retry state)
//! and `spark_protocol.cpp`'s state machine / dispatch table.

use std::collections::BTreeMap;

use crate::channel::{Channel, Command, Establish};
use crate::chunk::ChunkedTransfer;
use crate::codec::{self, Code, Decoded, Encoder, MessageKind, Type, VariableValue};
use crate::config::Config;
use crate::error::{Error, What, When};
use crate::handlers::{self, CompletionToken, Pending, PendingKind};
use crate::message::ScratchBuffer;
use crate::ping::{self, Pinger};
use crate::publisher::Publisher;
use crate::pubsub::{self, Subscriptions};
use crate::reliable_channel::{Received, ReliableCoapChannel};
use crate::session::{protocol_flags, AppStateDescriptor, Record, Restore};
use crate::time::Millis;

/// Lifecycle state (spec section 4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
  /// Before `begin()`.
  Init,
  /// Establishing the secure channel.
  Handshake,
  /// A valid cached session was restored and resumed.
  SessionResumed,
  /// Hello sent (and optionally acknowledged); normal traffic proceeds.
  Operational,
  /// Fatal error or explicit CLOSE; all outstanding acks rejected.
  Closed,
}

/// Device identity presented at Hello.
#[derive(Debug, Clone, Copy)]
pub struct Identity {
  /// Product id.
  pub product_id: u16,
  /// Product firmware version.
  pub product_version: u16,
  /// Platform identifier.
  pub platform_id: u16,
  /// 12-byte device id.
  pub device_id: [u8; 12],
  /// Whether the previous OTA attempt succeeded (carried in Hello flags
  /// indirectly via [`crate::codec::hello_flags::OTA_OK`]).
  pub previous_ota_succeeded: bool,
}

/// What the application exposes to Describe/Function/Variable/Event
/// dispatch (spec section 6's "Application descriptor").
pub trait AppDescriptor {
  /// Functions callable by name.
  fn function_keys(&self) -> Vec<Vec<u8>>;
  /// Variables readable by name, paired with their wire type tag.
  fn variable_keys(&self) -> Vec<(Vec<u8>, VariableKind)>;
  /// Invoke a function. `None` means the application will resolve this
  /// call later via [`Orchestrator::resolve_function`] (the
  /// completion-token pattern — spec section 4.6 design note).
  fn call_function(&mut self, key: &[u8], arg: &[u8]) -> Option<i32>;
  /// Read a variable. `None` defers resolution, same as above.
  fn get_variable(&mut self, key: &[u8]) -> Option<VariableValue>;
  /// Dispatch an incoming event to application-level handlers.
  fn handle_event(&mut self, name: &[u8], data: &[u8]);
  /// Append any platform-specific fields to the Describe-system document.
  fn system_info(&self) -> serde_json::Value {
    serde_json::Value::Null
  }
}

/// Wire type tag for a described variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
  /// `bool`.
  Bool,
  /// 4-byte big-endian signed integer.
  Int,
  /// 8-byte little-endian double.
  Double,
  /// UTF-8 string.
  String,
}

impl VariableKind {
  fn as_str(self) -> &'static str {
    match self {
      | VariableKind::Bool => "bool",
      | VariableKind::Int => "int32",
      | VariableKind::Double => "double",
      | VariableKind::String => "string",
    }
  }
}

/// Describe selector bits (spec section 4.6).
pub mod describe_selector {
  /// System-level describe (platform, modules).
  pub const SYSTEM: u8 = 1;
  /// Application describe (functions, variables).
  pub const APPLICATION: u8 = 2;
  /// Opaque metrics block.
  pub const METRICS: u8 = 4;
}

/// Paces `TIME` requests so one isn't issued before a reasonable interval
/// has passed (SPEC_FULL.md supplement 4, grounded on
/// `spark_protocol.cpp`'s `time_request_pending`/`last_time_sync`).
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeSync {
  last_sync: Option<Millis>,
  pending: bool,
}

/// Minimum interval between self-initiated time-sync requests.
pub const TIME_SYNC_INTERVAL_MILLIS: u32 = 10 * 60 * 1_000;

impl TimeSync {
  /// Whether a fresh `GET t` may be issued at `now`.
  pub fn may_request(&self, now: Millis) -> bool {
    !self.pending && self.last_sync.map_or(true, |last| crate::time::elapsed_since(now, last) >= TIME_SYNC_INTERVAL_MILLIS)
  }

  /// Record that a time-sync request was just issued.
  pub fn mark_requested(&mut self) {
    self.pending = true;
  }

  /// Record that a `TIME` response/push arrived at `now`.
  pub fn on_time(&mut self, now: Millis) {
    self.pending = false;
    self.last_sync = Some(now);
  }
}

/// One notable outcome of [`Orchestrator::event_loop`], surfaced to the
/// caller for logging or integration with a higher-level reconnect loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
  /// Nothing happened this tick.
  Idle,
  /// A message was dispatched (for observability; the dispatch itself
  /// already ran).
  Dispatched(MessageKind),
  /// A function call completed synchronously with this result.
  FunctionResult { key: Vec<u8>, result: i32 },
  /// A function call was handed off for asynchronous resolution.
  FunctionPending { key: Vec<u8>, token: CompletionToken },
  /// A variable read completed synchronously with this value.
  VariableResult { key: Vec<u8>, value: VariableValue },
  /// A variable read was handed off for asynchronous resolution.
  VariablePending { key: Vec<u8>, token: CompletionToken },
  /// An event was delivered to the application.
  Event { name: Vec<u8> },
  /// The keepalive pinger detected a stalled transport.
  PingTimeout,
  /// The channel reported a fatal error; the orchestrator moved to `Closed`.
  Fatal,
}

/// Spec component C12: the protocol state machine tying every other
/// component together. Owns the channel and the two reliability stores
/// (via [`ReliableCoapChannel`]), the subscriptions table, rate limiter,
/// chunk transfer state, pinger, and session record — "Global mutable
/// state becomes a single owned orchestrator value" (spec section 9).
pub struct Orchestrator<C: Channel, A: AppDescriptor> {
  channel: ReliableCoapChannel<C>,
  scratch: ScratchBuffer,
  config: Config,
  identity: Identity,
  state: State,
  subscriptions: Subscriptions,
  publisher: Publisher,
  chunks: ChunkedTransfer,
  pinger: Pinger,
  time_sync: TimeSync,
  session: Record,
  app: A,
  pending: BTreeMap<CompletionToken, Pending>,
  next_token: u32,
}

impl<C: Channel, A: AppDescriptor> Orchestrator<C, A> {
  /// Build a fresh orchestrator in [`State::Init`], with no session
  /// record loaded. Call [`Self::restore_session`] before `begin()` if a
  /// persisted session should be considered.
  pub fn new(channel: C, config: Config, identity: Identity, app: A) -> Self {
    let now = channel.millis();
    Self { channel: ReliableCoapChannel::new(channel, 0, 0x5EED),
           scratch: ScratchBuffer::new(config.protocol_buffer_size),
           config,
           identity,
           state: State::Init,
           subscriptions: Subscriptions::new(),
           publisher: Publisher::new(),
           chunks: ChunkedTransfer::new(config.ota),
           pinger: Pinger::new(config.ping, now),
           time_sync: TimeSync::default(),
           session: Record::default(),
           app,
           pending: BTreeMap::new(),
           next_token: 0 }
  }

  /// Load a persisted session record via the channel's `restore_session`
  /// hook, validating it against `expected_keys_checksum` (a checksum of
  /// the crypto key material currently held by the channel's transport —
  /// spec section 3's stale-record guard). On [`Restore::Complete`] or
  /// [`Restore::Renegotiate`], seeds the outbound id counter and adopts the
  /// restored record; on [`Restore::NoSession`], leaves the orchestrator in
  /// its fresh-record state.
  pub fn restore_session(&mut self, expected_keys_checksum: u32) -> Restore {
    let mut probe = vec![0u8; crate::session::WIRE_SIZE];
    let (record, restore) = match self.channel.channel_mut().restore_session(&mut probe) {
      | Some(n) if n >= probe.len() => Record::restore::<C::Error>(&probe, expected_keys_checksum),
      | _ => (Record::default(), Restore::NoSession),
    };
    if restore != Restore::NoSession {
      self.channel.seed_next_id(record.next_coap_id);
      self.session = record;
    }
    restore
  }

  /// Current lifecycle state.
  pub fn state(&self) -> State {
    self.state
  }

  fn current_app_state(&self) -> AppStateDescriptor {
    let crc = |bytes: &[u8]| self.channel.channel().calculate_crc(bytes);
    let app_doc = self.describe_document(describe_selector::APPLICATION);
    let system_doc = self.describe_document(describe_selector::SYSTEM);
    AppStateDescriptor { subscriptions_crc: self.subscriptions.checksum(crc),
                         describe_app_crc: crc(&serde_json::to_vec(&app_doc).unwrap_or_default()),
                         describe_system_crc: crc(&serde_json::to_vec(&system_doc).unwrap_or_default()),
                         protocol_flags: self.session.app_state.protocol_flags }
  }

  fn encode_into_scratch(&mut self, f: impl FnOnce(&mut [u8]) -> Result<usize, Error<C::Error>>) -> Result<Vec<u8>, Error<C::Error>> {
    let mut view = self.scratch.message();
    let buf = view.as_capacity_mut();
    let n = f(buf)?;
    Ok(buf[..n].to_vec())
  }

  /// `begin()` — spec section 4.6: establish/resume the secure channel,
  /// then either skip straight to `SESSION_RESUMED` or run the Hello
  /// handshake.
  pub fn begin(&mut self) -> Result<State, Error<C::Error>> {
    self.state = State::Handshake;
    self.pending.clear();
    let now = self.channel.millis();
    self.pinger = Pinger::new(self.config.ping, now);

    match self.channel.establish()? {
      | Establish::Fresh => self.run_hello_handshake(),
      | Establish::SessionResumed => {
        self.channel.command(Command::MoveSession)?;
        let current = self.current_app_state();
        if current == self.session.app_state {
          self.state = State::SessionResumed;
          self.send_ping()?;
          Ok(State::SessionResumed)
        } else {
          self.channel.command(Command::SaveSession)?;
          self.channel.command(Command::LoadSession)?;
          self.run_hello_handshake()
        }
      },
    }
  }

  fn run_hello_handshake(&mut self) -> Result<State, Error<C::Error>> {
    let mut flags = 0u8;
    if self.identity.previous_ota_succeeded {
      flags |= codec::hello_flags::OTA_OK;
    }
    if self.config.handshake.device_initiated_describe {
      flags |= codec::hello_flags::DEVICE_INITIATED_DESCRIBE;
    }
    if self.config.ota.compressed_ota {
      flags |= codec::hello_flags::COMPRESSED_OTA;
    }

    let id = self.channel.next_id();
    let identity = self.identity;
    let bytes = self.encode_into_scratch(|buf| codec::encode_hello(buf, id, identity.product_id, identity.product_version, identity.platform_id, flags, Some(&identity.device_id)))?;
    let now = self.channel.millis();
    self.channel.send(id, Type::Con, Code::POST, &bytes, now)?;

    if self.config.handshake.hello_response_required {
      self.await_hello_response()?;
    }

    self.channel.command(Command::Established)?;
    self.session.app_state.protocol_flags = flags as u32;
    if self.config.handshake.hello_response_required {
      self.session.app_state.protocol_flags |= protocol_flags::REQUIRES_HELLO_RESPONSE;
    }
    self.state = State::Operational;

    if self.config.handshake.device_initiated_describe {
      self.post_system_describe()?;
    }

    Ok(State::Operational)
  }

  fn await_hello_response(&mut self) -> Result<(), Error<C::Error>> {
    let deadline = self.channel.millis().wrapping_add(self.config.handshake.hello_response_timeout_millis);
    loop {
      let now = self.channel.millis();
      if crate::time::has_passed(now, deadline) {
        return Err(When::Handshaking.what(What::MessageTimeout));
      }
      let mut events = Vec::new();
      let mut view = self.scratch.message();
      let buf = view.as_capacity_mut();
      match self.channel.receive(buf, now, &mut events)? {
        | Received::Dispatch(decoded) if matches!(codec::classify(decoded.ty, decoded.code, decoded.first_uri_path()), MessageKind::Hello) => {
          return Ok(());
        },
        | _ => continue,
      }
    }
  }

  fn send_ping(&mut self) -> Result<(), Error<C::Error>> {
    let id = self.channel.next_id();
    let bytes = self.encode_into_scratch(|buf| codec::encode_ping(buf, id))?;
    let now = self.channel.millis();
    self.channel.send(id, Type::Con, Code::EMPTY, &bytes, now)?;
    self.pinger.mark_sent(now);
    Ok(())
  }

  fn post_system_describe(&mut self) -> Result<(), Error<C::Error>> {
    let doc = self.describe_document(describe_selector::SYSTEM);
    let id = self.channel.next_id();
    let payload = serde_json::to_vec(&doc).unwrap_or_default();
    let bytes = self.encode_into_scratch(|buf| Encoder::new(Type::Con, Code::POST, id).uri_path(b"d".to_vec()).payload(payload).encode_into(buf))?;
    let now = self.channel.millis();
    self.channel.send(id, Type::Con, Code::POST, &bytes, now)?;
    Ok(())
  }

  fn describe_document(&self, selector: u8) -> serde_json::Value {
    let mut doc = serde_json::Map::new();
    if selector & describe_selector::APPLICATION != 0 {
      let funcs: Vec<String> = self.app.function_keys().into_iter().map(|k| String::from_utf8_lossy(&k).into_owned()).collect();
      let vars: serde_json::Map<String, serde_json::Value> = self.app
                                                                  .variable_keys()
                                                                  .into_iter()
                                                                  .map(|(k, t)| (String::from_utf8_lossy(&k).into_owned(), serde_json::Value::String(t.as_str().to_string())))
                                                                  .collect();
      doc.insert("f".into(), serde_json::Value::from(funcs));
      doc.insert("v".into(), serde_json::Value::Object(vars));
    }
    if selector & describe_selector::SYSTEM != 0 {
      doc.insert("s".into(), self.app.system_info());
    }
    serde_json::Value::Object(doc)
  }

  fn next_token(&mut self) -> CompletionToken {
    self.next_token = self.next_token.wrapping_add(1);
    CompletionToken(self.next_token)
  }

  fn reply(&mut self, id: u16, ty: Type, code: Code, payload: Vec<u8>) -> Result<(), Error<C::Error>> {
    let bytes = self.encode_into_scratch(|buf| Encoder::new(ty, code, id).payload(payload).encode_into(buf))?;
    let now = self.channel.millis();
    self.channel.send(id, ty, code, &bytes, now)
  }

  fn empty_ack(&mut self, id: u16) -> Result<(), Error<C::Error>> {
    self.reply(id, Type::Ack, Code::EMPTY, Vec::new())
  }

  /// Resolve a previously deferred function call (completion-token
  /// pattern). No-op if `token` is unknown or not a function completion.
  pub fn resolve_function(&mut self, token: CompletionToken, result: i32) -> Result<(), Error<C::Error>> {
    if let Some(pending) = self.pending.get(&token).copied() {
      if pending.kind == PendingKind::Function {
        self.pending.remove(&token);
        return self.reply(pending.message_id, Type::Ack, Code::CHANGED, codec::encode_function_result(result));
      }
    }
    Ok(())
  }

  /// Resolve a previously deferred variable read. No-op if `token` is
  /// unknown or not a variable completion.
  pub fn resolve_variable(&mut self, token: CompletionToken, value: &VariableValue) -> Result<(), Error<C::Error>> {
    if let Some(pending) = self.pending.get(&token).copied() {
      if pending.kind == PendingKind::Variable {
        self.pending.remove(&token);
        return self.reply(pending.message_id, Type::Ack, Code::CONTENT, codec::encode_variable_value(value));
      }
    }
    Ok(())
  }

  /// `event_loop()` — one tick: age the pinger, poll the channel, dispatch
  /// or perform idle work. Call this repeatedly from the application's
  /// main loop (spec section 5: "single-threaded cooperative").
  pub fn event_loop(&mut self) -> Result<Outcome, Error<C::Error>> {
    if self.state == State::Closed {
      return Err(When::Dispatching.what(What::AuthenticationError));
    }

    let now = self.channel.millis();
    let mut events = Vec::new();
    let received = {
      let mut view = self.scratch.message();
      let buf = view.as_capacity_mut();
      self.channel.receive(buf, now, &mut events)?
    };

    for ev in &events {
      let crate::store::Event::Resolved { result, .. } = ev;
      if *result != crate::store::DeliveryResult::NotDelivered {
        self.pinger.on_receive(now);
      }
    }

    match received {
      | Received::Nothing => self.idle(now),
      | Received::Consumed => Ok(Outcome::Idle),
      | Received::Resend(bytes) => {
        let _ = self.channel.channel_mut().send(&bytes);
        Ok(Outcome::Idle)
      },
      | Received::Dispatch(decoded) => self.dispatch(decoded, now),
    }
  }

  fn idle(&mut self, now: Millis) -> Result<Outcome, Error<C::Error>> {
    let mut events = Vec::new();
    self.channel.process(now, &mut events)?;
    for ev in &events {
      let crate::store::Event::Resolved { result, .. } = ev;
      if *result == crate::store::DeliveryResult::NotDelivered {
        self.state = State::Closed;
        return Ok(Outcome::Fatal);
      }
    }

    if self.time_sync.may_request(now) {
      self.request_time()?;
    }

    match self.pinger.tick(now, self.channel.outstanding_count()) {
      | ping::Outcome::SendPing => {
        self.send_ping()?;
        Ok(Outcome::Idle)
      },
      | ping::Outcome::Timeout => {
        self.state = State::Closed;
        Ok(Outcome::PingTimeout)
      },
      | ping::Outcome::Idle => Ok(Outcome::Idle),
    }
  }

  fn request_time(&mut self) -> Result<(), Error<C::Error>> {
    let id = self.channel.next_id();
    let bytes = self.encode_into_scratch(|buf| Encoder::new(Type::Con, Code::GET, id).uri_path(b"t".to_vec()).encode_into(buf))?;
    let now = self.channel.millis();
    self.channel.send(id, Type::Con, Code::GET, &bytes, now)?;
    self.time_sync.mark_requested();
    Ok(())
  }

  fn dispatch(&mut self, decoded: Decoded, now: Millis) -> Result<Outcome, Error<C::Error>> {
    let kind = codec::classify(decoded.ty, decoded.code, decoded.first_uri_path());
    let is_con = decoded.ty == Type::Con;
    let id = decoded.id;

    let outcome = match kind {
      | MessageKind::Hello => {
        if is_con {
          self.empty_ack(id)?;
        }
        Outcome::Dispatched(kind)
      },
      | MessageKind::Describe => {
        let selector = decoded.opt(codec::option_number::URI_QUERY).and_then(|v| v.first().copied()).unwrap_or(describe_selector::APPLICATION | describe_selector::SYSTEM);
        if selector == describe_selector::METRICS {
          self.reply(id, Type::Ack, Code::CONTENT, Vec::new())?;
        } else {
          let doc = self.describe_document(selector);
          let payload = serde_json::to_vec(&doc).unwrap_or_default();
          self.reply(id, Type::Ack, Code::CONTENT, payload)?;
        }
        Outcome::Dispatched(kind)
      },
      | MessageKind::FunctionCall => {
        let call = handlers::decode_function_call(&decoded)?;
        self.empty_ack(id)?;
        match self.app.call_function(&call.key, &call.arg) {
          | Some(result) => {
            self.reply(id, Type::Ack, Code::CHANGED, codec::encode_function_result(result))?;
            Outcome::FunctionResult { key: call.key.to_vec(), result }
          },
          | None => {
            let token = self.next_token();
            self.pending.insert(token, Pending { message_id: id, kind: PendingKind::Function });
            Outcome::FunctionPending { key: call.key.to_vec(), token }
          },
        }
      },
      | MessageKind::VariableRequest => {
        let req = handlers::decode_variable_request(&decoded)?;
        self.empty_ack(id)?;
        match self.app.get_variable(&req.key) {
          | Some(value) => {
            self.reply(id, Type::Ack, Code::CONTENT, codec::encode_variable_value(&value))?;
            Outcome::VariableResult { key: req.key.to_vec(), value }
          },
          | None => {
            let token = self.next_token();
            self.pending.insert(token, Pending { message_id: id, kind: PendingKind::Variable });
            Outcome::VariablePending { key: req.key.to_vec(), token }
          },
        }
      },
      | MessageKind::Event => {
        if is_con {
          self.empty_ack(id)?;
        }
        let incoming = pubsub::parse_incoming_event(&decoded)?;
        self.publisher.publish(&incoming.name, now)?;
        self.app.handle_event(&incoming.name, &incoming.data);
        Outcome::Event { name: incoming.name }
      },
      | MessageKind::UpdateBegin => {
        let reply = self.chunks.handle_update_begin(self.channel.channel_mut(), &decoded.payload);
        self.send_chunk_reply(id, reply)?;
        Outcome::Dispatched(kind)
      },
      | MessageKind::Chunk if decoded.code == Code::POST => {
        let crc = decoded.opt(codec::option_number::CHUNK_CRC).unwrap_or(&[]);
        let index = decoded.opt(codec::option_number::CHUNK_INDEX);
        let reply = self.chunks.handle_chunk(self.channel.channel_mut(), crc, index, &decoded.payload);
        self.send_chunk_reply(id, reply)?;
        Outcome::Dispatched(kind)
      },
      | MessageKind::UpdateDone => {
        let (reply, missed) = self.chunks.handle_update_done(self.channel.channel_mut());
        self.send_chunk_reply(id, reply)?;
        if let Some(indices_bytes) = missed {
          let indices: Vec<u16> = indices_bytes.chunks_exact(2).map(|c| u16::from_be_bytes([c[0], c[1]])).collect();
          let req_id = self.channel.next_id();
          let bytes = self.encode_into_scratch(|buf| codec::encode_chunk_missed(buf, req_id, &indices))?;
          let now = self.channel.millis();
          self.channel.send(req_id, Type::Con, Code::GET, &bytes, now)?;
        }
        Outcome::Dispatched(kind)
      },
      | MessageKind::SignalStart | MessageKind::SignalStop => {
        let on = kind == MessageKind::SignalStart;
        let accepted = self.channel.channel_mut().signal(on, &decoded.payload);
        log::debug!("signal on={on} accepted={accepted}");
        self.reply(id, Type::Ack, Code::CHANGED, Vec::new())?;
        Outcome::Dispatched(kind)
      },
      | MessageKind::Time => {
        let unix = u32::from_be_bytes(decoded.payload.get(..4).and_then(|s| s.try_into().ok()).unwrap_or([0; 4]));
        self.channel.channel_mut().set_time(unix);
        self.time_sync.on_time(now);
        Outcome::Dispatched(kind)
      },
      | MessageKind::Ping => {
        self.empty_ack(id)?;
        Outcome::Dispatched(kind)
      },
      | MessageKind::KeyChange => {
        if is_con {
          self.empty_ack(id)?;
        }
        self.channel.command(Command::DiscardSession)?;
        self.subscriptions.remove(None);
        Outcome::Dispatched(kind)
      },
      | MessageKind::SaveBegin => Outcome::Dispatched(kind),
      | MessageKind::EmptyAck | MessageKind::Response => Outcome::Dispatched(kind),
      | MessageKind::Unknown => {
        log::warn!("dropping unrecognized message id={id}");
        Outcome::Idle
      },
    };

    Ok(outcome)
  }

  fn send_chunk_reply(&mut self, id: u16, reply: crate::chunk::Reply) -> Result<(), Error<C::Error>> {
    use crate::chunk::Reply;
    match reply {
      | Reply::None => Ok(()),
      | Reply::CodedAck { class, detail } => self.reply(id, Type::Ack, Code::new(class, detail), Vec::new()),
      | Reply::UpdateReady { fast_ota } => {
        let bytes = self.encode_into_scratch(|buf| codec::encode_update_ready(buf, id, fast_ota))?;
        let now = self.channel.millis();
        self.channel.send(id, Type::Ack, Code::CHANGED, &bytes, now)
      },
      | Reply::ChunkReceived { ok } => {
        let bytes = self.encode_into_scratch(|buf| codec::encode_chunk_received(buf, id, ok))?;
        let now = self.channel.millis();
        self.channel.send(id, Type::Ack, if ok { Code::CHANGED } else { Code::BAD_REQUEST }, &bytes, now)
      },
      | Reply::UpdateDone { payload } => self.reply(id, Type::Ack, Code::CHANGED, payload),
    }
  }

  /// Add a subscription and issue its `POST e/<filter>` (spec section 4.7).
  pub fn subscribe(&mut self, filter: &[u8], device_id: Option<&[u8; 13]>, scope: pubsub::Scope) -> Result<(), Error<C::Error>> {
    let sub = pubsub::Subscription { filter: filter.try_into().map_err(|_| Error::new(What::InsufficientStorage))?,
                                     scope,
                                     device_id: arrayvec::ArrayVec::new() };
    self.subscriptions.add(sub)?;

    let id = self.channel.next_id();
    let bytes = self.encode_into_scratch(|buf| pubsub::encode_subscription(buf, id, filter, device_id, scope))?;
    let now = self.channel.millis();
    self.channel.send(id, Type::Con, Code::POST, &bytes, now)
  }

  /// Persist the session record through the channel's `save_session` hook,
  /// stamping the next-id counter and current app-state checksums first.
  pub fn persist_session(&mut self) -> Result<(), Error<C::Error>> {
    self.session.next_coap_id = self.channel.peek_next_id();
    self.session.app_state = self.current_app_state();
    let bytes = self.session.to_bytes();
    self.channel.channel_mut().save_session(&bytes).map_err(|e| Error::new(What::Channel(e)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_support::MockChannel;

  struct NoopApp;
  impl AppDescriptor for NoopApp {
    fn function_keys(&self) -> Vec<Vec<u8>> {
      vec![]
    }
    fn variable_keys(&self) -> Vec<(Vec<u8>, VariableKind)> {
      vec![]
    }
    fn call_function(&mut self, _key: &[u8], _arg: &[u8]) -> Option<i32> {
      Some(0)
    }
    fn get_variable(&mut self, _key: &[u8]) -> Option<VariableValue> {
      None
    }
    fn handle_event(&mut self, _name: &[u8], _data: &[u8]) {}
  }

  struct DeferringApp;
  impl AppDescriptor for DeferringApp {
    fn function_keys(&self) -> Vec<Vec<u8>> {
      vec![]
    }
    fn variable_keys(&self) -> Vec<(Vec<u8>, VariableKind)> {
      vec![]
    }
    fn call_function(&mut self, _key: &[u8], _arg: &[u8]) -> Option<i32> {
      None
    }
    fn get_variable(&mut self, _key: &[u8]) -> Option<VariableValue> {
      None
    }
    fn handle_event(&mut self, _name: &[u8], _data: &[u8]) {}
  }

  fn identity() -> Identity {
    Identity { product_id: 1, product_version: 1, platform_id: 6, device_id: [9; 12], previous_ota_succeeded: true }
  }

  #[test]
  fn s5_session_resume_with_matching_app_state_skips_hello() {
    let mut channel = MockChannel::new();
    channel.establish_result = Establish::SessionResumed;
    let mut config = Config::default();
    config.handshake.hello_response_required = false;
    let mut orch = Orchestrator::new(channel, config, identity(), NoopApp);
    orch.session.persistent = true;
    orch.session.app_state = orch.current_app_state();

    let state = orch.begin().unwrap();
    assert_eq!(state, State::SessionResumed);
    assert!(orch.channel.channel().commands.contains(&Command::MoveSession));
    let sent = &orch.channel.channel().outbound;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0][1], 0); // empty code => ping, not hello
  }

  #[test]
  fn fresh_handshake_sends_hello_and_goes_operational() {
    let mut config = Config::default();
    config.handshake.hello_response_required = false;
    let channel = MockChannel::new();
    let mut orch = Orchestrator::new(channel, config, identity(), NoopApp);
    let state = orch.begin().unwrap();
    assert_eq!(state, State::Operational);
    assert_eq!(orch.channel.channel().outbound.len(), 1);
  }

  #[test]
  fn function_call_without_synchronous_result_defers_via_completion_token() {
    let mut config = Config::default();
    config.handshake.hello_response_required = false;
    let channel = MockChannel::new();
    let mut orch = Orchestrator::new(channel, config, identity(), DeferringApp);
    orch.begin().unwrap();

    let mut req = [0u8; 64];
    let n = Encoder::new(Type::Con, Code::POST, 9).uri_path(b"f".to_vec())
                                                  .uri_path(b"doit".to_vec())
                                                  .encode_into::<()>(&mut req)
                                                  .unwrap();
    orch.channel.channel_mut().push_inbound(&req[..n]);

    let outcome = orch.event_loop().unwrap();
    let token = match outcome {
      | Outcome::FunctionPending { token, .. } => token,
      | other => panic!("expected FunctionPending, got {other:?}"),
    };

    orch.resolve_function(token, 42).unwrap();
    let last = orch.channel.channel().outbound.last().unwrap();
    let decoded = codec::decode::<()>(last).unwrap();
    assert_eq!(decoded.code, Code::CHANGED);
    assert_eq!(decoded.payload, 42i32.to_be_bytes().to_vec());
  }
}
