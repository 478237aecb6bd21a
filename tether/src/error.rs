//! Contextual errors: "what happened" (`What`) plus "what were we doing"
//! (`When`), mirroring the teacher's `core::error` split so a log line or a
//! `Debug` print reads as a sentence instead of a bare variant name.

use core::fmt;

/// What the engine was doing when an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum When {
  /// Polling the channel for an inbound datagram.
  Polling,
  /// Sending a message with a known id/token.
  Sending(u16),
  /// Running the reliable store's retransmit sweep.
  Retransmitting(u16),
  /// Establishing or resuming a session.
  Handshaking,
  /// Dispatching a decoded message to a handler.
  Dispatching,
  /// No specific context.
  None,
}

impl When {
  /// Attach a cause to this context, producing a full [`Error`].
  pub fn what<C: fmt::Debug>(self, what: What<C>) -> Error<C> {
    Error { when: self, what }
  }
}

/// The taxonomy from the protocol's error summary, parameterized over the
/// channel's own I/O error type `C` so transport failures compose in.
#[derive(Debug)]
pub enum What<C> {
  /// A channel (transport) operation failed.
  Channel(C),
  /// The message did not carry an id where one was required.
  MissingMessageId,
  /// No room to carve the requested buffer/entry.
  InsufficientStorage,
  /// An entry was already linked elsewhere in the store.
  InvalidState,
  /// A confirmable message exhausted its retransmit budget.
  MessageTimeout,
  /// The peer sent a RESET in reply to a confirmable message.
  MessageReset,
  /// A request carried no token where one was required.
  MissingRequestToken,
  /// An event or datagram was dropped for exceeding a rate budget.
  BandwidthExceeded,
  /// A buffer failed to parse as a well-formed message.
  MalformedMessage,
  /// The session could not be authenticated / resumed.
  AuthenticationError,
  /// A keepalive ping round-trip exceeded its deadline.
  PingTimeout,
  /// The requested operation is not implemented by the application descriptor.
  NotImplemented,
}

/// A [`What`] paired with the [`When`] it happened in.
#[derive(Debug)]
pub struct Error<C> {
  /// The underlying cause.
  pub what: What<C>,
  /// The context the cause occurred in.
  pub when: When,
}

impl<C> Error<C> {
  /// Construct an error with no useful context.
  pub fn new(what: What<C>) -> Self {
    Self { what, when: When::None }
  }
}

impl<C: fmt::Debug> fmt::Display for Error<C> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:?} (while {:?})", self.what, self.when)
  }
}
