//! C7 — keepalive pinger (spec section 4.10), supplemented per
//! SPEC_FULL.md item 7: back off while a confirmable retransmit is
//! already outstanding, since there's no sense double-probing liveness.

use crate::config::Ping as PingConfig;
use crate::time::{elapsed_since, Millis};

/// Result of [`Pinger::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
  /// Nothing to do this tick.
  Idle,
  /// A ping should be sent now; the caller marks us waiting via
  /// [`Pinger::mark_sent`].
  SendPing,
  /// The outstanding ping has not been ACKed within the timeout — the
  /// transport is presumed stalled.
  Timeout,
}

/// Tracks the last time a datagram was received and whether a keepalive
/// ping is currently outstanding.
#[derive(Debug, Clone, Copy)]
pub struct Pinger {
  config: PingConfig,
  last_received: Millis,
  waiting_since: Option<Millis>,
}

impl Pinger {
  /// A fresh pinger, considering `now` the time of the last received
  /// datagram (so it won't immediately fire on a cold start).
  pub fn new(config: PingConfig, now: Millis) -> Self {
    Self { config, last_received: now, waiting_since: None }
  }

  /// Record that a datagram was received, clearing any outstanding wait.
  pub fn on_receive(&mut self, now: Millis) {
    self.last_received = now;
    self.waiting_since = None;
  }

  /// Whether a ping is currently outstanding (awaiting its ACK).
  pub fn is_waiting(&self) -> bool {
    self.waiting_since.is_some()
  }

  /// Decide what to do at `now`. `outstanding_reliable_entries` is the
  /// store's outstanding-entry count (see
  /// [`crate::reliable_channel::ReliableCoapChannel::outstanding_count`]);
  /// while it is nonzero, a CON is already probing liveness and the pinger
  /// defers.
  pub fn tick(&mut self, now: Millis, outstanding_reliable_entries: usize) -> Outcome {
    if let Some(since) = self.waiting_since {
      if elapsed_since(now, since) > self.config.ping_ack_timeout_millis {
        return Outcome::Timeout;
      }
      return Outcome::Idle;
    }

    if outstanding_reliable_entries > 0 {
      return Outcome::Idle;
    }

    if elapsed_since(now, self.last_received) > self.config.ping_after_silence_millis {
      Outcome::SendPing
    } else {
      Outcome::Idle
    }
  }

  /// Record that a ping was just sent at `now`.
  pub fn mark_sent(&mut self, now: Millis) {
    self.waiting_since = Some(now);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fires_after_silence_then_times_out() {
    let mut pinger = Pinger::new(PingConfig::default(), 0);
    assert_eq!(pinger.tick(15_001, 0), Outcome::SendPing);
    pinger.mark_sent(15_001);
    assert_eq!(pinger.tick(15_001 + 9_999, 0), Outcome::Idle);
    assert_eq!(pinger.tick(15_001 + 10_001, 0), Outcome::Timeout);
  }

  #[test]
  fn receive_clears_waiting() {
    let mut pinger = Pinger::new(PingConfig::default(), 0);
    assert_eq!(pinger.tick(15_001, 0), Outcome::SendPing);
    pinger.mark_sent(15_001);
    pinger.on_receive(16_000);
    assert!(!pinger.is_waiting());
    assert_eq!(pinger.tick(16_000, 0), Outcome::Idle);
  }

  #[test]
  fn defers_while_a_con_retransmit_is_outstanding() {
    let mut pinger = Pinger::new(PingConfig::default(), 0);
    assert_eq!(pinger.tick(20_000, 1), Outcome::Idle);
  }
}
