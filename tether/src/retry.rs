//! Exponential-backoff retransmit timing for confirmable messages.
//!
//! The shape (a non-blocking timer that tells its caller `Retry` or `Cry`)
//! follows the teacher's `retry::RetryTimer`; the schedule itself is fixed
//! to the constants this protocol specifies rather than being pluggable,
//! since every CON entry in the store retries on the same curve.

use rand::{Rng, SeedableRng};

use crate::time::{has_passed, Millis};

/// Base delay before the first retransmit of a confirmable message.
pub const ACK_TIMEOUT: u32 = 4_000;
/// Upper multiplier applied to the jitter window for each attempt.
pub const ACK_RANDOM_FACTOR: f32 = 1.5;
/// Number of retransmits allowed after the initial send (so 4 sends total).
pub const MAX_RETRANSMIT: u8 = 3;
/// Ceiling on the total time a confirmable message may stay outstanding.
pub const MAX_TRANSMIT_SPAN: u32 = 45_000;

/// What the caller should do after consulting a [`RetryTimer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YouShould {
  /// Retransmit now; `transmit_count` has already been bumped.
  Retry,
  /// Retransmit budget exhausted — give up and notify `NOT_DELIVERED`.
  Cry,
}

/// Lower/upper bound, in milliseconds, of the backoff window for retransmit
/// attempt `k` (0-based — `k == 0` is the delay before the *first* retry,
/// i.e. the second transmission overall).
///
/// ```
/// use tether::retry::transmit_timeout_range;
///
/// let (lo, hi) = transmit_timeout_range(0);
/// assert_eq!(lo, 4_000);
/// assert_eq!(hi, 6_000);
///
/// let (lo, hi) = transmit_timeout_range(2);
/// assert_eq!(lo, 16_000);
/// assert_eq!(hi, 24_000);
/// ```
pub fn transmit_timeout_range(k: u8) -> (u32, u32) {
  let lo = ACK_TIMEOUT.saturating_mul(1u32 << k);
  let hi = (lo as f32 * ACK_RANDOM_FACTOR) as u32;
  (lo, hi)
}

/// Sample a concrete timeout for attempt `k`, uniformly within
/// `[ACK_TIMEOUT*2^k, ACK_TIMEOUT*2^k*ACK_RANDOM_FACTOR]`, seeded from `now`
/// so repeated calls at the same tick diverge across entries but remain
/// deterministic for a given seed.
pub fn sample_transmit_timeout(k: u8, seed: u64) -> u32 {
  let (lo, hi) = transmit_timeout_range(k);
  if lo == hi {
    return lo;
  }
  let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(seed);
  rng.gen_range(lo..hi)
}

/// Tracks retransmit attempts for a single outstanding confirmable message.
#[derive(Debug, Clone, Copy)]
pub struct RetryTimer {
  deadline: Millis,
  transmit_count: u8,
  seed: u64,
}

impl RetryTimer {
  /// Start a new retry timer for a message first sent at `now`.
  pub fn new(now: Millis, seed: u64) -> Self {
    let timeout = sample_transmit_timeout(0, seed);
    Self { deadline: now.wrapping_add(timeout),
           transmit_count: 0,
           seed }
  }

  /// Number of times the message has been transmitted so far (starts at 1,
  /// the initial send).
  pub fn transmit_count(&self) -> u8 {
    self.transmit_count + 1
  }

  /// Decide what to do once the caller has confirmed (via [`RetryTimer::is_due`])
  /// that this timer's deadline has passed.
  pub fn what_should_i_do(&mut self, now: Millis) -> YouShould {
    if self.transmit_count >= MAX_RETRANSMIT {
      YouShould::Cry
    } else {
      self.transmit_count += 1;
      let timeout = sample_transmit_timeout(self.transmit_count, self.seed.wrapping_add(self.transmit_count as u64));
      self.deadline = now.wrapping_add(timeout);
      YouShould::Retry
    }
  }

  /// Whether `now` has reached this timer's deadline.
  pub fn is_due(&self, now: Millis) -> bool {
    has_passed(now, self.deadline)
  }

  /// The timestamp this timer will next fire at.
  pub fn deadline(&self) -> Millis {
    self.deadline
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn schedule_bounds_hold_over_many_samples_and_attempts() {
    for k in 0..=MAX_RETRANSMIT {
      let (lo, hi) = transmit_timeout_range(k);
      for seed in 0..500u64 {
        let t = sample_transmit_timeout(k, seed);
        assert!(t >= lo, "attempt {k} sample {t} below {lo}");
        assert!(t < hi || lo == hi, "attempt {k} sample {t} not below {hi}");
      }
    }
  }

  #[test]
  fn retries_then_cries() {
    let mut timer = RetryTimer::new(0, 42);
    let mut now = 0u32;
    let mut retries = 0;
    loop {
      now = now.wrapping_add(100_000);
      match timer.what_should_i_do(now) {
        | YouShould::Retry => retries += 1,
        | YouShould::Cry => break,
      }
      if retries > 10 {
        panic!("never cried");
      }
    }
    assert_eq!(retries, MAX_RETRANSMIT as u32);
  }
}
