//! C9 — publisher rate limiter (spec section 4.8): caps application and
//! system event rates so a misbehaving application can't flood the link.

use crate::error::{Error, What};
use crate::time::Millis;

/// Maximum system events per rolling 64 s window.
pub const SYSTEM_EVENTS_PER_WINDOW: u16 = 255;

/// Ring depth for the application-event spacing check. Spec section 4.8
/// describes "a ring of 5 timestamps" checked "5-slot-back" — since a
/// rejected event never occupies a slot, the first comparison that can
/// ever fire is against the 4th-prior *accepted* timestamp, which is the
/// same observable behavior as a 4-deep ring checked once full: bursts of
/// 4 succeed unconditionally, the 5th checks against the oldest of those 4.
const APP_EVENT_RING: usize = 4;

/// Minimum spacing, in ms, enforced after a burst of [`APP_EVENT_RING`]
/// application events.
const APP_EVENT_MIN_SPACING_MILLIS: u32 = 1_000;

/// Is `filter` a system event (case-insensitive "spark" prefix)?
pub fn is_system_event(filter: &[u8]) -> bool {
  filter.len() >= 5 && filter[..5].eq_ignore_ascii_case(b"spark")
}

/// Tracks the two independent rate budgets from spec section 4.8.
#[derive(Debug)]
pub struct Publisher {
  /// Ring of the last [`APP_EVENT_RING`] application-event timestamps.
  app_ring: [Millis; APP_EVENT_RING],
  app_ring_next: usize,
  app_ring_filled: usize,

  /// High 16 bits of the tick that defined the current system-event window.
  system_window: u16,
  system_count_in_window: u16,

  /// Count of events rejected for exceeding a budget, for observability.
  pub rejected_count: u64,
}

impl Default for Publisher {
  fn default() -> Self {
    Self::new()
  }
}

impl Publisher {
  /// A publisher with empty history.
  pub fn new() -> Self {
    Self { app_ring: [0; APP_EVENT_RING],
           app_ring_next: 0,
           app_ring_filled: 0,
           system_window: 0,
           system_count_in_window: 0,
           rejected_count: 0 }
  }

  /// Check and record one event attempt at `now`, applying the budget that
  /// matches `filter`. Returns `Ok(())` if the event may proceed.
  pub fn publish<C>(&mut self, filter: &[u8], now: Millis) -> Result<(), Error<C>> {
    if is_system_event(filter) {
      self.check_system(now)
    } else {
      self.check_app(now)
    }
  }

  fn check_system<C>(&mut self, now: Millis) -> Result<(), Error<C>> {
    let window = (now >> 16) as u16;
    if window != self.system_window {
      self.system_window = window;
      self.system_count_in_window = 0;
    }
    if self.system_count_in_window >= SYSTEM_EVENTS_PER_WINDOW {
      self.rejected_count += 1;
      return Err(Error::new(What::BandwidthExceeded));
    }
    self.system_count_in_window += 1;
    Ok(())
  }

  fn check_app<C>(&mut self, now: Millis) -> Result<(), Error<C>> {
    if self.app_ring_filled == APP_EVENT_RING {
      let oldest = self.app_ring[self.app_ring_next];
      if crate::time::elapsed_since(now, oldest) < APP_EVENT_MIN_SPACING_MILLIS {
        self.rejected_count += 1;
        return Err(Error::new(What::BandwidthExceeded));
      }
    }
    self.app_ring[self.app_ring_next] = now;
    self.app_ring_next = (self.app_ring_next + 1) % APP_EVENT_RING;
    self.app_ring_filled = (self.app_ring_filled + 1).min(APP_EVENT_RING);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn s5_four_app_events_burst_then_fifth_rejected_then_recovers() {
    let mut pub_ = Publisher::new();
    for _ in 0..4 {
      pub_.publish::<()>(b"foo", 1_000).unwrap();
    }
    assert!(pub_.publish::<()>(b"foo", 1_500).is_err());
    assert!(pub_.publish::<()>(b"foo", 1_000 + 4_000).is_ok());
  }

  #[test]
  fn s5_system_events_capped_at_255_per_window() {
    let mut pub_ = Publisher::new();
    for _ in 0..255 {
      pub_.publish::<()>(b"spark/status", 0).unwrap();
    }
    assert!(pub_.publish::<()>(b"spark/status", 0).is_err());
  }

  #[test]
  fn system_window_resets_on_high_bits_advance() {
    let mut pub_ = Publisher::new();
    for _ in 0..255 {
      pub_.publish::<()>(b"Spark/status", 0).unwrap();
    }
    assert!(pub_.publish::<()>(b"spark/status", 0).is_err());
    // advance the high 16 bits of the tick -> new window
    assert!(pub_.publish::<()>(b"spark/status", 1 << 16).is_ok());
  }

  #[test]
  fn is_system_event_is_case_insensitive() {
    assert!(is_system_event(b"SPARK/foo"));
    assert!(is_system_event(b"spark"));
    assert!(!is_system_event(b"spar"));
    assert!(!is_system_event(b"myapp/foo"));
  }
}
