//! Wrap-around-safe millisecond timestamps.
//!
//! The wire and the reliable store deal exclusively in `u32` millisecond
//! ticks rather than a generic `Instant`/`Duration` pair — the device clock
//! is expected to wrap, and every comparison in this crate goes through
//! [`has_passed`] rather than ordinary integer comparison.

/// A monotonic millisecond tick, as reported by [`crate::channel::Channel::millis`].
pub type Millis = u32;

/// Has `deadline` passed, given the current time is `now`?
///
/// Both values are `u32` millisecond ticks that wrap at `2^32`. Comparing
/// them with `<`/`>` breaks the moment either side wraps, so this computes
/// the signed distance `deadline - now` modulo `2^32` and treats the top
/// half of that range as "in the past".
///
/// ```
/// use tether::time::has_passed;
///
/// assert!(has_passed(1, 0xFFFF_FFFF));
/// assert!(!has_passed(0xFFFF_FFFF, 1));
/// assert!(!has_passed(100, 200));
/// assert!(has_passed(200, 100));
/// ```
pub fn has_passed(now: Millis, deadline: Millis) -> bool {
  deadline.wrapping_sub(now) >= (1u32 << 31)
}

/// `now + delta`, wrapping at `u32::MAX` the way the device clock does.
pub fn add(now: Millis, delta: u32) -> Millis {
  now.wrapping_add(delta)
}

/// Milliseconds elapsed from `earlier` to `now`, assuming `now` comes after
/// `earlier` in wall-clock time (wrap accounted for).
pub fn elapsed_since(now: Millis, earlier: Millis) -> u32 {
  now.wrapping_sub(earlier)
}
