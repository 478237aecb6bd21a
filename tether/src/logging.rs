//! Compact log-line helpers, mirroring the teacher's `src/logging.rs` — log
//! a short summary instead of `Debug`-printing an entire message.

use crate::codec::{Code, Type};

/// One-line summary of a decoded message, suitable for a `trace!` line.
pub fn msg_summary(ty: Type, code: Code, id: u16, payload_len: usize) -> String {
  format!("{:?} {} (id={}) with {} byte payload", ty, code, id, payload_len)
}
