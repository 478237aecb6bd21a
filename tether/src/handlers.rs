//! C11 — function/variable request decode and completion-token dispatch
//! (spec section 4.6, design note "Callback into application").
//!
//! Grounded on `functions.c`/`variables.cpp`: both decode a short key out
//! of the request and either answer synchronously or defer to an
//! application callback. Rather than the original's raw buffer offsets,
//! keys/args travel as CoAP options (Uri-Path segment for the key, payload
//! for the argument/value) — the wire-level abstraction [`crate::codec`]
//! already provides.

use arrayvec::ArrayVec;

use crate::codec::{Decoded, VariableValue};
use crate::error::{Error, What};

/// Maximum function/variable key length.
pub const MAX_KEY_LEN: usize = 12;
/// Maximum function argument length.
pub const MAX_ARG_LEN: usize = 64;

/// A decoded `FUNCTION_CALL` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCall {
  /// The function key (second Uri-Path segment, after `f`).
  pub key: ArrayVec<u8, MAX_KEY_LEN>,
  /// The argument bytes.
  pub arg: ArrayVec<u8, MAX_ARG_LEN>,
}

/// Decode a `FUNCTION_CALL` request's key and argument.
pub fn decode_function_call<C>(decoded: &Decoded) -> Result<FunctionCall, Error<C>> {
  let key = second_uri_path_segment(decoded).ok_or_else(|| Error::new(What::MalformedMessage))?;
  let key = ArrayVec::try_from(key).map_err(|_| Error::new(What::MalformedMessage))?;
  let arg = ArrayVec::try_from(decoded.payload.as_slice()).map_err(|_| Error::new(What::MalformedMessage))?;
  Ok(FunctionCall { key, arg })
}

/// A decoded `VARIABLE_REQUEST`'s key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableRequest {
  /// The variable key (second Uri-Path segment, after `v`).
  pub key: ArrayVec<u8, MAX_KEY_LEN>,
}

/// Decode a `VARIABLE_REQUEST`'s key.
pub fn decode_variable_request<C>(decoded: &Decoded) -> Result<VariableRequest, Error<C>> {
  let key = second_uri_path_segment(decoded).ok_or_else(|| Error::new(What::MalformedMessage))?;
  let key = ArrayVec::try_from(key).map_err(|_| Error::new(What::MalformedMessage))?;
  Ok(VariableRequest { key })
}

fn second_uri_path_segment(decoded: &Decoded) -> Option<&[u8]> {
  decoded.opts.iter().filter(|o| o.number == crate::codec::option_number::URI_PATH).nth(1).map(|o| o.value.as_slice())
}

/// A completion token handed to the application for an async function
/// call or variable read. The orchestrator maps `token -> (message id,
/// kind)` (design note "Callback into application") and turns resolution
/// into a separate response rather than re-entering dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompletionToken(pub u32);

/// What a pending completion resolves into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
  /// A function call awaiting its signed 32-bit result.
  Function,
  /// A variable read awaiting its typed value.
  Variable,
}

/// What a completion token maps back to: the CoAP message id the eventual
/// response must reuse, and which kind of request it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pending {
  /// The request's message id (the response reuses it as its own id, per
  /// this protocol's non-piggybacked response convention).
  pub message_id: u16,
  /// Which kind of request this is.
  pub kind: PendingKind,
}

/// Result an application delivers when resolving a function-call completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionResult(pub i32);

/// Result an application delivers when resolving a variable-read completion.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableResult(pub VariableValue);

#[cfg(test)]
mod tests {
  use super::*;
  use crate::codec::{Code, Encoder, Type};

  fn request(marker: &[u8], key: &[u8], payload: &[u8]) -> Decoded {
    let mut buf = [0u8; 256];
    let n = Encoder::new(Type::Con, Code::POST, 1).uri_path(marker.to_vec())
                                                  .uri_path(key.to_vec())
                                                  .payload(payload.to_vec())
                                                  .encode_into::<()>(&mut buf)
                                                  .unwrap();
    crate::codec::decode::<()>(&buf[..n]).unwrap()
  }

  #[test]
  fn decodes_function_key_and_arg() {
    let decoded = request(b"f", b"digitalWrite", b"D7,HIGH");
    let call = decode_function_call::<()>(&decoded).unwrap();
    assert_eq!(call.key.as_slice(), b"digitalWrite");
    assert_eq!(call.arg.as_slice(), b"D7,HIGH");
  }

  #[test]
  fn decodes_variable_key() {
    let decoded = request(b"v", b"temp", b"");
    let req = decode_variable_request::<()>(&decoded).unwrap();
    assert_eq!(req.key.as_slice(), b"temp");
  }

  #[test]
  fn oversized_arg_is_rejected() {
    let decoded = request(b"f", b"fn", &[0u8; 65]);
    assert!(decode_function_call::<()>(&decoded).is_err());
  }
}
