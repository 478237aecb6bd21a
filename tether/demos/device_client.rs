//! Minimal end-to-end demo: a toy device exposing one function and one
//! variable, talking to a peer over UDP via [`tether::std_io::StdChannel`].
//!
//! ```text
//! cargo run --example device_client -- 127.0.0.1:5683 127.0.0.1:5684
//! ```

use std::{env, thread, time::Duration};

use tether::codec::VariableValue;
use tether::config::Config;
use tether::orchestrator::{AppDescriptor, Identity, Orchestrator, Outcome, VariableKind};
use tether::std_io::{Paths, StdChannel};

struct Toy {
  blinks: u32,
}

impl AppDescriptor for Toy {
  fn function_keys(&self) -> Vec<Vec<u8>> {
    vec![b"blink".to_vec()]
  }

  fn variable_keys(&self) -> Vec<(Vec<u8>, VariableKind)> {
    vec![(b"blinks".to_vec(), VariableKind::Int)]
  }

  fn call_function(&mut self, key: &[u8], _arg: &[u8]) -> Option<i32> {
    if key == b"blink" {
      self.blinks += 1;
      log::info!("blink #{}", self.blinks);
      Some(0)
    } else {
      Some(-1)
    }
  }

  fn get_variable(&mut self, key: &[u8]) -> Option<VariableValue> {
    if key == b"blinks" {
      Some(VariableValue::Int(self.blinks as i32))
    } else {
      None
    }
  }

  fn handle_event(&mut self, name: &[u8], data: &[u8]) {
    log::info!("event {} ({} bytes)", String::from_utf8_lossy(name), data.len());
  }
}

fn main() {
  simple_logger::init_with_level(log::Level::Info).ok();

  let mut args = env::args().skip(1);
  let local = args.next().unwrap_or_else(|| "0.0.0.0:0".to_string());
  let peer = args.next().unwrap_or_else(|| "127.0.0.1:5684".to_string());

  let paths = Paths { session: env::temp_dir().join("tether-device-client-session.bin"),
                      firmware: env::temp_dir().join("tether-device-client-firmware.bin") };
  let channel = StdChannel::connect(local, peer, paths).expect("bind/connect UDP socket");

  let identity = Identity { product_id: 0xBEEF,
                            product_version: 1,
                            platform_id: 6,
                            device_id: *b"demo-device1",
                            previous_ota_succeeded: true };

  let mut orch = Orchestrator::new(channel, Config::default(), identity, Toy { blinks: 0 });

  match orch.begin() {
    | Ok(state) => log::info!("handshake complete: {:?}", state),
    | Err(e) => {
      log::error!("handshake failed: {:?}", e);
      return;
    },
  }

  loop {
    match orch.event_loop() {
      | Ok(Outcome::Idle) => {},
      | Ok(outcome) => log::info!("{:?}", outcome),
      | Err(e) => {
        log::error!("event loop error: {:?}", e);
        break;
      },
    }
    thread::sleep(Duration::from_millis(50));
  }

  let _ = orch.persist_session();
}
