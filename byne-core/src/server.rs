//! Server-side dispatcher. Host passes routed messages `[identity, empty, payload]`;
//! core returns the routed reply, or nothing when the message must be ignored.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::protocol::{Command, Reply, Request, PROTOCOL_VERSION};
use crate::wire::{self, ProtocolViolation};

/// Frames in a routed message: identity, empty delimiter, payload.
pub const ROUTED_FRAMES: usize = 3;

pub struct ServerCore {
    /// Last number handed out to each client (key is the client identity).
    values: HashMap<Vec<u8>, u8>,
    rng: StdRng,
}

impl ServerCore {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic number generation, for tests.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            values: HashMap::new(),
            rng,
        }
    }

    /// Even pseudo random number in [0, 98].
    pub fn make_even_number(&mut self) -> u8 {
        self.rng.gen_range(0..50u8) * 2
    }

    /// Odd pseudo random number in [1, 99].
    pub fn make_odd_number(&mut self) -> u8 {
        self.rng.gen_range(0..50u8) * 2 + 1
    }

    /// Last number handed out to a client, 0 if unseen.
    pub fn last_value(&self, cid: &[u8]) -> u8 {
        self.values.get(cid).copied().unwrap_or(0)
    }

    pub fn client_count(&self) -> usize {
        self.values.len()
    }

    /// Handle one routed message. Malformed envelopes are logged and get no reply.
    pub fn on_message(&mut self, mut frames: Vec<Vec<u8>>) -> Option<Vec<Vec<u8>>> {
        if frames.len() != ROUTED_FRAMES {
            warn!(frames = frames.len(), "received message with unexpected frame count, ignoring");
            return None;
        }
        let req = frames.pop().unwrap_or_default();
        let delimiter = frames.pop().unwrap_or_default();
        let cid = frames.pop().unwrap_or_default();
        if cid.is_empty() {
            warn!("empty client identifier; ignoring");
            return None;
        }
        if !delimiter.is_empty() {
            warn!("not empty frame delimiter; ignoring");
            return None;
        }
        if req.is_empty() {
            warn!("empty client request; ignoring");
            return None;
        }
        let answer = self.on_request(&cid, &req);
        Some(vec![cid, delimiter, answer])
    }

    fn on_request(&mut self, cid: &[u8], req: &[u8]) -> Vec<u8> {
        let client = String::from_utf8_lossy(cid);
        let reply = match wire::decode_request(req) {
            Ok(Request::Hello) => {
                debug!(%client, "received hello request");
                self.hello(cid)
            }
            Ok(Request::GetEven) => {
                let value = self.make_even_number();
                debug!(%client, value, "received get_even request");
                self.values.insert(cid.to_vec(), value);
                Reply::GetEven(value)
            }
            Ok(Request::GetOdd) => {
                let value = self.make_odd_number();
                debug!(%client, value, "received get_odd request");
                self.values.insert(cid.to_vec(), value);
                Reply::GetOdd(value)
            }
            Ok(Request::AcceptValue(value)) => {
                debug!(%client, value, "received accept_value request");
                Reply::AcceptValue
            }
            Err(ProtocolViolation::TooShort {
                command: Command::AcceptValue,
                ..
            }) => {
                warn!(%client, "received accept_value request without parameter; assuming 0");
                Reply::AcceptValue
            }
            Err(ProtocolViolation::ValueOutOfRange { value, .. }) => {
                warn!(%client, value, "received out of range accept_value");
                Reply::AcceptValue
            }
            Err(e) => {
                warn!(%client, error = %e, "bad request; assuming hello request");
                self.hello(cid)
            }
        };
        debug!(%client, ?reply, "sent reply");
        wire::encode_reply(&reply)
    }

    fn hello(&self, cid: &[u8]) -> Reply {
        Reply::Hello {
            version: PROTOCOL_VERSION,
            value: self.last_value(cid),
        }
    }
}

impl Default for ServerCore {
    fn default() -> Self {
        Self::new()
    }
}
