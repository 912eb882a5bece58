//! Client session state: identity, working value, increment amount, work items.

use std::fmt;

use crate::protocol::MAX_VALUE;

/// Opaque client identity, unique among connected clients. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity(Vec<u8>);

impl ClientIdentity {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, EmptyIdentity> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(EmptyIdentity);
        }
        Ok(ClientIdentity(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("client identity must not be empty")]
pub struct EmptyIdentity;

/// Deferred client action, produced by timers and consumed by the dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkItem {
    /// Report the current working value to the server.
    SendValue,
    /// Ask the server for a new increment amount.
    RefreshIncrement,
}

/// Increment amount used until the first refresh reply.
pub const INITIAL_INCREMENT: u8 = 1;

/// One increment step with wraparound: `(working + increment) mod 100`.
/// Both inputs must be in [0, 99].
pub fn increment_step(working: u8, increment: u8) -> u8 {
    debug_assert!(working <= MAX_VALUE && increment <= MAX_VALUE);
    let next = working + increment;
    if next > MAX_VALUE {
        next - (MAX_VALUE + 1)
    } else {
        next
    }
}

/// Working value and increment amount. Both always in [0, 99].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    working_value: u8,
    increment_amount: u8,
}

impl Session {
    /// Session seeded by the handshake reply value.
    pub fn from_handshake(value: u8) -> Self {
        Self {
            working_value: value.min(MAX_VALUE),
            increment_amount: INITIAL_INCREMENT,
        }
    }

    pub fn working_value(&self) -> u8 {
        self.working_value
    }

    pub fn increment_amount(&self) -> u8 {
        self.increment_amount
    }

    /// Apply one increment step; returns the new working value.
    pub fn advance(&mut self) -> u8 {
        self.working_value = increment_step(self.working_value, self.increment_amount);
        self.working_value
    }

    pub fn set_increment(&mut self, amount: u8) {
        self.increment_amount = amount.min(MAX_VALUE);
    }

    /// Replace the working value after a new handshake.
    pub fn reset(&mut self, value: u8) {
        self.working_value = value.min(MAX_VALUE);
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::from_handshake(0)
    }
}
