//! Failover state machine: which endpoint is current and what to do when it stops answering.
//! Primary -> Backup is the only transition; Backup is terminal.

use std::fmt;
use std::time::Duration;

use tracing::debug;

use crate::endpoint::{Endpoint, EndpointSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverState {
    Primary,
    Backup,
}

/// Why the current server is considered unresponsive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// A request exceeded its timeout.
    Timeout,
    /// Work queue backed up past the stall threshold.
    Stall { depth: usize },
    /// Reply failed to decode.
    ProtocolViolation,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Timeout => f.write_str("access timeout"),
            Trigger::Stall { depth } => write!(f, "work queue stalled at depth {}", depth),
            Trigger::ProtocolViolation => f.write_str("protocol violation"),
        }
    }
}

/// What the dispatch loop must do about a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Run the transition procedure towards the backup endpoint.
    SwitchToBackup,
    /// Already on backup: nothing left to fall back to.
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FailoverError {
    #[error("already switched to backup; the switch is irreversible")]
    AlreadyBackup,
}

pub struct Failover {
    endpoints: EndpointSet,
    state: FailoverState,
    primary_timeout: Option<Duration>,
    backup_timeout: Option<Duration>,
    switches: u32,
}

impl Failover {
    /// Timeouts of zero mean "wait forever".
    pub fn new(endpoints: EndpointSet, primary_timeout: Duration, backup_timeout: Duration) -> Self {
        Self {
            endpoints,
            state: FailoverState::Primary,
            primary_timeout: non_zero(primary_timeout),
            backup_timeout: non_zero(backup_timeout),
            switches: 0,
        }
    }

    pub fn state(&self) -> FailoverState {
        self.state
    }

    /// Number of completed transitions. Never more than one.
    pub fn switches(&self) -> u32 {
        self.switches
    }

    pub fn current_endpoint(&self) -> &Endpoint {
        match self.state {
            FailoverState::Primary => self.endpoints.primary(),
            FailoverState::Backup => self.endpoints.backup(),
        }
    }

    pub fn backup_endpoint(&self) -> &Endpoint {
        self.endpoints.backup()
    }

    /// Bound on a single request against the current endpoint; None blocks indefinitely.
    pub fn request_timeout(&self) -> Option<Duration> {
        match self.state {
            FailoverState::Primary => self.primary_timeout,
            FailoverState::Backup => self.backup_timeout,
        }
    }

    pub fn on_unresponsive(&self, trigger: Trigger) -> Decision {
        debug!(%trigger, state = ?self.state, "server unresponsive");
        match self.state {
            FailoverState::Primary => Decision::SwitchToBackup,
            FailoverState::Backup => Decision::Fatal,
        }
    }

    /// Mark the transition done. The channel must already be bound to the backup.
    pub fn complete_switch(&mut self) -> Result<&Endpoint, FailoverError> {
        if self.state == FailoverState::Backup {
            return Err(FailoverError::AlreadyBackup);
        }
        self.state = FailoverState::Backup;
        self.switches += 1;
        Ok(self.endpoints.backup())
    }
}

fn non_zero(d: Duration) -> Option<Duration> {
    if d.is_zero() {
        None
    } else {
        Some(d)
    }
}
