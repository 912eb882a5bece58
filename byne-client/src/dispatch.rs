//! Dispatch loop: the single consumer of the work queue and the only caller of the channel.
//!
//! Every request is bounded by the current failover timeout and raced against the
//! scheduler's stall signal. An unresponsive primary runs the switch procedure and the
//! request is re-issued on the backup; an unresponsive backup ends the loop.

use std::sync::Arc;
use std::time::Duration;

use byne_core::{
    decode_reply, encode_request, Cadence, Command, Decision, Failover, FailoverError, Parity,
    ProtocolViolation, Reply, Request, Session, StallDetector, Trigger, WorkItem,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::queue::WorkQueue;
use crate::timers::{Scheduler, SharedSession};
use crate::transport::{Channel, Exchange, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("backup server unresponsive ({0})")]
    BackupUnresponsive(Trigger),
    #[error(transparent)]
    Failover(#[from] FailoverError),
}

pub struct Dispatcher<C: Channel> {
    channel: C,
    parity: Parity,
    failover: Failover,
    session: SharedSession,
    queue: Arc<WorkQueue>,
    scheduler: Scheduler,
    quiescence: Duration,
}

impl<C: Channel> Dispatcher<C> {
    pub fn new(
        channel: C,
        parity: Parity,
        failover: Failover,
        cadence: Cadence,
        stall: StallDetector,
    ) -> Self {
        let queue = Arc::new(WorkQueue::new());
        let session = Arc::new(Mutex::new(Session::default()));
        let scheduler = Scheduler::new(cadence, stall, queue.clone(), session.clone());
        Self {
            channel,
            parity,
            failover,
            session,
            queue,
            scheduler,
            quiescence: cadence.quiescence(),
        }
    }

    pub fn failover(&self) -> &Failover {
        &self.failover
    }

    pub fn session(&self) -> SharedSession {
        self.session.clone()
    }

    /// HELLO exchange. Seeds the working value from the server; a malformed reply is fatal.
    pub async fn handshake(&mut self) -> Result<u8, ClientError> {
        let bytes = self.exchange(Request::Hello).await?;
        match decode_reply(Command::Hello, &bytes)? {
            Reply::Hello { version, value } => {
                self.session.lock().await.reset(value);
                info!(version, value, endpoint = %self.channel.endpoint(), "handshake complete");
                Ok(value)
            }
            other => Err(ProtocolViolation::UnexpectedCommand {
                expected: Command::Hello,
                actual: other.command().as_byte(),
            }
            .into()),
        }
    }

    /// Start the periodic activities and process work items until `shutdown` fires or
    /// the backup becomes unresponsive. The activities are stopped on every exit path.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<(), ClientError> {
        self.scheduler.start();
        let result = self.dispatch_loop(&shutdown).await;
        self.scheduler.stop().await;
        result
    }

    async fn dispatch_loop(&mut self, shutdown: &CancellationToken) -> Result<(), ClientError> {
        loop {
            let item = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(()),
                item = self.queue.pop() => item,
            };
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(()),
                r = self.dispatch(item) => r?,
            }
        }
    }

    async fn dispatch(&mut self, item: WorkItem) -> Result<(), ClientError> {
        let request = match item {
            WorkItem::SendValue => Request::AcceptValue(self.session.lock().await.working_value()),
            WorkItem::RefreshIncrement => Request::refresh(self.parity),
        };
        loop {
            let bytes = self.exchange(request).await?;
            match decode_reply(request.command(), &bytes) {
                Ok(Reply::GetEven(value)) | Ok(Reply::GetOdd(value)) => {
                    if !self.parity.matches(value) {
                        warn!(value, parity = %self.parity, "increment of the wrong parity");
                    }
                    self.session.lock().await.set_increment(value);
                    debug!(value, "increment refreshed");
                    return Ok(());
                }
                Ok(reply) => {
                    debug!(?reply, "reply accepted");
                    return Ok(());
                }
                Err(e) => {
                    warn!(error = %e, command = %request.command(), "malformed reply");
                    self.on_unresponsive(Trigger::ProtocolViolation).await?;
                }
            }
        }
    }

    /// Send one request, failing over until it is answered or the backup gives up.
    async fn exchange(&mut self, request: Request) -> Result<Vec<u8>, ClientError> {
        let payload = encode_request(&request);
        loop {
            let stalled = self.scheduler.stalled();
            let timeout = self.failover.request_timeout();
            let trigger = tokio::select! {
                outcome = self.channel.request(&payload, timeout) => match outcome? {
                    Exchange::Reply(bytes) => return Ok(bytes),
                    Exchange::TimedOut => Trigger::Timeout,
                },
                _ = stalled.cancelled() => Trigger::Stall { depth: self.queue.len() },
            };
            self.on_unresponsive(trigger).await?;
            debug!(command = %request.command(), endpoint = %self.channel.endpoint(), "re-issuing request");
        }
    }

    async fn on_unresponsive(&mut self, trigger: Trigger) -> Result<(), ClientError> {
        match self.failover.on_unresponsive(trigger) {
            Decision::SwitchToBackup => self.switch_to_backup(trigger).await,
            Decision::Fatal => {
                error!(%trigger, endpoint = %self.channel.endpoint(), "backup server unresponsive");
                Err(ClientError::BackupUnresponsive(trigger))
            }
        }
    }

    async fn switch_to_backup(&mut self, trigger: Trigger) -> Result<(), ClientError> {
        let backup = self.failover.backup_endpoint().clone();
        warn!(%trigger, %backup, "Primary server unresponsive, switching to backup");

        let was_running = self.scheduler.stop().await;
        let mut dropped = self.queue.drain();
        tokio::time::sleep(self.quiescence).await;
        dropped += self.queue.drain();

        if let Err(e) = self.channel.rebind(&backup).await {
            debug!(error = %e, "backup not reachable yet; next request retries");
        }
        self.failover.complete_switch()?;
        if was_running {
            self.scheduler.start();
        }
        info!(dropped, endpoint = %backup, "now using backup server");
        Ok(())
    }
}
