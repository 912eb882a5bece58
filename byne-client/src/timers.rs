//! Periodic activities: the fixed-period increment and the jittered increment refresh.
//!
//! Each activity is a task that re-arms itself only while its epoch's stop token is
//! live. `stop` cancels the token and joins both tasks, so nothing fires once it returns.

use std::sync::Arc;
use std::time::Duration;

use byne_core::{Cadence, Session, StallDetector, WorkItem};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::queue::WorkQueue;

/// Working value and increment amount, shared by the increment activity and the dispatch loop.
pub type SharedSession = Arc<Mutex<Session>>;

struct Epoch {
    stop: CancellationToken,
    stalled: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

pub struct Scheduler {
    cadence: Cadence,
    stall: StallDetector,
    queue: Arc<WorkQueue>,
    session: SharedSession,
    epoch: Option<Epoch>,
}

impl Scheduler {
    pub fn new(
        cadence: Cadence,
        stall: StallDetector,
        queue: Arc<WorkQueue>,
        session: SharedSession,
    ) -> Self {
        Self {
            cadence,
            stall,
            queue,
            session,
            epoch: None,
        }
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.epoch.is_some()
    }

    /// Arm fresh timers for both activities. No-op when already running.
    pub fn start(&mut self) {
        if self.epoch.is_some() {
            return;
        }
        let stop = CancellationToken::new();
        let stalled = CancellationToken::new();
        let increment = tokio::spawn(increment_activity(
            self.cadence.increment_period(),
            stop.clone(),
            self.queue.clone(),
            self.session.clone(),
        ));
        let refresh = tokio::spawn(refresh_activity(
            self.cadence,
            self.stall,
            stop.clone(),
            stalled.clone(),
            self.queue.clone(),
        ));
        debug!("periodic activities started");
        self.epoch = Some(Epoch {
            stop,
            stalled,
            tasks: vec![increment, refresh],
        });
    }

    /// Stop both activities and wait for them to finish. Returns whether they were running.
    pub async fn stop(&mut self) -> bool {
        let Some(epoch) = self.epoch.take() else {
            return false;
        };
        epoch.stop.cancel();
        for task in epoch.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "periodic activity ended abnormally");
            }
        }
        debug!("periodic activities stopped");
        true
    }

    /// Cancelled when the refresh activity finds the queue backed up.
    /// A fresh, never-cancelled token while stopped.
    pub fn stalled(&self) -> CancellationToken {
        match &self.epoch {
            Some(epoch) => epoch.stalled.clone(),
            None => CancellationToken::new(),
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(epoch) = &self.epoch {
            epoch.stop.cancel();
        }
    }
}

async fn increment_activity(
    period: Duration,
    stop: CancellationToken,
    queue: Arc<WorkQueue>,
    session: SharedSession,
) {
    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = tokio::time::sleep(period) => {}
        }
        let value = session.lock().await.advance();
        trace!(value, "working value incremented");
        queue.push(WorkItem::SendValue);
    }
}

async fn refresh_activity(
    cadence: Cadence,
    stall: StallDetector,
    stop: CancellationToken,
    stalled: CancellationToken,
    queue: Arc<WorkQueue>,
) {
    let mut rng = StdRng::from_entropy();
    loop {
        let delay = cadence.refresh_period(&mut rng);
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        let depth = queue.len();
        if stall.is_stalled(depth) {
            warn!(
                depth,
                threshold = stall.threshold(),
                "work queue backed up; server looks unresponsive"
            );
            stalled.cancel();
            return;
        }
        queue.push(WorkItem::RefreshIncrement);
    }
}
