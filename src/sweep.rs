//! Periodic background sweeps: quote expiry, payment expiry and dispute escalation
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::service::OrderWorkflowService;

/// Counts from one pass over every sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub quotes_expired: usize,
    pub payments_expired: usize,
    pub disputes_escalated: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.quotes_expired + self.payments_expired + self.disputes_escalated
    }
}

/// Runs [`OrderWorkflowService::run_sweeps`] every `sweep_interval` on its own thread.
/// Stops when dropped.
pub struct Sweeper {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    pub fn spawn(service: Arc<OrderWorkflowService>) -> anyhow::Result<Self> {
        let interval = service.config().sweep_interval;
        let (stop, stopped) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("order-sweeper".into())
            .spawn(move || {
                loop {
                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => match service.run_sweeps() {
                            Ok(report) => debug!(?report, "sweep pass"),
                            Err(err) => warn!(%err, "sweep pass failed"),
                        },
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })?;

        Ok(Self {
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    /// Signals the thread and waits for the pass in flight to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        drop(self.stop.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("sweeper thread panicked");
            }
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.shutdown();
    }
}
