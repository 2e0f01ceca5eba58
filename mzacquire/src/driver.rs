//! Concurrency plumbing between the planner and the instrument driver.
//!
//! Three threads touch the planner in a live run: the submission worker
//! pulling requests, the result callback pushing completed scans, and the
//! host doing setup and teardown. All of them go through [`PlannerHandle`],
//! which holds the planner behind one mutex for the full duration of each
//! planner invocation. Submission pacing uses [`ReadyGate`], a binary
//! semaphore the result side releases when the instrument can accept the
//! next custom scan.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::planner::ScanPlanner;
use crate::scan::{ScanRequest, ScanResult};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("The instrument did not become ready for submission within {0:?}")]
    ReadyWaitTimeout(Duration),
}

/// Unbounded FIFO of pending scan requests.
///
/// Clones share the same queue. Ordering is submission ordering: the
/// planner pushes in priority order and the worker drains in FIFO order.
#[derive(Debug, Clone)]
pub struct RequestQueue {
    sender: Sender<ScanRequest>,
    receiver: Receiver<ScanRequest>,
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestQueue {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    pub fn push(&self, request: ScanRequest) {
        // Both halves live in this struct, so the channel cannot close.
        let _ = self.sender.send(request);
    }

    pub fn try_pop(&self) -> Option<ScanRequest> {
        self.receiver.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn clear(&self) {
        while self.receiver.try_recv().is_ok() {}
    }
}

/// Binary semaphore gating submissions on instrument readiness.
///
/// Starts signaled so the first submission proceeds immediately. Redundant
/// [`ReadyGate::notify`] calls while already signaled are absorbed.
#[derive(Debug, Clone)]
pub struct ReadyGate {
    sender: Sender<()>,
    receiver: Receiver<()>,
}

impl Default for ReadyGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadyGate {
    pub fn new() -> Self {
        let (sender, receiver) = bounded(1);
        let gate = Self { sender, receiver };
        gate.notify();
        gate
    }

    /// Mark the instrument ready for the next submission
    pub fn notify(&self) {
        if let Err(TrySendError::Full(())) = self.sender.try_send(()) {
            trace!("ready gate already signaled");
        }
    }

    /// Block until the gate is signaled, consuming the signal. With a
    /// bound, exceeding it is fatal rather than a recoverable stall.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<(), DriverError> {
        match timeout {
            Some(limit) => self
                .receiver
                .recv_timeout(limit)
                .map_err(|_| DriverError::ReadyWaitTimeout(limit)),
            None => {
                let _ = self.receiver.recv();
                Ok(())
            }
        }
    }
}

/// Where accepted scan requests go: the vendor bridge in production, a
/// simulated instrument elsewhere. Returning `false` reports a transient
/// rejection and the worker retries the same request.
pub trait ScanSink {
    fn submit(&mut self, request: &ScanRequest) -> bool;
}

/// Shared, mutex-guarded access to a planner.
///
/// Every planner invocation holds the lock end to end, so request
/// assignment never interleaves with result processing.
#[derive(Clone)]
pub struct PlannerHandle {
    inner: Arc<Mutex<Box<dyn ScanPlanner>>>,
}

impl PlannerHandle {
    pub fn new(planner: Box<dyn ScanPlanner>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(planner)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Box<dyn ScanPlanner>> {
        // A panic while holding the lock poisons it; the planner state is
        // still usable for teardown.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn initialize(&self) {
        self.lock().initialize();
    }

    pub fn assign_scan(&self) -> Option<ScanRequest> {
        self.lock().assign_scan()
    }

    pub fn receive_scan(&self, result: ScanResult) {
        self.lock().receive_scan(result);
    }

    pub fn cleanup(&self) {
        self.lock().cleanup();
    }
}

/// The submission loop: poll the planner for a request, wait for the
/// instrument to be ready, hand the request to the sink, repeat until
/// stopped.
pub struct SubmissionWorker<S: ScanSink> {
    planner: PlannerHandle,
    gate: ReadyGate,
    sink: S,
    stop: Arc<AtomicBool>,
    ready_timeout: Option<Duration>,
}

impl<S: ScanSink> SubmissionWorker<S> {
    pub fn new(
        planner: PlannerHandle,
        gate: ReadyGate,
        sink: S,
        stop: Arc<AtomicBool>,
        ready_timeout: Option<Duration>,
    ) -> Self {
        Self {
            planner,
            gate,
            sink,
            stop,
            ready_timeout,
        }
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    pub fn run(&mut self) -> Result<(), DriverError> {
        while !self.stopped() {
            let Some(request) = self.planner.assign_scan() else {
                thread::sleep(POLL_INTERVAL);
                continue;
            };

            self.gate.wait(self.ready_timeout)?;

            while !self.sink.submit(&request) {
                if self.stopped() {
                    warn!(id = request.id, "stopping with a request unsubmitted");
                    return Ok(());
                }
                debug!(id = request.id, "submission rejected, retrying");
                thread::sleep(POLL_INTERVAL);
            }
            trace!(id = request.id, kind = %request.kind, "request submitted");
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::config::AcquisitionConfig;
    use crate::planner::build_planner;
    use crate::scan::ScanKind;

    #[test]
    fn test_gate_starts_signaled_and_absorbs_redundant_notifies() {
        let gate = ReadyGate::new();
        assert!(gate.wait(Some(Duration::from_millis(10))).is_ok());
        assert!(matches!(
            gate.wait(Some(Duration::from_millis(10))),
            Err(DriverError::ReadyWaitTimeout(_))
        ));

        gate.notify();
        gate.notify();
        assert!(gate.wait(Some(Duration::from_millis(10))).is_ok());
        assert!(gate.wait(Some(Duration::from_millis(10))).is_err());
    }

    #[test]
    fn test_queue_shared_across_threads() {
        let queue = RequestQueue::new();
        let producer = queue.clone();
        let handle = thread::spawn(move || {
            for id in 0..4 {
                producer.push(ScanRequest::new(id, ScanKind::Ms2));
            }
        });
        handle.join().ok();

        let mut seen = Vec::new();
        while let Some(request) = queue.try_pop() {
            seen.push(request.id);
        }
        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert!(queue.is_empty());
    }

    struct RecordingSink {
        accepted: Arc<Mutex<Vec<ScanRequest>>>,
        reject_first: bool,
    }

    impl ScanSink for RecordingSink {
        fn submit(&mut self, request: &ScanRequest) -> bool {
            if self.reject_first {
                self.reject_first = false;
                return false;
            }
            if let Ok(mut accepted) = self.accepted.lock() {
                accepted.push(request.clone());
            }
            true
        }
    }

    #[test]
    fn test_worker_submits_initial_survey() {
        let config = AcquisitionConfig::default();
        let planner = PlannerHandle::new(build_planner(&config).unwrap());
        planner.initialize();

        let accepted = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink {
            accepted: accepted.clone(),
            reject_first: true,
        };
        let stop = Arc::new(AtomicBool::new(false));
        let mut worker = SubmissionWorker::new(
            planner.clone(),
            ReadyGate::new(),
            sink,
            stop.clone(),
            Some(Duration::from_secs(1)),
        );
        let handle = thread::spawn(move || worker.run());

        thread::sleep(Duration::from_millis(100));
        stop.store(true, Ordering::Relaxed);
        handle.join().unwrap().unwrap();

        let accepted = accepted.lock().unwrap();
        // Only the survey goes out: nothing else can be assigned until its
        // result arrives.
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].kind, ScanKind::Ms1);
    }
}
