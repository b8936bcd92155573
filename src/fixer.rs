//! The fixer.
//!
//! The [`Fixer`] owns a pool of worker threads that take chains from a
//! shared intake queue and run the fix algorithm for them. Fixed chains and
//! errors leave through the channels handed in by whoever creates the
//! fixer. A reporter thread logs the fixer’s counters periodically until
//! the fixer is done.
//!
//! Chains are submitted via [`Fixer::queue_chain`] or through a
//! [`FixQueue`] obtained from [`Fixer::queue`] which can be handed to other
//! threads. Once [`Fixer::close`] or [`Fixer::wait`] has been called, no
//! more chains are accepted.

use std::{fmt, mem, thread};
use std::collections::VecDeque;
use std::sync::{mpsc, Arc};
use std::time::Duration;
use log::{debug, error, info};
use crate::cache::UrlCache;
use crate::cert::{Cert, CertPool, DedupedChain};
use crate::config::Config;
use crate::error::Failed;
use crate::fix::{FixEnv, FixError, FixTask, Outcome};
use crate::ledger::Ledger;
use crate::metrics::{FixerMetrics, MetricsSnapshot};
use crate::utils::sync::{Condvar, Mutex};
use crate::verify::Verify;


//------------ Fixer ---------------------------------------------------------

/// Fixes chains concurrently.
pub struct Fixer {
    /// The queue of chains waiting to be fixed.
    intake: Arc<Intake>,

    /// The counters shared with the workers.
    metrics: Arc<FixerMetrics>,

    /// The join handles of the worker threads.
    workers: Vec<thread::JoinHandle<()>>,

    /// The reporter thread.
    reporter: Option<Reporter>,
}

impl Fixer {
    /// Creates a new fixer and starts its threads.
    ///
    /// The number of workers, the size of the intake queue, the retry
    /// budget and the reporting interval are taken from `config`. A
    /// reporting interval of zero disables the reporter.
    pub fn new(
        config: &Config,
        cache: Arc<UrlCache>,
        ledger: Arc<Ledger>,
        verifier: Arc<dyn Verify>,
        chains: mpsc::Sender<Vec<Cert>>,
        errors: mpsc::Sender<FixError>,
    ) -> Result<Self, Failed> {
        let metrics = Arc::new(FixerMetrics::default());
        let env = Arc::new(FixEnv {
            cache,
            ledger,
            verifier,
            metrics: metrics.clone(),
            max_fetches: config.max_fetches,
        });
        let mut res = Fixer {
            intake: Arc::new(Intake::new(config.queue_size)),
            metrics,
            workers: Vec::with_capacity(config.fix_threads),
            reporter: None,
        };

        // If anything goes wrong from here on, dropping `res` closes the
        // intake and the workers started so far exit.
        for idx in 0..config.fix_threads {
            let worker = Worker {
                intake: res.intake.clone(),
                env: env.clone(),
                chains: chains.clone(),
                errors: errors.clone(),
            };
            let handle = thread::Builder::new().name(
                format!("chainfix-fix-{}", idx)
            ).spawn(move || worker.run());
            match handle {
                Ok(handle) => res.workers.push(handle),
                Err(err) => {
                    error!("Failed to start fixer thread: {}", err);
                    return Err(Failed)
                }
            }
        }
        if !config.report_interval.is_zero() {
            res.reporter = Some(Reporter::start(
                res.metrics.clone(), config.report_interval
            )?);
        }
        Ok(res)
    }

    /// Returns a handle for submitting chains from elsewhere.
    pub fn queue(&self) -> FixQueue {
        FixQueue { intake: self.intake.clone() }
    }

    /// Submits a chain for fixing.
    ///
    /// The first certificate of the candidate chain should be the issuer
    /// of `leaf`, but neither order nor completeness matter. `roots` are
    /// the trust anchors fixed chains need to end in.
    ///
    /// If the intake queue is bounded and full, blocks until there is
    /// space again. Returns an error if the fixer has been closed.
    pub fn queue_chain(
        &self, leaf: Cert, chain: DedupedChain, roots: &Arc<CertPool>
    ) -> Result<(), Closed> {
        self.intake.push(FixTask::new(leaf, chain, roots.clone()))
    }

    /// Stops accepting new chains.
    ///
    /// Chains already queued will still be processed.
    pub fn close(&self) {
        self.intake.close()
    }

    /// Returns the current counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Closes the fixer and waits for all work to finish.
    ///
    /// When this returns, all outcomes have been sent to the channels and
    /// the workers have dropped their senders. Returns the final counters.
    pub fn wait(mut self) -> Result<MetricsSnapshot, Failed> {
        self.close();
        let mut panicked = false;
        for handle in mem::take(&mut self.workers) {
            if handle.join().is_err() {
                panicked = true;
            }
        }
        if let Some(reporter) = self.reporter.take() {
            reporter.stop();
        }
        if panicked {
            error!(
                "Fixer failed after a worker thread has panicked. \
                 This is most assuredly a bug."
            );
            return Err(Failed)
        }
        let res = self.metrics.snapshot();
        info!("Fixer finished: {}", res);
        Ok(res)
    }
}

impl Drop for Fixer {
    fn drop(&mut self) {
        self.intake.close();
        if let Some(reporter) = self.reporter.take() {
            reporter.stop();
        }
    }
}

impl fmt::Debug for Fixer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Fixer")
            .field("workers", &self.workers.len())
            .field("metrics", &self.metrics)
            .finish()
    }
}


//------------ FixQueue ------------------------------------------------------

/// A handle for submitting chains to a fixer.
#[derive(Clone)]
pub struct FixQueue {
    intake: Arc<Intake>,
}

impl FixQueue {
    /// Submits a chain for fixing.
    ///
    /// This behaves exactly like [`Fixer::queue_chain`].
    pub fn queue_chain(
        &self, leaf: Cert, chain: DedupedChain, roots: &Arc<CertPool>
    ) -> Result<(), Closed> {
        self.intake.push(FixTask::new(leaf, chain, roots.clone()))
    }
}


//------------ Worker --------------------------------------------------------

/// Everything a worker thread needs.
struct Worker {
    intake: Arc<Intake>,
    env: Arc<FixEnv>,
    chains: mpsc::Sender<Vec<Cert>>,
    errors: mpsc::Sender<FixError>,
}

impl Worker {
    fn run(self) {
        while let Some(task) = self.intake.pop() {
            let _active = self.env.metrics.activate();
            match task.handle(&self.env) {
                Outcome::Skipped => { }
                Outcome::Fixed(chains) => {
                    for chain in chains {
                        if self.chains.send(chain).is_err() {
                            debug!("Chain receiver gone, dropping chain.");
                        }
                    }
                }
                Outcome::Failed(err) => {
                    if self.errors.send(err).is_err() {
                        debug!("Error receiver gone, dropping error.");
                    }
                }
            }
        }
    }
}


//------------ Reporter ------------------------------------------------------

/// The thread logging the counters.
struct Reporter {
    /// Dropping this stops the thread.
    stop: mpsc::Sender<()>,

    handle: thread::JoinHandle<()>,
}

impl Reporter {
    fn start(
        metrics: Arc<FixerMetrics>, interval: Duration
    ) -> Result<Self, Failed> {
        let (stop, stop_rx) = mpsc::channel::<()>();
        let handle = thread::Builder::new().name(
            "chainfix-report".into()
        ).spawn(move || {
            while let Err(mpsc::RecvTimeoutError::Timeout)
                = stop_rx.recv_timeout(interval)
            {
                info!("{}", metrics.snapshot());
            }
        });
        match handle {
            Ok(handle) => Ok(Reporter { stop, handle }),
            Err(err) => {
                error!("Failed to start reporter thread: {}", err);
                Err(Failed)
            }
        }
    }

    fn stop(self) {
        drop(self.stop);
        if self.handle.join().is_err() {
            error!("Reporter thread has panicked.");
        }
    }
}


//------------ Intake --------------------------------------------------------

/// The queue of tasks waiting for a worker.
#[derive(Debug)]
struct Intake {
    state: Mutex<IntakeState>,

    /// Signalled when a task has been added or the queue closed.
    not_empty: Condvar,

    /// Signalled when a task has been taken or the queue closed.
    not_full: Condvar,

    /// The maximum number of waiting tasks, if any.
    capacity: Option<usize>,
}

#[derive(Debug, Default)]
struct IntakeState {
    tasks: VecDeque<FixTask>,
    closed: bool,
}

impl Intake {
    fn new(capacity: Option<usize>) -> Self {
        Intake {
            state: Default::default(),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity: capacity.filter(|&cap| cap > 0),
        }
    }

    fn push(&self, task: FixTask) -> Result<(), Closed> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(Closed)
            }
            match self.capacity {
                Some(cap) if state.tasks.len() >= cap => {
                    state = self.not_full.wait(state);
                }
                _ => break
            }
        }
        state.tasks.push_back(task);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Takes the next task.
    ///
    /// Blocks while the queue is empty. Returns `None` once the queue is
    /// closed and drained.
    fn pop(&self) -> Option<FixTask> {
        let mut state = self.state.lock();
        loop {
            if let Some(task) = state.tasks.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Some(task)
            }
            if state.closed {
                return None
            }
            state = self.not_empty.wait(state);
        }
    }

    fn close(&self) {
        self.state.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}


//------------ Closed --------------------------------------------------------

/// The fixer doesn’t accept chains anymore.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Closed;

impl fmt::Display for Closed {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("fixer has been closed")
    }
}

impl std::error::Error for Closed { }


//============ Tests =========================================================
