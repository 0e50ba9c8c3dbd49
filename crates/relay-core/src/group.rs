//! Fixed-size pools of workers.

use crate::layer::ChannelLayer;
use crate::observer::WorkerObserver;
use crate::router::{ChannelFilter, Router};
use crate::shutdown::Shutdown;
use crate::worker::{Worker, WorkerError, WorkerOptions, WorkerState, WorkerStats};
use futures_util::future::join_all;
use std::sync::Arc;
use tracing::{error, info};

/// Several workers sharing one channel layer and router.
///
/// Every member is built with the same parameters and runs its own loop on
/// its own task. A group of one behaves exactly like a single [`Worker`].
#[derive(Debug)]
pub struct WorkerGroup {
    workers: Vec<Worker>,
}

impl WorkerGroup {
    /// Create `n_threads` workers with ids `0..n_threads`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::InvalidGroupSize`] if `n_threads` is zero.
    pub fn new(
        layer: Arc<dyn ChannelLayer>,
        router: Arc<Router>,
        n_threads: usize,
    ) -> Result<Self, WorkerError> {
        if n_threads == 0 {
            return Err(WorkerError::InvalidGroupSize);
        }
        let workers = (0..n_threads)
            .map(|id| Worker::new(layer.clone(), router.clone()).with_id(id))
            .collect();
        Ok(Self { workers })
    }

    fn map_workers(mut self, f: impl Fn(Worker) -> Worker) -> Self {
        self.workers = self.workers.into_iter().map(f).collect();
        self
    }

    /// Attach the same observer to every member.
    #[must_use]
    pub fn with_observer(self, observer: Arc<dyn WorkerObserver>) -> Self {
        self.map_workers(|w| w.with_observer(observer.clone()))
    }

    /// Apply the same channel filter to every member.
    #[must_use]
    pub fn with_filter(self, filter: ChannelFilter) -> Self {
        self.map_workers(|w| w.with_filter(filter.clone()))
    }

    /// Apply the same loop tuning to every member.
    #[must_use]
    pub fn with_options(self, options: WorkerOptions) -> Self {
        self.map_workers(|w| w.with_options(options.clone()))
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Always false; groups have at least one member.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// The members.
    #[must_use]
    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    /// Whether the shared layer is confined to one process.
    #[must_use]
    pub fn local_only(&self) -> bool {
        self.workers.iter().any(Worker::local_only)
    }

    /// Make every member ready before any of them starts consuming.
    ///
    /// Every member is checked first, so on error no member has changed
    /// state.
    ///
    /// # Errors
    ///
    /// Returns the first member error.
    pub fn ready(&mut self) -> Result<(), WorkerError> {
        for worker in &self.workers {
            worker.check_ready()?;
        }
        for worker in &mut self.workers {
            worker.ready()?;
        }
        info!(workers = self.workers.len(), "Worker group ready");
        Ok(())
    }

    /// Run every member concurrently until `shutdown` fires, then wait for
    /// all of them to stop.
    ///
    /// Returns the members' counters added together.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::InvalidState`] if any member is not ready; no
    /// member is started in that case.
    pub async fn run(&mut self, shutdown: Shutdown) -> Result<WorkerStats, WorkerError> {
        if let Some(worker) = self
            .workers
            .iter()
            .find(|w| w.state() != WorkerState::Ready)
        {
            return Err(WorkerError::InvalidState {
                worker: worker.id(),
                action: "run",
                state: worker.state(),
            });
        }

        info!(workers = self.workers.len(), "Starting worker group");
        let handles = std::mem::take(&mut self.workers)
            .into_iter()
            .map(|mut worker| {
                let signal = shutdown.clone();
                tokio::spawn(async move {
                    let result = worker.run(signal).await;
                    (worker, result)
                })
            });

        let mut total = WorkerStats::default();
        for joined in join_all(handles).await {
            match joined {
                Ok((worker, Ok(stats))) => {
                    total.merge(&stats);
                    self.workers.push(worker);
                }
                Ok((worker, Err(e))) => {
                    error!(worker = worker.id(), error = %e, "Worker exited with error");
                    self.workers.push(worker);
                }
                Err(e) => error!(error = %e, "Worker task panicked"),
            }
        }
        self.workers.sort_by_key(Worker::id);

        info!(
            workers = self.workers.len(),
            processed = total.processed,
            "Worker group stopped"
        );
        Ok(total)
    }
}
