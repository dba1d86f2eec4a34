//! Sampling loop, bounded job queue and delivery worker pool.
//!
//! The sampler pushes one [`Batch`] per poll tick. Workers wake on the
//! report interval and drain the queue until it is empty. A full queue
//! drops its oldest job so the sampler never waits on delivery.

use crate::delivery::Delivery;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use telemon_collector::Sampler;
use telemon_common::lifecycle::Shutdown;
use telemon_common::types::Batch;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};

/// Fixed-capacity FIFO of pending batches.
pub struct JobQueue {
    jobs: Mutex<VecDeque<Batch>>,
    capacity: usize,
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            jobs: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Batch>> {
        self.jobs.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Appends `batch`, returning the evicted oldest job when full.
    pub fn push(&self, batch: Batch) -> Option<Batch> {
        let mut jobs = self.lock();
        let evicted = if jobs.len() >= self.capacity {
            jobs.pop_front()
        } else {
            None
        };
        jobs.push_back(batch);
        evicted
    }

    /// Takes the oldest job. Each job is handed out at most once.
    pub fn claim(&self) -> Option<Batch> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[derive(Debug, Default)]
struct Counters {
    queued: AtomicU64,
    dropped: AtomicU64,
    sent: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Batches accepted onto the queue.
    pub queued: u64,
    /// Batches evicted by a full queue.
    pub dropped: u64,
    pub sent: u64,
    /// Batches given up after delivery failed.
    pub failed: u64,
}

impl Counters {
    fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            queued: self.queued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchConfig {
    pub poll_interval: Duration,
    pub report_interval: Duration,
    pub workers: usize,
    pub queue_capacity: usize,
}

pub struct Dispatcher {
    queue: Arc<JobQueue>,
    counters: Arc<Counters>,
    sampler: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    /// Spawns the sampling loop and `config.workers` delivery workers. All of
    /// them stop once `shutdown` fires.
    pub fn start(
        config: DispatchConfig,
        sampler: Sampler,
        delivery: Arc<Delivery>,
        shutdown: Shutdown,
    ) -> Self {
        let queue = Arc::new(JobQueue::new(config.queue_capacity));
        let counters = Arc::new(Counters::default());

        tracing::info!(
            transport = delivery.transport_name(),
            poll_secs = config.poll_interval.as_secs_f64(),
            report_secs = config.report_interval.as_secs_f64(),
            workers = config.workers,
            capacity = queue.capacity(),
            "Starting dispatcher"
        );

        let sampler = tokio::spawn(sample_loop(
            sampler,
            Arc::clone(&queue),
            Arc::clone(&counters),
            config.poll_interval,
            shutdown.clone(),
        ));

        let workers = (0..config.workers.max(1))
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    Arc::clone(&queue),
                    Arc::clone(&delivery),
                    Arc::clone(&counters),
                    config.report_interval,
                    shutdown.clone(),
                ))
            })
            .collect();

        Self {
            queue,
            counters,
            sampler,
            workers,
        }
    }

    pub fn stats(&self) -> DispatchStats {
        self.counters.snapshot()
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Waits for the sampler, then for every worker to finish its current
    /// job. Only returns after shutdown has been requested.
    pub async fn close(self) -> DispatchStats {
        if let Err(e) = self.sampler.await {
            tracing::error!(error = %e, "Sampler task failed");
        }
        for (id, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.await {
                tracing::error!(worker = id, error = %e, "Worker task failed");
            }
        }
        let stats = self.counters.snapshot();
        let pending = self.queue.len();
        if pending > 0 {
            tracing::warn!(pending, "Discarding undelivered batches");
        }
        tracing::info!(
            queued = stats.queued,
            dropped = stats.dropped,
            sent = stats.sent,
            failed = stats.failed,
            "Dispatcher stopped"
        );
        stats
    }
}

async fn sample_loop(
    mut sampler: Sampler,
    queue: Arc<JobQueue>,
    counters: Arc<Counters>,
    poll: Duration,
    mut shutdown: Shutdown,
) {
    let mut tick = interval(poll);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            _ = tick.tick() => {}
        }

        let batch = sampler.sample();
        if batch.is_empty() {
            tracing::debug!("Nothing sampled");
            continue;
        }
        let count = batch.len();
        if let Some(evicted) = queue.push(batch) {
            counters.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(evicted = evicted.len(), "Job queue full, dropped oldest batch");
        }
        counters.queued.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(count, pending = queue.len(), "Batch queued");
    }
    tracing::debug!("Sampler stopped");
}

async fn worker_loop(
    id: usize,
    queue: Arc<JobQueue>,
    delivery: Arc<Delivery>,
    counters: Arc<Counters>,
    report: Duration,
    mut shutdown: Shutdown,
) {
    let mut tick = interval_at(Instant::now() + report, report);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            _ = tick.tick() => {}
        }

        // Cancellation is observed between jobs, never mid-delivery.
        while !shutdown.is_shutdown() {
            let Some(batch) = queue.claim() else {
                break;
            };
            match delivery.deliver(&batch).await {
                Ok(()) => {
                    counters.sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(worker = id, count = batch.len(), error = %e, "Dropping undeliverable batch");
                }
            }
        }
    }
    tracing::debug!(worker = id, "Worker stopped");
}
