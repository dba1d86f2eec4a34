//! Metric sampling for the telemon agent.
//!
//! Each [`Collector`] produces one category of named values. The
//! [`Sampler`] runs all registered collectors once per poll tick and folds
//! their output into a single validated [`Batch`].

pub mod poll;
pub mod process;
pub mod system;

use anyhow::Result;
use telemon_common::types::{Batch, Metric};

/// A source of metrics on the agent host.
///
/// `Send` is required because the sampler runs on its own task.
pub trait Collector: Send {
    /// Short name used in log fields.
    fn name(&self) -> &str;

    /// Samples current values.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying system query fails.
    fn collect(&mut self) -> Result<Vec<Metric>>;
}

/// Runs a fixed set of collectors.
pub struct Sampler {
    collectors: Vec<Box<dyn Collector>>,
}

impl Sampler {
    pub fn new(collectors: Vec<Box<dyn Collector>>) -> Self {
        Self { collectors }
    }

    /// The standard collector set: poll counter, process and host metrics.
    pub fn with_defaults() -> Self {
        Self::new(vec![
            Box::new(poll::PollCollector::new()),
            Box::new(process::ProcessCollector::new()),
            Box::new(system::SystemCollector::new()),
        ])
    }

    /// Produces one batch. Failing collectors and invalid entries are
    /// skipped, so the batch may be partial or empty.
    pub fn sample(&mut self) -> Batch {
        let mut all = Vec::new();
        for collector in &mut self.collectors {
            match collector.collect() {
                Ok(metrics) => all.extend(metrics),
                Err(e) => {
                    tracing::warn!(collector = collector.name(), error = %e, "Collection failed")
                }
            }
        }
        Batch::sanitize(all)
    }
}
