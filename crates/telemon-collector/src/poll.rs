use crate::Collector;
use anyhow::Result;
use rand::Rng;
use telemon_common::types::Metric;

/// Emits a `PollCount` counter increment per sample and a `RandomValue`
/// gauge so a collector always sees fresh data.
pub struct PollCollector;

impl PollCollector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PollCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for PollCollector {
    fn name(&self) -> &str {
        "poll"
    }

    fn collect(&mut self) -> Result<Vec<Metric>> {
        let random: f64 = rand::thread_rng().gen();
        Ok(vec![
            Metric::counter("PollCount", 1),
            Metric::gauge("RandomValue", random),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_sample_increments_by_one() {
        let mut c = PollCollector::new();
        for _ in 0..3 {
            let metrics = c.collect().unwrap();
            assert_eq!(metrics[0], Metric::counter("PollCount", 1));
            let random = metrics[1].value.unwrap();
            assert!((0.0..1.0).contains(&random));
        }
    }
}
