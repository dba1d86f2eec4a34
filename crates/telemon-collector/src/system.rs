use crate::Collector;
use anyhow::Result;
use sysinfo::System;
use telemon_common::types::Metric;

/// Host memory and per-core CPU utilisation.
pub struct SystemCollector {
    system: System,
}

impl SystemCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        Self { system }
    }
}

impl Default for SystemCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for SystemCollector {
    fn name(&self) -> &str {
        "system"
    }

    fn collect(&mut self) -> Result<Vec<Metric>> {
        self.system.refresh_memory();
        self.system.refresh_cpu_usage();

        let mut metrics = vec![
            Metric::gauge("TotalMemory", self.system.total_memory() as f64),
            Metric::gauge("FreeMemory", self.system.free_memory() as f64),
        ];
        for (i, cpu) in self.system.cpus().iter().enumerate() {
            metrics.push(Metric::gauge(
                format!("CPUutilization{}", i + 1),
                f64::from(cpu.cpu_usage()),
            ));
        }
        Ok(metrics)
    }
}
