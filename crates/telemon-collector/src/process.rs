use crate::Collector;
use anyhow::{anyhow, Result};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use telemon_common::types::Metric;

/// Memory and CPU usage of the agent process itself.
pub struct ProcessCollector {
    system: System,
    pid: Option<Pid>,
}

impl ProcessCollector {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: sysinfo::get_current_pid().ok(),
        }
    }
}

impl Default for ProcessCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for ProcessCollector {
    fn name(&self) -> &str {
        "process"
    }

    fn collect(&mut self) -> Result<Vec<Metric>> {
        let pid = self
            .pid
            .ok_or_else(|| anyhow!("current pid is not available on this platform"))?;
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory().with_cpu(),
        );
        let process = self
            .system
            .process(pid)
            .ok_or_else(|| anyhow!("process {pid} not found"))?;

        Ok(vec![
            Metric::gauge("Alloc", process.memory() as f64),
            Metric::gauge("Sys", process.virtual_memory() as f64),
            Metric::gauge("ProcessCPU", f64::from(process.cpu_usage())),
        ])
    }
}
