use sysinfo::{ProcessesToUpdate, System};
use tracing::{debug, info, warn};

use super::{ProcessGuard, StopReport, name_matches};

/// Terminates processes through the OS process table.
#[derive(Debug, Default)]
pub struct SystemProcessGuard;

impl ProcessGuard for SystemProcessGuard {
    fn stop(&self, process_name: &str) -> StopReport {
        let mut sys = System::new();
        sys.refresh_processes(ProcessesToUpdate::All, true);

        let mut report = StopReport::default();
        for (pid, process) in sys.processes() {
            if !name_matches(&process.name().to_string_lossy(), process_name) {
                continue;
            }
            if process.kill() {
                info!(pid = pid.as_u32(), process_name, "terminated running process");
                report.terminated.push(pid.as_u32());
            } else {
                warn!(pid = pid.as_u32(), process_name, "termination denied; continuing");
                report.denied.push(pid.as_u32());
            }
        }
        if report.matched() == 0 {
            debug!(process_name, "no running process to stop");
        }
        report
    }
}
