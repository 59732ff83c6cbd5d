pub mod system;

pub use system::SystemProcessGuard;

/// Outcome of a stop request. Denied terminations are reported, never raised.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    /// Pids whose termination was requested successfully.
    pub terminated: Vec<u32>,
    /// Pids that matched but refused termination (usually permission denied).
    pub denied: Vec<u32>,
}

impl StopReport {
    pub fn matched(&self) -> usize {
        self.terminated.len() + self.denied.len()
    }

    pub fn is_clean(&self) -> bool {
        self.denied.is_empty()
    }
}

pub trait ProcessGuard: Send + Sync {
    /// Request termination of every process whose name equals `process_name`
    /// (ASCII case-insensitive). Best effort: never fails.
    fn stop(&self, process_name: &str) -> StopReport;
}

pub(crate) fn name_matches(candidate: &str, process_name: &str) -> bool {
    candidate.eq_ignore_ascii_case(process_name)
}
