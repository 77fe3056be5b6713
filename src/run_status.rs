use std::sync::{Arc, Mutex};

/// Shared phase/progress tracker for long-running batch work.
#[derive(Clone, Default)]
pub struct RunStatus {
    inner: Arc<Mutex<RunStatusData>>,
}

#[derive(Default)]
struct RunStatusData {
    phase: String,
    total_symbols: usize,
    completed_symbols: usize,
    skipped_symbols: usize,
    trades_so_far: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunStatusSnapshot {
    pub phase: String,
    pub total_symbols: usize,
    pub completed_symbols: usize,
    pub skipped_symbols: usize,
    pub trades_so_far: usize,
}

impl RunStatus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RunStatusData {
                phase: "Initializing".to_string(),
                ..Default::default()
            })),
        }
    }

    pub fn set_phase<S: Into<String>>(&self, phase: S) {
        if let Ok(mut data) = self.inner.lock() {
            data.phase = phase.into();
        }
    }

    pub fn set_progress(
        &self,
        total_symbols: usize,
        completed_symbols: usize,
        skipped_symbols: usize,
        trades_so_far: usize,
    ) {
        if let Ok(mut data) = self.inner.lock() {
            data.total_symbols = total_symbols;
            data.completed_symbols = completed_symbols;
            data.skipped_symbols = skipped_symbols;
            data.trades_so_far = trades_so_far;
        }
    }

    pub fn snapshot(&self) -> RunStatusSnapshot {
        if let Ok(data) = self.inner.lock() {
            RunStatusSnapshot {
                phase: data.phase.clone(),
                total_symbols: data.total_symbols,
                completed_symbols: data.completed_symbols,
                skipped_symbols: data.skipped_symbols,
                trades_so_far: data.trades_so_far,
            }
        } else {
            RunStatusSnapshot {
                phase: "Status unavailable".to_string(),
                total_symbols: 0,
                completed_symbols: 0,
                skipped_symbols: 0,
                trades_so_far: 0,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_progress() {
        let status = RunStatus::new();
        let worker_view = status.clone();
        worker_view.set_phase("Simulating");
        worker_view.set_progress(10, 4, 1, 7);

        let snapshot = status.snapshot();
        assert_eq!(snapshot.phase, "Simulating");
        assert_eq!(snapshot.completed_symbols, 4);
        assert_eq!(snapshot.trades_so_far, 7);
        assert_eq!(snapshot.skipped_symbols, 1);
    }
}
