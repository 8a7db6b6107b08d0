use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// 同步计数器（Reconciler 写，报告循环/HTTP 读）
#[derive(Default)]
pub struct SyncStats {
    full_cycles: AtomicU64,
    full_records_written: AtomicU64,
    dirty_cycles: AtomicU64,
    dirty_records_written: AtomicU64,
    failed_cycles: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl SyncStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_full(&self, written: usize) {
        self.full_cycles.fetch_add(1, Ordering::Relaxed);
        self.full_records_written
            .fetch_add(written as u64, Ordering::Relaxed);
    }

    pub fn record_dirty(&self, written: usize) {
        self.dirty_cycles.fetch_add(1, Ordering::Relaxed);
        self.dirty_records_written
            .fetch_add(written as u64, Ordering::Relaxed);
    }

    pub fn record_failure(&self, err: &dyn std::error::Error) {
        self.failed_cycles.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock() = Some(err.to_string());
    }

    pub fn report(&self, live_terms: usize, dirty_pending: usize) -> SyncReport {
        SyncReport {
            full_cycles: self.full_cycles.load(Ordering::Relaxed),
            full_records_written: self.full_records_written.load(Ordering::Relaxed),
            dirty_cycles: self.dirty_cycles.load(Ordering::Relaxed),
            dirty_records_written: self.dirty_records_written.load(Ordering::Relaxed),
            failed_cycles: self.failed_cycles.load(Ordering::Relaxed),
            last_error: self.last_error.lock().clone(),
            live_terms,
            dirty_pending,
        }
    }
}

#[derive(Clone, Debug, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub full_cycles: u64,
    pub full_records_written: u64,
    pub dirty_cycles: u64,
    pub dirty_records_written: u64,
    pub failed_cycles: u64,
    pub last_error: Option<String>,
    /// RankingStore 当前词数
    pub live_terms: usize,
    /// DirtyKeySet 当前待同步数
    pub dirty_pending: usize,
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "╔══════════════════════════════════════════════════╗")?;
        writeln!(f, "║           search-rank Sync Report                ║")?;
        writeln!(f, "╠══════════════════════════════════════════════════╣")?;
        writeln!(f, "║ Live:                                            ║")?;
        writeln!(f, "║   terms:        {:>10}                       ║", self.live_terms)?;
        writeln!(f, "║   dirty:        {:>10}                       ║", self.dirty_pending)?;
        writeln!(f, "╠──────────────────────────────────────────────────╣")?;
        writeln!(f, "║ Full resync:                                     ║")?;
        writeln!(f, "║   cycles:       {:>10}                       ║", self.full_cycles)?;
        writeln!(f, "║   written:      {:>10}                       ║", self.full_records_written)?;
        writeln!(f, "╠──────────────────────────────────────────────────╣")?;
        writeln!(f, "║ Dirty resync:                                    ║")?;
        writeln!(f, "║   cycles:       {:>10}                       ║", self.dirty_cycles)?;
        writeln!(f, "║   written:      {:>10}                       ║", self.dirty_records_written)?;
        writeln!(f, "╠──────────────────────────────────────────────────╣")?;
        writeln!(f, "║   failures:     {:>10}                       ║", self.failed_cycles)?;
        if let Some(e) = &self.last_error {
            writeln!(f, "║   last error:   {}", e)?;
        }
        writeln!(f, "╚══════════════════════════════════════════════════╝")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = SyncStats::new();
        stats.record_full(3);
        stats.record_full(0);
        stats.record_dirty(2);
        let err = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        stats.record_failure(&err);

        let r = stats.report(5, 1);
        assert_eq!(r.full_cycles, 2);
        assert_eq!(r.full_records_written, 3);
        assert_eq!(r.dirty_cycles, 1);
        assert_eq!(r.dirty_records_written, 2);
        assert_eq!(r.failed_cycles, 1);
        assert_eq!(r.last_error.as_deref(), Some("disk gone"));
        assert!(r.to_string().contains("disk gone"));
    }
}
