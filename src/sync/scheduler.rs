use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::storage::PersistenceGateway;
use crate::sync::reconciler::Reconciler;

#[derive(Clone, Copy, Debug)]
pub struct ScheduleConfig {
    pub full_interval: Duration,
    pub dirty_interval: Duration,
    /// None = 不输出周期报告
    pub stats_interval: Option<Duration>,
    pub flush_on_shutdown: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            full_interval: Duration::from_secs(10),
            dirty_interval: Duration::from_secs(60),
            stats_interval: None,
            flush_on_shutdown: true,
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Mode {
    Full,
    Dirty,
}

/// 两个相互独立的周期同步循环（fixed delay：上一轮结束后再等一个间隔）。
///
/// 每一轮要么完成要么失败；失败只记日志，下一个 tick 就是重试。
pub struct SyncScheduler<G: PersistenceGateway> {
    reconciler: Arc<Reconciler<G>>,
    stop_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    flush_on_shutdown: bool,
}

impl<G: PersistenceGateway> SyncScheduler<G> {
    pub fn start(reconciler: Arc<Reconciler<G>>, cfg: ScheduleConfig) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);

        let mut handles = vec![
            tokio::spawn(sync_loop(
                reconciler.clone(),
                Mode::Full,
                cfg.full_interval,
                stop_rx.clone(),
            )),
            tokio::spawn(sync_loop(
                reconciler.clone(),
                Mode::Dirty,
                cfg.dirty_interval,
                stop_rx.clone(),
            )),
        ];
        if let Some(every) = cfg.stats_interval {
            handles.push(tokio::spawn(report_loop(reconciler.clone(), every, stop_rx)));
        }

        tracing::info!(
            "Sync scheduler started: full every {:?}, dirty every {:?}",
            cfg.full_interval,
            cfg.dirty_interval
        );

        Self {
            reconciler,
            stop_tx,
            handles,
            flush_on_shutdown: cfg.flush_on_shutdown,
        }
    }

    /// 发出停止信号并等待循环退出（进行中的一轮会跑完），然后按配置做最后一次回写
    pub async fn shutdown(self) {
        let _ = self.stop_tx.send(true);
        for h in self.handles {
            if let Err(e) = h.await {
                tracing::error!("Sync task join failed: {}", e);
            }
        }
        if self.flush_on_shutdown {
            match self.reconciler.flush().await {
                Ok(()) => tracing::info!("Final flush to durable storage complete"),
                Err(e) => tracing::warn!("Final flush to durable storage failed: {}", e),
            }
        }
        tracing::info!("Sync scheduler stopped");
    }
}

async fn sync_loop<G: PersistenceGateway>(
    reconciler: Arc<Reconciler<G>>,
    mode: Mode,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {},
            _ = stop.changed() => break,
        }
        if *stop.borrow() {
            break;
        }

        let result = match mode {
            Mode::Full => reconciler.full_resync().await,
            Mode::Dirty => reconciler.dirty_resync().await,
        };
        if let Err(e) = result {
            tracing::warn!("{:?} resync failed, will retry next tick: {}", mode, e);
        }
    }
}

async fn report_loop<G: PersistenceGateway>(
    reconciler: Arc<Reconciler<G>>,
    every: Duration,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(every) => {},
            _ = stop.changed() => break,
        }
        let live = reconciler.live();
        let report = reconciler
            .stats()
            .report(live.ranking.cardinality(), live.dirty.len());
        tracing::info!("\n{}", report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LiveCache;
    use crate::storage::MemoryGateway;

    #[tokio::test(start_paused = true)]
    async fn both_loops_run_on_their_own_timers() {
        let live = Arc::new(LiveCache::default());
        let gw = Arc::new(MemoryGateway::new());
        let rec = Arc::new(Reconciler::new(live.clone(), gw.clone()));

        let sched = SyncScheduler::start(
            rec.clone(),
            ScheduleConfig {
                full_interval: Duration::from_millis(100),
                dirty_interval: Duration::from_millis(1_000),
                stats_interval: None,
                flush_on_shutdown: false,
            },
        );

        live.ranking.increment("a", 1.0);
        live.dirty.mark("a");

        tokio::time::sleep(Duration::from_millis(550)).await;
        let r = rec.stats().report(0, 0);
        assert!(r.full_cycles >= 4, "full cycles: {}", r.full_cycles);
        assert_eq!(r.dirty_cycles, 0);
        assert!(live.dirty.contains("a"));

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(rec.stats().report(0, 0).dirty_cycles >= 1);
        assert!(live.dirty.is_empty());

        sched.shutdown().await;
        assert_eq!(gw.get("a").unwrap().count, 1);
    }

    #[tokio::test]
    async fn shutdown_flushes_pending_dirty_keys() {
        let live = Arc::new(LiveCache::default());
        let gw = Arc::new(MemoryGateway::new());
        let rec = Arc::new(Reconciler::new(live.clone(), gw.clone()));

        let sched = SyncScheduler::start(
            rec,
            ScheduleConfig {
                full_interval: Duration::from_secs(3600),
                dirty_interval: Duration::from_secs(3600),
                stats_interval: Some(Duration::from_secs(3600)),
                flush_on_shutdown: true,
            },
        );
        live.ranking.increment("late", 2.0);
        live.dirty.mark("late");

        sched.shutdown().await;
        assert_eq!(gw.get("late").unwrap().count, 2);
        assert!(live.dirty.is_empty());
    }
}
