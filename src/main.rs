use anyhow::Context;
use clap::Parser;
use search_rank::cache::LiveCache;
use search_rank::core::Config;
use search_rank::query::QueryServer;
use search_rank::service::SearchService;
use search_rank::storage::{FileGateway, MemoryGateway, PersistenceGateway};
use search_rank::sync::{Reconciler, ScheduleConfig, SyncScheduler};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "search-rank", version, about = "Write-back search ranking cache")]
struct Cli {
    /// TOML 配置文件（不存在时使用默认值）
    #[arg(long, default_value = "search-rank.toml")]
    config: PathBuf,

    #[arg(long)]
    port: Option<u16>,

    /// durable 表所在目录
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// 不落盘，仅用内存表
    #[arg(long)]
    memory_only: bool,

    #[arg(long)]
    full_sync_ms: Option<u64>,

    #[arg(long)]
    dirty_sync_ms: Option<u64>,

    /// 周期统计报告（秒，0 关闭）
    #[arg(long)]
    stats_secs: Option<u64>,
}

impl Cli {
    fn apply(&self, cfg: &mut Config) {
        if let Some(p) = self.port {
            cfg.port = p;
        }
        if let Some(d) = &self.data_dir {
            cfg.data_dir = d.clone();
        }
        if self.memory_only {
            cfg.memory_only = true;
        }
        if let Some(ms) = self.full_sync_ms {
            cfg.full_sync_interval_ms = ms;
        }
        if let Some(ms) = self.dirty_sync_ms {
            cfg.dirty_sync_interval_ms = ms;
        }
        if let Some(s) = self.stats_secs {
            cfg.stats_interval_secs = s;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut cfg = Config::load(&cli.config)?;
    cli.apply(&mut cfg);
    cfg.validate().context("invalid configuration")?;

    info!("Starting search-rank: write-back search ranking cache");

    if cfg.memory_only {
        info!("Durable storage: in-memory (nothing survives restart)");
        run(cfg, Arc::new(MemoryGateway::new())).await
    } else {
        let path = cfg.table_path();
        let gateway = FileGateway::open(path.clone())
            .await
            .with_context(|| format!("failed to open keyword table {:?}", path))?;
        info!("Durable storage: {:?}", gateway.path());
        run(cfg, Arc::new(gateway)).await
    }
}

async fn run<G: PersistenceGateway>(cfg: Config, gateway: Arc<G>) -> anyhow::Result<()> {
    let live = Arc::new(LiveCache::new(cfg.recent_capacity));
    let reconciler = Arc::new(
        Reconciler::new(live, gateway)
            .with_full_top_n(cfg.full_sync_top_n)
            .with_requeue_dirty_on_failure(cfg.requeue_dirty_on_failure),
    );
    let service = Arc::new(SearchService::new(reconciler.clone()));

    // 预热在接流量之前完成；失败不阻止启动
    service.warm(cfg.warm_top_k).await;

    let scheduler = SyncScheduler::start(
        reconciler,
        ScheduleConfig {
            full_interval: cfg.full_sync_interval(),
            dirty_interval: cfg.dirty_sync_interval(),
            stats_interval: cfg.stats_interval(),
            flush_on_shutdown: cfg.flush_on_shutdown,
        },
    );

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let server = QueryServer::new(service, cfg.default_limit);
    let port = cfg.port;
    let server_task = tokio::spawn(async move {
        let shutdown = async {
            let _ = stop_rx.await;
        };
        if let Err(e) = server.run_until(port, shutdown).await {
            tracing::error!("HTTP server failed: {}", e);
        }
    });

    info!(
        "search-rank ready. Try: curl -XPOST localhost:{}/api/search -H 'content-type: application/json' -d '{{\"keyword\":\"rust\"}}'",
        port
    );

    // 优雅退出处理
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    let _ = stop_tx.send(());
    if let Err(e) = server_task.await {
        tracing::error!("HTTP server task join failed: {}", e);
    }
    scheduler.shutdown().await;

    Ok(())
}
