pub mod reconciler;
pub mod scheduler;
pub mod warmer;

pub use reconciler::{Reconciler, SyncOutcome, DEFAULT_FULL_SYNC_TOP_N};
pub use scheduler::{ScheduleConfig, SyncScheduler};
pub use warmer::{CacheWarmer, DEFAULT_WARM_TOP_K};
