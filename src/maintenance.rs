use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use tokio::{task::JoinHandle, time};
use tracing::{debug, info};

use crate::{
    cache::{PageCache, SweepPriority},
    state::SharedState,
};

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Whether the application is currently visible to the user.
#[derive(Debug, Default)]
pub struct Visibility {
    hidden: AtomicBool,
}

impl Visibility {
    pub fn is_hidden(&self) -> bool {
        self.hidden.load(Ordering::SeqCst)
    }

    /// Records the new visibility. Returns `true` if it actually changed.
    pub fn set_hidden(&self, hidden: bool) -> bool {
        self.hidden.swap(hidden, Ordering::SeqCst) != hidden
    }
}

/// Handles a visibility change: going hidden triggers the one-shot
/// backgrounded sweep. Returns the number of evicted pages.
pub async fn on_visibility_change(
    cache: &PageCache,
    visibility: &Visibility,
    hidden: bool,
) -> usize {
    if !visibility.set_hidden(hidden) {
        return 0;
    }
    if !hidden {
        info!("Application foregrounded");
        return 0;
    }

    let evicted = cache.enforce_limits(SweepPriority::Backgrounded).await;
    info!(evicted, "Application backgrounded, shrank result cache");
    evicted
}

pub fn spawn_cache_sweeper(
    cache: PageCache,
    visibility: Arc<Visibility>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(period.max(MIN_PERIOD));
        interval.tick().await;
        loop {
            interval.tick().await;
            if visibility.is_hidden() {
                continue;
            }
            let evicted = cache.enforce_limits(SweepPriority::Normal).await;
            if evicted > 0 {
                debug!(evicted, "Periodic result cache sweep");
            }
        }
    })
}

/// Releases unclaimed buffered events even when no new events arrive.
pub fn spawn_buffer_reaper(state: SharedState, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(period.max(MIN_PERIOD));
        loop {
            interval.tick().await;
            let released = state.write().await.buffer.purge_expired(Instant::now());
            if released > 0 {
                debug!(released, "Reaped orphaned buffered events");
            }
        }
    })
}
