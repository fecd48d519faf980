#![forbid(unsafe_code)]

//! Polls the record change log and turns each change into a cache invalidation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};
use tt_core::TreeCache;
use tt_core::source::{ChangeFeed, ChangeListener, SourceError};

const BATCH: usize = 256;
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Delivers every change after `cursor` to `listener`; returns the new cursor.
pub fn drain_changes(
    feed: &dyn ChangeFeed,
    listener: &dyn ChangeListener,
    mut cursor: i64,
) -> Result<i64, SourceError> {
    loop {
        let batch = feed.changes_since(cursor, BATCH)?;
        for change in &batch {
            listener.record_changed(change);
            cursor = cursor.max(change.seq);
        }
        if batch.len() < BATCH {
            return Ok(cursor);
        }
    }
}

pub fn spawn_change_watcher<F, T>(
    feed: Arc<F>,
    cache: Arc<TreeCache<T>>,
    poll: Duration,
    shutdown: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>>
where
    F: ChangeFeed + 'static,
    T: Send + Sync + 'static,
{
    // Changes older than startup cannot be in the (empty) cache.
    let mut cursor = feed.latest_seq().unwrap_or_else(|err| {
        warn!(error = %err, "change feed unavailable at startup; replaying from 0");
        0
    });
    std::thread::Builder::new()
        .name("tt-change-watcher".to_string())
        .spawn(move || {
            debug!(cursor, "change watcher started");
            while !shutdown.load(Ordering::Relaxed) {
                match drain_changes(&*feed, &*cache, cursor) {
                    Ok(next) => cursor = next,
                    Err(err) => warn!(error = %err, cursor, "change feed poll failed"),
                }
                let purged = cache.purge_expired();
                if purged > 0 {
                    debug!(purged, "expired tree cache entries dropped");
                }
                sleep_unless_shutdown(poll, &shutdown);
            }
        })
}

fn sleep_unless_shutdown(total: Duration, shutdown: &AtomicBool) {
    let mut left = total;
    while !left.is_zero() && !shutdown.load(Ordering::Relaxed) {
        let step = left.min(SLEEP_SLICE);
        std::thread::sleep(step);
        left = left.saturating_sub(step);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::Mutex;
    use tt_core::clock::ManualClock;
    use tt_core::memory::MemorySource;
    use tt_core::source::RecordChange;
    use tt_core::{CacheConfig, OwnerId, Rank, ScopeKey, TaxonChain, Visibility};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<RecordChange>>);

    impl ChangeListener for Recorder {
        fn record_changed(&self, change: &RecordChange) {
            self.0.lock().unwrap().push(*change);
        }
    }

    fn chain(id: &str, owner: u64) -> TaxonChain {
        TaxonChain::new(
            id,
            OwnerId::new(owner).unwrap(),
            Visibility::Public,
            1,
            vec![(Rank::Kingdom, "Plantae".to_string())],
        )
    }

    #[test]
    fn drain_delivers_every_change_in_order_across_batches() {
        let source = MemorySource::new();
        for index in 0..(BATCH + 10) {
            source.insert(chain(&format!("r{index}"), 1 + (index as u64 % 3)));
        }
        let recorder = Recorder::default();
        let cursor = drain_changes(&source, &recorder, 0).unwrap();
        let seen = recorder.0.lock().unwrap();
        assert_eq!(seen.len(), BATCH + 10);
        assert!(seen.windows(2).all(|pair| pair[0].seq < pair[1].seq));
        assert_eq!(cursor, (BATCH + 10) as i64);

        drop(seen);
        assert_eq!(drain_changes(&source, &recorder, cursor).unwrap(), cursor);
    }

    #[test]
    fn watcher_thread_invalidates_touched_owners() {
        let source = Arc::new(MemorySource::new());
        let cache: Arc<TreeCache<u32>> =
            Arc::new(TreeCache::new(CacheConfig::default(), Arc::new(ManualClock::new(0))));
        let key = ScopeKey::parse("personal:7").unwrap();
        let owners = BTreeSet::from([OwnerId::new(7).unwrap()]);
        cache.get_or_build(&key, &owners, || Ok(1)).unwrap();

        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = spawn_change_watcher(
            Arc::clone(&source),
            Arc::clone(&cache),
            Duration::from_millis(10),
            Arc::clone(&shutdown),
        )
        .unwrap();

        source.insert(chain("r-7", 7));
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while cache.stats().entries > 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        shutdown.store(true, Ordering::Relaxed);
        handle.join().unwrap();
        assert_eq!(cache.stats().entries, 0);
        assert_eq!(cache.stats().evictions, 1);
    }
}
