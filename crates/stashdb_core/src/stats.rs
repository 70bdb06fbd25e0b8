//! Store statistics and their subscription feed.
//!
//! # Usage
//!
//! ```rust,ignore
//! let updates = database.stats();
//! while let Ok(stats) = updates.recv() {
//!     println!("{} entries, {} bytes", stats.full.count, stats.full.total_size);
//! }
//! ```

use std::collections::BTreeMap;
use std::sync::mpsc::Sender;
use std::time::Duration;

/// Minimum interval between two pushed updates.
pub const STATS_UPDATE_INTERVAL: Duration = Duration::from_millis(500);

/// Entry count and value bytes of a set of entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaggedSummary {
    /// Number of entries.
    pub count: u64,
    /// Sum of value sizes in bytes.
    pub total_size: u64,
}

impl TaggedSummary {
    pub(crate) fn add(&mut self, size: u32) {
        self.count += 1;
        self.total_size += u64::from(size);
    }

    pub(crate) fn subtract(&mut self, size: u32) {
        self.count = self.count.saturating_sub(1);
        self.total_size = self.total_size.saturating_sub(u64::from(size));
    }
}

/// Snapshot of a store's contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    /// All entries.
    pub full: TaggedSummary,
    /// Entries per tag. Tags without entries are absent.
    pub tagged: BTreeMap<u8, TaggedSummary>,
    /// Stale entries are being removed or old generations deleted.
    pub clearing: bool,
    /// A compaction is running.
    pub compacting: bool,
}

/// Subscribers of a store's statistics.
///
/// Owned by the worker thread; disconnected subscribers are dropped on the
/// next push.
#[derive(Debug, Default)]
pub(crate) struct StatsFeed {
    subscribers: Vec<Subscriber>,
}

/// One listener and the snapshot it saw last.
#[derive(Debug)]
struct Subscriber {
    sender: Sender<Stats>,
    last: Stats,
}

impl StatsFeed {
    /// Adds a subscriber and sends it the current snapshot.
    pub fn subscribe(&mut self, sender: Sender<Stats>, current: Stats) {
        if sender.send(current.clone()).is_ok() {
            self.subscribers.push(Subscriber {
                sender,
                last: current,
            });
        }
    }

    /// Returns true if anyone is listening.
    pub fn has_subscribers(&self) -> bool {
        !self.subscribers.is_empty()
    }

    /// Sends `current` to every subscriber whose last snapshot differs.
    pub fn push(&mut self, current: Stats) {
        self.subscribers.retain_mut(|subscriber| {
            if subscriber.last == current {
                return true;
            }
            if subscriber.sender.send(current.clone()).is_err() {
                return false;
            }
            subscriber.last = current.clone();
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn stats(count: u64) -> Stats {
        Stats {
            full: TaggedSummary {
                count,
                total_size: count * 10,
            },
            ..Stats::default()
        }
    }

    #[test]
    fn snapshot_on_subscribe() {
        let mut feed = StatsFeed::default();
        let (tx, rx) = mpsc::channel();
        feed.subscribe(tx, stats(3));
        assert_eq!(rx.try_recv().unwrap(), stats(3));
        assert!(feed.has_subscribers());
    }

    #[test]
    fn unchanged_stats_are_not_pushed() {
        let mut feed = StatsFeed::default();
        let (tx, rx) = mpsc::channel();
        feed.subscribe(tx, stats(1));
        rx.try_recv().unwrap();

        feed.push(stats(1));
        assert!(rx.try_recv().is_err());

        feed.push(stats(2));
        assert_eq!(rx.try_recv().unwrap(), stats(2));
    }

    #[test]
    fn late_subscriber_does_not_swallow_pending_update() {
        let mut feed = StatsFeed::default();
        let (first_tx, first_rx) = mpsc::channel();
        feed.subscribe(first_tx, stats(0));
        assert_eq!(first_rx.try_recv().unwrap(), stats(0));

        let (second_tx, second_rx) = mpsc::channel();
        feed.subscribe(second_tx, stats(1));
        assert_eq!(second_rx.try_recv().unwrap(), stats(1));

        feed.push(stats(1));
        assert_eq!(first_rx.try_recv().unwrap(), stats(1));
        assert!(second_rx.try_recv().is_err());
    }

    #[test]
    fn disconnected_subscribers_are_dropped() {
        let mut feed = StatsFeed::default();
        let (tx, rx) = mpsc::channel();
        feed.subscribe(tx, stats(1));
        drop(rx);
        feed.push(stats(2));
        assert!(!feed.has_subscribers());
    }

    #[test]
    fn summary_arithmetic() {
        let mut summary = TaggedSummary::default();
        summary.add(100);
        summary.add(50);
        summary.subtract(100);
        assert_eq!(summary, TaggedSummary { count: 1, total_size: 50 });
        summary.subtract(50);
        summary.subtract(50);
        assert_eq!(summary, TaggedSummary::default());
    }
}
