use super::*;
use crate::queue::Command;
use crate::types::TaggedValue;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use stashdb_storage::PHYSICAL_HEADER_SIZE;
use std::time::Duration;
use tempfile::TempDir;

const START_TIME: u32 = 1_700_000_000;

struct Harness {
    object: DatabaseObject,
    receiver: Receiver<Command>,
    now: Arc<AtomicU32>,
    key: EncryptionKey,
    temp: TempDir,
}

impl Harness {
    fn new(settings: Settings) -> Self {
        let temp = tempfile::tempdir().unwrap();
        Self::in_dir(temp, settings, EncryptionKey::generate())
    }

    fn in_dir(temp: TempDir, settings: Settings, key: EncryptionKey) -> Self {
        let now = Arc::new(AtomicU32::new(START_TIME));
        let (object, receiver) = object_for(temp.path(), settings, &now);
        Self {
            object,
            receiver,
            now,
            key,
            temp,
        }
    }

    fn open(&mut self) {
        self.object.open(self.key.clone()).unwrap();
    }

    fn reopen(&mut self) {
        self.object.close();
        self.open();
    }

    fn advance(&self, seconds: u32) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }

    /// Runs every task that helpers posted so far.
    fn drain(&mut self) {
        while let Ok(command) = self.receiver.try_recv() {
            if let Command::Task(task) = command {
                task(&mut self.object);
            }
        }
    }

    /// Blocks until one helper task arrives and runs it.
    fn run_next_task(&mut self) {
        match self.receiver.recv_timeout(Duration::from_secs(10)) {
            Ok(Command::Task(task)) => task(&mut self.object),
            Ok(Command::Shutdown) => panic!("unexpected shutdown"),
            Err(error) => panic!("no task arrived: {error}"),
        }
    }

    /// Fires every armed timer, as if a long time had passed.
    fn fire_timers(&mut self) {
        self.object
            .fire_timers(Instant::now() + Duration::from_secs(24 * 60 * 60));
    }

    fn put(&mut self, key: u128, bytes: &[u8]) {
        self.object
            .put(Key::from(key), TaggedValue::new(bytes.to_vec(), 0))
            .unwrap();
    }

    fn get(&mut self, key: u128) -> Vec<u8> {
        self.object.get(Key::from(key)).bytes
    }
}

fn object_for(
    path: &Path,
    settings: Settings,
    now: &Arc<AtomicU32>,
) -> (DatabaseObject, Receiver<Command>) {
    let (sender, receiver) = mpsc::channel();
    let clock_now = Arc::clone(now);
    let clock: Clock = Arc::new(move || clock_now.load(Ordering::SeqCst));
    let object = DatabaseObject::new(path, settings, Mailbox::new(sender), clock);
    (object, receiver)
}

fn untimed() -> Settings {
    Settings::default().track_estimated_time(false)
}

#[test]
fn put_get_roundtrip() {
    let mut harness = Harness::new(Settings::default());
    harness.open();
    harness
        .object
        .put(Key::new(0, 1), TaggedValue::new(b"ABC".to_vec(), 5))
        .unwrap();

    let value = harness.object.get(Key::new(0, 1));
    assert_eq!(value, TaggedValue::new(b"ABC".to_vec(), 5));
    assert!(harness.object.get(Key::new(0, 2)).bytes.is_empty());
}

#[test]
fn values_survive_reopen() {
    let mut harness = Harness::new(Settings::default());
    harness.open();
    harness.put(1, b"first");
    harness.put(2, b"second");
    harness.put(1, b"replaced");
    harness.reopen();

    assert_eq!(harness.get(1), b"replaced");
    assert_eq!(harness.get(2), b"second");
    assert_eq!(harness.object.current_stats().full.count, 2);
}

#[test]
fn identical_put_is_a_noop() {
    let mut harness = Harness::new(Settings::default());
    harness.open();
    harness.put(1, b"same bytes");
    let size = harness.object.binlog_size();

    harness.put(1, b"same bytes");
    assert_eq!(harness.object.binlog_size(), size);
    assert!(harness.object.accessed.contains(&Key::from(1)));

    harness
        .object
        .put(Key::from(1), TaggedValue::new(b"same bytes".to_vec(), 9))
        .unwrap();
    assert!(harness.object.binlog_size() > size);
}

#[test]
fn removed_key_reads_empty_before_flush() {
    let mut harness = Harness::new(Settings::default());
    harness.open();
    harness.put(1, b"value");
    let size = harness.object.binlog_size();

    harness.object.remove(Key::from(1)).unwrap();
    assert!(harness.get(1).is_empty());
    assert_eq!(harness.object.binlog_size(), size);

    harness.reopen();
    assert!(harness.get(1).is_empty());
}

#[test]
fn remove_bundle_written_when_full() {
    let mut harness = Harness::new(untimed().max_bundled_records(2).compact_chunk_size(2));
    harness.open();
    harness.put(1, b"a");
    harness.put(2, b"b");
    let size = harness.object.binlog_size();

    harness.object.remove(Key::from(1)).unwrap();
    assert_eq!(harness.object.binlog_size(), size);
    harness.object.remove(Key::from(2)).unwrap();
    assert_eq!(harness.object.binlog_size(), size + 16 + 2 * 16);
}

#[test]
fn access_bundle_written_when_full() {
    let mut harness = Harness::new(
        Settings::default()
            .max_bundled_records(2)
            .compact_chunk_size(2),
    );
    harness.open();
    harness.put(1, b"a");
    harness.put(2, b"b");
    let size = harness.object.binlog_size();

    assert_eq!(harness.get(1), b"a");
    assert_eq!(harness.object.binlog_size(), size);
    assert_eq!(harness.get(2), b"b");
    assert_eq!(harness.object.binlog_size(), size + 16 + 2 * 16);
    assert!(harness.object.accessed.is_empty());
}

#[test]
fn bundles_written_by_timer() {
    let mut harness = Harness::new(Settings::default());
    harness.open();
    harness.put(1, b"value");
    harness.get(1);
    let size = harness.object.binlog_size();
    assert!(harness.object.next_deadline().is_some());

    harness.fire_timers();
    assert_eq!(harness.object.binlog_size(), size + 16 + 16);
    assert!(harness.object.accessed.is_empty());
}

#[test]
fn empty_put_removes() {
    let mut harness = Harness::new(Settings::default());
    harness.open();
    harness.put(1, b"value");
    harness.put(1, b"");
    assert!(harness.get(1).is_empty());
}

#[test]
fn oversized_value_is_rejected() {
    let mut harness = Harness::new(Settings::default().max_data_size(8));
    harness.open();
    let error = harness
        .object
        .put(Key::from(1), TaggedValue::new(vec![1; 9], 0))
        .unwrap_err();
    assert_eq!(error, Error::ValueTooLarge { size: 9, limit: 8 });
}

#[test]
fn closed_store_rejects_writes() {
    let mut harness = Harness::new(Settings::default());
    let result = harness.object.put(Key::from(1), TaggedValue::new(vec![1], 0));
    assert_eq!(result, Err(Error::Closed));
    assert_eq!(harness.object.remove(Key::from(1)), Err(Error::Closed));
    assert_eq!(harness.object.clear(), Err(Error::Closed));
    assert!(harness.get(1).is_empty());
}

#[test]
fn wrong_key_is_reported() {
    let mut harness = Harness::new(Settings::default());
    harness.open();
    harness.put(1, b"secret");
    harness.object.close();

    let error = harness.object.open(EncryptionKey::generate()).unwrap_err();
    assert!(matches!(error, Error::WrongKey { .. }));
    assert!(!harness.object.is_open());

    harness.open();
    assert_eq!(harness.get(1), b"secret");
}

#[test]
fn wrong_key_can_start_over() {
    let mut harness = Harness::new(Settings::default());
    harness.open();
    harness.put(1, b"secret");
    let old_version = harness.object.version();
    harness.object.close();

    harness.object.reconfigure(Settings::default().clear_on_wrong_key(true));
    harness.object.open(EncryptionKey::generate()).unwrap();
    assert_ne!(harness.object.version(), old_version);
    assert!(harness.get(1).is_empty());
}

#[test]
fn second_instance_is_locked_out() {
    let mut harness = Harness::new(Settings::default());
    harness.open();

    let (mut other, _receiver) = object_for(harness.temp.path(), Settings::default(), &harness.now);
    let error = other.open(harness.key.clone()).unwrap_err();
    assert!(matches!(error, Error::LockFailed { .. }));
}

#[test]
fn format_mismatch_starts_new_generation() {
    let mut harness = Harness::new(Settings::default());
    harness.open();
    harness.put(1, b"timed");
    let old_version = harness.object.version();
    harness.object.close();

    harness.object.reconfigure(untimed());
    harness.open();
    assert_ne!(harness.object.version(), old_version);
    assert!(harness.get(1).is_empty());
}

#[test]
fn torn_tail_is_discarded() {
    let mut harness = Harness::new(untimed());
    harness.open();
    harness.put(1, b"kept");
    let good = harness.object.binlog_size();
    harness.object.close();

    {
        let path = StoreDir::new(harness.temp.path()).binlog_path(0);
        let mut file = EncryptedFile::open(&path, Mode::ReadAppend, &harness.key).unwrap();
        // A bundle header announcing parts that were never written.
        let mut garbage = [0u8; 16];
        garbage[0] = crate::binlog::MULTI_REMOVE;
        garbage[1] = 4;
        assert_eq!(file.write(&mut garbage), 16);
    }

    harness.open();
    assert_eq!(harness.get(1), b"kept");
    assert_eq!(harness.object.binlog_size(), good);

    harness.put(2, b"after");
    harness.reopen();
    assert_eq!(harness.get(2), b"after");
}

#[test]
fn corrupt_value_reads_empty() {
    let mut harness = Harness::new(Settings::default());
    harness.open();
    harness.put(1, b"original");

    let place = harness.object.map[&Key::from(1)].place;
    let path = harness.object.place_path(&place);
    let mut file = EncryptedFile::open(&path, Mode::Write, &harness.key).unwrap();
    assert!(file.write_with_padding(b"tampered"));
    drop(file);

    assert!(harness.get(1).is_empty());
    // Not repaired: the entry is still indexed.
    assert!(harness.object.map.contains_key(&Key::from(1)));
}

#[test]
fn clear_by_tag_keeps_other_tags() {
    let mut harness = Harness::new(Settings::default());
    harness.open();
    for n in 0..4u64 {
        let tag = (n % 2) as u8;
        harness
            .object
            .put(Key::new(0, n), TaggedValue::new(vec![n as u8 + 1; 4], tag))
            .unwrap();
    }
    harness.object.clear_by_tag(1).unwrap();

    assert_eq!(harness.object.get(Key::new(0, 0)).bytes, vec![1; 4]);
    assert!(harness.object.get(Key::new(0, 1)).bytes.is_empty());
    assert!(harness.object.get(Key::new(0, 3)).bytes.is_empty());
    let stats = harness.object.current_stats();
    assert_eq!(stats.full.count, 2);
    assert!(!stats.tagged.contains_key(&1));
}

#[test]
fn stale_keys_are_removed_in_chunks() {
    let mut harness = Harness::new(Settings::default().stale_remove_chunk(2));
    harness.open();
    for n in 0..5 {
        harness
            .object
            .put(Key::from(n), TaggedValue::new(vec![1, 2, 3], 7))
            .unwrap();
    }

    harness.object.clear_by_tag(7).unwrap();
    assert_eq!(harness.object.map.len(), 3);
    assert!(harness.get(4).is_empty());

    harness.fire_timers();
    assert_eq!(harness.object.map.len(), 1);
    harness.fire_timers();
    assert!(harness.object.map.is_empty());
    assert!(harness.object.stale.is_empty());
}

#[test]
fn put_revives_stale_key() {
    let mut harness = Harness::new(Settings::default().stale_remove_chunk(1));
    harness.open();
    for n in 0..3 {
        harness
            .object
            .put(Key::from(n), TaggedValue::new(vec![9], 3))
            .unwrap();
    }
    harness.object.clear_by_tag(3).unwrap();
    harness.put(2, b"fresh");
    while harness.object.next_deadline().is_some() && !harness.object.stale.is_empty() {
        harness.fire_timers();
    }
    assert_eq!(harness.get(2), b"fresh");
}

#[test]
fn size_pruning_evicts_oldest() {
    let settings = Settings::default()
        .max_data_size(16)
        .total_size_limit(40)
        .prune_timeout(Duration::ZERO);
    let mut harness = Harness::new(settings);
    harness.open();
    for n in 1..=5 {
        harness.advance(10);
        harness.put(n, &[n as u8; 10]);
    }
    assert_eq!(harness.object.current_stats().full.total_size, 50);

    harness.fire_timers();
    assert!(harness.object.total_size <= 40);
    assert!(harness.get(1).is_empty());
    for n in 2..=5 {
        assert_eq!(harness.get(n), vec![n as u8; 10]);
    }
}

#[test]
fn time_pruning_evicts_expired() {
    let settings = Settings::default()
        .total_time_limit(60)
        .prune_timeout(Duration::ZERO);
    let mut harness = Harness::new(settings);
    harness.open();
    harness.put(1, b"old");
    harness.advance(100);
    harness.put(2, b"new");

    harness.fire_timers();
    assert!(harness.get(1).is_empty());
    assert_eq!(harness.get(2), b"new");
}

#[test]
fn entry_at_exactly_the_time_limit_is_pruned() {
    let settings = Settings::default()
        .total_time_limit(60)
        .prune_timeout(Duration::ZERO);
    let mut harness = Harness::new(settings);
    harness.open();
    harness.put(1, b"borderline");
    harness.advance(59);
    harness.fire_timers();
    assert_eq!(harness.object.current_stats().full.count, 1);

    harness.advance(1);
    harness.object.prune();
    assert_eq!(harness.object.current_stats().full.count, 0);
    assert!(harness.get(1).is_empty());
}

#[test]
fn invalid_settings_update_is_ignored() {
    let settings = Settings::default()
        .max_data_size(1024)
        .total_size_limit(64 * 1024)
        .prune_timeout(Duration::ZERO);
    let mut harness = Harness::new(settings);
    harness.open();
    harness.put(1, &[1; 600]);
    harness.put(2, &[2; 600]);

    harness.object.update_settings(SettingsUpdate {
        total_size_limit: 512,
        total_time_limit: 0,
    });
    assert_eq!(harness.object.settings.total_size_limit, 64 * 1024);
    harness.fire_timers();
    assert_eq!(harness.object.current_stats().full.count, 2);

    harness.object.update_settings(SettingsUpdate {
        total_size_limit: 1100,
        total_time_limit: 0,
    });
    assert_eq!(harness.object.settings.total_size_limit, 1100);
    harness.fire_timers();
    assert_eq!(harness.object.current_stats().full.count, 1);
}

#[test]
fn access_keeps_entry_fresh() {
    let settings = Settings::default()
        .total_time_limit(60)
        .prune_timeout(Duration::ZERO);
    let mut harness = Harness::new(settings);
    harness.open();
    harness.put(1, b"read often");
    harness.put(2, b"never read");
    harness.advance(50);
    assert_eq!(harness.get(1), b"read often");
    harness.advance(50);
    harness.put(3, b"trigger");

    harness.fire_timers();
    assert_eq!(harness.get(1), b"read often");
    assert!(harness.get(2).is_empty());
}

#[test]
fn access_times_survive_reopen() {
    let mut harness = Harness::new(Settings::default());
    harness.open();
    harness.put(1, b"value");
    harness.advance(30);
    harness.get(1);
    let touched = harness.object.map[&Key::from(1)].use_time;
    harness.reopen();
    assert!(harness.object.map[&Key::from(1)].use_time >= touched);
}

#[test]
fn clear_rotates_generation() {
    let mut harness = Harness::new(Settings::default());
    harness.open();
    harness.put(1, b"value");
    let old_version = harness.object.version();

    harness.object.clear().unwrap();
    assert_ne!(harness.object.version(), old_version);
    assert!(harness.get(1).is_empty());

    // The cleaner reports back once the old generation is gone.
    while harness.object.cleaner.is_some() {
        harness.run_next_task();
    }
    let dir = StoreDir::new(harness.temp.path());
    assert_eq!(dir.list_versions(), vec![harness.object.version()]);
}

#[test]
fn wait_for_cleaner_completes() {
    let mut harness = Harness::new(Settings::default());
    harness.open();
    let (sender, receiver) = mpsc::channel();
    harness.object.wait_for_cleaner(Box::new(move |_| {
        sender.send(()).unwrap();
    }));
    while receiver.try_recv().is_err() {
        harness.run_next_task();
    }
    assert!(harness.object.cleaner.is_none());
}

#[test]
fn conditional_puts() {
    let mut harness = Harness::new(Settings::default());
    harness.open();
    harness.put(1, b"one");

    harness
        .object
        .put_if_empty(Key::from(1), TaggedValue::new(b"other".to_vec(), 0))
        .unwrap();
    assert_eq!(harness.get(1), b"one");

    harness.object.copy_if_empty(Key::from(1), Key::from(2)).unwrap();
    assert_eq!(harness.get(2), b"one");

    harness.object.move_if_empty(Key::from(1), Key::from(3)).unwrap();
    assert!(harness.get(1).is_empty());
    assert_eq!(harness.get(3), b"one");

    harness.reopen();
    assert!(harness.get(1).is_empty());
    assert_eq!(harness.get(2), b"one");
    assert_eq!(harness.get(3), b"one");
}

#[test]
fn move_does_not_clobber() {
    let mut harness = Harness::new(Settings::default());
    harness.open();
    harness.put(1, b"from");
    harness.put(2, b"to");
    harness.object.move_if_empty(Key::from(1), Key::from(2)).unwrap();
    assert_eq!(harness.get(1), b"from");
    assert_eq!(harness.get(2), b"to");
}

#[test]
fn move_crash_between_records_keeps_shared_file() {
    let mut harness = Harness::new(untimed());
    harness.open();
    harness.put(1, b"one");
    let before = harness.object.binlog_size();

    harness.object.move_if_empty(Key::from(1), Key::from(3)).unwrap();
    let store_size = harness.object.format.store_size() as u64;
    assert_eq!(harness.object.binlog_size(), before + store_size + 16 + 16);

    let path = harness.object.binlog_path();
    harness.object.close();
    fs::OpenOptions::new()
        .write(true)
        .open(&path)
        .unwrap()
        .set_len(PHYSICAL_HEADER_SIZE + before + store_size)
        .unwrap();
    harness.open();
    assert_eq!(harness.get(1), b"one");
    assert_eq!(harness.get(3), b"one");

    harness.object.remove(Key::from(1)).unwrap();
    assert_eq!(harness.get(3), b"one");
    harness.reopen();
    assert!(harness.get(1).is_empty());
    assert_eq!(harness.get(3), b"one");

    let place = harness.object.map[&Key::from(3)].place;
    harness.object.remove(Key::from(3)).unwrap();
    assert!(harness.object.places.is_empty());
    assert!(!harness.object.place_path(&place).exists());
}

#[test]
fn put_over_shared_file_takes_a_new_place() {
    let mut harness = Harness::new(untimed());
    harness.open();
    harness.put(1, b"one");
    let entry = harness.object.map[&Key::from(1)];
    harness.object.set_map_entry(Key::from(2), entry);

    harness.put(2, b"two");
    assert_ne!(harness.object.map[&Key::from(2)].place, entry.place);
    assert_eq!(harness.get(1), b"one");
    assert_eq!(harness.get(2), b"two");
}

#[test]
fn sizes_of_other_keys() {
    let mut harness = Harness::new(Settings::default());
    harness.open();
    harness.put(1, b"12345");
    harness.put(2, b"12");
    let (value, sizes) = harness
        .object
        .get_with_sizes(Key::from(1), &[Key::from(2), Key::from(3)]);
    assert_eq!(value.bytes, b"12345");
    assert_eq!(sizes, vec![Some(2), None]);
}

#[test]
fn compaction_shrinks_binlog() {
    let settings = untimed().compact_after_excess(128);
    let mut harness = Harness::new(settings);
    harness.open();
    for n in 1..=3 {
        harness.put(n, b"stable");
    }
    for round in 0..5u8 {
        harness.put(0, &[round + 1; 8]);
    }
    assert!(harness.object.compactor.is_some());
    let before = harness.object.binlog_size();

    while harness.object.compactor.is_some() {
        harness.run_next_task();
    }
    assert_eq!(harness.object.compactor_next_attempt, None);
    assert!(harness.object.binlog_size() < before);
    assert_eq!(harness.object.binlog_excess, 0);

    harness.reopen();
    assert_eq!(harness.get(0), vec![5; 8]);
    for n in 1..=3 {
        assert_eq!(harness.get(n), b"stable");
    }
    let dir = StoreDir::new(harness.temp.path());
    assert!(!dir.compact_path(0).exists());
    assert!(!dir.ready_path(0).exists());
}

#[test]
fn leftover_ready_binlog_is_promoted() {
    let mut harness = Harness::new(untimed());
    harness.open();
    harness.put(1, b"value");
    harness.object.close();

    let dir = StoreDir::new(harness.temp.path());
    fs::rename(dir.binlog_path(0), dir.ready_path(0)).unwrap();
    fs::write(dir.compact_path(0), b"partial").unwrap();

    harness.open();
    assert_eq!(harness.get(1), b"value");
    assert!(!dir.ready_path(0).exists());
    assert!(!dir.compact_path(0).exists());
}

#[test]
fn stats_snapshot_on_subscribe() {
    let mut harness = Harness::new(Settings::default());
    harness.open();
    harness
        .object
        .put(Key::from(1), TaggedValue::new(vec![0; 10], 4))
        .unwrap();

    let (sender, receiver) = mpsc::channel();
    harness.object.subscribe_stats(sender);
    let stats = receiver.try_recv().unwrap();
    assert_eq!(stats.full.count, 1);
    assert_eq!(stats.full.total_size, 10);
    assert_eq!(stats.tagged[&4].count, 1);

    harness.put(2, b"more");
    harness.fire_timers();
    let stats = receiver.try_recv().unwrap();
    assert_eq!(stats.full.count, 2);
}

#[test]
fn late_subscriber_keeps_earlier_one_updated() {
    let mut harness = Harness::new(Settings::default());
    harness.open();

    let (first_sender, first) = mpsc::channel();
    harness.object.subscribe_stats(first_sender);
    assert_eq!(first.try_recv().unwrap().full.count, 0);

    harness.put(1, b"value");
    let (second_sender, second) = mpsc::channel();
    harness.object.subscribe_stats(second_sender);
    assert_eq!(second.try_recv().unwrap().full.count, 1);

    harness.fire_timers();
    assert_eq!(first.try_recv().unwrap().full.count, 1);
    assert!(second.try_recv().is_err());
}

#[test]
fn minimal_time_tracks_oldest_entry() {
    let mut harness = Harness::new(Settings::default());
    harness.open();
    harness.put(1, b"a");
    let first = harness.object.minimal_entry_time;
    assert_ne!(first, 0);

    harness.advance(10);
    harness.put(2, b"b");
    assert_eq!(harness.object.minimal_entry_time, first);

    harness.object.remove(Key::from(1)).unwrap();
    assert_eq!(harness.object.minimal_entry_time, 0);
    harness.drain();
}

#[test]
fn verify_does_not_touch_access_times() {
    let mut harness = Harness::new(Settings::default());
    harness.open();
    harness.put(2, b"two");
    harness.put(1, b"one");
    assert_eq!(harness.object.keys(), vec![Key::from(1), Key::from(2)]);

    assert_eq!(harness.object.verify_value(Key::from(1)), Some(true));
    assert_eq!(harness.object.verify_value(Key::from(3)), None);
    assert!(harness.object.accessed.is_empty());

    let place = harness.object.map[&Key::from(2)].place;
    fs::remove_file(harness.object.place_path(&place)).unwrap();
    assert_eq!(harness.object.verify_value(Key::from(2)), Some(false));
}

#[test]
fn fresh_place_skips_places_of_missing_files() {
    let mut harness = Harness::new(Settings::default());
    harness.open();
    harness.put(1, b"one");
    let taken = harness.object.map[&Key::from(1)].place;
    fs::remove_file(harness.object.place_path(&taken)).unwrap();

    let free = PlaceId([0xab; 7]);
    let mut candidates = vec![free, taken, taken].into_iter().rev();
    let place = harness
        .object
        .fresh_place_from(|| candidates.next().unwrap());
    assert_eq!(place, free);

    harness.object.remove(Key::from(1)).unwrap();
    assert_eq!(harness.object.fresh_place_from(|| taken), taken);
}
