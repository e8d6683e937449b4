use crate::archivist::append_log::MediaRequester;
use crate::archivist::record::Record;
use crate::archivist::store::ArchiveStore;
use crate::remote::{Entity, HistoryCursor, RemoteClient};
use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Keeps consecutive remote requests at least `interval` apart.
#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    iteration_start: Instant,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            iteration_start: Instant::now(),
        }
    }

    pub fn begin(&mut self) {
        self.iteration_start = Instant::now();
    }

    /// Sleep for whatever is left of the interval since `begin`.
    pub fn pause(&mut self) {
        let elapsed = self.iteration_start.elapsed();
        if let Some(rest) = self.interval.checked_sub(elapsed) {
            thread::sleep(rest);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    AlreadyComplete,
    ReachedKnownMax,
    ShortPage,
    NoProgress,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AlreadyComplete => "already_complete",
            Self::ReachedKnownMax => "reached_known_max",
            Self::ShortPage => "short_page",
            Self::NoProgress => "no_progress",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryOutcome {
    pub start_id: i64,
    pub last_id: i64,
    pub pages: usize,
    pub records: usize,
    pub stop: StopReason,
}

#[derive(Debug, Clone, Copy)]
pub struct WalkSettings {
    pub chunk_size: usize,
    pub request_interval: Duration,
}

impl Default for WalkSettings {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            request_interval: Duration::from_millis(1_000),
        }
    }
}

fn log_progress(entity: &Entity, start_id: i64, last_id: i64, chunk: usize, window: i64) {
    let known = entity.last_message_id;
    let percent = (last_id - start_id) * 100 / (known - start_id).max(1);
    let mut remaining = known - last_id;
    let mut from = last_id;
    if window > 0 {
        remaining = remaining.min(window);
        from = (known - window).max(0);
    }
    info!(
        entity = entity.id,
        percent,
        from,
        chunk,
        until = known,
        remaining,
        window,
        "loading messages"
    );
}

/// Fetch every message newer than what the entity's log already holds.
///
/// `recent_window` limits a brand-new log to roughly the newest N messages;
/// it is ignored once the log has any record.
pub fn walk_history<C, R>(
    remote: &C,
    store: &mut ArchiveStore,
    entity: &Entity,
    recent_window: i64,
    settings: &WalkSettings,
    requester: &mut R,
) -> Result<HistoryOutcome>
where
    C: RemoteClient + ?Sized,
    R: MediaRequester + ?Sized,
{
    let known = entity.last_message_id;
    let mut last_id = store.last_message_id(entity)?;
    let mut start_id = last_id;
    let mut window = if last_id == 0 { recent_window.max(0) } else { 0 };
    if window > known {
        debug!(
            entity = entity.id,
            window, known, "recent window exceeds newest message id, fetching everything"
        );
        window = 0;
    }

    let mut outcome = HistoryOutcome {
        start_id,
        last_id,
        pages: 0,
        records: 0,
        stop: StopReason::AlreadyComplete,
    };
    if last_id >= known {
        return Ok(outcome);
    }

    let chunk = settings.chunk_size;
    let mut pacer = Pacer::new(settings.request_interval);
    loop {
        if last_id >= known {
            outcome.stop = StopReason::ReachedKnownMax;
            break;
        }
        pacer.begin();
        log_progress(entity, start_id, last_id, chunk, window);

        let cursor = if window > 0 {
            HistoryCursor::Recent { window }
        } else {
            HistoryCursor::After(last_id)
        };
        let page = remote.fetch_history(entity, chunk, cursor)?;
        outcome.pages += 1;

        if page.records.is_empty() && window > 0 {
            debug!(
                entity = entity.id,
                window, "limited fetch returned nothing, fetching from the first message"
            );
            window = 0;
            pacer.pause();
            continue;
        }
        window = 0;

        store.save_related(page.users, page.chats, Utc::now())?;

        let fetched = page.records.len();
        let mut fresh: Vec<Record> = Vec::with_capacity(fetched);
        for record in page.records {
            let id = record.require_id()?;
            if id <= last_id {
                continue;
            }
            if id < start_id || start_id == 0 {
                start_id = id;
            }
            fresh.push(record);
        }
        let page_max = fresh.iter().filter_map(Record::id).max().unwrap_or(last_id);
        let advanced = !fresh.is_empty();

        debug!(entity = entity.id, fetched, new = fresh.len(), "got messages");
        outcome.records += store.save_messages(entity, &fresh, requester)?;
        last_id = last_id.max(page_max);

        if fetched < chunk && last_id < known {
            warn!(
                entity = entity.id,
                fetched,
                chunk,
                last_id,
                known,
                "short page before the newest message; messages may have been deleted, stopping this entity for now"
            );
            outcome.stop = StopReason::ShortPage;
            break;
        }
        if !advanced {
            warn!(
                entity = entity.id,
                fetched,
                last_id,
                known,
                "full page held no message newer than the cursor, stopping this entity"
            );
            outcome.stop = StopReason::NoProgress;
            break;
        }
        pacer.pause();
    }

    outcome.start_id = start_id;
    outcome.last_id = last_id;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archivist::append_log::NoMedia;
    use crate::archivist::side_entity::Sighting;
    use crate::archivist::side_entity::tests::user;
    use crate::remote::test_support::{FakeRemote, user_entity};
    use std::fs;
    use tempfile::tempdir;

    fn fast(chunk_size: usize) -> WalkSettings {
        WalkSettings {
            chunk_size,
            request_interval: Duration::ZERO,
        }
    }

    fn entity(id: i64, last_message_id: i64) -> Entity {
        Entity {
            last_message_id,
            ..user_entity(id, "Alice")
        }
    }

    fn logged_ids(store: &ArchiveStore, entity: &Entity) -> Vec<i64> {
        let path = store.chat_messages_path(entity).expect("path");
        fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(|line| {
                serde_json::from_str::<serde_json::Value>(line).expect("json")["ID"]
                    .as_i64()
                    .expect("id")
            })
            .collect()
    }

    #[test]
    fn walks_forward_in_chunks_until_known_max() {
        let tmp = tempdir().expect("tempdir");
        let mut store = ArchiveStore::new(tmp.path());
        let remote = FakeRemote::new().with_history(1, 1..=25);
        let alice = entity(1, 25);

        let outcome =
            walk_history(&remote, &mut store, &alice, 0, &fast(10), &mut NoMedia).expect("walk");
        assert_eq!(outcome.stop, StopReason::ReachedKnownMax);
        assert_eq!((outcome.start_id, outcome.last_id), (1, 25));
        assert_eq!((outcome.pages, outcome.records), (3, 25));
        assert_eq!(logged_ids(&store, &alice), (1..=25).collect::<Vec<_>>());
        assert_eq!(
            remote.history_calls(),
            vec![
                HistoryCursor::After(0),
                HistoryCursor::After(10),
                HistoryCursor::After(20)
            ]
        );
    }

    #[test]
    fn rerun_without_new_messages_appends_nothing() {
        let tmp = tempdir().expect("tempdir");
        let mut store = ArchiveStore::new(tmp.path());
        let remote = FakeRemote::new().with_history(1, 1..=5);
        let alice = entity(1, 5);

        walk_history(&remote, &mut store, &alice, 0, &fast(10), &mut NoMedia).expect("first");
        let second =
            walk_history(&remote, &mut store, &alice, 0, &fast(10), &mut NoMedia).expect("second");
        assert_eq!(second.stop, StopReason::AlreadyComplete);
        assert_eq!(second.records, 0);
        assert_eq!(logged_ids(&store, &alice).len(), 5);
    }

    #[test]
    fn resumes_from_last_persisted_id() {
        let tmp = tempdir().expect("tempdir");
        let mut store = ArchiveStore::new(tmp.path());
        let remote = FakeRemote::new().with_history(1, 1..=12);
        // An earlier run stopped after 4 messages and crashed mid-line.
        let path = tmp.path().join("1_Alice");
        fs::write(
            &path,
            "{\"ID\":1}\n{\"ID\":2}\n{\"ID\":3}\n{\"ID\":4}\n{\"ID\":5,\"Mes",
        )
        .expect("seed");

        let outcome = walk_history(&remote, &mut store, &entity(1, 12), 0, &fast(5), &mut NoMedia)
            .expect("walk");
        assert_eq!(remote.history_calls()[0], HistoryCursor::After(4));
        assert_eq!(outcome.records, 8);
        assert_eq!(logged_ids(&store, &entity(1, 12)), (1..=12).collect::<Vec<_>>());
    }

    #[test]
    fn empty_limited_first_page_retries_unbounded() {
        let tmp = tempdir().expect("tempdir");
        let mut store = ArchiveStore::new(tmp.path());
        let mut remote = FakeRemote::new().with_history(1, 1..=80);
        remote.empty_recent = true;

        let outcome = walk_history(&remote, &mut store, &entity(1, 80), 50, &fast(100), &mut NoMedia)
            .expect("walk");
        assert_eq!(
            remote.history_calls(),
            vec![HistoryCursor::Recent { window: 50 }, HistoryCursor::After(0)]
        );
        assert_eq!(outcome.records, 80);
        assert_eq!(outcome.stop, StopReason::ReachedKnownMax);
    }

    #[test]
    fn recent_window_starts_near_the_newest_messages() {
        let tmp = tempdir().expect("tempdir");
        let mut store = ArchiveStore::new(tmp.path());
        let remote = FakeRemote::new().with_history(1, 1..=100);

        let outcome = walk_history(&remote, &mut store, &entity(1, 100), 30, &fast(10), &mut NoMedia)
            .expect("walk");
        let ids = logged_ids(&store, &entity(1, 100));
        assert_eq!(ids.first(), Some(&71));
        assert_eq!(ids.last(), Some(&100));
        assert_eq!(outcome.start_id, 71);
        assert_eq!(
            remote.history_calls()[..2],
            [HistoryCursor::Recent { window: 30 }, HistoryCursor::After(80)]
        );
    }

    #[test]
    fn window_larger_than_known_is_disabled() {
        let tmp = tempdir().expect("tempdir");
        let mut store = ArchiveStore::new(tmp.path());
        let remote = FakeRemote::new().with_history(1, 1..=8);

        walk_history(&remote, &mut store, &entity(1, 8), 500, &fast(10), &mut NoMedia).expect("walk");
        assert_eq!(remote.history_calls(), vec![HistoryCursor::After(0)]);
    }

    #[test]
    fn window_is_ignored_when_log_exists() {
        let tmp = tempdir().expect("tempdir");
        let mut store = ArchiveStore::new(tmp.path());
        let remote = FakeRemote::new().with_history(1, 1..=60);
        fs::write(tmp.path().join("1_Alice"), "{\"ID\":2}\n").expect("seed");

        walk_history(&remote, &mut store, &entity(1, 60), 10, &fast(100), &mut NoMedia).expect("walk");
        assert_eq!(remote.history_calls(), vec![HistoryCursor::After(2)]);
    }

    #[test]
    fn short_page_below_known_max_stops_entity() {
        let tmp = tempdir().expect("tempdir");
        let mut store = ArchiveStore::new(tmp.path());
        // The remote claims 40 but only 1..=15 still exist.
        let remote = FakeRemote::new().with_history(1, 1..=15);

        let outcome = walk_history(&remote, &mut store, &entity(1, 40), 0, &fast(10), &mut NoMedia)
            .expect("walk");
        assert_eq!(outcome.stop, StopReason::ShortPage);
        assert_eq!(outcome.last_id, 15);
        assert_eq!(outcome.pages, 2);
    }

    #[test]
    fn full_page_of_old_messages_stops_entity() {
        let tmp = tempdir().expect("tempdir");
        let mut store = ArchiveStore::new(tmp.path());
        let mut remote = FakeRemote::new().with_history(1, 1..=30);
        remote.stale_history = true;

        let outcome = walk_history(&remote, &mut store, &entity(1, 30), 0, &fast(10), &mut NoMedia)
            .expect("walk");
        assert_eq!(outcome.stop, StopReason::NoProgress);
        assert_eq!((outcome.last_id, outcome.records), (10, 10));
        assert_eq!(
            remote.history_calls(),
            vec![HistoryCursor::After(0), HistoryCursor::After(10)]
        );
        assert_eq!(logged_ids(&store, &entity(1, 30)), (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn related_users_are_saved_with_pages() {
        let tmp = tempdir().expect("tempdir");
        let mut store = ArchiveStore::new(tmp.path());
        let mut remote = FakeRemote::new().with_history(1, 1..=3);
        remote.page_users = vec![Sighting::full(user(77, "Zed"))];

        walk_history(&remote, &mut store, &entity(1, 3), 0, &fast(10), &mut NoMedia).expect("walk");
        assert_eq!(store.resolve_title(77, "?").expect("title"), "Zed");
    }
}
