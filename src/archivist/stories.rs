use crate::archivist::append_log::MediaRequester;
use crate::archivist::record::Record;
use crate::archivist::store::ArchiveStore;
use crate::error::RemoteError;
use crate::remote::{Entity, RemoteClient, StorySource};
use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoryOutcome {
    pub source: &'static str,
    pub last_saved_id: i64,
    pub records: usize,
    pub gap_chunks: usize,
}

fn load_and_save_related<C: RemoteClient + ?Sized>(
    remote: &C,
    store: &mut ArchiveStore,
    entity: &Entity,
    source: StorySource,
    chunk: usize,
    offset_id: i64,
) -> Result<Vec<Record>> {
    let page = remote.fetch_stories(entity, source, chunk, offset_id)?;
    store.save_related(page.users, page.chats, Utc::now())?;
    Ok(page.records)
}

fn newer_than(records: Vec<Record>, last_saved_id: i64) -> Result<(Vec<Record>, i64)> {
    let mut max_id = 0;
    let mut fresh = Vec::with_capacity(records.len());
    for record in records {
        let id = record.require_id()?;
        max_id = max_id.max(id);
        if id > last_saved_id {
            fresh.push(record);
        }
    }
    Ok((fresh, max_id))
}

/// Save every story newer than the entity's story log, oldest first.
///
/// The newest chunk is loaded first to learn where the remote ends; the range
/// between the log and that chunk is then filled forward in `chunk` steps.
pub fn walk_stories<C, R>(
    remote: &C,
    store: &mut ArchiveStore,
    entity: &Entity,
    try_archived: bool,
    chunk: usize,
    requester: &mut R,
) -> Result<StoryOutcome>
where
    C: RemoteClient + ?Sized,
    R: MediaRequester + ?Sized,
{
    let mut last_saved_id = store.last_story_id(entity)?;

    let mut source = StorySource::Pinned;
    let mut latest = None;
    if try_archived {
        match load_and_save_related(remote, store, entity, StorySource::Archived, chunk, 0) {
            Ok(records) => {
                source = StorySource::Archived;
                latest = Some(records);
            }
            Err(err) if RemoteError::is_permission_denied(&err) => {
                debug!(entity = entity.id, "archived stories unavailable, loading pinned only");
            }
            Err(err) => return Err(err),
        }
    }
    let latest = match latest {
        Some(records) => records,
        None => load_and_save_related(remote, store, entity, StorySource::Pinned, chunk, 0)?,
    };

    let mut outcome = StoryOutcome {
        source: source.as_str(),
        last_saved_id,
        records: 0,
        gap_chunks: 0,
    };
    // Newest first, so the last element is the oldest of the newest chunk.
    let Some(latest_first_id) = latest.last().map(Record::require_id).transpose()? else {
        return Ok(outcome);
    };

    let step = i64::try_from(chunk)?;
    let mut lower = last_saved_id + 1;
    while lower < latest_first_id {
        let offset_id = lower + step;
        info!(
            entity = entity.id,
            source = source.as_str(),
            from = lower,
            until = latest_first_id,
            "loading stories"
        );
        let page = load_and_save_related(remote, store, entity, source, chunk, offset_id)?;
        let (fresh, page_max) = newer_than(page, last_saved_id)?;
        outcome.records += store.save_stories(entity, &fresh, requester)?;
        outcome.gap_chunks += 1;
        last_saved_id = last_saved_id.max(page_max);
        lower += step;
    }

    let (fresh, page_max) = newer_than(latest, last_saved_id)?;
    outcome.records += store.save_stories(entity, &fresh, requester)?;
    outcome.last_saved_id = last_saved_id.max(page_max);
    Ok(outcome)
}
