use crate::archivist::audit::{AuditLog, Walk, WalkEntry};
use crate::archivist::config::ArchivistConfig;
use crate::archivist::filter::{history_limit_for, warn_about_filters};
use crate::archivist::history::{HistoryOutcome, WalkSettings, walk_history};
use crate::archivist::lock::StoreLock;
use crate::archivist::media_requester::{DownloadStats, DownloadingMediaRequester};
use crate::archivist::paths::ArchivistPaths;
use crate::archivist::stories::{StoryOutcome, walk_stories};
use crate::archivist::store::ArchiveStore;
use crate::remote::{Entity, EntityKind, RemoteClient};
use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize)]
pub struct EntitySyncReport {
    pub id: i64,
    pub title: String,
    pub kind: EntityKind,
    pub history: Option<HistoryOutcome>,
    pub stories: Option<StoryOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    pub self_id: i64,
    pub entities_seen: usize,
    pub warnings: Vec<String>,
    pub synced: Vec<EntitySyncReport>,
    pub downloads: DownloadStats,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatListRow {
    pub kind: EntityKind,
    pub id: i64,
    pub limit: i64,
    pub title: String,
    pub username: String,
    pub selected: bool,
}

/// Put the self entity first, preferring the copy the entity list carries.
pub fn prepend_self(mut entities: Vec<Entity>, me: &Entity) -> Vec<Entity> {
    let own = match entities.iter().position(|entity| entity.id == me.id) {
        Some(pos) => entities.remove(pos),
        None => me.clone(),
    };
    entities.insert(0, own);
    entities
}

fn load_entities<C: RemoteClient + ?Sized>(remote: &C) -> Result<(Entity, Vec<Entity>)> {
    let me = remote.get_self()?;
    info!(id = me.id, title = %me.title, username = %me.username, "logged in");
    let entities = prepend_self(remote.get_entity_list()?, &me);
    Ok((me, entities))
}

fn audited<T: Serialize>(audit: &AuditLog, walk: Walk, entity: &Entity, result: Result<T>) -> Result<T> {
    match result {
        Ok(outcome) => {
            audit.record(&WalkEntry::finished(walk, entity, &outcome)?)?;
            Ok(outcome)
        }
        Err(err) => {
            audit.record(&WalkEntry::failed(walk, entity, &err))?;
            Err(err)
        }
    }
}

/// One archival pass over every entity the filters select.
pub fn run_sync<C: RemoteClient + ?Sized>(
    remote: &C,
    cfg: &ArchivistConfig,
    paths: &ArchivistPaths,
) -> Result<SyncSummary> {
    let mut store = ArchiveStore::new(&cfg.sync.out_dir).with_schema_layer(cfg.sync.schema_layer);
    let audit = AuditLog::new(paths);
    let lock = StoreLock::acquire(&store.layout().lock_path)?;
    debug!(lock = %lock.path().display(), "store locked");

    let (me, entities) = load_entities(remote)?;
    let filters = &cfg.filters;
    let warnings = warn_about_filters(
        &filters.history,
        &filters.stories,
        &filters.media,
        &filters.history_limit,
        &entities,
    );

    if cfg.sync.dump_account {
        store.save_account(&remote.get_account()?)?;
        info!("account info saved");
    }
    if cfg.sync.dump_contacts {
        store.save_contacts(&remote.get_contacts()?)?;
        info!("contacts saved");
    }
    if cfg.sync.dump_sessions {
        store.save_sessions(&remote.get_sessions()?)?;
        info!("active sessions saved");
    }

    store.save_entities_as_related(&entities, Utc::now())?;

    let settings = WalkSettings {
        chunk_size: cfg.sync.history_chunk_size,
        request_interval: Duration::from_millis(cfg.sync.request_interval_ms),
    };
    let mut requester = DownloadingMediaRequester::new(remote, store.layout().clone(), &filters.media);
    let mut synced = Vec::new();
    for entity in &entities {
        let mut report = EntitySyncReport {
            id: entity.id,
            title: entity.title.clone(),
            kind: entity.kind,
            history: None,
            stories: None,
        };

        if filters.history.is_true(entity, None) {
            info!(
                id = entity.id,
                title = %entity.title,
                username = %entity.username,
                kind = %entity.kind,
                "saving messages"
            );
            let window = history_limit_for(&filters.history_limit, entity);
            let result = walk_history(remote, &mut store, entity, window, &settings, &mut requester);
            report.history = Some(audited(&audit, Walk::History, entity, result)?);
        }

        if !cfg.sync.skip_stories
            && entity.may_have_stories()
            && filters.stories.is_true(entity, None)
        {
            info!(
                id = entity.id,
                title = %entity.title,
                username = %entity.username,
                kind = %entity.kind,
                "saving stories"
            );
            let try_archived = entity.id == me.id || entity.kind == EntityKind::Channel;
            let result = walk_stories(
                remote,
                &mut store,
                entity,
                try_archived,
                cfg.sync.story_chunk_size,
                &mut requester,
            );
            report.stories = Some(audited(&audit, Walk::Stories, entity, result)?);
        }

        if report.history.is_some() || report.stories.is_some() {
            synced.push(report);
        }
    }

    Ok(SyncSummary {
        self_id: me.id,
        entities_seen: entities.len(),
        warnings,
        synced,
        downloads: requester.stats(),
    })
}

/// Remote entities with their recent-window limit and history selection.
pub fn list_chats<C: RemoteClient + ?Sized>(
    remote: &C,
    cfg: &ArchivistConfig,
) -> Result<(Vec<ChatListRow>, Vec<String>)> {
    let (_, entities) = load_entities(remote)?;
    let filters = &cfg.filters;
    let warnings = warn_about_filters(
        &filters.history,
        &filters.stories,
        &filters.media,
        &filters.history_limit,
        &entities,
    );
    let rows = entities
        .iter()
        .map(|entity| ChatListRow {
            kind: entity.kind,
            id: entity.id,
            limit: history_limit_for(&filters.history_limit, entity),
            title: entity.title.clone(),
            username: entity.username.clone(),
            selected: filters.history.is_true(entity, None),
        })
        .collect();
    Ok((rows, warnings))
}
