use crate::archivist::append_log::AppendLogWriter;
use crate::archivist::record_index::{RecordIndex, RecordSource};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DELETED_ACCOUNT_TITLE: &str = "Deleted Account";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserData {
    #[serde(rename = "ID")]
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
    pub is_bot: bool,
    pub is_fake: bool,
    pub is_scam: bool,
    pub is_verified: bool,
    pub is_premium: bool,
    pub is_deleted: bool,
    pub updated_at: DateTime<Utc>,
}

impl UserData {
    pub fn display_name(&self) -> String {
        if self.is_deleted {
            return DELETED_ACCOUNT_TITLE.to_string();
        }
        let first = self.first_name.as_deref().unwrap_or_default();
        let last = self.last_name.as_deref().unwrap_or_default();
        format!("{first} {last}").trim().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChatData {
    #[serde(rename = "ID")]
    pub id: i64,
    pub username: Option<String>,
    pub title: String,
    pub is_channel: bool,
    pub updated_at: DateTime<Utc>,
}

/// Slowly-changing snapshot kept in a shared side log.
pub trait SideEntity: Clone + Serialize + DeserializeOwned {
    fn id(&self) -> i64;
    /// True when any persisted attribute other than `UpdatedAt` differs.
    fn differs_from(&self, other: &Self) -> bool;
    fn touch(&mut self, at: DateTime<Utc>);
}

impl SideEntity for UserData {
    fn id(&self) -> i64 {
        self.id
    }

    fn differs_from(&self, other: &Self) -> bool {
        self.username != other.username
            || self.first_name != other.first_name
            || self.last_name != other.last_name
            || self.phone_number != other.phone_number
            || self.is_bot != other.is_bot
            || self.is_fake != other.is_fake
            || self.is_scam != other.is_scam
            || self.is_verified != other.is_verified
            || self.is_premium != other.is_premium
            || self.is_deleted != other.is_deleted
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }
}

impl SideEntity for ChatData {
    fn id(&self) -> i64 {
        self.id
    }

    fn differs_from(&self, other: &Self) -> bool {
        self.username != other.username
            || self.title != other.title
            || self.is_channel != other.is_channel
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }
}

/// A side entity as seen in a remote response.
#[derive(Debug, Clone, PartialEq)]
pub struct Sighting<E> {
    pub entity: E,
    /// The remote sent a reduced form lacking some attributes.
    pub minimal: bool,
}

impl<E> Sighting<E> {
    pub fn full(entity: E) -> Self {
        Self {
            entity,
            minimal: false,
        }
    }
}

/// Decides whether a sighting is too partial to replace a stored snapshot.
pub type PartialRule<E> = Box<dyn Fn(&Sighting<E>) -> bool + Send + Sync>;

pub fn minimal_flag_rule<E>() -> PartialRule<E> {
    Box::new(|sighting: &Sighting<E>| sighting.minimal)
}

pub fn should_persist<E: SideEntity>(
    previous: Option<&E>,
    incoming: &E,
    incoming_is_partial: bool,
) -> bool {
    if incoming_is_partial {
        return false;
    }
    match previous {
        None => true,
        Some(previous) => previous.differs_from(incoming),
    }
}

/// Deduplicating writer over one side log (`users` or `chats`).
pub struct SideEntityLog<E: SideEntity> {
    path: PathBuf,
    index: Option<RecordIndex<E>>,
    latest: HashMap<i64, E>,
    writer: Option<AppendLogWriter>,
    is_partial: PartialRule<E>,
}

impl<E: SideEntity> SideEntityLog<E> {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            index: None,
            latest: HashMap::new(),
            writer: None,
            is_partial: minimal_flag_rule(),
        }
    }

    pub fn with_partial_rule(mut self, rule: PartialRule<E>) -> Self {
        self.is_partial = rule;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn index(&mut self) -> Result<&mut RecordIndex<E>> {
        let index = match self.index.take() {
            Some(index) => index,
            None => {
                let mut index = RecordIndex::new(&self.path);
                index.update_offsets()?;
                index
            }
        };
        Ok(self.index.insert(index))
    }

    /// Last persisted snapshot for `id`, read from disk on first use.
    pub fn previous(&mut self, id: i64) -> Result<Option<E>> {
        if let Some(cached) = self.latest.get(&id) {
            return Ok(Some(cached.clone()));
        }
        let stored = self.index()?.read(id)?;
        if let Some(stored) = &stored {
            self.latest.insert(id, stored.clone());
        }
        Ok(stored)
    }

    /// Persist `sighting` if it changes what is stored. Returns whether a line was written.
    pub fn observe(&mut self, sighting: Sighting<E>, now: DateTime<Utc>) -> Result<bool> {
        let partial = (self.is_partial)(&sighting);
        let id = sighting.entity.id();
        let previous = self.previous(id)?;
        if !should_persist(previous.as_ref(), &sighting.entity, partial) {
            return Ok(false);
        }

        let mut entity = sighting.entity;
        entity.touch(now);
        let writer = match self.writer.take() {
            Some(writer) => writer,
            None => AppendLogWriter::open(&self.path)?,
        };
        self.writer.insert(writer).append(&entity)?;
        debug!(id, path = %self.path.display(), "side entity updated");
        self.latest.insert(id, entity);
        Ok(true)
    }

    pub fn observe_all(
        &mut self,
        sightings: impl IntoIterator<Item = Sighting<E>>,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let mut written = 0;
        for sighting in sightings {
            if self.observe(sighting, now)? {
                written += 1;
            }
        }
        Ok(written)
    }
}

/// Display title for an archived entity: user name, then chat title, then `fallback`.
pub fn resolve_entity_title(
    users: &mut impl RecordSource<UserData>,
    chats: &mut impl RecordSource<ChatData>,
    id: i64,
    fallback: &str,
) -> Result<String> {
    if let Some(user) = users.read_record(id)? {
        return Ok(user.display_name());
    }
    if let Some(chat) = chats.read_record(id)? {
        return Ok(chat.title);
    }
    Ok(fallback.to_string())
}
