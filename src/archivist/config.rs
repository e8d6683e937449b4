use crate::archivist::filter::{AttrsFilter, FilterSpec, HistoryLimitRule};
use crate::remote::EntityKind;
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub gateway_url: String,
    pub api_token: Option<String>,
    pub request_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub retry_attempts: u32,
    pub retry_interval_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            gateway_url: "http://127.0.0.1:8780".to_string(),
            api_token: None,
            request_timeout_secs: 30,
            download_timeout_secs: 600,
            retry_attempts: 5,
            retry_interval_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub out_dir: PathBuf,
    pub request_interval_ms: u64,
    pub history_chunk_size: usize,
    pub story_chunk_size: usize,
    pub dump_account: bool,
    pub dump_contacts: bool,
    pub dump_sessions: bool,
    pub skip_stories: bool,
    /// Written as `_TL_LAYER` into stored objects when set.
    pub schema_layer: Option<u32>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("history"),
            request_interval_ms: 1_000,
            history_chunk_size: 100,
            story_chunk_size: 50,
            dump_account: false,
            dump_contacts: false,
            dump_sessions: false,
            skip_stories: false,
            schema_layer: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FiltersConfig {
    pub history: FilterSpec,
    pub stories: FilterSpec,
    pub media: FilterSpec,
    pub history_limit: Vec<HistoryLimitRule>,
}

impl Default for FiltersConfig {
    fn default() -> Self {
        Self {
            history: FilterSpec::Attrs(AttrsFilter::kind(EntityKind::User)),
            stories: FilterSpec::none(),
            media: FilterSpec::none(),
            history_limit: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ArchivistConfig {
    pub remote: RemoteConfig,
    pub sync: SyncConfig,
    pub filters: FiltersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialArchivistConfig {
    remote: Option<RemoteConfig>,
    sync: Option<SyncConfig>,
    filters: Option<FiltersConfig>,
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_u32(var: &str, fallback: u32) -> u32 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u32>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_usize(var: &str, fallback: usize) -> usize {
    match env::var(var) {
        Ok(v) => v.trim().parse::<usize>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_bool(var: &str, fallback: bool) -> bool {
    match env::var(var) {
        Ok(v) => {
            let trimmed = v.trim();
            match trimmed {
                "1" | "true" | "TRUE" | "yes" | "on" => true,
                "0" | "false" | "FALSE" | "no" | "off" => false,
                _ => fallback,
            }
        }
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn env_string(var: &str) -> Option<String> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => None,
    }
}

fn validate(cfg: &ArchivistConfig) -> Result<()> {
    if cfg.remote.gateway_url.trim().is_empty() {
        return Err(anyhow!("invalid gateway url: cannot be empty"));
    }
    if cfg.remote.request_timeout_secs == 0 {
        return Err(anyhow!("invalid request timeout: must be >= 1 second"));
    }
    if cfg.remote.download_timeout_secs == 0 {
        return Err(anyhow!("invalid download timeout: must be >= 1 second"));
    }
    if cfg.remote.retry_attempts == 0 {
        return Err(anyhow!("invalid retry attempts: must be >= 1"));
    }
    if cfg.remote.retry_interval_ms == 0 {
        return Err(anyhow!("invalid retry interval: must be >= 1 ms"));
    }
    if cfg.sync.request_interval_ms == 0 {
        return Err(anyhow!("invalid request interval: must be >= 1 ms"));
    }
    if cfg.sync.history_chunk_size == 0 {
        return Err(anyhow!("invalid history chunk size: must be >= 1"));
    }
    if cfg.sync.story_chunk_size == 0 {
        return Err(anyhow!("invalid story chunk size: must be >= 1"));
    }
    if cfg.sync.out_dir.as_os_str().is_empty() {
        return Err(anyhow!("invalid out dir: cannot be empty"));
    }
    if let Some(rule) = cfg.filters.history_limit.iter().find(|rule| rule.limit <= 0) {
        return Err(anyhow!(
            "invalid history limit {}: must be >= 1",
            rule.limit
        ));
    }
    Ok(())
}

pub fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(custom) = env::var("ARCHIVIST_CONFIG_PATH") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }

    let home = dirs::home_dir()?;
    Some(home.join(".history-archivist").join("config.toml"))
}

fn merge_config_str(base: &mut ArchivistConfig, raw: &str, path: &Path) -> Result<()> {
    let parsed: PartialArchivistConfig = toml::from_str(raw)
        .map_err(|err| anyhow!("failed to parse archivist config {}: {err}", path.display()))?;
    if let Some(remote) = parsed.remote {
        base.remote = remote;
    }
    if let Some(sync) = parsed.sync {
        base.sync = sync;
    }
    if let Some(filters) = parsed.filters {
        base.filters = filters;
    }
    Ok(())
}

fn merge_file_config(base: &mut ArchivistConfig) -> Result<()> {
    let Some(path) = resolve_config_path() else {
        return Ok(());
    };
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(&path)?;
    merge_config_str(base, &raw, &path)
}

fn apply_env_overrides(cfg: &mut ArchivistConfig) {
    cfg.remote.gateway_url = env_or_string("ARCHIVIST_GATEWAY_URL", &cfg.remote.gateway_url);
    if let Some(token) = env_string("ARCHIVIST_API_TOKEN") {
        cfg.remote.api_token = Some(token);
    }
    cfg.remote.request_timeout_secs = env_or_u64(
        "ARCHIVIST_REQUEST_TIMEOUT_SECS",
        cfg.remote.request_timeout_secs,
    );
    cfg.remote.download_timeout_secs = env_or_u64(
        "ARCHIVIST_DOWNLOAD_TIMEOUT_SECS",
        cfg.remote.download_timeout_secs,
    );
    cfg.remote.retry_attempts = env_or_u32("ARCHIVIST_RETRY_ATTEMPTS", cfg.remote.retry_attempts);
    cfg.remote.retry_interval_ms =
        env_or_u64("ARCHIVIST_RETRY_INTERVAL_MS", cfg.remote.retry_interval_ms);

    if let Some(out_dir) = env_string("ARCHIVIST_OUT_DIR") {
        cfg.sync.out_dir = PathBuf::from(out_dir);
    }
    cfg.sync.request_interval_ms =
        env_or_u64("ARCHIVIST_REQUEST_INTERVAL_MS", cfg.sync.request_interval_ms);
    cfg.sync.history_chunk_size =
        env_or_usize("ARCHIVIST_HISTORY_CHUNK_SIZE", cfg.sync.history_chunk_size);
    cfg.sync.story_chunk_size =
        env_or_usize("ARCHIVIST_STORY_CHUNK_SIZE", cfg.sync.story_chunk_size);
    cfg.sync.dump_account = env_or_bool("ARCHIVIST_DUMP_ACCOUNT", cfg.sync.dump_account);
    cfg.sync.dump_contacts = env_or_bool("ARCHIVIST_DUMP_CONTACTS", cfg.sync.dump_contacts);
    cfg.sync.dump_sessions = env_or_bool("ARCHIVIST_DUMP_SESSIONS", cfg.sync.dump_sessions);
    cfg.sync.skip_stories = env_or_bool("ARCHIVIST_SKIP_STORIES", cfg.sync.skip_stories);
    if let Some(layer) = env_string("ARCHIVIST_SCHEMA_LAYER").and_then(|v| v.parse::<u32>().ok()) {
        cfg.sync.schema_layer = Some(layer);
    }
}

pub fn load_config() -> Result<ArchivistConfig> {
    let mut cfg = ArchivistConfig::default();
    merge_file_config(&mut cfg)?;
    apply_env_overrides(&mut cfg);
    validate(&cfg)?;
    Ok(cfg)
}

impl ArchivistConfig {
    /// Restrict history and stories to entities titled `title`.
    pub fn select_title(&mut self, title: &str) {
        self.filters.history = FilterSpec::Attrs(AttrsFilter::title(title));
        self.filters.stories = FilterSpec::Attrs(AttrsFilter::title(title));
    }

    pub fn validate(&self) -> Result<()> {
        validate(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archivist::filter::MatchResult;
    use crate::archivist::filter::EntityFilter;
    use crate::remote::test_support::{channel_entity, user_entity};

    fn parse(raw: &str) -> Result<ArchivistConfig> {
        let mut cfg = ArchivistConfig::default();
        merge_config_str(&mut cfg, raw, Path::new("test.toml"))?;
        validate(&cfg)?;
        Ok(cfg)
    }

    #[test]
    fn defaults_archive_users_only() {
        let cfg = ArchivistConfig::default();
        validate(&cfg).expect("defaults are valid");
        assert!(cfg.filters.history.is_true(&user_entity(1, "a"), None));
        assert!(!cfg.filters.history.is_true(&channel_entity(2, "c"), None));
        assert_eq!(
            cfg.filters.media.matches(&user_entity(1, "a"), None),
            MatchResult::False
        );
        assert_eq!(cfg.sync.history_chunk_size, 100);
        assert_eq!(cfg.sync.story_chunk_size, 50);
        assert_eq!(cfg.sync.out_dir, PathBuf::from("history"));
        assert!(!cfg.sync.dump_account);
        assert!(!cfg.sync.dump_contacts);
        assert!(!cfg.sync.dump_sessions);
        assert_eq!(cfg.sync.schema_layer, None);
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let cfg = parse(
            r#"
            [sync]
            out_dir = "/srv/history"
            dump_sessions = true
            schema_layer = 133

            [filters]
            history = "all"
            media = [{type = "user", media_max_size = "5M"}]
            history_limit = [{limit = 200, filter = {type = "channel"}}]
            "#,
        )
        .expect("config");
        assert_eq!(cfg.sync.out_dir, PathBuf::from("/srv/history"));
        assert!(cfg.sync.dump_sessions);
        assert!(!cfg.sync.dump_contacts);
        assert_eq!(cfg.sync.schema_layer, Some(133));
        assert_eq!(cfg.sync.request_interval_ms, 1_000);
        assert_eq!(cfg.remote.retry_attempts, 5);
        assert!(cfg.filters.history.is_true(&channel_entity(1, "c"), None));
        assert_eq!(cfg.filters.history_limit[0].limit, 200);
        assert_eq!(cfg.filters.stories, FilterSpec::none());
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(parse("[remote]\nretry_attempts = 0\n").is_err());
        assert!(parse("[sync]\nhistory_chunk_size = 0\n").is_err());
        assert!(parse("[filters]\nhistory_limit = [{limit = 0, filter = \"all\"}]\n").is_err());
        assert!(parse("[filters]\nhistory = \"some\"\n").is_err());
        assert!(parse("not toml").is_err());
    }

    #[test]
    fn title_selection_replaces_history_and_stories() {
        let mut cfg = ArchivistConfig::default();
        cfg.select_title("News");
        assert!(cfg.filters.history.is_true(&channel_entity(3, "News"), None));
        assert!(cfg.filters.stories.is_true(&channel_entity(3, "News"), None));
        assert!(!cfg.filters.history.is_true(&user_entity(4, "Other"), None));
    }
}
