use anyhow::Result;
use std::env;
use std::path::PathBuf;

use crate::archivist::audit::AuditLog;
use crate::archivist::config::resolve_config_path;
use crate::archivist::lock::StoreLock;
use crate::archivist::paths::resolve_paths;
use crate::commands::{CommandReport, config_with_out_dir};
use crate::env_loader::dotenv_files;
use crate::error::ArchiveError;

include!(concat!(env!("OUT_DIR"), "/archivist_env_allowlist.rs"));

#[derive(Debug, Clone, Default)]
pub struct StatusOptions {
    pub out_dir: Option<PathBuf>,
}

/// `ARCHIVIST_*` variables in the environment that nothing reads.
fn unknown_env_keys(keys: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut unknown: Vec<String> = keys
        .into_iter()
        .filter(|key| key.starts_with("ARCHIVIST_"))
        .filter(|key| !GENERATED_ENV_ALLOWLIST.contains(&key.as_str()))
        .collect();
    unknown.sort();
    unknown
}

pub fn run(opts: &StatusOptions) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut report = CommandReport::new("status");

    report.detail(format!("archivist_home={}", paths.archivist_home.display()));
    report.detail(format!("logs_dir={}", paths.logs_dir.display()));
    match AuditLog::new(&paths).latest() {
        Ok(Some(entry)) => report.detail(format!(
            "last_walk={} {} entity={} ({}) status={}",
            entry.at.to_rfc3339(),
            entry.walk.as_str(),
            entry.entity_id,
            entry.entity_title,
            entry.status.as_str()
        )),
        Ok(None) => report.detail("last_walk=<none>"),
        Err(err) => report.issue(format!("audit log unreadable: {err:#}")),
    }
    match resolve_config_path() {
        Some(path) => report.detail(format!(
            "config_path={} exists={}",
            path.display(),
            path.is_file()
        )),
        None => report.detail("config_path=<none>"),
    }
    for path in dotenv_files() {
        report.detail(format!("dotenv={}", path.display()));
    }

    let cfg = match config_with_out_dir(opts.out_dir.as_deref()) {
        Ok(cfg) => cfg,
        Err(err) => {
            report.issue(format!("invalid config: {err:#}"));
            return Ok(report);
        }
    };
    let out_dir = &cfg.sync.out_dir;
    report.detail(format!("out_dir={}", out_dir.display()));
    report.detail(format!("gateway_url={}", cfg.remote.gateway_url));
    report.detail(format!(
        "api_token={}",
        if cfg.remote.api_token.is_some() { "set" } else { "unset" }
    ));

    if out_dir.is_dir() {
        let lock_path = out_dir.join(".archivist.lock");
        match StoreLock::acquire(&lock_path) {
            Ok(_lock) => report.detail("store_lock=free"),
            Err(err) if matches!(err.downcast_ref::<ArchiveError>(), Some(ArchiveError::StoreLocked(_))) => {
                report.detail("store_lock=held (sync in progress)")
            }
            Err(err) => report.issue(format!("store lock check failed: {err:#}")),
        }
    } else {
        report.detail("out_dir does not exist yet; the first sync creates it");
    }

    for key in unknown_env_keys(env::vars().map(|(key, _)| key)) {
        report.issue(format!("unrecognised environment variable {key}"));
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::{GENERATED_ENV_ALLOWLIST, unknown_env_keys};

    #[test]
    fn only_unread_archivist_keys_are_reported() {
        // Built at runtime so the allowlist scan never sees it.
        let typo = format!("ARCHIVIST_{}", "OUTDIR");
        let keys = vec![
            "ARCHIVIST_OUT_DIR".to_string(),
            typo.clone(),
            "PATH".to_string(),
        ];
        assert_eq!(unknown_env_keys(keys), vec![typo]);
    }

    #[test]
    fn allowlist_holds_every_literal_key_and_nothing_partial() {
        // Built at runtime so only the reading code can put them in the list.
        for suffix in ["LOG", "HOME", "SCHEMA_LAYER", "DUMP_SESSIONS"] {
            let key = format!("ARCHIVIST_{suffix}");
            assert!(GENERATED_ENV_ALLOWLIST.contains(&key.as_str()), "{key} missing");
        }
        assert!(GENERATED_ENV_ALLOWLIST
            .iter()
            .all(|key| key.len() > "ARCHIVIST_".len() && !key.ends_with('_') && !key.contains('{')));
    }
}
