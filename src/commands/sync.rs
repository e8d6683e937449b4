use anyhow::Result;
use std::path::PathBuf;

use crate::archivist::paths::resolve_paths;
use crate::archivist::run::run_sync;
use crate::commands::{CommandReport, config_with_out_dir};
use crate::remote::gateway::GatewayClient;

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub chat: Option<String>,
    pub out_dir: Option<PathBuf>,
    pub skip_stories: bool,
    pub dump_account: Option<bool>,
    pub dump_contacts: Option<bool>,
    pub dump_sessions: Option<bool>,
}

pub fn run(opts: &SyncOptions) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut cfg = config_with_out_dir(opts.out_dir.as_deref())?;
    if let Some(title) = &opts.chat {
        cfg.select_title(title);
    }
    cfg.sync.skip_stories |= opts.skip_stories;
    if let Some(v) = opts.dump_account {
        cfg.sync.dump_account = v;
    }
    if let Some(v) = opts.dump_contacts {
        cfg.sync.dump_contacts = v;
    }
    if let Some(v) = opts.dump_sessions {
        cfg.sync.dump_sessions = v;
    }

    let mut report = CommandReport::new("sync");
    report.detail(format!("out_dir={}", cfg.sync.out_dir.display()));
    report.detail(format!("gateway_url={}", cfg.remote.gateway_url));

    let remote = GatewayClient::new(&cfg.remote)?;
    let summary = run_sync(&remote, &cfg, &paths)?;

    report.detail(format!("self_id={}", summary.self_id));
    report.detail(format!("entities_seen={}", summary.entities_seen));
    for warning in &summary.warnings {
        report.detail(format!("warning: {warning}"));
    }
    for entity in &summary.synced {
        let mut line = format!("entity={} kind={} title={}", entity.id, entity.kind, entity.title);
        if let Some(history) = &entity.history {
            line.push_str(&format!(
                " messages={} last_id={} stop={}",
                history.records,
                history.last_id,
                history.stop.as_str()
            ));
        }
        if let Some(stories) = &entity.stories {
            line.push_str(&format!(
                " stories={} story_source={}",
                stories.records, stories.source
            ));
        }
        report.detail(line);
    }
    let downloads = summary.downloads;
    report.detail(format!(
        "files downloaded={} existing={} filtered={} broken={}",
        downloads.downloaded, downloads.skipped_existing, downloads.skipped_filtered, downloads.broken
    ));
    if downloads.broken > 0 {
        report.detail("some attachments have broken remote locations; see log");
    }

    Ok(report)
}
