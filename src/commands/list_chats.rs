use anyhow::Result;

use crate::archivist::config::load_config;
use crate::archivist::run::list_chats;
use crate::commands::CommandReport;
use crate::remote::gateway::GatewayClient;

#[derive(Debug, Clone, Default)]
pub struct ListChatsOptions {
    pub chat: Option<String>,
}

pub fn run(opts: &ListChatsOptions) -> Result<CommandReport> {
    let mut cfg = load_config()?;
    if let Some(title) = &opts.chat {
        cfg.select_title(title);
    }
    let remote = GatewayClient::new(&cfg.remote)?;
    let (rows, warnings) = list_chats(&remote, &cfg)?;

    let mut report = CommandReport::new("list-chats");
    report.detail("  type     chat ID    limit  title (username)");
    for row in rows {
        let limit = if row.limit == 0 {
            " ".repeat(7)
        } else {
            format!("{:>7}", row.limit)
        };
        let mark = if row.selected { '*' } else { ' ' };
        report.detail(format!(
            "{mark} {:<7} {:>10} {limit}  {} ({})",
            row.kind.to_string(),
            row.id,
            row.title,
            row.username
        ));
    }
    for warning in warnings {
        report.detail(format!("warning: {warning}"));
    }
    Ok(report)
}
