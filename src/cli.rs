use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

use crate::commands::{self, CommandReport};
use crate::logging;

#[derive(Parser)]
#[command(name = "archivist")]
#[command(about = "Archive a messaging account's history into resumable JSON-lines logs", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Show debug log messages
    #[arg(long, global = true)]
    debug: bool,

    /// Print the command report as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch new messages, stories and attachments into the archive
    Sync {
        /// Only archive chats with this title
        #[arg(long)]
        chat: Option<String>,
        /// Archive directory, overrides sync.out_dir
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        skip_stories: bool,
        #[arg(long, action = ArgAction::Set)]
        dump_account: Option<bool>,
        #[arg(long, action = ArgAction::Set)]
        dump_contacts: Option<bool>,
        #[arg(long, action = ArgAction::Set)]
        dump_sessions: Option<bool>,
    },
    /// List remote chats and which of them the history filter selects
    #[command(name = "list-chats")]
    ListChats {
        #[arg(long)]
        chat: Option<String>,
    },
    /// List chats present in the archive
    Saved {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Print a window of archived messages of one chat
    Read {
        /// Chat ID
        #[arg(allow_negative_numbers = true)]
        id: i64,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// List downloaded attachments of one chat
    Files {
        /// Chat ID
        #[arg(allow_negative_numbers = true)]
        id: i64,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Show resolved paths, config and store lock state
    Status {
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn render(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!(
        "{}: {}",
        report.command,
        if report.ok { "ok" } else { "failed" }
    );
    for line in &report.details {
        println!("  {line}");
    }
    for issue in &report.issues {
        println!("  issue: {issue}");
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.debug);

    let report = match cli.command {
        Command::Sync {
            chat,
            out,
            skip_stories,
            dump_account,
            dump_contacts,
            dump_sessions,
        } => commands::sync::run(&commands::sync::SyncOptions {
            chat,
            out_dir: out,
            skip_stories,
            dump_account,
            dump_contacts,
            dump_sessions,
        })?,
        Command::ListChats { chat } => {
            commands::list_chats::run(&commands::list_chats::ListChatsOptions { chat })?
        }
        Command::Saved { out } => {
            commands::saved::run(&commands::saved::SavedOptions { out_dir: out })?
        }
        Command::Read {
            id,
            offset,
            limit,
            out,
        } => commands::read::run(&commands::read::ReadOptions {
            entity_id: id,
            offset,
            limit,
            out_dir: out,
        })?,
        Command::Files { id, out } => commands::files::run(&commands::files::FilesOptions {
            entity_id: id,
            out_dir: out,
        })?,
        Command::Status { out } => {
            commands::status::run(&commands::status::StatusOptions { out_dir: out })?
        }
    };

    render(&report, cli.json)?;
    if !report.ok {
        anyhow::bail!("{} reported {} issue(s)", report.command, report.issues.len());
    }
    Ok(())
}
