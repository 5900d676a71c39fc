use std::path::Path;

use chrono::Utc;
use tidemark_core::models::MutationId;
use tidemark_core::queue::{DrainReport, DrainSkip};

use crate::cli::QueueCommands;
use crate::commands::common::{
    failed_to_item, format_failed_lines, format_queue_lines, open_client, queued_to_item,
    QueueItem,
};
use crate::error::CliError;

pub async fn run_queue(command: QueueCommands, db_path: &Path) -> Result<(), CliError> {
    let client = open_client(db_path).await?;
    let queue = &client.queue;

    match command {
        QueueCommands::Status => {
            let pending = queue.pending_count().await?;
            let failed = queue.failed_count().await?;
            println!("{pending} pending, {failed} failed");
        }
        QueueCommands::List { json } => {
            let items = queue.pending_items().await?;
            if json {
                let json_items = items.iter().map(queued_to_item).collect::<Vec<QueueItem>>();
                println!("{}", serde_json::to_string_pretty(&json_items)?);
            } else if items.is_empty() {
                println!("Queue is empty.");
            } else {
                for line in format_queue_lines(&items, Utc::now()) {
                    println!("{line}");
                }
            }
        }
        QueueCommands::Drain => {
            let report = queue.process_queue().await?;
            println!("{}", format_drain_report(&report));
        }
        QueueCommands::Failed { json } => {
            let items = queue.failed_items().await?;
            if json {
                let json_items = items.iter().map(failed_to_item).collect::<Vec<QueueItem>>();
                println!("{}", serde_json::to_string_pretty(&json_items)?);
            } else if items.is_empty() {
                println!("No failed entries.");
            } else {
                for line in format_failed_lines(&items, Utc::now()) {
                    println!("{line}");
                }
            }
        }
        QueueCommands::Retry { id } => {
            let mutation_id = parse_mutation_id(&id)?;
            if !queue.retry_failed_item(mutation_id).await? {
                return Err(CliError::EntryNotFound(id));
            }
            println!("{mutation_id}");
        }
        QueueCommands::Discard { id } => {
            let mutation_id = parse_mutation_id(&id)?;
            let removed = queue.discard_failed_item(mutation_id).await?
                || queue.discard_queued(mutation_id).await?;
            if !removed {
                return Err(CliError::EntryNotFound(id));
            }
            println!("{mutation_id}");
        }
        QueueCommands::ClearFailed => {
            let cleared = queue.clear_failed_items().await?;
            println!("Cleared {cleared} failed entries");
        }
    }

    Ok(())
}

pub fn parse_mutation_id(raw: &str) -> Result<MutationId, CliError> {
    raw.trim()
        .parse::<MutationId>()
        .map_err(|_| CliError::InvalidId(raw.to_string()))
}

pub fn format_drain_report(report: &DrainReport) -> String {
    match report.skipped {
        Some(DrainSkip::Empty) => return "Queue is empty.".to_string(),
        Some(DrainSkip::MissingApiKey) => {
            return "Skipped: no API key configured (run `tidemark auth set-key`).".to_string();
        }
        Some(DrainSkip::AlreadyRunning) => return "Skipped: a drain is already running.".to_string(),
        None => {}
    }

    let mut summary = format!(
        "{} delivered, {} already logged, {} will retry, {} failed, {} remaining",
        report.delivered, report.conflicts_resolved, report.retried, report.failed, report.remaining
    );
    if report.rate_limited {
        summary.push_str(" (stopped: rate limited)");
    }
    if report.auth_failed {
        summary.push_str(" (stopped: API key rejected)");
    }
    summary
}
