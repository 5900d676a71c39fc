use std::path::Path;

use tidemark_core::util::normalize_text_option;
use tidemark_core::{MutationKind, Priority};

use crate::cli::LogCommands;
use crate::commands::common::{format_submit_outcome, open_client};
use crate::error::CliError;

pub async fn run_log(entry: LogCommands, priority: Priority, db_path: &Path) -> Result<(), CliError> {
    let kind = build_mutation(entry)?;
    let description = kind.describe();

    let client = open_client(db_path).await?;
    let outcome = client.queue.submit(kind, priority).await?;
    println!("{}", format_submit_outcome(&description, &outcome));
    Ok(())
}

pub fn build_mutation(entry: LogCommands) -> Result<MutationKind, CliError> {
    let kind = match entry {
        LogCommands::Water { ml } => MutationKind::Water { amount_ml: ml },
        LogCommands::Food { text } => MutationKind::Food {
            text: join_text(&text)?,
        },
        LogCommands::Weight { kg } => MutationKind::Weight { kg },
        LogCommands::Mood { value, energy } => MutationKind::Mood { value, energy },
        LogCommands::Note { text } => MutationKind::Universal {
            text: join_text(&text)?,
        },
        LogCommands::Expense { text } => MutationKind::Expense {
            text: join_text(&text)?,
            client_id: MutationKind::new_client_id(),
        },
        LogCommands::Transaction {
            merchant,
            amount,
            category,
        } => MutationKind::Transaction {
            merchant: required(merchant)?,
            amount,
            category: normalize_text_option(category),
            client_id: MutationKind::new_client_id(),
        },
        LogCommands::Income {
            source,
            amount,
            category,
        } => MutationKind::Income {
            source: required(source)?,
            amount,
            category: required(category)?,
            client_id: MutationKind::new_client_id(),
        },
    };
    Ok(kind)
}

fn join_text(parts: &[String]) -> Result<String, CliError> {
    required(parts.join(" "))
}

fn required(text: String) -> Result<String, CliError> {
    normalize_text_option(Some(text)).ok_or(CliError::EmptyText)
}
