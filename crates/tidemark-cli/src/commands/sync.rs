use std::path::Path;

use chrono::Utc;
use tidemark_core::orchestrator::StateMap;
use tidemark_core::SyncDomain;

use crate::commands::common::{build_orchestrator, domain_items, format_domain_lines, open_client};
use crate::error::CliError;

pub async fn run_sync(
    force: bool,
    domain: Option<&str>,
    as_json: bool,
    db_path: &Path,
    records_dir: &Path,
) -> Result<(), CliError> {
    let client = open_client(db_path).await?;
    let orchestrator = build_orchestrator(&client, records_dir)?;
    orchestrator.seed_from_cache().await;

    let states = if let Some(name) = domain {
        let domain = name
            .parse::<SyncDomain>()
            .map_err(CliError::UnknownDomain)?;
        let state = orchestrator
            .sync(domain)
            .await
            .ok_or_else(|| CliError::DomainNotConfigured(domain.to_string()))?;
        StateMap::from([(domain, state)])
    } else {
        match orchestrator.sync_all(force).await {
            Some(handle) => {
                if let Err(error) = handle.await {
                    tracing::warn!(%error, "Sync run did not finish");
                }
            }
            None => println!("Sync skipped (ran moments ago; use --force)"),
        }
        orchestrator.snapshot()
    };
    orchestrator.shutdown();

    if as_json {
        println!("{}", serde_json::to_string_pretty(&domain_items(&states))?);
    } else {
        for line in format_domain_lines(&states, Utc::now()) {
            println!("{line}");
        }
    }
    Ok(())
}
