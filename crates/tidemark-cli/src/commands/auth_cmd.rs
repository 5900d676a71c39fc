use tidemark_core::util::normalize_text_option;

use crate::auth::{CliCredentials, KeySource, KeyStore};
use crate::cli::AuthCommands;
use crate::error::CliError;

pub fn run_auth(command: AuthCommands) -> Result<(), CliError> {
    let store = KeyStore::default();
    match command {
        AuthCommands::SetKey { key } => {
            let key = normalize_text_option(Some(key)).ok_or(CliError::EmptyText)?;
            store.save(&key)?;
            println!("API key saved to keychain");
        }
        AuthCommands::Status => {
            let credentials = CliCredentials::new(std::env::var("TIDEMARK_API_KEY").ok(), store);
            println!("{}", describe_key_status(credentials.resolve().map(|(_, source)| source)));
        }
        AuthCommands::Clear => {
            store.clear()?;
            println!("API key removed from keychain");
        }
    }
    Ok(())
}

pub const fn describe_key_status(source: Option<KeySource>) -> &'static str {
    match source {
        Some(KeySource::Environment) => "API key set (from TIDEMARK_API_KEY)",
        Some(KeySource::Keychain) => "API key set (from keychain)",
        None => "No API key configured. Run `tidemark auth set-key <key>`.",
    }
}
