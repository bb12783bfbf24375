//! Identity commands - create keys and print the public key.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Args;

use enclave::KeyStore;

use super::{CommandExecutor, GlobalArgs};

/// Create (or load) the identity for --user.
///
/// Generates an RSA-2048 key pair on first use and stores it in
/// <data-dir>/<user>_keys.json. Running it again loads the same keys.
#[derive(Args, Debug)]
pub struct InitCommand;

#[async_trait]
impl CommandExecutor for InitCommand {
    async fn execute(&self, global: &GlobalArgs) -> Result<()> {
        let config = global.load_config()?;
        let username = global.username()?;
        let store = KeyStore::new(&config.data_dir);
        let existed = store.exists(username);

        let messenger = global.open_messenger(&config)?;

        if existed {
            println!("Loaded existing identity '{}'.", username);
        } else {
            println!("Created identity '{}'.", username);
        }
        println!();
        println!("  Key file:    {}", store.key_path(username).display());
        println!("  Database:    {}", config.database_path(username).display());
        println!("  Fingerprint: {}", messenger.identity().fingerprint());
        Ok(())
    }
}

/// Print the public key (SPKI PEM) of --user.
#[derive(Args, Debug)]
pub struct PublicKeyCommand {
    /// Print only the fingerprint
    #[arg(long)]
    pub fingerprint: bool,
}

#[async_trait]
impl CommandExecutor for PublicKeyCommand {
    async fn execute(&self, global: &GlobalArgs) -> Result<()> {
        let config = global.load_config()?;
        let messenger = global
            .open_messenger(&config)
            .context("Failed to load identity")?;

        if self.fingerprint {
            println!("{}", messenger.identity().fingerprint());
        } else {
            print!("{}", messenger.public_key_pem());
        }
        Ok(())
    }
}
