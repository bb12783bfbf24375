//! Command module - Strategy pattern for CLI commands.
//!
//! Each command is a separate module implementing the `CommandExecutor` trait.

mod contacts;
mod discover;
mod history;
mod identity;
mod send;
mod serve;

pub use contacts::{AddContactCommand, ContactsCommand, TrustCommand};
pub use discover::DiscoverCommand;
pub use history::{HistoryCommand, StatsCommand};
pub use identity::{InitCommand, PublicKeyCommand};
pub use send::SendCommand;
pub use serve::ServeCommand;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Args;

use enclave::{Messenger, MessengerConfig};

/// Options shared by every command.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Local username (identity)
    #[arg(short, long, global = true)]
    pub user: Option<String>,

    /// Directory holding keys and databases (overrides the config file)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Path to config file (default: ~/.enclave/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

impl GlobalArgs {
    /// Loads the config file and applies command-line overrides.
    pub fn load_config(&self) -> Result<MessengerConfig> {
        let path = self
            .config
            .clone()
            .unwrap_or_else(MessengerConfig::default_path);
        let mut config = MessengerConfig::load_or_default(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        if let Some(ref data_dir) = self.data_dir {
            config.data_dir = data_dir.clone();
        }
        Ok(config)
    }

    pub fn username(&self) -> Result<&str> {
        self.user
            .as_deref()
            .context("No username given. Use --user <name>.")
    }

    /// Opens the messenger for the selected user.
    pub fn open_messenger(&self, config: &MessengerConfig) -> Result<Arc<Messenger>> {
        let username = self.username()?;
        let messenger = Messenger::open(config, username)
            .with_context(|| format!("Failed to open messenger for '{}'", username))?;
        Ok(Arc::new(messenger))
    }
}

/// Trait for command execution - Strategy pattern.
///
/// Each command struct holds its parsed arguments and implements
/// this trait to define its execution logic.
#[async_trait]
pub trait CommandExecutor {
    /// Executes the command with its parsed arguments.
    async fn execute(&self, global: &GlobalArgs) -> Result<()>;
}

/// Formats Unix seconds as local-agnostic `HH:MM:SS` UTC.
pub fn format_time(timestamp: f64) -> String {
    let secs = timestamp.max(0.0) as u64 % 86_400;
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}
