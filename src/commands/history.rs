//! Conversation commands - history and statistics.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Args;

use enclave::conversation::message_digest;

use super::{format_time, CommandExecutor, GlobalArgs};

/// Show the conversation with a contact.
#[derive(Args, Debug)]
pub struct HistoryCommand {
    /// Contact username
    pub contact: String,

    /// Number of messages to show (default from config)
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,

    /// Also print the SHA-256 digest of each message
    #[arg(long)]
    pub digests: bool,
}

#[async_trait]
impl CommandExecutor for HistoryCommand {
    async fn execute(&self, global: &GlobalArgs) -> Result<()> {
        let config = global.load_config()?;
        let messenger = global.open_messenger(&config)?;
        let limit = self.limit.unwrap_or(config.history_limit);

        let messages = messenger
            .history(&self.contact, limit)
            .context("Failed to load history")?;

        if messages.is_empty() {
            println!("No messages with {}.", self.contact);
            return Ok(());
        }

        for message in messages {
            let who = if message.sender == messenger.username() {
                "You"
            } else {
                message.sender.as_str()
            };
            println!("[{}] {}: {}", format_time(message.timestamp), who, message.content);
            if self.digests {
                println!("           sha256 {}", message_digest(&message.content));
            }
        }
        Ok(())
    }
}

/// Show message statistics.
#[derive(Args, Debug)]
pub struct StatsCommand;

#[async_trait]
impl CommandExecutor for StatsCommand {
    async fn execute(&self, global: &GlobalArgs) -> Result<()> {
        let config = global.load_config()?;
        let messenger = global.open_messenger(&config)?;
        let stats = messenger.stats().context("Failed to compute statistics")?;
        let contacts = messenger.contacts().len()?;

        println!("Statistics for {}:", messenger.username());
        println!("  Total messages:  {}", stats.total);
        println!("  Sent:            {}", stats.sent);
        println!("  Received:        {}", stats.received);
        println!("  Correspondents:  {}", stats.unique_contacts);
        println!("  Known contacts:  {}", contacts);
        Ok(())
    }
}
