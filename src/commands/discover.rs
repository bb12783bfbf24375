//! Discover command - find peers on the local network.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Args;

use enclave::protocol::{broadcast_target, discover_peers};

use super::{CommandExecutor, GlobalArgs};

/// Broadcast a discovery probe and list the peers that answer.
#[derive(Args, Debug)]
pub struct DiscoverCommand {
    /// Seconds to wait for answers (default from config)
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Probe this address instead of the LAN broadcast address
    #[arg(long)]
    pub target: Option<SocketAddr>,
}

#[async_trait]
impl CommandExecutor for DiscoverCommand {
    async fn execute(&self, global: &GlobalArgs) -> Result<()> {
        let config = global.load_config()?;
        let username = global.username()?;
        let wait = self
            .timeout
            .map(Duration::from_secs)
            .unwrap_or_else(|| config.discovery_timeout());
        let target = self
            .target
            .unwrap_or_else(|| broadcast_target(config.discovery_port));

        println!("Searching for peers ({}s)...", wait.as_secs());
        let peers = discover_peers(username, target, wait)
            .await
            .context("Discovery failed")?;

        if peers.is_empty() {
            println!("No peers found.");
            return Ok(());
        }

        println!("Found {} peer(s):", peers.len());
        for peer in peers {
            println!("  {:<16} {}", peer.username, peer.addr);
        }
        Ok(())
    }
}
