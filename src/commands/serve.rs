//! Serve command - accept peers and print incoming messages.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Args;
use tracing::warn;

use enclave::protocol::DiscoveryResponder;
use enclave::{Node, NodeEvent};

use super::{format_time, CommandExecutor, GlobalArgs};

/// Listen for peers, answer discovery probes, and print messages until Ctrl-C.
#[derive(Args, Debug)]
pub struct ServeCommand {
    /// TCP port to listen on (default from config)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Don't answer discovery probes
    #[arg(long)]
    pub no_discovery: bool,
}

#[async_trait]
impl CommandExecutor for ServeCommand {
    async fn execute(&self, global: &GlobalArgs) -> Result<()> {
        let mut config = global.load_config()?;
        if let Some(port) = self.port {
            config.listen_port = port;
        }
        let messenger = global.open_messenger(&config)?;
        let username = messenger.username().to_string();

        let (node, mut events) = Node::new(messenger, config.max_frame_len);
        let local_addr = node
            .listen((config.listen_addr.as_str(), config.listen_port))
            .await
            .context("Failed to start listener")?;

        let responder = if self.no_discovery {
            None
        } else {
            let bind_addr: SocketAddr = format!("{}:{}", config.listen_addr, config.discovery_port)
                .parse()
                .context("Invalid discovery bind address")?;
            match DiscoveryResponder::bind(bind_addr, username.clone(), local_addr.port()).await {
                Ok(responder) => Some(tokio::spawn(responder.run())),
                Err(e) => {
                    warn!(error = %e, "discovery disabled");
                    None
                }
            }
        };

        println!("{} listening on {}. Press Ctrl-C to stop.", username, local_addr);

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                event = events.recv() => {
                    let Some(event) = event else { break };
                    print_event(&event);
                }
            }
        }

        if let Some(task) = responder {
            task.abort();
        }
        node.shutdown().await?;
        println!("Stopped.");
        Ok(())
    }
}

fn print_event(event: &NodeEvent) {
    match event {
        NodeEvent::Connected { peer } => println!("New connection: {}", peer),
        NodeEvent::KeyExchanged { peer, username } => {
            println!("Exchanged keys with {} ({})", username, peer)
        }
        NodeEvent::MessageReceived { message, .. } => println!(
            "[{}] {}: {}",
            format_time(message.timestamp),
            message.sender,
            message.plaintext
        ),
        NodeEvent::MessageRejected { peer, error } => {
            println!("Rejected message from {}: {}", peer, error)
        }
        NodeEvent::Disconnected { peer } => println!("{} disconnected", peer),
    }
}
