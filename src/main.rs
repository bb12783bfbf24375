//! Enclave - peer-to-peer encrypted messaging
//!
//! A CLI over the Enclave messaging core: manage your identity and contacts,
//! find peers on the LAN, and exchange hybrid-encrypted messages.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    AddContactCommand, CommandExecutor, ContactsCommand, DiscoverCommand, GlobalArgs,
    HistoryCommand, InitCommand, PublicKeyCommand, SendCommand, ServeCommand, StatsCommand,
    TrustCommand,
};

/// Enclave - peer-to-peer encrypted messaging
///
/// Every message is sealed with a fresh AES-256-GCM key, which is wrapped
/// with the recipient's RSA public key. No server involved.
#[derive(Parser)]
#[command(name = "enclave")]
#[command(version)]
#[command(about = "Peer-to-peer encrypted messaging with hybrid RSA-OAEP + AES-GCM envelopes")]
#[command(long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or load the identity for --user
    Init(InitCommand),

    /// Print the public key of --user
    PublicKey(PublicKeyCommand),

    /// List or show contacts
    Contacts(ContactsCommand),

    /// Add a contact from a PEM public key file
    AddContact(AddContactCommand),

    /// Set a contact's trust level
    Trust(TrustCommand),

    /// Show the conversation with a contact
    History(HistoryCommand),

    /// Show message statistics
    Stats(StatsCommand),

    /// Find peers on the local network
    Discover(DiscoverCommand),

    /// Accept connections and print incoming messages
    Serve(ServeCommand),

    /// Send one message to a listening peer
    Send(SendCommand),
}

impl Commands {
    fn executor(&self) -> &(dyn CommandExecutor + Sync) {
        match self {
            Self::Init(cmd) => cmd,
            Self::PublicKey(cmd) => cmd,
            Self::Contacts(cmd) => cmd,
            Self::AddContact(cmd) => cmd,
            Self::Trust(cmd) => cmd,
            Self::History(cmd) => cmd,
            Self::Stats(cmd) => cmd,
            Self::Discover(cmd) => cmd,
            Self::Serve(cmd) => cmd,
            Self::Send(cmd) => cmd,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    cli.command.executor().execute(&cli.global).await
}
