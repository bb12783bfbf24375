//! Send command - deliver one message to a listening peer.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::Args;

use enclave::transport::{PeerTransport, TcpConnection};
use enclave::PeerMessage;

use super::{CommandExecutor, GlobalArgs};

/// How long to wait for the peer's key exchange reply.
const KEY_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connect to a peer, exchange keys, and send one encrypted message.
#[derive(Args, Debug)]
pub struct SendCommand {
    /// Peer address (host:port)
    #[arg(long)]
    pub to: String,

    /// Recipient username
    pub recipient: String,

    /// Message text
    pub message: String,
}

#[async_trait]
impl CommandExecutor for SendCommand {
    async fn execute(&self, global: &GlobalArgs) -> Result<()> {
        let config = global.load_config()?;
        let messenger = global.open_messenger(&config)?;

        let mut conn = TcpConnection::connect(self.to.as_str(), config.max_frame_len)
            .await
            .with_context(|| format!("Failed to connect to {}", self.to))?;

        conn.send(&messenger.key_exchange_message()).await?;

        let reply = tokio::time::timeout(KEY_EXCHANGE_TIMEOUT, conn.receive())
            .await
            .context("Timed out waiting for key exchange")??;
        match reply {
            Some(PeerMessage::KeyExchange {
                username,
                public_key,
            }) => {
                if username != self.recipient {
                    bail!(
                        "Peer at {} is '{}', not '{}'",
                        self.to,
                        username,
                        self.recipient
                    );
                }
                messenger
                    .add_contact(&username, &public_key)
                    .context("Peer sent an invalid public key")?;
            }
            Some(other) => bail!("Unexpected {} before key exchange", other.kind()),
            None => bail!("Peer closed the connection during key exchange"),
        }

        let outbound = messenger
            .prepare_outbound(&self.recipient, &self.message)
            .context("Failed to encrypt message")?;
        conn.send(&outbound).await?;
        conn.close().await?;

        println!("Message sent to {} ({}).", self.recipient, conn.peer_addr());
        Ok(())
    }
}
