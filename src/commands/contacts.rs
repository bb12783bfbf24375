//! Contact commands - list, add and annotate contacts.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Args, Subcommand};

use super::{format_time, CommandExecutor, GlobalArgs};

/// Show known contacts.
#[derive(Args, Debug)]
pub struct ContactsCommand {
    #[command(subcommand)]
    pub action: Option<ContactsAction>,
}

#[derive(Subcommand, Debug)]
pub enum ContactsAction {
    /// List all contacts (default)
    List,

    /// Show one contact with its public key
    Show {
        /// Contact username
        name: String,
    },
}

#[async_trait]
impl CommandExecutor for ContactsCommand {
    async fn execute(&self, global: &GlobalArgs) -> Result<()> {
        let config = global.load_config()?;
        let messenger = global.open_messenger(&config)?;
        let contacts = messenger.contacts();

        match &self.action {
            None | Some(ContactsAction::List) => {
                let all = contacts.list().context("Failed to load contacts")?;
                if all.is_empty() {
                    println!("No contacts yet.");
                    println!();
                    println!("Exchange keys with `enclave send` / `enclave serve`, or add one with:");
                    println!("  enclave add-contact <name> <public-key.pem>");
                    return Ok(());
                }

                println!("Contacts ({}):", all.len());
                println!();
                for contact in all {
                    println!(
                        "  {:<16} trust {:<3} last seen {}",
                        contact.username,
                        contact.trust_level,
                        format_time(contact.last_seen)
                    );
                }
            }
            Some(ContactsAction::Show { name }) => {
                let contact = contacts
                    .get(name)?
                    .with_context(|| format!("Contact '{}' not found", name))?;

                println!("Contact: {}", contact.username);
                println!("  Trust level: {}", contact.trust_level);
                println!("  Last seen:   {}", format_time(contact.last_seen));
                match contact.fingerprint() {
                    Some(fp) => println!("  Fingerprint: {}", fp),
                    None => println!("  Fingerprint: (unable to parse key)"),
                }
                println!();
                print!("{}", contact.public_key);
            }
        }
        Ok(())
    }
}

/// Add or replace a contact from a PEM public key file.
#[derive(Args, Debug)]
pub struct AddContactCommand {
    /// Contact username
    pub name: String,

    /// Path to the contact's public key (SPKI PEM)
    pub key_path: PathBuf,
}

#[async_trait]
impl CommandExecutor for AddContactCommand {
    async fn execute(&self, global: &GlobalArgs) -> Result<()> {
        let pem = fs::read_to_string(&self.key_path)
            .with_context(|| format!("Failed to read {}", self.key_path.display()))?;

        let config = global.load_config()?;
        let messenger = global.open_messenger(&config)?;
        let contact = messenger
            .add_contact(&self.name, &pem)
            .with_context(|| format!("Failed to add contact '{}'", self.name))?;

        println!("Contact '{}' saved.", contact.username);
        if let Some(fp) = contact.fingerprint() {
            println!("  Fingerprint: {}", fp);
        }
        Ok(())
    }
}

/// Set the (advisory) trust level of a contact.
#[derive(Args, Debug)]
pub struct TrustCommand {
    /// Contact username
    pub name: String,

    /// Trust level
    pub level: i64,
}

#[async_trait]
impl CommandExecutor for TrustCommand {
    async fn execute(&self, global: &GlobalArgs) -> Result<()> {
        let config = global.load_config()?;
        let messenger = global.open_messenger(&config)?;
        messenger
            .contacts()
            .set_trust(&self.name, self.level)
            .with_context(|| format!("Failed to set trust for '{}'", self.name))?;

        println!("Trust level of '{}' set to {}.", self.name, self.level);
        Ok(())
    }
}
