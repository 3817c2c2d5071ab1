use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use client_core::{
    load_client_settings_from, ActionOutcome, ClientError, MemberCard, MemberClient, Surface,
};
use shared::{
    domain::{MemberId, MemberProfile},
    protocol::{Credentials, Registration},
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Manage a member session and connections")]
struct Cli {
    /// Client settings file.
    #[arg(long, default_value = "client.toml")]
    config: PathBuf,
    /// Overrides `api_base_url` from the settings.
    #[arg(long)]
    server_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Register {
        username: String,
        password: String,
    },
    Login {
        username: String,
        password: String,
    },
    Logout,
    Whoami,
    /// Everyone else, with your relationship to them.
    Members,
    /// Connections and pending requests only.
    Network,
    Connect {
        member_id: i64,
    },
    Accept {
        member_id: i64,
    },
    /// Withdraws, rejects or removes a connection.
    Cancel {
        member_id: i64,
    },
    Message {
        member_id: i64,
    },
    Profile {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        designation: Option<String>,
        #[arg(long)]
        company: Option<String>,
        #[arg(long)]
        experience: Option<u32>,
        #[arg(long)]
        skills: Option<String>,
        #[arg(long)]
        website: Option<String>,
        #[arg(long)]
        photo: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();

    let mut settings = load_client_settings_from(Some(cli.config.as_path()))?;
    if let Some(server_url) = cli.server_url {
        settings.api_base_url = server_url;
        settings.validate()?;
    }
    let client = MemberClient::from_settings(&settings).await?;
    client.start().await;

    match run(&client, cli.command).await {
        Ok(()) => Ok(()),
        Err(err) => report(err),
    }
}

async fn run(client: &MemberClient, command: Command) -> Result<(), ClientError> {
    match command {
        Command::Register { username, password } => {
            let member = client
                .session
                .register(&Registration { username, password })
                .await?;
            println!("registered member_id={}", member.id);
        }
        Command::Login { username, password } => {
            let member = client
                .session
                .sign_in(&Credentials { username, password })
                .await?;
            println!("logged in as {} (member_id={})", member.display_name(), member.id);
        }
        Command::Logout => {
            client.session.logout().await?;
            println!("logged out");
        }
        Command::Whoami => match client.session.identity().await {
            Some(member) => println!("{} (member_id={})", member.display_name(), member.id),
            None => println!("not logged in"),
        },
        Command::Members => print_cards(&client.member_cards().await?),
        Command::Network => print_cards(&client.network_cards().await?),
        Command::Connect { member_id } => {
            print_outcome(client.connections.request(MemberId(member_id)).await?)
        }
        Command::Accept { member_id } => {
            print_outcome(client.connections.accept(MemberId(member_id)).await?)
        }
        Command::Cancel { member_id } => {
            print_outcome(client.connections.cancel(MemberId(member_id)).await?)
        }
        Command::Message { member_id } => {
            let outcome = client.connections.message(MemberId(member_id)).await?;
            println!(
                "messaging {} is not available from the command line",
                outcome.counterpart.display_name()
            );
        }
        Command::Profile {
            name,
            designation,
            company,
            experience,
            skills,
            website,
            photo,
        } => {
            let member = client
                .session
                .update_profile(&MemberProfile {
                    name,
                    designation,
                    company,
                    experience,
                    skills,
                    website,
                    photo,
                })
                .await?;
            println!("profile saved for {}", member.display_name());
        }
    }
    Ok(())
}

fn print_cards(cards: &[MemberCard]) {
    if cards.is_empty() {
        println!("no members");
        return;
    }
    for card in cards {
        let actions: Vec<String> = card
            .affordances
            .iter()
            .map(|a| {
                if a.enabled {
                    a.label.to_string()
                } else {
                    format!("({})", a.label)
                }
            })
            .collect();
        println!(
            "{:>5}  {:<24} {:<20} {}{}",
            card.member_id.0,
            card.display_name,
            card.state.to_string(),
            actions.join(" "),
            card.headline
                .as_deref()
                .map(|headline| format!("  - {headline}"))
                .unwrap_or_default()
        );
    }
}

fn print_outcome(outcome: ActionOutcome) {
    println!(
        "{} {}: now {}",
        outcome.action,
        outcome.counterpart.display_name(),
        outcome.state
    );
}

fn report(err: ClientError) -> Result<()> {
    match err.surface() {
        Surface::RedirectToLogin => bail!("not logged in: run `member_cli login <username> <password>`"),
        Surface::InlineNotice(notice) => bail!(notice),
        Surface::Silent => {
            debug!(%err, "nothing to do");
            Ok(())
        }
    }
}
