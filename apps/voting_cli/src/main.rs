use std::{path::PathBuf, sync::Arc};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    ClientEvent, HttpRegistry, MemoryRegistry, RegistryBackend, ViewState, VotingSession,
};
use shared::domain::{CandidateId, Identity};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use wallet::{IdentityProvider, MissingIdentityProvider, StaticWallet};

mod config;

use config::{load_settings, Settings};

/// Used when `RUST_LOG` is unset or invalid.
const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Parser, Debug)]
#[command(name = "voting", about = "Voting registry client")]
struct Args {
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    registry_url: Option<String>,
    /// Wallet account; repeat for several, the first one is active.
    #[arg(long = "account", global = true)]
    accounts: Vec<String>,
    /// Use an in-process registry administered by the first account.
    #[arg(long, global = true)]
    memory: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Status,
    Candidates,
    Add { name: String },
    Vote { candidate_id: u64 },
    /// Print the view on every change until Ctrl-C.
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(log_filter()).init();
    let args = Args::parse();

    let mut settings = load_settings(args.config.as_deref())?;
    apply_flags(&mut settings, &args);

    let accounts: Vec<Identity> = settings
        .accounts
        .iter()
        .map(|account| Identity::new(account))
        .filter(|identity| !identity.is_empty())
        .collect();
    let client_config = settings.client_config();

    let backend: Arc<dyn RegistryBackend> = if args.memory {
        let admin = accounts
            .first()
            .cloned()
            .ok_or_else(|| anyhow!("--memory needs at least one --account to act as admin"))?;
        info!(%admin, "using in-process registry");
        Arc::new(MemoryRegistry::new(admin))
    } else {
        let url = settings
            .registry_url
            .clone()
            .context("no registry url; pass --registry-url or set VOTING_REGISTRY_URL")?;
        Arc::new(HttpRegistry::new(url, client_config.request_timeout)?)
    };
    let provider: Arc<dyn IdentityProvider> = if accounts.is_empty() {
        Arc::new(MissingIdentityProvider)
    } else {
        Arc::new(StaticWallet::new(accounts))
    };

    let session = VotingSession::new(backend, provider, client_config);
    let report = session.connect().await?;
    println!("Connected as {}", report.identity);
    if let Some(warning) = report.sync_warning {
        warn!(%warning, "initial sync failed");
        println!("warning: {warning}");
    }

    match args.command {
        Command::Status => print_status(&session.snapshot()),
        Command::Candidates => print_candidates(&session.snapshot()),
        Command::Add { name } => {
            let report = session.add_candidate(&name).await?;
            println!("Candidate added in {}", report.tx_hash);
            if let Some(warning) = report.sync_warning {
                println!("warning: {warning}");
            }
            print_candidates(&session.snapshot());
        }
        Command::Vote { candidate_id } => {
            let report = session.vote(CandidateId(candidate_id)).await?;
            println!("Vote recorded in {}", report.tx_hash);
            if let Some(warning) = report.sync_warning {
                println!("warning: {warning}");
            }
            print_candidates(&session.snapshot());
        }
        Command::Watch => watch(&session).await?,
    }

    session.disconnect().await;
    Ok(())
}

fn log_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

fn apply_flags(settings: &mut Settings, args: &Args) {
    if let Some(url) = &args.registry_url {
        settings.registry_url = Some(url.clone());
    }
    if !args.accounts.is_empty() {
        settings.accounts = args.accounts.clone();
    }
}

async fn watch(session: &VotingSession) -> Result<()> {
    let mut view = session.view();
    let mut events = session.subscribe_events();
    print_status(&view.borrow_and_update().clone());

    loop {
        tokio::select! {
            changed = view.changed() => {
                if changed.is_err() {
                    bail!("view store closed");
                }
                let snapshot = view.borrow_and_update().clone();
                print_status(&snapshot);
            }
            event = events.recv() => match event {
                Ok(ClientEvent::Notification(event)) => println!("event: {event:?}"),
                Ok(ClientEvent::SyncWarning(reason)) => println!("warning: {reason}"),
                Ok(_) => {}
                Err(err) => warn!(%err, "missed client events"),
            },
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

fn print_status(view: &ViewState) {
    let identity = view
        .identity
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "<none>".into());
    let role = view
        .role
        .map(|role| format!("{role:?}"))
        .unwrap_or_else(|| "<unsynced>".into());
    println!(
        "identity={identity} role={role} has_voted={} candidates={} total_votes={} mutation={:?} synced_at={}",
        view.has_voted,
        view.candidates.len(),
        view.total_votes(),
        view.mutation,
        view.last_synced_at
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "never".into()),
    );
}

fn print_candidates(view: &ViewState) {
    if view.candidates.is_empty() {
        println!("No candidates yet.");
        return;
    }
    for candidate in &view.candidates {
        println!(
            "{:>4}  {:<24} {:>6}",
            candidate.id, candidate.name, candidate.vote_count
        );
    }
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
