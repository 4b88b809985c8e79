//! scopegate CLI
//!
//! Inspect and maintain the cached per-account service permissions, verify
//! scopes against the introspection endpoint and request missing grants.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info};

use scopegate_cli::commands::{self, Command, Session};
use scopegate_cli::terminal::TerminalConsent;
use scopegate_core::config::load_config;
use scopegate_core::tracing_init::init_tracing;
use scopegate_core::{FileStorage, PermissionCache};

#[derive(Parser, Debug)]
#[command(name = "scopegate")]
#[command(version, about = "Service permission cache and consent tool", long_about = None)]
struct Cli {
    /// Permission cache file (overrides config)
    #[arg(long, global = true)]
    storage: Option<PathBuf>,

    /// Introspection endpoint base URL (overrides config)
    #[arg(long, global = true)]
    introspection_url: Option<String>,

    /// Consent endpoint base URL (overrides config)
    #[arg(long, global = true)]
    permission_base_url: Option<String>,

    /// Approve consent prompts without asking
    #[arg(short, long, global = true)]
    yes: bool,

    /// Emit logs as JSON
    #[arg(long, global = true, env = "SCOPEGATE_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let cwd = std::env::current_dir().ok();
    let mut config = load_config(cwd.as_deref()).context("Failed to load configuration")?;
    if let Some(path) = cli.storage {
        config.storage.path = Some(path);
    }
    if let Some(url) = cli.introspection_url {
        config.introspection.base_url = url;
    }
    if let Some(url) = cli.permission_base_url {
        config.consent.permission_base_url = url;
    }

    init_tracing(&format!("scopegate={}", config.log_level), cli.log_json);
    debug!(version = env!("CARGO_PKG_VERSION"), "Starting scopegate");

    let mut out = io::stdout();

    if let Command::Scopes { service } = cli.command {
        commands::scopes(&mut out, service)?;
        return Ok(ExitCode::SUCCESS);
    }

    let storage_path = config
        .storage
        .resolved_path()
        .context("Cannot determine permission cache location; pass --storage")?;
    if let Some(parent) = storage_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    info!(path = %storage_path.display(), "Using permission cache");
    let cache = Arc::new(
        PermissionCache::open(Arc::new(FileStorage::new(storage_path)))
            .context("Failed to open permission cache")?,
    );

    match cli.command {
        Command::Scopes { .. } => {}
        Command::Show { account } => {
            commands::show(&mut out, &cache, account.as_deref()).await?;
        }
        Command::Clear { account } => {
            commands::clear(&mut out, &cache, account.as_deref()).await?;
        }
        command => {
            let ui = Arc::new(TerminalConsent::new(cli.yes));
            let session = Session::connect(&config, cache, ui)?;
            return run_session(&mut out, &session, command).await;
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Commands that need the access layer. A negative answer exits with 1.
async fn run_session(
    out: &mut io::Stdout,
    session: &Session,
    command: Command,
) -> anyhow::Result<ExitCode> {
    let ok = match command {
        Command::Check {
            account,
            service,
            scope,
        } => commands::check(out, &session.layer, &account, service, scope).await?,
        Command::Verify {
            account,
            service,
            scopes,
            request_missing,
        } => {
            commands::verify(out, session, &account, service, scopes, request_missing)
                .await?
                .is_complete()
        }
        Command::Request { account, payload } => {
            commands::request(out, session, &account, &payload).await?
        }
        Command::Invalidate {
            account,
            service,
            scope,
        } => {
            commands::invalidate(out, &session.layer, &account, service, scope).await?;
            true
        }
        Command::Scopes { .. } | Command::Show { .. } | Command::Clear { .. } => true,
    };
    Ok(if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
