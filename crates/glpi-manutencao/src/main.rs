//! GLPI Manutenção - terminal front-end for the maintenance session gate.
//!
//! Each subcommand plays one page of the web frontend: the login page, a
//! protected page, or the logout action. Navigation results are printed as
//! the route the page would redirect to.

use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use glpi_manutencao_core::auth::{decode_claims, decode_stored, is_expired};
use glpi_manutencao_core::{
    ApiClient, CancellationToken, Config, GuardOutcome, GuardState, IdentityVerifier, PageKind,
    Route, SessionGuard, TokenStore,
};

// ============================================================================
// Constants
// ============================================================================

/// Exit code for a page that was torn down (Ctrl+C) before settling
const EXIT_CANCELLED: u8 = 130;

#[derive(Parser)]
#[command(name = "glpi-manutencao", version, about = "Session gate for the GLPI maintenance frontend")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store a credential issued by the login flow and go to the home page
    Login {
        /// Bearer credential (three dot-separated segments)
        token: String,
    },
    /// Open the login page: go home if already signed in, else show the form
    OpenLogin,
    /// Open a protected page: verify the stored credential with the backend
    Check,
    /// Sign out and clear the stored credential
    Logout,
    /// Show the stored credential's claims and local expiry (no network)
    Status {
        /// Print the decoded claims as JSON
        #[arg(long)]
        json: bool,
    },
    /// Probe the backend health endpoint
    Health,
}

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();
    let cli = Cli::parse();

    let config = Config::load().context("Failed to load configuration")?;
    debug!(backend = ?config.token_backend, skew_secs = config.skew_secs, "Config loaded");
    let store = config.token_store();

    match cli.command {
        Command::Login { token } => login(store, &config, &token),
        Command::OpenLogin => open_login(store, &config),
        Command::Check => check(store, &config).await,
        Command::Logout => {
            let mut guard = SessionGuard::new(store, (), PageKind::Protected, config.skew_secs);
            if let GuardState::Redirecting(route) = guard.logout() {
                print_redirect(*route);
            }
            info!("Signed out");
            Ok(ExitCode::SUCCESS)
        }
        Command::Status { json } => status(store.as_ref(), &config, json),
        Command::Health => health(&config).await,
    }
}

fn api_client(config: &Config) -> Result<ApiClient> {
    let base_url = config.api_base_url()?;
    ApiClient::new(base_url).context("Failed to create API client")
}

fn print_redirect(route: Route) {
    println!("Redirecting to {}", route);
}

/// Report a settled gate and map it to an exit code
fn report(outcome: GuardOutcome) -> ExitCode {
    match outcome {
        GuardOutcome::Settled(GuardState::Authenticated(profile)) => {
            println!("Signed in as {}", profile.label());
            if let Some(ref email) = profile.email {
                println!("  email:  {}", email);
            }
            if let Some(ref groups) = profile.groups {
                if !groups.is_empty() {
                    println!("  groups: {}", groups.join(", "));
                }
            }
            ExitCode::SUCCESS
        }
        GuardOutcome::Settled(GuardState::Redirecting(route)) => {
            print_redirect(route);
            if route == Route::Login {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        GuardOutcome::Settled(GuardState::LoginForm) => {
            println!("Not signed in - showing login form");
            ExitCode::FAILURE
        }
        GuardOutcome::Settled(GuardState::Checking) | GuardOutcome::Cancelled => {
            println!("Cancelled");
            ExitCode::from(EXIT_CANCELLED)
        }
    }
}

/// Drive a page's gate, tearing the page down on Ctrl+C
async fn run_page<V: IdentityVerifier>(mut guard: SessionGuard<V>) -> GuardOutcome {
    let (cancel, mut rx) = CancellationToken::new();

    let teardown = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                debug!("Interrupted, tearing page down");
                cancel.cancel();
            }
        })
    };

    let outcome = guard.run(&mut rx).await;
    teardown.abort();
    outcome
}

fn login(store: Arc<dyn TokenStore>, config: &Config, token: &str) -> Result<ExitCode> {
    let token = token.trim();
    if decode_claims(token).is_none() {
        anyhow::bail!("Not a credential: expected dot-separated segments with a claims payload");
    }
    if is_expired(Some(token), config.skew_secs) {
        warn!("Credential is already expired, the next protected page will sign out");
    }

    // The login page never calls the identity endpoint
    let mut guard = SessionGuard::new(store, (), PageKind::Login, config.skew_secs);
    let state = guard.complete_login(token).clone();
    info!("Credential stored");
    Ok(report(GuardOutcome::Settled(state)))
}

fn open_login(store: Arc<dyn TokenStore>, config: &Config) -> Result<ExitCode> {
    let mut guard = SessionGuard::new(store, (), PageKind::Login, config.skew_secs);
    Ok(report(guard.run_login_page()))
}

async fn check(store: Arc<dyn TokenStore>, config: &Config) -> Result<ExitCode> {
    let outcome = protected_page(store, config.skew_secs, || api_client(config)).await?;
    Ok(report(outcome))
}

/// Open a protected page. The verifier is only built once the stored
/// credential has passed the local checks.
async fn protected_page<V, F>(
    store: Arc<dyn TokenStore>,
    skew_secs: i64,
    connect: F,
) -> Result<GuardOutcome>
where
    V: IdentityVerifier,
    F: FnOnce() -> Result<V>,
{
    let mut local = SessionGuard::new(store.clone(), (), PageKind::Protected, skew_secs);
    if let Some(outcome) = local.run_local_checks() {
        return Ok(outcome);
    }

    let guard = SessionGuard::new(store, connect()?, PageKind::Protected, skew_secs);
    Ok(run_page(guard).await)
}

fn status(store: &dyn TokenStore, config: &Config, json: bool) -> Result<ExitCode> {
    let token = store.get();
    let claims = match decode_stored(store) {
        Some(claims) => claims,
        None if token.is_some() => {
            println!("Stored credential is malformed");
            return Ok(ExitCode::FAILURE);
        }
        None => {
            println!("No stored credential");
            return Ok(ExitCode::FAILURE);
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&claims)?);
    } else {
        let now = Utc::now().timestamp();
        println!("subject:  {}", claims.sub.as_deref().unwrap_or("-"));
        if let Some(ref name) = claims.display_name {
            println!("name:     {}", name);
        }
        if let Some(ref email) = claims.email {
            println!("email:    {}", email);
        }
        if !claims.groups.is_empty() {
            let groups: Vec<&str> = claims.groups.iter().map(String::as_str).collect();
            println!("groups:   {}", groups.join(", "));
        }
        if let Some(issued) = claims.issued_at() {
            println!("issued:   {}", issued.format("%Y-%m-%d %H:%M:%S UTC"));
        }
        match (claims.expires_at(), claims.seconds_until_expiry(now)) {
            (Some(expires), Some(left)) => println!(
                "expires:  {} ({}m {}s left)",
                expires.format("%Y-%m-%d %H:%M:%S UTC"),
                left / 60,
                left % 60
            ),
            _ => println!("expires:  never stated"),
        }
    }

    if claims.is_expired_at(config.skew_secs, Utc::now().timestamp()) {
        println!("Locally expired (skew {}s)", config.skew_secs);
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

async fn health(config: &Config) -> Result<ExitCode> {
    let client = api_client(config)?;
    let health = client
        .health()
        .await
        .with_context(|| format!("Health check against {} failed", client.base_url()))?;

    println!(
        "{}: {}{}",
        health.service.as_deref().unwrap_or("backend"),
        health.status,
        health
            .timestamp
            .as_deref()
            .map(|t| format!(" at {}", t))
            .unwrap_or_default()
    );
    Ok(if health.is_healthy() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
