//! Headless donation portal client.
//!
//! Restores the persisted session, optionally signs in with credentials from
//! the environment, opens the realtime channel and, for administrators,
//! mirrors the live dashboard into the log until Ctrl-C.

use std::sync::Arc;

use reqwest::Client;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use portal::config::{Config, LoginCredentials};
use portal::credentials::{CredentialStore, FileStorage};
use portal::dashboard::{DashboardOptions, DashboardSync};
use portal::guard::{self, GuardDecision, RequiredKind, ADMIN_HOME_PATH};
use portal::realtime::{ChannelConfig, RealtimeChannel};
use portal::rest::RestClient;
use portal::stats::format_amount;
use portal::verifier::SessionVerifier;
use portal::{PortalError, PrincipalKind, SessionContext};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    // HTTP client shared by verification, sign-in and the dashboard seed.
    let client = Client::builder().timeout(config.http_timeout()).build()?;
    let rest = RestClient::new(client, config.api_url.clone());

    // ─── Session ──────────────────────────────────────────
    let storage = FileStorage::new(&config.storage_path);
    info!("Session storage at {}", storage.path().display());
    let store = CredentialStore::new(Arc::new(storage));
    let verifier =
        SessionVerifier::new(Arc::new(rest.clone())).with_timeout(config.verify_timeout());
    let session = Arc::new(SessionContext::new(store, verifier));
    session.boot().await;

    if !session.is_authenticated() {
        if let Some(login) = &config.login {
            sign_in(&rest, &session, login).await;
        }
    }

    let decision = guard::decide(&session.state(), RequiredKind::Admin, ADMIN_HOME_PATH);
    info!(
        "Session ready as {}, admin dashboard: {decision:?}",
        session.user_type().as_str()
    );

    // ─── Realtime ─────────────────────────────────────────
    let channel = RealtimeChannel::connect(ChannelConfig::from(&config), session.subscribe());

    let dashboard = if decision == GuardDecision::Render {
        Some(mount_dashboard(&rest, &session, &channel, &config).await)
    } else {
        None
    };

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    if let Some((sync, mirror)) = dashboard {
        sync.unmount().await;
        mirror.abort();
    }
    channel.disconnect().await;

    Ok(())
}

async fn sign_in(rest: &RestClient, session: &SessionContext, login: &LoginCredentials) {
    let grant = match login.kind {
        PrincipalKind::Donor => rest.login_donor(&login.username, &login.password).await,
        PrincipalKind::Admin => rest.login_admin(&login.username, &login.password).await,
    };

    match grant {
        Ok(grant) => {
            let kind = grant.principal.kind();
            match session.login(&grant.token, grant.principal, kind) {
                Ok(()) => info!("Signed in; continue at {}", guard::post_login_target(kind, None)),
                Err(e) => warn!("Could not store session: {e}"),
            }
        }
        Err(e) => warn!("Sign-in failed: {e}"),
    }
}

/// Mount the dashboard, seed it over REST and log every view change.
async fn mount_dashboard(
    rest: &RestClient,
    session: &SessionContext,
    channel: &RealtimeChannel,
    config: &Config,
) -> (DashboardSync, JoinHandle<()>) {
    let sync = DashboardSync::mount(channel.events(), DashboardOptions::from(config));

    let mut view = sync.view();
    let mirror = tokio::spawn(async move {
        while view.changed().await.is_ok() {
            let current = view.borrow_and_update().clone();
            if let Some(note) = &current.notification {
                info!("[{:?}] {}", note.kind, note.message);
            }
            if current.recomputing {
                info!("Recomputing dashboard statistics…");
            } else if let Some(stats) = &current.stats {
                info!(
                    "Dashboard: {} users, {} donations totalling ${} (today: {} / ${})",
                    stats.total_users,
                    stats.total_donations.count,
                    format_amount(stats.total_donations.amount),
                    stats.daily.count,
                    format_amount(stats.daily.amount),
                );
            }
        }
    });

    match session.token() {
        Some(token) => match rest.dashboard_stats(&token).await {
            Ok(stats) => sync.seed(stats),
            Err(e) => {
                warn!("Dashboard seed failed: {e}");
                let message = match e {
                    PortalError::Status { message, .. } => message,
                    _ => "Failed to load dashboard stats".to_string(),
                };
                sync.seed_failed(message);
            }
        },
        None => sync.seed_failed("Failed to load dashboard stats"),
    }

    (sync, mirror)
}
