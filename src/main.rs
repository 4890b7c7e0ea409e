use anyhow::Result;
use gridpulse::config::Config;
use gridpulse::coordinator::{Coordinator, HttpConnector, ProviderConnector};
use gridpulse::credentials::CredentialStore;
use gridpulse::logging::init_logging;
use gridpulse::provider::auth::{Authenticator, LoginOutcome};
use gridpulse::provider::types::SessionTokens;
use gridpulse::sensors;
use gridpulse::statistics::JsonStatisticsStore;
use std::io::Write;
use tokio::sync::mpsc;
use tracing::{error, info};

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// First-run login over the terminal, including the verification-code
/// exchange when the portal demands one
async fn interactive_login(config: &Config, store: &mut CredentialStore) -> Result<SessionTokens> {
    println!("No stored session for the provider portal; log in to continue.");
    let username = prompt("Username: ")?;
    let password = prompt("Password: ")?;

    let auth = Authenticator::new(
        &config.provider.api_base_url,
        config.provider.request_timeout_seconds,
    )?;

    let session = match auth.submit_credentials(&username, &password).await? {
        LoginOutcome::Complete(session) => session,
        LoginOutcome::TwoFactor(mut challenge) => {
            println!("The portal requires a verification code.");
            for (idx, target) in challenge.targets().iter().enumerate() {
                println!("  {}: {}", idx + 1, target.obfuscated);
            }
            let choice: usize = prompt("Send the code to which target? ")?.parse()?;
            let target_id = challenge
                .targets()
                .get(choice.saturating_sub(1))
                .ok_or_else(|| anyhow::anyhow!("No such verification target"))?
                .id
                .clone();
            challenge.send_code(&target_id).await?;
            let code = prompt("Verification code: ")?;
            challenge.verify_code(&code).await?
        }
    };

    store.set_login(&username, &password)?;
    store.set_session(session.tokens.clone(), session.cookies)?;
    Ok(session.tokens)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path)?,
        None => Config::load()?,
    };
    config.validate()?;
    init_logging(&config.logging)?;

    info!(
        "Gridpulse {} utility usage poller starting up",
        env!("APP_VERSION")
    );

    let mut credentials = CredentialStore::new(&config.credentials_file);
    credentials.load()?;

    let tokens = match credentials.tokens() {
        Some(tokens) => tokens.clone(),
        None => interactive_login(&config, &mut credentials).await?,
    };

    let mut store = JsonStatisticsStore::new(&config.statistics.store_path);
    store.load()?;

    let connector = HttpConnector::new(
        &config.provider.api_base_url,
        config.provider.request_timeout_seconds,
    );
    let api = connector.connect(tokens)?;

    let mut coordinator = Coordinator::new(
        config,
        Box::new(connector),
        api,
        credentials,
        Box::new(store),
    )?;

    // Log the metric table after every published refresh
    let mut data_rx = coordinator.data_watch();
    let reporter = tokio::spawn(async move {
        while data_rx.changed().await.is_ok() {
            let lines = data_rx
                .borrow_and_update()
                .as_ref()
                .map(sensors::report)
                .unwrap_or_default();
            for line in lines {
                info!("{}", line);
            }
        }
    });

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        let _ = shutdown_tx.send(()).await;
    });

    coordinator.run(shutdown_rx).await;
    reporter.abort();
    info!("Gridpulse shutdown complete");
    Ok(())
}
