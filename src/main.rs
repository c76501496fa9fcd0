use anyhow::{Context, Result};
use dialoguer::Password;
use std::str::FromStr;
use std::sync::Arc;

use admin_api_client::auth::{CredentialStore, LoginRedirect, SqliteCredentialStore};
use admin_api_client::config::{self, Command};
use admin_api_client::{ApiClient, Payload, ResponseData};

#[tokio::main]
async fn main() -> Result<()> {
    // Check if interactive setup is needed (no .env and no base URL)
    if config::needs_interactive_setup() && std::io::IsTerminal::is_terminal(&std::io::stdin()) {
        let base_url = config::run_interactive_setup()?;
        std::env::set_var("API_BASE_URL", &base_url);
    }

    // Load configuration first (for log level)
    let (config, command) = config::Config::load()?;
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::debug!(
        base_url = %config.api_base_url,
        db_file = %config.credentials_db_file.display(),
        "Configuration loaded"
    );

    let store = Arc::new(SqliteCredentialStore::open(&config.credentials_db_file)?);

    let login_url = config.login_url();
    let session = LoginRedirect::new(login_url, |url: &str| {
        eprintln!("Session expired. Log in again: admin-client login (login page: {})", url);
    });

    let client = ApiClient::new(config.client_options(), store.clone(), Arc::new(session))?;

    match command {
        Command::Login { email } => {
            let password = match std::env::var("ADMIN_PASSWORD") {
                Ok(password) => password,
                Err(_) => Password::new()
                    .with_prompt(format!("Password for {}", email))
                    .interact()
                    .context("Failed to read password")?,
            };

            client.login(&email, &password).await?;
            println!("✅ Logged in as {}", email);
        }

        Command::Logout => {
            client.logout()?;
            println!("Logged out");
        }

        Command::Status => {
            if store.get()?.is_some() {
                match store.updated_at()? {
                    Some(at) => println!("Logged in (credentials updated {})", at.to_rfc3339()),
                    None => println!("Logged in"),
                }
            } else {
                println!("Not logged in");
            }
        }

        Command::Request {
            method,
            endpoint,
            data,
            response_type,
            output,
        } => {
            let method = reqwest::Method::from_str(&method.to_uppercase())
                .with_context(|| format!("Invalid HTTP method: {}", method))?;
            let body = match data {
                Some(raw) => Payload::Json(
                    serde_json::from_str(&raw).context("--data must be valid JSON")?,
                ),
                None => Payload::Empty,
            };

            let response = match client.request(&endpoint, method, body, response_type).await {
                Ok(response) => response,
                Err(e) if e.is_session_expired() => {
                    anyhow::bail!("Session expired: {}", e);
                }
                Err(e) => return Err(e.into()),
            };

            tracing::info!(status = %response.status, "Request completed");

            match (response.data, output) {
                (ResponseData::Blob(bytes), Some(path)) => {
                    std::fs::write(&path, &bytes)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("Wrote {} bytes to {}", bytes.len(), path.display());
                }
                (ResponseData::Json(value), Some(path)) => {
                    std::fs::write(&path, serde_json::to_vec_pretty(&value)?)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                }
                (ResponseData::Text(text), Some(path)) => {
                    std::fs::write(&path, text)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                }
                (ResponseData::Json(value), None) => {
                    println!("{}", serde_json::to_string_pretty(&value)?);
                }
                (ResponseData::Text(text), None) => println!("{}", text),
                (ResponseData::Blob(bytes), None) => {
                    println!(
                        "Received {} bytes (use --output to save them)",
                        bytes.len()
                    );
                }
            }
        }
    }

    Ok(())
}
