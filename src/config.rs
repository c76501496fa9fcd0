use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dialoguer::{Confirm, Input};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use crate::http_client::ClientOptions;
use crate::request::ResponseType;

/// Admin dashboard API client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Base URL of the admin backend API
    #[arg(short = 'b', long, env = "API_BASE_URL", global = true)]
    pub base_url: Option<String>,

    /// Path to the SQLite credential store
    #[arg(short = 'd', long, env = "CREDENTIALS_DB_FILE", global = true)]
    pub db_file: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30", global = true)]
    pub http_timeout: u64,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Log in and store the credential pair
    Login {
        /// Account email
        #[arg(short, long, env = "ADMIN_EMAIL")]
        email: String,
    },

    /// Forget the stored credential pair
    Logout,

    /// Show whether credentials are stored
    Status,

    /// Send one authenticated request
    Request {
        /// HTTP method (GET, POST, PUT, PATCH, DELETE)
        method: String,

        /// Endpoint relative to the base URL, e.g. /orders
        endpoint: String,

        /// JSON request body
        #[arg(long)]
        data: Option<String>,

        /// Response decoding (json, text, blob)
        #[arg(long, default_value = "json")]
        response_type: ResponseType,

        /// Write the response body to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Debug)]
pub struct Config {
    // Backend
    pub api_base_url: String,
    pub refresh_endpoint: String,
    pub login_endpoint: String,
    pub login_path: String,

    // Credential storage
    pub credentials_db_file: PathBuf,

    // Reserved statuses
    pub expired_status: u16,
    pub refresh_rejected_status: u16,

    // HTTP client
    pub http_max_connections: usize,
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,

    pub log_level: String,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > .env > defaults
    pub fn load() -> Result<(Self, Command)> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let cli = Cli::parse();
        let config = Self::from_args(cli.global)?;

        Ok((config, cli.command))
    }

    /// Build configuration from parsed global arguments and the environment
    pub fn from_args(args: GlobalArgs) -> Result<Self> {
        let config = Config {
            api_base_url: args
                .base_url
                .context("API_BASE_URL is required (use -b or set API_BASE_URL env var)")?,

            refresh_endpoint: env_or("REFRESH_ENDPOINT", "/auth/refresh-token".to_string()),
            login_endpoint: env_or("LOGIN_ENDPOINT", "/auth/login".to_string()),
            login_path: env_or("LOGIN_PATH", "/login".to_string()),

            credentials_db_file: args
                .db_file
                .map(|s| expand_tilde(&s))
                .or_else(default_db_path)
                .context("Could not determine a credential store location (set CREDENTIALS_DB_FILE)")?,

            expired_status: env_or("EXPIRED_STATUS", 419),
            refresh_rejected_status: env_or("REFRESH_REJECTED_STATUS", 401),

            http_max_connections: env_or("HTTP_MAX_CONNECTIONS", 20),
            http_connect_timeout: env_or("HTTP_CONNECT_TIMEOUT", 10),
            http_request_timeout: args.http_timeout,

            log_level: args.log_level,
        };

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !(self.api_base_url.starts_with("http://") || self.api_base_url.starts_with("https://"))
        {
            anyhow::bail!(
                "API_BASE_URL must be an http(s) URL: {}",
                self.api_base_url
            );
        }

        for (name, status) in [
            ("EXPIRED_STATUS", self.expired_status),
            ("REFRESH_REJECTED_STATUS", self.refresh_rejected_status),
        ] {
            if !(400..=599).contains(&status) {
                anyhow::bail!("{} must be a 4xx or 5xx status, got {}", name, status);
            }
        }

        // 401/403 mean "not allowed", never "refresh and retry"
        if self.expired_status == 401 || self.expired_status == 403 {
            anyhow::bail!(
                "EXPIRED_STATUS must be distinct from 401/403, got {}",
                self.expired_status
            );
        }

        if self.expired_status == self.refresh_rejected_status {
            anyhow::bail!(
                "EXPIRED_STATUS and REFRESH_REJECTED_STATUS must differ (both {})",
                self.expired_status
            );
        }

        Ok(())
    }

    /// Settings for `ApiClient`
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            base_url: self.api_base_url.clone(),
            refresh_endpoint: self.refresh_endpoint.clone(),
            login_endpoint: self.login_endpoint.clone(),
            expired_status: self.expired_status,
            refresh_rejected_status: self.refresh_rejected_status,
            max_connections: self.http_max_connections,
            connect_timeout: Duration::from_secs(self.http_connect_timeout),
            request_timeout: Duration::from_secs(self.http_request_timeout),
        }
    }

    /// Where the user is sent when the session ends
    pub fn login_url(&self) -> String {
        format!(
            "{}/{}",
            self.api_base_url.trim_end_matches('/'),
            self.login_path.trim_start_matches('/')
        )
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Default credential store location under the user's data directory
fn default_db_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("admin-api-client").join("credentials.sqlite3"))
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

// === Interactive Setup ===

/// Check if interactive setup is needed (no .env file and no base URL)
pub fn needs_interactive_setup() -> bool {
    let env_file_exists = std::path::Path::new(".env").exists();
    let has_base_url = std::env::var("API_BASE_URL").is_ok();

    !env_file_exists && !has_base_url
}

/// Ask for the backend base URL and optionally save it to `.env`
pub fn run_interactive_setup() -> Result<String> {
    println!();
    println!("No configuration found. Let's point the client at your backend.");
    println!();

    let base_url: String = Input::new()
        .with_prompt("Backend API base URL (API_BASE_URL)")
        .default("http://localhost:8080/api".to_string())
        .interact_text()
        .context("Failed to read API_BASE_URL")?;

    let save_to_env = Confirm::new()
        .with_prompt("Save configuration to .env file?")
        .default(true)
        .interact()
        .context("Failed to read save confirmation")?;

    if save_to_env {
        save_env_file(&base_url)?;
        println!("✅ Configuration saved to .env file");
    }

    Ok(base_url)
}

/// Save configuration to .env file
fn save_env_file(base_url: &str) -> Result<()> {
    let env_content = format!(
        r#"# Admin API client configuration
# Generated by interactive setup

# Backend base URL (required)
API_BASE_URL={}

# Status the backend uses for an expired access token
EXPIRED_STATUS=419

# Status the refresh endpoint uses for an invalid refresh token
REFRESH_REJECTED_STATUS=401

# Logging (trace, debug, info, warn, error)
LOG_LEVEL=info
"#,
        base_url
    );

    let mut file = std::fs::File::create(".env").context("Failed to create .env file")?;
    file.write_all(env_content.as_bytes())
        .context("Failed to write .env file")?;

    Ok(())
}
