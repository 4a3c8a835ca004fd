use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use smart_bridge::analytics::models::parse_date;
use smart_bridge::analytics::DailyAggregator;
use smart_bridge::app::connect_storage;
use smart_bridge::auth::SessionKeys;
use smart_bridge::config::Config;
use smart_bridge::lease::LeaseTable;
use smart_bridge::models::{CredentialStatus, NewCredential};
use smart_bridge::settings::SettingsService;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "smart-bridge-admin")]
#[command(about = "smart-bridge credential and maintenance CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Issue a new API key pair; the secret is shown only once
    IssueKey {
        #[arg(long)]
        owner: i64,
        /// Days until the key stops working
        #[arg(long)]
        expires_days: Option<i64>,
    },
    /// Permanently revoke an API key
    RevokeKey { api_key: String },
    /// Suspend an API key
    DeactivateKey { api_key: String },
    /// List API keys, optionally for one owner
    ListKeys {
        #[arg(long)]
        owner: Option<i64>,
    },
    /// Mint a bearer token for the stats endpoints
    SessionToken {
        #[arg(long)]
        owner: i64,
        #[arg(long, default_value_t = 24)]
        ttl_hours: i64,
    },
    GetSetting { key: String },
    SetSetting { key: String, value: String },
    /// Roll up one day, or catch up on every missed day
    Aggregate {
        /// Local date as YYYY-MM-DD
        #[arg(long)]
        date: Option<String>,
    },
}

fn format_time(unix_secs: Option<i64>) -> String {
    unix_secs
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let storage = connect_storage(&config.database).await?;

    match cli.command {
        Commands::IssueKey {
            owner,
            expires_days,
        } => {
            if expires_days.is_some_and(|days| days <= 0) {
                bail!("--expires-days must be positive");
            }
            let expires_at = expires_days.map(|days| Utc::now().timestamp() + days * 86_400);
            let credential = storage
                .insert_credential(&NewCredential::generate(owner, expires_at))
                .await
                .context("failed to store credential")?;
            println!("✓ Issued API key for owner {}", credential.owner_id);
            println!("  API key:    {}", credential.api_key);
            println!("  Secret key: {}", credential.secret_key);
            println!("  Expires:    {}", format_time(credential.expires_at));
            println!("⚠ Store the secret now; it cannot be shown again.");
        }
        Commands::RevokeKey { api_key } => {
            if storage
                .set_credential_status(&api_key, CredentialStatus::Revoked)
                .await?
            {
                println!("✓ Revoked '{}'", api_key);
            } else {
                println!("⚠ No API key '{}'", api_key);
            }
        }
        Commands::DeactivateKey { api_key } => {
            if storage
                .set_credential_status(&api_key, CredentialStatus::Inactive)
                .await?
            {
                println!("✓ Deactivated '{}'", api_key);
            } else {
                println!("⚠ No API key '{}'", api_key);
            }
        }
        Commands::ListKeys { owner } => {
            let credentials = storage.list_credentials(owner).await?;
            if credentials.is_empty() {
                println!("No API keys found.");
            } else {
                println!(
                    "{:<34} {:<8} {:<10} {:<17} {}",
                    "API Key", "Owner", "Status", "Last Used", "Expires"
                );
                println!("{}", "-".repeat(90));
                for credential in credentials {
                    println!(
                        "{:<34} {:<8} {:<10} {:<17} {}",
                        credential.api_key,
                        credential.owner_id,
                        credential.status,
                        format_time(credential.last_used_at),
                        format_time(credential.expires_at)
                    );
                }
            }
        }
        Commands::SessionToken { owner, ttl_hours } => {
            let secret = config
                .auth
                .session_secret
                .as_deref()
                .filter(|secret| !secret.is_empty())
                .context("SESSION_SECRET must be set to mint session tokens")?;
            if ttl_hours <= 0 {
                bail!("--ttl-hours must be positive");
            }
            let token = SessionKeys::new(secret).issue(owner, ttl_hours * 3600)?;
            println!("{token}");
        }
        Commands::GetSetting { key } => match storage.get_setting(&key).await? {
            Some(value) => println!("{value}"),
            None => println!("⚠ Setting '{}' is not set", key),
        },
        Commands::SetSetting { key, value } => {
            storage.set_setting(&key, &value).await?;
            println!("✓ {} = {}", key, value);
        }
        Commands::Aggregate { date } => {
            let settings = Arc::new(SettingsService::load(Arc::clone(&storage)).await?);
            let aggregator = DailyAggregator::new(
                Arc::clone(&storage),
                settings,
                Arc::new(LeaseTable::new()),
                &config.analytics,
            );
            match date {
                Some(raw) => {
                    let date: NaiveDate = parse_date(&raw)?;
                    let stats = aggregator.aggregate_day(date).await?;
                    println!(
                        "✓ {}: {} clicks, {} unique visitors",
                        stats.stats_date, stats.total_clicks, stats.unique_visitors
                    );
                }
                None => {
                    let days = aggregator.catch_up(aggregator.today()).await?;
                    println!("✓ Aggregated {} missed day(s)", days);
                }
            }
        }
    }

    Ok(())
}
