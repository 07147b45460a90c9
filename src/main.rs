use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use credvault::cipher::{derive_key, CipherCodec};
use credvault::config::{load_config, VaultConfig};
use credvault::credential::{Credential, CredentialStatus};
use credvault::provider::{vault_key, ProviderRegistry};
use credvault::store::open_store;
use credvault::vault::Vault;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "credvault", about = "Encrypted OAuth2 credential vault")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print a fresh random encryption secret.
    Keygen,
    /// Check that the configured encryption secret is well-formed.
    CheckKey,
    /// Store a pending credential for a user and print the provider's authorization URL.
    Authorize {
        /// User id the credential belongs to.
        user: String,
        /// Provider id from the `[providers.<id>]` configuration.
        provider: String,
    },
    /// Show a stored credential's metadata (never its tokens).
    Show {
        /// Vault key, usually `<user>:<provider>`.
        key: String,
        /// Report the stored entry without refreshing it.
        #[arg(long)]
        no_refresh: bool,
    },
    /// Delete a stored credential.
    Evict {
        /// Vault key, usually `<user>:<provider>`.
        key: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "credvault=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Keygen => {
            println!("{}", CipherCodec::generate_secret());
            Ok(())
        }
        Commands::CheckKey => cmd_check_key(cli.config),
        Commands::Authorize { user, provider } => cmd_authorize(cli.config, &user, &provider).await,
        Commands::Show { key, no_refresh } => cmd_show(cli.config, &key, no_refresh).await,
        Commands::Evict { key } => cmd_evict(cli.config, &key).await,
    }
}

fn read_config(path: Option<PathBuf>) -> Result<VaultConfig> {
    let config = match path {
        Some(path) => load_config(&path.to_string_lossy())?,
        None => {
            let mut config = VaultConfig::default();
            config.apply_env();
            config
        }
    };
    config.validate()?;
    Ok(config)
}

async fn open_vault(path: Option<PathBuf>) -> Result<Vault> {
    let config = read_config(path)?;
    open_vault_with(&config).await
}

async fn open_vault_with(config: &VaultConfig) -> Result<Vault> {
    let store = open_store(&config.store)
        .await
        .context("Failed to open backing store")?;
    let span = tracing::info_span!("credvault");
    Ok(Vault::from_config(config, store, span)?)
}

fn cmd_check_key(path: Option<PathBuf>) -> Result<()> {
    let config = read_config(path)?;
    let key = derive_key(&config.encryption_secret).context("Invalid encryption secret")?;
    println!("ok ({} byte key)", key.as_bytes().len());
    Ok(())
}

async fn cmd_authorize(path: Option<PathBuf>, user: &str, provider: &str) -> Result<()> {
    let config = read_config(path)?;
    let registry = ProviderRegistry::from_config(&config.providers);
    let registration = registry.get(provider).with_context(|| {
        format!(
            "unknown provider '{}' (configured: {})",
            provider,
            registry.ids().collect::<Vec<_>>().join(", ")
        )
    })?;

    let vault = open_vault_with(&config).await?;
    let key = vault_key(user, provider);
    let credential = Credential::for_provider(registration);
    vault.put(&key, &credential).await?;

    info!(key = %key, "Pending credential stored");
    println!("{}", credential.authorization_url());
    Ok(())
}

async fn cmd_show(path: Option<PathBuf>, key: &str, no_refresh: bool) -> Result<()> {
    let vault = open_vault(path).await?;

    let credential = match vault.get_with(key, no_refresh).await? {
        Some(credential) => credential,
        None => {
            println!("{}: not found", key);
            return Ok(());
        }
    };

    let status = match credential.status() {
        CredentialStatus::Pending => "pending",
        CredentialStatus::Active => "active",
    };
    println!("key:           {}", key);
    println!("provider:      {}", credential.provider.id);
    println!("status:        {}", status);
    println!(
        "token type:    {}",
        credential.token_type.as_deref().unwrap_or("-")
    );
    println!(
        "refreshable:   {}",
        if credential.refresh_token.is_some() { "yes" } else { "no" }
    );
    match credential.expires_at {
        Some(at) => println!("expires at:    {}", at.to_rfc3339()),
        None => println!("expires at:    never"),
    }
    if let Some(scope) = &credential.scope {
        println!("scope:         {}", scope.join(" "));
    }
    Ok(())
}

async fn cmd_evict(path: Option<PathBuf>, key: &str) -> Result<()> {
    let vault = open_vault(path).await?;
    vault.delete(key).await?;
    info!(key = %key, "Credential evicted");
    Ok(())
}
