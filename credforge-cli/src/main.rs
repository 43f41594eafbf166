//! Credforge CLI
//!
//! Command-line front end for the credforge token engine.
//!
//! # Usage
//!
//! ```bash
//! # Sign in with the device code flow
//! credforge login --scopes User.Read
//!
//! # List cached accounts
//! credforge accounts
//!
//! # Get an access token, refreshing it when needed
//! credforge token --account user@contoso.com
//!
//! # App-only token for a confidential client
//! CREDFORGE_CLIENT_SECRET=... credforge app-token --scopes https://graph.microsoft.com/.default
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use credforge_core::{
    AccountInfo, AuthenticationResult, AuthorizationCodeClient, AuthorizationCodeRequest,
    AuthorizationUrlRequest, BaseClient, ClientCredentialClient, ClientCredentialRequest,
    CryptoProvider, DefaultCrypto, DeviceCodeClient, DeviceCodeRequest, EndSessionRequest,
    FileStore, SilentFlowClient, SilentFlowRequest, crypto::PKCE_METHOD_S256,
};
use serde_json::json;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt};

mod config;

use config::{CliConfig, load_config, split_scopes};

#[derive(Parser)]
#[command(name = "credforge")]
#[command(about = "OAuth2/OIDC token acquisition with a local credential cache")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Token cache file, overriding the configuration
    #[arg(long, global = true)]
    cache: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with the device code flow
    Login {
        /// Scopes to request (comma-separated)
        #[arg(short, long)]
        scopes: Option<String>,

        /// Give up after this many seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Get an access token for a cached account
    Token {
        /// Username or home account id; optional with a single cached account
        #[arg(short, long)]
        account: Option<String>,

        /// Scopes to request (comma-separated)
        #[arg(short, long)]
        scopes: Option<String>,

        /// Ignore the cached access token
        #[arg(short, long)]
        force_refresh: bool,

        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Get an app-only token with the configured client credential
    AppToken {
        /// Scopes to request (comma-separated)
        #[arg(short, long)]
        scopes: Option<String>,

        /// Ignore the cached access token
        #[arg(long)]
        skip_cache: bool,

        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Build an authorization URL with a fresh PKCE pair
    AuthUrl {
        /// Scopes to request (comma-separated)
        #[arg(short, long)]
        scopes: Option<String>,

        /// One of login, select_account, consent, none
        #[arg(short, long)]
        prompt: Option<String>,

        #[arg(long)]
        login_hint: Option<String>,
    },

    /// Redeem an authorization code
    Redeem {
        /// Authorization code, or the full redirect query/fragment
        code: String,

        /// PKCE verifier printed by `auth-url`
        #[arg(long)]
        verifier: String,

        /// State printed by `auth-url`; required when passing a redirect response
        #[arg(long)]
        state: Option<String>,

        /// Scopes to request (comma-separated)
        #[arg(short, long)]
        scopes: Option<String>,
    },

    /// List cached accounts
    Accounts {
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Remove an account and every token it owns
    RemoveAccount {
        /// Username or home account id
        account: String,
    },

    /// Sign out: forget cached accounts and print the logout URL
    Logout {
        /// Username or home account id; every account when omitted
        #[arg(short, long)]
        account: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(cache) = cli.cache {
        config.cache_path = Some(cache);
    }
    init_logging(&config, cli.verbose);
    debug!(config = ?config.config_path, "Loaded configuration");

    let base = build_client(&config)?;

    match cli.command {
        Commands::Login { scopes, timeout } => {
            login(&base, config.scopes_or_default(scopes.as_deref()), timeout).await
        }
        Commands::Token { account, scopes, force_refresh, format } => {
            let scopes = config.scopes_or_default(scopes.as_deref());
            get_token(&base, account.as_deref(), scopes, force_refresh, format).await
        }
        Commands::AppToken { scopes, skip_cache, format } => {
            app_token(&base, config.scopes_or_default(scopes.as_deref()), skip_cache, format).await
        }
        Commands::AuthUrl { scopes, prompt, login_hint } => {
            let scopes = config.scopes_or_default(scopes.as_deref());
            auth_url(&base, scopes, prompt, login_hint).await
        }
        Commands::Redeem { code, verifier, state, scopes } => {
            let scopes = config.scopes_or_default(scopes.as_deref());
            redeem(&base, &code, verifier, state.as_deref(), scopes).await
        }
        Commands::Accounts { format } => list_accounts(&base, format).await,
        Commands::RemoveAccount { account } => remove_account(&base, &account).await,
        Commands::Logout { account } => logout(&base, account.as_deref()).await,
    }
}

fn init_logging(config: &CliConfig, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn build_client(config: &CliConfig) -> Result<BaseClient> {
    let cache_path = config.cache_path()?;
    let store = FileStore::open(cache_path.clone())
        .with_context(|| format!("Failed to open token cache at {:?}", cache_path))?;
    debug!(cache = ?cache_path, "Opened token cache");

    BaseClient::with_storage(config.client.clone(), Arc::new(store))
        .context("Invalid client configuration")
}

fn require_scopes(scopes: &[String]) -> Result<()> {
    if scopes.is_empty() {
        bail!("No scopes given; pass --scopes or set default_scopes in the configuration");
    }
    Ok(())
}

async fn login(base: &BaseClient, scopes: Vec<String>, timeout: Option<u64>) -> Result<()> {
    require_scopes(&scopes)?;
    let client = DeviceCodeClient::new(base.clone());
    let request = DeviceCodeRequest {
        scopes,
        timeout_seconds: timeout,
        ..Default::default()
    };

    let cancellation = request.cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancellation.cancel();
        }
    });

    let result = client
        .acquire_token(&request, |code| {
            if code.message.is_empty() {
                eprintln!(
                    "To sign in, open {} and enter the code {}",
                    code.verification_uri, code.user_code
                );
            } else {
                eprintln!("{}", code.message);
            }
        })
        .await
        .context("Device code sign-in failed")?;

    match &result.account {
        Some(account) => println!("Signed in as {}", account.username),
        None => println!("Signed in"),
    }
    Ok(())
}

async fn get_token(
    base: &BaseClient,
    account: Option<&str>,
    scopes: Vec<String>,
    force_refresh: bool,
    format: OutputFormat,
) -> Result<()> {
    require_scopes(&scopes)?;
    let account = find_account(base, account).await?;
    let mut request = SilentFlowRequest::new(scopes, account);
    request.force_refresh = force_refresh;

    let result = SilentFlowClient::new(base.clone())
        .acquire_token(&request)
        .await
        .context("Failed to acquire token silently")?;
    print_token(&result, format)
}

async fn app_token(
    base: &BaseClient,
    scopes: Vec<String>,
    skip_cache: bool,
    format: OutputFormat,
) -> Result<()> {
    require_scopes(&scopes)?;
    let request = ClientCredentialRequest {
        scopes,
        skip_cache,
        ..Default::default()
    };
    let result = ClientCredentialClient::new(base.clone())
        .acquire_token(&request)
        .await
        .context("Failed to acquire app token")?;
    print_token(&result, format)
}

async fn auth_url(
    base: &BaseClient,
    scopes: Vec<String>,
    prompt: Option<String>,
    login_hint: Option<String>,
) -> Result<()> {
    require_scopes(&scopes)?;
    let pkce = DefaultCrypto.generate_pkce_codes();
    let request = AuthorizationUrlRequest {
        code_challenge: Some(pkce.challenge),
        code_challenge_method: Some(PKCE_METHOD_S256.to_string()),
        prompt,
        login_hint,
        ..AuthorizationUrlRequest::new(scopes)
    };

    let url = AuthorizationCodeClient::new(base.clone())
        .get_auth_code_url(&request)
        .await
        .context("Failed to build authorization URL")?;

    println!("{}", url.url);
    eprintln!();
    eprintln!("state:    {}", url.state);
    eprintln!("verifier: {}", pkce.verifier);
    Ok(())
}

async fn redeem(
    base: &BaseClient,
    code_or_response: &str,
    verifier: String,
    state: Option<&str>,
    scopes: Vec<String>,
) -> Result<()> {
    require_scopes(&scopes)?;
    let client = AuthorizationCodeClient::new(base.clone());

    let code = if code_or_response.contains("code=") || code_or_response.contains("error=") {
        let state = state.context("--state is required to validate a redirect response")?;
        client
            .handle_fragment_response(code_or_response, state)
            .context("Redirect response rejected")?
    } else {
        code_or_response.to_string()
    };

    let request = AuthorizationCodeRequest {
        scopes,
        code,
        code_verifier: Some(verifier),
        ..Default::default()
    };
    let result = client
        .acquire_token(&request)
        .await
        .context("Failed to redeem authorization code")?;

    match &result.account {
        Some(account) => println!("Signed in as {}", account.username),
        None => println!("Code redeemed"),
    }
    Ok(())
}

async fn list_accounts(base: &BaseClient, format: OutputFormat) -> Result<()> {
    let accounts = base
        .cache()
        .get_all_accounts()
        .await
        .context("Failed to read accounts")?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&accounts)?),
        OutputFormat::Text if accounts.is_empty() => println!("No accounts cached"),
        OutputFormat::Text => {
            for account in &accounts {
                println!(
                    "{}  {}  ({})",
                    account.username, account.home_account_id, account.environment
                );
            }
        }
    }
    Ok(())
}

async fn remove_account(base: &BaseClient, selector: &str) -> Result<()> {
    let account = find_account(base, Some(selector)).await?;
    base.cache()
        .remove_account(&account.cache_key())
        .await
        .with_context(|| format!("Failed to remove account {}", account.username))?;

    info!(account = %account.home_account_id, "Removed account");
    println!("Removed {}", account.username);
    Ok(())
}

async fn logout(base: &BaseClient, selector: Option<&str>) -> Result<()> {
    let account = match selector {
        Some(selector) => Some(find_account(base, Some(selector)).await?),
        None => None,
    };
    let request = EndSessionRequest {
        account,
        ..Default::default()
    };

    let url = AuthorizationCodeClient::new(base.clone())
        .get_logout_uri(&request)
        .await
        .context("Failed to sign out")?;
    println!("{}", url);
    Ok(())
}

/// Resolve an account by username or home account id.
///
/// Without a selector the cache must hold exactly one account.
async fn find_account(base: &BaseClient, selector: Option<&str>) -> Result<AccountInfo> {
    let accounts = base
        .cache()
        .get_all_accounts()
        .await
        .context("Failed to read accounts")?;

    let mut matches: Vec<AccountInfo> = match selector {
        Some(selector) => accounts
            .into_iter()
            .filter(|a| {
                a.username.eq_ignore_ascii_case(selector)
                    || a.home_account_id.eq_ignore_ascii_case(selector)
            })
            .collect(),
        None => accounts,
    };

    match (matches.len(), selector) {
        (1, _) => Ok(matches.remove(0)),
        (0, Some(selector)) => bail!("No cached account matches {}", selector),
        (0, None) => bail!("No accounts cached; run `credforge login` first"),
        (_, _) => bail!("Several accounts are cached; choose one with --account"),
    }
}

fn print_token(result: &AuthenticationResult, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => println!("{}", result.access_token.expose()),
        OutputFormat::Json => {
            let output = json!({
                "access_token": result.access_token.expose(),
                "token_type": result.token_type,
                "expires_on": result.expires_on.map(|t| t.to_rfc3339()),
                "scopes": result.scopes,
                "from_cache": result.from_cache,
                "account": result.account.as_ref().map(|a| a.username.clone()),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_token_command() {
        let cli = Cli::try_parse_from([
            "credforge",
            "--cache",
            "/tmp/cache.json",
            "token",
            "--account",
            "user@contoso.com",
            "--scopes",
            "User.Read,Mail.Read",
            "--format",
            "json",
        ])
        .unwrap();

        assert_eq!(cli.cache, Some(PathBuf::from("/tmp/cache.json")));
        match cli.command {
            Commands::Token { account, scopes, force_refresh, format } => {
                assert_eq!(account.as_deref(), Some("user@contoso.com"));
                assert_eq!(split_scopes(&scopes.unwrap()), vec!["User.Read", "Mail.Read"]);
                assert!(!force_refresh);
                assert!(matches!(format, OutputFormat::Json));
            }
            _ => panic!("expected token command"),
        }
    }

    #[test]
    fn test_cli_requires_account_for_removal() {
        assert!(Cli::try_parse_from(["credforge", "remove-account"]).is_err());
    }

    #[test]
    fn test_require_scopes() {
        assert!(require_scopes(&[]).is_err());
        assert!(require_scopes(&["User.Read".to_string()]).is_ok());
    }
}
