use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use dialoguer::Password;
use reqwest::Method;

use octane_client::auth::{CredentialPair, TokenKind};
use octane_client::config::{CliArgs, Config};
use octane_client::endpoints::fill_template;
use octane_client::OctaneApi;

#[derive(Parser, Debug)]
#[command(name = "octane-client")]
#[command(version, about = "Resilient API client with token renewal and endpoint registry")]
struct Cli {
    #[command(flatten)]
    config: CliArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the URL for an endpoint path (e.g. v1.brands.single)
    Resolve {
        path: String,

        /// Path parameter as key=value
        #[arg(short = 'p', long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,
    },

    /// Print the merged endpoint tree
    Endpoints {
        /// One `path url` line per endpoint instead of JSON
        #[arg(long)]
        flat: bool,
    },

    /// Drop the cached endpoints and fetch them again
    RefreshEndpoints,

    /// Manage stored credentials
    Tokens {
        #[command(subcommand)]
        action: TokenAction,
    },

    /// Send an authenticated request
    Call {
        /// HTTP method
        method: String,

        /// Endpoint path (v1.brands.single) or literal path (/api/v1/brands/:id)
        path: String,

        /// Path parameter as key=value
        #[arg(short = 'p', long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,

        /// Query parameter as key=value
        #[arg(short = 'q', long = "query", value_parser = parse_key_val)]
        query: Vec<(String, String)>,

        /// JSON request body
        #[arg(short = 'd', long)]
        data: Option<String>,
    },

    /// Check API health
    Health,

    /// Show the current user
    Whoami,
}

#[derive(Subcommand, Debug)]
enum TokenAction {
    /// Store tokens (prompts for anything not given)
    Set {
        #[arg(long, env = "ACCESS_TOKEN")]
        access_token: Option<String>,

        #[arg(long, env = "REFRESH_TOKEN")]
        refresh_token: Option<String>,
    },

    /// Remove stored tokens
    Clear,

    /// Show whether tokens are stored
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::from_args(cli.config)?;
    init_logging(&config);
    config.validate()?;

    tracing::debug!(
        base_url = %config.base_url,
        storage = ?config.storage_file,
        "Configuration loaded"
    );

    let api = OctaneApi::from_config(config)?;

    match cli.command {
        Command::Resolve { path, params } => {
            api.initialize().await;
            let url = api
                .endpoints()
                .resolve_with_params(&path, params.iter().map(|(k, v)| (k, v)))?;
            println!("{}", url);
        }

        Command::Endpoints { flat } => {
            api.initialize().await;
            print_tree(&api, flat)?;
        }

        Command::RefreshEndpoints => {
            api.endpoints().refresh().await;
            print_tree(&api, true)?;
        }

        Command::Tokens { action } => run_tokens(&api, action)?,

        Command::Call {
            method,
            path,
            params,
            query,
            data,
        } => {
            api.initialize().await;
            run_call(&api, &method, &path, &params, &query, data).await?;
        }

        Command::Health => {
            api.initialize().await;
            let health = api.health().await?;
            println!("{}", serde_json::to_string_pretty(&health)?);
        }

        Command::Whoami => {
            api.initialize().await;
            let user = api.current_user().await?;
            println!("{}", serde_json::to_string_pretty(&user)?);
        }
    }

    tracing::debug!(metrics = ?api.metrics().snapshot(), "Transport metrics");
    Ok(())
}

/// Initialize logging; RUST_LOG overrides the configured level
fn init_logging(config: &Config) {
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false);

    if config.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_tree(api: &OctaneApi, flat: bool) -> Result<()> {
    let tree = api.endpoints().all();
    if flat {
        for (path, url) in tree.flatten() {
            println!("{:<28} {}", path, url);
        }
    } else {
        println!("{}", serde_json::to_string_pretty(&tree)?);
    }
    Ok(())
}

fn run_tokens(api: &OctaneApi, action: TokenAction) -> Result<()> {
    let tokens = api.tokens();

    match action {
        TokenAction::Set {
            access_token,
            refresh_token,
        } => {
            let access_token = match access_token {
                Some(token) => token,
                None => Password::new()
                    .with_prompt("Access token")
                    .interact()
                    .context("Failed to read access token")?,
            };
            let refresh_token = match refresh_token {
                Some(token) => token,
                None => Password::new()
                    .with_prompt("Refresh token (leave empty to keep the current one)")
                    .allow_empty_password(true)
                    .interact()
                    .context("Failed to read refresh token")?,
            };

            tokens.set(&CredentialPair {
                access_token: Some(access_token),
                refresh_token: Some(refresh_token),
            });

            if api.storage().is_none() {
                anyhow::bail!("Client storage is unavailable, tokens were not saved");
            }
            println!("Tokens stored");
        }

        TokenAction::Clear => {
            tokens.clear();
            println!("Tokens cleared");
        }

        TokenAction::Status => {
            let mark = |kind: TokenKind| if tokens.get(kind).is_some() { "present" } else { "absent" };
            println!("Access token:  {}", mark(TokenKind::Access));
            println!("Refresh token: {}", mark(TokenKind::Refresh));
            println!("Authenticated: {}", tokens.is_authenticated());
        }
    }

    Ok(())
}

async fn run_call(
    api: &OctaneApi,
    method: &str,
    path: &str,
    params: &[(String, String)],
    query: &[(String, String)],
    data: Option<String>,
) -> Result<()> {
    let method = Method::from_bytes(method.to_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method: {}", method))?;

    let url = if path.starts_with('/') || path.starts_with("http://") || path.starts_with("https://")
    {
        fill_template(path, params.iter().map(|(k, v)| (k, v)))
    } else {
        api.endpoints()
            .resolve_with_params(path, params.iter().map(|(k, v)| (k, v)))?
    };

    let client = api.client();
    let mut builder = client.request(method, &url);
    if !query.is_empty() {
        builder = builder.query(query);
    }
    if let Some(data) = data {
        let body: serde_json::Value =
            serde_json::from_str(&data).context("--data must be valid JSON")?;
        builder = builder.body(Bytes::from(serde_json::to_vec(&body)?));
    }

    let response = client.send(builder).await?;
    let status = response.status();
    let text = response.text().await.context("Failed to read response body")?;

    eprintln!("{}", status);
    match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) if text.is_empty() => {}
        Err(_) => println!("{}", text),
    }

    Ok(())
}

/// Parse a key=value argument
fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    if key.is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}
