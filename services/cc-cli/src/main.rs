//! Cut chart CLI
//!
//! Single binary that:
//! 1. Resolves a usable access token (cache, refresh, or browser sign-in)
//! 2. Calls the cut chart API with it through the retry policy
//! 3. Prints product names or writes cut chart data to a file
//!
//! Exit codes: 0 success, 1 any failure, 130 interrupted.

mod args;
mod config;
mod error;
mod prompt;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use common::Secret;
use cutchart_api::ApiClient;
use cutchart_auth::{
    Confirm, DEFAULT_USER, FileCache, LoopbackOidcClient, Reachability, Sealing, Telemetry,
    TokenLifecycleManager, TracingTelemetry,
};
use tracing::{debug, error, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::args::{Cli, Command};
use crate::config::Config;
use crate::error::Error;

/// `--debug` turns on our crates only; dependencies stay at warn
const DEBUG_FILTER: &str =
    "cc_cli=debug,cutchart_auth=debug,cutchart_api=debug,retry_policy=debug,telemetry=debug,warn";

const DEFAULT_FILTER: &str = "warn";

/// Interrupted by SIGINT/SIGTERM
const EXIT_INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_tracing(cli.debug, cli.log_json);

    let work = tokio::spawn(run(cli));
    tokio::select! {
        joined = work => match joined {
            Ok(Ok(code)) => code,
            Ok(Err(e)) => {
                error!("{e:#}");
                ExitCode::FAILURE
            }
            Err(e) => {
                error!(error = %e, "command task failed");
                ExitCode::FAILURE
            }
        },
        _ = shutdown_signal() => {
            // Cache writes are atomic renames; nothing partial is left behind
            std::process::exit(EXIT_INTERRUPTED);
        }
    }
}

/// Logs go to stderr so stdout carries only command output.
///
/// Filter: `--debug`, else LOG_LEVEL, else RUST_LOG, else warn.
fn init_tracing(debug: bool, json: bool) {
    let filter = if debug {
        EnvFilter::new(DEBUG_FILTER)
    } else {
        EnvFilter::try_from_env("LOG_LEVEL")
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    };

    let json_layer = json.then(|| fmt::layer().json().with_writer(std::io::stderr));
    let text_layer = (!json).then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    if let Some(command) = &cli.command {
        command.validate().map_err(Error::Usage)?;
    } else if !cli.logout {
        Cli::command().print_help()?;
        return Ok(ExitCode::SUCCESS);
    }

    let config_path = Config::resolve_path(cli.config.as_deref());
    debug!(path = %config_path.display(), "loading configuration");
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let session_id = Uuid::new_v4().to_string();
    let telemetry: Arc<dyn Telemetry> = Arc::new(TracingTelemetry);
    telemetry.set_session(&session_id);
    telemetry.record_trace("telemetry initialized");

    let http = reqwest::Client::builder()
        .user_agent(concat!("cc-cli/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(config.api.timeout_secs))
        .build()
        .context("failed to build HTTP client")?;

    // One probe gates both sign-in and every API call
    let network: Arc<dyn Reachability> = Arc::new(config.probe()?);
    let manager = build_manager(&config, http.clone(), telemetry, network.clone(), cli.yes)?;

    if cli.logout {
        manager.logout(DEFAULT_USER).await.context("logout failed")?;
        eprintln!("Signed out.");
    }

    let Some(command) = cli.command else {
        return Ok(ExitCode::SUCCESS);
    };

    // An empty token has already been logged by the manager
    let token = manager.login(DEFAULT_USER).await.context("sign-in failed")?;
    if token.is_empty() {
        return Ok(ExitCode::FAILURE);
    }

    let client = ApiClient::new(http, &config.api.base_url, session_id, Secret::new(token))?
        .with_reachability(network);

    match command {
        Command::Products => {
            let names = client
                .product_names()
                .await
                .context("listing products failed")?;
            if names.is_empty() {
                return Err(Error::NoProducts.into());
            }
            for name in names {
                println!("{name}");
            }
        }
        Command::Cutchart {
            product,
            units,
            file_type,
            outfile,
        } => {
            let bytes = client
                .download_cut_chart(
                    product.as_deref(),
                    units.as_str(),
                    file_type.into(),
                    &outfile,
                )
                .await
                .with_context(|| {
                    format!("downloading cut chart data to {} failed", outfile.display())
                })?;
            eprintln!("Saved {} ({bytes} bytes).", outfile.display());
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Wire the lifecycle manager's collaborators from configuration.
fn build_manager(
    config: &Config,
    http: reqwest::Client,
    telemetry: Arc<dyn Telemetry>,
    network: Arc<dyn Reachability>,
    assume_yes: bool,
) -> Result<TokenLifecycleManager> {
    let sealing = Sealing::from_secrets(
        config.cache.password.as_ref(),
        config.cache.salt.as_ref(),
        config.cache.allow_plaintext,
    )?;
    let cache_path = config.cache_path()?;
    debug!(path = %cache_path.display(), "using credential cache");

    let cache = Arc::new(FileCache::new(cache_path, sealing));
    let oidc = Arc::new(
        LoopbackOidcClient::new(http, config.oidc_config()).with_browser(Arc::new(open_browser)),
    );
    let confirm: Confirm = if assume_yes {
        Arc::new(|_: &str| true)
    } else {
        Arc::new(prompt::confirm_on_terminal)
    };

    Ok(TokenLifecycleManager::new(
        cache, oidc, telemetry, network, confirm,
    ))
}

fn open_browser(url: &str) -> std::io::Result<()> {
    eprintln!("Opening a browser to sign in. If it does not open, visit:\n{url}");
    open::that(url)
}

/// Wait for SIGTERM or SIGINT.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => warn!("received SIGINT, abandoning in-flight work"),
        _ = terminate => warn!("received SIGTERM, abandoning in-flight work"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cutchart_auth::storage_key;

    fn plaintext_config(dir: &tempfile::TempDir) -> Config {
        let path = dir.path().join("cc-cli.toml");
        std::fs::write(
            &path,
            format!(
                r#"
[oidc]
authority = "http://127.0.0.1:9"
client_id = "cc-cli-test"

[cache]
path = "{}"
allow_plaintext = true
"#,
                dir.path().join("credentials.json").display()
            ),
        )
        .unwrap();
        Config::load(&path).unwrap()
    }

    #[tokio::test]
    async fn logout_through_wired_manager_writes_cache_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = plaintext_config(&dir);
        let manager = build_manager(
            &config,
            reqwest::Client::new(),
            Arc::new(TracingTelemetry),
            Arc::new(config.probe().unwrap()),
            true,
        )
        .unwrap();

        manager.logout(DEFAULT_USER).await.unwrap();
        manager.logout(DEFAULT_USER).await.unwrap();

        let contents = std::fs::read_to_string(config.cache_path().unwrap()).unwrap();
        assert!(!contents.contains(&storage_key(DEFAULT_USER)));
    }

    #[tokio::test]
    async fn login_without_network_yields_empty_token() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = plaintext_config(&dir);
        // Nothing listens on the discard port
        config.network.probe_addr = Some("127.0.0.1:9".into());
        config.network.probe_timeout_ms = 200;

        let manager = build_manager(
            &config,
            reqwest::Client::new(),
            Arc::new(TracingTelemetry),
            Arc::new(config.probe().unwrap()),
            true,
        )
        .unwrap();

        assert_eq!(manager.login(DEFAULT_USER).await.unwrap(), "");
        assert!(!config.cache_path().unwrap().exists(), "no cache mutation offline");
    }

    #[test]
    fn debug_filter_parses() {
        assert!(DEBUG_FILTER.parse::<EnvFilter>().is_ok());
        assert!(DEFAULT_FILTER.parse::<EnvFilter>().is_ok());
    }
}
