//! Group Authorization Plugin - Main Entry Point
//!
//! Prints `allow` when the login is permitted, nothing when it is denied,
//! and exits with status 1 on any error. Details only go to the log sink.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use group_authz::config::{DEFAULT_CACHE_PATH, DEFAULT_CONFIG_PATH, DEFAULT_LOG_PATH, parse_duration};
use group_authz::{
    CacheEngine, Decision, GoogleDirectory, PluginConfig, PluginError, Request,
    ServiceAccountKey, Verifier, cancel_pair, shutdown,
};
use rust_common::{HttpConfig, LogTarget, TracingConfig, init_tracing};
use tracing::{error, info, warn};

/// Plugin for opkssh to enable group-based authorization for Google Workspace.
#[derive(Debug, Parser)]
#[command(version, about, after_help = "Request variables are provided by opkssh.")]
struct Cli {
    /// Path to config
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Path to cache
    #[arg(long, default_value = DEFAULT_CACHE_PATH)]
    cache: PathBuf,

    /// Path to log, or `stdout` / `stderr`
    #[arg(long, default_value = DEFAULT_LOG_PATH)]
    log: LogTarget,

    /// Cache expiration (e.g. 90s, 15m, 1h30m)
    #[arg(long, default_value = "15m", value_parser = parse_duration)]
    expiration: Duration,

    /// Verbose logging (debug)
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Quiet logging (errors only)
    #[arg(short, long)]
    quiet: bool,

    /// Write log records as JSON lines
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    const fn log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            "info"
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut tracing_config = TracingConfig::default()
        .with_service_name(env!("CARGO_PKG_NAME"))
        .with_log_level(cli.log_level())
        .with_target(cli.log.clone());
    if cli.log_json {
        tracing_config = tracing_config.with_json_output();
    }
    if let Err(e) = init_tracing(&tracing_config) {
        eprintln!("failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run(&cli).await {
        Ok(Decision::Allow) => {
            let mut stdout = std::io::stdout().lock();
            if let Err(e) = writeln!(stdout, "allow").and_then(|()| stdout.flush()) {
                error!(error = %e, "failed to write decision");
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        Ok(Decision::Deny) => ExitCode::SUCCESS,
        Err(e) => {
            error!(code = e.code(), retryable = e.is_retryable(), error = %e, "authorization failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<Decision, PluginError> {
    let config = PluginConfig::load(&cli.config, cli.cache.clone(), cli.expiration)?;

    let key = ServiceAccountKey::load(config.key_file())?;
    let configured = &config.google.service_account.email;
    if !configured.is_empty() && *configured != key.client_email {
        warn!(
            configured = %configured,
            key = %key.client_email,
            "service account email differs from key file"
        );
    }

    let directory = GoogleDirectory::new(key, config.directory_url.clone(), &HttpConfig::default())?;
    let cache = CacheEngine::new(
        &config.cache,
        config.google.workspace.customer_id.clone(),
        Arc::new(directory),
    )?;

    let request = Request::from_env()?;

    let (handle, signal) = cancel_pair();
    let signals = shutdown::cancel_on_signal(handle);

    let verifier = Verifier::from_config(&config);
    let decision = verifier.verify(&cache, &request, &signal).await;
    signals.abort();

    let decision = decision?;
    info!(decision = decision.as_str(), principal = %request.principal, "authorization completed");
    Ok(decision)
}
