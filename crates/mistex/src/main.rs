mod cli;
mod error;
mod server;

use std::sync::Arc;

use clap::Parser;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mistex_api::MistClient;
use mistex_config::Config;
use mistex_core::{CoreError, Exporter, MetricSink, OrgClient, PrometheusSink, SiteFilter};

use crate::cli::{Cli, LogFormat};
use crate::error::CliError;
use crate::server::AppState;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(&cli);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match cli.log_format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = mistex_config::load(&cli.config).map_err(|source| CliError::Config {
        path: cli.config.display().to_string(),
        source,
    })?;
    let config_yaml: Arc<str> = config.redacted_yaml()?.into();

    if cli.check_config {
        print!("{config_yaml}");
        return Ok(());
    }

    let client = build_client(&config)?;
    let org_id = resolve_org_id(&client, config.org_id.as_deref()).await?;
    info!(org_id = %org_id, base_url = %client.base_url(), "exporting organization");

    let filter = SiteFilter::new(
        &config.collector.site_filter.include,
        &config.collector.site_filter.exclude,
    )
    .map_err(|e| CliError::Validation {
        field: "collector.site_filter".into(),
        reason: e.to_string(),
    })?;
    let sink = Arc::new(PrometheusSink::new()?);
    let exporter = Exporter::new(
        config.exporter_config(org_id.clone()),
        Arc::new(OrgClient::new(client, org_id)),
        Arc::new(filter),
        Arc::clone(&sink) as Arc<dyn MetricSink>,
    );

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let mut driver = tokio::spawn({
        let exporter = exporter.clone();
        let cancel = cancel.clone();
        async move { exporter.run(cancel).await }
    });

    let ready = tokio::select! {
        () = exporter.ready() => true,
        () = cancel.cancelled() => false,
        joined = &mut driver => return driver_outcome(joined),
    };
    if !ready {
        return join_driver(driver).await;
    }

    let addr = config.listen_addr();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(source) => {
            cancel.cancel();
            join_driver(driver).await?;
            return Err(CliError::Bind { addr, source });
        }
    };
    info!(addr = %listener.local_addr()?, "serving metrics");

    let state = AppState {
        exporter,
        sink,
        config_yaml,
    };
    let shutdown = cancel.clone();
    let served = axum::serve(listener, server::router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await;

    // The server can only stop on its own by failing.
    cancel.cancel();
    let ran = join_driver(driver).await;
    served?;
    ran?;
    info!("shutdown complete");
    Ok(())
}

fn build_client(config: &Config) -> Result<MistClient, CliError> {
    let api_key = config.api_key().cloned().ok_or_else(|| CliError::Validation {
        field: "mist_api.api_key".into(),
        reason: "must be set".into(),
    })?;
    Ok(MistClient::new(
        config.base_url()?,
        api_key,
        config.websocket_url()?,
        &config.transport_config(),
    )?)
}

/// Use the configured organization, or the single one the token can see.
async fn resolve_org_id(client: &MistClient, configured: Option<&str>) -> Result<String, CliError> {
    if let Some(id) = configured {
        return Ok(id.to_owned());
    }
    let me = client.get_self().await?;
    match me.org_ids().as_slice() {
        [only] => Ok((*only).to_owned()),
        ids => Err(CliError::Organization { found: ids.len() }),
    }
}

async fn join_driver(driver: JoinHandle<Result<(), CoreError>>) -> Result<(), CliError> {
    driver_outcome(driver.await)
}

fn driver_outcome(
    joined: Result<Result<(), CoreError>, tokio::task::JoinError>,
) -> Result<(), CliError> {
    match joined {
        Ok(outcome) => outcome.map_err(CliError::from),
        Err(e) => Err(CliError::Internal(format!("exporter task failed: {e}"))),
    }
}

/// Cancel `token` on SIGINT or SIGTERM.
async fn cancel_on_signal(token: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
    token.cancel();
}
