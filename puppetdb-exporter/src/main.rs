/**
 * PUPPETDB EXPORTER - Point d'entrée principal
 *
 * RÔLE : Bootstrap : config, logging, client PuppetDB, scheduler, HTTP.
 * Toute erreur de configuration est fatale ici, avant le premier cycle.
 *
 * MODES : intervalle > 0 = boucle de fond ; intervalle = 0 = un cycle par scrape.
 *
 * PRIORITÉ CONFIG : flags CLI > variables d'env (.env compris) > exporter.yaml > défauts.
 */

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use puppetdb_exporter::config::{load_config, CliArgs, LogFormat};
use puppetdb_exporter::exposition::BuildInfo;
use puppetdb_exporter::http::{build_router, AppState};
use puppetdb_exporter::{Aggregator, PuppetDbClient, Scheduler};

fn log_build_info(build: &BuildInfo) {
    info!(
        version = build.version,
        commit = build.commit_sha,
        build_date = build.build_date,
        rustc = build.rustc_version,
        "PuppetDB Metrics Exporter"
    );
}

fn init_logging(debug: bool, format: LogFormat) {
    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    let build = BuildInfo::current();

    // --version : ligne de build puis sortie
    if args.show_version {
        init_logging(args.debug, args.early_log_format());
        log_build_info(&build);
        return Ok(());
    }

    // .env optionnel
    dotenvy::dotenv().ok();

    let settings = load_config(&args)
        .and_then(|config| config.validate())
        .context("invalid configuration")?;
    init_logging(settings.debug, settings.log_format);

    log_build_info(&build);
    if settings.debug {
        tracing::debug!("Enabling debug output");
    }

    let client = PuppetDbClient::new(settings.puppetdb.clone())
        .context("failed to initialize PuppetDB client")?;
    let aggregator = Aggregator::new(settings.categories.clone(), settings.unreported_threshold);
    let scheduler = Arc::new(
        Scheduler::new(aggregator, Arc::new(client), settings.scrape_mode)
            .keep_snapshot_on_outage(settings.keep_snapshot_on_outage),
    );
    let _background = scheduler.spawn();
    info!(mode = ?settings.scrape_mode, "scheduler ready");

    let app = build_router(AppState {
        scheduler,
        build,
        telemetry_path: settings.telemetry_path.clone(),
    });

    let listener = TcpListener::bind(settings.listen_address)
        .await
        .with_context(|| format!("failed to bind {}", settings.listen_address))?;
    info!("Providing metrics at {}{}", settings.listen_address, settings.telemetry_path);
    axum::serve(listener, app).await.context("HTTP server failed")?;
    Ok(())
}
