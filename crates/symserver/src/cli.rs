//! Command line entry point.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use structopt::StructOpt;

use crate::config::Config;
use crate::services::cache::DiskCache;
use crate::{endpoints, logging, metrics, services};

#[derive(Debug, StructOpt)]
#[structopt(name = "symserver", about = "A symbolication service for Breakpad crash stacks.")]
struct Cli {
    /// Path to the YAML configuration file.
    #[structopt(long = "config", short = "c", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Run the HTTP server.
    #[structopt(name = "run")]
    Run,

    /// Prune the symcache directory down to its configured size limit.
    #[structopt(name = "cleanup")]
    Cleanup,
}

pub fn execute() -> Result<()> {
    let cli = Cli::from_args();
    let config = Config::get(cli.config.as_deref())?;

    // keep the guard alive for the lifetime of the process
    let _sentry_guard = config.sentry_dsn.clone().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    logging::init_logging(&config);

    if let Some(statsd) = config.metrics.statsd.clone() {
        metrics::configure_statsd(
            &config.metrics.prefix,
            statsd.as_str(),
            config.metrics.hostname_tag.clone(),
        )?;
    }

    match cli.command {
        Command::Run => run_server(config),
        Command::Cleanup => cleanup_cache(config),
    }
}

fn run_server(config: Config) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads.unwrap_or_else(num_cpus::get))
        .enable_all()
        .build()
        .context("failed to create the tokio runtime")?;

    runtime.block_on(async {
        let service = services::create_service(&config)?;
        let app = endpoints::create_app(service);

        let addr: SocketAddr = config.bind.parse().context("invalid bind address")?;
        tracing::info!("Starting HTTP server on {}", addr);

        axum::Server::bind(&addr)
            .serve(app.into_make_service())
            .await
            .context("server failed")?;

        Ok(())
    })
}

fn cleanup_cache(config: Config) -> Result<()> {
    let cache = DiskCache::new(&config.cache_dir, config.max_cache_size)
        .context("failed to open the symcache directory")?;
    cache.enforce_size_limit();
    tracing::info!("Pruned symcache directory {}", config.cache_dir.display());
    Ok(())
}
