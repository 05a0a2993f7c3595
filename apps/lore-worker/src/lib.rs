pub mod chunking;
pub mod worker;

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
	version = lore_cli::VERSION,
	rename_all = "kebab",
	styles = lore_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: std::path::PathBuf,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = lore_config::load(&args.config)?;
	let filter =
		EnvFilter::try_new(&config.service.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
	tracing_subscriber::fmt().with_env_filter(filter).init();

	let db = lore_storage::db::Db::connect(&config.storage.postgres).await?;
	db.ensure_schema(config.providers.embedding.dimensions).await?;

	let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

	tokio::spawn(async move {
		if let Err(err) = tokio::signal::ctrl_c().await {
			tracing::error!(error = %err, "Failed to listen for shutdown signal.");

			return;
		}

		tracing::warn!("Shutdown signal received.");

		let _ = shutdown_tx.send(true);
	});

	let state = worker::WorkerState { db, config };

	worker::run_worker(state, shutdown_rx).await
}
