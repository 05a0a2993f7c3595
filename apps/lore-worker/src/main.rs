use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	lore_worker::run(lore_worker::Args::parse()).await
}
