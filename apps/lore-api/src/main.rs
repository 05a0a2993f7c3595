use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	lore_api::run(lore_api::Args::parse()).await
}
