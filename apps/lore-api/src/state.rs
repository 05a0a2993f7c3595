use std::sync::Arc;

use lore_service::LoreService;
use lore_storage::db::Db;

#[derive(Clone)]
pub struct AppState {
	pub service: Arc<LoreService>,
}
impl AppState {
	pub async fn new(config: lore_config::Config) -> color_eyre::Result<Self> {
		let db = Db::connect(&config.storage.postgres).await?;

		db.ensure_schema(config.providers.embedding.dimensions).await?;

		let service = LoreService::new(config, db);

		Ok(Self { service: Arc::new(service) })
	}

	/// Builds state without dialing Postgres; used by tests that only touch
	/// connectionless routes.
	pub fn new_lazy(config: lore_config::Config) -> color_eyre::Result<Self> {
		let db = Db::connect_lazy(&config.storage.postgres)?;
		let service = LoreService::new(config, db);

		Ok(Self { service: Arc::new(service) })
	}
}
