pub mod aggregate;
pub mod answer_cache;
pub mod ask;
pub mod hybrid;
pub mod plan;
pub mod semantic;

use std::{future::Future, pin::Pin, sync::Arc};

pub use aggregate::{PostHit, PostPage, aggregate_posts};
pub use answer_cache::{CacheCandidate, CacheDecision};
pub use ask::{AskRequest, AskResponse, CacheStatus, PostSearchRequest, SourceRef};
use lore_config::{ChatProviderConfig, Config, EmbeddingProviderConfig, LlmProviderConfig};
use lore_providers::{
	chat::{self, ChatMessage, ChatOptions},
	embedding,
	planner::{self, PlannerOutput, PlannerRequest},
};
use lore_storage::db::Db;
pub use plan::{PlanContext, PlanPair};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub type ServiceResult<T> = Result<T, ServiceError>;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait EmbeddingProvider
where
	Self: Send + Sync,
{
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, color_eyre::Result<Vec<Vec<f32>>>>;
}

pub trait PlannerProvider
where
	Self: Send + Sync,
{
	fn complete<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		req: PlannerRequest<'a>,
	) -> BoxFuture<'a, color_eyre::Result<PlannerOutput>>;
}

pub trait ChatProvider
where
	Self: Send + Sync,
{
	fn complete<'a>(
		&'a self,
		cfg: &'a ChatProviderConfig,
		messages: &'a [ChatMessage],
		options: &'a ChatOptions,
	) -> BoxFuture<'a, color_eyre::Result<String>>;
}

#[derive(Debug)]
pub enum ServiceError {
	InvalidRequest { message: String },
	NotFound { message: String },
	Provider { message: String },
	Storage { message: String },
	Cancelled,
}

impl std::fmt::Display for ServiceError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::InvalidRequest { message } => write!(f, "Invalid request: {message}"),
			Self::NotFound { message } => write!(f, "Not found: {message}"),
			Self::Provider { message } => write!(f, "Provider error: {message}"),
			Self::Storage { message } => write!(f, "Storage error: {message}"),
			Self::Cancelled => write!(f, "Request cancelled by the caller."),
		}
	}
}

impl std::error::Error for ServiceError {}

impl From<sqlx::Error> for ServiceError {
	fn from(err: sqlx::Error) -> Self {
		Self::Storage { message: err.to_string() }
	}
}

impl From<lore_storage::Error> for ServiceError {
	fn from(err: lore_storage::Error) -> Self {
		Self::Storage { message: err.to_string() }
	}
}

impl From<color_eyre::Report> for ServiceError {
	fn from(err: color_eyre::Report) -> Self {
		Self::Provider { message: err.to_string() }
	}
}

/// Where a retrieval runs: one owner's corpus (optionally narrowed to a
/// category) or every public post.
#[derive(Debug, Clone)]
pub enum SearchScope {
	Owner { owner_user_id: String, category_id: Option<i64> },
	Global,
}

/// One chunk-level result after retrieval (and fusion, on the hybrid path).
/// Produced fresh per request; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusedHit {
	pub post_id: i64,
	pub post_title: String,
	pub post_chunk: String,
	pub chunk_index: i32,
	pub similarity_score: f32,
	#[serde(with = "lore_domain::time_serde")]
	pub created_at: OffsetDateTime,
}

impl FusedHit {
	pub(crate) fn from_chunk(hit: lore_storage::models::ChunkHit) -> Self {
		Self {
			post_id: hit.post_id,
			post_title: hit.post_title,
			post_chunk: hit.post_chunk,
			chunk_index: hit.chunk_index,
			similarity_score: hit.score,
			created_at: hit.created_at,
		}
	}
}

/// Cooperative cancellation for a request-scoped task. `never()` is for
/// callers without a disconnect signal; transports that can observe one hand
/// the sender to their connection watcher.
#[derive(Debug, Clone)]
pub struct CancelToken {
	inner: Option<tokio::sync::watch::Receiver<bool>>,
}

impl CancelToken {
	pub fn never() -> Self {
		Self { inner: None }
	}

	pub fn channel() -> (tokio::sync::watch::Sender<bool>, Self) {
		let (tx, rx) = tokio::sync::watch::channel(false);

		(tx, Self { inner: Some(rx) })
	}

	pub fn is_cancelled(&self) -> bool {
		self.inner.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
	}

	/// Resolves when the caller goes away; pends forever for `never()`.
	pub async fn cancelled(&self) {
		match self.inner.clone() {
			Some(mut rx) => {
				if *rx.borrow() {
					return;
				}

				while rx.changed().await.is_ok() {
					if *rx.borrow() {
						return;
					}
				}

				// The sender dropped without signalling; treat as never.
				std::future::pending::<()>().await;
			},
			None => std::future::pending::<()>().await,
		}
	}
}

#[derive(Clone)]
pub struct Providers {
	pub embedding: Arc<dyn EmbeddingProvider>,
	pub planner: Arc<dyn PlannerProvider>,
	pub chat: Arc<dyn ChatProvider>,
}

struct DefaultProviders;

impl EmbeddingProvider for DefaultProviders {
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, color_eyre::Result<Vec<Vec<f32>>>> {
		Box::pin(embedding::embed(cfg, texts))
	}
}

impl PlannerProvider for DefaultProviders {
	fn complete<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		req: PlannerRequest<'a>,
	) -> BoxFuture<'a, color_eyre::Result<PlannerOutput>> {
		Box::pin(async move { planner::complete(cfg, &req).await })
	}
}

impl ChatProvider for DefaultProviders {
	fn complete<'a>(
		&'a self,
		cfg: &'a ChatProviderConfig,
		messages: &'a [ChatMessage],
		options: &'a ChatOptions,
	) -> BoxFuture<'a, color_eyre::Result<String>> {
		Box::pin(chat::complete(cfg, messages, options))
	}
}

impl Providers {
	pub fn new(
		embedding: Arc<dyn EmbeddingProvider>,
		planner: Arc<dyn PlannerProvider>,
		chat: Arc<dyn ChatProvider>,
	) -> Self {
		Self { embedding, planner, chat }
	}
}

impl Default for Providers {
	fn default() -> Self {
		let provider = Arc::new(DefaultProviders);

		Self { embedding: provider.clone(), planner: provider.clone(), chat: provider }
	}
}

pub struct LoreService {
	pub cfg: Config,
	pub db: Db,
	pub providers: Providers,
}

impl LoreService {
	pub fn new(cfg: Config, db: Db) -> Self {
		Self { cfg, db, providers: Providers::default() }
	}

	pub fn with_providers(cfg: Config, db: Db, providers: Providers) -> Self {
		Self { cfg, db, providers }
	}

	pub(crate) async fn embed_texts(&self, texts: &[String]) -> ServiceResult<Vec<Vec<f32>>> {
		let embeddings = self.providers.embedding.embed(&self.cfg.providers.embedding, texts).await?;

		if embeddings.len() != texts.len() {
			return Err(ServiceError::Provider {
				message: "Embedding provider returned mismatched vector count.".to_string(),
			});
		}

		for vector in &embeddings {
			if vector.len() != self.cfg.providers.embedding.dimensions as usize {
				return Err(ServiceError::Provider {
					message: "Embedding vector dimension mismatch.".to_string(),
				});
			}
		}

		Ok(embeddings)
	}

	pub(crate) async fn embed_single(&self, text: &str) -> ServiceResult<Vec<f32>> {
		let embeddings = self.embed_texts(std::slice::from_ref(&text.to_string())).await?;

		embeddings.into_iter().next().ok_or_else(|| ServiceError::Provider {
			message: "Embedding provider returned no vectors.".to_string(),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn never_token_is_never_cancelled() {
		let token = CancelToken::never();

		assert!(!token.is_cancelled());

		let raced = tokio::time::timeout(std::time::Duration::from_millis(20), token.cancelled());

		assert!(raced.await.is_err(), "never() must pend forever");
	}

	#[tokio::test]
	async fn channel_token_observes_disconnect() {
		let (tx, token) = CancelToken::channel();

		assert!(!token.is_cancelled());

		tx.send(true).expect("send cancellation");

		assert!(token.is_cancelled());

		tokio::time::timeout(std::time::Duration::from_millis(100), token.cancelled())
			.await
			.expect("cancelled() must resolve after the signal");
	}
}
