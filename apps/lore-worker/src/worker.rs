use std::time::Duration as StdDuration;

use color_eyre::{Result, eyre};
use lore_providers::embedding;
use lore_storage::{
	conversations, db::Db, jobs, models::EmbeddingJob, posts,
};
use time::{Duration, OffsetDateTime};
use tokio::sync::watch;

use crate::chunking;

/// Linear backoff cap: never wait more than six base intervals.
const BACKOFF_CAP_FACTOR: i64 = 6;

pub struct WorkerState {
	pub db: Db,
	pub config: lore_config::Config,
}

/// Consumer loop: one job at a time per process. Horizontal scale-out is
/// more processes against the same table, never in-process concurrency, so
/// two workers cannot interleave writes to one post's vectors.
pub async fn run_worker(state: WorkerState, mut shutdown: watch::Receiver<bool>) -> Result<()> {
	tracing::info!(
		poll_interval_ms = state.config.worker.poll_interval_ms,
		max_retries = state.config.worker.max_retries,
		"Embedding worker started."
	);

	while !*shutdown.borrow() {
		let now = OffsetDateTime::now_utc();
		let claimed =
			jobs::claim_next(&state.db, now, state.config.worker.claim_lease_seconds).await;

		match claimed {
			Ok(Some(job)) => {
				handle_job(&state, job).await;
			},
			Ok(None) => {
				let idle = StdDuration::from_millis(state.config.worker.poll_interval_ms);

				tokio::select! {
					_ = tokio::time::sleep(idle) => {},
					_ = shutdown.changed() => {},
				}
			},
			Err(err) => {
				// A single bad claim must not halt the loop.
				tracing::error!(error = %err, "Job claim failed.");

				let idle = StdDuration::from_millis(state.config.worker.poll_interval_ms);

				tokio::select! {
					_ = tokio::time::sleep(idle) => {},
					_ = shutdown.changed() => {},
				}
			},
		}
	}

	tracing::info!("Embedding worker stopped.");

	Ok(())
}

async fn handle_job(state: &WorkerState, job: EmbeddingJob) {
	tracing::info!(job_id = %job.job_id, post_id = job.post_id, attempt = job.attempts, "Job started.");

	match process_job(state, &job).await {
		Ok(()) => {
			if let Err(err) = jobs::mark_done(&state.db, job.job_id).await {
				tracing::error!(error = %err, job_id = %job.job_id, "Failed to mark job done.");
			} else {
				tracing::info!(job_id = %job.job_id, post_id = job.post_id, "Job succeeded.");
			}
		},
		Err(err) => {
			let next_attempt = job.attempts.saturating_add(1);

			if next_attempt < state.config.worker.max_retries {
				let backoff = backoff_for_attempt(
					state.config.worker.backoff_ms,
					i64::from(next_attempt),
				);
				let available_at = OffsetDateTime::now_utc() + backoff;

				tracing::warn!(
					error = %err,
					job_id = %job.job_id,
					attempt = next_attempt,
					"Job failed; will retry."
				);

				if let Err(err) = jobs::mark_failed(
					&state.db,
					job.job_id,
					next_attempt,
					&err.to_string(),
					available_at,
				)
				.await
				{
					tracing::error!(error = %err, job_id = %job.job_id, "Failed to record job failure.");
				}
			} else {
				tracing::error!(
					error = %err,
					job_id = %job.job_id,
					attempt = next_attempt,
					"Job exhausted retries; dead-lettering."
				);

				if let Err(err) = jobs::dead_letter(&state.db, &job, &err.to_string()).await {
					tracing::error!(error = %err, job_id = %job.job_id, "Failed to dead-letter job.");
				}
			}
		},
	}
}

async fn process_job(state: &WorkerState, job: &EmbeddingJob) -> Result<()> {
	if !job.embed_title && !job.embed_content {
		tracing::warn!(job_id = %job.job_id, post_id = job.post_id, "Job has no targets; skipping.");

		return Ok(());
	}

	let post = posts::find_post_by_id(&state.db.pool, job.post_id)
		.await?
		.ok_or_else(|| eyre::eyre!("Post {} not found.", job.post_id))?;
	let embedding_cfg = &state.config.providers.embedding;
	let mut refreshed = false;

	if job.embed_title {
		let title = post.title.trim();

		if title.is_empty() {
			tracing::warn!(post_id = post.id, "Post title is empty; skipping title embedding.");
		} else {
			let vectors = embedding::embed(embedding_cfg, &[title.to_string()]).await?;
			let vector = vectors
				.into_iter()
				.next()
				.ok_or_else(|| eyre::eyre!("Embedding provider returned no vectors."))?;

			validate_vector_dim(&vector, embedding_cfg.dimensions)?;
			posts::store_title_embedding(&state.db.pool, post.id, &vector).await?;

			refreshed = true;
		}
	}

	if job.embed_content {
		let content = post.content.trim();

		if content.is_empty() {
			tracing::warn!(post_id = post.id, "Post content is empty; skipping content embedding.");
		} else {
			let chunks = chunking::split_text(
				content,
				state.config.worker.chunk_max_chars as usize,
				state.config.worker.chunk_overlap_chars as usize,
			);

			if chunks.is_empty() {
				return Err(eyre::eyre!("Chunking produced no chunks for post {}.", post.id));
			}

			let vectors = embedding::embed(embedding_cfg, &chunks).await?;

			if vectors.len() != chunks.len() {
				return Err(eyre::eyre!(
					"Embedding provider returned {} vectors for {} chunks.",
					vectors.len(),
					chunks.len()
				));
			}

			for vector in &vectors {
				validate_vector_dim(vector, embedding_cfg.dimensions)?;
			}

			posts::replace_content_chunks(&state.db.pool, post.id, &chunks, &vectors).await?;

			refreshed = true;
		}
	}

	if refreshed {
		// Re-embedded content invalidates every cached answer for the owner;
		// stale answers must not replay.
		match conversations::delete_fingerprints_by_owner(
			&state.db.pool,
			&post.owner_user_id,
		)
		.await
		{
			Ok(removed) => {
				tracing::info!(
					owner_user_id = %post.owner_user_id,
					removed,
					"Invalidated cached answers."
				);
			},
			Err(err) => {
				tracing::error!(
					error = %err,
					owner_user_id = %post.owner_user_id,
					"Cached answer invalidation failed."
				);
			},
		}
	}

	Ok(())
}

fn validate_vector_dim(vec: &[f32], expected_dim: u32) -> Result<()> {
	if vec.len() != expected_dim as usize {
		return Err(eyre::eyre!(
			"Embedding dimension {} does not match configured dimensions {}.",
			vec.len(),
			expected_dim
		));
	}

	Ok(())
}

fn backoff_for_attempt(base_ms: i64, attempt: i64) -> Duration {
	let scaled = base_ms.saturating_mul(attempt.max(1));
	let capped = scaled.min(base_ms.saturating_mul(BACKOFF_CAP_FACTOR));

	Duration::milliseconds(capped)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn backoff_grows_linearly_then_caps() {
		assert_eq!(backoff_for_attempt(500, 1), Duration::milliseconds(500));
		assert_eq!(backoff_for_attempt(500, 3), Duration::milliseconds(1_500));
		assert_eq!(backoff_for_attempt(500, 10), Duration::milliseconds(3_000));
	}

	#[test]
	fn backoff_treats_non_positive_attempts_as_first() {
		assert_eq!(backoff_for_attempt(500, 0), Duration::milliseconds(500));
	}
}
