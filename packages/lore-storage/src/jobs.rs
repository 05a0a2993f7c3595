use serde_json::Value;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{Result, db::Db, models::EmbeddingJob};

pub async fn enqueue(
	db: &Db,
	post_id: i64,
	embed_title: bool,
	embed_content: bool,
) -> Result<Uuid> {
	let job_id = Uuid::new_v4();

	sqlx::query(
		"INSERT INTO embedding_jobs (job_id, post_id, embed_title, embed_content, status) \
         VALUES ($1, $2, $3, $4, 'PENDING')",
	)
	.bind(job_id)
	.bind(post_id)
	.bind(embed_title)
	.bind(embed_content)
	.execute(&db.pool)
	.await?;

	Ok(job_id)
}

/// Claims the oldest due job and leases it so a second worker process skips
/// it while it is being handled. `FOR UPDATE SKIP LOCKED` keeps concurrent
/// claimers from blocking on each other.
pub async fn claim_next(
	db: &Db,
	now: OffsetDateTime,
	lease_seconds: i64,
) -> Result<Option<EmbeddingJob>> {
	let mut tx = db.pool.begin().await?;
	let row: Option<EmbeddingJob> = sqlx::query_as(
		"SELECT * FROM embedding_jobs \
         WHERE status IN ('PENDING', 'FAILED') AND available_at <= $1 \
         ORDER BY available_at ASC \
         LIMIT 1 \
         FOR UPDATE SKIP LOCKED",
	)
	.bind(now)
	.fetch_optional(&mut *tx)
	.await?;

	let job = if let Some(mut job) = row {
		let lease_until = now + Duration::seconds(lease_seconds);

		sqlx::query(
			"UPDATE embedding_jobs SET available_at = $1, updated_at = $2 WHERE job_id = $3",
		)
		.bind(lease_until)
		.bind(now)
		.bind(job.job_id)
		.execute(&mut *tx)
		.await?;

		job.available_at = lease_until;
		job.updated_at = now;

		Some(job)
	} else {
		None
	};

	tx.commit().await?;

	Ok(job)
}

pub async fn mark_done(db: &Db, job_id: Uuid) -> Result<()> {
	sqlx::query("UPDATE embedding_jobs SET status = 'DONE', updated_at = now() WHERE job_id = $1")
		.bind(job_id)
		.execute(&db.pool)
		.await?;

	Ok(())
}

pub async fn mark_failed(
	db: &Db,
	job_id: Uuid,
	attempts: i32,
	error: &str,
	available_at: OffsetDateTime,
) -> Result<()> {
	sqlx::query(
		"UPDATE embedding_jobs \
         SET status = 'FAILED', attempts = $1, last_error = $2, available_at = $3, \
             updated_at = now() \
         WHERE job_id = $4",
	)
	.bind(attempts)
	.bind(error)
	.bind(available_at)
	.bind(job_id)
	.execute(&db.pool)
	.await?;

	Ok(())
}

/// Retires an exhausted job into the dead-letter table. The payload keeps
/// enough to replay the job by hand.
pub async fn dead_letter(db: &Db, job: &EmbeddingJob, error: &str) -> Result<()> {
	let payload: Value = serde_json::json!({
		"job_id": job.job_id,
		"post_id": job.post_id,
		"embed_title": job.embed_title,
		"embed_content": job.embed_content,
		"attempts": job.attempts,
		"last_error": error,
	});
	let mut tx = db.pool.begin().await?;

	sqlx::query("INSERT INTO embedding_dead_letters (id, payload) VALUES ($1, $2)")
		.bind(Uuid::new_v4())
		.bind(payload)
		.execute(&mut *tx)
		.await?;
	sqlx::query("DELETE FROM embedding_jobs WHERE job_id = $1")
		.bind(job.job_id)
		.execute(&mut *tx)
		.await?;

	tx.commit().await?;

	Ok(())
}
