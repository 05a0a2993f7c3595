use serde_json::Value;
use sqlx::{PgPool, QueryBuilder};

use crate::{
	Result,
	db::Db,
	models::{AskMessage, AskSession, FingerprintHit},
	vector_literal,
};

#[derive(Debug, Clone)]
pub struct FingerprintScope<'a> {
	pub owner_user_id: &'a str,
	pub requester_user_id: &'a str,
	pub category_id: Option<i64>,
	pub post_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct PersistConversationArgs<'a> {
	pub session_id: i64,
	pub scope: FingerprintScope<'a>,
	pub question: &'a str,
	pub answer: &'a str,
	pub search_plan: Option<&'a Value>,
	pub retrieval_meta: Option<&'a Value>,
	pub speech_tone_id: i32,
	pub fingerprint: &'a [f32],
}

pub async fn create_session(
	pool: &PgPool,
	owner_user_id: &str,
	requester_user_id: &str,
	title: Option<&str>,
) -> Result<AskSession> {
	let session = sqlx::query_as(
		"INSERT INTO ask_sessions (owner_user_id, requester_user_id, title) \
         VALUES ($1, $2, $3) \
         RETURNING *",
	)
	.bind(owner_user_id)
	.bind(requester_user_id)
	.bind(title)
	.fetch_one(pool)
	.await?;

	Ok(session)
}

pub async fn find_session_for_requester(
	pool: &PgPool,
	session_id: i64,
	requester_user_id: &str,
) -> Result<Option<AskSession>> {
	let session =
		sqlx::query_as("SELECT * FROM ask_sessions WHERE id = $1 AND requester_user_id = $2")
			.bind(session_id)
			.bind(requester_user_id)
			.fetch_optional(pool)
			.await?;

	Ok(session)
}

/// Latest messages first; callers reverse when they need chronological order.
pub async fn recent_messages(
	pool: &PgPool,
	session_id: i64,
	limit: u32,
) -> Result<Vec<AskMessage>> {
	let messages = sqlx::query_as(
		"SELECT * FROM ask_messages WHERE session_id = $1 \
         ORDER BY created_at DESC, id DESC \
         LIMIT $2",
	)
	.bind(session_id)
	.bind(i64::from(limit))
	.fetch_all(pool)
	.await?;

	Ok(messages)
}

/// Writes the paired turn: user message, assistant message, fingerprint
/// embedding, and the session touch, all in one transaction. A fingerprint
/// must never exist without its answer message nor the other way around;
/// cache lookups resolve through this pairing.
pub async fn persist_conversation(db: &Db, args: PersistConversationArgs<'_>) -> Result<()> {
	let mut tx = db.pool.begin().await?;
	let question_id: i64 = sqlx::query_scalar(
		"INSERT INTO ask_messages (session_id, role, content, search_plan) \
         VALUES ($1, 'user', $2, $3) \
         RETURNING id",
	)
	.bind(args.session_id)
	.bind(args.question)
	.bind(args.search_plan)
	.fetch_one(&mut *tx)
	.await?;
	let answer_id: i64 = sqlx::query_scalar(
		"INSERT INTO ask_messages (session_id, role, content, retrieval_meta) \
         VALUES ($1, 'assistant', $2, $3) \
         RETURNING id",
	)
	.bind(args.session_id)
	.bind(args.answer)
	.bind(args.retrieval_meta)
	.fetch_one(&mut *tx)
	.await?;
	let vec_text = vector_literal(args.fingerprint);

	sqlx::query(
		"INSERT INTO ask_message_embeddings (\
             message_id, owner_user_id, requester_user_id, category_id, post_id, \
             answer_message_id, speech_tone_id, embedding\
         ) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8::text::vector) \
         ON CONFLICT (message_id) DO UPDATE \
         SET category_id = EXCLUDED.category_id, \
             post_id = EXCLUDED.post_id, \
             answer_message_id = EXCLUDED.answer_message_id, \
             speech_tone_id = EXCLUDED.speech_tone_id, \
             embedding = EXCLUDED.embedding, \
             updated_at = now()",
	)
	.bind(question_id)
	.bind(args.scope.owner_user_id)
	.bind(args.scope.requester_user_id)
	.bind(args.scope.category_id)
	.bind(args.scope.post_id)
	.bind(answer_id)
	.bind(args.speech_tone_id)
	.bind(vec_text)
	.execute(&mut *tx)
	.await?;

	sqlx::query(
		"UPDATE ask_sessions SET last_question_at = now(), updated_at = now() WHERE id = $1",
	)
	.bind(args.session_id)
	.execute(&mut *tx)
	.await?;

	tx.commit().await?;

	Ok(())
}

/// Nearest cached fingerprints in the same scope, each joined to the answer
/// it resolves to. Post-targeted questions only match other questions about
/// the same post; otherwise the category must match exactly (including both
/// being absent).
pub async fn find_cached_answers(
	pool: &PgPool,
	scope: &FingerprintScope<'_>,
	fingerprint: &[f32],
	limit: u32,
) -> Result<Vec<FingerprintHit>> {
	let vec_text = vector_literal(fingerprint);
	let mut builder = QueryBuilder::new(
		"SELECT e.message_id, e.answer_message_id, e.speech_tone_id, \
         (1 - (e.embedding <=> ",
	);

	builder.push_bind(vec_text.clone());
	builder.push(
		"::text::vector))::real AS similarity, \
         a.content AS answer, q.search_plan, a.retrieval_meta \
         FROM ask_message_embeddings e \
         JOIN ask_messages a ON a.id = e.answer_message_id \
         JOIN ask_messages q ON q.id = e.message_id \
         WHERE e.owner_user_id = ",
	);
	builder.push_bind(scope.owner_user_id.to_string());
	builder.push(" AND e.requester_user_id = ");
	builder.push_bind(scope.requester_user_id.to_string());

	match scope.post_id {
		Some(post_id) => {
			builder.push(" AND e.post_id = ");
			builder.push_bind(post_id);
		},
		None => {
			builder.push(" AND e.post_id IS NULL AND e.category_id IS NOT DISTINCT FROM ");
			builder.push_bind(scope.category_id);
		},
	}

	builder.push(" ORDER BY e.embedding <=> ");
	builder.push_bind(vec_text);
	builder.push("::text::vector LIMIT ");
	builder.push_bind(i64::from(limit));

	let rows = builder.build_query_as::<FingerprintHit>().fetch_all(pool).await?;

	Ok(rows)
}

/// Drops every cached answer for an owner. Called by the ingestion worker
/// after a post re-embeds; stale answers must not replay.
pub async fn delete_fingerprints_by_owner(pool: &PgPool, owner_user_id: &str) -> Result<u64> {
	let result = sqlx::query("DELETE FROM ask_message_embeddings WHERE owner_user_id = $1")
		.bind(owner_user_id)
		.execute(pool)
		.await?;

	Ok(result.rows_affected())
}
