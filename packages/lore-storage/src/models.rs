use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Post {
	pub id: i64,
	pub owner_user_id: String,
	pub category_id: Option<i64>,
	pub title: String,
	pub content: String,
	pub is_public: bool,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}

/// One retrieved chunk. `score` is whatever the producing query measured:
/// weighted cosine similarity on the vector path, trigram similarity on the
/// lexical path.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChunkHit {
	pub post_id: i64,
	pub post_title: String,
	pub post_chunk: String,
	pub chunk_index: i32,
	pub score: f32,
	pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AskSession {
	pub id: i64,
	pub owner_user_id: String,
	pub requester_user_id: String,
	pub title: Option<String>,
	pub metadata: Value,
	pub last_question_at: Option<OffsetDateTime>,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AskMessage {
	pub id: i64,
	pub session_id: i64,
	pub role: String,
	pub content: String,
	pub search_plan: Option<Value>,
	pub retrieval_meta: Option<Value>,
	pub created_at: OffsetDateTime,
}

/// A cached-answer candidate: the stored fingerprint row joined with the
/// answer it resolves to and the plan/metadata captured alongside it.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FingerprintHit {
	pub message_id: i64,
	pub answer_message_id: i64,
	pub speech_tone_id: i32,
	pub similarity: f32,
	pub answer: String,
	pub search_plan: Option<Value>,
	pub retrieval_meta: Option<Value>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EmbeddingJob {
	pub job_id: Uuid,
	pub post_id: i64,
	pub embed_title: bool,
	pub embed_content: bool,
	pub status: String,
	pub attempts: i32,
	pub last_error: Option<String>,
	pub available_at: OffsetDateTime,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}
