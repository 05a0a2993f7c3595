//! End-to-end pipeline checks against a disposable Postgres database with
//! scripted providers. Requires pgvector and pg_trgm; gated on LORE_PG_DSN.

use std::{
	collections::HashMap,
	sync::{
		Arc, Mutex,
		atomic::{AtomicUsize, Ordering},
	},
};

use lore_config::{ChatProviderConfig, Config, EmbeddingProviderConfig, LlmProviderConfig};
use lore_domain::{NormalizedPlan, SearchPlan, normalize_plan};
use lore_providers::{
	chat::{ChatMessage, ChatOptions},
	planner::{PlannerOutput, PlannerRequest},
};
use lore_service::{
	AskRequest, BoxFuture, CacheStatus, CancelToken, ChatProvider, EmbeddingProvider, LoreService,
	PlannerProvider, Providers, SearchScope,
};
use lore_storage::db::Db;
use lore_testkit::TestDatabase;

const DIM: usize = 8;

fn test_config(dsn: &str) -> Config {
	let toml_text = format!(
		r#"
[service]
http_bind = "127.0.0.1:0"
log_level = "info"

[storage.postgres]
dsn = "{dsn}"
pool_max_conns = 2

[providers.embedding]
provider_id = "openai"
api_base = "https://unused.invalid"
api_key = "sk-test"
path = "/v1/embeddings"
model = "test-embed"
dimensions = 8
timeout_ms = 1000
default_headers = {{}}

[providers.planner]
provider_id = "openai"
api_base = "https://unused.invalid"
api_key = "sk-test"
path = "/v1/chat/completions"
model = "test-planner"
temperature = 0.0
timeout_ms = 1000
default_headers = {{}}

[providers.chat]
provider_id = "openai"
api_base = "https://unused.invalid"
api_key = "sk-test"
path = "/v1/chat/completions"
model = "test-chat"
temperature = 0.7
timeout_ms = 1000
default_headers = {{}}

[plan]
timezone_offset_minutes = 540
max_output_tokens = 1500
fallback_max_output_tokens = 700

[search]
default_threshold = 0.2
default_top_k = 5
per_post_cap = 2
global_overfetch_factor = 5

[search.rewrite]
min_confidence = 0.35
declarative_floor_balanced = 0.95
declarative_floor_semantic = 1.0

[answer_cache]
enabled = true
similarity_threshold = 0.93
candidate_limit = 3
min_length_ratio = 0.5
max_length_ratio = 1.5

[worker]
poll_interval_ms = 500
claim_lease_seconds = 30
max_retries = 5
backoff_ms = 2000
"#
	);

	toml::from_str(&toml_text).expect("test config should parse")
}

/// Embedding stub: known texts map to fixed vectors; everything else gets a
/// deterministic low-magnitude filler so unknown texts stay dissimilar.
struct MappedEmbedding {
	known: Mutex<HashMap<String, Vec<f32>>>,
}

impl MappedEmbedding {
	fn new(entries: Vec<(&str, Vec<f32>)>) -> Self {
		let known =
			entries.into_iter().map(|(text, vector)| (text.to_string(), vector)).collect();

		Self { known: Mutex::new(known) }
	}
}

impl EmbeddingProvider for MappedEmbedding {
	fn embed<'a>(
		&'a self,
		_cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, color_eyre::Result<Vec<Vec<f32>>>> {
		let known = self.known.lock().expect("embedding map lock");
		let vectors = texts
			.iter()
			.map(|text| {
				known.get(text).cloned().unwrap_or_else(|| {
					let mut vector = vec![0.0_f32; DIM];
					let seed = text.bytes().map(usize::from).sum::<usize>() % DIM;

					vector[seed] = 0.31;
					vector[(seed + 3) % DIM] = 0.95;

					vector
				})
			})
			.collect();

		Box::pin(async move { Ok(vectors) })
	}
}

struct FixedPlanner {
	plan: serde_json::Value,
}

impl PlannerProvider for FixedPlanner {
	fn complete<'a>(
		&'a self,
		_cfg: &'a LlmProviderConfig,
		_req: PlannerRequest<'a>,
	) -> BoxFuture<'a, color_eyre::Result<PlannerOutput>> {
		let plan = self.plan.clone();

		Box::pin(async move { Ok(PlannerOutput::Structured(plan)) })
	}
}

struct CountingChat {
	answer: String,
	calls: AtomicUsize,
}

impl CountingChat {
	fn new(answer: &str) -> Self {
		Self { answer: answer.to_string(), calls: AtomicUsize::new(0) }
	}

	fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}

impl ChatProvider for CountingChat {
	fn complete<'a>(
		&'a self,
		_cfg: &'a ChatProviderConfig,
		_messages: &'a [ChatMessage],
		_options: &'a ChatOptions,
	) -> BoxFuture<'a, color_eyre::Result<String>> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		let answer = self.answer.clone();

		Box::pin(async move { Ok(answer) })
	}
}

fn axis(index: usize, scale: f32) -> Vec<f32> {
	let mut vector = vec![0.0_f32; DIM];

	vector[index] = scale;

	vector
}

fn vector_text(vector: &[f32]) -> String {
	format!(
		"[{}]",
		vector.iter().map(|v| v.to_string()).collect::<Vec<String>>().join(",")
	)
}

async fn seed_post(
	db: &Db,
	post_id: i64,
	owner: &str,
	title: &str,
	chunks: &[(&str, Vec<f32>)],
	title_vector: Vec<f32>,
) {
	sqlx::query(
		"INSERT INTO posts (id, owner_user_id, title, content, is_public) \
         VALUES ($1, $2, $3, $4, FALSE)",
	)
	.bind(post_id)
	.bind(owner)
	.bind(title)
	.bind(chunks.iter().map(|(text, _)| *text).collect::<Vec<&str>>().join(" "))
	.execute(&db.pool)
	.await
	.expect("seed post");

	for (index, (text, vector)) in chunks.iter().enumerate() {
		sqlx::query(
			"INSERT INTO post_chunks (post_id, chunk_index, content, embedding) \
             VALUES ($1, $2, $3, $4::text::vector)",
		)
		.bind(post_id)
		.bind(index as i32)
		.bind(*text)
		.bind(vector_text(vector))
		.execute(&db.pool)
		.await
		.expect("seed chunk");
	}

	sqlx::query(
		"INSERT INTO post_title_embeddings (post_id, embedding) VALUES ($1, $2::text::vector)",
	)
	.bind(post_id)
	.bind(vector_text(&title_vector))
	.execute(&db.pool)
	.await
	.expect("seed title embedding");
}

fn owner_scope(owner: &str) -> SearchScope {
	SearchScope::Owner { owner_user_id: owner.to_string(), category_id: None }
}

fn default_plan(cfg_hybrid: bool) -> NormalizedPlan {
	let plan: SearchPlan = serde_json::from_value(serde_json::json!({
		"hybrid": { "enabled": cfg_hybrid, "retrieval_bias": "balanced" },
		"top_k": 5,
		"threshold": 0.1,
	}))
	.expect("plan json");

	normalize_plan(
		&plan,
		time::OffsetDateTime::now_utc(),
		time::macros::offset!(+9),
		false,
	)
}

#[tokio::test]
#[ignore = "Requires external Postgres with pgvector and pg_trgm. Set LORE_PG_DSN to run."]
async fn semantic_search_ranks_by_weighted_similarity() {
	let Some(base_dsn) = lore_testkit::env_dsn() else {
		eprintln!("Skipping semantic_search_ranks_by_weighted_similarity; set LORE_PG_DSN.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("test db");
	let cfg = test_config(test_db.dsn());
	let db = Db::connect(&cfg.storage.postgres).await.expect("connect");

	db.ensure_schema(DIM as u32).await.expect("schema");
	seed_post(&db, 1, "owner_1", "러스트 트레잇", &[("트레잇 객체와 동적 디스패치", axis(0, 1.0))], axis(0, 1.0))
		.await;
	seed_post(&db, 2, "owner_1", "파이썬 데코레이터", &[("데코레이터 문법 설명", axis(1, 1.0))], axis(1, 1.0))
		.await;

	let providers = Providers::new(
		Arc::new(MappedEmbedding::new(vec![("트레잇 질문", axis(0, 1.0))])),
		Arc::new(FixedPlanner { plan: serde_json::json!({}) }),
		Arc::new(CountingChat::new("unused")),
	);
	let service = LoreService::with_providers(cfg, db, providers);
	let hits = service
		.semantic_search("트레잇 질문", &owner_scope("owner_1"), &default_plan(false))
		.await
		.expect("semantic search");

	assert!(!hits.is_empty());
	assert_eq!(hits[0].post_id, 1);
	assert!(hits[0].similarity_score > 0.9);
	// The orthogonal post either misses the threshold or ranks last.
	assert!(hits.iter().all(|hit| hit.post_id != 2 || hit.similarity_score < 0.5));

	test_db.cleanup().await.expect("cleanup");
}

#[tokio::test]
#[ignore = "Requires external Postgres with pgvector and pg_trgm. Set LORE_PG_DSN to run."]
async fn hybrid_search_caps_chunks_per_post() {
	let Some(base_dsn) = lore_testkit::env_dsn() else {
		eprintln!("Skipping hybrid_search_caps_chunks_per_post; set LORE_PG_DSN.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("test db");
	let cfg = test_config(test_db.dsn());
	let db = Db::connect(&cfg.storage.postgres).await.expect("connect");

	db.ensure_schema(DIM as u32).await.expect("schema");
	seed_post(
		&db,
		1,
		"owner_1",
		"트레잇 대백과",
		&[
			("트레잇 객체 개요", axis(0, 1.0)),
			("트레잇 객체 심화", axis(0, 0.98)),
			("트레잇 객체 부록", axis(0, 0.96)),
			("트레잇 객체 여담", axis(0, 0.94)),
		],
		axis(0, 1.0),
	)
	.await;
	seed_post(&db, 2, "owner_1", "제네릭 이야기", &[("제네릭과 단형화", axis(0, 0.6))], axis(0, 0.6))
		.await;

	let providers = Providers::new(
		Arc::new(MappedEmbedding::new(vec![("트레잇 질문", axis(0, 1.0))])),
		Arc::new(FixedPlanner { plan: serde_json::json!({}) }),
		Arc::new(CountingChat::new("unused")),
	);
	let service = LoreService::with_providers(cfg, db, providers);
	let hits = service
		.hybrid_search("트레잇 질문", &owner_scope("owner_1"), &default_plan(true))
		.await
		.expect("hybrid search");

	let from_post_one = hits.iter().filter(|hit| hit.post_id == 1).count();

	assert!(from_post_one <= 2, "diversity cap violated: {from_post_one} chunks from post 1");
	assert!(hits.iter().any(|hit| hit.post_id == 2), "corroborating post should survive");

	test_db.cleanup().await.expect("cleanup");
}

#[tokio::test]
#[ignore = "Requires external Postgres with pgvector and pg_trgm. Set LORE_PG_DSN to run."]
async fn repeated_question_replays_without_generation() {
	let Some(base_dsn) = lore_testkit::env_dsn() else {
		eprintln!("Skipping repeated_question_replays_without_generation; set LORE_PG_DSN.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("test db");
	let cfg = test_config(test_db.dsn());
	let db = Db::connect(&cfg.storage.postgres).await.expect("connect");

	db.ensure_schema(DIM as u32).await.expect("schema");
	seed_post(&db, 1, "owner_1", "러스트 트레잇", &[("트레잇 객체 설명", axis(0, 1.0))], axis(0, 1.0))
		.await;

	let chat = Arc::new(CountingChat::new("트레잇 객체는 동적 디스패치 타입입니다."));
	let providers = Providers::new(
		Arc::new(MappedEmbedding::new(vec![
			("트레잇 객체가 뭐야?", axis(0, 1.0)),
			("current: 트레잇 객체가 뭐야?", axis(2, 1.0)),
		])),
		Arc::new(FixedPlanner { plan: serde_json::json!({ "top_k": 5, "threshold": 0.1 }) }),
		chat.clone(),
	);
	let service = LoreService::with_providers(cfg, db, providers);
	let request = AskRequest {
		question: "트레잇 객체가 뭐야?".to_string(),
		owner_user_id: "owner_1".to_string(),
		requester_user_id: "requester_1".to_string(),
		session_id: None,
		category_id: None,
		post_id: None,
		speech_tone_id: -1,
	};

	let first = service.ask(request.clone(), CancelToken::never()).await.expect("first ask");

	assert_eq!(first.cache, CacheStatus::Miss);
	assert!(first.persisted);
	assert_eq!(chat.calls(), 1);

	// Same question in a fresh session fingerprints identically and replays.
	let second = service.ask(request, CancelToken::never()).await.expect("second ask");

	assert_eq!(second.cache, CacheStatus::Replayed);
	assert_eq!(second.answer, first.answer);
	assert_eq!(chat.calls(), 1, "replay must not issue a generation call");

	test_db.cleanup().await.expect("cleanup");
}
