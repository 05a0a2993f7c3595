use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub providers: Providers,
	pub plan: Plan,
	pub search: Search,
	pub answer_cache: AnswerCache,
	pub worker: Worker,
}

#[derive(Debug, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub log_level: String,
}

#[derive(Debug, Deserialize)]
pub struct Storage {
	pub postgres: Postgres,
}

#[derive(Debug, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
}

#[derive(Debug, Deserialize)]
pub struct Providers {
	pub embedding: EmbeddingProviderConfig,
	pub planner: LlmProviderConfig,
	pub chat: ChatProviderConfig,
}

#[derive(Debug, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	pub timeout_ms: u64,
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct LlmProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub temperature: f32,
	pub timeout_ms: u64,
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct ChatProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub temperature: f32,
	pub timeout_ms: u64,
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct Plan {
	/// Offset applied when resolving calendar-shaped time filters.
	#[serde(default = "default_timezone_offset_minutes")]
	pub timezone_offset_minutes: i32,
	pub max_output_tokens: u32,
	pub fallback_max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
pub struct Search {
	pub default_threshold: f32,
	pub default_top_k: u32,
	pub per_post_cap: u32,
	pub global_overfetch_factor: u32,
	pub rewrite: SearchRewrite,
}

#[derive(Debug, Deserialize)]
pub struct SearchRewrite {
	/// Rewrites whose mapped similarity falls below this floor are kept for
	/// the lexical path only.
	pub min_confidence: f32,
	pub declarative_floor_balanced: f32,
	pub declarative_floor_semantic: f32,
}

#[derive(Debug, Deserialize)]
pub struct AnswerCache {
	pub enabled: bool,
	pub similarity_threshold: f32,
	pub candidate_limit: u32,
	pub min_length_ratio: f32,
	pub max_length_ratio: f32,
}

#[derive(Debug, Deserialize)]
pub struct Worker {
	pub poll_interval_ms: u64,
	pub claim_lease_seconds: i64,
	pub max_retries: i32,
	pub backoff_ms: i64,
	/// Character budget per content chunk; roughly a 512-token window.
	#[serde(default = "default_chunk_max_chars")]
	pub chunk_max_chars: u32,
	#[serde(default = "default_chunk_overlap_chars")]
	pub chunk_overlap_chars: u32,
}

fn default_timezone_offset_minutes() -> i32 {
	540
}

fn default_chunk_max_chars() -> u32 {
	2_048
}

fn default_chunk_overlap_chars() -> u32 {
	200
}
