use axum::{
	body::Body,
	http::{Request, StatusCode},
};
use lore_api::{routes, state::AppState};
use tower::util::ServiceExt;

fn test_config() -> lore_config::Config {
	let toml_text = r#"
[service]
http_bind = "127.0.0.1:0"
log_level = "info"

[storage.postgres]
dsn = "postgres://localhost/lore_test_never_connected"
pool_max_conns = 1

[providers.embedding]
provider_id = "openai"
api_base = "https://unused.invalid"
api_key = "sk-test"
path = "/v1/embeddings"
model = "test-embed"
dimensions = 8
timeout_ms = 1000
default_headers = {}

[providers.planner]
provider_id = "openai"
api_base = "https://unused.invalid"
api_key = "sk-test"
path = "/v1/chat/completions"
model = "test-planner"
temperature = 0.0
timeout_ms = 1000
default_headers = {}

[providers.chat]
provider_id = "openai"
api_base = "https://unused.invalid"
api_key = "sk-test"
path = "/v1/chat/completions"
model = "test-chat"
temperature = 0.7
timeout_ms = 1000
default_headers = {}

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
"#;

	toml::from_str(toml_text).expect("test config should parse")
}

#[tokio::test]
async fn health_endpoint_answers_without_a_database() {
	let state = AppState::new_lazy(test_config()).expect("lazy state");
	let app = routes::router(state);

	let response = app
		.oneshot(Request::builder().uri("/health").body(Body::empty()).expect("request"))
		.await
		.expect("response");

	assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn malformed_ask_payload_is_rejected() {
	let state = AppState::new_lazy(test_config()).expect("lazy state");
	let app = routes::router(state);

	let response = app
		.oneshot(
			Request::builder()
				.method("POST")
				.uri("/v1/ask")
				.header("content-type", "application/json")
				.body(Body::from("{\"question\": 42}"))
				.expect("request"),
		)
		.await
		.expect("response");

	assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}
