use lore_domain::{
	NormalizedPlan, PlanMode, RetrievalBias, SearchPlan, normalize_plan, preset_for,
};
use time::macros::{datetime, offset};

fn normalize(json: serde_json::Value) -> NormalizedPlan {
	let plan: SearchPlan = serde_json::from_value(json).expect("plan should deserialize");

	normalize_plan(&plan, datetime!(2024-03-10 03:00 UTC), offset!(+9), false)
}

#[test]
fn planner_shaped_json_normalizes_end_to_end() {
	let normalized = normalize(serde_json::json!({
		"mode": "rag",
		"top_k": 8,
		"threshold": 0.25,
		"weights": { "chunk": 0.9, "title": 0.9 },
		"rewrites": ["러스트 트레잇 객체는 무엇인가?", "러스트 트레잇 객체는 동적 디스패치다."],
		"keywords": ["trait", "dyn", "trait object", "러스트"],
		"hybrid": {
			"enabled": true,
			"retrieval_bias": "lexical",
			"max_rewrites": 3,
			"max_keywords": 8
		},
		"filters": { "time": { "type": "named", "preset": "last_7_days" } },
		"sort": "created_at_desc",
		"limit": 12
	}));

	assert_eq!(normalized.mode, PlanMode::Rag);
	assert_eq!(normalized.top_k, 8);
	assert!((normalized.weights.chunk - 0.5).abs() < 1e-6);
	assert_eq!(normalized.rewrites, vec!["러스트 트레잇 객체는 동적 디스패치다.".to_string()]);
	assert_eq!(
		normalized.keywords,
		vec!["trait".to_string(), "dyn".to_string(), "러스트".to_string()]
	);
	assert_eq!(normalized.hybrid.retrieval_bias, RetrievalBias::Lexical);
	assert!((normalized.hybrid.alpha - preset_for(RetrievalBias::Lexical).alpha).abs() < 1e-6);

	let range = normalized.time.expect("time range");

	assert_eq!(range.from, datetime!(2024-03-04 00:00 +9).to_offset(time::UtcOffset::UTC));
	assert_eq!(range.to, datetime!(2024-03-10 23:59:59.999 +9).to_offset(time::UtcOffset::UTC));
}

#[test]
fn explicit_alpha_wins_over_bias_preset() {
	let normalized = normalize(serde_json::json!({
		"hybrid": { "enabled": true, "retrieval_bias": "semantic", "alpha": 0.4 }
	}));

	assert_eq!(normalized.hybrid.retrieval_bias, RetrievalBias::Semantic);
	assert!((normalized.hybrid.alpha - 0.4).abs() < 1e-6);
}

#[test]
fn unknown_bias_string_resolves_to_balanced() {
	let normalized = normalize(serde_json::json!({
		"hybrid": { "enabled": true, "retrieval_bias": "keyword-ish" }
	}));

	assert_eq!(normalized.hybrid.retrieval_bias, RetrievalBias::Balanced);
	assert!((normalized.hybrid.alpha - 0.5).abs() < 1e-6);
}

#[test]
fn empty_plan_object_yields_usable_defaults() {
	let normalized = normalize(serde_json::json!({}));

	assert_eq!(normalized.mode, PlanMode::Rag);
	assert_eq!(normalized.top_k, 5);
	assert_eq!(normalized.limit, 5);
	assert!((normalized.threshold - 0.2).abs() < 1e-6);
	assert!(!normalized.hybrid.enabled);
	assert!(normalized.time.is_none());
}
