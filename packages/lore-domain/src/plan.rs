use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, UtcOffset};

use crate::{
	presets::{RetrievalBias, preset_for},
	rewrite,
	timefilter::{AbsoluteRange, TimeFilter, to_absolute_range},
};

/// Filler words that carry no retrieval signal as rewrites or keywords.
const STOPWORDS: &[&str] = &[
	"글", "포스트", "블로그", "소개", "정리", "내용", "최신", "최근", "정보", "post", "blog",
	"intro", "summary", "content", "latest", "recent", "info",
];

static KEYWORD_TOKEN: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^[\p{L}\p{N}_-]+$").expect("static regex"));

pub const TOP_K_MAX: u32 = 10;
pub const LIMIT_MAX: u32 = 20;
pub const MAX_REWRITES_CAP: u32 = 4;
pub const MAX_KEYWORDS_CAP: u32 = 8;
pub const KEYWORD_QUALITY_CAP: u32 = 5;

const DEFAULT_TOP_K: u32 = 5;
const DEFAULT_LIMIT: u32 = 5;
const DEFAULT_THRESHOLD: f32 = 0.2;
const DEFAULT_MAX_REWRITES: u32 = 3;
const DEFAULT_MAX_KEYWORDS: u32 = 6;
const DEFAULT_CHUNK_WEIGHT: f32 = 0.7;
const DEFAULT_TITLE_WEIGHT: f32 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanMode {
	Rag,
	Post,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
	#[default]
	CreatedAtDesc,
	CreatedAtAsc,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Weights {
	#[serde(default)]
	pub chunk: f32,
	#[serde(default)]
	pub title: f32,
}

/// Raw plan as the planner model emitted it. Absence is tolerated everywhere;
/// present fields must at least have the right shape or the parse attempt is
/// discarded and the fallback ladder moves on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchPlan {
	#[serde(default)]
	pub mode: Option<PlanMode>,
	#[serde(default)]
	pub top_k: Option<f64>,
	#[serde(default)]
	pub threshold: Option<f64>,
	#[serde(default)]
	pub weights: Option<Weights>,
	#[serde(default)]
	pub rewrites: Vec<String>,
	#[serde(default)]
	pub keywords: Vec<String>,
	#[serde(default)]
	pub hybrid: Option<HybridSpec>,
	#[serde(default)]
	pub filters: Option<PlanFilters>,
	#[serde(default)]
	pub sort: Option<SortOrder>,
	#[serde(default)]
	pub limit: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HybridSpec {
	#[serde(default)]
	pub enabled: Option<bool>,
	#[serde(default)]
	pub retrieval_bias: Option<RetrievalBias>,
	#[serde(default)]
	pub alpha: Option<f64>,
	#[serde(default)]
	pub max_rewrites: Option<f64>,
	#[serde(default)]
	pub max_keywords: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanFilters {
	/// Kept loose on purpose: an unrecognized time shape drops the filter
	/// during normalization instead of invalidating the whole plan.
	#[serde(default)]
	pub time: Option<serde_json::Value>,
}

/// Execution-ready plan: every numeric field clamped to its bounds, weights
/// summing to one, rewrites/keywords sanitized, time resolved to UTC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPlan {
	pub mode: PlanMode,
	pub top_k: u32,
	pub threshold: f32,
	pub weights: Weights,
	pub rewrites: Vec<String>,
	pub keywords: Vec<String>,
	pub hybrid: HybridSettings,
	pub time: Option<AbsoluteRange>,
	pub sort: SortOrder,
	pub limit: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HybridSettings {
	pub enabled: bool,
	pub retrieval_bias: RetrievalBias,
	pub alpha: f32,
	pub max_rewrites: u32,
	pub max_keywords: u32,
}

pub fn normalize_plan(
	plan: &SearchPlan,
	now: OffsetDateTime,
	offset: UtcOffset,
	has_target_post: bool,
) -> NormalizedPlan {
	let weights = plan
		.weights
		.map(normalize_weights)
		.unwrap_or(Weights { chunk: DEFAULT_CHUNK_WEIGHT, title: DEFAULT_TITLE_WEIGHT });
	let time = plan
		.filters
		.as_ref()
		.and_then(|filters| filters.time.clone())
		.and_then(|value| serde_json::from_value::<TimeFilter>(value).ok())
		.and_then(|filter| to_absolute_range(&filter, now, offset));

	let hybrid_spec = plan.hybrid.clone().unwrap_or_default();
	let bias = hybrid_spec.retrieval_bias.unwrap_or_default();
	let preset = preset_for(bias);
	let alpha = hybrid_spec.alpha.map(|alpha| alpha as f32).unwrap_or(preset.alpha).clamp(0.0, 1.0);
	let max_rewrites = clamp_count(hybrid_spec.max_rewrites, DEFAULT_MAX_REWRITES, MAX_REWRITES_CAP);
	let max_keywords = clamp_count(hybrid_spec.max_keywords, DEFAULT_MAX_KEYWORDS, MAX_KEYWORDS_CAP)
		.min(KEYWORD_QUALITY_CAP);

	NormalizedPlan {
		mode: plan.mode.unwrap_or(if has_target_post { PlanMode::Post } else { PlanMode::Rag }),
		top_k: clamp_count(plan.top_k, DEFAULT_TOP_K, TOP_K_MAX).max(1),
		threshold: plan.threshold.map(|t| t as f32).unwrap_or(DEFAULT_THRESHOLD).clamp(0.0, 1.0),
		weights,
		rewrites: sanitize_rewrites(&plan.rewrites, max_rewrites as usize),
		keywords: sanitize_keywords(&plan.keywords, max_keywords as usize),
		hybrid: HybridSettings {
			enabled: hybrid_spec.enabled.unwrap_or(false),
			retrieval_bias: bias,
			alpha,
			max_rewrites,
			max_keywords,
		},
		time,
		sort: plan.sort.unwrap_or_default(),
		limit: clamp_count(plan.limit, DEFAULT_LIMIT, LIMIT_MAX).max(1),
	}
}

/// Renormalizes to a unit sum; a zero (or unusable) pair falls back to the
/// 0.7/0.3 chunk/title default.
pub fn normalize_weights(weights: Weights) -> Weights {
	let chunk = if weights.chunk.is_finite() { weights.chunk.max(0.0) } else { 0.0 };
	let title = if weights.title.is_finite() { weights.title.max(0.0) } else { 0.0 };
	let sum = chunk + title;

	if sum > 0.0 {
		Weights { chunk: chunk / sum, title: title / sum }
	} else {
		Weights { chunk: DEFAULT_CHUNK_WEIGHT, title: DEFAULT_TITLE_WEIGHT }
	}
}

/// Rewrite hygiene: trim, drop short/stopword/question-form entries, dedupe
/// case-insensitively keeping the first spelling, cap to `max`.
pub fn sanitize_rewrites(rewrites: &[String], max: usize) -> Vec<String> {
	let mut seen = std::collections::HashSet::new();
	let mut out = Vec::new();

	for raw in rewrites {
		let trimmed = raw.trim();

		if trimmed.chars().count() < 2 {
			continue;
		}
		if STOPWORDS.contains(&trimmed.to_lowercase().as_str()) {
			continue;
		}
		if rewrite::is_interrogative(trimmed) {
			continue;
		}
		if !seen.insert(trimmed.to_lowercase()) {
			continue;
		}

		out.push(trimmed.to_string());

		if out.len() >= max {
			break;
		}
	}

	out
}

/// Keyword hygiene: single word-ish tokens only (letters, digits, hyphen,
/// underscore), at least two characters, stopword-filtered, deduped, capped.
pub fn sanitize_keywords(keywords: &[String], max: usize) -> Vec<String> {
	let mut seen = std::collections::HashSet::new();
	let mut out = Vec::new();

	for raw in keywords {
		let token: String = raw
			.trim()
			.chars()
			.filter(|ch| !matches!(ch, '\u{200B}'..='\u{200D}' | '\u{FEFF}'))
			.collect();

		if token.chars().count() < 2 {
			continue;
		}
		if token.chars().any(char::is_whitespace) {
			continue;
		}
		if !KEYWORD_TOKEN.is_match(&token) {
			continue;
		}

		let key = token.to_lowercase();

		if STOPWORDS.contains(&key.as_str()) {
			continue;
		}
		if !seen.insert(key) {
			continue;
		}

		out.push(token);

		if out.len() >= max {
			break;
		}
	}

	out
}

fn clamp_count(value: Option<f64>, default: u32, max: u32) -> u32 {
	let Some(value) = value else {
		return default.min(max);
	};

	if !value.is_finite() {
		return default.min(max);
	}

	(value.round().max(0.0) as u32).min(max)
}

#[cfg(test)]
mod tests {
	use time::macros::{datetime, offset};

	use super::*;

	#[test]
	fn weights_renormalize_to_unit_sum() {
		let normalized = normalize_weights(Weights { chunk: 0.9, title: 0.9 });

		assert!((normalized.chunk - 0.5).abs() < 1e-6);
		assert!((normalized.title - 0.5).abs() < 1e-6);
		assert!((normalized.chunk + normalized.title - 1.0).abs() < 1e-6);
	}

	#[test]
	fn zero_weights_fall_back_to_default_split() {
		let normalized = normalize_weights(Weights { chunk: 0.0, title: 0.0 });

		assert_eq!(normalized, Weights { chunk: 0.7, title: 0.3 });
	}

	#[test]
	fn rewrites_drop_questions_and_case_duplicates() {
		let input = vec![
			"X는 무엇인가?".to_string(),
			"X는 개념이다.".to_string(),
			"x는 개념이다.".to_string(),
		];
		let out = sanitize_rewrites(&input, 3);

		assert_eq!(out, vec!["X는 개념이다.".to_string()]);
	}

	#[test]
	fn keywords_keep_single_word_tokens_only() {
		let input = vec![
			"rust".to_string(),
			"trait object".to_string(),
			"c".to_string(),
			"블로그".to_string(),
			"type-state".to_string(),
			"Rust".to_string(),
			"a*b".to_string(),
		];
		let out = sanitize_keywords(&input, 5);

		assert_eq!(out, vec!["rust".to_string(), "type-state".to_string()]);
	}

	#[test]
	fn normalization_applies_bounds_and_mode_default() {
		let plan = SearchPlan {
			top_k: Some(99.0),
			threshold: Some(1.7),
			limit: Some(0.0),
			hybrid: Some(HybridSpec {
				enabled: Some(true),
				retrieval_bias: Some(RetrievalBias::Semantic),
				alpha: None,
				max_rewrites: Some(9.0),
				max_keywords: Some(8.0),
			}),
			..SearchPlan::default()
		};
		let normalized =
			normalize_plan(&plan, datetime!(2024-03-10 12:00 UTC), offset!(+9), false);

		assert_eq!(normalized.mode, PlanMode::Rag);
		assert_eq!(normalized.top_k, 10);
		assert_eq!(normalized.threshold, 1.0);
		assert_eq!(normalized.limit, 1);
		assert_eq!(normalized.hybrid.max_rewrites, 4);
		assert_eq!(normalized.hybrid.max_keywords, 5);
		// Semantic preset alpha applies when the plan omits an explicit alpha.
		assert!((normalized.hybrid.alpha - 0.75).abs() < 1e-6);
	}

	#[test]
	fn target_post_defaults_mode_to_post() {
		let normalized = normalize_plan(
			&SearchPlan::default(),
			datetime!(2024-03-10 12:00 UTC),
			offset!(+9),
			true,
		);

		assert_eq!(normalized.mode, PlanMode::Post);
	}

	#[test]
	fn unrecognized_time_shape_is_dropped_not_fatal() {
		let plan = SearchPlan {
			filters: Some(PlanFilters {
				time: Some(serde_json::json!({ "type": "fuzzy", "vibe": "recent" })),
			}),
			..SearchPlan::default()
		};
		let normalized =
			normalize_plan(&plan, datetime!(2024-03-10 12:00 UTC), offset!(+9), false);

		assert!(normalized.time.is_none());
	}

	#[test]
	fn relative_time_filter_resolves_during_normalization() {
		let plan = SearchPlan {
			filters: Some(PlanFilters {
				time: Some(serde_json::json!({ "type": "relative", "unit": "day", "value": 7 })),
			}),
			..SearchPlan::default()
		};
		let normalized =
			normalize_plan(&plan, datetime!(2024-03-10 03:00 UTC), offset!(+9), false);
		let range = normalized.time.expect("time range");

		assert_eq!(range.from, datetime!(2024-03-04 00:00 +9).to_offset(time::UtcOffset::UTC));
	}
}
