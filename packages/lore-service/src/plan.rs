use lore_domain::{NormalizedPlan, SearchPlan, normalize_plan};
use lore_providers::{
	chat::{ChatMessage, ChatOptions},
	planner::{PlannerOutput, PlannerRequest, parse_json_loose},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{OffsetDateTime, UtcOffset, format_description::well_known::Rfc3339};

use crate::LoreService;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanContext {
	pub owner_user_id: String,
	pub category_id: Option<i64>,
	pub post_id: Option<i64>,
	/// Overrides the configured offset for calendar-shaped time filters.
	pub timezone_offset_minutes: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanPair {
	pub raw: SearchPlan,
	pub normalized: NormalizedPlan,
}

impl LoreService {
	/// Turns free-form planner output into a bounded execution plan through a
	/// fallback ladder: schema-constrained request, loose parse of whatever
	/// text came back, an unconstrained retry, and finally a plain chat
	/// completion told to emit only JSON. `None` means "could not plan" — an
	/// expected outcome, never an error. Callers degrade to default
	/// retrieval.
	pub async fn generate_plan(&self, question: &str, ctx: &PlanContext) -> Option<PlanPair> {
		let now = OffsetDateTime::now_utc();
		let offset = self.plan_offset(ctx);
		let prompt = build_plan_prompt(question, ctx, now, offset);
		let schema = plan_schema();

		let mut plan = self.planner_stage(&prompt, Some(&schema)).await;

		if plan.is_none() {
			plan = self.planner_stage(&prompt, None).await;
		}
		if plan.is_none() {
			plan = self.chat_stage(&prompt).await;
		}

		let plan = plan?;
		let normalized = normalize_plan(&plan, now, offset, ctx.post_id.is_some());

		tracing::debug!(
			mode = ?normalized.mode,
			top_k = normalized.top_k,
			hybrid = normalized.hybrid.enabled,
			rewrites = normalized.rewrites.len(),
			keywords = normalized.keywords.len(),
			"Search plan normalized."
		);

		Some(PlanPair { raw: plan, normalized })
	}

	pub(crate) fn plan_offset(&self, ctx: &PlanContext) -> UtcOffset {
		let minutes = ctx
			.timezone_offset_minutes
			.unwrap_or(self.cfg.plan.timezone_offset_minutes)
			.clamp(-720, 840);

		UtcOffset::from_whole_seconds(minutes * 60).unwrap_or(UtcOffset::UTC)
	}

	/// One rung of the ladder against the planner provider. Failures are
	/// logged and swallowed; the ladder decides what to try next.
	async fn planner_stage(&self, prompt: &str, schema: Option<&Value>) -> Option<SearchPlan> {
		let max_output_tokens = if schema.is_some() {
			self.cfg.plan.max_output_tokens
		} else {
			self.cfg.plan.fallback_max_output_tokens
		};
		let req = PlannerRequest { prompt, response_schema: schema, max_output_tokens };

		match self.providers.planner.complete(&self.cfg.providers.planner, req).await {
			Ok(PlannerOutput::Structured(value)) => parse_plan(value),
			Ok(PlannerOutput::Text(text)) => parse_json_loose(&text).and_then(parse_plan),
			Err(err) => {
				tracing::warn!(error = %err, constrained = schema.is_some(), "Planner request failed.");

				None
			},
		}
	}

	/// Last resort: a plain chat completion instructed to emit only JSON.
	async fn chat_stage(&self, prompt: &str) -> Option<SearchPlan> {
		let messages = vec![
			ChatMessage::system(
				"You output ONLY a single JSON object matching the SearchPlan shape. No extra text.",
			),
			ChatMessage::user(prompt),
		];
		let options = ChatOptions {
			temperature: Some(0.0),
			top_p: None,
			max_output_tokens: Some(self.cfg.plan.fallback_max_output_tokens),
		};

		match self.providers.chat.complete(&self.cfg.providers.chat, &messages, &options).await {
			Ok(text) => parse_json_loose(&text).and_then(parse_plan),
			Err(err) => {
				tracing::warn!(error = %err, "Chat-completion plan fallback failed.");

				None
			},
		}
	}
}

fn parse_plan(value: Value) -> Option<SearchPlan> {
	match serde_json::from_value::<SearchPlan>(value) {
		Ok(plan) => Some(plan),
		Err(err) => {
			tracing::warn!(error = %err, "Planner output did not match the plan shape.");

			None
		},
	}
}

fn build_plan_prompt(
	question: &str,
	ctx: &PlanContext,
	now: OffsetDateTime,
	offset: UtcOffset,
) -> String {
	let now_utc = now.format(&Rfc3339).unwrap_or_default();
	let now_local = now.to_offset(offset).format(&Rfc3339).unwrap_or_default();
	let target = match ctx.post_id {
		Some(post_id) => format!("a single post (id {post_id})"),
		None => match ctx.category_id {
			Some(category_id) => format!("the owner's posts in category {category_id}"),
			None => "all of the owner's posts".to_string(),
		},
	};

	format!(
		"You plan retrieval over a personal blog archive. Target: {target}.\n\
         Current time (UTC): {now_utc}\n\
         Current time (local): {now_local}\n\
         Produce a SearchPlan JSON object with fields: mode (rag|post), top_k (1-10), \
         threshold (0-1), weights {{chunk, title}}, rewrites (non-question paraphrases), \
         keywords (single tokens), hybrid {{enabled, retrieval_bias (lexical|balanced|semantic), \
         alpha, max_rewrites (0-4), max_keywords (0-8)}}, filters.time (optional), \
         sort (created_at_desc|created_at_asc), limit (1-20).\n\
         Question: {question}"
	)
}

fn plan_schema() -> Value {
	serde_json::json!({
		"type": "object",
		"properties": {
			"mode": { "type": "string", "enum": ["rag", "post"] },
			"top_k": { "type": "integer", "minimum": 1, "maximum": 10 },
			"threshold": { "type": "number", "minimum": 0, "maximum": 1 },
			"weights": {
				"type": "object",
				"properties": {
					"chunk": { "type": "number" },
					"title": { "type": "number" }
				},
				"required": ["chunk", "title"],
				"additionalProperties": false
			},
			"rewrites": { "type": "array", "items": { "type": "string" } },
			"keywords": { "type": "array", "items": { "type": "string" } },
			"hybrid": {
				"type": "object",
				"properties": {
					"enabled": { "type": "boolean" },
					"retrieval_bias": {
						"type": "string",
						"enum": ["lexical", "balanced", "semantic"]
					},
					"alpha": { "type": "number", "minimum": 0, "maximum": 1 },
					"max_rewrites": { "type": "integer", "minimum": 0, "maximum": 4 },
					"max_keywords": { "type": "integer", "minimum": 0, "maximum": 8 }
				},
				"additionalProperties": false
			},
			"filters": {
				"type": "object",
				"properties": {
					"time": { "type": "object" }
				},
				"additionalProperties": false
			},
			"sort": { "type": "string", "enum": ["created_at_desc", "created_at_asc"] },
			"limit": { "type": "integer", "minimum": 1, "maximum": 20 }
		},
		"additionalProperties": false
	})
}
