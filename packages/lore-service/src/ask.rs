use lore_domain::{NormalizedPlan, PlanMode, SearchPlan, normalize_plan};
use lore_providers::chat::{ChatMessage, ChatOptions};
use lore_storage::{
	conversations::{self, FingerprintScope},
	personas, posts,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
	CacheDecision, CancelToken, FusedHit, LoreService, PlanContext, SearchScope, ServiceError,
	ServiceResult, answer_cache,
};

const POST_CONTEXT_MAX_CHARS: usize = 40_000;
const HISTORY_MESSAGE_LIMIT: u32 = 4;

const DEFAULT_TONE_PROMPT: &str = "간결하고 명확한 말투로 답변해";
const MIMIC_TONE_PROMPT: &str =
	"아래의 블로그 본문 컨텍스트를 참고하여 본문의 말투를 파악해 최대한 비슷한 말투로 답변해";

#[derive(Debug, Clone, Deserialize)]
pub struct AskRequest {
	pub question: String,
	pub owner_user_id: String,
	pub requester_user_id: String,
	#[serde(default)]
	pub session_id: Option<i64>,
	#[serde(default)]
	pub category_id: Option<i64>,
	#[serde(default)]
	pub post_id: Option<i64>,
	#[serde(default = "default_speech_tone")]
	pub speech_tone_id: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
	pub session_id: i64,
	pub answer: String,
	pub cache: CacheStatus,
	pub plan: Option<NormalizedPlan>,
	pub sources: Vec<SourceRef>,
	/// Whether the turn reached storage. Persistence failures are reported
	/// here instead of failing the request: the caller already has the
	/// answer.
	pub persisted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
	Replayed,
	ToneRewritten,
	Miss,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
	pub post_id: i64,
	pub post_title: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostSearchRequest {
	pub question: String,
	pub owner_user_id: String,
	#[serde(default)]
	pub category_id: Option<i64>,
	/// Searches every public post instead of the owner's corpus.
	#[serde(default)]
	pub global: bool,
	#[serde(default)]
	pub limit: Option<u32>,
	#[serde(default)]
	pub offset: Option<u32>,
}

fn default_speech_tone() -> i32 {
	-1
}

struct RetrievalOutcome {
	answer_context: String,
	plan: Option<NormalizedPlan>,
	sources: Vec<SourceRef>,
	retrieval_meta: Value,
	search_plan: Option<Value>,
}

impl LoreService {
	/// Answers one question: consult the semantic answer cache first, then
	/// plan, retrieve, and generate on a miss, and persist the paired turn.
	/// A cancelled caller aborts generation and skips persistence entirely.
	pub async fn ask(&self, req: AskRequest, cancel: CancelToken) -> ServiceResult<AskResponse> {
		let question = req.question.trim().to_string();

		if question.is_empty() {
			return Err(ServiceError::InvalidRequest {
				message: "question must be non-empty.".to_string(),
			});
		}

		let session = match req.session_id {
			Some(session_id) => conversations::find_session_for_requester(
				&self.db.pool,
				session_id,
				&req.requester_user_id,
			)
			.await?
			.ok_or_else(|| ServiceError::NotFound {
				message: format!("Session {session_id} not found."),
			})?,
			None => conversations::create_session(
				&self.db.pool,
				&req.owner_user_id,
				&req.requester_user_id,
				None,
			)
			.await?,
		};
		let tone_prompt = self.resolve_tone_prompt(req.speech_tone_id, &req.owner_user_id).await?;

		// Fingerprint covers a short conversation window, not just the bare
		// question.
		let prior_user_turns: Vec<String> = {
			let mut recent =
				conversations::recent_messages(&self.db.pool, session.id, HISTORY_MESSAGE_LIMIT)
					.await?;

			recent.reverse();
			recent
				.into_iter()
				.filter(|message| message.role == "user")
				.map(|message| message.content)
				.collect()
		};
		let fingerprint_block =
			answer_cache::build_fingerprint_block(&prior_user_turns, &question);
		let fingerprint = self.embed_single(&fingerprint_block).await?;
		let scope = FingerprintScope {
			owner_user_id: &req.owner_user_id,
			requester_user_id: &req.requester_user_id,
			category_id: req.category_id,
			post_id: req.post_id,
		};

		if self.cfg.answer_cache.enabled {
			let candidates = self.find_cached_answers(&scope, &fingerprint).await?;
			let decision = answer_cache::select_candidate(
				candidates,
				req.speech_tone_id,
				self.cfg.answer_cache.similarity_threshold,
			);

			match decision {
				CacheDecision::Replay(candidate) => {
					tracing::info!(
						similarity = candidate.similarity,
						"Answer cache replay; no generation call."
					);

					let plan = candidate
						.search_plan
						.clone()
						.and_then(|value| serde_json::from_value(value).ok());
					let persisted = self
						.persist_turn(
							session.id,
							&scope,
							&question,
							&candidate.answer,
							candidate.search_plan.as_ref(),
							candidate.retrieval_meta.as_ref(),
							req.speech_tone_id,
							&fingerprint,
							&cancel,
						)
						.await;

					return Ok(AskResponse {
						session_id: session.id,
						answer: candidate.answer,
						cache: CacheStatus::Replayed,
						plan,
						sources: Vec::new(),
						persisted,
					});
				},
				CacheDecision::Rewrite(candidate) => {
					if let Some(rewritten) =
						self.rewrite_answer_tone(&candidate.answer, &tone_prompt).await?
					{
						tracing::info!(
							similarity = candidate.similarity,
							"Answer cache tone rewrite served."
						);

						let plan = candidate
							.search_plan
							.clone()
							.and_then(|value| serde_json::from_value(value).ok());
						let persisted = self
							.persist_turn(
								session.id,
								&scope,
								&question,
								&rewritten,
								candidate.search_plan.as_ref(),
								candidate.retrieval_meta.as_ref(),
								req.speech_tone_id,
								&fingerprint,
								&cancel,
							)
							.await;

						return Ok(AskResponse {
							session_id: session.id,
							answer: rewritten,
							cache: CacheStatus::ToneRewritten,
							plan,
							sources: Vec::new(),
							persisted,
						});
					}

					// Rejected rewrite: fall through to full regeneration.
				},
				CacheDecision::Miss => {},
			}
		}

		let outcome = self.run_retrieval(&req, &question).await?;
		let answer = self
			.generate_answer(&question, &outcome.answer_context, &tone_prompt, &cancel)
			.await?;
		let persisted = self
			.persist_turn(
				session.id,
				&scope,
				&question,
				&answer,
				outcome.search_plan.as_ref(),
				Some(&outcome.retrieval_meta),
				req.speech_tone_id,
				&fingerprint,
				&cancel,
			)
			.await;

		Ok(AskResponse {
			session_id: session.id,
			answer,
			cache: CacheStatus::Miss,
			plan: outcome.plan,
			sources: outcome.sources,
			persisted,
		})
	}

	/// Document-level search surface: plan, retrieve, and roll chunks up to
	/// ranked, paged posts.
	pub async fn search_posts(&self, req: PostSearchRequest) -> ServiceResult<crate::PostPage> {
		let question = req.question.trim().to_string();

		if question.is_empty() {
			return Err(ServiceError::InvalidRequest {
				message: "question must be non-empty.".to_string(),
			});
		}

		let ctx = PlanContext {
			owner_user_id: req.owner_user_id.clone(),
			category_id: req.category_id,
			post_id: None,
			timezone_offset_minutes: None,
		};
		let plan = match self.generate_plan(&question, &ctx).await {
			Some(pair) => pair.normalized,
			None => self.default_plan(&ctx),
		};
		let scope = if req.global {
			SearchScope::Global
		} else {
			SearchScope::Owner { owner_user_id: req.owner_user_id, category_id: req.category_id }
		};
		let hits = if plan.hybrid.enabled {
			self.hybrid_search(&question, &scope, &plan).await?
		} else {
			self.semantic_search(&question, &scope, &plan).await?
		};

		Ok(crate::aggregate_posts(&hits, req.limit.unwrap_or(10), req.offset.unwrap_or(0)))
	}

	pub(crate) fn default_plan(&self, ctx: &PlanContext) -> NormalizedPlan {
		normalize_plan(
			&SearchPlan::default(),
			time::OffsetDateTime::now_utc(),
			self.plan_offset(ctx),
			ctx.post_id.is_some(),
		)
	}

	async fn run_retrieval(
		&self,
		req: &AskRequest,
		question: &str,
	) -> ServiceResult<RetrievalOutcome> {
		if let Some(post_id) = req.post_id {
			return self.post_mode_context(req, post_id).await;
		}

		let ctx = PlanContext {
			owner_user_id: req.owner_user_id.clone(),
			category_id: req.category_id,
			post_id: None,
			timezone_offset_minutes: None,
		};
		let scope = SearchScope::Owner {
			owner_user_id: req.owner_user_id.clone(),
			category_id: req.category_id,
		};

		let (plan, strategy, planned) = match self.generate_plan(question, &ctx).await {
			Some(pair) => {
				let strategy = if pair.normalized.hybrid.enabled {
					format!(
						"planned hybrid ({})",
						pair.normalized.hybrid.retrieval_bias.as_str()
					)
				} else {
					"planned semantic".to_string()
				};

				(pair.normalized, strategy, true)
			},
			None => {
				tracing::info!("Plan generation exhausted; using default retrieval.");

				(self.default_plan(&ctx), "default semantic (plan fallback)".to_string(), false)
			},
		};
		let hits = if plan.hybrid.enabled {
			self.hybrid_search(question, &scope, &plan).await?
		} else {
			self.semantic_search(question, &scope, &plan).await?
		};
		let sources = collect_sources(&hits);
		let retrieval_meta = serde_json::json!({
			"strategy": strategy,
			"result_count": hits.len(),
		});
		let search_plan = planned.then(|| serde_json::to_value(&plan).ok()).flatten();
		let answer_context = render_chunk_context(&hits);

		Ok(RetrievalOutcome {
			answer_context,
			plan: Some(plan),
			sources,
			retrieval_meta,
			search_plan,
		})
	}

	async fn post_mode_context(
		&self,
		req: &AskRequest,
		post_id: i64,
	) -> ServiceResult<RetrievalOutcome> {
		let post = posts::find_post_by_id(&self.db.pool, post_id)
			.await?
			.ok_or_else(|| ServiceError::NotFound { message: format!("Post {post_id} not found.") })?;

		if !post.is_public && post.owner_user_id != req.requester_user_id {
			return Err(ServiceError::InvalidRequest {
				message: "Post is not accessible to the requester.".to_string(),
			});
		}

		let processed = preprocess_content(&post.content);
		let sources = vec![SourceRef { post_id: post.id, post_title: post.title.clone() }];
		let retrieval_meta = serde_json::json!({
			"strategy": "post",
			"post_id": post.id,
			"result_count": 1,
		});
		let answer_context =
			format!("제목: {}\n본문: {}", post.title, processed);

		Ok(RetrievalOutcome {
			answer_context,
			plan: None,
			sources,
			retrieval_meta,
			search_plan: Some(serde_json::json!({ "mode": PlanMode::Post })),
		})
	}

	async fn generate_answer(
		&self,
		question: &str,
		context: &str,
		tone_prompt: &str,
		cancel: &CancelToken,
	) -> ServiceResult<String> {
		let system = format!(
			"당신은 블로그 운영자 AI입니다. 주어진 블로그 컨텍스트만 근거로 질문에 답하고, \
             컨텍스트에 없는 내용은 지어내지 마십시오.\n답변 말투 및 규칙: {tone_prompt}"
		);
		let user = format!("사용자의 질문: {question}\n블로그 컨텍스트:\n{context}");
		let messages = vec![ChatMessage::system(system), ChatMessage::user(user)];
		let options = ChatOptions::default();
		let generation =
			self.providers.chat.complete(&self.cfg.providers.chat, &messages, &options);

		tokio::select! {
			result = generation => {
				let answer = result?;

				if answer.trim().is_empty() {
					return Err(ServiceError::Provider {
						message: "Chat provider returned an empty answer.".to_string(),
					});
				}

				Ok(answer.trim().to_string())
			},
			_ = cancel.cancelled() => {
				tracing::info!("Caller disconnected; aborting in-flight generation.");

				Err(ServiceError::Cancelled)
			},
		}
	}

	/// Best-effort transactional persistence. Cancellation skips the write
	/// entirely; failures are logged and surfaced through the response's
	/// `persisted` flag rather than failing a request whose answer already
	/// exists.
	#[allow(clippy::too_many_arguments)]
	async fn persist_turn(
		&self,
		session_id: i64,
		scope: &FingerprintScope<'_>,
		question: &str,
		answer: &str,
		search_plan: Option<&Value>,
		retrieval_meta: Option<&Value>,
		speech_tone_id: i32,
		fingerprint: &[f32],
		cancel: &CancelToken,
	) -> bool {
		if cancel.is_cancelled() {
			tracing::info!("Caller disconnected; skipping conversation persistence.");

			return false;
		}

		let result = self
			.persist_conversation(conversations::PersistConversationArgs {
				session_id,
				scope: scope.clone(),
				question,
				answer,
				search_plan,
				retrieval_meta,
				speech_tone_id,
				fingerprint,
			})
			.await;

		match result {
			Ok(()) => true,
			Err(err) => {
				tracing::error!(error = %err, session_id, "Failed to persist conversation turn.");

				false
			},
		}
	}

	async fn resolve_tone_prompt(
		&self,
		speech_tone_id: i32,
		owner_user_id: &str,
	) -> ServiceResult<String> {
		match speech_tone_id {
			-1 => Ok(DEFAULT_TONE_PROMPT.to_string()),
			-2 => Ok(MIMIC_TONE_PROMPT.to_string()),
			persona_id => {
				let persona =
					personas::find_persona(&self.db.pool, i64::from(persona_id), owner_user_id)
						.await?;

				Ok(persona
					.map(|persona| format!("{}: {}", persona.name, persona.description))
					.unwrap_or_else(|| DEFAULT_TONE_PROMPT.to_string()))
			},
		}
	}
}

fn collect_sources(hits: &[FusedHit]) -> Vec<SourceRef> {
	let mut seen = std::collections::HashSet::new();
	let mut sources = Vec::new();

	for hit in hits {
		if seen.insert(hit.post_id) {
			sources.push(SourceRef { post_id: hit.post_id, post_title: hit.post_title.clone() });
		}
	}

	sources
}

fn render_chunk_context(hits: &[FusedHit]) -> String {
	hits.iter()
		.map(|hit| format!("[{}] {}\n{}", hit.post_id, hit.post_title, hit.post_chunk))
		.collect::<Vec<String>>()
		.join("\n\n")
}

/// Strips markup and collapses whitespace; post-mode context is bounded so a
/// single long post cannot blow the generation window.
fn preprocess_content(content: &str) -> String {
	let mut plain = String::with_capacity(content.len());
	let mut in_tag = false;

	for ch in content.chars() {
		match ch {
			'<' => in_tag = true,
			'>' => {
				in_tag = false;
				plain.push(' ');
			},
			_ if !in_tag => plain.push(ch),
			_ => {},
		}
	}

	let collapsed: String = plain.split_whitespace().collect::<Vec<&str>>().join(" ");

	if collapsed.chars().count() > POST_CONTEXT_MAX_CHARS {
		collapsed.chars().take(POST_CONTEXT_MAX_CHARS).collect()
	} else {
		collapsed
	}
}
