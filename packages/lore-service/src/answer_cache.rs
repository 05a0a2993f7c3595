use lore_providers::chat::{ChatMessage, ChatOptions};
use lore_storage::conversations::{self, FingerprintScope, PersistConversationArgs};
use serde::Serialize;
use serde_json::Value;

use crate::{LoreService, ServiceResult};

const EARLIER_TURN_MAX_CHARS: usize = 400;
const PREVIOUS_TURN_MAX_CHARS: usize = 600;
const QUESTION_MAX_CHARS: usize = 800;
const REWRITE_MIN_TOKENS: u32 = 120;
const REWRITE_MAX_TOKENS: u32 = 4096;

/// A stored answer close enough to the current fingerprint to consider
/// serving again.
#[derive(Debug, Clone, Serialize)]
pub struct CacheCandidate {
	pub answer: String,
	pub search_plan: Option<Value>,
	pub retrieval_meta: Option<Value>,
	pub speech_tone_id: i32,
	pub similarity: f32,
}

/// Outcome of candidate selection against the requested tone.
#[derive(Debug, Clone)]
pub enum CacheDecision {
	/// Same tone: serve the stored answer verbatim, no generation call.
	Replay(CacheCandidate),
	/// Close question, different tone: re-express the stored answer.
	Rewrite(CacheCandidate),
	Miss,
}

/// Builds the duplicate-question fingerprint block: up to the last two prior
/// user turns plus the current question, each truncated and labeled. Folding
/// recent turns in keeps "what about in Go?" from colliding with the bare
/// current question across different conversations.
pub fn build_fingerprint_block(prior_user_turns: &[String], question: &str) -> String {
	let mut lines = Vec::with_capacity(3);
	let recent: Vec<&String> = prior_user_turns.iter().rev().take(2).collect();

	// `recent` is newest-first; emit oldest-first.
	if let Some(earlier) = recent.get(1) {
		lines.push(format!("earlier: {}", truncate_chars(earlier, EARLIER_TURN_MAX_CHARS)));
	}
	if let Some(previous) = recent.first() {
		lines.push(format!("previous: {}", truncate_chars(previous, PREVIOUS_TURN_MAX_CHARS)));
	}

	lines.push(format!("current: {}", truncate_chars(question, QUESTION_MAX_CHARS)));

	lines.join("\n")
}

/// Picks what to do with the nearest cached fingerprints: drop everything
/// under the similarity gate, replay on an exact tone match, otherwise hand
/// the single best survivor to the tone rewriter.
pub fn select_candidate(
	candidates: Vec<CacheCandidate>,
	requested_tone: i32,
	threshold: f32,
) -> CacheDecision {
	let mut survivors: Vec<CacheCandidate> =
		candidates.into_iter().filter(|candidate| candidate.similarity >= threshold).collect();

	if survivors.is_empty() {
		return CacheDecision::Miss;
	}
	if let Some(position) =
		survivors.iter().position(|candidate| candidate.speech_tone_id == requested_tone)
	{
		return CacheDecision::Replay(survivors.swap_remove(position));
	}

	survivors.sort_by(|a, b| {
		b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal)
	});

	CacheDecision::Rewrite(survivors.swap_remove(0))
}

/// Output-token budget for a tone rewrite, proportional to the original's
/// length.
pub(crate) fn rewrite_token_budget(original_chars: usize) -> u32 {
	((original_chars as f32 * 1.2).ceil() as u32).clamp(REWRITE_MIN_TOKENS, REWRITE_MAX_TOKENS)
}

/// Accepts a rewrite only when it is non-empty and its length stays within
/// the configured ratio window of the original.
pub(crate) fn validate_rewrite(
	original: &str,
	rewritten: &str,
	min_ratio: f32,
	max_ratio: f32,
) -> bool {
	let rewritten = rewritten.trim();

	if rewritten.is_empty() {
		return false;
	}

	let original_len = original.trim().chars().count().max(1) as f32;
	let ratio = rewritten.chars().count() as f32 / original_len;

	ratio >= min_ratio && ratio <= max_ratio
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
	let trimmed = text.trim();

	if trimmed.chars().count() <= max_chars {
		return trimmed.to_string();
	}

	trimmed.chars().take(max_chars).collect()
}

impl LoreService {
	/// Nearest cached fingerprints in scope, best first.
	pub async fn find_cached_answers(
		&self,
		scope: &FingerprintScope<'_>,
		fingerprint: &[f32],
	) -> ServiceResult<Vec<CacheCandidate>> {
		let hits = conversations::find_cached_answers(
			&self.db.pool,
			scope,
			fingerprint,
			self.cfg.answer_cache.candidate_limit,
		)
		.await?;

		Ok(hits
			.into_iter()
			.map(|hit| CacheCandidate {
				answer: hit.answer,
				search_plan: hit.search_plan,
				retrieval_meta: hit.retrieval_meta,
				speech_tone_id: hit.speech_tone_id,
				similarity: hit.similarity,
			})
			.collect())
	}

	/// Re-expresses a cached answer in the requested tone. Every failure mode
	/// (provider error, empty output, out-of-ratio length) comes back as
	/// `None`: the caller treats it as a cache miss and regenerates, and a
	/// degraded rewrite is never served.
	pub async fn rewrite_answer_tone(
		&self,
		answer: &str,
		tone_prompt: &str,
	) -> ServiceResult<Option<String>> {
		let original = answer.trim();

		if original.is_empty() {
			return Ok(None);
		}

		let messages = vec![
			ChatMessage::system(
				"주어진 원문을 말투에 맞게 변경해라. 원문의 의미, 사실, 구조를 훼손하지 말고 \
                 요청된 tone 지시만 반영해 다시 작성해.",
			),
			ChatMessage::user(format!("tone 지시: {tone_prompt}\n원문: {original}")),
		];
		let options = ChatOptions {
			temperature: Some(0.2),
			top_p: Some(0.9),
			max_output_tokens: Some(rewrite_token_budget(original.chars().count())),
		};
		let rewritten =
			match self.providers.chat.complete(&self.cfg.providers.chat, &messages, &options).await
			{
				Ok(text) => text,
				Err(err) => {
					tracing::warn!(error = %err, "Tone rewrite call failed; treating as cache miss.");

					return Ok(None);
				},
			};

		if !validate_rewrite(
			original,
			&rewritten,
			self.cfg.answer_cache.min_length_ratio,
			self.cfg.answer_cache.max_length_ratio,
		) {
			tracing::info!("Tone rewrite rejected by length validation; treating as cache miss.");

			return Ok(None);
		}

		Ok(Some(rewritten.trim().to_string()))
	}

	/// Persists the paired conversation turn. Skipped for empty answers or
	/// fingerprints so the cache never points at an unservable entry.
	pub async fn persist_conversation(
		&self,
		args: PersistConversationArgs<'_>,
	) -> ServiceResult<()> {
		if args.answer.trim().is_empty() || args.fingerprint.is_empty() {
			return Ok(());
		}

		conversations::persist_conversation(&self.db, args).await?;

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn candidate(similarity: f32, tone: i32) -> CacheCandidate {
		CacheCandidate {
			answer: format!("answer at {similarity}"),
			search_plan: None,
			retrieval_meta: None,
			speech_tone_id: tone,
			similarity,
		}
	}

	#[test]
	fn matching_tone_above_threshold_replays() {
		let decision =
			select_candidate(vec![candidate(0.95, -1), candidate(0.94, 3)], -1, 0.93);

		match decision {
			CacheDecision::Replay(chosen) => assert_eq!(chosen.speech_tone_id, -1),
			other => panic!("Expected replay, got {other:?}"),
		}
	}

	#[test]
	fn tone_mismatch_selects_best_survivor_for_rewrite() {
		let decision =
			select_candidate(vec![candidate(0.94, 3), candidate(0.96, 5)], -1, 0.93);

		match decision {
			CacheDecision::Rewrite(chosen) => {
				assert_eq!(chosen.speech_tone_id, 5);
				assert!((chosen.similarity - 0.96).abs() < 1e-6);
			},
			other => panic!("Expected rewrite, got {other:?}"),
		}
	}

	#[test]
	fn candidates_below_threshold_miss() {
		let decision = select_candidate(vec![candidate(0.90, -1), candidate(0.85, -1)], -1, 0.93);

		assert!(matches!(decision, CacheDecision::Miss));
	}

	#[test]
	fn fingerprint_block_labels_and_truncates_turns() {
		let long = "질".repeat(1000);
		let turns = vec!["첫 질문".to_string(), long.clone()];
		let block = build_fingerprint_block(&turns, &long);
		let lines: Vec<&str> = block.lines().collect();

		assert_eq!(lines.len(), 3);
		assert!(lines[0].starts_with("earlier: 첫 질문"));
		assert_eq!(lines[1].chars().count(), "previous: ".chars().count() + 600);
		assert_eq!(lines[2].chars().count(), "current: ".chars().count() + 800);
	}

	#[test]
	fn fingerprint_block_with_no_history_is_question_only() {
		let block = build_fingerprint_block(&[], "트레잇 객체가 뭐야?");

		assert_eq!(block, "current: 트레잇 객체가 뭐야?");
	}

	#[test]
	fn rewrite_ratio_window_rejects_bloat() {
		assert!(validate_rewrite("원문 텍스트입니다", "원문 텍스트예요", 0.5, 1.5));
		assert!(!validate_rewrite("짧은 원문", &"아".repeat(100), 0.5, 1.5));
		assert!(!validate_rewrite("원문", "", 0.5, 1.5));
	}

	#[test]
	fn rewrite_budget_is_proportional_and_clamped() {
		assert_eq!(rewrite_token_budget(10), 120);
		assert_eq!(rewrite_token_budget(1000), 1200);
		assert_eq!(rewrite_token_budget(100_000), 4096);
	}
}
