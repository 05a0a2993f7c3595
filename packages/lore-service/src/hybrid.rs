use std::collections::HashMap;

use futures::future::join_all;
use lore_domain::{NormalizedPlan, RetrievalBias, RetrievalPreset, preset_for, rewrite};
use lore_storage::{
	models::ChunkHit,
	posts::{self, GlobalTextSearchArgs, TextSearchArgs},
};
use time::OffsetDateTime;

use crate::{FusedHit, LoreService, SearchScope, ServiceResult, semantic::created_at_order};

/// Original question plus at most four rewrites.
const MAX_QUERIES: usize = 5;
const REWRITE_WEIGHT_MIN: f32 = 0.6;
const REWRITE_WEIGHT_SPAN: f32 = 0.6;
const SIGNAL_BOOST: f32 = 0.1;

struct WeightedQuery {
	embedding: Vec<f32>,
	weight: f32,
}

/// One merged candidate keyed by (post, chunk). Each score is the running
/// maximum over every query that surfaced it.
#[derive(Debug, Clone)]
pub(crate) struct ScoredCandidate {
	pub post_id: i64,
	pub chunk_index: i32,
	pub post_title: String,
	pub post_chunk: String,
	pub created_at: OffsetDateTime,
	pub vec_score: Option<f32>,
	pub text_score: Option<f32>,
}

impl LoreService {
	/// Multi-query fused retrieval. Expands the question with the plan's
	/// rewrites, runs the vector and lexical paths concurrently, fuses the
	/// normalized scores under the plan's bias, and caps per-post dominance.
	/// An empty fusion falls back to plain semantic search.
	pub async fn hybrid_search(
		&self,
		question: &str,
		scope: &SearchScope,
		plan: &NormalizedPlan,
	) -> ServiceResult<Vec<FusedHit>> {
		let mut queries: Vec<String> = Vec::with_capacity(MAX_QUERIES);
		queries.push(question.to_string());
		queries.extend(plan.rewrites.iter().take(MAX_QUERIES - 1).cloned());

		let embeddings = self.embed_texts(&queries).await?;
		let question_vec = embeddings[0].clone();
		let rewrite_cfg = &self.cfg.search.rewrite;
		let declarative_floor = match plan.hybrid.retrieval_bias {
			RetrievalBias::Semantic => rewrite_cfg.declarative_floor_semantic,
			RetrievalBias::Balanced | RetrievalBias::Lexical =>
				rewrite_cfg.declarative_floor_balanced,
		};

		let mut vector_queries: Vec<WeightedQuery> = Vec::with_capacity(queries.len());
		vector_queries.push(WeightedQuery { embedding: question_vec.clone(), weight: 1.0 });

		for (text, embedding) in queries.iter().zip(embeddings.iter()).skip(1) {
			let mapped = cosine_similarity(&question_vec, embedding)
				.map(rewrite_confidence)
				.unwrap_or(0.0);

			if mapped < rewrite_cfg.min_confidence {
				// Lexical search still benefits from paraphrase diversity even
				// when the embeddings diverge; only the vector path skips it.
				tracing::debug!(rewrite = %text, confidence = mapped, "Rewrite excluded from vector path.");

				continue;
			}

			let weight =
				rewrite_weight(mapped, rewrite::is_declarative(text), declarative_floor);

			vector_queries.push(WeightedQuery { embedding: embedding.clone(), weight });
		}

		let vector_lookups = join_all(vector_queries.iter().map(|query| async move {
			self.vector_lookup(&query.embedding, scope, plan, plan.top_k)
				.await
				.map(|rows| (query.weight, rows))
		}));
		let lexical_lookups = join_all(queries.iter().map(|text| async move {
			self.text_lookup(text, scope, plan).await
		}));
		let (vector_results, lexical_results) = tokio::join!(vector_lookups, lexical_lookups);

		let mut merged: HashMap<(i64, i32), ScoredCandidate> = HashMap::new();

		for result in vector_results {
			let (weight, rows) = result?;

			for row in rows {
				merge_vector(&mut merged, row, weight);
			}
		}
		for result in lexical_results {
			for row in result? {
				merge_text(&mut merged, row);
			}
		}

		let preset = preset_for(plan.hybrid.retrieval_bias);
		let fused = fuse_candidates(merged.into_values().collect(), preset, plan.hybrid.alpha);
		let limit = plan.limit.min(20) as usize;
		let capped = cap_per_post(fused, self.cfg.search.per_post_cap as usize, limit);

		if capped.is_empty() {
			tracing::info!("Hybrid fusion produced no candidates; falling back to semantic search.");

			return self.semantic_search(question, scope, plan).await;
		}

		Ok(capped)
	}

	async fn text_lookup(
		&self,
		query: &str,
		scope: &SearchScope,
		plan: &NormalizedPlan,
	) -> ServiceResult<Vec<ChunkHit>> {
		let order = created_at_order(plan.sort);
		let rows = match scope {
			SearchScope::Owner { owner_user_id, category_id } =>
				posts::text_search_chunks(&self.db.pool, &TextSearchArgs {
					owner_user_id,
					category_id: *category_id,
					query: Some(query),
					keywords: &plan.keywords,
					top_k: plan.top_k,
					time_range: plan.time.map(|range| (range.from, range.to)),
					order,
				})
				.await?,
			SearchScope::Global =>
				posts::text_search_chunks_global(&self.db.pool, &GlobalTextSearchArgs {
					query: Some(query),
					keywords: &plan.keywords,
					top_k: plan.top_k,
					order,
				})
				.await?,
		};

		Ok(rows)
	}
}

fn merge_vector(merged: &mut HashMap<(i64, i32), ScoredCandidate>, row: ChunkHit, weight: f32) {
	let weighted = row.score * weight;
	let entry = merged.entry((row.post_id, row.chunk_index)).or_insert_with(|| ScoredCandidate {
		post_id: row.post_id,
		chunk_index: row.chunk_index,
		post_title: row.post_title.clone(),
		post_chunk: row.post_chunk.clone(),
		created_at: row.created_at,
		vec_score: None,
		text_score: None,
	});

	entry.vec_score = Some(entry.vec_score.map_or(weighted, |prev| prev.max(weighted)));
}

fn merge_text(merged: &mut HashMap<(i64, i32), ScoredCandidate>, row: ChunkHit) {
	let entry = merged.entry((row.post_id, row.chunk_index)).or_insert_with(|| ScoredCandidate {
		post_id: row.post_id,
		chunk_index: row.chunk_index,
		post_title: row.post_title.clone(),
		post_chunk: row.post_chunk.clone(),
		created_at: row.created_at,
		vec_score: None,
		text_score: None,
	});

	entry.text_score = Some(entry.text_score.map_or(row.score, |prev| prev.max(row.score)));
}

/// Maps cosine similarity from [-1, 1] into [0, 1].
pub(crate) fn rewrite_confidence(cosine: f32) -> f32 {
	((cosine.clamp(-1.0, 1.0)) + 1.0) / 2.0
}

/// Confidence weight in [0.6, 1.2], floored for declarative rewrites whose
/// embedding drift is expected rather than suspicious.
fn rewrite_weight(mapped: f32, declarative: bool, declarative_floor: f32) -> f32 {
	let weight = REWRITE_WEIGHT_MIN + mapped.clamp(0.0, 1.0) * REWRITE_WEIGHT_SPAN;

	if declarative { weight.max(declarative_floor) } else { weight }
}

pub(crate) fn cosine_similarity(lhs: &[f32], rhs: &[f32]) -> Option<f32> {
	if lhs.is_empty() || lhs.len() != rhs.len() {
		return None;
	}

	let mut dot = 0.0_f32;
	let mut lhs_norm = 0.0_f32;
	let mut rhs_norm = 0.0_f32;

	for (l, r) in lhs.iter().zip(rhs.iter()) {
		dot += l * r;
		lhs_norm += l * l;
		rhs_norm += r * r;
	}

	if lhs_norm <= f32::EPSILON || rhs_norm <= f32::EPSILON {
		return None;
	}

	Some((dot / (lhs_norm.sqrt() * rhs_norm.sqrt())).clamp(-1.0, 1.0))
}

/// Normalizes each score pool to [0, 1], applies the bias boost, and fuses
/// with `alpha * vector + (1 - alpha) * text`, highest first.
fn fuse_candidates(
	candidates: Vec<ScoredCandidate>,
	preset: RetrievalPreset,
	alpha: f32,
) -> Vec<FusedHit> {
	if candidates.is_empty() {
		return Vec::new();
	}

	let vec_values: Vec<f32> = candidates.iter().map(|c| c.vec_score.unwrap_or(0.0)).collect();
	let text_values: Vec<f32> = candidates.iter().map(|c| c.text_score.unwrap_or(0.0)).collect();
	let (vec_lo, vec_hi) = pool_bounds(&vec_values);
	let (text_lo, text_hi) = pool_bounds(&text_values);

	let mut fused: Vec<FusedHit> = candidates
		.into_iter()
		.map(|candidate| {
			let mut vec_norm =
				normalize(candidate.vec_score.unwrap_or(0.0), vec_lo, vec_hi);
			let mut text_norm =
				normalize(candidate.text_score.unwrap_or(0.0), text_lo, text_hi);

			if vec_norm >= preset.sem_boost_threshold {
				vec_norm = (vec_norm + SIGNAL_BOOST).min(1.0);
			}
			if text_norm >= preset.lex_boost_threshold {
				text_norm = (text_norm + SIGNAL_BOOST).min(1.0);
			}

			FusedHit {
				post_id: candidate.post_id,
				post_title: candidate.post_title,
				post_chunk: candidate.post_chunk,
				chunk_index: candidate.chunk_index,
				similarity_score: alpha * vec_norm + (1.0 - alpha) * text_norm,
				created_at: candidate.created_at,
			}
		})
		.collect();

	fused.sort_by(|a, b| {
		b.similarity_score
			.partial_cmp(&a.similarity_score)
			.unwrap_or(std::cmp::Ordering::Equal)
			.then_with(|| b.created_at.cmp(&a.created_at))
	});

	fused
}

/// Walks the ranked list keeping at most `cap` chunks per post, truncated to
/// `limit` overall.
fn cap_per_post(hits: Vec<FusedHit>, cap: usize, limit: usize) -> Vec<FusedHit> {
	let mut per_post: HashMap<i64, usize> = HashMap::new();
	let mut out = Vec::with_capacity(limit.min(hits.len()));

	for hit in hits {
		let count = per_post.entry(hit.post_id).or_insert(0);

		if *count >= cap {
			continue;
		}

		*count += 1;
		out.push(hit);

		if out.len() >= limit {
			break;
		}
	}

	out
}

fn pool_bounds(values: &[f32]) -> (f32, f32) {
	let mut lo = 0.0_f32;
	let mut hi = 0.0_f32;

	for value in values {
		lo = lo.min(*value);
		hi = hi.max(*value);
	}

	(lo, hi)
}

fn normalize(value: f32, lo: f32, hi: f32) -> f32 {
	if hi > lo { (value - lo) / (hi - lo) } else { 0.0 }
}

#[cfg(test)]
mod tests {
	use time::macros::datetime;

	use super::*;

	fn candidate(
		post_id: i64,
		chunk_index: i32,
		vec_score: Option<f32>,
		text_score: Option<f32>,
	) -> ScoredCandidate {
		ScoredCandidate {
			post_id,
			chunk_index,
			post_title: format!("post {post_id}"),
			post_chunk: format!("chunk {chunk_index}"),
			created_at: datetime!(2024-01-01 00:00 UTC),
			vec_score,
			text_score,
		}
	}

	#[test]
	fn rewrite_confidence_maps_cosine_into_unit_interval() {
		assert!((rewrite_confidence(-1.0) - 0.0).abs() < 1e-6);
		assert!((rewrite_confidence(0.0) - 0.5).abs() < 1e-6);
		assert!((rewrite_confidence(1.0) - 1.0).abs() < 1e-6);
	}

	#[test]
	fn rewrite_weight_spans_expected_range() {
		assert!((rewrite_weight(0.0, false, 0.95) - 0.6).abs() < 1e-6);
		assert!((rewrite_weight(1.0, false, 0.95) - 1.2).abs() < 1e-6);
	}

	#[test]
	fn declarative_rewrites_are_floored() {
		// mapped 0.5 alone gives 0.9; the declarative floor lifts it.
		assert!((rewrite_weight(0.5, true, 0.95) - 0.95).abs() < 1e-6);
		// A confident declarative rewrite keeps its higher weight.
		assert!((rewrite_weight(1.0, true, 0.95) - 1.2).abs() < 1e-6);
	}

	#[test]
	fn fusion_is_alpha_weighted_after_normalization() {
		let candidates = vec![
			candidate(1, 0, Some(0.8), Some(0.2)),
			candidate(2, 0, Some(0.4), Some(0.6)),
		];
		// Thresholds above 1.0 so no boost interferes with the math.
		let preset =
			RetrievalPreset { alpha: 0.5, sem_boost_threshold: 1.1, lex_boost_threshold: 1.1 };
		let fused = fuse_candidates(candidates, preset, 0.5);

		// Post 2: vec normalizes to 0.5, text to 1.0; fused 0.75 wins over
		// post 1's 0.5 + 0.5 × (0.2 / 0.6) ≈ 0.667.
		assert_eq!(fused[0].post_id, 2);
		assert!((fused[0].similarity_score - 0.75).abs() < 1e-5);
		assert_eq!(fused[1].post_id, 1);
		assert!((fused[1].similarity_score - (0.5 + 0.5 * (0.2 / 0.6))).abs() < 1e-5);
	}

	#[test]
	fn high_confidence_single_signal_hits_get_boosted() {
		let candidates = vec![
			candidate(1, 0, Some(1.0), None),
			candidate(2, 0, Some(0.5), None),
			candidate(3, 0, Some(0.1), Some(0.9)),
		];
		let preset =
			RetrievalPreset { alpha: 1.0, sem_boost_threshold: 0.8, lex_boost_threshold: 0.8 };
		let fused = fuse_candidates(candidates, preset, 1.0);

		// Post 1 normalizes to 1.0 and the boost caps back at 1.0.
		assert_eq!(fused[0].post_id, 1);
		assert!((fused[0].similarity_score - 1.0).abs() < 1e-6);
	}

	#[test]
	fn per_post_cap_limits_single_post_dominance() {
		let mut candidates = Vec::new();

		for chunk_index in 0..5 {
			candidates.push(candidate(1, chunk_index, Some(1.0 - chunk_index as f32 * 0.05), None));
		}
		for post_id in 2..5 {
			candidates.push(candidate(post_id, 0, Some(0.5), None));
		}

		let preset =
			RetrievalPreset { alpha: 1.0, sem_boost_threshold: 1.1, lex_boost_threshold: 1.1 };
		let fused = fuse_candidates(candidates, preset, 1.0);
		let capped = cap_per_post(fused, 2, 20);
		let from_post_one = capped.iter().filter(|hit| hit.post_id == 1).count();

		assert_eq!(from_post_one, 2);
		assert_eq!(capped.len(), 5);
	}

	#[test]
	fn cap_per_post_honors_overall_limit() {
		let candidates: Vec<ScoredCandidate> =
			(1..=8).map(|post_id| candidate(post_id, 0, Some(0.9), None)).collect();
		let preset =
			RetrievalPreset { alpha: 1.0, sem_boost_threshold: 1.1, lex_boost_threshold: 1.1 };
		let fused = fuse_candidates(candidates, preset, 1.0);

		assert_eq!(cap_per_post(fused, 2, 3).len(), 3);
	}

	#[test]
	fn cosine_similarity_rejects_mismatched_or_zero_vectors() {
		assert!(cosine_similarity(&[1.0, 0.0], &[1.0]).is_none());
		assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).is_none());
		assert!((cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).expect("cosine") - 0.0).abs() < 1e-6);
	}
}
