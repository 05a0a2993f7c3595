use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::FusedHit;

const SECONDARY_EVIDENCE_WEIGHT: f32 = 0.2;
const PAGE_LIMIT_MAX: u32 = 10;

/// Document-level rollup of chunk hits, used only for post pagination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostHit {
	pub post_id: i64,
	pub post_title: String,
	pub score: f32,
	#[serde(with = "lore_domain::time_serde")]
	pub created_at: OffsetDateTime,
	pub best: BestChunk,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BestChunk {
	pub chunk_index: i32,
	pub snippet: String,
	pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostPage {
	pub posts: Vec<PostHit>,
	pub total: usize,
}

/// Groups chunk hits by post and pages the result. The composite score is
/// the best chunk plus a fifth of the runner-up: corroborating secondary
/// evidence helps, but a weak second chunk cannot lift a mediocre post above
/// a strong single-chunk one.
pub fn aggregate_posts(chunks: &[FusedHit], limit: u32, offset: u32) -> PostPage {
	let limit = limit.clamp(1, PAGE_LIMIT_MAX) as usize;
	let offset = offset as usize;

	let mut by_post: HashMap<i64, Vec<&FusedHit>> = HashMap::new();

	for chunk in chunks {
		by_post.entry(chunk.post_id).or_default().push(chunk);
	}

	let mut posts: Vec<PostHit> = by_post
		.into_values()
		.map(|mut group| {
			group.sort_by(|a, b| {
				b.similarity_score
					.partial_cmp(&a.similarity_score)
					.unwrap_or(std::cmp::Ordering::Equal)
			});

			let top = group[0];
			let second = group.get(1);
			let score = top.similarity_score
				+ second
					.map(|hit| SECONDARY_EVIDENCE_WEIGHT * hit.similarity_score)
					.unwrap_or(0.0);

			PostHit {
				post_id: top.post_id,
				post_title: top.post_title.clone(),
				score,
				created_at: top.created_at,
				best: BestChunk {
					chunk_index: top.chunk_index,
					snippet: top.post_chunk.clone(),
					score: top.similarity_score,
				},
			}
		})
		.collect();

	posts.sort_by(|a, b| {
		b.score
			.partial_cmp(&a.score)
			.unwrap_or(std::cmp::Ordering::Equal)
			.then_with(|| b.created_at.cmp(&a.created_at))
	});

	let total = posts.len();
	let page = posts.into_iter().skip(offset).take(limit).collect();

	PostPage { posts: page, total }
}

#[cfg(test)]
mod tests {
	use time::macros::datetime;

	use super::*;
	use crate::FusedHit;

	fn hit(post_id: i64, chunk_index: i32, score: f32, day: u8) -> FusedHit {
		FusedHit {
			post_id,
			post_title: format!("post {post_id}"),
			post_chunk: format!("chunk {chunk_index}"),
			chunk_index,
			similarity_score: score,
			created_at: datetime!(2024-01-01 00:00 UTC).replace_day(day).expect("valid day"),
		}
	}

	#[test]
	fn composite_score_adds_a_fifth_of_the_runner_up() {
		let chunks = vec![hit(1, 0, 0.9, 1), hit(1, 1, 0.4, 1)];
		let page = aggregate_posts(&chunks, 10, 0);

		assert_eq!(page.total, 1);
		assert!((page.posts[0].score - 0.98).abs() < 1e-6);
		assert_eq!(page.posts[0].best.chunk_index, 0);
		assert!((page.posts[0].best.score - 0.9).abs() < 1e-6);
	}

	#[test]
	fn single_chunk_posts_score_their_top_chunk_alone() {
		let chunks = vec![hit(7, 3, 0.55, 1)];
		let page = aggregate_posts(&chunks, 10, 0);

		assert!((page.posts[0].score - 0.55).abs() < 1e-6);
	}

	#[test]
	fn weak_secondary_does_not_beat_a_strong_single_chunk() {
		let chunks = vec![hit(1, 0, 0.6, 1), hit(1, 1, 0.5, 1), hit(2, 0, 0.8, 1)];
		let page = aggregate_posts(&chunks, 10, 0);

		// Post 1 composite 0.7 still loses to post 2's bare 0.8.
		assert_eq!(page.posts[0].post_id, 2);
		assert_eq!(page.posts[1].post_id, 1);
	}

	#[test]
	fn score_ties_break_on_newest_post() {
		let chunks = vec![hit(1, 0, 0.5, 1), hit(2, 0, 0.5, 9)];
		let page = aggregate_posts(&chunks, 10, 0);

		assert_eq!(page.posts[0].post_id, 2);
	}

	#[test]
	fn paging_clamps_limit_and_reports_total() {
		let chunks: Vec<FusedHit> =
			(1..=25).map(|post_id| hit(post_id, 0, 0.9 - post_id as f32 * 0.01, 1)).collect();
		let page = aggregate_posts(&chunks, 99, 0);

		assert_eq!(page.posts.len(), 10);
		assert_eq!(page.total, 25);

		let second_page = aggregate_posts(&chunks, 10, 10);

		assert_eq!(second_page.posts.len(), 10);
		assert_eq!(second_page.posts[0].post_id, 11);
	}
}
