use lore_domain::{NormalizedPlan, SortOrder};
use lore_storage::posts::{
	self, CreatedAtOrder, GlobalVectorSearchArgs, VectorSearchArgs,
};

use crate::{FusedHit, LoreService, SearchScope, ServiceResult};

pub(crate) fn created_at_order(sort: SortOrder) -> CreatedAtOrder {
	match sort {
		SortOrder::CreatedAtDesc => CreatedAtOrder::Desc,
		SortOrder::CreatedAtAsc => CreatedAtOrder::Asc,
	}
}

impl LoreService {
	/// Single-query vector retrieval: the fallback path and the primitive the
	/// fusion engine repeats per rewrite.
	pub async fn semantic_search(
		&self,
		question: &str,
		scope: &SearchScope,
		plan: &NormalizedPlan,
	) -> ServiceResult<Vec<FusedHit>> {
		let embedding = self.embed_single(question).await?;
		let rows = self.vector_lookup(&embedding, scope, plan, plan.top_k).await?;

		Ok(rows.into_iter().map(FusedHit::from_chunk).collect())
	}

	/// Scoped-or-global nearest-neighbor lookup shared by the semantic and
	/// hybrid paths. Global mode over-fetches to compensate for the larger
	/// candidate pool.
	pub(crate) async fn vector_lookup(
		&self,
		embedding: &[f32],
		scope: &SearchScope,
		plan: &NormalizedPlan,
		top_k: u32,
	) -> ServiceResult<Vec<lore_storage::models::ChunkHit>> {
		let order = created_at_order(plan.sort);
		let rows = match scope {
			SearchScope::Owner { owner_user_id, category_id } =>
				posts::find_similar_chunks(&self.db.pool, &VectorSearchArgs {
					owner_user_id,
					category_id: *category_id,
					embedding,
					threshold: plan.threshold,
					top_k,
					chunk_weight: plan.weights.chunk,
					title_weight: plan.weights.title,
					time_range: plan.time.map(|range| (range.from, range.to)),
					order,
				})
				.await?,
			SearchScope::Global => {
				let overfetch = self.cfg.search.global_overfetch_factor;

				posts::find_similar_chunks_global(&self.db.pool, &GlobalVectorSearchArgs {
					embedding,
					threshold: plan.threshold,
					top_k: top_k.saturating_mul(overfetch),
					ann_factor: overfetch,
					chunk_weight: plan.weights.chunk,
					title_weight: plan.weights.title,
					order,
				})
				.await?
			},
		};

		Ok(rows)
	}
}
