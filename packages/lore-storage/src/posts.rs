use sqlx::{PgPool, QueryBuilder};
use time::OffsetDateTime;

use crate::{
	Result,
	models::{ChunkHit, Post},
	vector_literal,
};

/// Secondary ordering applied after the similarity score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreatedAtOrder {
	Desc,
	Asc,
}

#[derive(Debug, Clone)]
pub struct VectorSearchArgs<'a> {
	pub owner_user_id: &'a str,
	pub category_id: Option<i64>,
	pub embedding: &'a [f32],
	pub threshold: f32,
	pub top_k: u32,
	pub chunk_weight: f32,
	pub title_weight: f32,
	pub time_range: Option<(OffsetDateTime, OffsetDateTime)>,
	pub order: CreatedAtOrder,
}

#[derive(Debug, Clone)]
pub struct GlobalVectorSearchArgs<'a> {
	pub embedding: &'a [f32],
	pub threshold: f32,
	pub top_k: u32,
	pub ann_factor: u32,
	pub chunk_weight: f32,
	pub title_weight: f32,
	pub order: CreatedAtOrder,
}

#[derive(Debug, Clone)]
pub struct TextSearchArgs<'a> {
	pub owner_user_id: &'a str,
	pub category_id: Option<i64>,
	pub query: Option<&'a str>,
	pub keywords: &'a [String],
	pub top_k: u32,
	pub time_range: Option<(OffsetDateTime, OffsetDateTime)>,
	pub order: CreatedAtOrder,
}

#[derive(Debug, Clone)]
pub struct GlobalTextSearchArgs<'a> {
	pub query: Option<&'a str>,
	pub keywords: &'a [String],
	pub top_k: u32,
	pub order: CreatedAtOrder,
}

pub async fn find_post_by_id(pool: &PgPool, post_id: i64) -> Result<Option<Post>> {
	let post = sqlx::query_as("SELECT * FROM posts WHERE id = $1")
		.bind(post_id)
		.fetch_optional(pool)
		.await?;

	Ok(post)
}

/// Owner-scoped nearest-neighbor lookup over chunk embeddings, blended with
/// the title embedding per the plan weights. The threshold applies to the
/// chunk similarity alone so a strong title cannot resurrect an off-topic
/// chunk.
pub async fn find_similar_chunks(
	pool: &PgPool,
	args: &VectorSearchArgs<'_>,
) -> Result<Vec<ChunkHit>> {
	let vec_text = vector_literal(args.embedding);
	let mut builder = QueryBuilder::new(
		"SELECT fp.id AS post_id, fp.title AS post_title, pc.content AS post_chunk, \
         pc.chunk_index, (",
	);

	builder.push_bind(f64::from(args.chunk_weight));
	builder.push(" * (1.0 - (pc.embedding <=> ");
	builder.push_bind(vec_text.clone());
	builder.push("::text::vector)) + ");
	builder.push_bind(f64::from(args.title_weight));
	builder.push(" * (1.0 - (pte.embedding <=> ");
	builder.push_bind(vec_text.clone());
	builder.push(
		"::text::vector)))::real AS score, fp.created_at \
         FROM posts fp \
         JOIN post_chunks pc ON pc.post_id = fp.id \
         JOIN post_title_embeddings pte ON pte.post_id = fp.id \
         WHERE fp.owner_user_id = ",
	);
	builder.push_bind(args.owner_user_id);

	if let Some(category_id) = args.category_id {
		builder.push(" AND fp.category_id = ");
		builder.push_bind(category_id);
	}
	if let Some((from, to)) = args.time_range {
		builder.push(" AND fp.created_at BETWEEN ");
		builder.push_bind(from);
		builder.push(" AND ");
		builder.push_bind(to);
	}

	builder.push(" AND (1.0 - (pc.embedding <=> ");
	builder.push_bind(vec_text);
	builder.push("::text::vector)) > ");
	builder.push_bind(f64::from(args.threshold));
	builder.push(" ORDER BY score DESC");
	push_created_at_order(&mut builder, args.order, "fp.created_at");
	builder.push(" LIMIT ");
	builder.push_bind(i64::from(args.top_k));

	let rows = builder.build_query_as::<ChunkHit>().fetch_all(pool).await?;

	Ok(rows)
}

/// Global variant: one ANN pass across all public posts, then the weighted
/// blend on the surviving candidates. The ANN limit over-fetches so the
/// post-filter threshold does not starve the final page.
pub async fn find_similar_chunks_global(
	pool: &PgPool,
	args: &GlobalVectorSearchArgs<'_>,
) -> Result<Vec<ChunkHit>> {
	let vec_text = vector_literal(args.embedding);
	let ann_limit = i64::from(args.top_k) * i64::from(args.ann_factor.max(1));
	let mut builder = QueryBuilder::new("WITH nn AS (SELECT pc.post_id, pc.chunk_index, pc.content, (pc.embedding <=> ");

	builder.push_bind(vec_text.clone());
	builder.push("::text::vector) AS dist FROM post_chunks pc ORDER BY pc.embedding <=> ");
	builder.push_bind(vec_text.clone());
	builder.push("::text::vector LIMIT ");
	builder.push_bind(ann_limit);
	builder.push(
		"), scored AS (SELECT nn.post_id, bp.title AS post_title, nn.content AS post_chunk, \
         nn.chunk_index, (",
	);
	builder.push_bind(f64::from(args.chunk_weight));
	builder.push(" * (1.0 - nn.dist) + ");
	builder.push_bind(f64::from(args.title_weight));
	builder.push(" * (1.0 - (pte.embedding <=> ");
	builder.push_bind(vec_text);
	builder.push(
		"::text::vector)))::real AS score, bp.created_at \
         FROM nn \
         JOIN posts bp ON bp.id = nn.post_id \
         JOIN post_title_embeddings pte ON pte.post_id = nn.post_id \
         WHERE bp.is_public AND (1.0 - nn.dist) > ",
	);
	builder.push_bind(f64::from(args.threshold));
	builder.push(") SELECT post_id, post_title, post_chunk, chunk_index, score, created_at FROM scored ORDER BY score DESC");
	push_created_at_order(&mut builder, args.order, "created_at");
	builder.push(" LIMIT ");
	builder.push_bind(i64::from(args.top_k));

	let rows = builder.build_query_as::<ChunkHit>().fetch_all(pool).await?;

	Ok(rows)
}

/// Owner-scoped lexical lookup: trigram similarity against chunk content and
/// post title (the larger of the two wins) with optional `ILIKE` keyword
/// prefilters.
pub async fn text_search_chunks(
	pool: &PgPool,
	args: &TextSearchArgs<'_>,
) -> Result<Vec<ChunkHit>> {
	let mut builder = QueryBuilder::new(
		"SELECT fp.id AS post_id, fp.title AS post_title, pc.content AS post_chunk, \
         pc.chunk_index, ",
	);

	push_text_score(&mut builder, args.query, "fp.title");
	builder.push(
		", fp.created_at \
         FROM posts fp \
         JOIN post_chunks pc ON pc.post_id = fp.id \
         WHERE fp.owner_user_id = ",
	);
	builder.push_bind(args.owner_user_id);

	if let Some(category_id) = args.category_id {
		builder.push(" AND fp.category_id = ");
		builder.push_bind(category_id);
	}
	if let Some((from, to)) = args.time_range {
		builder.push(" AND fp.created_at BETWEEN ");
		builder.push_bind(from);
		builder.push(" AND ");
		builder.push_bind(to);
	}

	push_keyword_filter(&mut builder, args.keywords, "fp.title");
	builder.push(" ORDER BY score DESC");
	push_created_at_order(&mut builder, args.order, "fp.created_at");
	builder.push(" LIMIT ");
	builder.push_bind(i64::from(args.top_k));

	let rows = builder.build_query_as::<ChunkHit>().fetch_all(pool).await?;

	Ok(rows)
}

pub async fn text_search_chunks_global(
	pool: &PgPool,
	args: &GlobalTextSearchArgs<'_>,
) -> Result<Vec<ChunkHit>> {
	let mut builder = QueryBuilder::new(
		"SELECT fp.id AS post_id, fp.title AS post_title, pc.content AS post_chunk, \
         pc.chunk_index, ",
	);

	push_text_score(&mut builder, args.query, "fp.title");
	builder.push(
		", fp.created_at \
         FROM posts fp \
         JOIN post_chunks pc ON pc.post_id = fp.id \
         WHERE fp.is_public",
	);
	push_keyword_filter(&mut builder, args.keywords, "fp.title");
	builder.push(" ORDER BY score DESC");
	push_created_at_order(&mut builder, args.order, "fp.created_at");
	builder.push(" LIMIT ");
	builder.push_bind(i64::from(args.top_k));

	let rows = builder.build_query_as::<ChunkHit>().fetch_all(pool).await?;

	Ok(rows)
}

pub async fn store_title_embedding(
	pool: &PgPool,
	post_id: i64,
	embedding: &[f32],
) -> Result<()> {
	let vec_text = vector_literal(embedding);

	sqlx::query(
		"INSERT INTO post_title_embeddings (post_id, embedding) \
         VALUES ($1, $2::text::vector) \
         ON CONFLICT (post_id) DO UPDATE \
         SET embedding = EXCLUDED.embedding, updated_at = now()",
	)
	.bind(post_id)
	.bind(vec_text)
	.execute(pool)
	.await?;

	Ok(())
}

/// Replaces a post's chunk rows wholesale. One transaction so a reader never
/// observes a half-reindexed post.
pub async fn replace_content_chunks(
	pool: &PgPool,
	post_id: i64,
	chunks: &[String],
	embeddings: &[Vec<f32>],
) -> Result<()> {
	if chunks.len() != embeddings.len() {
		return Err(crate::Error::InvalidArgument(format!(
			"Chunk count {} does not match embedding count {}.",
			chunks.len(),
			embeddings.len()
		)));
	}

	let mut tx = pool.begin().await?;

	sqlx::query("DELETE FROM post_chunks WHERE post_id = $1")
		.bind(post_id)
		.execute(&mut *tx)
		.await?;

	for (index, (chunk, embedding)) in chunks.iter().zip(embeddings.iter()).enumerate() {
		let vec_text = vector_literal(embedding);

		sqlx::query(
			"INSERT INTO post_chunks (post_id, chunk_index, content, embedding) \
             VALUES ($1, $2, $3, $4::text::vector)",
		)
		.bind(post_id)
		.bind(index as i32)
		.bind(chunk)
		.bind(vec_text)
		.execute(&mut *tx)
		.await?;
	}

	tx.commit().await?;

	Ok(())
}

fn push_created_at_order(
	builder: &mut QueryBuilder<'_, sqlx::Postgres>,
	order: CreatedAtOrder,
	column: &str,
) {
	match order {
		CreatedAtOrder::Desc => builder.push(format!(", {column} DESC")),
		CreatedAtOrder::Asc => builder.push(format!(", {column} ASC")),
	};
}

fn push_text_score(
	builder: &mut QueryBuilder<'_, sqlx::Postgres>,
	query: Option<&str>,
	title_column: &str,
) {
	match query.filter(|q| !q.trim().is_empty()) {
		Some(query) => {
			builder.push("GREATEST(COALESCE(similarity(pc.content, ");
			builder.push_bind(query.to_string());
			builder.push(format!("), 0), COALESCE(similarity({title_column}, "));
			builder.push_bind(query.to_string());
			builder.push("), 0))::real AS score");
		},
		None => {
			builder.push("0::real AS score");
		},
	}
}

fn push_keyword_filter(
	builder: &mut QueryBuilder<'_, sqlx::Postgres>,
	keywords: &[String],
	title_column: &str,
) {
	let patterns: Vec<String> = keywords
		.iter()
		.filter(|keyword| !keyword.trim().is_empty())
		.map(|keyword| format!("%{keyword}%"))
		.collect();

	if patterns.is_empty() {
		return;
	}

	builder.push(" AND (pc.content ILIKE ANY(");
	builder.push_bind(patterns.clone());
	builder.push(format!(") OR {title_column} ILIKE ANY("));
	builder.push_bind(patterns);
	builder.push("))");
}
