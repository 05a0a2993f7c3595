use sqlx::PgPool;

use crate::Result;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Persona {
	pub id: i64,
	pub owner_user_id: String,
	pub name: String,
	pub description: String,
}

pub async fn find_persona(
	pool: &PgPool,
	persona_id: i64,
	owner_user_id: &str,
) -> Result<Option<Persona>> {
	let persona = sqlx::query_as(
		"SELECT id, owner_user_id, name, description FROM personas \
         WHERE id = $1 AND owner_user_id = $2",
	)
	.bind(persona_id)
	.bind(owner_user_id)
	.fetch_optional(pool)
	.await?;

	Ok(persona)
}
