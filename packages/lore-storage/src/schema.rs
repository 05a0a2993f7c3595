pub fn render_schema(vector_dim: u32) -> String {
	let init = include_str!("../../../sql/init.sql");
	let expanded = expand_includes(init);

	expanded.replace("<VECTOR_DIM>", &vector_dim.to_string())
}

fn expand_includes(sql: &str) -> String {
	let mut out = String::new();

	for line in sql.lines() {
		let trimmed = line.trim();

		if let Some(path) = trimmed.strip_prefix("\\ir ") {
			match path.trim() {
				"00_extensions.sql" => out.push_str(include_str!("../../../sql/00_extensions.sql")),
				"tables/001_posts.sql" =>
					out.push_str(include_str!("../../../sql/tables/001_posts.sql")),
				"tables/002_post_chunks.sql" =>
					out.push_str(include_str!("../../../sql/tables/002_post_chunks.sql")),
				"tables/003_post_title_embeddings.sql" =>
					out.push_str(include_str!("../../../sql/tables/003_post_title_embeddings.sql")),
				"tables/004_ask_sessions.sql" =>
					out.push_str(include_str!("../../../sql/tables/004_ask_sessions.sql")),
				"tables/005_ask_messages.sql" =>
					out.push_str(include_str!("../../../sql/tables/005_ask_messages.sql")),
				"tables/006_ask_message_embeddings.sql" => out
					.push_str(include_str!("../../../sql/tables/006_ask_message_embeddings.sql")),
				"tables/007_embedding_jobs.sql" =>
					out.push_str(include_str!("../../../sql/tables/007_embedding_jobs.sql")),
				"tables/008_embedding_dead_letters.sql" => out
					.push_str(include_str!("../../../sql/tables/008_embedding_dead_letters.sql")),
				"tables/009_personas.sql" =>
					out.push_str(include_str!("../../../sql/tables/009_personas.sql")),
				_ => out.push_str(line),
			}
		} else {
			out.push_str(line);
		}

		out.push('\n');
	}

	out
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn renders_with_vector_dim_substituted() {
		let sql = render_schema(1536);

		assert!(sql.contains("vector(1536)"));
		assert!(!sql.contains("<VECTOR_DIM>"));
		assert!(!sql.contains("\\ir "));
	}
}
